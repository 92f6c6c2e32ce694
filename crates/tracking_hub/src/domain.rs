mod events;
mod registry;
mod service;

pub use events::*;
pub use registry::*;
pub use service::*;

mod consumer;
mod logging;

pub use consumer::*;
pub use logging::*;

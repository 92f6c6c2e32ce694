mod bus;
mod document;
mod notification;
mod push;
mod queue;
mod result;
mod school_event;
mod stats;
mod student;
mod user;

pub use bus::*;
pub use document::*;
pub use notification::*;
pub use push::*;
pub use queue::*;
pub use result::*;
pub use school_event::*;
pub use stats::*;
pub use student::*;
pub use user::*;

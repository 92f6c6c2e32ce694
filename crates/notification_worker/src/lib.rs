pub mod change_feed;
pub mod domain;
pub mod notification_worker;

pub use notification_worker::*;

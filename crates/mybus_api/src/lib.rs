pub mod domain;
pub mod http;
pub mod mybus_api;

pub use domain::*;
pub use http::*;
pub use mybus_api::*;

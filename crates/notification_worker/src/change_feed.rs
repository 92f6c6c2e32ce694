mod handler_service;

pub use handler_service::*;

mod error;
mod routes;
mod server;
mod socket;

pub use error::*;
pub use routes::*;
pub use server::*;
pub use socket::*;

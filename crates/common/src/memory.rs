mod document_store;
mod repositories;
mod seed;

pub use document_store::*;
pub use seed::*;

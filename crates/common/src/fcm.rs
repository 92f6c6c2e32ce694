mod client;
mod dry_run;
mod payload;

pub use client::*;
pub use dry_run::*;
pub use payload::*;

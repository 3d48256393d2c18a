mod buffer;
mod cluster;
mod config;
mod constants;
mod engine;
mod errors;
mod manifest;
mod notify;
mod sync;
mod tree;
mod watch;
pub mod utils;

pub use buffer::*;
pub use cluster::*;
pub use config::*;
pub use engine::*;
pub use errors::*;
pub use manifest::*;
pub use notify::*;
pub use sync::*;
pub use tree::*;
pub use watch::*;

//-----------------------------------------------------------
// Test utils

#[cfg(test)]
pub mod test_utils;

//! Shared fakes and fixtures for unit tests: an in-memory cluster with
//! scriptable failures, a plain-string editor buffer, and manifest builders.

mod common;
mod fake_cluster;
mod memory_buffer;

pub use common::*;
pub use fake_cluster::*;
pub use memory_buffer::*;

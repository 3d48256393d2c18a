mod builder;
mod engine;

pub use builder::*;
pub use engine::*;

#[cfg(test)]
mod engine_test;

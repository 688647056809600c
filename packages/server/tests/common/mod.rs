// Common test utilities

pub mod fixtures;
pub mod harness;
pub mod pipeline;

pub use fixtures::*;
pub use harness::*;
pub use pipeline::*;

//! Shared fixtures for the integration tests

pub mod builders;
pub mod mocks;
pub mod strategies;

#[allow(unused_imports)]
pub use builders::*;
#[allow(unused_imports)]
pub use mocks::*;

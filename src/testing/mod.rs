//! Test support
//!
//! Mock transport and handler implementations used by the crate's own tests
//! and available to downstream consumers for testing their handlers without a
//! broker.

pub mod mocks;

//! Integration test crate for sluice.
//!
//! This crate has no library code. It only contains tests that drive a
//! runner end to end over the in-memory asset book and stub blocks.
//!
//! Run all integration tests:
//! ```sh
//! cargo test -p sluice-integration-tests
//! ```

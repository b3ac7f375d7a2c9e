//! Shared test utilities for gitvault integration tests.
//!
//! This module provides:
//! - `FakeCluster` and `RecordingGit` test doubles
//! - `IacHarness` wiring an `IacManager` to a bare remote in a temp directory

pub mod fakes;
pub mod harness;

pub use fakes::*;
pub use harness::IacHarness;

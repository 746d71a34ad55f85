#![forbid(unsafe_code)]

//! Offline consistency verification.
//!
//! A verification pass walks every leaf and summary page of an
//! [`AreaFile`](crate::storage::AreaFile), recomputes free sizes independently,
//! and records what disagrees in a [`Progress`] accumulator.

mod verify;

/// Findings accumulator and report types of a verification pass.
pub use verify::{
    Discrepancy, Progress, Treatment, VerifyCounts, VerifyFinding, VerifyReport, VerifySeverity,
};

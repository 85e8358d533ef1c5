//! tattoo-core: shared data model for the tattoo test-dispatch harness.
//!
//! This crate holds only pure types and algorithms — no I/O, no sockets, no
//! subprocesses. `tattoo-proto` wraps these types on the wire, `tattoo-queue`
//! and `tattoo-store` give them runtime homes, and the three binaries
//! (`tattoo-manager`, `tattoo-tester`, `tattoo-cli`) wire everything together.

pub mod bug;
pub mod report;
pub mod worker;

pub use bug::{Bug, BugCategory, RuntimeTesting};
pub use report::{Report, ReportRecord};
pub use worker::Worker;

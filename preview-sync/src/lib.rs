//! preview-sync: keeps per-repository working copies current.
//!
//! [`GitSync`] performs one clone-or-update pass; [`SyncCoordinator`] makes
//! sure passes for the same repository never overlap and that triggers
//! arriving mid-sync collapse into a single follow-up pass.

pub mod command;
pub mod coordinator;
pub mod error;
pub mod git;
pub mod manifest;

pub use coordinator::{SyncCoordinator, SyncReport, SyncState};
pub use error::SyncError;
pub use git::{GitSync, SyncOutcome, WorkingCopySync};

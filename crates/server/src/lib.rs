//! Resumable upload coordinator for stowage.
//!
//! This crate provides:
//! - [`UploadCoordinator`]: session state machine, reconciliation with the
//!   chunk store and promotion into permanent storage
//! - [`ExpirationSweeper`]: background expiry and orphan reclamation
//! - The HTTP surface over both

pub mod coordinator;
pub mod error;
pub mod folders;
pub mod handlers;
pub mod metrics;
pub mod routes;
pub mod state;
pub mod sweeper;

pub use coordinator::UploadCoordinator;
pub use error::{UploadError, UploadResult};
pub use folders::{FolderResolver, StaticFolderResolver};
pub use routes::create_router;
pub use state::AppState;
pub use sweeper::{ExpirationSweeper, SweepStats};

//! Repository traits for metadata operations.

pub mod attachments;
pub mod sessions;

pub use attachments::AttachmentRepo;
pub use sessions::{SessionRepo, TransitionOutcome};

//! kinfolk-client — HTTP client for the remote face-recognition
//! service, plus the orchestrator that keeps local members and the
//! server's registered-face list in step.

pub mod client;
pub mod encode;
pub mod sync;

pub use client::{ClientError, FaceBackend, FaceClient, DEFAULT_THRESHOLD};
pub use sync::{reconcile, registered_local_ids, Person, SyncError, SyncReport};

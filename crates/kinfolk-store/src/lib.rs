//! kinfolk-store — local persistence for the Kinfolk family archive.
//!
//! A single SQLite database holds the settings (server URL, device id),
//! the family members relevant to face sync, and the photo gallery rows
//! backing perceptual-hash duplicate detection.

pub mod gallery;
pub mod store;

pub use gallery::{attach_photo, AttachOutcome};
pub use store::{FamilyStore, Member, PhotoRecord, StoreError};

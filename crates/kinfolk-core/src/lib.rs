//! kinfolk-core — algorithmic core of the Kinfolk family archive.
//!
//! Endpoint normalization for the recognition server, device-scoped id
//! namespacing, and perceptual image hashing for duplicate detection.

pub mod endpoint;
pub mod fingerprint;
pub mod ids;
pub mod types;

pub use ids::IdMapper;
pub use types::{FaceLocation, RecognitionMatch, RegisteredFace};

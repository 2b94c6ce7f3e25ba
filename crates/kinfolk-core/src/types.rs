use serde::{Deserialize, Serialize};

/// Pixel bounding box of a recognized face, as reported by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaceLocation {
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
    pub left: i32,
}

/// One match from a recognition call.
///
/// `member_id` is the decimal string form of a namespaced server face
/// id (see [`crate::ids`]); ids from other devices' namespaces pass
/// through untouched. Matches are transient — they drive a local
/// photo-association decision and are never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecognitionMatch {
    pub member_id: String,
    pub member_name: String,
    /// Server-side confidence in [0, 1].
    pub confidence: f64,
    pub location: FaceLocation,
}

/// A face registration as known to the remote service.
///
/// Mirrors server state; fetched via `list_faces` and never mutated
/// locally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisteredFace {
    pub member_id: String,
    pub member_name: String,
}

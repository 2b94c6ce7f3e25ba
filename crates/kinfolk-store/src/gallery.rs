//! Photo association with perceptual-hash duplicate detection.
//!
//! Before a photo is attached to a member, its fingerprint is compared
//! against every photo already in that member's gallery (recomputed
//! from the stored bytes — fingerprints are never persisted). An exact
//! fingerprint match is a duplicate: a normal no-op outcome, distinct
//! from both success and failure, so callers can tell the user without
//! alarming them.

use std::io::BufWriter;
use std::path::{Path, PathBuf};

use image::codecs::jpeg::JpegEncoder;
use image::DynamicImage;
use kinfolk_core::fingerprint::fingerprint;

use crate::store::{FamilyStore, StoreError};

const JPEG_QUALITY: u8 = 90;

/// Result of trying to attach a photo to a member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttachOutcome {
    /// Stored and recorded in the gallery.
    Attached { photo_id: i64, path: PathBuf },
    /// A perceptually identical photo was already attached; nothing
    /// was stored.
    Duplicate,
}

/// Attach a photo to a member's gallery unless a perceptually identical
/// one is already there.
///
/// The stored file lands under `photo_dir` as a quality-90 JPEG.
/// Gallery entries whose files are missing or unreadable are skipped
/// during comparison — they can never block a new attach.
pub fn attach_photo(
    store: &FamilyStore,
    member_id: i64,
    photo: &DynamicImage,
    photo_dir: &Path,
) -> Result<AttachOutcome, StoreError> {
    let candidate_hash = fingerprint(photo);

    for existing in store.photos_for_member(member_id)? {
        let Ok(stored) = image::open(&existing.photo_path) else {
            tracing::debug!(path = %existing.photo_path, "skipping unreadable gallery entry");
            continue;
        };
        if fingerprint(&stored) == candidate_hash {
            tracing::debug!(member_id, hash = %candidate_hash, "photo already attached");
            return Ok(AttachOutcome::Duplicate);
        }
    }

    std::fs::create_dir_all(photo_dir)?;
    let added_at = chrono::Utc::now().timestamp_millis();
    let path = photo_dir.join(format!("photo_{member_id}_{added_at}.jpg"));
    save_jpeg(photo, &path)?;

    let photo_id = store.insert_photo(member_id, &path.to_string_lossy(), added_at)?;
    tracing::info!(member_id, path = %path.display(), "photo attached");

    Ok(AttachOutcome::Attached { photo_id, path })
}

fn save_jpeg(photo: &DynamicImage, path: &Path) -> Result<(), StoreError> {
    let rgb = DynamicImage::ImageRgb8(photo.to_rgb8());
    let file = std::fs::File::create(path)?;
    let mut writer = BufWriter::new(file);
    rgb.write_with_encoder(JpegEncoder::new_with_quality(&mut writer, JPEG_QUALITY))?;
    Ok(())
}

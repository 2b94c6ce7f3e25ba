//! Perceptual image hashing for duplicate photo detection.
//!
//! An 8×8 average hash: coarse enough to survive resizing, cheap enough
//! to recompute from stored photo bytes on demand. Two photos with the
//! same fingerprint are treated as duplicates; visually similar but
//! distinct images can collide, which is acceptable for this use.

use image::imageops::FilterType;
use image::DynamicImage;

const GRID: u32 = 8;
const SAMPLES: u32 = GRID * GRID;

/// Compute the 64-bit perceptual fingerprint of an image, hex-encoded
/// as 16 lowercase characters.
///
/// The image is downscaled to an 8×8 grid with nearest-neighbor
/// sampling; each sample's luma is the unweighted integer mean of its
/// RGB channels. Bit `i` is set when sample `i` (row-major) is at least
/// as bright as the mean over all 64 samples. Only pixel data
/// contributes — identical pixels always hash identically.
pub fn fingerprint(image: &DynamicImage) -> String {
    let small = image.resize_exact(GRID, GRID, FilterType::Nearest).to_rgb8();

    let lumas: Vec<u32> = small
        .pixels()
        .map(|p| (u32::from(p[0]) + u32::from(p[1]) + u32::from(p[2])) / 3)
        .collect();
    let mean = lumas.iter().sum::<u32>() / SAMPLES;

    let mut bits = 0u64;
    for luma in &lumas {
        bits = (bits << 1) | u64::from(*luma >= mean);
    }

    format!("{bits:016x}")
}

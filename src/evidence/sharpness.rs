//! Frame sharpness scoring
//!
//! Variance-of-Laplacian blur metric over the decoded luma plane. Low variance
//! means few edges, i.e. a blurry or smeared frame.

use crate::error::{Error, Result};
use image::GenericImageView;

/// Default score below which a frame is considered too blurry to analyze
pub const DEFAULT_SHARPNESS_THRESHOLD: f64 = 60.0;

/// Compute the variance-of-Laplacian sharpness score for a JPEG frame
///
/// Returns an error if the bytes do not decode as an image.
pub fn sharpness_score(jpeg: &[u8]) -> Result<f64> {
    let img = image::load_from_memory(jpeg)
        .map_err(|e| Error::Media(format!("frame decode failed: {}", e)))?;
    let (w, h) = img.dimensions();
    if w < 3 || h < 3 {
        return Err(Error::Media(format!("frame too small: {}x{}", w, h)));
    }

    let gray = img.to_luma8();
    let w = w as usize;
    let h = h as usize;
    let px = gray.as_raw();

    // 4-neighbor Laplacian, interior pixels only
    let mut sum = 0.0f64;
    let mut sum_sq = 0.0f64;
    let n = ((w - 2) * (h - 2)) as f64;

    for y in 1..h - 1 {
        for x in 1..w - 1 {
            let c = px[y * w + x] as f64;
            let lap = px[(y - 1) * w + x] as f64
                + px[(y + 1) * w + x] as f64
                + px[y * w + x - 1] as f64
                + px[y * w + x + 1] as f64
                - 4.0 * c;
            sum += lap;
            sum_sq += lap * lap;
        }
    }

    let mean = sum / n;
    Ok(sum_sq / n - mean * mean)
}

/// Whether a frame passes the blur check
pub fn is_sharp(jpeg: &[u8], threshold: f64) -> bool {
    match sharpness_score(jpeg) {
        Ok(score) => score >= threshold,
        // Undecodable frames never pass
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Luma};
    use std::io::Cursor;

    fn encode_jpeg(img: ImageBuffer<Luma<u8>, Vec<u8>>) -> Vec<u8> {
        let mut out = Cursor::new(Vec::new());
        image::DynamicImage::ImageLuma8(img)
            .write_to(&mut out, image::ImageFormat::Jpeg)
            .unwrap();
        out.into_inner()
    }

    fn flat_frame() -> Vec<u8> {
        encode_jpeg(ImageBuffer::from_pixel(64, 64, Luma([128u8])))
    }

    fn checkerboard_frame() -> Vec<u8> {
        encode_jpeg(ImageBuffer::from_fn(64, 64, |x, y| {
            if (x / 4 + y / 4) % 2 == 0 {
                Luma([255u8])
            } else {
                Luma([0u8])
            }
        }))
    }

    #[test]
    fn test_flat_frame_scores_near_zero() {
        let score = sharpness_score(&flat_frame()).unwrap();
        assert!(score < 50.0, "flat frame scored {}", score);
    }

    #[test]
    fn test_edges_score_higher_than_flat() {
        let flat = sharpness_score(&flat_frame()).unwrap();
        let edgy = sharpness_score(&checkerboard_frame()).unwrap();
        assert!(edgy > flat * 10.0, "edgy={} flat={}", edgy, flat);
    }

    #[test]
    fn test_garbage_bytes_fail_decode() {
        assert!(sharpness_score(&[0x00, 0x01, 0x02]).is_err());
        assert!(!is_sharp(&[0x00, 0x01, 0x02], 0.0));
    }
}

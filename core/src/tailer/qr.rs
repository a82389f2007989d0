//! QR-based shard/version recovery (spec §4.3 "QR decode pipeline").
//!
//! Grounded on `original_source/src/log_analyzer.py`'s
//! `process_new_screenshot`: crop the top-right corner, threshold against
//! the mean luminance of a central sample, darken anything below it, then
//! hand the result to a QR decoder.

use std::path::Path;

use image::{DynamicImage, GenericImageView, GrayImage, Luma};

use crate::constants::{QR_CROP_SIZE, QR_DARKEN_DELTA, QR_DECODE_RETRIES, QR_LUMINANCE_SAMPLE_SIZE};
use crate::error::QrError;

/// Decoded shard/version pair recovered from a screenshot's QR code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QrRecovery {
    pub shard: String,
    pub version: String,
}

/// Loads `path`, isolates the QR payload, decodes it and extracts
/// `(shard, version)` from a whitespace-separated token payload of at least
/// four tokens (`tokens[1]` shard, `tokens[3]` version).
///
/// Retries up to `QR_DECODE_RETRIES` on a transient I/O error (e.g. the
/// screenshot still being written by the game).
pub fn recover_shard_version(path: &Path) -> Result<QrRecovery, QrError> {
    let mut attempts = 0;
    loop {
        match try_recover(path) {
            Ok(result) => return Ok(result),
            Err(QrError::Io(source)) if attempts < QR_DECODE_RETRIES => {
                attempts += 1;
                tracing::debug!(?path, attempts, %source, "transient screenshot read failure, retrying");
                std::thread::sleep(std::time::Duration::from_millis(100 * attempts as u64));
            }
            Err(other) => return Err(other),
        }
    }
}

fn try_recover(path: &Path) -> Result<QrRecovery, QrError> {
    let image = image::open(path)?;
    let cropped = crop_top_right(&image);
    let prepared = threshold_and_darken(&cropped);
    decode_tokens(&prepared)
}

/// Crops the top-right `QR_CROP_SIZE x QR_CROP_SIZE` region, or returns the
/// image unchanged (resized to fit) if it is already that size or smaller.
fn crop_top_right(image: &DynamicImage) -> DynamicImage {
    let (width, height) = image.dimensions();
    if width <= QR_CROP_SIZE && height <= QR_CROP_SIZE {
        return image.clone();
    }
    let x = width.saturating_sub(QR_CROP_SIZE);
    let crop_w = QR_CROP_SIZE.min(width);
    let crop_h = QR_CROP_SIZE.min(height);
    image.crop_imm(x, 0, crop_w, crop_h)
}

/// Converts to grayscale, samples the central region's mean luminance and
/// darkens every pixel below that threshold by `QR_DARKEN_DELTA`.
fn threshold_and_darken(image: &DynamicImage) -> GrayImage {
    let mut gray = image.to_luma8();
    let (width, height) = gray.dimensions();

    let sample_w = QR_LUMINANCE_SAMPLE_SIZE.min(width);
    let sample_h = QR_LUMINANCE_SAMPLE_SIZE.min(height);
    let sx = (width.saturating_sub(sample_w)) / 2;
    let sy = (height.saturating_sub(sample_h)) / 2;

    let mut sum: u64 = 0;
    let mut count: u64 = 0;
    for y in sy..sy + sample_h {
        for x in sx..sx + sample_w {
            sum += gray.get_pixel(x, y).0[0] as u64;
            count += 1;
        }
    }
    let threshold = if count > 0 { (sum / count) as u8 } else { 128 };

    for pixel in gray.pixels_mut() {
        let v = pixel.0[0];
        if v < threshold {
            pixel.0[0] = v.saturating_sub(QR_DARKEN_DELTA);
        }
    }

    gray
}

fn decode_tokens(image: &GrayImage) -> Result<QrRecovery, QrError> {
    let luma: image::ImageBuffer<Luma<u8>, Vec<u8>> = image.clone();
    let mut prepared = rqrr::PreparedImage::prepare(luma);
    let grids = prepared.detect_grids();
    let grid = grids.first().ok_or(QrError::NotFound)?;
    let (_, content) = grid.decode().map_err(|_| QrError::NotFound)?;

    let tokens: Vec<String> = content.split_whitespace().map(str::to_string).collect();
    if tokens.len() < 4 {
        return Err(QrError::Malformed(tokens));
    }
    Ok(QrRecovery { shard: tokens[1].clone(), version: tokens[3].clone() })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Rgb};

    #[test]
    fn crop_top_right_leaves_small_images_untouched() {
        let small = DynamicImage::ImageRgb8(ImageBuffer::from_pixel(50, 50, Rgb([10, 10, 10])));
        let cropped = crop_top_right(&small);
        assert_eq!(cropped.dimensions(), (50, 50));
    }

    #[test]
    fn crop_top_right_takes_corner_of_larger_image() {
        let large = DynamicImage::ImageRgb8(ImageBuffer::from_pixel(400, 300, Rgb([10, 10, 10])));
        let cropped = crop_top_right(&large);
        assert_eq!(cropped.dimensions(), (QR_CROP_SIZE, QR_CROP_SIZE));
    }

    #[test]
    fn threshold_and_darken_lowers_subthreshold_pixels() {
        let image = DynamicImage::ImageLuma8(ImageBuffer::from_fn(60, 60, |x, y| {
            if x < 30 && y < 30 {
                Luma([50u8])
            } else {
                Luma([200u8])
            }
        }));
        let out = threshold_and_darken(&image);
        let dark_corner = out.get_pixel(5, 5).0[0];
        assert!(dark_corner < 50, "pixel below threshold should have been darkened further");
    }

    #[test]
    fn decode_tokens_requires_four_fields() {
        let blank = GrayImage::from_pixel(20, 20, Luma([255]));
        let err = decode_tokens(&blank).unwrap_err();
        assert!(matches!(err, QrError::NotFound));
    }
}

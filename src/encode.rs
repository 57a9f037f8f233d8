//! JPEG encoding and pixel conversion used by the software capture adapters.

use crate::errors::CameraError;
use crate::types::Resolution;
use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use image::{ImageFormat, RgbImage};

pub const DEFAULT_JPEG_QUALITY: u8 = 85;

/// Encode a packed RGB24 buffer as JPEG, scaling to `target` when it differs
/// from `source`.
pub fn encode_rgb_jpeg(
    rgb: Vec<u8>,
    source: Resolution,
    target: Resolution,
    quality: u8,
) -> Result<Bytes, CameraError> {
    let image = RgbImage::from_raw(source.width, source.height, rgb).ok_or_else(|| {
        CameraError::EncodingError(format!("RGB buffer does not match {}", source))
    })?;

    let image = if source == target {
        image
    } else {
        imageops::resize(&image, target.width, target.height, FilterType::Triangle)
    };

    let mut jpeg = Vec::new();
    JpegEncoder::new_with_quality(&mut jpeg, quality).encode_image(&image)?;
    Ok(Bytes::from(jpeg))
}

/// Convert packed YUYV 4:2:2 to RGB24 (BT.601, studio range).
pub fn yuyv_to_rgb(yuyv: &[u8], resolution: Resolution) -> Result<Vec<u8>, CameraError> {
    let expected = (resolution.pixel_count() * 2) as usize;
    if yuyv.len() < expected || resolution.width % 2 != 0 {
        return Err(CameraError::TransientCaptureFailure(format!(
            "YUYV buffer of {} bytes is too short for {}",
            yuyv.len(),
            resolution
        )));
    }

    let mut rgb = Vec::with_capacity(resolution.rgb_len());
    for chunk in yuyv[..expected].chunks_exact(4) {
        let u = i32::from(chunk[1]) - 128;
        let v = i32::from(chunk[3]) - 128;
        for y in [chunk[0], chunk[2]] {
            let c = 298 * (i32::from(y) - 16);
            let r = (c + 409 * v + 128) >> 8;
            let g = (c - 100 * u - 208 * v + 128) >> 8;
            let b = (c + 516 * u + 128) >> 8;
            rgb.push(r.clamp(0, 255) as u8);
            rgb.push(g.clamp(0, 255) as u8);
            rgb.push(b.clamp(0, 255) as u8);
        }
    }
    Ok(rgb)
}

/// JPEG SOI marker check
pub fn is_jpeg(data: &[u8]) -> bool {
    data.starts_with(&[0xFF, 0xD8])
}

/// Decode a JPEG just far enough to report its size.
pub fn jpeg_resolution(data: &[u8]) -> Result<Resolution, CameraError> {
    let image = image::load_from_memory_with_format(data, ImageFormat::Jpeg)?;
    Ok(Resolution::new(image.width(), image.height()))
}

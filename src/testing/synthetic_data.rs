//! Generated frame content
//!
//! Gradient frames that change every frame number, so consecutive frames
//! differ and an encoder sees realistic temporal variation without hardware.

use crate::encode::encode_rgb_jpeg;
use crate::errors::CameraError;
use crate::types::Resolution;
use bytes::Bytes;

/// Packed RGB24 gradient for `frame_number`.
pub fn synthetic_rgb_frame(frame_number: u64, resolution: Resolution) -> Vec<u8> {
    let width = resolution.width as usize;
    let mut data = vec![0u8; resolution.rgb_len()];
    if width == 0 {
        return data;
    }

    // Gradient shifts with the frame number
    let base = (frame_number % 256) as u8;
    for (y, row) in data.chunks_exact_mut(width * 3).enumerate() {
        for (x, pixel) in row.chunks_exact_mut(3).enumerate() {
            pixel[0] = base.wrapping_add(x as u8);
            pixel[1] = base.wrapping_add(y as u8);
            pixel[2] = base.wrapping_add(x.wrapping_add(y) as u8);
        }
    }

    data
}

/// JPEG-encoded [`synthetic_rgb_frame`].
pub fn synthetic_jpeg_frame(
    frame_number: u64,
    resolution: Resolution,
    quality: u8,
) -> Result<Bytes, CameraError> {
    encode_rgb_jpeg(
        synthetic_rgb_frame(frame_number, resolution),
        resolution,
        resolution,
        quality,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encode::{is_jpeg, jpeg_resolution};

    #[test]
    fn test_rgb_frame_size() {
        let res = Resolution::new(64, 48);
        assert_eq!(synthetic_rgb_frame(0, res).len(), res.rgb_len());
    }

    #[test]
    fn test_wide_frame_fills_last_pixel() {
        // Gradient channels wrap many times across a large frame
        let res = Resolution::new(5000, 1000);
        let data = synthetic_rgb_frame(3, res);
        assert_eq!(data.len(), res.rgb_len());
        let last = &data[data.len() - 3..];
        assert_eq!(last[0], 3u8.wrapping_add(4999u32 as u8));
        assert_eq!(last[1], 3u8.wrapping_add(999u32 as u8));
        assert_eq!(last[2], 3u8.wrapping_add((4999u32 + 999) as u8));
    }

    #[test]
    fn test_empty_resolution_yields_no_data() {
        assert!(synthetic_rgb_frame(0, Resolution::new(0, 4)).is_empty());
    }

    #[test]
    fn test_frames_vary_by_number() {
        let res = Resolution::new(8, 8);
        assert_ne!(synthetic_rgb_frame(0, res), synthetic_rgb_frame(1, res));
    }

    #[test]
    fn test_jpeg_frame_is_decodable() {
        let res = Resolution::new(32, 24);
        let jpeg = synthetic_jpeg_frame(7, res, 80).unwrap();
        assert!(is_jpeg(&jpeg));
        assert_eq!(jpeg_resolution(&jpeg).unwrap(), res);
    }
}

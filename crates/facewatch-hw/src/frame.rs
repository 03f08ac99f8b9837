//! Frame type, pixel format conversion and JPEG snapshots.

use image::GrayImage;
use std::path::Path;

/// A captured grayscale camera frame.
#[derive(Clone)]
pub struct Frame {
    /// Grayscale pixel data (width * height bytes).
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub timestamp: std::time::Instant,
    pub sequence: u32,
}

impl Frame {
    pub fn from_gray(data: Vec<u8>, width: u32, height: u32) -> Self {
        Self {
            data,
            width,
            height,
            timestamp: std::time::Instant::now(),
            sequence: 0,
        }
    }

    /// Copy the pixels into an `image` buffer.
    pub fn to_image(&self) -> Result<GrayImage, FrameError> {
        let expected = (self.width * self.height) as usize;
        if self.data.len() < expected {
            return Err(FrameError::InvalidLength {
                expected,
                actual: self.data.len(),
            });
        }
        GrayImage::from_raw(self.width, self.height, self.data[..expected].to_vec()).ok_or(
            FrameError::InvalidLength {
                expected,
                actual: self.data.len(),
            },
        )
    }

    /// Encode the frame as an image file; the format follows the extension.
    pub fn save(&self, path: &Path) -> Result<(), FrameError> {
        self.to_image()?.save(path)?;
        Ok(())
    }
}

impl From<GrayImage> for Frame {
    fn from(img: GrayImage) -> Self {
        let (width, height) = img.dimensions();
        Frame::from_gray(img.into_raw(), width, height)
    }
}

/// Convert packed YUYV (4:2:2) to grayscale by keeping the Y bytes.
pub fn yuyv_to_grayscale(yuyv: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let expected = (width * height * 2) as usize;
    if yuyv.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: yuyv.len(),
        });
    }
    Ok(yuyv[..expected].iter().step_by(2).copied().collect())
}

/// Downscale 16-bit little-endian grayscale to 8 bits (high byte).
pub fn y16_to_grayscale(y16: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let expected = (width * height * 2) as usize;
    if y16.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: y16.len(),
        });
    }
    Ok(y16[..expected].chunks_exact(2).map(|px| px[1]).collect())
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid buffer length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
    #[error("image encode: {0}")]
    Encode(#[from] image::ImageError),
    #[error("label font: {0}")]
    Font(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yuyv_to_grayscale() {
        let yuyv = vec![100, 128, 200, 128];
        assert_eq!(yuyv_to_grayscale(&yuyv, 2, 1).unwrap(), vec![100, 200]);
    }

    #[test]
    fn test_yuyv_invalid_length() {
        assert!(yuyv_to_grayscale(&[100, 128], 2, 1).is_err());
    }

    #[test]
    fn test_y16_keeps_high_byte() {
        let y16 = vec![0xff, 0x12, 0x00, 0xab];
        assert_eq!(y16_to_grayscale(&y16, 2, 1).unwrap(), vec![0x12, 0xab]);
    }

    #[test]
    fn test_to_image_rejects_short_buffer() {
        let frame = Frame::from_gray(vec![0; 3], 2, 2);
        assert!(frame.to_image().is_err());
    }

    #[test]
    fn test_save_jpeg_roundtrip_dimensions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snap.jpg");
        let frame = Frame::from_gray(vec![90; 8 * 6], 8, 6);
        frame.save(&path).unwrap();

        let back = image::open(&path).unwrap();
        assert_eq!((back.width(), back.height()), (8, 6));
    }
}

//! Raster frames sampled from a stream.

use std::fmt;

/// An RGBA raster, 4 bytes per pixel, row-major.
#[derive(Clone, PartialEq, Eq)]
pub struct Frame {
    width: u32,
    height: u32,
    rgba: Vec<u8>,
}

impl Frame {
    /// Wrap an RGBA buffer. Returns `None` when the length does not match.
    pub fn from_rgba(width: u32, height: u32, rgba: Vec<u8>) -> Option<Self> {
        let expected = width as usize * height as usize * 4;
        if rgba.len() != expected {
            return None;
        }
        Some(Self {
            width,
            height,
            rgba,
        })
    }

    /// A frame filled with a single colour.
    pub fn solid(width: u32, height: u32, pixel: [u8; 4]) -> Self {
        let count = width as usize * height as usize;
        let mut rgba = Vec::with_capacity(count * 4);
        for _ in 0..count {
            rgba.extend_from_slice(&pixel);
        }
        Self {
            width,
            height,
            rgba,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn as_rgba(&self) -> &[u8] {
        &self.rgba
    }

    /// Nearest-neighbour resample to exactly `width` x `height`.
    pub fn resample(&self, width: u32, height: u32) -> Frame {
        if self.width == width && self.height == height {
            return self.clone();
        }
        if self.width == 0 || self.height == 0 {
            return Frame::solid(width, height, [0, 0, 0, 255]);
        }

        let mut rgba = Vec::with_capacity(width as usize * height as usize * 4);
        for y in 0..height as u64 {
            let sy = (y * self.height as u64 / height as u64) as usize;
            for x in 0..width as u64 {
                let sx = (x * self.width as u64 / width as u64) as usize;
                let offset = (sy * self.width as usize + sx) * 4;
                rgba.extend_from_slice(&self.rgba[offset..offset + 4]);
            }
        }
        Frame {
            width,
            height,
            rgba,
        }
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.rgba.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_rgba_rejects_wrong_length() {
        assert!(Frame::from_rgba(2, 2, vec![0; 15]).is_none());
        assert!(Frame::from_rgba(2, 2, vec![0; 16]).is_some());
    }

    #[test]
    fn test_resample_downscales_to_target_raster() {
        let frame = Frame::solid(640, 480, [10, 20, 30, 255]);
        let small = frame.resample(320, 240);
        assert_eq!(small.width(), 320);
        assert_eq!(small.height(), 240);
        assert_eq!(small.as_rgba().len(), 320 * 240 * 4);
        assert_eq!(&small.as_rgba()[..4], &[10, 20, 30, 255]);
    }

    #[test]
    fn test_resample_picks_nearest_pixel() {
        // 2x1: left red, right blue
        let frame = Frame::from_rgba(2, 1, vec![255, 0, 0, 255, 0, 0, 255, 255]).unwrap();
        let wide = frame.resample(4, 1);
        assert_eq!(
            wide.as_rgba(),
            &[255, 0, 0, 255, 255, 0, 0, 255, 0, 0, 255, 255, 0, 0, 255, 255]
        );
    }

    #[test]
    fn test_resample_empty_source_yields_black_raster() {
        let frame = Frame::solid(0, 0, [1, 2, 3, 4]);
        let out = frame.resample(4, 3);
        assert_eq!(out.as_rgba().len(), 48);
        assert_eq!(&out.as_rgba()[..4], &[0, 0, 0, 255]);
    }

    #[test]
    fn test_debug_omits_pixels() {
        let frame = Frame::solid(3, 3, [0; 4]);
        let text = format!("{frame:?}");
        assert!(text.contains("bytes: 36"));
    }
}

//! Decoded pixel grids.
//!
//! [`Raster`] is the immutable image every extractor reads. [`GrayImage`] is
//! the single-channel view the landmark predictor samples through
//! [`ImageAccess`].

use crate::error::{Error, Result};
use crate::filter::Plane;

/// Number of interleaved 8-bit channels per pixel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channels {
    Gray,
    Rgb,
}

impl Channels {
    pub const fn count(self) -> usize {
        match self {
            Channels::Gray => 1,
            Channels::Rgb => 3,
        }
    }
}

/// An immutable decoded image: row-major, interleaved, 8 bits per channel.
///
/// Color rasters are stored in R, G, B order.
#[derive(Debug, Clone, PartialEq)]
pub struct Raster {
    width: u32,
    height: u32,
    channels: Channels,
    data: Vec<u8>,
    exif_tags: Option<usize>,
}

impl Raster {
    /// Build a raster, checking `width, height >= 1` and the buffer length.
    pub fn new(width: u32, height: u32, channels: Channels, data: Vec<u8>) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(Error::InvalidRaster(format!(
                "dimensions must be non-zero, got {}x{}",
                width, height
            )));
        }
        let expected = width as usize * height as usize * channels.count();
        if data.len() != expected {
            return Err(Error::InvalidRaster(format!(
                "expected {} bytes for {}x{}x{}, got {}",
                expected,
                width,
                height,
                channels.count(),
                data.len()
            )));
        }
        Ok(Self {
            width,
            height,
            channels,
            data,
            exif_tags: None,
        })
    }

    /// Attach the number of EXIF tags found in the source file.
    pub fn with_exif_tags(mut self, count: Option<usize>) -> Self {
        self.exif_tags = count;
        self
    }

    pub fn rgb_from_fn<F>(width: u32, height: u32, f: F) -> Result<Self>
    where
        F: Fn(u32, u32) -> [u8; 3],
    {
        let mut data = Vec::with_capacity(width as usize * height as usize * 3);
        for y in 0..height {
            for x in 0..width {
                data.extend_from_slice(&f(x, y));
            }
        }
        Self::new(width, height, Channels::Rgb, data)
    }

    pub fn gray_from_fn<F>(width: u32, height: u32, f: F) -> Result<Self>
    where
        F: Fn(u32, u32) -> u8,
    {
        let mut data = Vec::with_capacity(width as usize * height as usize);
        for y in 0..height {
            for x in 0..width {
                data.push(f(x, y));
            }
        }
        Self::new(width, height, Channels::Gray, data)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn channels(&self) -> Channels {
        self.channels
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn exif_tag_count(&self) -> Option<usize> {
        self.exif_tags
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// The `[r, g, b]` triple at `(x, y)`; gray pixels are replicated.
    pub fn rgb_at(&self, x: u32, y: u32) -> [u8; 3] {
        let idx = y as usize * self.width as usize + x as usize;
        match self.channels {
            Channels::Gray => {
                let v = self.data[idx];
                [v, v, v]
            }
            Channels::Rgb => {
                let i = idx * 3;
                [self.data[i], self.data[i + 1], self.data[i + 2]]
            }
        }
    }

    /// Luma conversion with ITU-R BT.601 weights in 14-bit fixed point,
    /// rounding to nearest.
    pub fn to_gray(&self) -> GrayImage {
        let data = match self.channels {
            Channels::Gray => self.data.clone(),
            Channels::Rgb => self
                .data
                .chunks_exact(3)
                .map(|px| {
                    let y = px[0] as u32 * 4899 + px[1] as u32 * 9617 + px[2] as u32 * 1868;
                    ((y + (1 << 13)) >> 14) as u8
                })
                .collect(),
        };
        GrayImage::new(data, self.width, self.height)
    }

    /// Each channel as its own float plane.
    pub fn channel_planes(&self) -> Vec<Plane> {
        let n = self.channels.count();
        (0..n)
            .map(|c| {
                let values = self.data.iter().skip(c).step_by(n).map(|&v| v as f64).collect();
                Plane::new(self.width as usize, self.height as usize, values)
            })
            .collect()
    }
}

/// Trait for accessing pixel intensities from an image.
pub trait ImageAccess {
    /// Grayscale intensity at (x, y); 0 for out-of-bounds pixels.
    fn get_pixel(&self, x: i32, y: i32) -> u8;

    fn width(&self) -> u32;
    fn height(&self) -> u32;
}

/// A single-channel 8-bit image buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct GrayImage {
    data: Vec<u8>,
    width: u32,
    height: u32,
}

impl GrayImage {
    pub fn new(data: Vec<u8>, width: u32, height: u32) -> Self {
        debug_assert_eq!(data.len(), width as usize * height as usize);
        Self {
            data,
            width,
            height,
        }
    }

    pub fn from_fn<F>(width: u32, height: u32, f: F) -> Self
    where
        F: Fn(u32, u32) -> u8,
    {
        let mut data = Vec::with_capacity(width as usize * height as usize);
        for y in 0..height {
            for x in 0..width {
                data.push(f(x, y));
            }
        }
        Self::new(data, width, height)
    }

    pub fn as_raw(&self) -> &[u8] {
        &self.data
    }

    /// In-bounds pixel at `(x, y)`.
    pub fn at(&self, x: usize, y: usize) -> u8 {
        self.data[y * self.width as usize + x]
    }

    pub fn to_plane(&self) -> Plane {
        Plane::new(
            self.width as usize,
            self.height as usize,
            self.data.iter().map(|&v| v as f64).collect(),
        )
    }
}

impl ImageAccess for GrayImage {
    fn get_pixel(&self, x: i32, y: i32) -> u8 {
        if x < 0 || y < 0 || x >= self.width as i32 || y >= self.height as i32 {
            return 0;
        }
        self.at(x as usize, y as usize)
    }

    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }
}

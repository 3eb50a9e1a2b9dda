use anyhow::{Context, Result, anyhow};
use fast_image_resize as fir;
use image::{GrayImage, RgbaImage};
use rayon::prelude::*;

/// Row-major binary raster, one byte per pixel, `1` marks a set pixel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BinaryMask {
    width: u32,
    height: u32,
    bits: Vec<u8>,
}

impl BinaryMask {
    pub fn new(width: u32, height: u32, bits: Vec<u8>) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(anyhow!("mask has empty dimensions {width}x{height}"));
        }
        let expected_len = (width as usize).saturating_mul(height as usize);
        if bits.len() != expected_len {
            return Err(anyhow!(
                "mask buffer size mismatch: got {}, expected {}",
                bits.len(),
                expected_len
            ));
        }
        let bits = bits.into_iter().map(|b| u8::from(b != 0)).collect();
        Ok(Self {
            width,
            height,
            bits,
        })
    }

    pub fn from_fn<F>(width: u32, height: u32, set: F) -> Self
    where
        F: Fn(u32, u32) -> bool,
    {
        let mut bits = Vec::with_capacity((width as usize) * (height as usize));
        for y in 0..height {
            for x in 0..width {
                bits.push(u8::from(set(x, y)));
            }
        }
        Self {
            width,
            height,
            bits,
        }
    }

    /// Any non-zero luma value is set.
    pub fn from_luma(image: &GrayImage) -> Self {
        Self {
            width: image.width(),
            height: image.height(),
            bits: image.as_raw().par_iter().map(|&v| u8::from(v != 0)).collect(),
        }
    }

    /// A pixel is set when it is neither transparent nor black.
    pub fn from_rgba(image: &RgbaImage) -> Self {
        let bits = image
            .as_raw()
            .par_chunks_exact(4)
            .map(|px| u8::from(px[3] != 0 && (px[0] | px[1] | px[2]) != 0))
            .collect();
        Self {
            width: image.width(),
            height: image.height(),
            bits,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn len(&self) -> usize {
        self.bits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bits.is_empty()
    }

    pub fn get(&self, x: u32, y: u32) -> bool {
        if x >= self.width || y >= self.height {
            return false;
        }
        self.bits[(y as usize) * (self.width as usize) + x as usize] != 0
    }

    pub fn count(&self) -> usize {
        self.bits.par_iter().filter(|&&b| b != 0).count()
    }

    /// Fraction of the raster that is set.
    pub fn coverage_ratio(&self) -> f32 {
        if self.bits.is_empty() {
            return 0.0;
        }
        self.count() as f32 / self.bits.len() as f32
    }

    /// Pixels set in both masks. Masks must share dimensions.
    pub fn overlap(&self, other: &BinaryMask) -> usize {
        debug_assert_eq!(self.dimensions(), other.dimensions());
        self.bits
            .par_iter()
            .zip(other.bits.par_iter())
            .filter(|&(&a, &b)| a & b != 0)
            .count()
    }

    pub fn inverted(&self) -> Self {
        Self {
            width: self.width,
            height: self.height,
            bits: self.bits.par_iter().map(|&b| b ^ 1).collect(),
        }
    }

    pub fn resize_nearest(&self, width: u32, height: u32) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(anyhow!("cannot resize mask to {width}x{height}"));
        }
        if (width, height) == self.dimensions() {
            return Ok(self.clone());
        }

        let src_image = fir::images::Image::from_vec_u8(
            self.width,
            self.height,
            self.bits.clone(),
            fir::PixelType::U8,
        )?;
        let mut dst_image = fir::images::Image::new(width, height, fir::PixelType::U8);
        let mut resizer = fir::Resizer::new();
        let resize_options = fir::ResizeOptions::new().resize_alg(fir::ResizeAlg::Nearest);
        resizer
            .resize(&src_image, &mut dst_image, Some(&resize_options))
            .context("mask resize failed")?;

        Ok(Self {
            width,
            height,
            bits: dst_image.into_vec(),
        })
    }
}

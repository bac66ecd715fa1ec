// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Atkinson error-diffusion dithering.
//
// Each pixel is quantised to black or white and 1/8 of the quantisation error
// is pushed onto six neighbours that have not been visited yet:
//
//              *   1   1
//          1   1   1
//              1
//
// Only 6/8 of the error is carried forward; the remaining 2/8 is dropped,
// which keeps highlights and shadows crisp on a thermal head.

use image::GrayImage;
use sirius_core::error::{Result, SiriusError};
use sirius_core::types::PixelBuffer;

/// Neighbour offsets (dx, dy) that receive 1/8 of the error each.
const ATKINSON_TAPS: [(i64, i64); 6] = [(1, 0), (2, 0), (-1, 1), (0, 1), (1, 1), (0, 2)];

/// Share of the error each tap receives.
const TAP_WEIGHT: f32 = 1.0 / 8.0;

/// Mutable intensity raster, 0.0 = black and 1.0 = white.
#[derive(Debug, Clone, PartialEq)]
pub struct GrayRaster {
    width: u32,
    height: u32,
    values: Vec<f32>,
}

impl GrayRaster {
    /// Normalise an 8-bit luma image into `[0, 1]`.
    pub fn from_luma(image: &GrayImage) -> Self {
        let values = image.pixels().map(|p| f32::from(p.0[0]) / 255.0).collect();
        Self {
            width: image.width(),
            height: image.height(),
            values,
        }
    }

    /// A raster with every cell at `value`.
    pub fn filled(width: u32, height: u32, value: f32) -> Self {
        Self {
            width,
            height,
            values: vec![value; width as usize * height as usize],
        }
    }

    pub fn from_values(width: u32, height: u32, values: Vec<f32>) -> Result<Self> {
        if values.len() != width as usize * height as usize {
            return Err(SiriusError::Encoding(format!(
                "{} intensities cannot fill a {width}x{height} raster",
                values.len()
            )));
        }
        Ok(Self {
            width,
            height,
            values,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn get(&self, x: u32, y: u32) -> f32 {
        self.values[self.index(x, y)]
    }

    fn index(&self, x: u32, y: u32) -> usize {
        y as usize * self.width as usize + x as usize
    }

    /// Add `amount` to the cell at (`x`, `y`) if it lies inside the raster.
    fn spill(&mut self, x: i64, y: i64, amount: f32) {
        if x < 0 || y < 0 || x >= i64::from(self.width) || y >= i64::from(self.height) {
            return;
        }
        let idx = self.index(x as u32, y as u32);
        self.values[idx] += amount;
    }
}

/// Dither `raster` in place and return the packed result.
///
/// Single row-major pass.  The raster itself carries the diffused error, so
/// no extra row buffers are needed; after the call every cell holds its
/// quantised value (0.0 or 1.0).
pub fn atkinson(raster: &mut GrayRaster) -> PixelBuffer {
    let (width, height) = (raster.width, raster.height);
    PixelBuffer::from_fn(width, height, |x, y| {
        let idx = raster.index(x, y);
        let adjusted = raster.values[idx];
        let quantized = if adjusted < 0.5 { 0.0 } else { 1.0 };
        raster.values[idx] = quantized;

        let share = (adjusted - quantized) * TAP_WEIGHT;
        for (dx, dy) in ATKINSON_TAPS {
            raster.spill(i64::from(x) + dx, i64::from(y) + dy, share);
        }

        // Black cells are printed dots.
        quantized == 0.0
    })
}

/// Flat threshold at the midpoint, no diffusion.
pub fn threshold_raster(raster: &GrayRaster) -> PixelBuffer {
    PixelBuffer::from_fn(raster.width, raster.height, |x, y| raster.get(x, y) < 0.5)
}

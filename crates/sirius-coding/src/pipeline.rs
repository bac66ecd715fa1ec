// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Encoding pipelines — every entry point ends in a packed `PixelBuffer`.
//
//   default   letterbox to device width -> grayscale -> Atkinson -> pack
//   threshold grayscale -> midpoint threshold -> pack (icons, faces)
//   raw       pre-sized upload, width must already match -> threshold -> pack
//   file      load from storage -> default

use std::path::Path;

use image::{DynamicImage, GrayImage, Luma};
use imageproc::contrast::{self, ThresholdType};
use sirius_core::error::{Result, SiriusError};
use sirius_core::types::{PixelBuffer, RASTER_WIDTH};
use tracing::{debug, info, instrument};

use crate::dither::{GrayRaster, atkinson};
use crate::image::processor::{ImageProcessor, encode_png};

/// Luma values at or below this print as black under the flat threshold.
const MIDPOINT: u8 = 127;

/// Runs the encoding pipelines for one raster width.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageEncoder {
    raster_width: u32,
}

impl Default for ImageEncoder {
    fn default() -> Self {
        Self::new(RASTER_WIDTH)
    }
}

impl ImageEncoder {
    pub fn new(raster_width: u32) -> Self {
        Self { raster_width }
    }

    pub fn raster_width(&self) -> u32 {
        self.raster_width
    }

    /// Letterbox, grayscale, dither, and pack.
    #[instrument(skip_all, fields(width = image.width(), height = image.height()))]
    pub fn default_pipeline(&self, image: &DynamicImage) -> Result<PixelBuffer> {
        let luma = ImageProcessor::from_dynamic(image.clone())
            .fit_width(self.raster_width)?
            .into_luma();
        let mut raster = GrayRaster::from_luma(&luma);
        let pixels = atkinson(&mut raster);
        debug!(
            rows = pixels.height(),
            dots = pixels.count_on(),
            "default pipeline complete"
        );
        Ok(pixels)
    }

    /// Grayscale and cut at the midpoint.  The image keeps its own size.
    #[instrument(skip_all, fields(width = image.width(), height = image.height()))]
    pub fn threshold(&self, image: &DynamicImage) -> Result<PixelBuffer> {
        let luma = ImageProcessor::from_dynamic(image.clone())
            .flatten()
            .into_luma();
        Ok(threshold_luma(&luma))
    }

    /// Decode an upload that is already the device width and threshold it.
    #[instrument(skip(self, data), fields(data_len = data.len()))]
    pub fn raw_image_pipeline(&self, data: &[u8]) -> Result<PixelBuffer> {
        let processor = ImageProcessor::from_bytes(data)?;
        if processor.width() != self.raster_width {
            return Err(SiriusError::Encoding(format!(
                "raw image is {} dots wide, device needs {}",
                processor.width(),
                self.raster_width
            )));
        }
        Ok(threshold_luma(&processor.flatten().into_luma()))
    }

    /// Load an image from storage and run the default pipeline.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn image_pipeline(&self, path: impl AsRef<Path>) -> Result<PixelBuffer> {
        let processor = ImageProcessor::open(path.as_ref())?;
        info!(
            width = processor.width(),
            height = processor.height(),
            "encoding stored image"
        );
        self.default_pipeline(processor.as_dynamic())
    }
}

/// Default pipeline at the native raster width.
pub fn default_pipeline(image: &DynamicImage) -> Result<PixelBuffer> {
    ImageEncoder::default().default_pipeline(image)
}

/// Flat midpoint threshold, no resizing.
pub fn threshold(image: &DynamicImage) -> Result<PixelBuffer> {
    ImageEncoder::default().threshold(image)
}

/// Pre-sized upload at the native raster width.
pub fn raw_image_pipeline(data: &[u8]) -> Result<PixelBuffer> {
    ImageEncoder::default().raw_image_pipeline(data)
}

/// Stored image through the default pipeline at the native raster width.
pub fn image_pipeline(path: impl AsRef<Path>) -> Result<PixelBuffer> {
    ImageEncoder::default().image_pipeline(path)
}

/// Render packed pixels as a black-on-white PNG.
pub fn preview_png(pixels: &PixelBuffer) -> Result<Vec<u8>> {
    let image = GrayImage::from_fn(pixels.width(), pixels.height(), |x, y| {
        if pixels.get(x, y) { Luma([0]) } else { Luma([255]) }
    });
    encode_png(&DynamicImage::ImageLuma8(image))
}

fn threshold_luma(luma: &GrayImage) -> PixelBuffer {
    let binary = contrast::threshold(luma, MIDPOINT, ThresholdType::Binary);
    PixelBuffer::from_fn(binary.width(), binary.height(), |x, y| {
        binary.get_pixel(x, y).0[0] == 0
    })
}

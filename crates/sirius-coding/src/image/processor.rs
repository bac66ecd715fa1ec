// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Image processor — decoding, letterboxing to the printer width, alpha
// flattening, and grayscale conversion.  Operates on in-memory images using
// the `image` crate.

use image::imageops::{self, FilterType};
use image::{DynamicImage, GrayImage, ImageFormat, Rgba, RgbaImage};
use sirius_core::error::SiriusError;
use tracing::{debug, info, instrument};

/// Source image on its way to becoming a printer raster.
///
/// Each transformation consumes `self` and returns a new `ImageProcessor`,
/// enabling method chaining.
///
/// ```ignore
/// let gray = ImageProcessor::open("photo.jpg")?
///     .fit_width(385)?
///     .into_luma();
/// ```
pub struct ImageProcessor {
    /// The current working image.
    image: DynamicImage,
}

impl ImageProcessor {
    // -- Construction ---------------------------------------------------------

    /// Load an image from a file path.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn open(path: impl AsRef<std::path::Path>) -> Result<Self, SiriusError> {
        let img = image::open(path.as_ref()).map_err(|err| {
            SiriusError::Image(format!(
                "failed to open {}: {}",
                path.as_ref().display(),
                err
            ))
        })?;
        info!(width = img.width(), height = img.height(), "Image loaded");
        Ok(Self { image: img })
    }

    /// Create a processor from raw encoded bytes (PNG, JPEG, GIF, ...).
    #[instrument(skip(data), fields(data_len = data.len()))]
    pub fn from_bytes(data: &[u8]) -> Result<Self, SiriusError> {
        let img = image::load_from_memory(data)
            .map_err(|err| SiriusError::Image(format!("failed to decode image: {}", err)))?;
        debug!(
            width = img.width(),
            height = img.height(),
            "Image decoded from bytes"
        );
        Ok(Self { image: img })
    }

    /// Wrap an already-decoded `DynamicImage`.
    pub fn from_dynamic(image: DynamicImage) -> Self {
        Self { image }
    }

    // -- Accessors ------------------------------------------------------------

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn as_dynamic(&self) -> &DynamicImage {
        &self.image
    }

    // -- Transformations ------------------------------------------------------

    /// Scale to exactly `width` dots wide, preserving aspect ratio, and
    /// composite onto an opaque white canvas.
    ///
    /// The height is rounded to the nearest whole row and never drops below
    /// one.  Lanczos3 filtering keeps the result identical for identical
    /// input.
    #[instrument(skip(self), fields(width))]
    pub fn fit_width(self, width: u32) -> Result<Self, SiriusError> {
        let (src_w, src_h) = (self.image.width(), self.image.height());
        if src_w == 0 || src_h == 0 || width == 0 {
            return Err(SiriusError::Image(format!(
                "cannot scale a {src_w}x{src_h} image to width {width}"
            )));
        }

        let height = ((u64::from(src_h) * u64::from(width) + u64::from(src_w) / 2)
            / u64::from(src_w))
        .clamp(1, u64::from(u32::MAX)) as u32;

        info!(from_w = src_w, from_h = src_h, width, height, "Letterboxing image");

        let rgba = self.image.to_rgba8();
        let scaled = if (src_w, src_h) == (width, height) {
            rgba
        } else {
            imageops::resize(&rgba, width, height, FilterType::Lanczos3)
        };

        Ok(Self {
            image: DynamicImage::ImageRgba8(flatten_on_white(&scaled)),
        })
    }

    /// Composite any transparency onto white without resizing.
    pub fn flatten(self) -> Self {
        let rgba = self.image.to_rgba8();
        Self {
            image: DynamicImage::ImageRgba8(flatten_on_white(&rgba)),
        }
    }

    /// Consume the processor and return its 8-bit luma channel.
    pub fn into_luma(self) -> GrayImage {
        self.image.to_luma8()
    }

    // -- Output ---------------------------------------------------------------

    /// Encode the current image as PNG bytes.
    pub fn to_png_bytes(&self) -> Result<Vec<u8>, SiriusError> {
        encode_png(&self.image)
    }
}

/// Alpha-composite `image` over an opaque white background.
fn flatten_on_white(image: &RgbaImage) -> RgbaImage {
    let mut canvas = RgbaImage::from_pixel(image.width(), image.height(), Rgba([255, 255, 255, 255]));
    imageops::overlay(&mut canvas, image, 0, 0);
    canvas
}

/// Encode a `DynamicImage` as PNG, returning the raw bytes.
pub(crate) fn encode_png(image: &DynamicImage) -> Result<Vec<u8>, SiriusError> {
    let mut buffer = Vec::new();
    let mut cursor = std::io::Cursor::new(&mut buffer);
    image
        .write_to(&mut cursor, ImageFormat::Png)
        .map_err(|err| SiriusError::Image(format!("PNG encoding failed: {}", err)))?;
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    #[test]
    fn fit_width_preserves_aspect_ratio() {
        let img = DynamicImage::ImageLuma8(GrayImage::from_pixel(770, 200, Luma([0])));
        let fitted = ImageProcessor::from_dynamic(img).fit_width(385).unwrap();
        assert_eq!((fitted.width(), fitted.height()), (385, 100));
    }

    #[test]
    fn fit_width_upscales_narrow_images() {
        let img = DynamicImage::ImageLuma8(GrayImage::from_pixel(77, 10, Luma([0])));
        let fitted = ImageProcessor::from_dynamic(img).fit_width(385).unwrap();
        assert_eq!((fitted.width(), fitted.height()), (385, 50));
    }

    #[test]
    fn fit_width_never_collapses_to_zero_rows() {
        let img = DynamicImage::ImageLuma8(GrayImage::from_pixel(4000, 1, Luma([0])));
        let fitted = ImageProcessor::from_dynamic(img).fit_width(385).unwrap();
        assert_eq!(fitted.height(), 1);
    }

    #[test]
    fn transparent_pixels_become_white() {
        let img = RgbaImage::from_pixel(385, 2, Rgba([0, 0, 0, 0]));
        let luma = ImageProcessor::from_dynamic(DynamicImage::ImageRgba8(img))
            .fit_width(385)
            .unwrap()
            .into_luma();
        assert!(luma.pixels().all(|p| p.0[0] == 255));
    }

    #[test]
    fn from_bytes_rejects_garbage() {
        let err = ImageProcessor::from_bytes(b"definitely not an image")
            .err()
            .expect("decode must fail");
        assert!(matches!(err, SiriusError::Image(_)));
    }

    #[test]
    fn png_bytes_decode_back() {
        let img = DynamicImage::ImageLuma8(GrayImage::from_pixel(5, 3, Luma([200])));
        let png = ImageProcessor::from_dynamic(img).to_png_bytes().unwrap();
        let back = ImageProcessor::from_bytes(&png).unwrap();
        assert_eq!((back.width(), back.height()), (5, 3));
    }
}

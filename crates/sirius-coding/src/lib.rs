// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// sirius-coding — Image encoding for the Sirius print gateway.
//
// Turns arbitrary source images into the bi-level, bit-packed rasters the
// printers consume: letterboxing to the device width, grayscale conversion,
// Atkinson error diffusion or a flat midpoint threshold, and PNG previews of
// the result.

pub mod dither;
pub mod image;
pub mod pipeline;

pub use dither::{GrayRaster, atkinson};
pub use self::image::processor::ImageProcessor;
pub use pipeline::{
    ImageEncoder, default_pipeline, image_pipeline, preview_png, raw_image_pipeline, threshold,
};

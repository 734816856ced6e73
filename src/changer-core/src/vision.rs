// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Camera and QR decoder seams used while scanning the magazine.

use image::{imageops, GrayImage};

use crate::DynResult;

/// Source of greyscale frames.
pub trait Camera: Send {
    /// Capture one frame. `Ok(None)` means no frame is available.
    fn grab(&mut self) -> DynResult<Option<GrayImage>>;
}

/// Decodes the payload of a QR code in a frame.
pub trait QrDecoder: Send + Sync {
    fn decode(&self, image: &GrayImage) -> Option<String>;
}

impl<D: QrDecoder + ?Sized> QrDecoder for Box<D> {
    fn decode(&self, image: &GrayImage) -> Option<String> {
        (**self).decode(image)
    }
}

/// Decodes sample identifiers from camera frames.
///
/// Labels may be printed light on dark, so a frame that yields nothing is
/// retried inverted.
pub struct VisionAdapter<D> {
    decoder: D,
}

impl<D: QrDecoder> VisionAdapter<D> {
    pub fn new(decoder: D) -> Self {
        Self { decoder }
    }

    pub fn decode(&self, image: &GrayImage) -> Option<String> {
        if let Some(id) = self.decoder.decode(image) {
            return Some(id);
        }
        let mut inverted = image.clone();
        imageops::invert(&mut inverted);
        self.decoder.decode(&inverted)
    }

    /// Grab a frame and decode it. Capture failures are reported, a missing
    /// frame or unreadable code is `Ok(None)`.
    pub fn capture(&self, camera: &mut dyn Camera) -> DynResult<Option<String>> {
        Ok(camera.grab()?.and_then(|frame| self.decode(&frame)))
    }
}

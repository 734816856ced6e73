// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Camera and QR decoder implementations used by the robot dispatcher.

use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};

use image::GrayImage;
use tracing::{debug, info};

use changer_core::vision::{Camera, QrDecoder, VisionAdapter};
use changer_core::DynResult;

use crate::config::{CameraKind, VisionConfig};

/// Camera that never delivers a frame.
#[derive(Debug, Default)]
pub struct NoCamera;

impl Camera for NoCamera {
    fn grab(&mut self) -> DynResult<Option<GrayImage>> {
        Ok(None)
    }
}

/// Reads the latest frame from an image file written by an external grabber.
#[derive(Debug)]
pub struct FileCamera {
    path: PathBuf,
}

impl FileCamera {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl Camera for FileCamera {
    fn grab(&mut self) -> DynResult<Option<GrayImage>> {
        if !self.path.exists() {
            debug!("No camera frame at {}", self.path.display());
            return Ok(None);
        }
        Ok(Some(image::open(&self.path)?.to_luma8()))
    }
}

/// QR decoder backed by `rqrr`.
#[derive(Debug, Default)]
pub struct RqrrDecoder;

impl QrDecoder for RqrrDecoder {
    fn decode(&self, image: &GrayImage) -> Option<String> {
        let mut prepared = rqrr::PreparedImage::prepare_from_greyscale(
            image.width() as usize,
            image.height() as usize,
            |x, y| image.get_pixel(x as u32, y as u32)[0],
        );
        prepared
            .detect_grids()
            .into_iter()
            .find_map(|grid| match grid.decode() {
                Ok((_, content)) => {
                    let content = content.trim();
                    (!content.is_empty()).then(|| content.to_string())
                }
                Err(e) => {
                    debug!("QR grid not decodable: {}", e);
                    None
                }
            })
    }
}

/// Camera plus decoder, shared by robot connections.
///
/// Capture and decode are blocking; call [`Vision::scan`] from
/// `spawn_blocking`.
pub struct Vision {
    camera: Mutex<Box<dyn Camera>>,
    adapter: VisionAdapter<Box<dyn QrDecoder>>,
}

impl Vision {
    pub fn new(camera: Box<dyn Camera>, decoder: Box<dyn QrDecoder>) -> Self {
        Self {
            camera: Mutex::new(camera),
            adapter: VisionAdapter::new(decoder),
        }
    }

    pub fn from_config(cfg: &VisionConfig) -> Self {
        let camera: Box<dyn Camera> = match (cfg.camera, &cfg.image_path) {
            (CameraKind::File, Some(path)) => {
                info!("Camera: image file {}", path.display());
                Box::new(FileCamera::new(path.clone()))
            }
            _ => {
                info!("Camera: none");
                Box::new(NoCamera)
            }
        };
        Self::new(camera, Box::new(RqrrDecoder))
    }

    /// Grab one frame and decode the sample identifier on it.
    pub fn scan(&self) -> DynResult<Option<String>> {
        let mut camera = self.camera.lock().unwrap_or_else(PoisonError::into_inner);
        self.adapter.capture(camera.as_mut())
    }
}

use crate::error::InferenceError;
use crate::pipeline::config::Device;
use crate::pipeline::types::{BBox, Frame, ObjectClass};
use anyhow::{anyhow, Result};
use image::{DynamicImage, ImageBuffer, Rgb};
use opencv::core::Mat;
use opencv::prelude::*;
use usls::models::RTDETR;
use usls::{Config, Image};

/// Class names in the order the football detector was trained with.
pub const FOOTBALL_CLASSES: [&str; 4] = ["ball", "goalkeeper", "player", "referee"];

#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub bbox: BBox,
    pub confidence: f32,
    pub class: ObjectClass,
}

/// Object detection backend: one detection list per input frame, in order.
pub trait DetectionService: Send {
    fn detect_batch(&mut self, frames: &[Frame]) -> Result<Vec<Vec<Detection>>, InferenceError>;
}

/// A wrapper around the USLS RT-DETR model that handles BGR-to-RGB conversion
/// and corrects for aspect-ratio padding bugs in the underlying model library.
pub struct UslsDetector {
    model: RTDETR,
}

impl UslsDetector {
    pub fn new(model_path: &str, device: Device) -> Result<Self> {
        let config = Config::default()
            .with_model_file(model_path)
            .with_class_names(&FOOTBALL_CLASSES)
            .with_model_device(usls_device(device));

        let config = config.commit()?;
        let model = RTDETR::new(config)?;
        Ok(Self { model })
    }

    fn forward(&mut self, frames: &[Frame]) -> Result<Vec<Vec<Detection>>> {
        let mut usls_images = Vec::with_capacity(frames.len());
        let mut corrections = Vec::with_capacity(frames.len());

        for frame in frames {
            let dynamic_image = mat_to_dynamic_image(&frame.mat)?;

            // Correction calculations (USLS RT-DETR bug workaround)
            let size = frame.mat.size()?;
            let img_w = size.width as f32;
            let img_h = size.height as f32;

            let correction = if img_w > img_h {
                (img_w / img_h, 1.0)
            } else if img_h > img_w {
                (1.0, img_h / img_w)
            } else {
                (1.0, 1.0)
            };
            corrections.push(correction);

            usls_images.push(Image::from(dynamic_image));
        }

        let results = self.model.forward(&usls_images)?;

        let batch = results
            .into_iter()
            .zip(corrections)
            .map(|(y, (x_corr, y_corr))| {
                y.hbbs
                    .into_iter()
                    .filter_map(|hbb| {
                        let class = hbb.name().and_then(ObjectClass::from_name)?;
                        let x1 = hbb.xmin() * x_corr;
                        let y1 = hbb.ymin() * y_corr;
                        Some(Detection {
                            bbox: BBox::new(
                                x1,
                                y1,
                                x1 + hbb.width() * x_corr,
                                y1 + hbb.height() * y_corr,
                            ),
                            confidence: hbb.confidence().unwrap_or(0.0),
                            class,
                        })
                    })
                    .collect()
            })
            .collect();

        Ok(batch)
    }
}

impl DetectionService for UslsDetector {
    fn detect_batch(&mut self, frames: &[Frame]) -> Result<Vec<Vec<Detection>>, InferenceError> {
        self.forward(frames)
            .map_err(|e| InferenceError::from_message(format!("{:#}", e)))
    }
}

pub(crate) fn usls_device(device: Device) -> usls::Device {
    match device {
        Device::Cpu => usls::Device::Cpu(0),
        Device::Cuda => usls::Device::Cuda(0),
        #[cfg(target_os = "macos")]
        Device::CoreMl => usls::Device::CoreMl,
        #[cfg(not(target_os = "macos"))]
        Device::CoreMl => {
            tracing::warn!("CoreML is only available on macOS, using CPU");
            usls::Device::Cpu(0)
        }
    }
}

/// Convert an OpenCV Mat (BGR) to an image::DynamicImage (RGB)
pub fn mat_to_dynamic_image(mat: &Mat) -> Result<DynamicImage> {
    let mut rgb_mat = Mat::default();
    opencv::imgproc::cvt_color_def(mat, &mut rgb_mat, opencv::imgproc::COLOR_BGR2RGB)?;

    let size = rgb_mat.size()?;
    let width = size.width as u32;
    let height = size.height as u32;

    if !rgb_mat.is_continuous() {
        return Err(anyhow!("Mat is not continuous"));
    }

    let buffer = rgb_mat.data_bytes()?.to_vec();

    let img_buffer = ImageBuffer::<Rgb<u8>, _>::from_vec(width, height, buffer)
        .ok_or_else(|| anyhow!("Failed to create ImageBuffer from Mat data"))?;

    Ok(DynamicImage::ImageRgb8(img_buffer))
}

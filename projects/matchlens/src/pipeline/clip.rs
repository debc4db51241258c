use crate::error::InferenceError;
use crate::pipeline::config::Device;
use crate::pipeline::detection::{mat_to_dynamic_image, usls_device};
use crate::pipeline::team::CropEmbedder;
use anyhow::{anyhow, Result};
use opencv::core::Mat;
use usls::models::Clip;
use usls::{Config, Image};

const CLIP_BATCH: usize = 32;

/// Player crops through the pretrained CLIP ViT-B/32 image encoder.
///
/// Weights are fetched by usls on first use. Features are L2-normalized.
pub struct ClipEmbedder {
    model: Clip,
}

impl ClipEmbedder {
    pub fn new(device: Device) -> Result<Self> {
        let config = Config::clip_vit_b32()
            .with_device_all(usls_device(device))
            .commit()?;
        let model = Clip::new(config)?;
        Ok(Self { model })
    }

    fn forward(&mut self, crops: &[Mat]) -> Result<Vec<Vec<f32>>> {
        let mut features = Vec::with_capacity(crops.len());
        for chunk in crops.chunks(CLIP_BATCH) {
            let images = chunk
                .iter()
                .map(|crop| mat_to_dynamic_image(crop).map(Image::from))
                .collect::<Result<Vec<_>>>()?;
            let encoded = self.model.encode_images(&images)?;
            features.extend(
                encoded
                    .iter_dim(0)
                    .map(|row| l2_normalized(row.iter().copied().collect())),
            );
        }

        if features.len() != crops.len() {
            return Err(anyhow!(
                "clip returned {} embeddings for {} crops",
                features.len(),
                crops.len()
            ));
        }
        Ok(features)
    }
}

impl CropEmbedder for ClipEmbedder {
    fn embed(&mut self, crops: &[Mat]) -> Result<Vec<Vec<f32>>, InferenceError> {
        self.forward(crops)
            .map_err(|e| InferenceError::from_message(format!("{:#}", e)))
    }
}

fn l2_normalized(mut v: Vec<f32>) -> Vec<f32> {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        v.iter_mut().for_each(|x| *x /= norm);
    }
    v
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_l2_normalized() {
        let v = l2_normalized(vec![3.0, 4.0]);
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);
        assert_eq!(l2_normalized(vec![0.0, 0.0]), vec![0.0, 0.0]);
    }
}

use crate::pipeline::types::{BBox, Bgr};
use anyhow::Result;
use opencv::core;
use opencv::prelude::*;

/// Crops a Mat to a pixel bounding box, clamped to the image.
/// Returns `None` when nothing of the box lies inside the image.
pub fn crop_bbox(img: &core::Mat, bbox: &BBox) -> Result<Option<core::Mat>> {
    let size = img.size()?;

    let x = bbox.x1.round() as i32;
    let y = bbox.y1.round() as i32;
    let w = bbox.width().round() as i32;
    let h = bbox.height().round() as i32;

    let x_clamped = x.clamp(0, size.width);
    let y_clamped = y.clamp(0, size.height);
    let w_clamped = (x + w).clamp(0, size.width) - x_clamped;
    let h_clamped = (y + h).clamp(0, size.height) - y_clamped;

    if w_clamped <= 0 || h_clamped <= 0 {
        return Ok(None);
    }

    let roi = core::Rect::new(x_clamped, y_clamped, w_clamped, h_clamped);
    let cropped = core::Mat::roi(img, roi)?;

    let mut out = core::Mat::default();
    cropped.copy_to(&mut out)?;

    Ok(Some(out))
}

/// Upper half of a player crop, central 50% of its width.
pub fn jersey_region(crop: &core::Mat) -> Result<Option<core::Mat>> {
    let size = crop.size()?;
    let w = size.width as f32;
    let h = size.height as f32;
    let region = BBox::new(w * 0.25, 0.0, w * 0.75, h * 0.5);
    crop_bbox(crop, &region)
}

/// Per-channel mean of a BGR image.
pub fn mean_bgr(img: &core::Mat) -> Result<[f64; 3]> {
    let mean = core::mean_def(img)?;
    Ok([mean[0], mean[1], mean[2]])
}

/// Average of several channel means, rounded to a color.
pub fn average_color(means: &[[f64; 3]]) -> Option<Bgr> {
    if means.is_empty() {
        return None;
    }
    let n = means.len() as f64;
    let mut sum = [0.0f64; 3];
    for m in means {
        for c in 0..3 {
            sum[c] += m[c];
        }
    }
    Some(Bgr([
        (sum[0] / n).round().clamp(0.0, 255.0) as u8,
        (sum[1] / n).round().clamp(0.0, 255.0) as u8,
        (sum[2] / n).round().clamp(0.0, 255.0) as u8,
    ]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use opencv::core::{Scalar, CV_8UC3};

    #[test]
    fn test_crop_is_clamped() {
        let img = core::Mat::new_rows_cols_with_default(50, 80, CV_8UC3, Scalar::all(0.0)).unwrap();
        let crop = crop_bbox(&img, &BBox::new(70.0, 40.0, 100.0, 70.0))
            .unwrap()
            .unwrap();
        assert_eq!(crop.size().unwrap(), core::Size::new(10, 10));
        assert!(crop_bbox(&img, &BBox::new(90.0, 0.0, 120.0, 10.0))
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_jersey_color() {
        let mut img =
            core::Mat::new_rows_cols_with_default(40, 20, CV_8UC3, Scalar::new(0.0, 255.0, 0.0, 0.0))
                .unwrap();
        // red shirt over green shorts
        opencv::imgproc::rectangle(
            &mut img,
            core::Rect::new(0, 0, 20, 20),
            Scalar::new(0.0, 0.0, 255.0, 0.0),
            opencv::imgproc::FILLED,
            opencv::imgproc::LINE_8,
            0,
        )
        .unwrap();
        let jersey = jersey_region(&img).unwrap().unwrap();
        assert_eq!(jersey.size().unwrap(), core::Size::new(10, 20));
        assert_eq!(average_color(&[mean_bgr(&jersey).unwrap()]), Some(Bgr::RED));
        assert_eq!(average_color(&[]), None);
    }
}

//! Inpainting mask synthesis from an aligned pose.
//!
//! Projects created without a mask get one drawn from the adapted
//! keypoints: limbs become thick strokes, the torso is filled as a
//! convex hull, and the result is shrunk slightly and re-thresholded so
//! its edge is smooth but still strictly binary.

use std::io::Cursor;

use image::{GrayImage, ImageFormat, Luma};
use imageproc::distance_transform::Norm;
use imageproc::drawing::{draw_filled_circle_mut, draw_polygon_mut};
use imageproc::point::Point;

use crate::error::CoreError;
use crate::pose::{
    find, PoseKeypoint, LEFT_ANKLE, LEFT_ELBOW, LEFT_HIP, LEFT_KNEE, LEFT_SHOULDER, LEFT_WRIST, RIGHT_ANKLE,
    RIGHT_ELBOW, RIGHT_HIP, RIGHT_KNEE, RIGHT_SHOULDER, RIGHT_WRIST,
};

/// Keypoints at or below this confidence are left out of the mask.
pub const MIN_CONFIDENCE: f64 = 0.2;
pub const LIMB_THICKNESS: u32 = 18;

const FILLED: Luma<u8> = Luma([255]);

const LIMBS: [(&str, &str); 12] = [
    (LEFT_SHOULDER, LEFT_ELBOW),
    (LEFT_ELBOW, LEFT_WRIST),
    (RIGHT_SHOULDER, RIGHT_ELBOW),
    (RIGHT_ELBOW, RIGHT_WRIST),
    (LEFT_HIP, LEFT_KNEE),
    (LEFT_KNEE, LEFT_ANKLE),
    (RIGHT_HIP, RIGHT_KNEE),
    (RIGHT_KNEE, RIGHT_ANKLE),
    (LEFT_SHOULDER, RIGHT_SHOULDER),
    (LEFT_HIP, RIGHT_HIP),
    (LEFT_SHOULDER, LEFT_HIP),
    (RIGHT_SHOULDER, RIGHT_HIP),
];

const TORSO: [&str; 4] = [LEFT_SHOULDER, RIGHT_SHOULDER, LEFT_HIP, RIGHT_HIP];

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MaskOptions {
    /// Erosion radius in pixels. Zero disables it.
    pub retreat: u8,
    /// Gaussian sigma of the edge smoothing. Zero disables it.
    pub feather: f32,
}

impl Default for MaskOptions {
    fn default() -> Self {
        Self {
            retreat: 2,
            feather: 3.0,
        }
    }
}

/// Draw a binary (0/255) mask of the figure described by `keypoints`.
/// Coordinates are normalized, so the mask can be any size.
pub fn synthesize(keypoints: &[PoseKeypoint], width: u32, height: u32, options: MaskOptions) -> GrayImage {
    let mut mask = GrayImage::new(width, height);
    let to_pixel = |name: &str| {
        find(keypoints, name)
            .filter(|k| k.confidence > MIN_CONFIDENCE)
            .map(|k| ((k.x * f64::from(width)) as f32, (k.y * f64::from(height)) as f32))
    };

    for (a, b) in LIMBS {
        if let (Some(p), Some(q)) = (to_pixel(a), to_pixel(b)) {
            draw_stroke(&mut mask, p, q, LIMB_THICKNESS as f32);
        }
    }

    let torso: Vec<Point<i32>> = TORSO
        .iter()
        .filter_map(|name| to_pixel(name))
        .map(|(x, y)| Point::new(x.round() as i32, y.round() as i32))
        .collect();
    if torso.len() >= 3 {
        fill_polygon(&mut mask, &imageproc::geometry::convex_hull(torso));
    }

    if options.retreat > 0 {
        mask = imageproc::morphology::erode(&mask, Norm::L2, options.retreat);
    }
    if options.feather > 0.0 {
        mask = imageproc::filter::gaussian_blur_f32(&mask, options.feather);
        for pixel in mask.pixels_mut() {
            pixel.0[0] = if pixel.0[0] > 127 { 255 } else { 0 };
        }
    }
    mask
}

/// PNG bytes of a mask, ready to store.
pub fn encode_png(mask: &GrayImage) -> Result<Vec<u8>, CoreError> {
    let mut bytes = Cursor::new(Vec::new());
    mask.write_to(&mut bytes, ImageFormat::Png)
        .map_err(|e| CoreError::Internal(format!("Failed to encode mask: {e}")))?;
    Ok(bytes.into_inner())
}

/// A segment with round caps, `thickness` pixels wide.
fn draw_stroke(mask: &mut GrayImage, p: (f32, f32), q: (f32, f32), thickness: f32) {
    let radius = thickness / 2.0;
    let (dx, dy) = (q.0 - p.0, q.1 - p.1);
    let len = (dx * dx + dy * dy).sqrt();
    if len >= 1.0 {
        let (nx, ny) = (-dy / len * radius, dx / len * radius);
        let corner = |x: f32, y: f32| Point::new(x.round() as i32, y.round() as i32);
        fill_polygon(
            mask,
            &[
                corner(p.0 + nx, p.1 + ny),
                corner(q.0 + nx, q.1 + ny),
                corner(q.0 - nx, q.1 - ny),
                corner(p.0 - nx, p.1 - ny),
            ],
        );
    }
    for (x, y) in [p, q] {
        draw_filled_circle_mut(mask, (x.round() as i32, y.round() as i32), radius.round() as i32, FILLED);
    }
}

/// `draw_polygon_mut` rejects closed or degenerate outlines.
fn fill_polygon(mask: &mut GrayImage, poly: &[Point<i32>]) {
    let mut poly = poly.to_vec();
    poly.dedup();
    while poly.len() > 1 && poly.first() == poly.last() {
        poly.pop();
    }
    if poly.len() >= 3 {
        draw_polygon_mut(mask, &poly, FILLED);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RAW: MaskOptions = MaskOptions {
        retreat: 0,
        feather: 0.0,
    };

    fn figure(confidence: f64) -> Vec<PoseKeypoint> {
        vec![
            PoseKeypoint::new(LEFT_SHOULDER, 0.35, 0.25, confidence),
            PoseKeypoint::new(RIGHT_SHOULDER, 0.65, 0.25, confidence),
            PoseKeypoint::new(LEFT_HIP, 0.4, 0.55, confidence),
            PoseKeypoint::new(RIGHT_HIP, 0.6, 0.55, confidence),
            PoseKeypoint::new(LEFT_KNEE, 0.4, 0.75, confidence),
            PoseKeypoint::new(LEFT_ANKLE, 0.4, 0.95, confidence),
        ]
    }

    fn filled(mask: &GrayImage, x: u32, y: u32) -> bool {
        mask.get_pixel(x, y).0[0] == 255
    }

    #[test]
    fn torso_hull_is_filled() {
        let mask = synthesize(&figure(0.9), 200, 200, RAW);
        // Centre of the torso, far from every limb stroke.
        assert!(filled(&mask, 100, 80));
        assert!(!filled(&mask, 10, 10));
        assert!(!filled(&mask, 190, 190));
    }

    #[test]
    fn torso_needs_three_points() {
        let points: Vec<PoseKeypoint> = figure(0.9)
            .into_iter()
            .filter(|k| k.name == LEFT_SHOULDER || k.name == RIGHT_HIP)
            .collect();
        let mask = synthesize(&points, 200, 200, RAW);
        // No stroke links the two, so nothing is drawn between them.
        assert!(!filled(&mask, 100, 80));
    }

    #[test]
    fn limbs_are_stroked() {
        let mask = synthesize(&figure(0.9), 200, 200, RAW);
        // Midway along left knee to left ankle, and within half a stroke of it.
        assert!(filled(&mask, 80, 170));
        assert!(filled(&mask, 87, 170));
        assert!(!filled(&mask, 100, 170));
    }

    #[test]
    fn low_confidence_points_are_dropped() {
        let mask = synthesize(&figure(0.2), 200, 200, RAW);
        assert!(mask.pixels().all(|p| p.0[0] == 0));

        let mask = synthesize(&figure(0.21), 200, 200, RAW);
        assert!(filled(&mask, 100, 80));
    }

    #[test]
    fn smoothing_keeps_mask_binary() {
        let mask = synthesize(&figure(0.9), 120, 90, MaskOptions::default());
        assert_eq!(mask.dimensions(), (120, 90));
        assert!(mask.pixels().all(|p| p.0[0] == 0 || p.0[0] == 255));
        assert!(filled(&mask, 60, 36));
    }

    #[test]
    fn retreat_shrinks_the_figure() {
        let points = figure(0.9);
        let raw = synthesize(&points, 200, 200, RAW);
        let eroded = synthesize(
            &points,
            200,
            200,
            MaskOptions {
                retreat: 2,
                feather: 0.0,
            },
        );
        let count = |m: &GrayImage| m.pixels().filter(|p| p.0[0] == 255).count();
        assert!(count(&eroded) < count(&raw));
    }

    #[test]
    fn png_encoding_round_trips() {
        let mask = synthesize(&figure(0.9), 32, 32, RAW);
        let bytes = encode_png(&mask).unwrap();
        let back = image::load_from_memory(&bytes).unwrap().to_luma8();
        assert_eq!(back, mask);
    }
}

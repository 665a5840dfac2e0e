//! Insertion-zone proposal from background pixels.
//!
//! A subject can plausibly stand or sit where the scene shows a long,
//! level surface edge (pool coping, terrace floor line, bench top). The
//! image is split into vertical bands; each band reports its strongest
//! horizontal luminance edge in the lower half of the frame, and adjacent
//! bands whose edges sit at a consistent depth are merged into one zone.

use image::{imageops, GrayImage, RgbImage};
use serde::{Deserialize, Serialize};

/// Number of vertical bands the background is divided into.
pub const ZONE_BANDS: u32 = 8;
/// Minimum mean absolute row-to-row luminance step for a band to count
/// as showing a surface edge.
pub const MIN_EDGE_STRENGTH: f64 = 12.0;
/// Maximum depth deviation (normalized height) between bands of one zone.
pub const DEPTH_TOLERANCE: f64 = 0.04;
/// Zones narrower than this fraction of the frame are discarded.
pub const MIN_ZONE_WIDTH: f64 = 0.2;

const WEIGHT_CONSISTENCY: f64 = 0.6;
const WEIGHT_WIDTH: f64 = 0.4;

/// A candidate region of the background where a subject can be placed.
///
/// All coordinates are normalized to `[0, 1]`; `avg_depth` is the vertical
/// position of the supporting surface edge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsertionZone {
    pub x_start: f64,
    pub x_end: f64,
    pub width: f64,
    pub avg_depth: f64,
    pub stability_score: f64,
}

impl InsertionZone {
    pub fn center_x(&self) -> f64 {
        (self.x_start + self.x_end) / 2.0
    }
}

/// Sort zones by stability, most stable first. Equal scores keep their
/// original (left-to-right) order.
pub fn rank_zones(zones: &mut [InsertionZone]) {
    zones.sort_by(|a, b| b.stability_score.total_cmp(&a.stability_score));
}

#[derive(Debug, Clone, Copy)]
struct BandEdge {
    x0: u32,
    x1: u32,
    depth: f64,
    strength: f64,
}

/// Propose ranked insertion zones for a background image.
///
/// Returns an empty list when no band shows a surface edge.
pub fn propose_insertion_zones(image: &RgbImage) -> Vec<InsertionZone> {
    let (w, h) = image.dimensions();
    if w < ZONE_BANDS || h < 4 {
        return Vec::new();
    }

    let gray = imageops::grayscale(image);
    let band_width = w / ZONE_BANDS;
    let bands: Vec<BandEdge> = (0..ZONE_BANDS)
        .map(|b| {
            let x0 = b * band_width;
            let x1 = if b == ZONE_BANDS - 1 { w } else { x0 + band_width };
            strongest_edge(&gray, x0, x1)
        })
        .collect();

    let mut zones = Vec::new();
    let mut group: Vec<BandEdge> = Vec::new();

    for band in bands {
        let supported = band.strength >= MIN_EDGE_STRENGTH;
        if supported && !group.is_empty() && (band.depth - mean_depth(&group)).abs() <= DEPTH_TOLERANCE {
            group.push(band);
            continue;
        }
        if let Some(zone) = close_group(&group, w) {
            zones.push(zone);
        }
        group.clear();
        if supported {
            group.push(band);
        }
    }
    if let Some(zone) = close_group(&group, w) {
        zones.push(zone);
    }

    rank_zones(&mut zones);
    zones
}

/// Find the strongest horizontal edge in the lower half of a band.
fn strongest_edge(gray: &GrayImage, x0: u32, x1: u32) -> BandEdge {
    let h = gray.height();
    let cols = f64::from(x1 - x0);
    let mut best = BandEdge {
        x0,
        x1,
        depth: 0.0,
        strength: 0.0,
    };

    for y in h / 2..h - 1 {
        let step: f64 = (x0..x1)
            .map(|x| {
                let above = i32::from(gray.get_pixel(x, y).0[0]);
                let below = i32::from(gray.get_pixel(x, y + 1).0[0]);
                f64::from((below - above).abs())
            })
            .sum::<f64>()
            / cols;
        if step > best.strength {
            best.strength = step;
            best.depth = f64::from(y + 1) / f64::from(h);
        }
    }
    best
}

fn mean_depth(group: &[BandEdge]) -> f64 {
    group.iter().map(|b| b.depth).sum::<f64>() / group.len() as f64
}

fn close_group(group: &[BandEdge], image_width: u32) -> Option<InsertionZone> {
    let first = group.first()?;
    let last = group.last()?;
    let w = f64::from(image_width);
    let x_start = f64::from(first.x0) / w;
    let x_end = f64::from(last.x1) / w;
    let width = x_end - x_start;
    if width < MIN_ZONE_WIDTH {
        return None;
    }

    let avg_depth = mean_depth(group);
    let variance = group
        .iter()
        .map(|b| (b.depth - avg_depth).powi(2))
        .sum::<f64>()
        / group.len() as f64;
    let consistency = (1.0 - variance.sqrt() / DEPTH_TOLERANCE).clamp(0.0, 1.0);

    Some(InsertionZone {
        x_start,
        x_end,
        width,
        avg_depth,
        stability_score: (WEIGHT_CONSISTENCY * consistency + WEIGHT_WIDTH * width).clamp(0.0, 1.0),
    })
}

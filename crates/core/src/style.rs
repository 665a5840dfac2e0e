//! Style embeddings for style-consistency checks.
//!
//! An embedder maps an image region to a fixed-length vector; two regions
//! share a style when their vectors point the same way. Palettes given as
//! `#RRGGBB` strings are embedded through the same histogram space so a
//! generated subject can be compared against either a reference image or
//! a declared palette.

use image::{Rgb, RgbImage};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Histogram bins per colour channel.
pub const BINS_PER_CHANNEL: usize = 4;
pub const EMBEDDING_DIMENSION: usize = BINS_PER_CHANNEL * BINS_PER_CHANNEL * BINS_PER_CHANNEL;

/// Style target for a project: an optional reference image and palette.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StyleContext {
    pub reference_url: Option<String>,
    pub palette: Vec<String>,
}

impl StyleContext {
    pub fn is_empty(&self) -> bool {
        self.reference_url.is_none() && self.palette.is_empty()
    }
}

/// Deterministic image-to-vector embedding.
pub trait StyleEmbedder: Send + Sync {
    /// Embed the pixels selected by `include` (all pixels when `None`).
    fn embed(&self, image: &RgbImage, include: Option<&dyn Fn(u32, u32) -> bool>) -> Vec<f64>;

    /// Embed a palette of colours with equal weight.
    fn embed_palette(&self, colours: &[Rgb<u8>]) -> Vec<f64>;
}

/// Joint RGB histogram, L2-normalised.
#[derive(Debug, Clone, Copy, Default)]
pub struct ColorHistogramEmbedder;

impl ColorHistogramEmbedder {
    fn bin(pixel: &Rgb<u8>) -> usize {
        let q = |c: u8| usize::from(c) * BINS_PER_CHANNEL / 256;
        let [r, g, b] = pixel.0;
        (q(r) * BINS_PER_CHANNEL + q(g)) * BINS_PER_CHANNEL + q(b)
    }
}

impl StyleEmbedder for ColorHistogramEmbedder {
    fn embed(&self, image: &RgbImage, include: Option<&dyn Fn(u32, u32) -> bool>) -> Vec<f64> {
        let mut hist = vec![0.0; EMBEDDING_DIMENSION];
        for (x, y, pixel) in image.enumerate_pixels() {
            if include.map_or(true, |f| f(x, y)) {
                hist[Self::bin(pixel)] += 1.0;
            }
        }
        l2_normalize(hist)
    }

    fn embed_palette(&self, colours: &[Rgb<u8>]) -> Vec<f64> {
        let mut hist = vec![0.0; EMBEDDING_DIMENSION];
        for c in colours {
            hist[Self::bin(c)] += 1.0;
        }
        l2_normalize(hist)
    }
}

fn l2_normalize(mut v: Vec<f64>) -> Vec<f64> {
    let norm = v.iter().map(|x| x * x).sum::<f64>().sqrt();
    if norm > 0.0 {
        v.iter_mut().for_each(|x| *x /= norm);
    }
    v
}

/// Cosine similarity clamped to `[0, 1]`. Zero vectors compare as 0.
pub fn cosine_similarity(a: &[f64], b: &[f64]) -> f64 {
    let dot: f64 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na = a.iter().map(|x| x * x).sum::<f64>().sqrt();
    let nb = b.iter().map(|x| x * x).sum::<f64>().sqrt();
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    (dot / (na * nb)).clamp(0.0, 1.0)
}

/// Parse a `#RRGGBB` (or `RRGGBB`) hex colour.
pub fn parse_hex_colour(s: &str) -> Result<Rgb<u8>, CoreError> {
    let hex = s.trim().trim_start_matches('#');
    let invalid = || CoreError::Validation(format!("Invalid palette colour '{s}'"));
    if hex.len() != 6 || !hex.is_ascii() {
        return Err(invalid());
    }
    let channel = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).map_err(|_| invalid());
    Ok(Rgb([channel(0)?, channel(2)?, channel(4)?]))
}

pub fn parse_palette(palette: &[String]) -> Result<Vec<Rgb<u8>>, CoreError> {
    palette.iter().map(|c| parse_hex_colour(c)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_images_are_fully_similar() {
        let img = RgbImage::from_fn(10, 10, |x, _| if x < 5 { Rgb([200, 30, 30]) } else { Rgb([20, 20, 220]) });
        let e = ColorHistogramEmbedder;
        let a = e.embed(&img, None);
        assert_eq!(a.len(), EMBEDDING_DIMENSION);
        assert!((cosine_similarity(&a, &a) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn disjoint_colours_are_dissimilar() {
        let e = ColorHistogramEmbedder;
        let red = e.embed(&RgbImage::from_pixel(4, 4, Rgb([250, 0, 0])), None);
        let blue = e.embed(&RgbImage::from_pixel(4, 4, Rgb([0, 0, 250])), None);
        assert_eq!(cosine_similarity(&red, &blue), 0.0);
    }

    #[test]
    fn include_filter_restricts_region() {
        let img = RgbImage::from_fn(10, 10, |x, _| if x < 5 { Rgb([250, 0, 0]) } else { Rgb([0, 0, 250]) });
        let e = ColorHistogramEmbedder;
        let left_only: &dyn Fn(u32, u32) -> bool = &|x, _y| x < 5;
        let region = e.embed(&img, Some(left_only));
        let palette = e.embed_palette(&[Rgb([255, 10, 10])]);
        assert!((cosine_similarity(&region, &palette) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn zero_vector_similarity_is_zero() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn hex_colours_parse() {
        assert_eq!(parse_hex_colour("#FF8000").unwrap(), Rgb([255, 128, 0]));
        assert_eq!(parse_hex_colour("0a0B0c").unwrap(), Rgb([10, 11, 12]));
        assert!(parse_hex_colour("#FFF").is_err());
        assert!(parse_hex_colour("#GG0000").is_err());
    }

    #[test]
    fn palette_rejects_any_bad_entry() {
        let palette = vec!["#FFFFFF".to_string(), "nope".to_string()];
        assert!(parse_palette(&palette).is_err());
    }
}

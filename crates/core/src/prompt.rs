//! Generation prompt construction.

use image::RgbImage;
use serde::{Deserialize, Serialize};

use crate::scene::SceneType;

/// Palette entries beyond this many are left out of the prompt.
pub const MAX_PROMPT_COLOURS: usize = 3;

const PROMPT_SUFFIX: &str = "photorealistic lifestyle photography, professional quality";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LightingTemperature {
    Warm,
    Cool,
}

impl LightingTemperature {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Warm => "warm",
            Self::Cool => "cool",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LightingAnalysis {
    pub direction: String,
    pub temperature: LightingTemperature,
    /// Mean HSV value in `[0, 1]`.
    pub intensity: f64,
}

impl Default for LightingAnalysis {
    fn default() -> Self {
        Self {
            direction: "natural".to_string(),
            temperature: LightingTemperature::Warm,
            intensity: 0.5,
        }
    }
}

/// Classify the background's colour temperature by counting warm-hued
/// (red through yellow, magenta) against cool-hued (cyan through blue)
/// pixels. Achromatic pixels are ignored; ties are warm.
pub fn analyze_lighting(image: &RgbImage) -> LightingAnalysis {
    let (mut warm, mut cool) = (0u64, 0u64);
    let mut value_sum = 0.0;
    let mut n = 0u64;

    for p in image.pixels() {
        let [r, g, b] = p.0.map(f64::from);
        let max = r.max(g).max(b);
        let min = r.min(g).min(b);
        value_sum += max / 255.0;
        n += 1;

        let chroma = max - min;
        if chroma == 0.0 {
            continue;
        }
        let hue = if max == r {
            60.0 * ((g - b) / chroma).rem_euclid(6.0)
        } else if max == g {
            60.0 * ((b - r) / chroma + 2.0)
        } else {
            60.0 * ((r - g) / chroma + 4.0)
        };
        if hue < 60.0 || hue > 300.0 {
            warm += 1;
        } else if (180.0..=300.0).contains(&hue) {
            cool += 1;
        }
    }

    LightingAnalysis {
        direction: "natural".to_string(),
        temperature: if cool > warm {
            LightingTemperature::Cool
        } else {
            LightingTemperature::Warm
        },
        intensity: if n == 0 { 0.0 } else { value_sum / n as f64 },
    }
}

/// Build the generation prompt for a scene.
///
/// `{base}, {direction} {temperature} lighting, color harmony with {palette},
/// natural {scene} composition, {suffix}`; the colour clause is omitted for
/// an empty palette.
pub fn build_prompt(scene: SceneType, lighting: &LightingAnalysis, palette: &[String]) -> String {
    let mut parts = vec![
        scene.profile().base_prompt.to_string(),
        format!("{} {} lighting", lighting.direction, lighting.temperature.as_str()),
    ];
    if !palette.is_empty() {
        let colours: Vec<&str> = palette.iter().take(MAX_PROMPT_COLOURS).map(String::as_str).collect();
        parts.push(format!("color harmony with {}", colours.join(", ")));
    }
    parts.push(format!("natural {} composition", scene.as_str()));
    parts.push(PROMPT_SUFFIX.to_string());
    parts.join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn prompt_includes_first_three_colours() {
        let palette: Vec<String> = ["#111111", "#222222", "#333333", "#444444"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let prompt = build_prompt(SceneType::Spa, &LightingAnalysis::default(), &palette);
        assert_eq!(
            prompt,
            "serene woman in tranquil spa setting, natural warm lighting, \
             color harmony with #111111, #222222, #333333, natural spa composition, \
             photorealistic lifestyle photography, professional quality"
        );
    }

    #[test]
    fn empty_palette_drops_colour_clause() {
        let prompt = build_prompt(SceneType::Pool, &LightingAnalysis::default(), &[]);
        assert!(!prompt.contains("color harmony"));
        assert!(prompt.starts_with("elegant woman"));
    }

    #[test]
    fn blue_scene_is_cool() {
        let img = RgbImage::from_pixel(8, 8, Rgb([30, 90, 200]));
        let lighting = analyze_lighting(&img);
        assert_eq!(lighting.temperature, LightingTemperature::Cool);
        assert!((lighting.intensity - 200.0 / 255.0).abs() < 1e-12);
    }

    #[test]
    fn orange_and_grey_scene_is_warm() {
        let img = RgbImage::from_fn(8, 8, |x, _| if x < 2 { Rgb([230, 140, 40]) } else { Rgb([128, 128, 128]) });
        assert_eq!(analyze_lighting(&img).temperature, LightingTemperature::Warm);
    }
}

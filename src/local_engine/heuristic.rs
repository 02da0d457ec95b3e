//! Pixel-statistics scene description
//!
//! Non-ML placeholder: brightness, dominant colors, color variety and
//! aspect ratio are bucketed, and the caption is taken from the template
//! family of the brightness bucket.

use image::RgbaImage;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Upper bound on pixels visited per frame
const MAX_SAMPLES: u64 = 16_384;

/// A quantized color bin must hold this share of samples to count as present
const VARIETY_MIN_SHARE: f64 = 0.005;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrightnessBucket {
    Dark,
    Dim,
    Moderate,
    Bright,
}

impl BrightnessBucket {
    /// Bucket for a mean luma in 0..=255
    pub fn from_luma(luma: f64) -> Self {
        if luma < 50.0 {
            BrightnessBucket::Dark
        } else if luma < 100.0 {
            BrightnessBucket::Dim
        } else if luma < 170.0 {
            BrightnessBucket::Moderate
        } else {
            BrightnessBucket::Bright
        }
    }

    fn describe(&self) -> &'static str {
        match self {
            BrightnessBucket::Dark => "very dark, with little visible light",
            BrightnessBucket::Dim => "dimly lit",
            BrightnessBucket::Moderate => "evenly lit",
            BrightnessBucket::Bright => "brightly lit",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    Simple,
    Moderate,
    Complex,
}

impl Complexity {
    /// Bucket for the number of populated color bins (out of 64)
    pub fn from_variety(bins: usize) -> Self {
        match bins {
            0..=7 => Complexity::Simple,
            8..=23 => Complexity::Moderate,
            _ => Complexity::Complex,
        }
    }

    fn describe(&self) -> &'static str {
        match self {
            Complexity::Simple => "The composition is simple, dominated by a few uniform areas.",
            Complexity::Moderate => "The scene shows a moderate amount of detail.",
            Complexity::Complex => "The scene is visually busy, with many distinct colors and details.",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Orientation {
    Landscape,
    Portrait,
    Square,
}

impl Orientation {
    pub fn from_dimensions(width: u32, height: u32) -> Self {
        if height == 0 {
            return Orientation::Square;
        }
        let ratio = width as f64 / height as f64;
        if ratio > 1.2 {
            Orientation::Landscape
        } else if ratio < 0.83 {
            Orientation::Portrait
        } else {
            Orientation::Square
        }
    }
}

impl fmt::Display for Orientation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Orientation::Landscape => "landscape",
            Orientation::Portrait => "portrait",
            Orientation::Square => "square",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColorName {
    Black,
    White,
    Gray,
    Red,
    Orange,
    Yellow,
    Green,
    Cyan,
    Blue,
    Purple,
    Pink,
    Brown,
}

impl ColorName {
    /// Coarse hue/saturation/value classification
    pub fn classify(r: u8, g: u8, b: u8) -> Self {
        let (r, g, b) = (r as f64 / 255.0, g as f64 / 255.0, b as f64 / 255.0);
        let max = r.max(g).max(b);
        let min = r.min(g).min(b);
        let delta = max - min;
        let value = max;
        let saturation = if max > 0.0 { delta / max } else { 0.0 };

        if value < 0.18 {
            return ColorName::Black;
        }
        if saturation < 0.18 {
            return if value > 0.85 {
                ColorName::White
            } else {
                ColorName::Gray
            };
        }

        let hue = if delta == 0.0 {
            0.0
        } else if max == r {
            60.0 * (((g - b) / delta).rem_euclid(6.0))
        } else if max == g {
            60.0 * ((b - r) / delta + 2.0)
        } else {
            60.0 * ((r - g) / delta + 4.0)
        };

        match hue {
            h if !(15.0..345.0).contains(&h) => {
                if value < 0.6 && saturation > 0.4 {
                    ColorName::Brown
                } else {
                    ColorName::Red
                }
            }
            h if h < 45.0 => {
                if value < 0.6 {
                    ColorName::Brown
                } else {
                    ColorName::Orange
                }
            }
            h if h < 70.0 => ColorName::Yellow,
            h if h < 165.0 => ColorName::Green,
            h if h < 195.0 => ColorName::Cyan,
            h if h < 260.0 => ColorName::Blue,
            h if h < 300.0 => ColorName::Purple,
            _ => ColorName::Pink,
        }
    }
}

impl fmt::Display for ColorName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ColorName::Black => "black",
            ColorName::White => "white",
            ColorName::Gray => "gray",
            ColorName::Red => "red",
            ColorName::Orange => "orange",
            ColorName::Yellow => "yellow",
            ColorName::Green => "green",
            ColorName::Cyan => "cyan",
            ColorName::Blue => "blue",
            ColorName::Purple => "purple",
            ColorName::Pink => "pink",
            ColorName::Brown => "brown",
        };
        write!(f, "{}", s)
    }
}

/// Bucketed statistics of one frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PixelStats {
    pub width: u32,
    pub height: u32,
    /// Mean luma, 0..=255
    pub mean_luma: f64,
    pub brightness: BrightnessBucket,
    /// Most frequent first, at most three
    pub dominant_colors: Vec<ColorName>,
    /// Populated 4x4x4 color bins
    pub color_variety: usize,
    pub complexity: Complexity,
    pub orientation: Orientation,
}

impl PixelStats {
    /// Compute statistics over a strided sample of the frame
    pub fn from_rgba(frame: &RgbaImage) -> Self {
        let (width, height) = frame.dimensions();
        let total = width as u64 * height as u64;
        let stride = ((total / MAX_SAMPLES) as usize).max(1);

        let mut luma_sum = 0.0;
        let mut samples = 0u64;
        let mut colors: HashMap<ColorName, u64> = HashMap::new();
        let mut bins = [0u64; 64];

        for pixel in frame.pixels().step_by(stride) {
            let [r, g, b, _] = pixel.0;
            luma_sum += 0.299 * r as f64 + 0.587 * g as f64 + 0.114 * b as f64;
            *colors.entry(ColorName::classify(r, g, b)).or_insert(0) += 1;
            let bin = ((r >> 6) as usize) << 4 | ((g >> 6) as usize) << 2 | (b >> 6) as usize;
            bins[bin] += 1;
            samples += 1;
        }

        let mean_luma = if samples > 0 {
            luma_sum / samples as f64
        } else {
            0.0
        };

        let min_count = (samples as f64 * VARIETY_MIN_SHARE).max(1.0);
        let color_variety = bins.iter().filter(|c| **c as f64 >= min_count).count();

        let mut ranked: Vec<(ColorName, u64)> = colors.into_iter().collect();
        // Ties broken by color order so the ranking is stable
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        let dominant_colors = ranked.into_iter().take(3).map(|(c, _)| c).collect();

        Self {
            width,
            height,
            mean_luma,
            brightness: BrightnessBucket::from_luma(mean_luma),
            dominant_colors,
            color_variety,
            complexity: Complexity::from_variety(color_variety),
            orientation: Orientation::from_dimensions(width, height),
        }
    }

    /// Key of the bucketed statistics, stable across builds and toolchains
    fn template_key(&self) -> u64 {
        let mut bytes = vec![
            self.brightness as u8,
            self.complexity as u8,
            self.orientation as u8,
        ];
        bytes.extend(self.dominant_colors.iter().map(|c| *c as u8));
        fnv1a(&bytes)
    }

    fn color_phrase(&self) -> String {
        match self.dominant_colors.as_slice() {
            [] => "neutral".to_string(),
            [only] => only.to_string(),
            [first, second, ..] => format!("{} and {}", first, second),
        }
    }
}

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// 64-bit FNV-1a
fn fnv1a(bytes: &[u8]) -> u64 {
    bytes.iter().fold(FNV_OFFSET_BASIS, |hash, b| {
        (hash ^ u64::from(*b)).wrapping_mul(FNV_PRIME)
    })
}

const DARK_TEMPLATES: &[&str] = &[
    "A dark scene with faint {colors} tones.",
    "A low-light view where {colors} shapes are barely visible.",
    "A shadowy {orientation} frame with hints of {colors}.",
];

const DIM_TEMPLATES: &[&str] = &[
    "A dimly lit scene dominated by {colors}.",
    "An indoor-looking view in soft light with {colors} tones.",
    "A muted {orientation} frame showing {colors} areas.",
];

const MODERATE_TEMPLATES: &[&str] = &[
    "A scene with {colors} as the main colors.",
    "An evenly lit view featuring {colors} elements.",
    "A {orientation} frame with a balanced mix of {colors}.",
];

const BRIGHT_TEMPLATES: &[&str] = &[
    "A bright scene filled with {colors}.",
    "A well-lit, possibly outdoor view with vivid {colors} tones.",
    "A sunny {orientation} frame dominated by {colors}.",
];

/// Caption templates for a brightness bucket
pub fn caption_family(bucket: BrightnessBucket) -> &'static [&'static str] {
    match bucket {
        BrightnessBucket::Dark => DARK_TEMPLATES,
        BrightnessBucket::Dim => DIM_TEMPLATES,
        BrightnessBucket::Moderate => MODERATE_TEMPLATES,
        BrightnessBucket::Bright => BRIGHT_TEMPLATES,
    }
}

/// Substitute the statistics into a template
pub fn fill_template(template: &str, stats: &PixelStats) -> String {
    template
        .replace("{colors}", &stats.color_phrase())
        .replace("{orientation}", &stats.orientation.to_string())
}

/// Caption and reasoning for a frame
#[derive(Debug, Clone, PartialEq)]
pub struct SceneDescription {
    pub caption: String,
    pub reasoning: String,
}

pub fn describe(stats: &PixelStats) -> SceneDescription {
    let family = caption_family(stats.brightness);
    let template = family[(stats.template_key() % family.len() as u64) as usize];
    let caption = fill_template(template, stats);

    let colors = if stats.dominant_colors.is_empty() {
        "no dominant color".to_string()
    } else {
        stats
            .dominant_colors
            .iter()
            .map(|c| c.to_string())
            .collect::<Vec<_>>()
            .join(", ")
    };

    let reasoning = format!(
        "The frame is {} (average brightness {:.0}/255). Dominant colors: {}. {} \
         The {}x{} image has a {} orientation.",
        stats.brightness.describe(),
        stats.mean_luma,
        colors,
        stats.complexity.describe(),
        stats.width,
        stats.height,
        stats.orientation,
    );

    SceneDescription { caption, reasoning }
}

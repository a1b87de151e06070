use std::collections::BTreeMap;

use serde::Serialize;
use tracing::{debug, info};

use crate::pipeline::error::StudioError;

const MAX_PALETTE_COLORS: usize = 5;
const MIN_PALETTE_COLORS: usize = 3;
const SAMPLE_EDGE: u32 = 64;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PaletteColor {
    pub hex: String,
    pub rgb: [u8; 3],
    pub weight: f32,
}

/// Ordered brand colors, dominant first. Always 3 to 5 entries whose weights
/// sum to 1.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Palette {
    colors: Vec<PaletteColor>,
}

pub fn to_hex(rgb: [u8; 3]) -> String {
    format!("#{:02x}{:02x}{:02x}", rgb[0], rgb[1], rgb[2])
}

pub fn parse_hex(value: &str) -> Option<[u8; 3]> {
    let digits = value.trim().trim_start_matches('#');
    if digits.len() != 6 || !digits.is_ascii() {
        return None;
    }
    let channel = |range: std::ops::Range<usize>| u8::from_str_radix(&digits[range], 16).ok();
    Some([channel(0..2)?, channel(2..4)?, channel(4..6)?])
}

fn mix(rgb: [u8; 3], target: u8, amount: f32) -> [u8; 3] {
    let blend = |channel: u8| {
        let value = channel as f32 + (target as f32 - channel as f32) * amount;
        value.round().clamp(0.0, 255.0) as u8
    };
    [blend(rgb[0]), blend(rgb[1]), blend(rgb[2])]
}

impl Palette {
    pub fn default_neutral() -> Self {
        Self {
            colors: [("#667eea", 0.5), ("#764ba2", 0.3), ("#f093fb", 0.2)]
                .into_iter()
                .filter_map(|(hex, weight)| {
                    parse_hex(hex).map(|rgb| PaletteColor {
                        hex: hex.to_string(),
                        rgb,
                        weight,
                    })
                })
                .collect(),
        }
    }

    /// Builds a palette from weighted colors in dominance order. Duplicates
    /// and non-positive weights are dropped; short palettes are padded with
    /// tints and shades of the dominant color. Returns `None` when nothing
    /// usable remains.
    pub fn from_weighted(colors: Vec<([u8; 3], f32)>) -> Option<Self> {
        let mut picked: Vec<([u8; 3], f32)> = Vec::new();
        for (rgb, weight) in colors {
            if !(weight > 0.0) || picked.iter().any(|(seen, _)| *seen == rgb) {
                continue;
            }
            picked.push((rgb, weight));
            if picked.len() == MAX_PALETTE_COLORS {
                break;
            }
        }
        let (primary, _) = *picked.first()?;

        let smallest = picked
            .iter()
            .map(|(_, weight)| *weight)
            .fold(f32::INFINITY, f32::min);
        let derived = [
            mix(primary, 255, 0.45),
            mix(primary, 0, 0.45),
            mix(primary, 255, 0.75),
            mix(primary, 0, 0.75),
        ];
        for rgb in derived {
            if picked.len() >= MIN_PALETTE_COLORS {
                break;
            }
            if picked.iter().all(|(seen, _)| *seen != rgb) {
                picked.push((rgb, smallest / 2.0));
            }
        }
        if picked.len() < MIN_PALETTE_COLORS {
            return None;
        }

        let total: f32 = picked.iter().map(|(_, weight)| *weight).sum();
        Some(Self {
            colors: picked
                .into_iter()
                .map(|(rgb, weight)| PaletteColor {
                    hex: to_hex(rgb),
                    rgb,
                    weight: weight / total,
                })
                .collect(),
        })
    }

    pub fn colors(&self) -> &[PaletteColor] {
        &self.colors
    }

    pub fn primary(&self) -> &PaletteColor {
        &self.colors[0]
    }

    /// Accent colors rotate through every non-primary entry.
    pub fn accent(&self, index: usize) -> &PaletteColor {
        let accents = &self.colors[1..];
        &accents[index % accents.len()]
    }

    pub fn is_dark(&self) -> bool {
        let [r, g, b] = self.primary().rgb;
        let luminance = 0.299 * r as f32 + 0.587 * g as f32 + 0.114 * b as f32;
        luminance < 128.0
    }

    pub fn aesthetic_hint(&self) -> &'static str {
        if self.is_dark() {
            "sophisticated, premium aesthetic with rich deep tones"
        } else {
            "bright, vibrant aesthetic with fresh energetic tones"
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PaletteSource {
    Logo,
    ProductImage,
    Default,
}

/// A brand image supplied by reference (file path or URL).
#[derive(Debug, Clone, Serialize)]
pub struct BrandAsset {
    pub reference: String,
    pub mime_type: String,
    #[serde(skip)]
    pub bytes: Vec<u8>,
}

/// Extracts an ordered palette from a brand image; `None` means unavailable.
pub trait PaletteExtractor: Send + Sync {
    fn extract(&self, asset: &BrandAsset) -> Option<Palette>;
}

/// Quantizes a downscaled copy of the image into a color histogram.
#[derive(Debug, Clone, Copy, Default)]
pub struct HistogramPaletteExtractor;

impl HistogramPaletteExtractor {
    fn quantize(channel: u8) -> u8 {
        (channel & 0xe0) | 0x10
    }
}

impl PaletteExtractor for HistogramPaletteExtractor {
    fn extract(&self, asset: &BrandAsset) -> Option<Palette> {
        let decoded = match image::load_from_memory(&asset.bytes) {
            Ok(decoded) => decoded,
            Err(err) => {
                debug!("Palette extraction skipped for {}: {}", asset.reference, err);
                return None;
            }
        };
        let sample = if decoded.width() > SAMPLE_EDGE || decoded.height() > SAMPLE_EDGE {
            decoded.thumbnail(SAMPLE_EDGE, SAMPLE_EDGE).to_rgba8()
        } else {
            decoded.to_rgba8()
        };

        let mut histogram: BTreeMap<[u8; 3], u32> = BTreeMap::new();
        for pixel in sample.pixels() {
            let [r, g, b, a] = pixel.0;
            if a < 128 {
                continue;
            }
            // Logo backgrounds are almost always white.
            if r > 240 && g > 240 && b > 240 {
                continue;
            }
            let bucket = [Self::quantize(r), Self::quantize(g), Self::quantize(b)];
            *histogram.entry(bucket).or_default() += 1;
        }

        let mut ranked: Vec<([u8; 3], u32)> = histogram.into_iter().collect();
        ranked.sort_by(|left, right| right.1.cmp(&left.1).then(left.0.cmp(&right.0)));
        Palette::from_weighted(
            ranked
                .into_iter()
                .map(|(rgb, count)| (rgb, count as f32))
                .collect(),
        )
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BrandProfile {
    pub name: String,
    pub category: String,
    pub description: Option<String>,
    pub palette: Palette,
    pub palette_source: PaletteSource,
    pub logo: Option<BrandAsset>,
    pub product: Option<BrandAsset>,
}

impl BrandProfile {
    pub fn build(
        name: &str,
        category: &str,
        description: Option<&str>,
        logo: Option<BrandAsset>,
        product: Option<BrandAsset>,
        extractor: &dyn PaletteExtractor,
    ) -> Result<Self, StudioError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(StudioError::invalid("brand name is required"));
        }
        let category = category.trim();
        if category.is_empty() {
            return Err(StudioError::invalid("product category is required"));
        }

        let from_logo = logo
            .as_ref()
            .and_then(|asset| extractor.extract(asset))
            .map(|palette| (palette, PaletteSource::Logo));
        let from_product = || {
            product
                .as_ref()
                .and_then(|asset| extractor.extract(asset))
                .map(|palette| (palette, PaletteSource::ProductImage))
        };
        let (palette, palette_source) = from_logo
            .or_else(from_product)
            .unwrap_or_else(|| (Palette::default_neutral(), PaletteSource::Default));
        info!(
            "Brand palette for {} from {:?}: {}",
            name,
            palette_source,
            palette
                .colors()
                .iter()
                .map(|color| color.hex.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        );

        Ok(Self {
            name: name.to_string(),
            category: category.to_string(),
            description: description
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(str::to_string),
            palette,
            palette_source,
            logo,
            product,
        })
    }

    pub fn category_style(&self) -> &'static str {
        let category = self.category.to_lowercase();
        let has = |needles: &[&str]| needles.iter().any(|needle| category.contains(needle));
        if has(&["beverage", "drink", "coffee", "tea", "juice"]) {
            "refreshing, lifestyle photography with condensation and natural light"
        } else if has(&["skincare", "beauty", "cosmetic"]) {
            "clean, minimalist beauty photography with soft lighting and premium feel"
        } else if has(&["food", "snack", "restaurant"]) {
            "appetizing food photography with vibrant colors and fresh ingredients"
        } else if has(&["tech", "electronic", "gadget", "software"]) {
            "sleek, modern tech aesthetic with clean lines and futuristic elements"
        } else if has(&["fashion", "apparel", "clothing"]) {
            "stylish fashion photography with dynamic poses and trendy settings"
        } else if has(&["fitness", "sport", "gym"]) {
            "energetic, motivational imagery with dynamic movement"
        } else if has(&["home", "furniture", "decor"]) {
            "warm, inviting interior scenes with natural textures"
        } else if has(&["auto", "car", "vehicle"]) {
            "bold automotive photography with dramatic angles and motion"
        } else {
            "professional commercial photography with modern aesthetic"
        }
    }
}

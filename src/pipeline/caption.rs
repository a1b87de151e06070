use once_cell::sync::Lazy;
use regex::Regex;

use crate::llm::types::{FailureKind, GenerationError};
use crate::pipeline::prompt::{PromptSpec, ToneVariant};

static BANNED_WORDS: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"(?i)\b(hate|hateful|violence|violent|offensive)\b").ok());

const WRAPPING_QUOTES: &[char] = &['"', '\'', '“', '”', '‘', '’', '`'];

/// Strips model formatting: wrapping quotes, markdown emphasis, a leading
/// `Caption:` label and line breaks.
pub fn clean_caption(raw: &str) -> String {
    let mut caption = raw.trim().trim_matches(WRAPPING_QUOTES).trim().to_string();
    caption = caption.replace("**", "").replace('*', "");
    if caption
        .get(..8)
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case("caption:"))
    {
        caption = caption[8..].trim().to_string();
    }
    caption = caption.trim_matches(WRAPPING_QUOTES).to_string();
    caption.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub fn truncate_caption(caption: &str, max_length: usize) -> String {
    if caption.chars().count() <= max_length {
        return caption.to_string();
    }
    let keep = max_length.saturating_sub(3);
    let truncated: String = caption.chars().take(keep).collect();
    format!("{}...", truncated.trim_end())
}

#[derive(Debug, Clone, Copy)]
pub struct CaptionRules {
    pub min_length: usize,
    pub max_length: usize,
}

impl CaptionRules {
    /// Cleans, truncates and checks a generated caption. A caption that fails
    /// the checks is a `QualityRejected` failure.
    pub fn finalize(&self, raw: &str) -> Result<String, GenerationError> {
        let caption = truncate_caption(&clean_caption(raw), self.max_length);
        let length = caption.chars().count();
        if length < self.min_length {
            return Err(GenerationError::new(
                FailureKind::QualityRejected,
                format!("caption too short ({} chars)", length),
            ));
        }
        if let Some(found) = BANNED_WORDS.as_ref().and_then(|re| re.find(&caption)) {
            return Err(GenerationError::new(
                FailureKind::QualityRejected,
                format!("caption contains unsafe term '{}'", found.as_str()),
            ));
        }
        Ok(caption)
    }

    /// Template caption for a spec whose generation failed. Same spec, same
    /// text.
    pub fn fallback(&self, spec: &PromptSpec) -> String {
        let brand = &spec.brand_name;
        let category = &spec.category;
        let city = &spec.scene.city;
        let theme = &spec.theme.label;
        let cta = spec.cta.phrase();
        let templates = match spec.tone.variant {
            ToneVariant::Direct => [
                format!("✨ {brand}: the {category} made for {city}'s {theme}. {cta}"),
                format!("🎯 {brand} brings you the perfect {category} for {theme} in {city}. {cta}"),
            ],
            ToneVariant::Playful => [
                format!("⚡ {theme} in {city} just got better with {brand}! {cta} 🚀"),
                format!("🎨 Who says {theme} can't be fun? {brand} is here in {city}! {cta}"),
            ],
            ToneVariant::Warm => [
                format!("💫 Make {theme} in {city} feel like home with {brand}. {cta}"),
                format!("🌟 {brand} is your perfect companion for {city}'s {theme}. {cta}"),
            ],
            ToneVariant::Aspirational => [
                format!("💎 Elevate your {theme} with {brand}. Made for {city}, made for you. {cta}"),
                format!("🌈 Discover the {brand} difference, crafted for {city}'s {theme}. {cta}"),
            ],
        };
        let chosen = &templates[(spec.id.saturating_sub(1)) % templates.len()];
        truncate_caption(chosen, self.max_length)
    }
}

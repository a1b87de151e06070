use std::collections::HashSet;

use serde::Serialize;

use crate::pipeline::brand::BrandProfile;
use crate::pipeline::context::Context;
use crate::pipeline::error::StudioError;
use crate::pipeline::types::{Season, TimeOfDay, WeatherCondition};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ThemeKind {
    TimeOfDay,
    Weather,
    Festival,
    PointOfInterest,
    LocalCulture,
    Weekend,
    Lifestyle,
    Premium,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ThemeTag {
    pub kind: ThemeKind,
    pub label: String,
    pub mood: String,
}

impl ThemeTag {
    fn new(kind: ThemeKind, label: impl Into<String>, mood: impl Into<String>) -> Self {
        Self {
            kind,
            label: label.into(),
            mood: mood.into(),
        }
    }

    /// Themes available for one context, in a fixed order.
    pub fn derive(context: &Context) -> Vec<ThemeTag> {
        let mut themes = vec![match context.time_of_day {
            TimeOfDay::Morning => ThemeTag::new(
                ThemeKind::TimeOfDay,
                "morning energy",
                "energetic, fresh start, morning routine",
            ),
            TimeOfDay::Afternoon => ThemeTag::new(
                ThemeKind::TimeOfDay,
                "afternoon relaxation",
                "relaxed, leisure time, comfort",
            ),
            TimeOfDay::Evening => ThemeTag::new(
                ThemeKind::TimeOfDay,
                "evening social",
                "social, gathering, celebration",
            ),
            TimeOfDay::Night => ThemeTag::new(
                ThemeKind::TimeOfDay,
                "late-night unwind",
                "cozy, intimate, night owls",
            ),
        }];
        themes.push(ThemeTag::new(
            ThemeKind::Weather,
            format!("{} weather", context.weather_description),
            format!("weather-aware, {}", context.weather_description),
        ));
        for festival in &context.cultural_tags {
            themes.push(ThemeTag::new(
                ThemeKind::Festival,
                format!("{} celebration", festival),
                "festive, joyful, celebration",
            ));
        }
        for poi in context.poi_tags.iter().take(2) {
            themes.push(ThemeTag::new(
                ThemeKind::PointOfInterest,
                format!("{} {}", context.location.city, poi),
                "location-specific, local hotspots",
            ));
        }
        themes.push(ThemeTag::new(
            ThemeKind::LocalCulture,
            "local culture",
            format!("cultural, local pride, {}", context.culture),
        ));
        themes.push(ThemeTag::new(
            ThemeKind::Weekend,
            "weekend vibes",
            "fun, adventure, exploration",
        ));
        themes.push(ThemeTag::new(
            ThemeKind::Lifestyle,
            "lifestyle",
            "lifestyle-focused, aspirational",
        ));
        themes.push(ThemeTag::new(
            ThemeKind::Premium,
            "premium experience",
            "premium, aspirational, elevated",
        ));

        let mut seen = Vec::new();
        themes.retain(|theme| {
            let key = theme.label.to_lowercase();
            if seen.contains(&key) {
                false
            } else {
                seen.push(key);
                true
            }
        });
        themes
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Corner {
    TopLeft,
    TopRight,
    BottomLeft,
    BottomRight,
}

impl Corner {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::TopLeft => "top-left",
            Self::TopRight => "top-right",
            Self::BottomLeft => "bottom-left",
            Self::BottomRight => "bottom-right",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LayoutDirective {
    HeroCenter,
    RuleOfThirds,
    SplitScreen,
    FlatLay,
    LifestyleScene,
    MinimalNegativeSpace,
}

impl LayoutDirective {
    pub const ALL: [LayoutDirective; 6] = [
        Self::HeroCenter,
        Self::RuleOfThirds,
        Self::SplitScreen,
        Self::FlatLay,
        Self::LifestyleScene,
        Self::MinimalNegativeSpace,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::HeroCenter => "hero_center",
            Self::RuleOfThirds => "rule_of_thirds",
            Self::SplitScreen => "split_screen",
            Self::FlatLay => "flat_lay",
            Self::LifestyleScene => "lifestyle_scene",
            Self::MinimalNegativeSpace => "minimal_negative_space",
        }
    }

    pub const fn composition(self) -> &'static str {
        match self {
            Self::HeroCenter => "the product is the main hero in the center",
            Self::RuleOfThirds => "the product sits on the left third with the scene opening to the right",
            Self::SplitScreen => "a split composition with the product on one half and the setting on the other",
            Self::FlatLay => "a top-down flat lay of the product with styled props",
            Self::LifestyleScene => "people enjoying the product naturally within the scene",
            Self::MinimalNegativeSpace => "a minimal composition with generous negative space around the product",
        }
    }

    /// Where the brand logo is placed for this composition.
    pub const fn logo_corner(self) -> Corner {
        match self {
            Self::HeroCenter | Self::FlatLay => Corner::TopRight,
            Self::RuleOfThirds | Self::MinimalNegativeSpace => Corner::BottomRight,
            Self::SplitScreen => Corner::TopLeft,
            Self::LifestyleScene => Corner::BottomLeft,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ToneVariant {
    Direct,
    Playful,
    Warm,
    Aspirational,
}

impl ToneVariant {
    pub const ALL: [ToneVariant; 4] = [Self::Direct, Self::Playful, Self::Warm, Self::Aspirational];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::Playful => "playful",
            Self::Warm => "warm",
            Self::Aspirational => "aspirational",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct CaptionTone {
    pub base: String,
    pub variant: ToneVariant,
}

impl CaptionTone {
    pub fn describe(&self) -> String {
        format!("{}, {}", self.base, self.variant.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeFraming {
    Sunrise,
    Midday,
    GoldenHour,
    AfterDark,
}

impl TimeFraming {
    const ALL: [TimeFraming; 4] = [Self::Sunrise, Self::Midday, Self::GoldenHour, Self::AfterDark];

    pub fn for_time_of_day(time_of_day: TimeOfDay) -> Self {
        match time_of_day {
            TimeOfDay::Morning => Self::Sunrise,
            TimeOfDay::Afternoon => Self::Midday,
            TimeOfDay::Evening => Self::GoldenHour,
            TimeOfDay::Night => Self::AfterDark,
        }
    }

    fn rotate(self, steps: usize) -> Self {
        let index = Self::ALL.iter().position(|value| *value == self).unwrap_or(0);
        Self::ALL[(index + steps) % Self::ALL.len()]
    }

    pub const fn phrase(self) -> &'static str {
        match self {
            Self::Sunrise => "soft early-morning light",
            Self::Midday => "bright midday light",
            Self::GoldenHour => "warm golden-hour light",
            Self::AfterDark => "a night-time glow",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CtaStyle {
    ShopNow,
    TryToday,
    DiscoverMore,
    LimitedTime,
    VisitNearby,
}

impl CtaStyle {
    const ALL: [CtaStyle; 5] = [
        Self::ShopNow,
        Self::TryToday,
        Self::DiscoverMore,
        Self::LimitedTime,
        Self::VisitNearby,
    ];

    /// Never lands on `self` for `steps >= 1`.
    fn rotate_away(self, steps: usize) -> Self {
        let index = Self::ALL.iter().position(|value| *value == self).unwrap_or(0);
        let offset = (steps.max(1) - 1) % (Self::ALL.len() - 1) + 1;
        Self::ALL[(index + offset) % Self::ALL.len()]
    }

    pub const fn phrase(self) -> &'static str {
        match self {
            Self::ShopNow => "Shop now!",
            Self::TryToday => "Try it today!",
            Self::DiscoverMore => "Discover more.",
            Self::LimitedTime => "Don't miss out!",
            Self::VisitNearby => "Find it near you!",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PaletteConstraint {
    pub primary: String,
    pub accent: String,
}

/// The slice of [`Context`] a single creative draws on.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SceneContext {
    pub city: String,
    pub weather: WeatherCondition,
    pub weather_summary: String,
    pub season: Season,
    pub time_of_day: TimeOfDay,
    pub local_vibe: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Rationale {
    pub palette: String,
    pub context: String,
    pub layout: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PromptSpec {
    pub id: usize,
    pub theme: ThemeTag,
    pub layout: LayoutDirective,
    pub tone: CaptionTone,
    pub time_framing: TimeFraming,
    pub cta: CtaStyle,
    pub scene: SceneContext,
    pub palette: PaletteConstraint,
    pub brand_name: String,
    pub category: String,
    pub category_style: String,
    pub aesthetic_hint: String,
    pub repeated: bool,
    pub parent_id: Option<usize>,
}

impl PromptSpec {
    /// Fills the rationale once the sub-results are known.
    pub fn rationale(&self, image_generated: bool, caption_generated: bool) -> Rationale {
        let image_note = if image_generated {
            "generated image"
        } else {
            "placeholder artwork"
        };
        let caption_note = if caption_generated {
            "a generated caption"
        } else {
            "a template caption"
        };
        let mut context = format!(
            "Theme '{}' ({}) fits {} during {}: {}",
            self.theme.label,
            self.theme.mood,
            self.scene.city,
            self.scene.season.as_str(),
            self.scene.weather_summary
        );
        if let Some(parent) = self.parent_id {
            context.push_str(&format!(
                " Varies creative {} with {} and a '{}' call to action.",
                parent,
                self.time_framing.phrase(),
                self.cta.phrase()
            ));
        }
        Rationale {
            palette: format!(
                "Primary {} anchors the {} with {} as the accent; {}.",
                self.palette.primary, image_note, self.palette.accent, self.aesthetic_hint
            ),
            context,
            layout: format!(
                "{} keeps the logo {} and pairs with {} in a {} tone.",
                self.layout.composition(),
                self.layout.logo_corner().as_str(),
                caption_note,
                self.tone.describe()
            ),
        }
    }
}

pub fn render_image_prompt(spec: &PromptSpec) -> String {
    let weather_touch = match spec.scene.weather {
        WeatherCondition::Rain => Some("cozy feel"),
        WeatherCondition::Clear => Some("bright feel"),
        WeatherCondition::Clouds | WeatherCondition::HumidOvercast => Some("soft light"),
        WeatherCondition::Snow => Some("crisp wintry feel"),
        WeatherCondition::Fog => Some("hazy atmosphere"),
        WeatherCondition::Neutral => None,
    };

    let mut parts = vec![
        format!(
            "Clean marketing poster for {} {} in {}",
            spec.brand_name, spec.category, spec.scene.city
        ),
        spec.layout.composition().to_string(),
        format!("inspired by {}", spec.theme.label),
        format!("with a {} feel", spec.theme.mood),
        format!("lit by {}", spec.time_framing.phrase()),
        format!(
            "using {} as the main brand color with {} accents",
            spec.palette.primary, spec.palette.accent
        ),
        spec.category_style.clone(),
        spec.aesthetic_hint.clone(),
    ];
    if let Some(touch) = weather_touch {
        parts.push(touch.to_string());
    }
    format!(
        "{}. Leave clear space in the {} corner for the logo. High quality, clear composition, easy-to-read poster design",
        parts.join(", "),
        spec.layout.logo_corner().as_str()
    )
}

pub const CAPTION_SYSTEM_PROMPT: &str =
    "You write short, brand-safe advertising captions. Reply with the caption text only.";

pub fn render_caption_prompt(spec: &PromptSpec, max_length: usize) -> String {
    format!(
        "Create a compelling advertisement caption for {brand} {category}.\n\n\
Context:\n\
- Location: {city}\n\
- Weather: {weather}\n\
- Theme: {theme}\n\
- Mood: {mood}\n\
- Local vibe: {vibe}\n\
- Tone: {tone}\n\n\
Requirements:\n\
1. Maximum {max_length} characters\n\
2. End with a call-to-action in the spirit of \"{cta}\"\n\
3. Be contextually relevant to the location and weather\n\
4. Use a {tone} tone\n\
5. Include relevant emojis (2-3 maximum)\n\
6. No hashtags\n\
7. Brand-safe and positive messaging\n\
8. Avoid making false claims\n\n\
Generate only the caption text, nothing else.",
        brand = spec.brand_name,
        category = spec.category,
        city = spec.scene.city,
        weather = spec.scene.weather_summary,
        theme = spec.theme.label,
        mood = spec.theme.mood,
        vibe = spec.scene.local_vibe,
        tone = spec.tone.describe(),
        max_length = max_length,
        cta = spec.cta.phrase(),
    )
}

#[derive(Debug, Clone)]
pub struct PromptBuilder {
    max_creatives: usize,
    layouts: Vec<LayoutDirective>,
}

struct Candidate {
    theme: usize,
    layout: usize,
    tone: usize,
}

impl PromptBuilder {
    pub fn new(max_creatives: usize) -> Self {
        Self {
            max_creatives,
            layouts: LayoutDirective::ALL.to_vec(),
        }
    }

    /// Restricts the layout set; an empty list keeps every layout.
    pub fn with_layouts(mut self, layouts: Vec<LayoutDirective>) -> Self {
        if !layouts.is_empty() {
            self.layouts = layouts;
        }
        self
    }

    pub fn distinct_pairs(&self, context: &Context) -> usize {
        ThemeTag::derive(context).len() * self.layouts.len()
    }

    pub fn expand(
        &self,
        context: &Context,
        brand: &BrandProfile,
        n: usize,
        caption_tone: &str,
    ) -> Result<Vec<PromptSpec>, StudioError> {
        if n > self.max_creatives {
            return Err(StudioError::invalid(format!(
                "requested {} creatives; the maximum is {}",
                n, self.max_creatives
            )));
        }
        if n == 0 {
            return Ok(Vec::new());
        }

        let themes = ThemeTag::derive(context);
        let base_tone = match caption_tone.trim() {
            "" => "engaging".to_string(),
            tone => tone.to_lowercase(),
        };
        let picks = self.select(themes.len(), n);
        let scene = SceneContext {
            city: context.location.city.clone(),
            weather: context.weather,
            weather_summary: context.weather_summary(),
            season: context.season,
            time_of_day: context.time_of_day,
            local_vibe: context.local_vibe.clone(),
        };
        let base_framing = TimeFraming::for_time_of_day(context.time_of_day);

        let mut specs: Vec<PromptSpec> = Vec::with_capacity(n);
        for (index, candidate) in picks.iter().enumerate() {
            let id = index + 1;
            let palette = PaletteConstraint {
                primary: brand.palette.primary().hex.clone(),
                accent: brand.palette.accent(index).hex.clone(),
            };
            specs.push(PromptSpec {
                id,
                theme: themes[candidate.theme].clone(),
                layout: self.layouts[candidate.layout],
                tone: CaptionTone {
                    base: base_tone.clone(),
                    variant: ToneVariant::ALL[candidate.tone],
                },
                time_framing: base_framing,
                cta: CtaStyle::ALL[index % CtaStyle::ALL.len()],
                scene: scene.clone(),
                palette,
                brand_name: brand.name.clone(),
                category: brand.category.clone(),
                category_style: brand.category_style().to_string(),
                aesthetic_hint: brand.palette.aesthetic_hint().to_string(),
                repeated: false,
                parent_id: None,
            });
        }

        let distinct = specs.len();
        for index in distinct..n {
            let round = index / distinct;
            let parent = specs[index % distinct].clone();
            specs.push(PromptSpec {
                id: index + 1,
                time_framing: parent.time_framing.rotate(round),
                cta: parent.cta.rotate_away(round),
                palette: PaletteConstraint {
                    primary: parent.palette.primary.clone(),
                    accent: brand.palette.accent(index).hex.clone(),
                },
                repeated: true,
                parent_id: Some(parent.id),
                ..parent
            });
        }
        Ok(specs)
    }

    /// Greedy pick over unused (theme, layout) pairs. Reusing a theme costs
    /// more than reusing a layout, which costs more than reusing a tone; ties
    /// go to enumeration order.
    fn select(&self, theme_count: usize, n: usize) -> Vec<Candidate> {
        let pair_count = theme_count * self.layouts.len();
        let target = n.min(pair_count);
        let mut theme_uses = vec![0usize; theme_count];
        let mut layout_uses = vec![0usize; self.layouts.len()];
        let mut tone_uses = vec![0usize; ToneVariant::ALL.len()];
        let mut used_pairs: HashSet<(usize, usize)> = HashSet::new();
        let mut picks = Vec::with_capacity(target);

        while picks.len() < target {
            let mut best: Option<(usize, Candidate)> = None;
            for theme in 0..theme_count {
                for layout in 0..self.layouts.len() {
                    if used_pairs.contains(&(theme, layout)) {
                        continue;
                    }
                    for tone in 0..ToneVariant::ALL.len() {
                        let penalty =
                            theme_uses[theme] * 4 + layout_uses[layout] * 2 + tone_uses[tone];
                        if best.as_ref().map_or(true, |(score, _)| penalty < *score) {
                            best = Some((penalty, Candidate { theme, layout, tone }));
                        }
                    }
                }
            }
            let Some((_, candidate)) = best else {
                break;
            };
            theme_uses[candidate.theme] += 1;
            layout_uses[candidate.layout] += 1;
            tone_uses[candidate.tone] += 1;
            used_pairs.insert((candidate.theme, candidate.layout));
            picks.push(candidate);
        }
        picks
    }
}

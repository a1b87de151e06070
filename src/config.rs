use std::env;
use std::path::PathBuf;
use std::time::Duration;

use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageProvider {
    Gemini,
    OpenAi,
}

impl ImageProvider {
    fn from_str(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "gemini" => Some(Self::Gemini),
            "openai" | "dalle" | "dall-e" => Some(Self::OpenAi),
            _ => None,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Gemini => "gemini",
            Self::OpenAi => "openai",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    pub gemini_api_key: String,
    pub gemini_model: String,
    pub gemini_image_model: String,
    pub gemini_temperature: f32,
    pub gemini_top_k: i32,
    pub gemini_top_p: f32,
    pub gemini_max_output_tokens: i32,
    pub gemini_safety_settings: String,
    pub image_provider: ImageProvider,
    pub openai_api_key: String,
    pub openai_base_url: String,
    pub openai_image_model: String,
    pub image_size: String,
    pub image_quality: String,
    pub image_style: String,
    pub image_aspect_ratio: String,
    pub weather_api_key: String,
    pub weather_endpoint: String,
    pub weather_country_code: String,
    pub weather_timeout_seconds: u64,
    pub max_creatives: usize,
    pub default_creatives: usize,
    pub worker_pool_size: usize,
    pub attempt_timeout_seconds: u64,
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
    pub batch_deadline_seconds: u64,
    pub deadline_grace_ms: u64,
    pub caption_max_length: usize,
    pub caption_min_length: usize,
    pub advisor_timeout_seconds: u64,
    pub context_tables_path: Option<PathBuf>,
    pub output_dir: PathBuf,
}

/// Resolves raw configuration values by key. The process environment is one
/// source; tests pass a closure over a fixed map.
struct EnvSource<F: Fn(&str) -> Option<String>> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> EnvSource<F> {
    fn raw(&self, name: &str) -> Option<String> {
        (self.lookup)(name)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }

    fn string(&self, name: &str, default: &str) -> String {
        self.raw(name).unwrap_or_else(|| default.to_string())
    }

    fn log_level(&self) -> String {
        self.string("LOG_LEVEL", "info").to_lowercase()
    }

    fn parsed<T: std::str::FromStr + Copy>(&self, name: &str, default: T) -> T {
        match self.raw(name) {
            Some(value) => match value.parse::<T>() {
                Ok(parsed) => parsed,
                Err(_) => {
                    warn!("Invalid value '{}' for {}; using default.", value, name);
                    default
                }
            },
            None => default,
        }
    }

    fn f32(&self, name: &str, default: f32) -> f32 {
        self.parsed(name, default)
    }

    fn i32(&self, name: &str, default: i32) -> i32 {
        self.parsed(name, default)
    }

    fn u64(&self, name: &str, default: u64) -> u64 {
        self.parsed(name, default)
    }

    fn u32(&self, name: &str, default: u32) -> u32 {
        self.parsed(name, default)
    }

    fn usize(&self, name: &str, default: usize) -> usize {
        self.parsed(name, default)
    }
}

fn normalize_gemini_safety_settings(value: String) -> String {
    let lowered = value.trim().to_lowercase();
    match lowered.as_str() {
        "permissive" | "off" | "none" => "permissive".to_string(),
        "standard" | "" => "standard".to_string(),
        _ => {
            warn!(
                "Unknown GEMINI_SAFETY_SETTINGS value '{}'; defaulting to standard.",
                value
            );
            "standard".to_string()
        }
    }
}

fn normalize_image_provider(value: &str) -> ImageProvider {
    ImageProvider::from_str(value).unwrap_or_else(|| {
        warn!("Unknown IMAGE_PROVIDER '{}'; defaulting to gemini.", value);
        ImageProvider::Gemini
    })
}

impl Config {
    /// Reads configuration from the process environment. Call once at
    /// startup, after `.env` has been loaded.
    pub fn load() -> Self {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// `LOG_LEVEL` alone, so logging can be installed before [`Config::load`]
    /// reports invalid values.
    pub fn startup_log_level() -> String {
        Self::log_level_from(|name| env::var(name).ok())
    }

    pub fn log_level_from<F: Fn(&str) -> Option<String>>(lookup: F) -> String {
        EnvSource { lookup }.log_level()
    }

    pub fn from_lookup<F: Fn(&str) -> Option<String>>(lookup: F) -> Self {
        let env = EnvSource { lookup };

        let max_creatives = env.usize("MAX_CREATIVES", 50).max(1);
        let default_creatives = env.usize("DEFAULT_CREATIVES", 10).clamp(1, max_creatives);
        let caption_max_length = env.usize("CAPTION_MAX_LENGTH", 150).max(20);
        let caption_min_length = env
            .usize("CAPTION_MIN_LENGTH", 10)
            .min(caption_max_length / 2);

        Config {
            log_level: env.log_level(),
            gemini_api_key: env.string("GEMINI_API_KEY", ""),
            gemini_model: env.string("GEMINI_MODEL", "gemini-2.5-flash"),
            gemini_image_model: env.string("GEMINI_IMAGE_MODEL", "gemini-2.5-flash-image"),
            gemini_temperature: env.f32("GEMINI_TEMPERATURE", 0.9),
            gemini_top_k: env.i32("GEMINI_TOP_K", 40),
            gemini_top_p: env.f32("GEMINI_TOP_P", 0.95),
            gemini_max_output_tokens: env.i32("GEMINI_MAX_OUTPUT_TOKENS", 512),
            gemini_safety_settings: normalize_gemini_safety_settings(
                env.string("GEMINI_SAFETY_SETTINGS", "standard"),
            ),
            image_provider: normalize_image_provider(&env.string("IMAGE_PROVIDER", "gemini")),
            openai_api_key: env.string("OPENAI_API_KEY", ""),
            openai_base_url: env
                .string("OPENAI_BASE_URL", "https://api.openai.com/v1")
                .trim_end_matches('/')
                .to_string(),
            openai_image_model: env.string("OPENAI_IMAGE_MODEL", "dall-e-3"),
            image_size: env.string("IMAGE_SIZE", "1024x1024"),
            image_quality: env.string("IMAGE_QUALITY", "standard"),
            image_style: env.string("IMAGE_STYLE", "vivid"),
            image_aspect_ratio: env.string("IMAGE_ASPECT_RATIO", "1:1"),
            weather_api_key: env.string("WEATHER_API_KEY", ""),
            weather_endpoint: env.string(
                "WEATHER_ENDPOINT",
                "https://api.openweathermap.org/data/2.5/weather",
            ),
            weather_country_code: env.string("WEATHER_COUNTRY_CODE", "IN").to_uppercase(),
            weather_timeout_seconds: env.u64("WEATHER_TIMEOUT_SECONDS", 10).max(1),
            max_creatives,
            default_creatives,
            worker_pool_size: env.usize("WORKER_POOL_SIZE", 4).max(1),
            attempt_timeout_seconds: env.u64("ATTEMPT_TIMEOUT_SECONDS", 90).max(1),
            max_retries: env.u32("MAX_RETRIES", 2),
            retry_base_delay_ms: env.u64("RETRY_BASE_DELAY_MS", 900),
            batch_deadline_seconds: env.u64("BATCH_DEADLINE_SECONDS", 600).max(1),
            deadline_grace_ms: env.u64("DEADLINE_GRACE_MS", 500),
            caption_max_length,
            caption_min_length,
            advisor_timeout_seconds: env.u64("ADVISOR_TIMEOUT_SECONDS", 30).max(1),
            context_tables_path: env.raw("CONTEXT_TABLES_PATH").map(PathBuf::from),
            output_dir: PathBuf::from(env.string("OUTPUT_DIR", "output")),
        }
    }

    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_secs(self.attempt_timeout_seconds)
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    pub fn batch_deadline(&self) -> Duration {
        Duration::from_secs(self.batch_deadline_seconds)
    }

    pub fn deadline_grace(&self) -> Duration {
        Duration::from_millis(self.deadline_grace_ms)
    }

    pub fn weather_timeout(&self) -> Duration {
        Duration::from_secs(self.weather_timeout_seconds)
    }

    pub fn advisor_timeout(&self) -> Duration {
        Duration::from_secs(self.advisor_timeout_seconds)
    }

    /// Pixel dimensions parsed from `IMAGE_SIZE`; used for placeholders.
    pub fn image_dimensions(&self) -> (u32, u32) {
        let mut parts = self.image_size.split('x');
        let width = parts.next().and_then(|value| value.trim().parse::<u32>().ok());
        let height = parts.next().and_then(|value| value.trim().parse::<u32>().ok());
        match (width, height) {
            (Some(width), Some(height)) if width > 0 && height > 0 => (width, height),
            _ => (1024, 1024),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

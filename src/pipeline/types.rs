use std::fmt;

use serde::{Deserialize, Serialize};

/// Placeholder for a signal that could not be resolved.
pub const NEUTRAL: &str = "neutral";

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Location {
    pub city: String,
    pub region: String,
    pub country: String,
}

impl Location {
    pub fn new(city: &str, region: Option<&str>, country: Option<&str>) -> Self {
        fn clean(value: Option<&str>) -> String {
            value
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(str::to_string)
                .unwrap_or_else(|| NEUTRAL.to_string())
        }

        let country = clean(country);
        Self {
            city: city.trim().to_string(),
            region: clean(region),
            country: if country == NEUTRAL {
                country
            } else {
                country.to_uppercase()
            },
        }
    }

    /// Parses `"City"`, `"City, Country"` or `"City, Region, Country"`.
    pub fn parse(value: &str) -> Self {
        let parts: Vec<&str> = value
            .split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .collect();
        match parts.as_slice() {
            [] => Self::new("", None, None),
            [city] => Self::new(city, None, None),
            [city, country] => Self::new(city, None, Some(country)),
            [city, region, country, ..] => Self::new(city, Some(region), Some(country)),
        }
    }

    pub fn city_key(&self) -> String {
        self.city.to_lowercase()
    }

    pub fn has_region(&self) -> bool {
        self.region != NEUTRAL
    }

    pub fn has_country(&self) -> bool {
        self.country != NEUTRAL
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.city)?;
        if self.has_region() {
            write!(f, ", {}", self.region)?;
        }
        if self.has_country() {
            write!(f, ", {}", self.country)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Season {
    Winter,
    Spring,
    Monsoon,
    Autumn,
}

impl Season {
    pub fn from_month(month: u32) -> Self {
        match month {
            12 | 1 | 2 => Self::Winter,
            3..=5 => Self::Spring,
            6..=8 => Self::Monsoon,
            _ => Self::Autumn,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Winter => "winter",
            Self::Spring => "spring",
            Self::Monsoon => "monsoon",
            Self::Autumn => "autumn",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeOfDay {
    Morning,
    Afternoon,
    Evening,
    Night,
}

impl TimeOfDay {
    pub fn from_hour(hour: u32) -> Self {
        match hour {
            5..=11 => Self::Morning,
            12..=16 => Self::Afternoon,
            17..=20 => Self::Evening,
            _ => Self::Night,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Morning => "morning",
            Self::Afternoon => "afternoon",
            Self::Evening => "evening",
            Self::Night => "night",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WeatherCondition {
    Clear,
    Clouds,
    Rain,
    Snow,
    HumidOvercast,
    Fog,
    Neutral,
}

impl WeatherCondition {
    /// Maps OpenWeatherMap's `weather[0].main` group names.
    pub fn from_main(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "clear" => Self::Clear,
            "clouds" => Self::Clouds,
            "rain" | "drizzle" | "thunderstorm" => Self::Rain,
            "snow" => Self::Snow,
            "mist" | "fog" | "haze" | "smoke" | "dust" => Self::Fog,
            "humid" | "humid_overcast" => Self::HumidOvercast,
            _ => Self::Neutral,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Clear => "clear",
            Self::Clouds => "clouds",
            Self::Rain => "rain",
            Self::Snow => "snow",
            Self::HumidOvercast => "humid_overcast",
            Self::Fog => "fog",
            Self::Neutral => NEUTRAL,
        }
    }

    pub const fn sky_commentary(self) -> &'static str {
        match self {
            Self::Rain => "Rainy conditions - focus on indoor comfort and convenience",
            Self::Clouds => "Cloudy skies - versatile conditions",
            Self::Clear => "Clear skies - perfect for outdoor messaging",
            Self::Snow => "Snowy conditions - cozy, warming moments",
            Self::HumidOvercast => "Humid, overcast skies - fresh and light messaging",
            Self::Fog => "Hazy light - soft, intimate scenes",
            Self::Neutral => "Mild conditions - everyday moments",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TemperatureBand {
    Freezing,
    Cold,
    Cool,
    Comfortable,
    Warm,
    Hot,
    Scorching,
}

impl TemperatureBand {
    pub fn from_celsius(celsius: i32) -> Self {
        match celsius {
            c if c > 35 => Self::Scorching,
            c if c > 30 => Self::Hot,
            c if c > 25 => Self::Warm,
            c if c > 20 => Self::Comfortable,
            c if c > 15 => Self::Cool,
            c if c > 5 => Self::Cold,
            _ => Self::Freezing,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Freezing => "freezing",
            Self::Cold => "cold",
            Self::Cool => "cool",
            Self::Comfortable => "comfortable",
            Self::Warm => "warm",
            Self::Hot => "hot",
            Self::Scorching => "scorching",
        }
    }

    pub const fn commentary(self) -> &'static str {
        match self {
            Self::Scorching => "extremely hot weather - perfect for cooling products",
            Self::Hot => "hot and sunny conditions - ideal for refreshing products",
            Self::Warm => "warm and pleasant conditions - great for outdoor activities",
            Self::Comfortable => "comfortable weather - perfect for all activities",
            Self::Cool => "cool weather - good for warm products",
            Self::Cold | Self::Freezing => "cold weather - ideal for warming products",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WeatherObservation {
    pub condition: WeatherCondition,
    pub temperature_c: f32,
    pub description: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalOrigin {
    Observed,
    SeasonalDefault,
}

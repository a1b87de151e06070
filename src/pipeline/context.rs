use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Context as _, Result};
use chrono::{Datelike, NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::Config;
use crate::pipeline::types::{
    Location, Season, SignalOrigin, TemperatureBand, TimeOfDay, WeatherCondition,
    WeatherObservation, NEUTRAL,
};

pub const BUILTIN_TABLE_VERSION: &str = "ctx-2024.2";
const MAX_CULTURAL_TAGS: usize = 2;
const MAX_POI_TAGS: usize = 4;

/// Location/time snapshot for one generation run. Every field is populated;
/// unresolved signals carry explicit fallbacks.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Context {
    pub location: Location,
    pub requested_at: NaiveDateTime,
    pub weather: WeatherCondition,
    pub weather_description: String,
    pub temperature_c: i32,
    pub temperature_band: TemperatureBand,
    pub weather_origin: SignalOrigin,
    pub time_of_day: TimeOfDay,
    pub season: Season,
    pub cultural_tags: Vec<String>,
    pub poi_tags: Vec<String>,
    pub culture: String,
    pub local_vibe: String,
    pub table_version: String,
}

impl Context {
    pub fn weather_summary(&self) -> String {
        format!(
            "{} is experiencing {} with {}°C temperature, {}. {}",
            self.location.city,
            self.weather_description,
            self.temperature_c,
            self.temperature_band.commentary(),
            self.weather.sky_commentary()
        )
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SeasonalWeather {
    pub temp_c: i32,
    pub condition: WeatherCondition,
    pub description: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CityProfile {
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub pois: Vec<String>,
    #[serde(default)]
    pub culture: Option<String>,
    #[serde(default)]
    pub vibe: Option<String>,
    #[serde(default)]
    pub seasons: BTreeMap<Season, SeasonalWeather>,
}

#[derive(Debug, Deserialize)]
struct TablesOverlayFile {
    version: String,
    #[serde(default)]
    cities: BTreeMap<String, CityProfile>,
}

/// Defaulting tables keyed by lowercase city name and country code.
#[derive(Debug, Clone)]
pub struct ContextTables {
    version: String,
    cities: BTreeMap<String, CityProfile>,
    country_weather: BTreeMap<String, BTreeMap<Season, SeasonalWeather>>,
    festivals: BTreeMap<String, BTreeMap<Season, Vec<String>>>,
}

fn seasonal(entries: [(Season, i32, WeatherCondition, &str); 4]) -> BTreeMap<Season, SeasonalWeather> {
    entries
        .into_iter()
        .map(|(season, temp_c, condition, description)| {
            (
                season,
                SeasonalWeather {
                    temp_c,
                    condition,
                    description: description.to_string(),
                },
            )
        })
        .collect()
}

fn festivals(entries: [(Season, &[&str]); 4]) -> BTreeMap<Season, Vec<String>> {
    entries
        .into_iter()
        .map(|(season, names)| (season, names.iter().map(|name| name.to_string()).collect()))
        .collect()
}

fn city(
    region: &str,
    country: &str,
    pois: &[&str],
    culture: Option<&str>,
    vibe: Option<&str>,
    seasons: [(Season, i32, WeatherCondition, &str); 4],
) -> CityProfile {
    CityProfile {
        region: Some(region.to_string()),
        country: Some(country.to_string()),
        pois: pois.iter().map(|poi| poi.to_string()).collect(),
        culture: culture.map(str::to_string),
        vibe: vibe.map(str::to_string),
        seasons: seasonal(seasons),
    }
}

impl ContextTables {
    pub fn builtin() -> Self {
        use Season::*;
        use WeatherCondition::*;

        let mut cities = BTreeMap::new();
        cities.insert(
            "bangalore".to_string(),
            city(
                "Karnataka",
                "IN",
                &["cafes", "tech parks", "gardens", "breweries", "malls"],
                Some("tech-savvy, café culture, cosmopolitan vibes"),
                Some("Bangalore monsoon vibes, tech-savvy millennials, café hoppers"),
                [
                    (Winter, 22, Clear, "pleasant weather"),
                    (Spring, 28, Clear, "warm and sunny"),
                    (Monsoon, 24, Rain, "rainy"),
                    (Autumn, 25, Clouds, "pleasant"),
                ],
            ),
        );
        cities.insert(
            "chennai".to_string(),
            city(
                "Tamil Nadu",
                "IN",
                &["beaches", "temples", "marina", "shopping districts"],
                Some("traditional, coastal culture, filter coffee culture"),
                Some("Chennai coastal vibes, traditional yet modern, beach lovers"),
                [
                    (Winter, 28, Clear, "warm"),
                    (Spring, 35, Clear, "hot and sunny"),
                    (Monsoon, 30, Rain, "humid with rain"),
                    (Autumn, 32, Clear, "hot"),
                ],
            ),
        );
        cities.insert(
            "hyderabad".to_string(),
            city(
                "Telangana",
                "IN",
                &["tech hubs", "biryani spots", "lakes", "monuments"],
                Some("biryani culture, tech hub, historical heritage"),
                Some("Hyderabad heritage, biryani lovers, tech professionals"),
                [
                    (Winter, 24, Clear, "pleasant"),
                    (Spring, 32, Clear, "hot"),
                    (Monsoon, 26, Rain, "rainy"),
                    (Autumn, 28, Clouds, "warm"),
                ],
            ),
        );
        cities.insert(
            "delhi".to_string(),
            city(
                "Delhi",
                "IN",
                &["monuments", "markets", "malls", "restaurants", "historical sites"],
                Some("historical, diverse cuisine, shopping culture"),
                Some("Delhi nightlife, historical charm, food explorers"),
                [
                    (Winter, 15, Clouds, "cold"),
                    (Spring, 30, Clear, "hot"),
                    (Monsoon, 32, Rain, "humid with rain"),
                    (Autumn, 28, Clear, "pleasant"),
                ],
            ),
        );
        cities.insert(
            "gurgaon".to_string(),
            city(
                "Haryana",
                "IN",
                &["corporate towers", "malls", "rooftop bars"],
                None,
                None,
                [
                    (Winter, 14, Clouds, "cold"),
                    (Spring, 31, Clear, "hot"),
                    (Monsoon, 33, Rain, "humid"),
                    (Autumn, 27, Clear, "pleasant"),
                ],
            ),
        );
        cities.insert(
            "mumbai".to_string(),
            city(
                "Maharashtra",
                "IN",
                &["marine drive", "malls", "beaches", "street markets"],
                Some("fast-paced, bollywood, street food culture"),
                Some("Mumbai hustle, bollywood dreams, street food enthusiasts"),
                [
                    (Winter, 26, Clear, "pleasant"),
                    (Spring, 32, Clear, "hot and humid"),
                    (Monsoon, 28, Rain, "heavy rain"),
                    (Autumn, 30, Clouds, "humid"),
                ],
            ),
        );
        cities.insert(
            "pune".to_string(),
            city(
                "Maharashtra",
                "IN",
                &["colleges", "cafes", "hills", "restaurants"],
                Some("educational hub, young crowd, café culture"),
                Some("Pune student life, young energy, weekend adventurers"),
                [
                    (Winter, 20, Clear, "cool"),
                    (Spring, 30, Clear, "warm"),
                    (Monsoon, 24, Rain, "rainy"),
                    (Autumn, 26, Clouds, "pleasant"),
                ],
            ),
        );
        cities.insert(
            "kolkata".to_string(),
            city(
                "West Bengal",
                "IN",
                &["cultural centers", "markets", "sweets shops", "heritage sites"],
                Some("artistic, literary, sweet culture, cultural festivals"),
                Some("Kolkata artistic soul, cultural enthusiasts, sweet lovers"),
                [
                    (Winter, 22, Clear, "pleasant"),
                    (Spring, 34, Clear, "hot and humid"),
                    (Monsoon, 30, Rain, "heavy rain"),
                    (Autumn, 28, Clouds, "humid"),
                ],
            ),
        );
        cities.insert(
            "los angeles".to_string(),
            city(
                "California",
                "US",
                &["beaches", "boardwalks", "studios", "taco stands"],
                Some("sun-soaked, creative, wellness culture"),
                Some("LA sunshine, creators and surfers"),
                [
                    (Winter, 18, Clear, "mild"),
                    (Spring, 22, Clear, "pleasant"),
                    (Monsoon, 28, Clear, "warm and sunny"),
                    (Autumn, 24, Clear, "pleasant"),
                ],
            ),
        );
        cities.insert(
            "san francisco".to_string(),
            city(
                "California",
                "US",
                &["piers", "coffee roasters", "hills", "tech campuses"],
                Some("innovative, foodie, outdoorsy"),
                Some("Bay Area fog, founders and foodies"),
                [
                    (Winter, 14, Fog, "cool and foggy"),
                    (Spring, 18, Clouds, "mild"),
                    (Monsoon, 20, Clouds, "cool"),
                    (Autumn, 19, Clouds, "mild"),
                ],
            ),
        );
        cities.insert(
            "new york".to_string(),
            city(
                "New York",
                "US",
                &["parks", "delis", "rooftops", "subway stations"],
                Some("fast-moving, diverse, fashion-forward"),
                Some("New York energy, commuters and night owls"),
                [
                    (Winter, 2, Snow, "cold"),
                    (Spring, 18, Clear, "mild"),
                    (Monsoon, 28, Clear, "hot and humid"),
                    (Autumn, 16, Clouds, "cool"),
                ],
            ),
        );
        cities.insert(
            "london".to_string(),
            city(
                "England",
                "GB",
                &["pubs", "markets", "parks", "high streets"],
                Some("historic, multicultural, tea and pub culture"),
                Some("London drizzle, markets and late-night buses"),
                [
                    (Winter, 8, Rain, "cold and rainy"),
                    (Spring, 14, Clouds, "mild"),
                    (Monsoon, 20, Clouds, "pleasant"),
                    (Autumn, 12, Rain, "cool and rainy"),
                ],
            ),
        );

        let mut country_weather = BTreeMap::new();
        country_weather.insert(
            "IN".to_string(),
            seasonal([
                (Winter, 24, Clear, "pleasant"),
                (Spring, 32, Clear, "hot and sunny"),
                (Monsoon, 29, HumidOvercast, "humid and overcast"),
                (Autumn, 28, Clouds, "warm"),
            ]),
        );
        country_weather.insert(
            "US".to_string(),
            seasonal([
                (Winter, 5, Clouds, "cold"),
                (Spring, 17, Clear, "mild"),
                (Monsoon, 27, Clear, "warm and sunny"),
                (Autumn, 15, Clouds, "cool"),
            ]),
        );
        country_weather.insert(
            "GB".to_string(),
            seasonal([
                (Winter, 6, Rain, "cold and damp"),
                (Spring, 13, Clouds, "mild"),
                (Monsoon, 20, Clouds, "pleasant"),
                (Autumn, 12, Rain, "cool and rainy"),
            ]),
        );

        let mut festival_table = BTreeMap::new();
        festival_table.insert(
            "IN".to_string(),
            festivals([
                (Winter, &["Christmas", "New Year", "Pongal", "Makar Sankranti"]),
                (Spring, &["Holi", "Ugadi", "Gudi Padwa"]),
                (Monsoon, &["Raksha Bandhan", "Independence Day", "Onam"]),
                (Autumn, &["Diwali", "Durga Puja", "Dussehra", "Navratri"]),
            ]),
        );
        festival_table.insert(
            "US".to_string(),
            festivals([
                (Winter, &["Christmas", "New Year"]),
                (Spring, &["Easter", "Memorial Day"]),
                (Monsoon, &["Fourth of July", "summer vacation"]),
                (Autumn, &["Halloween", "Thanksgiving"]),
            ]),
        );
        festival_table.insert(
            "GB".to_string(),
            festivals([
                (Winter, &["Christmas", "New Year"]),
                (Spring, &["Easter", "May Day"]),
                (Monsoon, &["summer holidays", "Notting Hill Carnival"]),
                (Autumn, &["Bonfire Night", "Halloween"]),
            ]),
        );

        Self {
            version: BUILTIN_TABLE_VERSION.to_string(),
            cities,
            country_weather,
            festivals: festival_table,
        }
    }

    /// Adds or replaces city profiles from a YAML file. The table version
    /// becomes `<builtin>+<overlay version>`.
    pub fn apply_overlay(&mut self, path: &Path) -> Result<usize> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("Failed to read context tables at {}", path.display()))?;
        self.apply_overlay_str(&raw)
            .with_context(|| format!("Failed to parse context tables at {}", path.display()))
    }

    fn apply_overlay_str(&mut self, raw: &str) -> Result<usize> {
        let overlay: TablesOverlayFile = serde_yaml::from_str(raw)?;
        let count = overlay.cities.len();
        for (name, profile) in overlay.cities {
            let key = name.trim().to_lowercase();
            if key.is_empty() {
                continue;
            }
            self.cities.insert(key, profile);
        }
        self.version = format!("{}+{}", self.version, overlay.version.trim());
        Ok(count)
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    fn city(&self, key: &str) -> Option<&CityProfile> {
        self.cities.get(key)
    }

    fn seasonal_weather(&self, profile: Option<&CityProfile>, country: &str, season: Season) -> SeasonalWeather {
        profile
            .and_then(|profile| profile.seasons.get(&season))
            .or_else(|| {
                self.country_weather
                    .get(country)
                    .and_then(|table| table.get(&season))
            })
            .cloned()
            .unwrap_or_else(|| SeasonalWeather {
                temp_c: 25,
                condition: WeatherCondition::Clear,
                description: "pleasant".to_string(),
            })
    }

    fn festivals(&self, country: &str, season: Season) -> Vec<String> {
        let listed = self
            .festivals
            .get(country)
            .and_then(|table| table.get(&season))
            .cloned()
            .unwrap_or_default();
        if !listed.is_empty() {
            return listed;
        }
        let generic = match season {
            Season::Winter => "holiday season",
            Season::Spring => "spring festivals",
            Season::Monsoon => "summer break",
            Season::Autumn => "harvest season",
        };
        vec![generic.to_string()]
    }
}

/// Builds [`Context`] values. Pure over its inputs and the loaded tables.
#[derive(Debug, Clone)]
pub struct ContextModel {
    tables: ContextTables,
    default_country: String,
}

impl ContextModel {
    pub fn new(tables: ContextTables, default_country: &str) -> Self {
        let default_country = default_country.trim().to_uppercase();
        Self {
            tables,
            default_country: if default_country.is_empty() {
                NEUTRAL.to_string()
            } else {
                default_country
            },
        }
    }

    pub fn from_config(config: &Config) -> Self {
        let mut tables = ContextTables::builtin();
        if let Some(path) = config.context_tables_path.as_deref() {
            match tables.apply_overlay(path) {
                Ok(count) => info!(
                    "Loaded {} city profile(s) from {} (tables {})",
                    count,
                    path.display(),
                    tables.version()
                ),
                Err(err) => warn!("Ignoring context table overlay: {:#}", err),
            }
        }
        Self::new(tables, &config.weather_country_code)
    }

    pub fn table_version(&self) -> &str {
        self.tables.version()
    }

    pub fn build(&self, location: &Location, requested_at: NaiveDateTime) -> Context {
        self.build_with_observation(location, requested_at, None)
    }

    pub fn build_with_observation(
        &self,
        location: &Location,
        requested_at: NaiveDateTime,
        observation: Option<&WeatherObservation>,
    ) -> Context {
        let profile = self.tables.city(&location.city_key());
        let city = if location.city.is_empty() {
            NEUTRAL.to_string()
        } else {
            location.city.clone()
        };
        let region = if location.has_region() {
            location.region.clone()
        } else {
            profile
                .and_then(|profile| profile.region.clone())
                .unwrap_or_else(|| NEUTRAL.to_string())
        };
        let country = if location.has_country() {
            location.country.clone()
        } else {
            profile
                .and_then(|profile| profile.country.clone())
                .map(|country| country.to_uppercase())
                .unwrap_or_else(|| self.default_country.clone())
        };

        let season = Season::from_month(requested_at.month());
        let time_of_day = TimeOfDay::from_hour(requested_at.hour());
        let typical = self.tables.seasonal_weather(profile, &country, season);

        let (weather, weather_description, temperature_c, weather_origin) = match observation {
            Some(observed) => {
                let condition = if observed.condition == WeatherCondition::Neutral {
                    typical.condition
                } else {
                    observed.condition
                };
                let description = if observed.description.trim().is_empty() {
                    typical.description.clone()
                } else {
                    observed.description.trim().to_lowercase()
                };
                (
                    condition,
                    description,
                    observed.temperature_c.round() as i32,
                    SignalOrigin::Observed,
                )
            }
            None => (
                typical.condition,
                typical.description.clone(),
                typical.temp_c,
                SignalOrigin::SeasonalDefault,
            ),
        };

        let mut cultural_tags = self.tables.festivals(&country, season);
        cultural_tags.truncate(MAX_CULTURAL_TAGS);

        let mut poi_tags = profile
            .map(|profile| profile.pois.clone())
            .filter(|pois| !pois.is_empty())
            .unwrap_or_else(|| {
                vec![
                    "local attractions".to_string(),
                    "shopping areas".to_string(),
                    "restaurants".to_string(),
                ]
            });
        poi_tags.truncate(MAX_POI_TAGS);

        let culture = profile
            .and_then(|profile| profile.culture.clone())
            .unwrap_or_else(|| "vibrant local culture".to_string());
        let local_vibe = profile
            .and_then(|profile| profile.vibe.clone())
            .unwrap_or_else(|| format!("{} local vibes and culture", city));

        Context {
            location: Location {
                city,
                region,
                country,
            },
            requested_at,
            weather,
            weather_description,
            temperature_c,
            temperature_band: TemperatureBand::from_celsius(temperature_c),
            weather_origin,
            time_of_day,
            season,
            cultural_tags,
            poi_tags,
            culture,
            local_vibe,
            table_version: self.tables.version().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;

    fn at(month: u32, hour: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, month, 10)
            .and_then(|date| date.and_hms_opt(hour, 15, 0))
            .expect("valid test date")
    }

    fn model() -> ContextModel {
        ContextModel::new(ContextTables::builtin(), "IN")
    }

    #[test]
    fn same_inputs_build_identical_contexts() {
        let model = model();
        let location = Location::parse("Mumbai");
        let first = model.build(&location, at(7, 9));
        let second = model.build(&location, at(7, 9));
        assert_eq!(first, second);
    }

    #[test]
    fn known_city_uses_its_seasonal_profile() {
        let context = model().build(&Location::parse("Bangalore"), at(7, 18));
        assert_eq!(context.season, Season::Monsoon);
        assert_eq!(context.time_of_day, TimeOfDay::Evening);
        assert_eq!(context.weather, WeatherCondition::Rain);
        assert_eq!(context.temperature_c, 24);
        assert_eq!(context.location.region, "Karnataka");
        assert_eq!(context.location.country, "IN");
        assert_eq!(context.cultural_tags, vec!["Raksha Bandhan", "Independence Day"]);
        assert_eq!(context.weather_origin, SignalOrigin::SeasonalDefault);
    }

    #[test]
    fn unknown_city_in_monsoon_country_defaults_to_humid_overcast() {
        let context = model().build(&Location::parse("Nagpur"), at(8, 13));
        assert_eq!(context.weather, WeatherCondition::HumidOvercast);
        assert_eq!(context.location.region, NEUTRAL);
        assert_eq!(context.poi_tags[0], "local attractions");
        assert_eq!(context.culture, "vibrant local culture");
        assert!(!context.cultural_tags.is_empty());
    }

    #[test]
    fn unknown_country_still_resolves_every_field() {
        let context = model().build(&Location::parse("Reykjavik, IS"), at(1, 2));
        assert_eq!(context.location.country, "IS");
        assert_eq!(context.weather, WeatherCondition::Clear);
        assert_eq!(context.temperature_c, 25);
        assert_eq!(context.cultural_tags, vec!["holiday season"]);
        assert_eq!(context.time_of_day, TimeOfDay::Night);
    }

    #[test]
    fn observation_overrides_seasonal_weather() {
        let observation = WeatherObservation {
            condition: WeatherCondition::Clouds,
            temperature_c: 31.6,
            description: "Broken Clouds".to_string(),
        };
        let context = model().build_with_observation(
            &Location::parse("Chennai"),
            at(3, 10),
            Some(&observation),
        );
        assert_eq!(context.weather, WeatherCondition::Clouds);
        assert_eq!(context.temperature_c, 32);
        assert_eq!(context.temperature_band, TemperatureBand::Hot);
        assert_eq!(context.weather_description, "broken clouds");
        assert_eq!(context.weather_origin, SignalOrigin::Observed);
        assert!(context.weather_summary().contains("Chennai is experiencing broken clouds"));
    }

    #[test]
    fn overlay_adds_cities_and_bumps_version() {
        let mut tables = ContextTables::builtin();
        let added = tables
            .apply_overlay_str(
                r#"
version: goa-1
cities:
  Goa:
    region: Goa
    country: IN
    pois: [beach shacks, flea markets]
    vibe: Goa sunsets
    seasons:
      monsoon: { temp_c: 27, condition: rain, description: lush and rainy }
"#,
            )
            .expect("overlay parses");
        assert_eq!(added, 1);
        let model = ContextModel::new(tables, "IN");
        let context = model.build(&Location::parse("goa"), at(7, 10));
        assert_eq!(context.table_version, "ctx-2024.2+goa-1");
        assert_eq!(context.poi_tags, vec!["beach shacks", "flea markets"]);
        assert_eq!(context.weather_description, "lush and rainy");
        assert_eq!(context.local_vibe, "Goa sunsets");
    }
}

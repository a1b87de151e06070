use std::sync::Arc;

use chrono::{NaiveDateTime, Utc};
use tokio::time::Instant;
use tracing::{info, warn};

use crate::config::{Config, ImageProvider};
use crate::llm::types::{ImageGenerator, TextGenerator, WeatherSource};
use crate::llm::{GeminiClient, OpenAiImageClient, OpenWeatherClient};
use crate::pipeline::audience::{AudienceAdvice, AudienceAdvisor};
use crate::pipeline::brand::{BrandAsset, BrandProfile, HistogramPaletteExtractor, PaletteExtractor};
use crate::pipeline::caption::CaptionRules;
use crate::pipeline::context::{Context, ContextModel};
use crate::pipeline::error::StudioError;
use crate::pipeline::orchestrator::{CreativeRecord, Orchestrator};
use crate::pipeline::package::{Package, PackageAssembler};
use crate::pipeline::policy::RetryPolicy;
use crate::pipeline::prompt::PromptBuilder;
use crate::pipeline::types::Location;
use crate::utils::timing::RunTimer;

/// One generation run as requested by a caller.
#[derive(Debug, Clone)]
pub struct CreativeRequest {
    pub brand_name: String,
    pub category: String,
    pub description: Option<String>,
    pub location: Location,
    pub count: usize,
    pub caption_tone: String,
    pub logo: Option<BrandAsset>,
    pub product: Option<BrandAsset>,
    pub analyze_audience: bool,
    pub requested_at: NaiveDateTime,
}

/// Collaborators a [`Studio`] talks to.
pub struct Collaborators {
    pub images: Arc<dyn ImageGenerator>,
    pub text: Arc<dyn TextGenerator>,
    pub weather: Arc<dyn WeatherSource>,
    pub palette: Arc<dyn PaletteExtractor>,
}

impl Collaborators {
    /// Real providers selected by configuration.
    pub fn from_config(config: &Config) -> Self {
        info!("Image provider: {}", config.image_provider.as_str());
        let gemini = Arc::new(GeminiClient::from_config(config));
        let images: Arc<dyn ImageGenerator> = match config.image_provider {
            ImageProvider::Gemini => gemini.clone(),
            ImageProvider::OpenAi => Arc::new(OpenAiImageClient::from_config(config)),
        };
        Self {
            images,
            text: gemini,
            weather: Arc::new(OpenWeatherClient::from_config(config)),
            palette: Arc::new(HistogramPaletteExtractor),
        }
    }
}

/// Wires configuration and collaborators into the generation pipeline.
pub struct Studio {
    config: Config,
    context_model: ContextModel,
    prompts: PromptBuilder,
    orchestrator: Orchestrator,
    advisor: AudienceAdvisor,
    weather: Arc<dyn WeatherSource>,
    palette: Arc<dyn PaletteExtractor>,
}

impl Studio {
    pub fn new(config: Config, collaborators: Collaborators) -> Self {
        let rules = CaptionRules {
            min_length: config.caption_min_length,
            max_length: config.caption_max_length,
        };
        let orchestrator = Orchestrator::new(
            collaborators.images,
            collaborators.text.clone(),
            config.worker_pool_size,
            RetryPolicy::from_config(&config),
            rules,
            &config.image_aspect_ratio,
            config.deadline_grace(),
        );
        let context_model = ContextModel::from_config(&config);
        info!("Using context tables {}", context_model.table_version());
        Self {
            context_model,
            prompts: PromptBuilder::new(config.max_creatives),
            advisor: AudienceAdvisor::new(collaborators.text, config.advisor_timeout()),
            orchestrator,
            weather: collaborators.weather,
            palette: collaborators.palette,
            config,
        }
    }

    pub fn from_config(config: Config) -> Self {
        let collaborators = Collaborators::from_config(&config);
        Self::new(config, collaborators)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub async fn analyze_audience(
        &self,
        brand_name: &str,
        category: &str,
        description: Option<&str>,
    ) -> AudienceAdvice {
        self.advisor.recommend(brand_name, category, description).await
    }

    fn validate(&self, request: &CreativeRequest) -> Result<(), StudioError> {
        if request.count == 0 {
            return Err(StudioError::invalid("at least one creative must be requested"));
        }
        if request.count > self.config.max_creatives {
            return Err(StudioError::invalid(format!(
                "requested {} creatives; the maximum is {}",
                request.count, self.config.max_creatives
            )));
        }
        if request.location.city.trim().is_empty() && !request.analyze_audience {
            return Err(StudioError::invalid(
                "target city is required unless audience analysis picks one",
            ));
        }
        Ok(())
    }

    /// Runs the whole pipeline. Collaborator failures degrade individual
    /// creatives; only invalid input or a broken package is an error.
    pub async fn generate(&self, request: CreativeRequest) -> Result<Package, StudioError> {
        let mut timer = RunTimer::start(
            &request.brand_name,
            &request.location.to_string(),
            request.count,
        );
        let result = self.run(request).await;
        match &result {
            Ok(package) => {
                let degraded = package.degraded_ids().len();
                let status = if degraded == 0 { "success" } else { "degraded" };
                timer.complete(status, Some(format!("degraded={}", degraded)));
            }
            Err(err) => timer.complete("error", Some(err.to_string())),
        }
        result
    }

    async fn run(&self, mut request: CreativeRequest) -> Result<Package, StudioError> {
        self.validate(&request)?;
        let deadline = Instant::now() + self.config.batch_deadline();

        let brand = BrandProfile::build(
            &request.brand_name,
            &request.category,
            request.description.as_deref(),
            request.logo.take(),
            request.product.take(),
            self.palette.as_ref(),
        )?;

        // Without a city the advisor has to answer before anything else runs.
        let mut audience = None;
        if request.location.city.trim().is_empty() {
            let advice = self
                .advisor
                .recommend(&brand.name, &brand.category, brand.description.as_deref())
                .await;
            let city = advice
                .lead_city()
                .ok_or_else(|| StudioError::invalid("no target city given or recommended"))?
                .to_string();
            info!("No target city given; using advisor pick {}", city);
            request.location.city = city;
            audience = Some(advice);
        }

        let generation = self.generate_records(&request, &brand, deadline);
        let (context, records) = if request.analyze_audience && audience.is_none() {
            let advisor = self.advisor.recommend(
                &brand.name,
                &brand.category,
                brand.description.as_deref(),
            );
            tokio::pin!(generation);
            tokio::pin!(advisor);
            let mut ready = None;
            let generated = loop {
                tokio::select! {
                    generated = &mut generation => break generated,
                    advice = &mut advisor, if ready.is_none() => ready = Some(advice),
                }
            };
            audience = Some(ready.unwrap_or_else(|| {
                warn!("Audience advisor still pending when creatives were ready; using heuristic");
                AudienceAdvice::unavailable(
                    &brand.category,
                    "advisor still pending when creatives were ready",
                )
            }));
            generated?
        } else {
            generation.await?
        };

        PackageAssembler.assemble(
            &context,
            &brand,
            request.count,
            records,
            Utc::now(),
            audience,
        )
    }

    /// Weather, context, prompt expansion and the orchestrated batch.
    async fn generate_records(
        &self,
        request: &CreativeRequest,
        brand: &BrandProfile,
        deadline: Instant,
    ) -> Result<(Context, Vec<CreativeRecord>), StudioError> {
        let observation = self.weather.lookup(&request.location).await;
        if observation.is_none() {
            info!(
                "No live weather for {}; using seasonal defaults",
                request.location
            );
        }

        let context = self.context_model.build_with_observation(
            &request.location,
            request.requested_at,
            observation.as_ref(),
        );
        let specs = self
            .prompts
            .expand(&context, brand, request.count, &request.caption_tone)?;
        let distinct = self.prompts.distinct_pairs(&context);
        if request.count > distinct {
            warn!(
                "Requested {} creatives but only {} distinct theme/layout pairs exist; varying secondary attributes",
                request.count, distinct
            );
        }

        let records = self.orchestrator.run(&specs, deadline).await;
        Ok((context, records))
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use async_trait::async_trait;
    use chrono::NaiveDate;
    use image::{ImageFormat, Rgb, RgbImage};
    use parking_lot::Mutex;

    use super::*;
    use crate::llm::types::{
        GeneratedImage, GenerationError, ImageRequest, TextRequest,
    };
    use crate::pipeline::audience::AudienceInsight;
    use crate::pipeline::orchestrator::CreativeStatus;
    use crate::pipeline::types::{WeatherCondition, WeatherObservation};

    struct SolidImages;

    #[async_trait]
    impl ImageGenerator for SolidImages {
        fn name(&self) -> &str {
            "solid"
        }

        async fn generate_image(
            &self,
            _request: &ImageRequest,
        ) -> Result<GeneratedImage, GenerationError> {
            let mut bytes = Vec::new();
            RgbImage::from_pixel(12, 12, Rgb([10, 120, 200]))
                .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
                .expect("encode png");
            Ok(GeneratedImage {
                bytes,
                mime_type: "image/png".to_string(),
            })
        }
    }

    #[derive(Default)]
    struct RecordingText {
        prompts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl TextGenerator for RecordingText {
        fn name(&self) -> &str {
            "recording"
        }

        async fn generate_text(&self, request: &TextRequest) -> Result<String, GenerationError> {
            self.prompts.lock().push(request.prompt.clone());
            Ok(format!(
                "Fresh picks for your day, creative {}!",
                request.creative_id.unwrap_or_default()
            ))
        }
    }

    /// Captions answer at once; advisor calls (no creative id) follow `advisor`.
    struct AdvisedText {
        advisor: Option<&'static str>,
        advisor_calls: Mutex<usize>,
    }

    impl AdvisedText {
        fn replying(reply: &'static str) -> Self {
            Self {
                advisor: Some(reply),
                advisor_calls: Mutex::new(0),
            }
        }

        fn hanging() -> Self {
            Self {
                advisor: None,
                advisor_calls: Mutex::new(0),
            }
        }
    }

    #[async_trait]
    impl TextGenerator for AdvisedText {
        fn name(&self) -> &str {
            "advised"
        }

        async fn generate_text(&self, request: &TextRequest) -> Result<String, GenerationError> {
            if let Some(id) = request.creative_id {
                return Ok(format!("Fresh picks for your day, creative {}!", id));
            }
            *self.advisor_calls.lock() += 1;
            match self.advisor {
                Some(reply) => Ok(reply.to_string()),
                None => {
                    tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
                    Ok(String::new())
                }
            }
        }
    }

    struct RainyWeather;

    #[async_trait]
    impl WeatherSource for RainyWeather {
        async fn lookup(&self, _location: &Location) -> Option<WeatherObservation> {
            Some(WeatherObservation {
                condition: WeatherCondition::Rain,
                temperature_c: 21.6,
                description: "Light Rain".to_string(),
            })
        }
    }

    fn request(count: usize) -> CreativeRequest {
        CreativeRequest {
            brand_name: "Chai Co".to_string(),
            category: "beverage".to_string(),
            description: None,
            location: Location::parse("Mumbai"),
            count,
            caption_tone: "engaging".to_string(),
            logo: None,
            product: None,
            analyze_audience: false,
            requested_at: NaiveDate::from_ymd_opt(2024, 7, 14)
                .and_then(|date| date.and_hms_opt(18, 30, 0))
                .expect("valid date"),
        }
    }

    fn fake_studio(text: Arc<dyn TextGenerator>) -> Studio {
        Studio::new(
            Config::default(),
            Collaborators {
                images: Arc::new(SolidImages),
                text,
                weather: Arc::new(RainyWeather),
                palette: Arc::new(HistogramPaletteExtractor),
            },
        )
    }

    #[tokio::test]
    async fn rejects_out_of_range_counts_and_missing_city() {
        let studio = fake_studio(Arc::new(RecordingText::default()));
        assert!(matches!(
            studio.generate(request(0)).await,
            Err(StudioError::InvalidRequest(_))
        ));
        assert!(matches!(
            studio.generate(request(51)).await,
            Err(StudioError::InvalidRequest(_))
        ));
        let mut no_city = request(2);
        no_city.location = Location::parse("  ");
        assert!(studio.generate(no_city).await.is_err());
    }

    #[tokio::test]
    async fn healthy_collaborators_produce_complete_package() {
        let text = Arc::new(RecordingText::default());
        let studio = fake_studio(text.clone());
        let package = studio.generate(request(6)).await.expect("package");

        assert_eq!(package.records.len(), 6);
        assert!(package
            .records
            .iter()
            .all(|record| record.status == CreativeStatus::Complete));
        assert_eq!(package.manifest.status_counts.complete, 6);
        assert_eq!(package.manifest.context.weather, WeatherCondition::Rain);
        assert_eq!(package.manifest.context.temperature_c, 22);
        assert!(package.manifest.audience.is_none());
        assert_eq!(text.prompts.lock().len(), 6);
    }

    #[tokio::test]
    async fn offline_configuration_yields_fully_degraded_package() {
        let studio = Studio::from_config(Config::default());
        let mut offline = request(3);
        offline.analyze_audience = true;
        let package = studio.generate(offline).await.expect("package");

        assert_eq!(package.records.len(), 3);
        assert!(package
            .records
            .iter()
            .all(|record| record.status == CreativeStatus::DegradedBoth));
        assert_eq!(package.degraded_ids(), vec![1, 2, 3]);
        let advice = package.manifest.audience.expect("advice");
        assert!(!advice.is_available());
    }

    #[tokio::test(start_paused = true)]
    async fn hanging_advisor_does_not_hold_back_creatives() {
        let text = Arc::new(AdvisedText::hanging());
        let studio = fake_studio(text.clone());
        let mut advised = request(4);
        advised.analyze_audience = true;

        let started = Instant::now();
        let package = studio.generate(advised).await.expect("package");

        assert!(started.elapsed() < studio.config().advisor_timeout());
        assert_eq!(package.manifest.status_counts.complete, 4);
        assert_eq!(*text.advisor_calls.lock(), 1);
        let advice = package.manifest.audience.expect("advice");
        assert!(!advice.is_available());
        assert_eq!(advice.insight(), &AudienceInsight::heuristic("beverage"));
    }

    #[tokio::test]
    async fn advisor_picks_the_city_when_none_is_given() {
        let text = Arc::new(AdvisedText::replying(
            r#"{"age_group":"25-35","recommended_cities":["Pune","Goa"]}"#,
        ));
        let studio = fake_studio(text.clone());
        let mut open_city = request(2);
        open_city.location = Location::parse("");
        open_city.analyze_audience = true;

        let package = studio.generate(open_city).await.expect("package");

        assert_eq!(package.manifest.context.location.city, "Pune");
        assert_eq!(*text.advisor_calls.lock(), 1);
        let advice = package.manifest.audience.expect("advice");
        assert!(advice.is_available());
        assert_eq!(package.records.len(), 2);
    }
}

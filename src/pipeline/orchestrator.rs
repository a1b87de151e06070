use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::{timeout_at, Instant};
use tracing::{error, info, warn};

use crate::llm::media::inspect_image;
use crate::llm::types::{
    FailureKind, GenerationError, ImageGenerator, ImageRequest, StyleConstraints, TextGenerator,
    TextRequest,
};
use crate::pipeline::caption::CaptionRules;
use crate::pipeline::policy::{Decision, RetryPolicy};
use crate::pipeline::prompt::{
    render_caption_prompt, render_image_prompt, PromptSpec, Rationale, CAPTION_SYSTEM_PROMPT,
};

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ImageAsset {
    Generated {
        #[serde(skip)]
        bytes: Vec<u8>,
        mime_type: String,
        width: u32,
        height: u32,
    },
    Placeholder {
        reference: String,
        primary: String,
        accent: String,
    },
}

impl ImageAsset {
    pub fn placeholder(spec: &PromptSpec) -> Self {
        Self::Placeholder {
            reference: format!(
                "placeholder://creative-{:02}/{}-{}",
                spec.id,
                spec.palette.primary.trim_start_matches('#'),
                spec.palette.accent.trim_start_matches('#')
            ),
            primary: spec.palette.primary.clone(),
            accent: spec.palette.accent.clone(),
        }
    }

    pub fn is_placeholder(&self) -> bool {
        matches!(self, Self::Placeholder { .. })
    }

    /// Empty bytes or an empty placeholder reference count as no image.
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Generated { bytes, .. } => bytes.is_empty(),
            Self::Placeholder { reference, .. } => reference.trim().is_empty(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptionSource {
    Generated,
    Fallback,
}

#[derive(Debug, Clone, Serialize)]
pub struct Caption {
    pub text: String,
    pub source: CaptionSource,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CreativeStatus {
    Complete,
    DegradedImage,
    DegradedCaption,
    DegradedBoth,
}

impl CreativeStatus {
    pub fn from_outcomes(image_generated: bool, caption_generated: bool) -> Self {
        match (image_generated, caption_generated) {
            (true, true) => Self::Complete,
            (false, true) => Self::DegradedImage,
            (true, false) => Self::DegradedCaption,
            (false, false) => Self::DegradedBoth,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Complete => "complete",
            Self::DegradedImage => "degraded-image",
            Self::DegradedCaption => "degraded-caption",
            Self::DegradedBoth => "degraded-both",
        }
    }

    pub fn is_degraded(self) -> bool {
        self != Self::Complete
    }
}

/// How one sub-job resolved.
#[derive(Debug, Clone, Serialize)]
pub struct SubJobReport {
    pub attempts: u32,
    pub failure: Option<FailureKind>,
    pub detail: Option<String>,
}

impl SubJobReport {
    fn succeeded(attempts: u32) -> Self {
        Self {
            attempts,
            failure: None,
            detail: None,
        }
    }

    fn failed(attempts: u32, err: &GenerationError) -> Self {
        Self {
            attempts,
            failure: Some(err.kind),
            detail: Some(err.message.clone()),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CreativeRecord {
    pub id: usize,
    pub status: CreativeStatus,
    pub image: ImageAsset,
    pub caption: Caption,
    pub spec: PromptSpec,
    pub rationale: Rationale,
    pub image_report: SubJobReport,
    pub caption_report: SubJobReport,
}

impl CreativeRecord {
    fn resolve(
        spec: PromptSpec,
        image: Result<ImageAsset, GenerationError>,
        image_attempts: u32,
        caption: Result<String, GenerationError>,
        caption_attempts: u32,
        rules: &CaptionRules,
    ) -> Self {
        let (image, image_report) = match image {
            Ok(asset) => (asset, SubJobReport::succeeded(image_attempts)),
            Err(err) => (
                ImageAsset::placeholder(&spec),
                SubJobReport::failed(image_attempts, &err),
            ),
        };
        let (caption, caption_report) = match caption {
            Ok(text) => (
                Caption {
                    text,
                    source: CaptionSource::Generated,
                },
                SubJobReport::succeeded(caption_attempts),
            ),
            Err(err) => (
                Caption {
                    text: rules.fallback(&spec),
                    source: CaptionSource::Fallback,
                },
                SubJobReport::failed(caption_attempts, &err),
            ),
        };
        let image_generated = !image.is_placeholder();
        let caption_generated = caption.source == CaptionSource::Generated;
        Self {
            id: spec.id,
            status: CreativeStatus::from_outcomes(image_generated, caption_generated),
            rationale: spec.rationale(image_generated, caption_generated),
            image,
            caption,
            spec,
            image_report,
            caption_report,
        }
    }
}

/// Everything a spawned creative job needs; cheap to clone.
#[derive(Clone)]
struct Worker {
    images: Arc<dyn ImageGenerator>,
    captions: Arc<dyn TextGenerator>,
    permits: Arc<Semaphore>,
    policy: RetryPolicy,
    rules: CaptionRules,
    aspect_ratio: String,
}

impl Worker {
    async fn run_creative(&self, spec: PromptSpec, deadline: Instant) -> CreativeRecord {
        let image_attempts = AtomicU32::new(0);
        let caption_attempts = AtomicU32::new(0);

        let image_job = timeout_at(
            deadline,
            self.generate_image(&spec, &image_attempts, deadline),
        );
        let caption_job = timeout_at(
            deadline,
            self.generate_caption(&spec, &caption_attempts, deadline),
        );
        let (image, caption) = tokio::join!(image_job, caption_job);

        let past_deadline = |label: &str| {
            GenerationError::new(
                FailureKind::DeadlineExceeded,
                format!("{} sub-job unfinished at batch deadline", label),
            )
        };
        let image = image.unwrap_or_else(|_| Err(past_deadline("image")));
        let caption = caption.unwrap_or_else(|_| Err(past_deadline("caption")));

        let record = CreativeRecord::resolve(
            spec,
            image,
            image_attempts.load(Ordering::Relaxed),
            caption,
            caption_attempts.load(Ordering::Relaxed),
            &self.rules,
        );
        if record.status.is_degraded() {
            warn!(
                "Creative {} resolved as {} (image={:?}, caption={:?})",
                record.id,
                record.status.as_str(),
                record.image_report.failure,
                record.caption_report.failure
            );
        } else {
            info!("Creative {} complete", record.id);
        }
        record
    }

    async fn generate_image(
        &self,
        spec: &PromptSpec,
        attempts: &AtomicU32,
        deadline: Instant,
    ) -> Result<ImageAsset, GenerationError> {
        let request = ImageRequest {
            creative_id: spec.id,
            prompt: render_image_prompt(spec),
            style: StyleConstraints {
                palette: vec![spec.palette.primary.clone(), spec.palette.accent.clone()],
                aspect_ratio: self.aspect_ratio.clone(),
            },
        };
        self.with_retries(spec.id, "image", attempts, deadline, || async {
            let generated = self.images.generate_image(&request).await?;
            let Some(info) = inspect_image(&generated.bytes) else {
                return Err(GenerationError::new(
                    FailureKind::InvalidResponse,
                    format!("{} returned undecodable image data", self.images.name()),
                ));
            };
            Ok(ImageAsset::Generated {
                bytes: generated.bytes,
                mime_type: info.mime_type,
                width: info.width,
                height: info.height,
            })
        })
        .await
    }

    async fn generate_caption(
        &self,
        spec: &PromptSpec,
        attempts: &AtomicU32,
        deadline: Instant,
    ) -> Result<String, GenerationError> {
        let request = TextRequest {
            creative_id: Some(spec.id),
            system_prompt: CAPTION_SYSTEM_PROMPT.to_string(),
            prompt: render_caption_prompt(spec, self.rules.max_length),
        };
        self.with_retries(spec.id, "caption", attempts, deadline, || async {
            let raw = self.captions.generate_text(&request).await?;
            self.rules.finalize(&raw)
        })
        .await
    }

    /// Runs `call` under the worker pool and the per-attempt timeout, asking
    /// the retry policy after every failure. A permit is held only while a
    /// call is in flight, never across backoff sleeps. No call is issued once
    /// `deadline` has passed, and `attempts` counts issued calls only.
    async fn with_retries<T, F, Fut>(
        &self,
        id: usize,
        label: &str,
        attempts: &AtomicU32,
        deadline: Instant,
        mut call: F,
    ) -> Result<T, GenerationError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, GenerationError>>,
    {
        let mut attempt = 0u32;
        loop {
            let outcome = {
                let _permit = self.permits.acquire().await.map_err(|_| {
                    GenerationError::new(FailureKind::Cancelled, "worker pool closed")
                })?;
                let now = Instant::now();
                if now >= deadline {
                    return Err(GenerationError::new(
                        FailureKind::DeadlineExceeded,
                        format!("{} call not dispatched: batch deadline reached", label),
                    ));
                }
                attempt += 1;
                attempts.store(attempt, Ordering::Relaxed);

                let cutoff = deadline.min(now + self.policy.attempt_timeout);
                match timeout_at(cutoff, call()).await {
                    Ok(result) => result,
                    Err(_) if cutoff == deadline => Err(GenerationError::new(
                        FailureKind::DeadlineExceeded,
                        format!("{} attempt cut off at batch deadline", label),
                    )),
                    Err(_) => Err(GenerationError::new(
                        FailureKind::Timeout,
                        format!("attempt exceeded {:?}", self.policy.attempt_timeout),
                    )),
                }
            };

            let err = match outcome {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };
            match self.policy.decide(err.kind, attempt) {
                Decision::Retry(delay) if Instant::now() + delay < deadline => {
                    warn!(
                        "Creative {} {} attempt {} failed ({}): {}; retrying in {:?}",
                        id, label, attempt, err.kind, err.message, delay
                    );
                    tokio::time::sleep(delay).await;
                }
                Decision::Retry(delay) => {
                    warn!(
                        "Creative {} {} attempt {} failed ({}): {}; backoff of {:?} would pass the batch deadline",
                        id, label, attempt, err.kind, err.message, delay
                    );
                    return Err(err);
                }
                Decision::Degrade => {
                    warn!(
                        "Creative {} {} giving up after attempt {} ({}): {}",
                        id, label, attempt, err.kind, err.message
                    );
                    return Err(err);
                }
            }
        }
    }

    fn abandoned(&self, spec: PromptSpec) -> CreativeRecord {
        let err = GenerationError::new(
            FailureKind::DeadlineExceeded,
            "creative job did not report before the batch deadline",
        );
        CreativeRecord::resolve(spec, Err(err.clone()), 0, Err(err), 0, &self.rules)
    }
}

pub struct Orchestrator {
    worker: Worker,
    grace: Duration,
}

impl Orchestrator {
    pub fn new(
        images: Arc<dyn ImageGenerator>,
        captions: Arc<dyn TextGenerator>,
        pool_size: usize,
        policy: RetryPolicy,
        rules: CaptionRules,
        aspect_ratio: &str,
        grace: Duration,
    ) -> Self {
        Self {
            worker: Worker {
                images,
                captions,
                permits: Arc::new(Semaphore::new(pool_size.max(1))),
                policy,
                rules,
                aspect_ratio: aspect_ratio.to_string(),
            },
            grace,
        }
    }

    /// Generates one record per spec, in input order. Returns by
    /// `deadline + grace` even if providers never answer.
    pub async fn run(&self, specs: &[PromptSpec], deadline: Instant) -> Vec<CreativeRecord> {
        let mut slots: Vec<Option<CreativeRecord>> = vec![None; specs.len()];
        let mut jobs = JoinSet::new();
        for (index, spec) in specs.iter().cloned().enumerate() {
            let worker = self.worker.clone();
            jobs.spawn(async move { (index, worker.run_creative(spec, deadline).await) });
        }

        let collected = timeout_at(deadline + self.grace, async {
            while let Some(joined) = jobs.join_next().await {
                match joined {
                    Ok((index, record)) => slots[index] = Some(record),
                    Err(err) => error!("Creative job failed to join: {}", err),
                }
            }
        })
        .await;
        if collected.is_err() {
            warn!(
                "Batch grace period elapsed with {} creative job(s) outstanding; cancelling",
                jobs.len()
            );
        }
        jobs.abort_all();

        specs
            .iter()
            .zip(slots)
            .map(|(spec, slot)| slot.unwrap_or_else(|| self.worker.abandoned(spec.clone())))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::io::Cursor;
    use std::sync::atomic::AtomicUsize;

    use async_trait::async_trait;
    use chrono::NaiveDate;
    use image::{ImageFormat, Rgb, RgbImage};
    use parking_lot::Mutex;

    use super::*;
    use crate::llm::types::GeneratedImage;
    use crate::pipeline::brand::{BrandAsset, BrandProfile, Palette, PaletteExtractor};
    use crate::pipeline::context::{ContextModel, ContextTables};
    use crate::pipeline::prompt::PromptBuilder;
    use crate::pipeline::types::Location;

    struct NoPalette;

    impl PaletteExtractor for NoPalette {
        fn extract(&self, _asset: &BrandAsset) -> Option<Palette> {
            None
        }
    }

    fn png() -> Vec<u8> {
        let mut bytes = Vec::new();
        RgbImage::from_pixel(8, 8, Rgb([90, 40, 200]))
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .expect("encode png");
        bytes
    }

    fn specs(n: usize) -> Vec<PromptSpec> {
        let at = NaiveDate::from_ymd_opt(2024, 7, 14)
            .and_then(|date| date.and_hms_opt(9, 0, 0))
            .expect("valid date");
        let context = ContextModel::new(ContextTables::builtin(), "IN")
            .build(&Location::parse("Mumbai"), at);
        let brand = BrandProfile::build("Chai Co", "beverage", None, None, None, &NoPalette)
            .expect("brand");
        PromptBuilder::new(50)
            .expand(&context, &brand, n, "engaging")
            .expect("specs")
    }

    fn policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            base_delay: Duration::from_millis(100),
            attempt_timeout: Duration::from_secs(90),
        }
    }

    fn rules() -> CaptionRules {
        CaptionRules {
            min_length: 10,
            max_length: 150,
        }
    }

    fn orchestrator(
        images: Arc<dyn ImageGenerator>,
        captions: Arc<dyn TextGenerator>,
        pool_size: usize,
        max_retries: u32,
    ) -> Orchestrator {
        Orchestrator::new(
            images,
            captions,
            pool_size,
            policy(max_retries),
            rules(),
            "1:1",
            Duration::from_millis(500),
        )
    }

    /// Succeeds after `failures_before_success` failures of `kind` per id.
    struct FakeImages {
        png: Vec<u8>,
        kind: FailureKind,
        failures_before_success: usize,
        delay: Duration,
        calls: Mutex<HashMap<usize, usize>>,
    }

    impl FakeImages {
        fn healthy() -> Self {
            Self::failing(FailureKind::ServerError, 0)
        }

        fn failing(kind: FailureKind, failures_before_success: usize) -> Self {
            Self {
                png: png(),
                kind,
                failures_before_success,
                delay: Duration::ZERO,
                calls: Mutex::new(HashMap::new()),
            }
        }

        fn total_calls(&self) -> usize {
            self.calls.lock().values().sum()
        }
    }

    #[async_trait]
    impl ImageGenerator for FakeImages {
        fn name(&self) -> &str {
            "fake-images"
        }

        async fn generate_image(
            &self,
            request: &ImageRequest,
        ) -> Result<GeneratedImage, GenerationError> {
            let call = {
                let mut calls = self.calls.lock();
                let count = calls.entry(request.creative_id).or_default();
                *count += 1;
                *count
            };
            tokio::time::sleep(self.delay).await;
            if call <= self.failures_before_success {
                return Err(GenerationError::new(self.kind, "injected"));
            }
            Ok(GeneratedImage {
                bytes: self.png.clone(),
                mime_type: "image/png".to_string(),
            })
        }
    }

    /// Answers after a per-id delay; ids in `failing` get an auth error.
    struct FakeCaptions {
        delays: HashMap<usize, Duration>,
        failing: Vec<usize>,
        arrivals: Mutex<Vec<usize>>,
        calls: AtomicUsize,
    }

    impl FakeCaptions {
        fn new(delays: &[(usize, u64)], failing: &[usize]) -> Self {
            Self {
                delays: delays
                    .iter()
                    .map(|(id, ms)| (*id, Duration::from_millis(*ms)))
                    .collect(),
                failing: failing.to_vec(),
                arrivals: Mutex::new(Vec::new()),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl TextGenerator for FakeCaptions {
        fn name(&self) -> &str {
            "fake-captions"
        }

        async fn generate_text(&self, request: &TextRequest) -> Result<String, GenerationError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let id = request.creative_id.unwrap_or_default();
            if let Some(delay) = self.delays.get(&id) {
                tokio::time::sleep(*delay).await;
            }
            self.arrivals.lock().push(id);
            if self.failing.contains(&id) {
                return Err(GenerationError::new(FailureKind::Auth, "injected"));
            }
            Ok(format!("Fresh chai for every Mumbai morning, creative {id}. Try it today!"))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn caption_failures_degrade_only_their_records_and_keep_order() {
        let captions = Arc::new(FakeCaptions::new(
            &[(5, 10), (3, 20), (1, 30), (2, 40), (4, 50)],
            &[2, 4],
        ));
        let orchestrator = orchestrator(Arc::new(FakeImages::healthy()), captions.clone(), 10, 2);

        let records = orchestrator
            .run(&specs(5), Instant::now() + Duration::from_secs(60))
            .await;

        assert_eq!(*captions.arrivals.lock(), vec![5, 3, 1, 2, 4]);
        let ids: Vec<usize> = records.iter().map(|record| record.id).collect();
        assert_eq!(ids, vec![1, 2, 3, 4, 5]);
        for record in &records {
            if record.id == 2 || record.id == 4 {
                assert_eq!(record.status, CreativeStatus::DegradedCaption);
                assert_eq!(record.caption.source, CaptionSource::Fallback);
                assert!(!record.caption.text.is_empty());
                assert_eq!(record.caption_report.failure, Some(FailureKind::Auth));
                assert_eq!(record.caption_report.attempts, 1);
            } else {
                assert_eq!(record.status, CreativeStatus::Complete);
                assert!(matches!(record.image, ImageAsset::Generated { width: 8, .. }));
            }
        }
        assert_eq!(captions.calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn batch_returns_by_deadline_when_providers_hang() {
        let mut images = FakeImages::healthy();
        images.delay = Duration::from_secs(3600);
        let captions = FakeCaptions::new(
            &[(1, 3_600_000), (2, 3_600_000), (3, 3_600_000)],
            &[],
        );
        let orchestrator = orchestrator(Arc::new(images), Arc::new(captions), 2, 2);

        let started = Instant::now();
        let deadline = started + Duration::from_secs(5);
        let records = orchestrator.run(&specs(3), deadline).await;

        assert!(Instant::now() <= deadline + Duration::from_millis(500));
        assert_eq!(records.len(), 3);
        for record in &records {
            assert_eq!(record.status, CreativeStatus::DegradedBoth);
            assert!(record.image.is_placeholder());
            assert_eq!(
                record.image_report.failure,
                Some(FailureKind::DeadlineExceeded)
            );
        }
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_are_retried_until_success() {
        let images = Arc::new(FakeImages::failing(FailureKind::ServerError, 2));
        let captions = Arc::new(FakeCaptions::new(&[], &[]));
        let orchestrator = orchestrator(images.clone(), captions, 4, 2);

        let records = orchestrator
            .run(&specs(3), Instant::now() + Duration::from_secs(60))
            .await;

        assert_eq!(images.total_calls(), 9);
        for record in &records {
            assert_eq!(record.status, CreativeStatus::Complete);
            assert_eq!(record.image_report.attempts, 3);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_failures_are_not_retried() {
        let images = Arc::new(FakeImages::failing(FailureKind::Auth, usize::MAX));
        let captions = Arc::new(FakeCaptions::new(&[], &[]));
        let orchestrator = orchestrator(images.clone(), captions, 4, 2);

        let records = orchestrator
            .run(&specs(4), Instant::now() + Duration::from_secs(60))
            .await;

        assert_eq!(images.total_calls(), 4);
        for record in &records {
            assert_eq!(record.status, CreativeStatus::DegradedImage);
            assert_eq!(record.image_report.attempts, 1);
            assert!(record.image.is_placeholder());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn retries_stop_at_the_configured_limit() {
        let images = Arc::new(FakeImages::failing(FailureKind::RateLimited, usize::MAX));
        let captions = Arc::new(FakeCaptions::new(&[], &[]));
        let orchestrator = orchestrator(images.clone(), captions, 4, 1);

        let records = orchestrator
            .run(&specs(2), Instant::now() + Duration::from_secs(60))
            .await;

        assert_eq!(images.total_calls(), 4);
        assert!(records
            .iter()
            .all(|record| record.image_report.failure == Some(FailureKind::RateLimited)));
    }

    #[tokio::test(start_paused = true)]
    async fn queued_sub_jobs_are_not_dispatched_after_the_deadline() {
        let mut images = FakeImages::healthy();
        images.delay = Duration::from_secs(3600);
        let images = Arc::new(images);
        let captions = Arc::new(FakeCaptions::new(
            &[(1, 3_600_000), (2, 3_600_000), (3, 3_600_000), (4, 3_600_000)],
            &[],
        ));
        let orchestrator = orchestrator(images.clone(), captions.clone(), 1, 2);

        let deadline = Instant::now() + Duration::from_secs(5);
        let records = orchestrator.run(&specs(4), deadline).await;

        assert_eq!(
            images.total_calls() + captions.calls.load(Ordering::SeqCst),
            1
        );
        let issued: u32 = records
            .iter()
            .map(|record| record.image_report.attempts + record.caption_report.attempts)
            .sum();
        assert_eq!(issued, 1);
        for record in &records {
            assert_eq!(record.status, CreativeStatus::DegradedBoth);
            assert_eq!(
                record.caption_report.failure,
                Some(FailureKind::DeadlineExceeded)
            );
        }
    }

    /// Image and caption provider that records how many calls overlap.
    #[derive(Default)]
    struct GaugedProviders {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    impl GaugedProviders {
        async fn hold(&self) {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_secs(1)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl ImageGenerator for GaugedProviders {
        fn name(&self) -> &str {
            "gauged"
        }

        async fn generate_image(
            &self,
            _request: &ImageRequest,
        ) -> Result<GeneratedImage, GenerationError> {
            self.hold().await;
            Ok(GeneratedImage {
                bytes: png(),
                mime_type: "image/png".to_string(),
            })
        }
    }

    #[async_trait]
    impl TextGenerator for GaugedProviders {
        fn name(&self) -> &str {
            "gauged"
        }

        async fn generate_text(&self, request: &TextRequest) -> Result<String, GenerationError> {
            self.hold().await;
            Ok(format!(
                "Slow-brewed chai for creative {}, pour a cup today!",
                request.creative_id.unwrap_or_default()
            ))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn in_flight_calls_never_exceed_pool_size() {
        let providers = Arc::new(GaugedProviders::default());
        let orchestrator = orchestrator(providers.clone(), providers.clone(), 2, 2);

        let started = Instant::now();
        let records = orchestrator
            .run(&specs(6), started + Duration::from_secs(60))
            .await;

        assert_eq!(providers.peak.load(Ordering::SeqCst), 2);
        assert_eq!(providers.in_flight.load(Ordering::SeqCst), 0);
        assert!(records
            .iter()
            .all(|record| record.status == CreativeStatus::Complete));
        assert!(started.elapsed() >= Duration::from_secs(6));
    }
}

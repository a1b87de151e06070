use std::fmt::Write as _;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context as _, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::llm::media::{composite_logo, extension_for_mime, render_placeholder};
use crate::pipeline::audience::AudienceAdvice;
use crate::pipeline::brand::{BrandAsset, BrandProfile};
use crate::pipeline::context::Context;
use crate::pipeline::error::StudioError;
use crate::pipeline::orchestrator::{CreativeRecord, CreativeStatus, ImageAsset};
use crate::pipeline::prompt::{render_image_prompt, LayoutDirective};

const MAX_DIR_SUFFIX: usize = 1000;

#[derive(Debug, Clone, Serialize)]
pub struct ManifestEntry {
    pub id: usize,
    pub status: CreativeStatus,
    pub theme: String,
    pub layout: LayoutDirective,
    pub primary_color: String,
    pub accent_color: String,
    pub repeated: bool,
    pub parent_id: Option<usize>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub complete: usize,
    pub degraded_image: usize,
    pub degraded_caption: usize,
    pub degraded_both: usize,
}

impl StatusCounts {
    fn record(&mut self, status: CreativeStatus) {
        match status {
            CreativeStatus::Complete => self.complete += 1,
            CreativeStatus::DegradedImage => self.degraded_image += 1,
            CreativeStatus::DegradedCaption => self.degraded_caption += 1,
            CreativeStatus::DegradedBoth => self.degraded_both += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.complete + self.degraded_image + self.degraded_caption + self.degraded_both
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Manifest {
    pub requested: usize,
    pub generated_at: DateTime<Utc>,
    pub table_version: String,
    pub context: Context,
    pub brand: BrandProfile,
    pub audience: Option<AudienceAdvice>,
    pub status_counts: StatusCounts,
    pub entries: Vec<ManifestEntry>,
}

/// Final ordered bundle. Records are sorted by id and validated.
#[derive(Debug, Clone, Serialize)]
pub struct Package {
    pub manifest: Manifest,
    pub records: Vec<CreativeRecord>,
}

impl Package {
    pub fn degraded_ids(&self) -> Vec<usize> {
        self.records
            .iter()
            .filter(|record| record.status.is_degraded())
            .map(|record| record.id)
            .collect()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PackageAssembler;

impl PackageAssembler {
    pub fn assemble(
        &self,
        context: &Context,
        brand: &BrandProfile,
        requested: usize,
        mut records: Vec<CreativeRecord>,
        generated_at: DateTime<Utc>,
        audience: Option<AudienceAdvice>,
    ) -> Result<Package, StudioError> {
        records.sort_by_key(|record| record.id);

        if records.len() != requested {
            return Err(StudioError::violation(format!(
                "expected {} records, got {}",
                requested,
                records.len()
            )));
        }
        for (index, record) in records.iter().enumerate() {
            let expected = index + 1;
            if record.id != expected {
                return Err(StudioError::violation(format!(
                    "record ids are not contiguous: expected {}, found {}",
                    expected, record.id
                )));
            }
            if record.image.is_empty() {
                return Err(StudioError::violation(format!(
                    "record {} has no image reference",
                    record.id
                )));
            }
            if record.caption.text.trim().is_empty() {
                return Err(StudioError::violation(format!(
                    "record {} has no caption",
                    record.id
                )));
            }
        }

        let mut status_counts = StatusCounts::default();
        let entries = records
            .iter()
            .map(|record| {
                status_counts.record(record.status);
                ManifestEntry {
                    id: record.id,
                    status: record.status,
                    theme: record.spec.theme.label.clone(),
                    layout: record.spec.layout,
                    primary_color: record.spec.palette.primary.clone(),
                    accent_color: record.spec.palette.accent.clone(),
                    repeated: record.spec.repeated,
                    parent_id: record.spec.parent_id,
                }
            })
            .collect();

        Ok(Package {
            manifest: Manifest {
                requested,
                generated_at,
                table_version: context.table_version.clone(),
                context: context.clone(),
                brand: brand.clone(),
                audience,
                status_counts,
                entries,
            },
            records,
        })
    }
}

#[derive(Serialize)]
struct CreativeMetadata<'a> {
    image_file: &'a str,
    image_prompt: String,
    #[serde(flatten)]
    record: &'a CreativeRecord,
}

#[derive(Serialize)]
struct PackageMetadata<'a> {
    manifest: &'a Manifest,
    creatives: Vec<CreativeMetadata<'a>>,
}

pub fn brand_slug(name: &str) -> String {
    let mut slug = String::new();
    for ch in name.trim().chars() {
        if ch.is_ascii_alphanumeric() {
            slug.push(ch.to_ascii_lowercase());
        } else if !slug.ends_with('_') && !slug.is_empty() {
            slug.push('_');
        }
    }
    let slug = slug.trim_end_matches('_').to_string();
    if slug.is_empty() {
        "brand".to_string()
    } else {
        slug
    }
}

/// Renders the image bytes for one record: placeholders become gradients and
/// generated images get the brand logo.
fn render_record_image(
    record: &CreativeRecord,
    logo: Option<&[u8]>,
    placeholder_size: (u32, u32),
) -> Result<(String, Vec<u8>)> {
    match &record.image {
        ImageAsset::Placeholder {
            primary, accent, ..
        } => {
            let bytes = render_placeholder(primary, accent, placeholder_size.0, placeholder_size.1)
                .with_context(|| format!("Failed to render placeholder for creative {}", record.id))?;
            Ok(("png".to_string(), bytes))
        }
        ImageAsset::Generated {
            bytes, mime_type, ..
        } => {
            if let Some(logo) = logo {
                match composite_logo(bytes, logo, record.spec.layout.logo_corner()) {
                    Ok(composed) => return Ok(("png".to_string(), composed)),
                    Err(err) => warn!(
                        "Logo overlay failed for creative {}: {}; writing image without logo",
                        record.id, err
                    ),
                }
            }
            Ok((extension_for_mime(mime_type).to_string(), bytes.clone()))
        }
    }
}

fn render_readme(package: &Package, image_files: &[String]) -> String {
    let manifest = &package.manifest;
    let context = &manifest.context;
    let mut out = String::new();
    let _ = writeln!(out, "# {} creatives for {}\n", manifest.brand.name, context.location);
    let _ = writeln!(out, "- Category: {}", manifest.brand.category);
    let _ = writeln!(out, "- Generated at: {}", manifest.generated_at.to_rfc3339());
    let _ = writeln!(
        out,
        "- Context: {}, {}, {} / {} ({})",
        context.season.as_str(),
        context.time_of_day.as_str(),
        context.weather.as_str(),
        context.temperature_band.as_str(),
        context.weather_summary()
    );
    let _ = writeln!(
        out,
        "- Palette: {}",
        manifest
            .brand
            .palette
            .colors()
            .iter()
            .map(|color| color.hex.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    );
    let counts = manifest.status_counts;
    let _ = writeln!(
        out,
        "- Status: {} complete, {} degraded-image, {} degraded-caption, {} degraded-both\n",
        counts.complete, counts.degraded_image, counts.degraded_caption, counts.degraded_both
    );

    if let Some(advice) = &manifest.audience {
        let insight = advice.insight();
        let label = if advice.is_available() {
            "Audience"
        } else {
            "Audience (heuristic fallback)"
        };
        let _ = writeln!(out, "## {}\n", label);
        let _ = writeln!(out, "- Age group: {}", insight.age_group);
        let _ = writeln!(out, "- Demographics: {}", insight.demographics);
        let _ = writeln!(
            out,
            "- Recommended cities: {}\n",
            insight.recommended_cities.join(", ")
        );
    }

    let _ = writeln!(out, "## Creatives\n");
    let _ = writeln!(out, "| # | Status | Theme | Layout | Colors | Image | Caption |");
    let _ = writeln!(out, "|---|--------|-------|--------|--------|-------|---------|");
    for (record, file) in package.records.iter().zip(image_files) {
        let _ = writeln!(
            out,
            "| {} | {} | {} | {} | {} / {} | {} | {} |",
            record.id,
            record.status.as_str(),
            record.spec.theme.label,
            record.spec.layout.as_str(),
            record.spec.palette.primary,
            record.spec.palette.accent,
            file,
            record.caption.text.replace('|', "/")
        );
    }

    let degraded = package.degraded_ids();
    let _ = writeln!(out, "\n## Degraded creatives\n");
    if degraded.is_empty() {
        let _ = writeln!(out, "None. Every creative was fully generated.");
    } else {
        let ids = degraded
            .iter()
            .map(|id| id.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        let _ = writeln!(out, "Regenerate only these ids to refine the batch: {}", ids);
    }
    out
}

/// Writes a [`Package`] to disk:
/// `images/creative_NN.<ext>`, `captions.txt`, `metadata.json`, `README.md`.
#[derive(Debug, Clone)]
pub struct PackageWriter {
    root: PathBuf,
    placeholder_size: (u32, u32),
}

impl PackageWriter {
    pub fn new(root: impl Into<PathBuf>, placeholder_size: (u32, u32)) -> Self {
        Self {
            root: root.into(),
            placeholder_size,
        }
    }

    /// Preferred directory name; [`PackageWriter::write`] appends `_2`, `_3`,
    /// ... when it is already taken.
    pub fn package_dir(&self, package: &Package) -> PathBuf {
        self.root.join(format!(
            "{}_creatives_{}",
            brand_slug(&package.manifest.brand.name),
            package.manifest.generated_at.format("%Y%m%d_%H%M%S")
        ))
    }

    pub async fn write(&self, package: &Package, logo: Option<&BrandAsset>) -> Result<PathBuf> {
        let dir = self.claim_dir(package).await?;
        let images_dir = dir.join("images");
        tokio::fs::create_dir(&images_dir)
            .await
            .with_context(|| format!("Failed to create {}", images_dir.display()))?;

        let records = package.records.clone();
        let logo_bytes = logo.map(|asset| asset.bytes.clone());
        let size = self.placeholder_size;
        let rendered = tokio::task::spawn_blocking(move || {
            records
                .iter()
                .map(|record| render_record_image(record, logo_bytes.as_deref(), size))
                .collect::<Result<Vec<_>>>()
        })
        .await
        .context("Image rendering task failed")??;

        let mut image_files = Vec::with_capacity(rendered.len());
        for (record, (extension, bytes)) in package.records.iter().zip(rendered) {
            let file_name = format!("creative_{:02}.{}", record.id, extension);
            write_file(&images_dir.join(&file_name), &bytes).await?;
            image_files.push(format!("images/{}", file_name));
        }

        let captions: String = package
            .records
            .iter()
            .map(|record| {
                let line = record
                    .caption
                    .text
                    .split_whitespace()
                    .collect::<Vec<_>>()
                    .join(" ");
                format!("{}\n", line)
            })
            .collect();
        write_file(&dir.join("captions.txt"), captions.as_bytes()).await?;

        let metadata = PackageMetadata {
            manifest: &package.manifest,
            creatives: package
                .records
                .iter()
                .zip(&image_files)
                .map(|(record, file)| CreativeMetadata {
                    image_file: file,
                    image_prompt: render_image_prompt(&record.spec),
                    record,
                })
                .collect(),
        };
        let metadata_json =
            serde_json::to_vec_pretty(&metadata).context("Failed to serialize metadata")?;
        write_file(&dir.join("metadata.json"), &metadata_json).await?;

        let readme = render_readme(package, &image_files);
        write_file(&dir.join("README.md"), readme.as_bytes()).await?;

        info!(
            "Wrote {} creative(s) to {} ({} degraded)",
            package.records.len(),
            dir.display(),
            package.degraded_ids().len()
        );
        Ok(dir)
    }

    /// Creates a fresh package directory. Creation itself is the existence
    /// check, so concurrent writers never share a directory.
    async fn claim_dir(&self, package: &Package) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .with_context(|| format!("Failed to create {}", self.root.display()))?;
        let base = self.package_dir(package);
        for suffix in 1..=MAX_DIR_SUFFIX {
            let candidate = if suffix == 1 {
                base.clone()
            } else {
                let mut name = base.clone().into_os_string();
                name.push(format!("_{}", suffix));
                PathBuf::from(name)
            };
            match tokio::fs::create_dir(&candidate).await {
                Ok(()) => return Ok(candidate),
                Err(err) if err.kind() == ErrorKind::AlreadyExists => continue,
                Err(err) => {
                    return Err(err)
                        .with_context(|| format!("Failed to create {}", candidate.display()));
                }
            }
        }
        bail!(
            "No free package directory next to {} after {} tries",
            base.display(),
            MAX_DIR_SUFFIX
        )
    }
}

async fn write_file(path: &Path, bytes: &[u8]) -> Result<()> {
    tokio::fs::write(path, bytes)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, TimeZone};
    use serde_json::Value;

    use super::*;
    use crate::pipeline::brand::{Palette, PaletteExtractor};
    use crate::pipeline::context::{ContextModel, ContextTables};
    use crate::pipeline::orchestrator::{Caption, CaptionSource, SubJobReport};
    use crate::pipeline::prompt::PromptBuilder;
    use crate::pipeline::types::Location;

    struct NoPalette;

    impl PaletteExtractor for NoPalette {
        fn extract(&self, _asset: &BrandAsset) -> Option<Palette> {
            None
        }
    }

    fn report() -> SubJobReport {
        SubJobReport {
            attempts: 1,
            failure: None,
            detail: None,
        }
    }

    fn fixtures(n: usize) -> (Context, BrandProfile, Vec<CreativeRecord>) {
        let at = NaiveDate::from_ymd_opt(2024, 12, 20)
            .and_then(|date| date.and_hms_opt(11, 0, 0))
            .expect("valid date");
        let context = ContextModel::new(ContextTables::builtin(), "IN")
            .build(&Location::parse("Delhi"), at);
        let brand = BrandProfile::build("Chai & Co.", "beverage", None, None, None, &NoPalette)
            .expect("brand");
        let records = PromptBuilder::new(50)
            .expand(&context, &brand, n, "engaging")
            .expect("specs")
            .into_iter()
            .map(|spec| {
                let degraded = spec.id % 2 == 0;
                CreativeRecord {
                    id: spec.id,
                    status: if degraded {
                        CreativeStatus::DegradedImage
                    } else {
                        CreativeStatus::Complete
                    },
                    image: if degraded {
                        ImageAsset::placeholder(&spec)
                    } else {
                        ImageAsset::Generated {
                            bytes: render_placeholder("#112233", "#445566", 16, 16)
                                .expect("png"),
                            mime_type: "image/png".to_string(),
                            width: 16,
                            height: 16,
                        }
                    },
                    caption: Caption {
                        text: format!("Caption number {}\nwith a break", spec.id),
                        source: CaptionSource::Generated,
                    },
                    rationale: spec.rationale(!degraded, true),
                    spec,
                    image_report: report(),
                    caption_report: report(),
                }
            })
            .collect();
        (context, brand, records)
    }

    fn generated_at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 12, 20, 11, 5, 9).single().expect("timestamp")
    }

    fn assemble(
        context: &Context,
        brand: &BrandProfile,
        requested: usize,
        records: Vec<CreativeRecord>,
    ) -> Result<Package, StudioError> {
        PackageAssembler.assemble(context, brand, requested, records, generated_at(), None)
    }

    #[test]
    fn assembles_in_id_order_with_consistent_counts() {
        let (context, brand, mut records) = fixtures(5);
        records.reverse();
        let package = assemble(&context, &brand, 5, records).expect("package");
        let ids: Vec<usize> = package.records.iter().map(|record| record.id).collect();
        assert_eq!(ids, vec![1, 2, 3, 4, 5]);
        assert_eq!(package.manifest.entries.len(), 5);
        assert_eq!(package.manifest.status_counts.total(), 5);
        assert_eq!(package.manifest.status_counts.degraded_image, 2);
        assert_eq!(package.degraded_ids(), vec![2, 4]);
    }

    #[test]
    fn rejects_missing_id() {
        let (context, brand, mut records) = fixtures(5);
        records.retain(|record| record.id != 3);
        let err = assemble(&context, &brand, 5, records).expect_err("missing id 3");
        assert!(matches!(err, StudioError::PackagingInvariantViolation(_)));
    }

    #[test]
    fn rejects_duplicate_ids_even_with_matching_count() {
        let (context, brand, mut records) = fixtures(5);
        records[2].id = 2;
        let err = assemble(&context, &brand, 5, records).expect_err("duplicate");
        assert!(matches!(err, StudioError::PackagingInvariantViolation(_)));
    }

    #[test]
    fn rejects_empty_image_or_caption() {
        let (context, brand, mut records) = fixtures(5);
        records[0].image = ImageAsset::Generated {
            bytes: Vec::new(),
            mime_type: "image/png".to_string(),
            width: 0,
            height: 0,
        };
        assert!(matches!(
            assemble(&context, &brand, 5, records),
            Err(StudioError::PackagingInvariantViolation(_))
        ));

        let (context, brand, mut records) = fixtures(3);
        records[1].caption.text = "  ".to_string();
        assert!(assemble(&context, &brand, 3, records).is_err());
    }

    #[test]
    fn slugs_brand_names() {
        assert_eq!(brand_slug("Chai & Co."), "chai_co");
        assert_eq!(brand_slug("  "), "brand");
    }

    #[tokio::test]
    async fn writes_aligned_package_files() {
        let (context, brand, records) = fixtures(4);
        let package = assemble(&context, &brand, 4, records).expect("package");
        let temp = tempfile::tempdir().expect("tempdir");
        let writer = PackageWriter::new(temp.path(), (32, 32));

        let dir = writer.write(&package, None).await.expect("write");
        assert!(dir.ends_with("chai_co_creatives_20241220_110509"));

        for id in 1..=4 {
            assert!(dir.join(format!("images/creative_{:02}.png", id)).is_file());
        }
        let captions = std::fs::read_to_string(dir.join("captions.txt")).expect("captions");
        let lines: Vec<&str> = captions.lines().collect();
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[2], "Caption number 3 with a break");

        let metadata: Value = serde_json::from_slice(
            &std::fs::read(dir.join("metadata.json")).expect("metadata"),
        )
        .expect("json");
        assert_eq!(metadata["manifest"]["entries"].as_array().map(Vec::len), Some(4));
        assert_eq!(metadata["creatives"][1]["status"], "degraded-image");
        assert_eq!(metadata["creatives"][1]["image_file"], "images/creative_02.png");

        let readme = std::fs::read_to_string(dir.join("README.md")).expect("readme");
        assert!(readme.contains("Regenerate only these ids to refine the batch: 2, 4"));
    }

    #[tokio::test]
    async fn same_second_packages_get_separate_directories() {
        let (context, brand, records) = fixtures(2);
        let package = assemble(&context, &brand, 2, records).expect("package");
        let temp = tempfile::tempdir().expect("tempdir");
        let writer = PackageWriter::new(temp.path().join("out"), (32, 32));

        let first = writer.write(&package, None).await.expect("first write");
        let second = writer.write(&package, None).await.expect("second write");
        let third = writer.write(&package, None).await.expect("third write");

        assert_eq!(first, writer.package_dir(&package));
        assert!(second.ends_with("chai_co_creatives_20241220_110509_2"));
        assert!(third.ends_with("chai_co_creatives_20241220_110509_3"));
        for dir in [&first, &second, &third] {
            assert!(dir.join("captions.txt").is_file());
            assert!(dir.join("images/creative_02.png").is_file());
        }
    }
}

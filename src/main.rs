use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context as _};
use chrono::{Local, NaiveDateTime};
use dotenvy::dotenv;
use tracing::{error, info};

mod config;
mod llm;
mod pipeline;
mod studio;
mod utils;

use config::Config;
use llm::media::{detect_mime_type, download_media};
use pipeline::brand::BrandAsset;
use pipeline::package::PackageWriter;
use pipeline::types::Location;
use studio::{CreativeRequest, Studio};
use utils::logging::init_logging;

fn usage() -> &'static str {
    "Usage:\n  creative-studio generate --brand <name> --category <category> [--city <city>] [--region <region>] [--country <code>] [--count <n>] [--tone <tone>] [--logo <path|url>] [--product <path|url>] [--description <text>] [--analyze-audience] [--at <YYYY-MM-DDTHH:MM>] [--output <dir>]\n  creative-studio audience --brand <name> --category <category> [--description <text>]"
}

#[derive(Debug, Default)]
struct GenerateArgs {
    brand: Option<String>,
    category: Option<String>,
    city: Option<String>,
    region: Option<String>,
    country: Option<String>,
    count: Option<usize>,
    tone: Option<String>,
    logo: Option<String>,
    product: Option<String>,
    description: Option<String>,
    analyze_audience: bool,
    at: Option<NaiveDateTime>,
    output: Option<PathBuf>,
}

#[derive(Debug)]
enum Command {
    Generate(GenerateArgs),
    Audience {
        brand: String,
        category: String,
        description: Option<String>,
    },
}

fn parse_at(value: &str) -> anyhow::Result<NaiveDateTime> {
    NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M")
        .or_else(|_| NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S"))
        .map_err(|_| anyhow!("Invalid --at value: {value} (expected YYYY-MM-DDTHH:MM)"))
}

fn parse_args(args: &[String]) -> anyhow::Result<Command> {
    let subcommand = args.get(1).map(|value| value.as_str());
    let mut parsed = GenerateArgs::default();

    let mut index = 2;
    while index < args.len() {
        let flag = args[index].as_str();
        let mut value = || -> anyhow::Result<String> {
            index += 1;
            args.get(index)
                .cloned()
                .ok_or_else(|| anyhow!("Missing value for {flag}"))
        };
        match flag {
            "--brand" => parsed.brand = Some(value()?),
            "--category" => parsed.category = Some(value()?),
            "--city" => parsed.city = Some(value()?),
            "--region" => parsed.region = Some(value()?),
            "--country" => parsed.country = Some(value()?),
            "--count" => {
                let raw = value()?;
                parsed.count = Some(
                    raw.parse::<usize>()
                        .map_err(|_| anyhow!("Invalid --count value: {raw}"))?,
                );
            }
            "--tone" => parsed.tone = Some(value()?),
            "--logo" => parsed.logo = Some(value()?),
            "--product" => parsed.product = Some(value()?),
            "--description" => parsed.description = Some(value()?),
            "--analyze-audience" => parsed.analyze_audience = true,
            "--at" => parsed.at = Some(parse_at(&value()?)?),
            "--output" => parsed.output = Some(PathBuf::from(value()?)),
            "--help" | "-h" => bail!(usage()),
            other => bail!("Unknown argument: {other}\n{}", usage()),
        }
        index += 1;
    }

    match subcommand {
        Some("generate") => Ok(Command::Generate(parsed)),
        Some("audience") => Ok(Command::Audience {
            brand: parsed.brand.ok_or_else(|| anyhow!("--brand is required"))?,
            category: parsed
                .category
                .ok_or_else(|| anyhow!("--category is required"))?,
            description: parsed.description,
        }),
        _ => bail!(usage()),
    }
}

/// Reads a brand image from a local path or fetches it from a URL.
async fn load_asset(reference: &str) -> anyhow::Result<BrandAsset> {
    let bytes = if reference.starts_with("http://") || reference.starts_with("https://") {
        download_media(reference)
            .await
            .ok_or_else(|| anyhow!("Failed to download {reference}"))?
    } else {
        tokio::fs::read(Path::new(reference))
            .await
            .with_context(|| format!("Failed to read {reference}"))?
    };
    let mime_type =
        detect_mime_type(&bytes).unwrap_or_else(|| "application/octet-stream".to_string());
    Ok(BrandAsset {
        reference: reference.to_string(),
        mime_type,
        bytes,
    })
}

async fn load_optional_asset(reference: Option<&str>) -> anyhow::Result<Option<BrandAsset>> {
    match reference {
        Some(reference) => Ok(Some(load_asset(reference).await?)),
        None => Ok(None),
    }
}

/// `--city` may be left out only when the audience advisor can pick one.
fn resolve_city(city: Option<String>, analyze_audience: bool) -> anyhow::Result<String> {
    match city {
        Some(city) if !city.trim().is_empty() => Ok(city),
        _ if analyze_audience => Ok(String::new()),
        _ => bail!("--city is required unless --analyze-audience is set"),
    }
}

async fn run_generate(studio: &Studio, args: GenerateArgs) -> anyhow::Result<()> {
    let config = studio.config();
    let brand = args.brand.ok_or_else(|| anyhow!("--brand is required"))?;
    let category = args
        .category
        .ok_or_else(|| anyhow!("--category is required"))?;
    let city = resolve_city(args.city, args.analyze_audience)?;

    let logo = load_optional_asset(args.logo.as_deref()).await?;
    let product = load_optional_asset(args.product.as_deref()).await?;

    let request = CreativeRequest {
        brand_name: brand,
        category,
        description: args.description,
        location: Location::new(&city, args.region.as_deref(), args.country.as_deref()),
        count: args.count.unwrap_or(config.default_creatives),
        caption_tone: args.tone.unwrap_or_else(|| "engaging".to_string()),
        logo: logo.clone(),
        product,
        analyze_audience: args.analyze_audience,
        requested_at: args.at.unwrap_or_else(|| Local::now().naive_local()),
    };

    let package = studio.generate(request).await?;
    let writer = PackageWriter::new(
        args.output.unwrap_or_else(|| config.output_dir.clone()),
        config.image_dimensions(),
    );
    let dir = writer.write(&package, logo.as_ref()).await?;

    let counts = package.manifest.status_counts;
    println!("Package written to {}", dir.display());
    println!("Target city: {}", package.manifest.context.location.city);
    println!(
        "{} creative(s): {} complete, {} degraded",
        counts.total(),
        counts.complete,
        counts.total() - counts.complete
    );
    let degraded = package.degraded_ids();
    if !degraded.is_empty() {
        println!("Degraded ids: {:?}", degraded);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    let _guards = init_logging(&Config::startup_log_level(), Path::new("logs"));
    let config = Config::load();

    let args: Vec<String> = std::env::args().collect();
    let command = parse_args(&args)?;
    info!("Starting creative-studio");

    let studio = Studio::from_config(config);
    let result = match command {
        Command::Generate(generate) => run_generate(&studio, generate).await,
        Command::Audience {
            brand,
            category,
            description,
        } => {
            let advice = studio
                .analyze_audience(&brand, &category, description.as_deref())
                .await;
            println!("{}", serde_json::to_string_pretty(&advice)?);
            Ok(())
        }
    };
    if let Err(err) = &result {
        error!("creative-studio failed: {err:#}");
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(values: &[&str]) -> Vec<String> {
        std::iter::once("creative-studio")
            .chain(values.iter().copied())
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn parses_generate_flags() {
        let command = parse_args(&args(&[
            "generate",
            "--brand",
            "Chai Co",
            "--category",
            "beverage",
            "--city",
            "Pune",
            "--count",
            "12",
            "--analyze-audience",
            "--at",
            "2024-10-02T08:15",
        ]))
        .expect("parsed");
        match command {
            Command::Generate(parsed) => {
                assert_eq!(parsed.brand.as_deref(), Some("Chai Co"));
                assert_eq!(parsed.count, Some(12));
                assert!(parsed.analyze_audience);
                assert_eq!(
                    parsed.at.map(|at| at.format("%H:%M").to_string()),
                    Some("08:15".to_string())
                );
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn rejects_unknown_flags_and_missing_values() {
        assert!(parse_args(&args(&["generate", "--colour", "red"])).is_err());
        assert!(parse_args(&args(&["generate", "--count"])).is_err());
        assert!(parse_args(&args(&["generate", "--count", "many"])).is_err());
        assert!(parse_args(&args(&["audience", "--brand", "Chai Co"])).is_err());
        assert!(parse_args(&args(&[])).is_err());
    }

    #[test]
    fn city_may_be_left_to_the_audience_advisor() {
        assert_eq!(resolve_city(Some("Pune".into()), false).expect("city"), "Pune");
        assert_eq!(resolve_city(None, true).expect("deferred"), "");
        assert!(resolve_city(None, false).is_err());
        assert!(resolve_city(Some("  ".into()), false).is_err());
    }
}

use std::io::Cursor;
use std::time::Duration;

use image::imageops::{self, FilterType};
use image::{ImageFormat, ImageReader, ImageResult, Rgb, RgbImage};
use reqwest::StatusCode;
use tracing::{error, warn};

use crate::pipeline::brand::parse_hex;
use crate::pipeline::prompt::Corner;
use crate::utils::http::get_http_client;

pub fn detect_mime_type(data: &[u8]) -> Option<String> {
    infer::get(data).map(|kind| kind.mime_type().to_string())
}

pub fn extension_for_mime(mime_type: &str) -> &'static str {
    match mime_type {
        "image/jpeg" => "jpg",
        "image/webp" => "webp",
        "image/gif" => "gif",
        _ => "png",
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageInfo {
    pub mime_type: String,
    pub width: u32,
    pub height: u32,
}

/// Basic validity check: a known image type whose header decodes to
/// non-zero dimensions.
pub fn inspect_image(data: &[u8]) -> Option<ImageInfo> {
    let mime_type = detect_mime_type(data).filter(|mime| mime.starts_with("image/"))?;
    let (width, height) = ImageReader::new(Cursor::new(data))
        .with_guessed_format()
        .ok()?
        .into_dimensions()
        .ok()?;
    if width == 0 || height == 0 {
        return None;
    }
    Some(ImageInfo {
        mime_type,
        width,
        height,
    })
}

fn encode_png(image: &image::DynamicImage) -> ImageResult<Vec<u8>> {
    let mut bytes = Vec::new();
    image.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)?;
    Ok(bytes)
}

/// Vertical gradient from `primary` (top) to `accent` (bottom). Unparseable
/// colors render as mid grey.
pub fn render_placeholder(primary: &str, accent: &str, width: u32, height: u32) -> ImageResult<Vec<u8>> {
    let top = parse_hex(primary).unwrap_or([128, 128, 128]);
    let bottom = parse_hex(accent).unwrap_or([128, 128, 128]);
    let span = height.saturating_sub(1).max(1) as f32;
    let canvas = RgbImage::from_fn(width.max(1), height.max(1), |_, y| {
        let t = y as f32 / span;
        let channel = |i: usize| (top[i] as f32 + (bottom[i] as f32 - top[i] as f32) * t).round() as u8;
        Rgb([channel(0), channel(1), channel(2)])
    });
    encode_png(&image::DynamicImage::ImageRgb8(canvas))
}

/// Overlays `logo` on `base` at `corner`, scaled to a fifth of the base
/// width. Output is PNG.
pub fn composite_logo(base: &[u8], logo: &[u8], corner: Corner) -> ImageResult<Vec<u8>> {
    let mut canvas = image::load_from_memory(base)?.to_rgba8();
    let logo = image::load_from_memory(logo)?;
    let max_edge = (canvas.width() / 5).max(1);
    let logo = logo.resize(max_edge, max_edge, FilterType::Lanczos3).to_rgba8();

    let margin = (canvas.width() / 40) as i64;
    let right = canvas.width() as i64 - logo.width() as i64 - margin;
    let bottom = canvas.height() as i64 - logo.height() as i64 - margin;
    let (x, y) = match corner {
        Corner::TopLeft => (margin, margin),
        Corner::TopRight => (right, margin),
        Corner::BottomLeft => (margin, bottom),
        Corner::BottomRight => (right, bottom),
    };
    imageops::overlay(&mut canvas, &logo, x.max(0), y.max(0));
    encode_png(&image::DynamicImage::ImageRgba8(canvas))
}

const MEDIA_DOWNLOAD_MAX_ATTEMPTS: usize = 3;
const MEDIA_DOWNLOAD_BASE_DELAY_MS: u64 = 400;
const MEDIA_DOWNLOAD_ERROR_BODY_LIMIT: usize = 800;

fn truncate_for_log(value: &str, limit: usize) -> String {
    if value.chars().count() <= limit {
        return value.to_string();
    }
    let truncated: String = value.chars().take(limit).collect();
    format!("{truncated}... (truncated)")
}

fn should_retry_status(status: StatusCode) -> bool {
    status.is_server_error()
        || status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
}

fn should_retry_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect()
}

/// Fetches a brand asset by URL, retrying transient failures with
/// exponential backoff.
pub async fn download_media(url: &str) -> Option<Vec<u8>> {
    let client = get_http_client();
    for attempt in 0..MEDIA_DOWNLOAD_MAX_ATTEMPTS {
        let backoff = Duration::from_millis(MEDIA_DOWNLOAD_BASE_DELAY_MS << attempt);
        let response = match client.get(url).send().await {
            Ok(resp) => resp,
            Err(err) => {
                warn!(
                    "Failed to fetch media {url}: {err} (timeout={}, connect={}, attempt={}/{})",
                    err.is_timeout(),
                    err.is_connect(),
                    attempt + 1,
                    MEDIA_DOWNLOAD_MAX_ATTEMPTS
                );
                if !should_retry_error(&err) || attempt + 1 == MEDIA_DOWNLOAD_MAX_ATTEMPTS {
                    return None;
                }
                tokio::time::sleep(backoff).await;
                continue;
            }
        };

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            warn!(
                "Media download failed for {url} with status {}: {}",
                status,
                truncate_for_log(&body, MEDIA_DOWNLOAD_ERROR_BODY_LIMIT)
            );
            if !should_retry_status(status) || attempt + 1 == MEDIA_DOWNLOAD_MAX_ATTEMPTS {
                return None;
            }
            tokio::time::sleep(backoff).await;
            continue;
        }

        match response.bytes().await {
            Ok(bytes) => return Some(bytes.to_vec()),
            Err(err) => {
                error!(
                    "Failed to read media bytes {url}: {err} (attempt={}/{})",
                    attempt + 1,
                    MEDIA_DOWNLOAD_MAX_ATTEMPTS
                );
                if attempt + 1 == MEDIA_DOWNLOAD_MAX_ATTEMPTS {
                    return None;
                }
                tokio::time::sleep(backoff).await;
            }
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use image::{GenericImageView, Rgba, RgbaImage};

    use super::*;

    #[test]
    fn placeholder_is_a_deterministic_gradient() {
        let first = render_placeholder("#000000", "#ffffff", 4, 11).expect("render");
        let second = render_placeholder("#000000", "#ffffff", 4, 11).expect("render");
        assert_eq!(first, second);

        let info = inspect_image(&first).expect("valid png");
        assert_eq!(info.mime_type, "image/png");
        assert_eq!((info.width, info.height), (4, 11));

        let decoded = image::load_from_memory(&first).expect("decode");
        assert_eq!(decoded.get_pixel(0, 0).0, [0, 0, 0, 255]);
        assert_eq!(decoded.get_pixel(0, 10).0, [255, 255, 255, 255]);
    }

    #[test]
    fn rejects_non_images() {
        assert!(inspect_image(b"not an image at all").is_none());
        assert!(inspect_image(&[]).is_none());
        assert_eq!(extension_for_mime("image/jpeg"), "jpg");
        assert_eq!(extension_for_mime("application/octet-stream"), "png");
    }

    #[test]
    fn logo_lands_in_requested_corner() {
        let base = render_placeholder("#ffffff", "#ffffff", 200, 200).expect("base");
        let mut logo_bytes = Vec::new();
        RgbaImage::from_pixel(10, 10, Rgba([255, 0, 0, 255]))
            .write_to(&mut Cursor::new(&mut logo_bytes), ImageFormat::Png)
            .expect("logo");

        let composed = composite_logo(&base, &logo_bytes, Corner::BottomLeft).expect("composite");
        let decoded = image::load_from_memory(&composed).expect("decode");
        assert_eq!(decoded.dimensions(), (200, 200));
        let [r, g, b, _] = decoded.get_pixel(20, 180).0;
        assert!(r > 200 && g < 60 && b < 60, "expected logo red, got {r},{g},{b}");
        assert_eq!(decoded.get_pixel(180, 20).0, [255, 255, 255, 255]);
    }
}

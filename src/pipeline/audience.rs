use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::llm::types::{TextGenerator, TextRequest};

static FENCED_BLOCK: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"(?s)```(?:json|JSON)?\s*(.*?)```").ok());

const ADVISOR_SYSTEM_PROMPT: &str =
    "You are a marketing strategist. Reply with a single JSON object and nothing else.";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AudienceInsight {
    pub age_group: String,
    pub demographics: String,
    pub regions: Vec<String>,
    pub insights: String,
    pub recommended_cities: Vec<String>,
}

impl AudienceInsight {
    /// Static category → demographic mapping used when the model is
    /// unavailable.
    pub fn heuristic(category: &str) -> Self {
        let lowered = category.to_lowercase();
        let has = |needles: &[&str]| needles.iter().any(|needle| lowered.contains(needle));
        let (age_group, demographics, cities) = if has(&["beverage", "drink", "food", "snack"]) {
            (
                "18-35 years",
                "Young urban professionals and students",
                ["Bangalore", "Mumbai", "Pune"],
            )
        } else if has(&["beauty", "skincare", "cosmetic", "fashion", "apparel"]) {
            (
                "18-35 years",
                "Style-conscious young adults",
                ["Mumbai", "Delhi", "Bangalore"],
            )
        } else if has(&["tech", "electronic", "gadget", "software"]) {
            (
                "22-40 years",
                "Tech-savvy working professionals",
                ["Bangalore", "Hyderabad", "Pune"],
            )
        } else {
            (
                "25-45 years",
                "Urban professionals and young families",
                ["Bangalore", "Mumbai", "Delhi"],
            )
        };
        Self {
            age_group: age_group.to_string(),
            demographics: demographics.to_string(),
            regions: vec!["Metropolitan cities".to_string(), "Tier 1 cities".to_string()],
            insights: format!("Target audience for {} in urban markets.", category.trim()),
            recommended_cities: cities.iter().map(|city| city.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AudienceAdvice {
    Insight(AudienceInsight),
    Unavailable {
        fallback: AudienceInsight,
        reason: String,
    },
}

impl AudienceAdvice {
    /// Heuristic advice for `category`, tagged with why the model was not used.
    pub fn unavailable(category: &str, reason: impl Into<String>) -> Self {
        Self::Unavailable {
            fallback: AudienceInsight::heuristic(category),
            reason: reason.into(),
        }
    }

    pub fn insight(&self) -> &AudienceInsight {
        match self {
            Self::Insight(insight) => insight,
            Self::Unavailable { fallback, .. } => fallback,
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self, Self::Insight(_))
    }

    /// The advisor's first recommended city, used when no city was given.
    pub fn lead_city(&self) -> Option<&str> {
        self.insight()
            .recommended_cities
            .iter()
            .map(|city| city.trim())
            .find(|city| !city.is_empty())
    }
}

fn strip_fences(text: &str) -> &str {
    FENCED_BLOCK
        .as_ref()
        .and_then(|re| re.captures(text))
        .and_then(|captures| captures.get(1))
        .map(|block| block.as_str())
        .unwrap_or(text)
        .trim()
}

fn text_field(value: &Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| match value.get(*key)? {
        Value::String(text) if !text.trim().is_empty() => Some(text.trim().to_string()),
        Value::Null | Value::String(_) => None,
        Value::Array(items) => Some(
            items
                .iter()
                .map(|item| item.as_str().map(str::to_string).unwrap_or_else(|| item.to_string()))
                .collect::<Vec<_>>()
                .join(", "),
        ),
        other => Some(other.to_string()),
    })
}

fn list_field(value: &Value, keys: &[&str]) -> Vec<String> {
    keys.iter()
        .find_map(|key| match value.get(*key)? {
            Value::Array(items) => Some(
                items
                    .iter()
                    .filter_map(|item| item.as_str())
                    .map(|item| item.trim().to_string())
                    .filter(|item| !item.is_empty())
                    .collect(),
            ),
            Value::String(text) => Some(
                text.split(',')
                    .map(|item| item.trim().to_string())
                    .filter(|item| !item.is_empty())
                    .collect(),
            ),
            _ => None,
        })
        .unwrap_or_default()
}

/// Parses a model reply, tolerating fenced code blocks and loosely typed
/// fields. `None` when the reply is not a usable JSON object.
pub fn parse_insight(text: &str) -> Option<AudienceInsight> {
    let value: Value = serde_json::from_str(strip_fences(text)).ok()?;
    if !value.is_object() {
        return None;
    }
    let recommended_cities = list_field(&value, &["recommended_cities", "cities", "top_cities"]);
    let age_group = text_field(&value, &["age_group", "primary_age_group", "age"]);
    if recommended_cities.is_empty() && age_group.is_none() {
        return None;
    }
    Some(AudienceInsight {
        age_group: age_group.unwrap_or_else(|| "unspecified".to_string()),
        demographics: text_field(&value, &["demographics"]).unwrap_or_default(),
        regions: list_field(&value, &["regions", "best_regions"]),
        insights: text_field(&value, &["insights", "key_insights"]).unwrap_or_default(),
        recommended_cities,
    })
}

/// Optional advisory step. Never fails: every error becomes
/// [`AudienceAdvice::Unavailable`] with the heuristic fallback.
pub struct AudienceAdvisor {
    text: Arc<dyn TextGenerator>,
    timeout: Duration,
}

impl AudienceAdvisor {
    pub fn new(text: Arc<dyn TextGenerator>, timeout: Duration) -> Self {
        Self { text, timeout }
    }

    pub async fn recommend(
        &self,
        brand_name: &str,
        category: &str,
        description: Option<&str>,
    ) -> AudienceAdvice {
        let request = TextRequest {
            creative_id: None,
            system_prompt: ADVISOR_SYSTEM_PROMPT.to_string(),
            prompt: format!(
                "Analyze the target audience for this brand:\n\n\
Brand Name: {}\n\
Product Category: {}\n\
Company Description: {}\n\n\
Provide a JSON object with the keys:\n\
- \"age_group\": primary age group (e.g. \"18-25\", \"25-35\")\n\
- \"demographics\": lifestyle, income level, interests\n\
- \"regions\": best regions for marketing\n\
- \"insights\": key insights about customer behavior\n\
- \"recommended_cities\": top 3 cities for this product\n\n\
Return ONLY valid JSON, no other text.",
                brand_name,
                category,
                description.unwrap_or("Not provided")
            ),
        };

        let unavailable = |reason: String| {
            warn!("Audience advisor unavailable: {}", reason);
            AudienceAdvice::unavailable(category, reason)
        };

        match tokio::time::timeout(self.timeout, self.text.generate_text(&request)).await {
            Err(_) => unavailable(format!("timed out after {:?}", self.timeout)),
            Ok(Err(err)) => unavailable(err.to_string()),
            Ok(Ok(reply)) => match parse_insight(&reply) {
                Some(insight) => {
                    info!(
                        "Audience advisor recommends {}",
                        insight.recommended_cities.join(", ")
                    );
                    AudienceAdvice::Insight(insight)
                }
                None => unavailable("malformed advisor response".to_string()),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::llm::types::{FailureKind, GenerationError};

    enum Reply {
        Text(&'static str),
        Fail(FailureKind),
        Hang,
    }

    struct ScriptedText(Reply);

    #[async_trait]
    impl TextGenerator for ScriptedText {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn generate_text(&self, _request: &TextRequest) -> Result<String, GenerationError> {
            match &self.0 {
                Reply::Text(text) => Ok(text.to_string()),
                Reply::Fail(kind) => Err(GenerationError::new(*kind, "scripted failure")),
                Reply::Hang => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok(String::new())
                }
            }
        }
    }

    fn advisor(reply: Reply) -> AudienceAdvisor {
        AudienceAdvisor::new(Arc::new(ScriptedText(reply)), Duration::from_secs(30))
    }

    #[test]
    fn parses_fenced_json_with_loose_fields() {
        let insight = parse_insight(
            "Here you go:\n```json\n{\"age_group\": \"25-35\", \"demographics\": {\"income\": \"middle\"}, \
             \"regions\": \"West, South\", \"recommended_cities\": [\"Pune\", \"Goa\"]}\n```",
        )
        .expect("insight");
        assert_eq!(insight.age_group, "25-35");
        assert_eq!(insight.demographics, r#"{"income":"middle"}"#);
        assert_eq!(insight.regions, vec!["West", "South"]);
        assert_eq!(insight.recommended_cities, vec!["Pune", "Goa"]);
    }

    #[test]
    fn rejects_non_json_and_empty_objects() {
        assert!(parse_insight("I think young people").is_none());
        assert!(parse_insight("{}").is_none());
        assert!(parse_insight("[1, 2]").is_none());
    }

    #[tokio::test]
    async fn model_reply_becomes_insight() {
        let advice = advisor(Reply::Text(r#"{"age_group":"18-25","recommended_cities":["Delhi"]}"#))
            .recommend("Chai Co", "beverage", None)
            .await;
        assert!(advice.is_available());
        assert_eq!(advice.insight().recommended_cities, vec!["Delhi"]);
    }

    #[tokio::test]
    async fn quota_failure_falls_back_to_heuristic() {
        let advice = advisor(Reply::Fail(FailureKind::QuotaExhausted))
            .recommend("Glow", "Skincare", Some("serums"))
            .await;
        assert!(!advice.is_available());
        assert_eq!(advice.insight(), &AudienceInsight::heuristic("Skincare"));
        assert_eq!(advice.insight().recommended_cities[0], "Mumbai");
    }

    #[tokio::test]
    async fn malformed_reply_falls_back() {
        let advice = advisor(Reply::Text("not json"))
            .recommend("Bolt", "tech gadgets", None)
            .await;
        match advice {
            AudienceAdvice::Unavailable { fallback, reason } => {
                assert_eq!(fallback.age_group, "22-40 years");
                assert!(reason.contains("malformed"));
            }
            other => panic!("expected fallback, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn slow_model_times_out() {
        let advice = advisor(Reply::Hang).recommend("Chai Co", "beverage", None).await;
        assert!(!advice.is_available());
    }

    #[tokio::test]
    async fn lead_city_skips_blank_entries() {
        let advice = advisor(Reply::Text(
            r#"{"age_group":"25-35","recommended_cities":["  ", "Pune", "Goa"]}"#,
        ))
        .recommend("Chai Co", "beverage", None)
        .await;
        assert_eq!(advice.lead_city(), Some("Pune"));

        let fallback = AudienceAdvice::unavailable("beverage", "no model");
        assert_eq!(
            fallback.lead_city(),
            AudienceInsight::heuristic("beverage")
                .recommended_cities
                .first()
                .map(String::as_str)
        );
        assert!(fallback.lead_city().is_some());
    }
}

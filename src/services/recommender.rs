/// Recommendation generation
///
/// The engine treats the recommender as an opaque, possibly slow call
/// (10-15s is typical for the Gemini backend). Failures are caught at the
/// dispatch boundary and replaced with `FALLBACK_RECOMMENDATION`, so both
/// users always receive closure.
use reqwest::Client as HttpClient;
use serde::Deserialize;
use serde_json::json;

use crate::{
    error::{AppError, AppResult},
    models::{questionnaire::QUESTIONS, AnswerSet},
};

const GEMINI_TEMPERATURE: f32 = 0.7;
const GEMINI_MAX_TOKENS: u32 = 2000;

/// Canned message sent when generation fails or no API key is configured
pub const FALLBACK_RECOMMENDATION: &str = "🎬 Our picks for two:\n\n\
1. Back to the Future (1985) — an adventure classic that works for any mood\n\
2. The Intouchables (2011) — a warm comedy-drama almost everyone loves\n\
3. Inception (2010) — a spectacular thriller to discuss afterwards\n\n\
🍿 Enjoy the movie!";

/// Generates a joint movie recommendation from two answer sets
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait Recommender: Send + Sync {
    async fn generate(&self, answers_a: &AnswerSet, answers_b: &AnswerSet) -> AppResult<String>;
}

/// Builds the prompt shared by all recommender backends
///
/// Questions keep their fixed order; skipped answers carry the sentinel and
/// are passed through so the model knows the preference was unspecified.
pub fn build_prompt(answers_a: &AnswerSet, answers_b: &AnswerSet) -> String {
    let mut prompt = String::from(
        "Two friends want to watch a movie together. Based on both of their \
         questionnaire answers below, recommend 3-5 movies they would both \
         enjoy. For each movie give the title, year and one sentence on why \
         it fits them as a pair.\n",
    );

    for (label, answers) in [("Viewer 1", answers_a), ("Viewer 2", answers_b)] {
        prompt.push_str(&format!("\n{}:\n", label));
        for (key, _) in QUESTIONS {
            let value = answers.get(key).map(String::as_str).unwrap_or("unspecified");
            prompt.push_str(&format!("- {}: {}\n", key, value));
        }
    }

    prompt
}

/// Gemini `generateContent` REST backend
#[derive(Clone)]
pub struct GeminiRecommender {
    http_client: HttpClient,
    api_key: String,
    api_url: String,
    model: String,
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    content: GeminiContent,
}

#[derive(Debug, Deserialize)]
struct GeminiContent {
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Deserialize)]
struct GeminiPart {
    text: String,
}

impl GeminiRecommender {
    pub fn new(api_key: String, api_url: String, model: String) -> Self {
        Self {
            http_client: HttpClient::new(),
            api_key,
            api_url,
            model,
        }
    }

    fn extract_text(response: GeminiResponse) -> AppResult<String> {
        response
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content.parts.into_iter().next())
            .map(|p| p.text)
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| AppError::Recommender("Gemini response had no candidates".to_string()))
    }
}

#[async_trait::async_trait]
impl Recommender for GeminiRecommender {
    async fn generate(&self, answers_a: &AnswerSet, answers_b: &AnswerSet) -> AppResult<String> {
        let prompt = build_prompt(answers_a, answers_b);

        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.api_url, self.model
        );

        tracing::debug!(model = %self.model, "Requesting recommendation from Gemini");

        let response = self
            .http_client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&json!({
                "contents": [{ "parts": [{ "text": prompt }] }],
                "generationConfig": {
                    "temperature": GEMINI_TEMPERATURE,
                    "maxOutputTokens": GEMINI_MAX_TOKENS,
                },
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "Gemini request failed");
            return Err(AppError::Recommender(format!(
                "Gemini returned status {}: {}",
                status, body
            )));
        }

        let parsed: GeminiResponse = response.json().await?;
        let text = Self::extract_text(parsed)?;

        tracing::info!(chars = text.len(), "Recommendation generated");

        Ok(text)
    }
}

/// No-API-key backend returning the canned recommendation
///
/// Used when `GEMINI_API_KEY` is absent so the pairing flow stays usable.
pub struct CannedRecommender;

#[async_trait::async_trait]
impl Recommender for CannedRecommender {
    async fn generate(&self, _answers_a: &AnswerSet, _answers_b: &AnswerSet) -> AppResult<String> {
        Ok(FALLBACK_RECOMMENDATION.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn answers(genre: &str) -> AnswerSet {
        let mut map = AnswerSet::new();
        map.insert("genre".to_string(), genre.to_string());
        map.insert("mood".to_string(), "relaxed".to_string());
        map
    }

    #[test]
    fn test_build_prompt_includes_both_viewers() {
        let prompt = build_prompt(&answers("comedy"), &answers("thriller"));

        assert!(prompt.contains("Viewer 1"));
        assert!(prompt.contains("Viewer 2"));
        assert!(prompt.contains("comedy"));
        assert!(prompt.contains("thriller"));
    }

    #[test]
    fn test_build_prompt_marks_missing_answers_unspecified() {
        let prompt = build_prompt(&answers("comedy"), &AnswerSet::new());
        // Every question key appears for both viewers even when unanswered
        assert!(prompt.contains("- favorite_movies: unspecified"));
        assert!(prompt.contains("- duration: unspecified"));
    }

    #[test]
    fn test_extract_text_first_candidate() {
        let response = GeminiResponse {
            candidates: vec![GeminiCandidate {
                content: GeminiContent {
                    parts: vec![GeminiPart {
                        text: "Watch The Matrix".to_string(),
                    }],
                },
            }],
        };

        let text = GeminiRecommender::extract_text(response).unwrap();
        assert_eq!(text, "Watch The Matrix");
    }

    #[test]
    fn test_extract_text_empty_response_is_error() {
        let response = GeminiResponse { candidates: vec![] };
        let err = GeminiRecommender::extract_text(response).unwrap_err();
        assert!(matches!(err, AppError::Recommender(_)));
    }

    #[test]
    fn test_gemini_response_parsing() {
        let json = r#"{
            "candidates": [
                { "content": { "parts": [{ "text": "1. Inception (2010)" }], "role": "model" } }
            ]
        }"#;

        let parsed: GeminiResponse = serde_json::from_str(json).unwrap();
        let text = GeminiRecommender::extract_text(parsed).unwrap();
        assert!(text.contains("Inception"));
    }

    #[tokio::test]
    async fn test_canned_recommender_always_succeeds() {
        let text = CannedRecommender
            .generate(&answers("comedy"), &answers("drama"))
            .await
            .unwrap();
        assert_eq!(text, FALLBACK_RECOMMENDATION);
    }
}

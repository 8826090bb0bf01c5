use std::env;
use std::fmt;
use std::time::Duration;

use anyhow::{Context, anyhow};
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::AiError;

pub const DEFAULT_GEMINI_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta";
const API_KEY_HEADER: &str = "x-goog-api-key";
const DEFAULT_TIMEOUT_MS: u64 = 60_000;

pub const SYSTEM_INSTRUCTION: &str = "You are an expert technical writer and markdown editor assistant. \
Your goal is to help users improve their documentation stored in a GitLab Wiki.\n\
Maintain the existing markdown formatting. Only output the modified text, do not add conversational filler.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AiAction {
    FixGrammar,
    Summarize,
    Expand,
    TranslateEnglish,
    TranslateChinese,
}

impl AiAction {
    pub fn parse(value: &str) -> Result<Self, String> {
        let normalized = value.trim().to_ascii_lowercase().replace(['_', ' '], "-");
        match normalized.as_str() {
            "fix-grammar" | "grammar" => Ok(Self::FixGrammar),
            "summarize" | "summary" => Ok(Self::Summarize),
            "expand" | "expand-idea" => Ok(Self::Expand),
            "translate-en" | "translate-english" => Ok(Self::TranslateEnglish),
            "translate-zh" | "translate-chinese" => Ok(Self::TranslateChinese),
            _ => Err(format!(
                "unsupported AI action: {value} (expected fix-grammar|summarize|expand|translate-en|translate-zh)"
            )),
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::FixGrammar => "Fix Grammar",
            Self::Summarize => "Summarize",
            Self::Expand => "Expand Idea",
            Self::TranslateEnglish => "Translate to English",
            Self::TranslateChinese => "Translate to Traditional Chinese",
        }
    }

    pub fn instruction(self) -> &'static str {
        match self {
            Self::FixGrammar => {
                "Fix grammar, spelling, and punctuation in the following markdown text. Keep the tone professional."
            }
            Self::Summarize => {
                "Provide a concise summary of the following content in markdown bullet points."
            }
            Self::Expand => {
                "Expand on the ideas in the following text, adding relevant details and examples where appropriate. Keep it in markdown."
            }
            Self::TranslateEnglish => {
                "Translate the following text to English, preserving markdown structure."
            }
            Self::TranslateChinese => {
                "Translate the following text to Traditional Chinese (Taiwan), preserving markdown structure."
            }
        }
    }
}

impl fmt::Display for AiAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

pub fn build_prompt(action: AiAction, text: &str) -> String {
    format!("{}\n\n---\n\n{text}", action.instruction())
}

/// Rewrites a span of text; the caller replaces the span with the result.
pub trait TextTransform {
    fn transform(&self, text: &str, action: AiAction) -> Result<String, AiError>;
}

#[derive(Clone)]
pub struct GeminiClient {
    client: Client,
    api_key: String,
    model: String,
    endpoint: String,
}

impl fmt::Debug for GeminiClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeminiClient")
            .field("model", &self.model)
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

impl GeminiClient {
    /// Key from GEMINI_API_KEY, falling back to API_KEY.
    pub fn from_env(model: &str) -> Result<Self, AiError> {
        let api_key = ["GEMINI_API_KEY", "API_KEY"]
            .iter()
            .filter_map(|key| env::var(key).ok())
            .map(|value| value.trim().to_string())
            .find(|value| !value.is_empty())
            .ok_or(AiError::MissingApiKey)?;
        Self::new(api_key, model, DEFAULT_GEMINI_ENDPOINT)
    }

    pub fn new(api_key: String, model: &str, endpoint: &str) -> Result<Self, AiError> {
        let client = Client::builder()
            .timeout(Duration::from_millis(DEFAULT_TIMEOUT_MS))
            .build()
            .context("failed to build AI HTTP client")
            .map_err(|source| AiError::RequestFailed { source })?;
        Ok(Self {
            client,
            api_key,
            model: model.to_string(),
            endpoint: endpoint.trim_end_matches('/').to_string(),
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn generate(&self, prompt: String) -> anyhow::Result<Option<String>> {
        let url = format!("{}/models/{}:generateContent", self.endpoint, self.model);
        let request = GenerateRequest {
            system_instruction: Content {
                role: None,
                parts: vec![Part {
                    text: SYSTEM_INSTRUCTION.to_string(),
                }],
            },
            contents: vec![Content {
                role: Some("user".to_string()),
                parts: vec![Part { text: prompt }],
            }],
        };
        debug!(model = %self.model, "AI transform request");
        let response = self
            .client
            .post(&url)
            .header(API_KEY_HEADER, self.api_key.as_str())
            .json(&request)
            .send()
            .context("failed to call AI service")?;
        let status = response.status();
        if !status.is_success() {
            return Err(anyhow!("AI service returned HTTP {status}"));
        }
        let payload: GenerateResponse = response
            .json()
            .context("failed to decode AI service response")?;
        Ok(payload.text())
    }
}

impl TextTransform for GeminiClient {
    fn transform(&self, text: &str, action: AiAction) -> Result<String, AiError> {
        if text.trim().is_empty() {
            return Ok(String::new());
        }
        match self.generate(build_prompt(action, text)) {
            Ok(Some(output)) if !output.is_empty() => Ok(output),
            Ok(_) => Ok(text.to_string()),
            Err(source) => {
                warn!(action = %action, error = %source, "AI transform failed");
                Err(AiError::RequestFailed { source })
            }
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    system_instruction: Content,
    contents: Vec<Content>,
}

#[derive(Debug, Serialize, Deserialize, Default)]
struct Content {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize, Default)]
struct Part {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize, Default)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize, Default)]
struct Candidate {
    #[serde(default)]
    content: Content,
}

impl GenerateResponse {
    fn text(&self) -> Option<String> {
        let candidate = self.candidates.first()?;
        let joined: String = candidate
            .content
            .parts
            .iter()
            .map(|part| part.text.as_str())
            .collect();
        Some(joined)
    }
}

//! Gemini `generateContent` requests and response decoding.
//!
//! The client only builds [`HttpRequest`]s and reads [`HttpResponse`]s; the
//! transport and its retry policy live elsewhere.

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use url::Url;

use crate::capabilities::{
    HttpError, HttpMethod, HttpRequest, HttpResponse, RetryPolicy, ValidatedUrl,
};
use crate::model::{ChatMessage, ChatRole, PlaceInfo, QuizQuestion, Source};

pub const DEFAULT_GEMINI_URL: &str = "https://generativelanguage.googleapis.com/";
pub const DEFAULT_FAST_MODEL: &str = "gemini-3-flash-preview";
pub const DEFAULT_DEEP_MODEL: &str = "gemini-3-pro-preview";
pub const DEFAULT_THINKING_BUDGET: u32 = 32_768;
pub const DEFAULT_AI_TIMEOUT_MS: u64 = 120_000;
pub const INFO_TEMPERATURE: f32 = 0.4;

pub const NO_INFO_TEXT: &str = "No information available for this location.";
pub const NO_CHAT_REPLY_TEXT: &str = "I'm sorry, I couldn't process that request.";
pub const DEFAULT_SOURCE_TITLE: &str = "Source";

const API_KEY_HEADER: &str = "x-goog-api-key";

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AiError {
    #[error(transparent)]
    Http(#[from] HttpError),

    #[error("unreadable model response: {0}")]
    Malformed(String),
}

#[derive(Debug, Clone)]
pub struct GeminiClient {
    base_url: Url,
    api_key: SecretString,
    fast_model: String,
    deep_model: String,
    thinking_budget: u32,
    timeout_ms: u64,
}

impl PartialEq for GeminiClient {
    fn eq(&self, other: &Self) -> bool {
        self.base_url == other.base_url
            && self.api_key.expose_secret() == other.api_key.expose_secret()
            && self.fast_model == other.fast_model
            && self.deep_model == other.deep_model
            && self.thinking_budget == other.thinking_budget
            && self.timeout_ms == other.timeout_ms
    }
}

/// One chat turn: what the user said now, plus everything said before it.
#[derive(Debug, Clone, Copy)]
pub struct ChatTurn<'a> {
    pub message: &'a str,
    pub context: &'a str,
    pub history: &'a [ChatMessage],
    pub deep_reasoning: bool,
}

impl GeminiClient {
    pub fn new(base_url: Url, api_key: SecretString) -> Self {
        Self {
            base_url,
            api_key,
            fast_model: DEFAULT_FAST_MODEL.to_string(),
            deep_model: DEFAULT_DEEP_MODEL.to_string(),
            thinking_budget: DEFAULT_THINKING_BUDGET,
            timeout_ms: DEFAULT_AI_TIMEOUT_MS,
        }
    }

    #[must_use]
    pub fn with_models(mut self, fast: impl Into<String>, deep: impl Into<String>) -> Self {
        self.fast_model = fast.into();
        self.deep_model = deep.into();
        self
    }

    #[must_use]
    pub fn with_thinking_budget(mut self, budget: u32) -> Self {
        self.thinking_budget = budget;
        self
    }

    #[must_use]
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn place_info_request(&self, name: &str, kind: &str) -> Result<HttpRequest, AiError> {
        let body = GenerateContentRequest {
            contents: vec![Content::user(info_prompt(name, kind))],
            system_instruction: None,
            generation_config: Some(GenerationConfig {
                temperature: Some(INFO_TEMPERATURE),
                ..GenerationConfig::default()
            }),
            tools: vec![Tool::google_search()],
        };
        self.generate(&self.fast_model, &body)
    }

    pub fn quiz_request(&self, name: &str, kind: &str) -> Result<HttpRequest, AiError> {
        let body = GenerateContentRequest {
            contents: vec![Content::user(quiz_prompt(name, kind))],
            system_instruction: None,
            generation_config: Some(GenerationConfig {
                response_mime_type: Some("application/json"),
                response_schema: Some(quiz_schema()),
                ..GenerationConfig::default()
            }),
            tools: Vec::new(),
        };
        self.generate(&self.fast_model, &body)
    }

    pub fn chat_request(&self, turn: &ChatTurn<'_>) -> Result<HttpRequest, AiError> {
        let mut contents: Vec<Content> = turn
            .history
            .iter()
            .filter(|m| !m.is_thinking)
            .map(|m| Content {
                role: Some(match m.role {
                    ChatRole::User => "user",
                    ChatRole::Model => "model",
                }),
                parts: vec![Part {
                    text: m.text.clone(),
                }],
            })
            .collect();
        contents.push(Content::user(turn.message.to_string()));

        let (model, generation_config) = if turn.deep_reasoning {
            (
                &self.deep_model,
                Some(GenerationConfig {
                    thinking_config: Some(ThinkingConfig {
                        thinking_budget: self.thinking_budget,
                    }),
                    ..GenerationConfig::default()
                }),
            )
        } else {
            (&self.fast_model, None)
        };

        let body = GenerateContentRequest {
            contents,
            system_instruction: Some(Content {
                role: None,
                parts: vec![Part {
                    text: chat_instruction(turn.context),
                }],
            }),
            generation_config,
            tools: Vec::new(),
        };
        self.generate(model, &body)
    }

    fn generate(
        &self,
        model: &str,
        body: &GenerateContentRequest,
    ) -> Result<HttpRequest, AiError> {
        let url = self
            .base_url
            .join(&format!("v1beta/models/{model}:generateContent"))
            .map_err(|e| HttpError::InvalidUrl {
                url: self.base_url.to_string(),
                reason: e.to_string(),
            })?;

        // AI calls are never retried automatically.
        let request = HttpRequest::new(HttpMethod::Post, ValidatedUrl::from_url(&url)?)
            .with_header(API_KEY_HEADER, self.api_key.expose_secret().as_str())?
            .with_json(body)?
            .with_timeout_ms(self.timeout_ms)?
            .with_retry(RetryPolicy::none());
        Ok(request)
    }
}

fn info_prompt(name: &str, kind: &str) -> String {
    format!(
        "You are the in-app guide of SmartInfoQueue. Describe \"{name}\" (type: {kind}) \
         for someone who is waiting there right now.\n\n\
         Cover, under clear markdown headings:\n\
         1. Purpose: what this place is for.\n\
         2. Services: the three or four things people most often come here to do.\n\
         3. Tips & Rules: etiquette and practical advice while waiting.\n\n\
         Keep it under 200 words, in plain friendly language without jargon."
    )
}

fn quiz_prompt(name: &str, kind: &str) -> String {
    format!(
        "Write a 5-question quiz for people waiting at \"{name}\" ({kind}).\n\n\
         - Mix multiple-choice and true/false questions.\n\
         - Multiple-choice questions have exactly 4 options.\n\
         - True/false questions have exactly the options \"True\" and \"False\".\n\
         - Keep questions light, educational and relevant to this kind of place.\n\
         - Explain briefly why each answer is right."
    )
}

fn chat_instruction(context: &str) -> String {
    format!(
        "You are the SmartInfoQueue assistant. You help people waiting at \"{context}\". \
         Be extremely friendly, helpful, and concise. Use simple language and avoid jargon."
    )
}

fn quiz_schema() -> serde_json::Value {
    json!({
        "type": "ARRAY",
        "items": {
            "type": "OBJECT",
            "properties": {
                "question": {"type": "STRING"},
                "options": {"type": "ARRAY", "items": {"type": "STRING"}},
                "answer": {"type": "STRING"},
                "explanation": {"type": "STRING"},
                "type": {
                    "type": "STRING",
                    "description": "must be \"multiple-choice\" or \"true-false\""
                }
            },
            "required": ["question", "options", "answer", "explanation", "type"]
        }
    })
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<Tool>,
}

#[derive(Debug, Serialize)]
struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'static str>,
    parts: Vec<Part>,
}

impl Content {
    fn user(text: String) -> Self {
        Self {
            role: Some("user"),
            parts: vec![Part { text }],
        }
    }
}

#[derive(Debug, Serialize)]
struct Part {
    text: String,
}

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_mime_type: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_schema: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    thinking_config: Option<ThinkingConfig>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ThinkingConfig {
    thinking_budget: u32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Tool {
    google_search: EmptyObject,
}

impl Tool {
    fn google_search() -> Self {
        Self {
            google_search: EmptyObject {},
        }
    }
}

#[derive(Debug, Serialize)]
struct EmptyObject {}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
    #[serde(default)]
    grounding_metadata: Option<GroundingMetadata>,
}

#[derive(Debug, Default, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Default, Deserialize)]
struct ResponsePart {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    thought: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GroundingMetadata {
    #[serde(default)]
    grounding_chunks: Vec<GroundingChunk>,
}

#[derive(Debug, Default, Deserialize)]
struct GroundingChunk {
    #[serde(default)]
    web: Option<WebChunk>,
}

#[derive(Debug, Default, Deserialize)]
struct WebChunk {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    uri: Option<String>,
}

impl GenerateContentResponse {
    fn decode(response: &HttpResponse) -> Result<Self, AiError> {
        response
            .json()
            .map_err(|e| AiError::Malformed(e.to_string()))
    }

    /// Concatenated answer text of the first candidate, thoughts excluded.
    fn text(&self) -> Option<String> {
        let parts = &self.candidates.first()?.content.as_ref()?.parts;
        let text: String = parts
            .iter()
            .filter(|p| !p.thought)
            .filter_map(|p| p.text.as_deref())
            .collect();
        (!text.is_empty()).then_some(text)
    }

    fn sources(&self) -> Vec<Source> {
        self.candidates
            .first()
            .and_then(|c| c.grounding_metadata.as_ref())
            .map(|g| {
                g.grounding_chunks
                    .iter()
                    .filter_map(|chunk| chunk.web.as_ref())
                    .map(|web| Source {
                        title: web
                            .title
                            .clone()
                            .filter(|t| !t.is_empty())
                            .unwrap_or_else(|| DEFAULT_SOURCE_TITLE.to_string()),
                        uri: web.uri.clone().unwrap_or_default(),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}

pub fn parse_place_info(response: &HttpResponse) -> Result<PlaceInfo, AiError> {
    let decoded = GenerateContentResponse::decode(response)?;
    Ok(PlaceInfo {
        text: decoded.text().unwrap_or_else(|| NO_INFO_TEXT.to_string()),
        sources: decoded.sources(),
    })
}

/// Reads the generated quiz. Text that is not a JSON array yields an empty
/// quiz rather than an error; array items that are not questions are skipped.
pub fn parse_quiz(response: &HttpResponse) -> Result<Vec<QuizQuestion>, AiError> {
    let decoded = GenerateContentResponse::decode(response)?;
    let Some(text) = decoded.text() else {
        return Ok(Vec::new());
    };
    let items = match serde_json::from_str::<Vec<serde_json::Value>>(text.trim()) {
        Ok(items) => items,
        Err(e) => {
            tracing::warn!(error = %e, "generated quiz is not a list, using an empty quiz");
            return Ok(Vec::new());
        }
    };
    let questions = items
        .into_iter()
        .enumerate()
        .filter_map(|(index, item)| match serde_json::from_value(item) {
            Ok(question) => Some(question),
            Err(e) => {
                tracing::debug!(index, error = %e, "skipping malformed quiz question");
                None
            }
        })
        .collect();
    Ok(crate::quiz::sanitize(questions))
}

pub fn parse_chat_reply(response: &HttpResponse) -> Result<String, AiError> {
    let decoded = GenerateContentResponse::decode(response)?;
    Ok(decoded
        .text()
        .unwrap_or_else(|| NO_CHAT_REPLY_TEXT.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::HttpHeaders;
    use crate::model::QuestionKind;

    fn client() -> GeminiClient {
        GeminiClient::new(
            Url::parse(DEFAULT_GEMINI_URL).unwrap(),
            SecretString::new("test-key".to_string()),
        )
    }

    fn body_of(request: &HttpRequest) -> serde_json::Value {
        serde_json::from_slice(request.body().unwrap()).unwrap()
    }

    fn ok(body: serde_json::Value) -> HttpResponse {
        HttpResponse::new(
            200,
            HttpHeaders::new(),
            serde_json::to_vec(&body).unwrap(),
            "req".into(),
        )
    }

    fn text_response(text: &str) -> HttpResponse {
        ok(json!({"candidates": [{"content": {"parts": [{"text": text}]}}]}))
    }

    mod request_tests {
        use super::*;

        #[test]
        fn test_info_request_shape() {
            let request = client().place_info_request("Louvre", "museum").unwrap();
            assert_eq!(
                request.url().as_str(),
                "https://generativelanguage.googleapis.com/v1beta/models/gemini-3-flash-preview:generateContent"
            );
            assert_eq!(request.headers().get("x-goog-api-key"), Some("test-key"));
            assert_eq!(request.retry_policy(), &RetryPolicy::none());

            let body = body_of(&request);
            assert_eq!(body["generationConfig"]["temperature"], json!(0.4));
            assert_eq!(body["tools"], json!([{"googleSearch": {}}]));
            let prompt = body["contents"][0]["parts"][0]["text"].as_str().unwrap();
            assert!(prompt.contains("\"Louvre\""));
            assert!(prompt.contains("museum"));
        }

        #[test]
        fn test_quiz_request_asks_for_json() {
            let body = body_of(&client().quiz_request("Louvre", "museum").unwrap());
            assert_eq!(
                body["generationConfig"]["responseMimeType"],
                "application/json"
            );
            assert_eq!(body["generationConfig"]["responseSchema"]["type"], "ARRAY");
            assert!(body.get("tools").is_none());
        }

        #[test]
        fn test_fast_chat_request() {
            let history = vec![
                ChatMessage::user("hi"),
                ChatMessage::model("hello!"),
                ChatMessage::thinking(),
            ];
            let request = client()
                .chat_request(&ChatTurn {
                    message: "where is the exit?",
                    context: "Louvre (museum)",
                    history: &history,
                    deep_reasoning: false,
                })
                .unwrap();
            assert!(request.url().as_str().contains(DEFAULT_FAST_MODEL));

            let body = body_of(&request);
            assert_eq!(
                body["contents"],
                json!([
                    {"role": "user", "parts": [{"text": "hi"}]},
                    {"role": "model", "parts": [{"text": "hello!"}]},
                    {"role": "user", "parts": [{"text": "where is the exit?"}]}
                ])
            );
            let instruction = body["systemInstruction"]["parts"][0]["text"]
                .as_str()
                .unwrap();
            assert!(instruction.contains("\"Louvre (museum)\""));
            assert!(body.get("generationConfig").is_none());
        }

        #[test]
        fn test_deep_chat_request_uses_thinking_budget() {
            let request = client()
                .chat_request(&ChatTurn {
                    message: "explain",
                    context: "Public area",
                    history: &[],
                    deep_reasoning: true,
                })
                .unwrap();
            assert!(request.url().as_str().contains(DEFAULT_DEEP_MODEL));
            assert_eq!(
                body_of(&request)["generationConfig"]["thinkingConfig"]["thinkingBudget"],
                json!(DEFAULT_THINKING_BUDGET)
            );
        }

        #[test]
        fn test_debug_does_not_leak_key() {
            let printed = format!("{:?}", client());
            assert!(!printed.contains("test-key"));
        }
    }

    mod info_tests {
        use super::*;

        #[test]
        fn test_text_and_sources() {
            let info = parse_place_info(&ok(json!({
                "candidates": [{
                    "content": {"parts": [{"text": "# Louvre\n"}, {"text": "Big museum."}]},
                    "groundingMetadata": {"groundingChunks": [
                        {"web": {"title": "Wikipedia", "uri": "https://en.wikipedia.org/wiki/Louvre"}},
                        {"retrievedContext": {}},
                        {"web": {}}
                    ]}
                }]
            })))
            .unwrap();
            assert_eq!(info.text, "# Louvre\nBig museum.");
            assert_eq!(
                info.sources,
                vec![
                    Source {
                        title: "Wikipedia".into(),
                        uri: "https://en.wikipedia.org/wiki/Louvre".into()
                    },
                    Source {
                        title: DEFAULT_SOURCE_TITLE.into(),
                        uri: String::new()
                    }
                ]
            );
        }

        #[test]
        fn test_empty_answer_uses_default_text() {
            let info = parse_place_info(&ok(json!({"candidates": []}))).unwrap();
            assert_eq!(info.text, NO_INFO_TEXT);
            assert!(info.sources.is_empty());
        }

        #[test]
        fn test_thought_parts_are_skipped() {
            let info = parse_place_info(&ok(json!({
                "candidates": [{"content": {"parts": [
                    {"text": "planning...", "thought": true},
                    {"text": "Answer"}
                ]}}]
            })))
            .unwrap();
            assert_eq!(info.text, "Answer");
        }

        #[test]
        fn test_non_json_envelope_is_an_error() {
            let response =
                HttpResponse::new(200, HttpHeaders::new(), b"<html>".to_vec(), "r".into());
            assert!(matches!(
                parse_place_info(&response),
                Err(AiError::Malformed(_))
            ));
        }
    }

    mod quiz_tests {
        use super::*;

        #[test]
        fn test_valid_quiz() {
            let quiz = parse_quiz(&text_response(
                r#"[{"question":"Is the Louvre in Paris?","options":["True","False"],
                    "answer":"True","explanation":"It is.","type":"true-false"}]"#,
            ))
            .unwrap();
            assert_eq!(quiz.len(), 1);
            assert_eq!(quiz[0].kind, QuestionKind::TrueFalse);
        }

        #[test]
        fn test_invalid_json_degrades_to_empty() {
            assert_eq!(parse_quiz(&text_response("[{oops")).unwrap(), vec![]);
        }

        #[test]
        fn test_schema_violation_degrades_to_empty() {
            let quiz = parse_quiz(&text_response(
                r#"[{"question":"q","options":["a","b"],"answer":"a","explanation":"e","type":"essay"}]"#,
            ))
            .unwrap();
            assert!(quiz.is_empty());
        }

        #[test]
        fn test_one_bad_kind_only_drops_that_question() {
            let mut items: Vec<serde_json::Value> = (1..=5)
                .map(|n| {
                    json!({
                        "question": format!("Fact #{n} is true?"),
                        "options": ["True", "False"],
                        "answer": "True",
                        "explanation": "Because.",
                        "type": "true-false"
                    })
                })
                .collect();
            items[4]["type"] = json!("true/false");
            let quiz = parse_quiz(&text_response(&serde_json::to_string(&items).unwrap())).unwrap();
            assert_eq!(quiz.len(), 4);
            assert!(quiz.iter().all(|q| q.question != "Fact #5 is true?"));
        }

        #[test]
        fn test_missing_text_is_empty_quiz() {
            assert!(parse_quiz(&ok(json!({"candidates": []}))).unwrap().is_empty());
        }
    }

    mod chat_tests {
        use super::*;

        #[test]
        fn test_reply_text() {
            assert_eq!(parse_chat_reply(&text_response("Hello!")).unwrap(), "Hello!");
        }

        #[test]
        fn test_empty_reply_uses_default() {
            assert_eq!(
                parse_chat_reply(&ok(json!({}))).unwrap(),
                NO_CHAT_REPLY_TEXT
            );
        }
    }
}

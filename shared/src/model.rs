use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::chat::ChatTranscript;
use crate::config::Services;
use crate::insight::PendingInsight;
use crate::quiz::QuizSession;
use crate::AppError;

pub const FALLBACK_PLACE_TYPE: &str = "Public Place";

/// A resolved place. Built once per successful resolution and replaced
/// wholesale, never patched.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LocationData {
    pub lat: f64,
    pub lon: f64,
    pub display_name: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub place_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl LocationData {
    /// What the AI is asked about: the short name when there is one.
    pub fn subject_name(&self) -> &str {
        self.name
            .as_deref()
            .filter(|n| !n.trim().is_empty())
            .unwrap_or(&self.display_name)
    }

    pub fn subject_kind(&self) -> &str {
        self.place_type
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .unwrap_or(FALLBACK_PLACE_TYPE)
    }

    pub fn has_valid_coordinates(&self) -> bool {
        crate::ValidatedCoordinate::new(self.lat, self.lon).is_ok()
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Source {
    pub title: String,
    pub uri: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct PlaceInfo {
    pub text: String,
    #[serde(default)]
    pub sources: Vec<Source>,
}

impl PlaceInfo {
    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty()
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum QuestionKind {
    MultipleChoice,
    TrueFalse,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct QuizQuestion {
    pub question: String,
    pub options: Vec<String>,
    pub answer: String,
    pub explanation: String,
    #[serde(rename = "type")]
    pub kind: QuestionKind,
}

impl QuizQuestion {
    pub fn is_correct(&self, option: &str) -> bool {
        option.trim().to_lowercase() == self.answer.trim().to_lowercase()
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Model,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub role: ChatRole,
    pub text: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_thinking: bool,
}

impl ChatMessage {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            text: text.into(),
            is_thinking: false,
        }
    }

    pub fn model(text: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Model,
            text: text.into(),
            is_thinking: false,
        }
    }

    pub fn thinking() -> Self {
        Self {
            role: ChatRole::Model,
            text: crate::chat::THINKING_TEXT.to_string(),
            is_thinking: true,
        }
    }
}

#[derive(Default, Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Screen {
    #[default]
    Home,
    Info,
    Quiz,
    Chat,
}

impl fmt::Display for Screen {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Screen::Home => "home",
            Screen::Info => "info",
            Screen::Quiz => "quiz",
            Screen::Chat => "chat",
        })
    }
}

/// The last resolution the user asked for, kept so it can be replayed.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RetryTarget {
    Coordinates { lat: f64, lon: f64 },
    Query { text: String },
    DeviceGps,
}

#[derive(Debug, Default)]
pub struct Model {
    pub services: Option<Arc<Services>>,
    pub screen: Screen,
    pub location: Option<LocationData>,
    pub info: PlaceInfo,
    pub quiz: Vec<QuizQuestion>,
    pub quiz_session: QuizSession,
    pub chat: ChatTranscript,
    pub deep_reasoning: bool,
    pub is_loading: bool,
    pub active_error: Option<AppError>,
    pub last_attempt: Option<RetryTarget>,

    // Bumped whenever a resolution or insight fetch starts. Responses
    // tagged with an older number are dropped.
    pub location_generation: u64,
    pub insight_generation: u64,
    pub pending_insight: Option<PendingInsight>,
}

impl Model {
    pub fn set_error(&mut self, error: AppError) {
        self.active_error = Some(error);
    }

    pub fn clear_error(&mut self) {
        self.active_error = None;
    }

    /// Clears the error together with the retry handle it offered.
    pub fn dismiss_error(&mut self) {
        self.active_error = None;
        self.last_attempt = None;
    }

    pub fn can_open_quiz(&self) -> bool {
        self.location.is_some() && !self.quiz.is_empty()
    }

    /// Starts a new resolution and returns its generation.
    pub fn begin_resolution(&mut self, target: RetryTarget) -> u64 {
        self.last_attempt = Some(target);
        self.active_error = None;
        self.is_loading = true;
        self.location_generation += 1;
        self.location_generation
    }

    pub fn is_current_resolution(&self, generation: u64) -> bool {
        generation == self.location_generation
    }

    pub fn begin_insight(&mut self) -> u64 {
        self.insight_generation += 1;
        self.pending_insight = Some(PendingInsight::new(self.insight_generation));
        self.insight_generation
    }
}

use std::sync::Arc;

use crate::capabilities::{GeolocationResult, HttpResult, KvResult, StoreKey};
use crate::config::Services;
use crate::model::Screen;

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    // Lifecycle
    Configure(Arc<Services>),
    AppStarted,
    SnapshotLoaded(Box<KvResult>),

    // Location
    DetectLocation,
    PositionReceived {
        generation: u64,
        result: GeolocationResult,
    },
    PickCoordinates {
        lat: f64,
        lon: f64,
    },
    SearchSubmitted {
        query: String,
    },
    ReverseGeocoded {
        generation: u64,
        lat: f64,
        lon: f64,
        result: Box<HttpResult>,
    },
    SearchResolved {
        generation: u64,
        result: Box<HttpResult>,
    },
    RetryLastAttempt,
    DismissError,

    // Insight
    InfoFetched {
        generation: u64,
        result: Box<HttpResult>,
    },
    QuizFetched {
        generation: u64,
        result: Box<HttpResult>,
    },
    Persisted {
        key: StoreKey,
        result: Box<KvResult>,
    },

    // Navigation
    Navigate(Screen),

    // Quiz
    AnswerSelected {
        option: usize,
    },
    NextQuestion,
    RestartQuiz,

    // Chat
    SendChatMessage {
        text: String,
    },
    SetDeepReasoning(bool),
    ChatReplied {
        index: usize,
        result: Box<HttpResult>,
    },
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Event::Configure(_) => "configure",
            Event::AppStarted => "app_started",
            Event::SnapshotLoaded(_) => "snapshot_loaded",
            Event::DetectLocation => "detect_location",
            Event::PositionReceived { .. } => "position_received",
            Event::PickCoordinates { .. } => "pick_coordinates",
            Event::SearchSubmitted { .. } => "search_submitted",
            Event::ReverseGeocoded { .. } => "reverse_geocoded",
            Event::SearchResolved { .. } => "search_resolved",
            Event::RetryLastAttempt => "retry_last_attempt",
            Event::DismissError => "dismiss_error",
            Event::InfoFetched { .. } => "info_fetched",
            Event::QuizFetched { .. } => "quiz_fetched",
            Event::Persisted { .. } => "persisted",
            Event::Navigate(_) => "navigate",
            Event::AnswerSelected { .. } => "answer_selected",
            Event::NextQuestion => "next_question",
            Event::RestartQuiz => "restart_quiz",
            Event::SendChatMessage { .. } => "send_chat_message",
            Event::SetDeepReasoning(_) => "set_deep_reasoning",
            Event::ChatReplied { .. } => "chat_replied",
        }
    }

    pub fn is_user_initiated(&self) -> bool {
        matches!(
            self,
            Event::DetectLocation
                | Event::PickCoordinates { .. }
                | Event::SearchSubmitted { .. }
                | Event::RetryLastAttempt
                | Event::DismissError
                | Event::Navigate(_)
                | Event::AnswerSelected { .. }
                | Event::NextQuestion
                | Event::RestartQuiz
                | Event::SendChatMessage { .. }
                | Event::SetDeepReasoning(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_initiated_classification() {
        assert!(Event::SearchSubmitted {
            query: "Paris".into()
        }
        .is_user_initiated());
        assert!(Event::Navigate(Screen::Chat).is_user_initiated());
        assert!(!Event::AppStarted.is_user_initiated());
        assert!(!Event::InfoFetched {
            generation: 1,
            result: Box::new(Err(crate::capabilities::HttpError::Timeout {
                timeout_ms: 10
            }))
        }
        .is_user_initiated());
    }

    #[test]
    fn test_names_are_snake_case() {
        for event in [
            Event::AppStarted,
            Event::DetectLocation,
            Event::RetryLastAttempt,
            Event::NextQuestion,
            Event::SetDeepReasoning(true),
        ] {
            let name = event.name();
            assert!(name.chars().all(|c| c.is_ascii_lowercase() || c == '_'));
        }
    }
}

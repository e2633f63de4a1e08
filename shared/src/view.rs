//! Render-ready projection of the [`Model`]. Everything here is derived;
//! nothing in the view feeds back into the core.

use serde::Serialize;

use crate::model::{ChatMessage, LocationData, Model, QuestionKind, Screen, Source};

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ViewModel {
    pub screen: ScreenView,
    pub location: Option<LocationView>,
    pub error: Option<ErrorView>,
    pub is_loading: bool,
    pub can_open_quiz: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LocationView {
    pub title: String,
    pub kind: String,
    pub display_name: String,
    pub lat: f64,
    pub lon: f64,
}

impl From<&LocationData> for LocationView {
    fn from(location: &LocationData) -> Self {
        Self {
            title: location.subject_name().to_string(),
            kind: location.subject_kind().to_string(),
            display_name: location.display_name.clone(),
            lat: location.lat,
            lon: location.lon,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorView {
    pub message: String,
    pub code: String,
    pub can_retry: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(tag = "screen", rename_all = "snake_case")]
pub enum ScreenView {
    #[default]
    Home,
    Info {
        lines: Vec<InfoLine>,
        sources: Vec<Source>,
    },
    Quiz(QuizView),
    Chat {
        messages: Vec<ChatMessage>,
        deep_reasoning: bool,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InfoLine {
    pub text: String,
    pub heading: bool,
}

impl InfoLine {
    /// Lines starting with `#` become headings with the markers removed.
    pub fn parse(line: &str) -> Self {
        match line.strip_prefix('#') {
            Some(rest) => {
                let rest = rest.trim_start_matches('#');
                Self {
                    text: rest.strip_prefix(' ').unwrap_or(rest).to_string(),
                    heading: true,
                }
            }
            None => Self {
                text: line.to_string(),
                heading: false,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum QuizView {
    Empty,
    Question {
        number: usize,
        total: usize,
        question: String,
        kind: QuestionKind,
        options: Vec<String>,
        selected: Option<usize>,
        feedback: Option<AnswerFeedback>,
    },
    Finished {
        score: usize,
        total: usize,
        percent: u32,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AnswerFeedback {
    pub correct: bool,
    pub answer: String,
    pub explanation: String,
}

impl ViewModel {
    pub fn from_model(model: &Model) -> Self {
        let error = model.active_error.as_ref().map(|e| ErrorView {
            message: e.message.clone(),
            code: e.code().to_string(),
            can_retry: e.is_retryable() && model.last_attempt.is_some(),
        });

        Self {
            screen: screen_view(model),
            location: model.location.as_ref().map(LocationView::from),
            error,
            is_loading: model.is_loading,
            can_open_quiz: model.can_open_quiz(),
        }
    }
}

fn screen_view(model: &Model) -> ScreenView {
    match model.screen {
        Screen::Home => ScreenView::Home,
        Screen::Info => ScreenView::Info {
            lines: model
                .info
                .text
                .lines()
                .map(str::trim_end)
                .filter(|l| !l.trim().is_empty())
                .map(InfoLine::parse)
                .collect(),
            sources: model.info.sources.clone(),
        },
        Screen::Quiz => ScreenView::Quiz(quiz_view(model)),
        Screen::Chat => ScreenView::Chat {
            messages: model.chat.messages().to_vec(),
            deep_reasoning: model.deep_reasoning,
        },
    }
}

fn quiz_view(model: &Model) -> QuizView {
    let session = &model.quiz_session;
    let total = model.quiz.len();
    if total == 0 {
        return QuizView::Empty;
    }
    if session.is_finished() {
        return QuizView::Finished {
            score: session.score(),
            total,
            percent: session.percent(total),
        };
    }

    let Some(question) = model.quiz.get(session.current_index()) else {
        return QuizView::Empty;
    };
    let feedback = session
        .selected()
        .and_then(|i| question.options.get(i))
        .map(|chosen| AnswerFeedback {
            correct: question.is_correct(chosen),
            answer: question.answer.clone(),
            explanation: question.explanation.clone(),
        });

    QuizView::Question {
        number: session.current_index() + 1,
        total,
        question: question.question.clone(),
        kind: question.kind,
        options: question.options.clone(),
        selected: session.selected(),
        feedback,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{PlaceInfo, QuizQuestion, RetryTarget};
    use crate::{AppError, ErrorKind};

    fn question(answer: &str) -> QuizQuestion {
        QuizQuestion {
            question: "Was the tower built for a World's Fair?".into(),
            options: vec!["True".into(), "False".into()],
            answer: answer.into(),
            explanation: "It opened for the 1889 Exposition.".into(),
            kind: QuestionKind::TrueFalse,
        }
    }

    #[test]
    fn test_heading_lines() {
        assert_eq!(
            InfoLine::parse("## History"),
            InfoLine {
                text: "History".into(),
                heading: true
            }
        );
        assert_eq!(InfoLine::parse("#Tight").text, "Tight");
        assert_eq!(
            InfoLine::parse("Built in 1889."),
            InfoLine {
                text: "Built in 1889.".into(),
                heading: false
            }
        );
    }

    #[test]
    fn test_info_screen_skips_blank_lines() {
        let mut model = Model {
            screen: Screen::Info,
            ..Model::default()
        };
        model.info = PlaceInfo {
            text: "# Eiffel Tower\n\nIron lattice tower.\n".into(),
            sources: vec![],
        };
        let ScreenView::Info { lines, .. } = ViewModel::from_model(&model).screen else {
            panic!("expected info screen");
        };
        assert_eq!(lines.len(), 2);
        assert!(lines[0].heading);
        assert_eq!(lines[1].text, "Iron lattice tower.");
    }

    #[test]
    fn test_quiz_feedback_after_answer() {
        let mut model = Model {
            screen: Screen::Quiz,
            quiz: vec![question("True"), question("False")],
            ..Model::default()
        };
        model.quiz_session.answer(&model.quiz, 1).unwrap();

        let ScreenView::Quiz(QuizView::Question {
            number,
            total,
            selected,
            feedback,
            ..
        }) = ViewModel::from_model(&model).screen
        else {
            panic!("expected a question");
        };
        assert_eq!((number, total, selected), (1, 2, Some(1)));
        assert!(!feedback.unwrap().correct);
    }

    #[test]
    fn test_quiz_finished_view() {
        let mut model = Model {
            screen: Screen::Quiz,
            quiz: vec![question("True")],
            ..Model::default()
        };
        model.quiz_session.answer(&model.quiz, 0).unwrap();
        model.quiz_session.next(&model.quiz).unwrap();

        assert_eq!(
            ViewModel::from_model(&model).screen,
            ScreenView::Quiz(QuizView::Finished {
                score: 1,
                total: 1,
                percent: 100
            })
        );
    }

    #[test]
    fn test_retry_offered_only_with_target() {
        let mut model = Model::default();
        model.set_error(AppError::new(ErrorKind::Network, "offline"));
        assert!(!ViewModel::from_model(&model).error.unwrap().can_retry);

        model.last_attempt = Some(RetryTarget::DeviceGps);
        let error = ViewModel::from_model(&model).error.unwrap();
        assert!(error.can_retry);
        assert_eq!(error.code, "NETWORK_ERROR");

        model.set_error(AppError::new(ErrorKind::Unsupported, "no gps"));
        assert!(!ViewModel::from_model(&model).error.unwrap().can_retry);
    }
}

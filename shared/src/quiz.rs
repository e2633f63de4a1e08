//! Quiz validation and the quiz-taking session.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{QuestionKind, QuizQuestion};

pub const QUIZ_LENGTH: usize = 5;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum QuizItemError {
    #[error("question text is empty")]
    EmptyQuestion,

    #[error("true/false question has {0} options")]
    TrueFalseOptions(usize),

    #[error("multiple-choice question has {0} options")]
    TooFewOptions(usize),

    #[error("an option is blank")]
    BlankOption,

    #[error("answer '{0}' is not one of the options")]
    AnswerNotAnOption(String),
}

pub fn validate_question(question: &QuizQuestion) -> Result<(), QuizItemError> {
    if question.question.trim().is_empty() {
        return Err(QuizItemError::EmptyQuestion);
    }
    let count = question.options.len();
    match question.kind {
        QuestionKind::TrueFalse if count != 2 => {
            return Err(QuizItemError::TrueFalseOptions(count));
        }
        QuestionKind::MultipleChoice if count < 2 => {
            return Err(QuizItemError::TooFewOptions(count));
        }
        _ => {}
    }
    if question.options.iter().any(|o| o.trim().is_empty()) {
        return Err(QuizItemError::BlankOption);
    }
    if !question.options.iter().any(|o| question.is_correct(o)) {
        return Err(QuizItemError::AnswerNotAnOption(question.answer.clone()));
    }
    Ok(())
}

/// Drops unusable questions and keeps at most [`QUIZ_LENGTH`].
pub fn sanitize(questions: Vec<QuizQuestion>) -> Vec<QuizQuestion> {
    let received = questions.len();
    let kept: Vec<QuizQuestion> = questions
        .into_iter()
        .filter(|q| match validate_question(q) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(error = %e, "dropping quiz question");
                false
            }
        })
        .take(QUIZ_LENGTH)
        .collect();
    if kept.len() != received {
        tracing::debug!(received, kept = kept.len(), "quiz trimmed");
    }
    kept
}

/// `round(correct / total * 100)`; an empty quiz scores 0.
pub fn score_percent(correct: usize, total: usize) -> u32 {
    if total == 0 {
        return 0;
    }
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let percent = ((correct as f64 / total as f64) * 100.0).round() as u32;
    percent
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum QuizError {
    #[error("there are no questions")]
    NoQuestions,

    #[error("the quiz is already finished")]
    Finished,

    #[error("this question was already answered")]
    AlreadyAnswered,

    #[error("answer the current question first")]
    NotAnswered,

    #[error("option {option} does not exist, the question has {count}")]
    OptionOutOfRange { option: usize, count: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerOutcome {
    pub correct: bool,
    pub correct_option: Option<usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuizSession {
    current: usize,
    score: usize,
    selected: Option<usize>,
    finished: bool,
}

impl QuizSession {
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn current_index(&self) -> usize {
        self.current
    }

    pub fn score(&self) -> usize {
        self.score
    }

    pub fn selected(&self) -> Option<usize> {
        self.selected
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn answer(
        &mut self,
        questions: &[QuizQuestion],
        option: usize,
    ) -> Result<AnswerOutcome, QuizError> {
        let question = self.current_question(questions)?;
        if self.selected.is_some() {
            return Err(QuizError::AlreadyAnswered);
        }
        let chosen = question
            .options
            .get(option)
            .ok_or(QuizError::OptionOutOfRange {
                option,
                count: question.options.len(),
            })?;

        let correct = question.is_correct(chosen);
        if correct {
            self.score += 1;
        }
        self.selected = Some(option);

        Ok(AnswerOutcome {
            correct,
            correct_option: question.options.iter().position(|o| question.is_correct(o)),
        })
    }

    pub fn next(&mut self, questions: &[QuizQuestion]) -> Result<(), QuizError> {
        self.current_question(questions)?;
        if self.selected.is_none() {
            return Err(QuizError::NotAnswered);
        }
        self.selected = None;
        if self.current + 1 >= questions.len() {
            self.finished = true;
        } else {
            self.current += 1;
        }
        Ok(())
    }

    pub fn percent(&self, total: usize) -> u32 {
        score_percent(self.score, total)
    }

    fn current_question<'q>(
        &self,
        questions: &'q [QuizQuestion],
    ) -> Result<&'q QuizQuestion, QuizError> {
        if questions.is_empty() {
            return Err(QuizError::NoQuestions);
        }
        if self.finished {
            return Err(QuizError::Finished);
        }
        questions.get(self.current).ok_or(QuizError::Finished)
    }
}

//! Joins the place briefing and the quiz, which are fetched concurrently.

use crate::model::{PlaceInfo, QuizQuestion};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingInsight {
    generation: u64,
    info: Option<PlaceInfo>,
    quiz: Option<Vec<QuizQuestion>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsightProgress {
    Waiting,
    Complete {
        info: PlaceInfo,
        quiz: Vec<QuizQuestion>,
    },
}

impl PendingInsight {
    pub fn new(generation: u64) -> Self {
        Self {
            generation,
            info: None,
            quiz: None,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn accept_info(&mut self, info: PlaceInfo) -> InsightProgress {
        self.info = Some(info);
        self.progress()
    }

    pub fn accept_quiz(&mut self, quiz: Vec<QuizQuestion>) -> InsightProgress {
        self.quiz = Some(quiz);
        self.progress()
    }

    fn progress(&mut self) -> InsightProgress {
        if self.info.is_none() || self.quiz.is_none() {
            return InsightProgress::Waiting;
        }
        match (self.info.take(), self.quiz.take()) {
            (Some(info), Some(quiz)) => InsightProgress::Complete { info, quiz },
            _ => InsightProgress::Waiting,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::QuestionKind;

    fn info() -> PlaceInfo {
        PlaceInfo {
            text: "A museum.".into(),
            sources: vec![],
        }
    }

    fn quiz() -> Vec<QuizQuestion> {
        vec![QuizQuestion {
            question: "Is it big?".into(),
            options: vec!["True".into(), "False".into()],
            answer: "True".into(),
            explanation: "Very.".into(),
            kind: QuestionKind::TrueFalse,
        }]
    }

    #[test]
    fn test_info_first_then_quiz() {
        let mut pending = PendingInsight::new(3);
        assert_eq!(pending.accept_info(info()), InsightProgress::Waiting);
        assert_eq!(
            pending.accept_quiz(quiz()),
            InsightProgress::Complete {
                info: info(),
                quiz: quiz()
            }
        );
        assert_eq!(pending.generation(), 3);
    }

    #[test]
    fn test_quiz_first_then_info() {
        let mut pending = PendingInsight::new(1);
        assert_eq!(pending.accept_quiz(Vec::new()), InsightProgress::Waiting);
        assert_eq!(
            pending.accept_info(info()),
            InsightProgress::Complete {
                info: info(),
                quiz: Vec::new()
            }
        );
    }
}

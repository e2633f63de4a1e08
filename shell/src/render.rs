//! Plain-text rendering of a [`ViewModel`].

use std::fmt::Write;

use shared::model::ChatRole;
use shared::view::{InfoLine, QuizView, ScreenView, ViewModel};

pub fn render(view: &ViewModel) -> String {
    let mut out = String::new();

    match &view.location {
        Some(loc) => {
            let _ = writeln!(out, "== {} ({})", loc.title, loc.kind);
            let _ = writeln!(out, "   {} [{:.5}, {:.5}]", loc.display_name, loc.lat, loc.lon);
        }
        None => out.push_str("== no location yet\n"),
    }
    if view.is_loading {
        out.push_str("   loading...\n");
    }
    if let Some(error) = &view.error {
        let _ = writeln!(out, "!! {} [{}]", error.message, error.code);
        if error.can_retry {
            out.push_str("   type 'retry' to try again or 'dismiss'\n");
        }
    }
    out.push('\n');

    match &view.screen {
        ScreenView::Home => {
            out.push_str("home: info");
            if view.can_open_quiz {
                out.push_str(" | quiz");
            }
            out.push_str(" | chat\n");
        }
        ScreenView::Info { lines, sources } => {
            if lines.is_empty() {
                out.push_str("(no briefing yet)\n");
            }
            for InfoLine { text, heading } in lines {
                if *heading {
                    let _ = writeln!(out, "\n{}", text.to_uppercase());
                } else {
                    let _ = writeln!(out, "{text}");
                }
            }
            if !sources.is_empty() {
                out.push_str("\nsources:\n");
                for source in sources {
                    let _ = writeln!(out, "  - {} <{}>", source.title, source.uri);
                }
            }
        }
        ScreenView::Quiz(quiz) => render_quiz(&mut out, quiz),
        ScreenView::Chat {
            messages,
            deep_reasoning,
        } => {
            let _ = writeln!(
                out,
                "chat (deep reasoning {})",
                if *deep_reasoning { "on" } else { "off" }
            );
            for message in messages {
                let who = match message.role {
                    ChatRole::User => "you",
                    ChatRole::Model => "guide",
                };
                let _ = writeln!(out, "{who}> {}", message.text);
            }
        }
    }
    out
}

fn render_quiz(out: &mut String, quiz: &QuizView) {
    match quiz {
        QuizView::Empty => out.push_str("no quiz for this place\n"),
        QuizView::Question {
            number,
            total,
            question,
            options,
            selected,
            feedback,
            ..
        } => {
            let _ = writeln!(out, "question {number}/{total}: {question}");
            for (i, option) in options.iter().enumerate() {
                let marker = if *selected == Some(i) { '*' } else { ' ' };
                let _ = writeln!(out, " {marker}{}. {option}", i + 1);
            }
            if let Some(feedback) = feedback {
                let verdict = if feedback.correct { "correct" } else { "wrong" };
                let _ = writeln!(
                    out,
                    "{verdict}: the answer is {}. {}",
                    feedback.answer, feedback.explanation
                );
            }
        }
        QuizView::Finished {
            score,
            total,
            percent,
        } => {
            let _ = writeln!(out, "quiz complete: {score}/{total} ({percent}%)");
        }
    }
}

//! Line commands typed at the prompt.

use shared::model::Screen;
use shared::Event;
use thiserror::Error;

pub const HELP: &str = "\
commands:
  gps                 detect location from the device
  search <text>       look a place up by name
  pick <lat> <lon>    use coordinates picked on a map
  home | info | quiz | chat
                      switch screen
  answer <n>          pick quiz option n (1-based)
  next | restart      move through the quiz
  say <text>          talk to the assistant
  deep on|off         toggle deep reasoning
  retry | dismiss     act on the current error
  help | quit";

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Dispatch(Event),
    Help,
    Quit,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("unknown command '{0}', try 'help'")]
    Unknown(String),

    #[error("usage: {0}")]
    Usage(&'static str),

    #[error("'{0}' is not a number")]
    NotANumber(String),
}

impl Command {
    pub fn parse(line: &str) -> Result<Option<Self>, CommandError> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(None);
        }
        let (word, rest) = line
            .split_once(char::is_whitespace)
            .map_or((line, ""), |(w, r)| (w, r.trim()));

        let event = match word.to_ascii_lowercase().as_str() {
            "help" | "?" => return Ok(Some(Command::Help)),
            "quit" | "exit" => return Ok(Some(Command::Quit)),
            "gps" => Event::DetectLocation,
            "search" => Event::SearchSubmitted {
                query: required(rest, "search <text>")?.to_string(),
            },
            "pick" => {
                let mut parts = rest.split_whitespace();
                let (Some(lat), Some(lon), None) = (parts.next(), parts.next(), parts.next())
                else {
                    return Err(CommandError::Usage("pick <lat> <lon>"));
                };
                Event::PickCoordinates {
                    lat: number(lat)?,
                    lon: number(lon)?,
                }
            }
            "home" => Event::Navigate(Screen::Home),
            "info" => Event::Navigate(Screen::Info),
            "quiz" => Event::Navigate(Screen::Quiz),
            "chat" => Event::Navigate(Screen::Chat),
            "answer" => {
                let n: usize = required(rest, "answer <n>")?
                    .parse()
                    .map_err(|_| CommandError::NotANumber(rest.to_string()))?;
                let option = n.checked_sub(1).ok_or(CommandError::Usage("answer <n>"))?;
                Event::AnswerSelected { option }
            }
            "next" => Event::NextQuestion,
            "restart" => Event::RestartQuiz,
            "say" => Event::SendChatMessage {
                text: required(rest, "say <text>")?.to_string(),
            },
            "deep" => match rest.to_ascii_lowercase().as_str() {
                "on" => Event::SetDeepReasoning(true),
                "off" => Event::SetDeepReasoning(false),
                _ => return Err(CommandError::Usage("deep on|off")),
            },
            "retry" => Event::RetryLastAttempt,
            "dismiss" => Event::DismissError,
            other => return Err(CommandError::Unknown(other.to_string())),
        };
        Ok(Some(Command::Dispatch(event)))
    }
}

fn required<'a>(rest: &'a str, usage: &'static str) -> Result<&'a str, CommandError> {
    if rest.is_empty() {
        Err(CommandError::Usage(usage))
    } else {
        Ok(rest)
    }
}

fn number(raw: &str) -> Result<f64, CommandError> {
    raw.parse()
        .map_err(|_| CommandError::NotANumber(raw.to_string()))
}

//! Line commands typed at the `connect` prompt.

use chronoroom_sync::{TimerId, TimerProjection};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Join(String),
    Leave,
    Create,
    Start(String),
    Stop(String),
    Reset(String),
    Delete(String),
    Note { timer: String, text: String },
    List,
    Help,
    Quit,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("unknown command `{0}` (try `help`)")]
    Unknown(String),

    #[error("usage: {0}")]
    Usage(&'static str),

    #[error("no timer matches `{0}`")]
    NoMatch(String),

    #[error("`{prefix}` is ambiguous ({matches} timers match)")]
    Ambiguous { prefix: String, matches: usize },
}

pub const HELP: &str = "\
commands:
  join <room>          join a room (leaves the current one)
  leave                leave the current room
  create               create a timer
  start <id>           start a timer
  stop <id>            stop a timer
  reset <id>           reset a timer to zero
  delete <id>          delete a timer
  note <id> <text...>  set a timer's note
  list                 show the room's timers
  help                 show this help
  quit                 exit
timer ids may be shortened to any unique prefix";

/// Parse one input line. Blank lines yield `None`.
pub fn parse(line: &str) -> Result<Option<Command>, CommandError> {
    let line = line.trim();
    let Some((word, rest)) = split_word(line) else {
        return Ok(None);
    };

    let id_arg = |usage: &'static str| -> Result<String, CommandError> {
        match split_word(rest) {
            Some((id, "")) => Ok(id.to_string()),
            _ => Err(CommandError::Usage(usage)),
        }
    };

    let command = match word {
        "join" => Command::Join(id_arg("join <room>")?),
        "leave" => Command::Leave,
        "create" | "new" => Command::Create,
        "start" | "resume" => Command::Start(id_arg("start <id>")?),
        "stop" | "pause" => Command::Stop(id_arg("stop <id>")?),
        "reset" => Command::Reset(id_arg("reset <id>")?),
        "delete" | "rm" => Command::Delete(id_arg("delete <id>")?),
        "note" => match split_word(rest) {
            Some((timer, text)) => Command::Note {
                timer: timer.to_string(),
                text: text.to_string(),
            },
            None => return Err(CommandError::Usage("note <id> <text...>")),
        },
        "list" | "ls" => Command::List,
        "help" | "?" => Command::Help,
        "quit" | "exit" => Command::Quit,
        other => return Err(CommandError::Unknown(other.to_string())),
    };
    Ok(Some(command))
}

fn split_word(s: &str) -> Option<(&str, &str)> {
    let s = s.trim_start();
    if s.is_empty() {
        return None;
    }
    match s.split_once(char::is_whitespace) {
        Some((word, rest)) => Some((word, rest.trim())),
        None => Some((s, "")),
    }
}

/// Resolve a typed id against the projection. An exact match wins, then a
/// unique prefix.
pub fn resolve(projection: &TimerProjection, typed: &str) -> Result<TimerId, CommandError> {
    let exact = TimerId::from(typed);
    if projection.contains(&exact) {
        return Ok(exact);
    }

    let matches: Vec<&TimerId> = projection
        .iter()
        .map(|t| &t.timer_id)
        .filter(|id| id.as_str().starts_with(typed))
        .collect();
    match matches.as_slice() {
        [id] => Ok((*id).clone()),
        [] => Err(CommandError::NoMatch(typed.to_string())),
        many => Err(CommandError::Ambiguous {
            prefix: typed.to_string(),
            matches: many.len(),
        }),
    }
}

use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// A parsed policy decision.
///
/// The textual forms are matched exactly; parameters follow the first `:`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Finish,
    Reset,
    Start,
    Close,
    /// `monkey:<ms>`: untimed random burst.
    Monkey { duration_ms: u64 },
    /// `cmonkey:<script>`: scripted fuzz session, one command per line.
    CommandMonkey { script: String },
    /// `event:<index>`: replay one raw event from the current snapshot.
    Event { index: usize },
}

impl FromStr for Action {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let unknown = || Error::UnknownAction(s.to_string());

        match s {
            "finish" => return Ok(Action::Finish),
            "reset" => return Ok(Action::Reset),
            "start" => return Ok(Action::Start),
            "close" => return Ok(Action::Close),
            _ => {}
        }

        let (kind, param) = s.split_once(':').ok_or_else(unknown)?;
        match kind {
            "monkey" => param
                .parse()
                .map(|duration_ms| Action::Monkey { duration_ms })
                .map_err(|_| unknown()),
            "cmonkey" => Ok(Action::CommandMonkey {
                script: param.to_string(),
            }),
            "event" => param
                .parse()
                .map(|index| Action::Event { index })
                .map_err(|_| unknown()),
            _ => Err(unknown()),
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Finish => write!(f, "finish"),
            Action::Reset => write!(f, "reset"),
            Action::Start => write!(f, "start"),
            Action::Close => write!(f, "close"),
            Action::Monkey { duration_ms } => write!(f, "monkey:{duration_ms}"),
            Action::CommandMonkey { script } => write!(f, "cmonkey:{script}"),
            Action::Event { index } => write!(f, "event:{index}"),
        }
    }
}

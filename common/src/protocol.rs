//! Line protocol spoken between players and the server.
//!
//! Every request is one line:
//!
//! ```text
//! look | help | bye | dig X Y | flag X Y | deflag X Y
//! ```
//!
//! `X` is the column and `Y` the row, both non-negative integers. A line that starts with
//! `{` is read as JSON instead, e.g. `{"action":"dig","pos":{"x":3,"y":1}}`.

use std::fmt;

use derive_more::{Display, Error};
use serde::{Deserialize, Serialize};

use crate::models::Pos;

/// Response to a `dig` that hit a bomb.
pub const BOOM: &str = "BOOM!";

/// Response to `help`.
pub const HELP: &str = "Commands: look | dig X Y | flag X Y | deflag X Y | help | bye \
(X is the column, Y the row, counting from 0)";

/// The first line a player receives after connecting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[display(
    "Welcome to Minesweeper. Players: {players} including you. Board: {cols} columns by {rows} rows. Type 'help' for help."
)]
pub struct Greeting {
    pub players: usize,
    pub rows: usize,
    pub cols: usize,
}

impl Greeting {
    /// Reads a greeting line back. `None` if the line is not one.
    pub fn parse(line: &str) -> Option<Self> {
        let rest = line.trim().strip_prefix("Welcome to Minesweeper. Players: ")?;
        let (players, rest) = rest.split_once(" including you. Board: ")?;
        let (cols, rest) = rest.split_once(" columns by ")?;
        let (rows, _) = rest.split_once(" rows.")?;
        Some(Self {
            players: players.parse().ok()?,
            rows: rows.parse().ok()?,
            cols: cols.parse().ok()?,
        })
    }
}

pub fn greeting(players: usize, rows: usize, cols: usize) -> String {
    Greeting {
        players,
        rows,
        cols,
    }
    .to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum Command {
    Look,
    Help,
    Bye,
    Dig { pos: Pos },
    Flag { pos: Pos },
    Deflag { pos: Pos },
}

#[derive(Debug, Display, Error)]
pub enum ProtocolError {
    #[display("empty command")]
    Empty,
    #[display("unknown command {name:?}")]
    UnknownCommand { name: String },
    #[display("{command} expects two coordinates")]
    MissingArgument { command: &'static str },
    #[display("invalid coordinate {value:?}")]
    InvalidCoordinate { value: String },
    #[display("unexpected input after {command}")]
    TrailingInput { command: &'static str },
    #[display("malformed JSON command: {source}")]
    Json { source: serde_json::Error },
}

impl Command {
    /// Decodes one request line. Surrounding whitespace is ignored.
    pub fn decode(line: &str) -> Result<Self, ProtocolError> {
        let line = line.trim();
        if line.starts_with('{') {
            return serde_json::from_str(line).map_err(|source| ProtocolError::Json { source });
        }

        let mut words = line.split_whitespace();
        let name = words.next().ok_or(ProtocolError::Empty)?;
        let command = match name {
            "look" => Command::Look,
            "help" => Command::Help,
            "bye" => Command::Bye,
            "dig" => Command::Dig {
                pos: read_pos("dig", &mut words)?,
            },
            "flag" => Command::Flag {
                pos: read_pos("flag", &mut words)?,
            },
            "deflag" => Command::Deflag {
                pos: read_pos("deflag", &mut words)?,
            },
            _ => {
                return Err(ProtocolError::UnknownCommand {
                    name: name.to_string(),
                });
            }
        };

        if words.next().is_some() {
            return Err(ProtocolError::TrailingInput {
                command: command.name(),
            });
        }
        Ok(command)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Command::Look => "look",
            Command::Help => "help",
            Command::Bye => "bye",
            Command::Dig { .. } => "dig",
            Command::Flag { .. } => "flag",
            Command::Deflag { .. } => "deflag",
        }
    }
}

/// Encodes the command in its text form, the inverse of [`Command::decode`].
impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Dig { pos } | Command::Flag { pos } | Command::Deflag { pos } => {
                write!(f, "{} {} {}", self.name(), pos.x, pos.y)
            }
            _ => f.write_str(self.name()),
        }
    }
}

fn read_pos<'a>(
    command: &'static str,
    words: &mut impl Iterator<Item = &'a str>,
) -> Result<Pos, ProtocolError> {
    let x = read_coordinate(command, words.next())?;
    let y = read_coordinate(command, words.next())?;
    Ok(Pos { x, y })
}

fn read_coordinate(command: &'static str, word: Option<&str>) -> Result<usize, ProtocolError> {
    let word = word.ok_or(ProtocolError::MissingArgument { command })?;
    if !word.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ProtocolError::InvalidCoordinate {
            value: word.to_string(),
        });
    }
    word.parse().map_err(|_| ProtocolError::InvalidCoordinate {
        value: word.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_text_commands() {
        assert_eq!(Command::decode("look").unwrap(), Command::Look);
        assert_eq!(Command::decode("  help \r").unwrap(), Command::Help);
        assert_eq!(Command::decode("bye").unwrap(), Command::Bye);
        assert_eq!(
            Command::decode("dig 3 7").unwrap(),
            Command::Dig {
                pos: Pos { x: 3, y: 7 }
            }
        );
        assert_eq!(
            Command::decode("flag 0 0").unwrap(),
            Command::Flag {
                pos: Pos { x: 0, y: 0 }
            }
        );
        assert_eq!(
            Command::decode("deflag 12   4").unwrap(),
            Command::Deflag {
                pos: Pos { x: 12, y: 4 }
            }
        );
    }

    #[test]
    fn decodes_json_commands() {
        assert_eq!(
            Command::decode(r#"{"action":"dig","pos":{"x":1,"y":2}}"#).unwrap(),
            Command::Dig {
                pos: Pos { x: 1, y: 2 }
            }
        );
        assert_eq!(
            Command::decode(r#"{"action":"look"}"#).unwrap(),
            Command::Look
        );
        assert!(matches!(
            Command::decode(r#"{"action":"reveal"}"#),
            Err(ProtocolError::Json { .. })
        ));
    }

    #[test]
    fn rejects_malformed_lines() {
        assert!(matches!(Command::decode(""), Err(ProtocolError::Empty)));
        assert!(matches!(
            Command::decode("explode 1 1"),
            Err(ProtocolError::UnknownCommand { name }) if name == "explode"
        ));
        assert!(matches!(
            Command::decode("dig 1"),
            Err(ProtocolError::MissingArgument { command: "dig" })
        ));
        assert!(matches!(
            Command::decode("flag -1 0"),
            Err(ProtocolError::InvalidCoordinate { value }) if value == "-1"
        ));
        assert!(matches!(
            Command::decode("dig +1 0"),
            Err(ProtocolError::InvalidCoordinate { .. })
        ));
        assert!(matches!(
            Command::decode("look around"),
            Err(ProtocolError::TrailingInput { command: "look" })
        ));
    }

    #[test]
    fn text_form_decodes_back() {
        let command = Command::Deflag {
            pos: Pos { x: 5, y: 9 },
        };
        assert_eq!(command.to_string(), "deflag 5 9");
        assert_eq!(Command::decode(&command.to_string()).unwrap(), command);
    }

    #[test]
    fn greeting_mentions_players_and_size() {
        assert_eq!(
            greeting(2, 10, 12),
            "Welcome to Minesweeper. Players: 2 including you. Board: 12 columns by 10 rows. Type 'help' for help."
        );
    }

    #[test]
    fn greeting_parses_back() {
        assert_eq!(
            Greeting::parse(&greeting(3, 16, 30)),
            Some(Greeting {
                players: 3,
                rows: 16,
                cols: 30
            })
        );
        assert_eq!(Greeting::parse("BOOM!"), None);
        assert_eq!(
            Greeting::parse("Welcome to Minesweeper. Players: many including you."),
            None
        );
    }
}

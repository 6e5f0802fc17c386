//! Command-line parsing.

use std::path::PathBuf;

use anchorloc_types::MapId;
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum UsageError {
    #[error("missing command")]
    MissingCommand,
    #[error("unknown command `{0}`")]
    UnknownCommand(String),
    #[error("missing capture sidecar path")]
    MissingCapture,
    #[error("`{flag}` expects {expected}")]
    BadValue {
        flag: &'static str,
        expected: &'static str,
    },
    #[error("unexpected argument `{0}`")]
    Unexpected(String),
}

/// Remote flavor to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flavor {
    Server,
    Geo,
}

impl Flavor {
    pub fn name(self) -> &'static str {
        match self {
            Flavor::Server => "server",
            Flavor::Geo => "geo",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalizeArgs {
    pub flavor: Flavor,
    pub capture: PathBuf,
    /// Maps to send; empty means every map in the sidecar.
    pub maps: Vec<MapId>,
    pub repeat: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Help,
    ShowConfig,
    InitConfig,
    Localize(LocalizeArgs),
}

impl Command {
    pub fn parse(args: &[String]) -> Result<Self, UsageError> {
        let (command, rest) = args.split_first().ok_or(UsageError::MissingCommand)?;
        match command.as_str() {
            "help" | "-h" | "--help" => Ok(Command::Help),
            "config" => match rest {
                [] => Ok(Command::ShowConfig),
                [sub] if sub == "init" => Ok(Command::InitConfig),
                [other, ..] => Err(UsageError::Unexpected(other.clone())),
            },
            "server" => parse_localize(Flavor::Server, rest).map(Command::Localize),
            "geo" => parse_localize(Flavor::Geo, rest).map(Command::Localize),
            other => Err(UsageError::UnknownCommand(other.to_string())),
        }
    }
}

fn parse_localize(flavor: Flavor, args: &[String]) -> Result<LocalizeArgs, UsageError> {
    let mut capture = None;
    let mut maps = Vec::new();
    let mut repeat = 1;
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--map" => {
                let id = iter
                    .next()
                    .and_then(|v| v.parse::<i32>().ok())
                    .map(MapId)
                    .filter(|m| m.is_valid())
                    .ok_or(UsageError::BadValue {
                        flag: "--map",
                        expected: "a positive map id",
                    })?;
                maps.push(id);
            }
            "--repeat" => {
                repeat = iter
                    .next()
                    .and_then(|v| v.parse::<u32>().ok())
                    .filter(|n| *n > 0)
                    .ok_or(UsageError::BadValue {
                        flag: "--repeat",
                        expected: "a positive count",
                    })?;
            }
            path if capture.is_none() && !path.starts_with("--") => {
                capture = Some(PathBuf::from(path));
            }
            other => return Err(UsageError::Unexpected(other.to_string())),
        }
    }
    Ok(LocalizeArgs {
        flavor,
        capture: capture.ok_or(UsageError::MissingCapture)?,
        maps,
        repeat,
    })
}

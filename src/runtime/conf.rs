//! Command protocol
//!
//! Drives the block registry from text configuration lines
//! (`<cmd> <id> [<arg>]`), configuration files and structured JSON commands,
//! and dumps the live blocks as `<id> <type> <state>;` records.

use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::Utf8Error;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use super::engine::EngineError;
use super::Manager;
use crate::core::block::write_stats;
use crate::core::port::Port;
use crate::core::{BkCmd, BlockId};

/// Errors reported by the command protocol
#[derive(Debug, Error)]
pub enum ConfError {
    #[error("Failed to read configuration file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed configuration line: {0:?}")]
    MalformedLine(String),

    #[error("Unknown command value: {0}")]
    UnknownCommand(i32),

    #[error("Forbidden block ID: {0}")]
    ForbiddenId(BlockId),

    #[error("Missing argument for {0}")]
    MissingArgument(BkCmd),

    #[error("Corrupted binding parameters: {0:?}")]
    InvalidBind(String),

    #[error("Malformed structured command: {0}")]
    Decode(#[from] serde_json::Error),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("{failed} of {total} configuration entries failed")]
    Rejected { failed: usize, total: usize },
}

/// Structured block command
///
/// # Example
/// ```
/// use block_engine::runtime::Command;
///
/// let cmd: Command = serde_json::from_str(r#"{"cmd":"add","id":1,"type":"hello"}"#).unwrap();
/// assert_eq!(cmd, Command::Add { id: 1.into(), bk_type: "hello".into() });
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum Command {
    Add {
        id: BlockId,
        #[serde(rename = "type")]
        bk_type: String,
    },
    Start {
        id: BlockId,
    },
    Stop {
        id: BlockId,
    },
    Del {
        id: BlockId,
    },
    Conf {
        id: BlockId,
        conf: String,
    },
    Bind {
        id: BlockId,
        port: Port,
        dest: BlockId,
    },
}

impl Command {
    /// The `(command, id, argument)` triple executed for this command
    pub fn to_parts(&self) -> (BkCmd, BlockId, Option<String>) {
        match self {
            Command::Add { id, bk_type } => (BkCmd::Add, *id, Some(bk_type.clone())),
            Command::Start { id } => (BkCmd::Start, *id, None),
            Command::Stop { id } => (BkCmd::Stop, *id, None),
            Command::Del { id } => (BkCmd::Del, *id, None),
            Command::Conf { id, conf } => (BkCmd::Conf, *id, Some(conf.clone())),
            Command::Bind { id, port, dest } => (BkCmd::Bind, *id, Some(format!("{}:{}", port, dest))),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum CommandBatch {
    One(Command),
    Many(Vec<Command>),
}

/// Split the first whitespace-delimited token off `s`
fn next_token(s: &str) -> Option<(&str, &str)> {
    let s = s.trim_start();
    if s.is_empty() {
        return None;
    }
    let end = s.find(char::is_whitespace).unwrap_or(s.len());
    Some((&s[..end], &s[end..]))
}

/// Parse a `<port>:<dest>` binding argument
fn parse_bind(arg: &str) -> Result<(Port, BlockId), ConfError> {
    let invalid = || ConfError::InvalidBind(arg.to_string());
    let (port, dest) = arg.trim().split_once(':').ok_or_else(invalid)?;
    let port = port.trim().parse::<Port>().map_err(|_| invalid())?;
    let dest = dest.trim().parse::<i32>().map_err(|_| invalid())?;
    Ok((port, BlockId(dest)))
}

impl Manager {
    /// Execute one block command
    ///
    /// # Arguments
    /// * `cmd` - The command
    /// * `id` - Target block, never the sink
    /// * `arg` - Type name for `Add`, entry for `Conf`, `<port>:<dest>` for `Bind`
    pub fn exec_cmd(&mut self, cmd: BkCmd, id: BlockId, arg: Option<&str>) -> Result<(), ConfError> {
        debug!(bk_id = %id, cmd = %cmd, arg = arg.unwrap_or(""), "Execute block command");
        if id.is_sink() {
            error!(cmd = %cmd, "Forbidden block ID");
            return Err(ConfError::ForbiddenId(id));
        }
        let missing = || {
            error!(bk_id = %id, cmd = %cmd, "Missing command argument");
            ConfError::MissingArgument(cmd)
        };

        match cmd {
            BkCmd::Add => {
                let (bk_type, _) = arg.and_then(next_token).ok_or_else(missing)?;
                self.block_add(id, bk_type)?;
            }
            BkCmd::Init => {
                if self.block_get(id).is_none() {
                    warn!(bk_id = %id, "Block not found");
                    return Err(EngineError::BlockNotFound(id).into());
                }
                debug!(bk_id = %id, "Legacy init command ignored");
            }
            BkCmd::Conf => {
                let conf = arg.map(str::trim).filter(|c| !c.is_empty()).ok_or_else(missing)?;
                self.block_conf(id, conf)?;
            }
            BkCmd::Bind => {
                let (port, dest) = parse_bind(arg.ok_or_else(missing)?).map_err(|e| {
                    error!(bk_id = %id, "{}", e);
                    e
                })?;
                self.block_bind(id, port, dest)?;
            }
            BkCmd::Start => self.block_start(id)?,
            BkCmd::Stop => self.block_stop(id)?,
            BkCmd::Del => self.block_del(id)?,
        }
        Ok(())
    }

    /// Execute a structured command
    pub fn exec_command(&mut self, command: &Command) -> Result<(), ConfError> {
        let (cmd, id, arg) = command.to_parts();
        self.exec_cmd(cmd, id, arg.as_deref())
    }

    /// Parse and execute one `<cmd> <id> [<arg>]` text line
    ///
    /// Tokens are separated by runs of whitespace; `<arg>` is the rest of the
    /// line with surrounding whitespace removed.
    pub fn conf_parse_line(&mut self, line: &str) -> Result<(), ConfError> {
        let malformed = || {
            error!(line, "Malformed configuration line");
            ConfError::MalformedLine(line.to_string())
        };
        let (cmd, rest) = next_token(line).ok_or_else(malformed)?;
        let (id, rest) = next_token(rest).ok_or_else(malformed)?;
        let code = cmd.parse::<i32>().map_err(|_| malformed())?;
        let id = id.parse::<i32>().map_err(|_| malformed())?;
        let cmd = BkCmd::try_from(code).map_err(|code| {
            error!(code, "Unknown command value");
            ConfError::UnknownCommand(code)
        })?;
        let arg = rest.trim();

        self.exec_cmd(cmd, BlockId(id), (!arg.is_empty()).then_some(arg))
    }

    /// Apply every line of a text configuration
    ///
    /// Blank lines are skipped. A failing line does not stop the others and
    /// nothing is rolled back.
    ///
    /// # Errors
    /// [`ConfError::Rejected`] if at least one line failed
    pub fn load_from_str(&mut self, text: &str) -> Result<(), ConfError> {
        self.load_lines(text.lines().map(Ok))
    }

    /// Apply a text configuration file
    ///
    /// Lines are decoded one at a time: a line that is not valid UTF-8 counts
    /// as one failed entry and the following lines are still applied.
    pub fn load_from_file(&mut self, path: impl AsRef<Path>) -> Result<(), ConfError> {
        let path = path.as_ref();
        let bytes = fs::read(path).map_err(|source| {
            error!(path = %path.display(), "Failed to read configuration file: {}", source);
            ConfError::Io {
                path: path.to_path_buf(),
                source,
            }
        })?;

        let result = self.load_lines(bytes.split(|&b| b == b'\n').map(std::str::from_utf8));
        match &result {
            Ok(()) => info!(path = %path.display(), "Configuration OK"),
            Err(e) => warn!(path = %path.display(), "Configuration KO: {}", e),
        }
        result
    }

    fn load_lines<'a>(&mut self, lines: impl Iterator<Item = Result<&'a str, Utf8Error>>) -> Result<(), ConfError> {
        let mut total = 0;
        let mut failed = 0;
        for (n, line) in lines.enumerate() {
            let line = match line {
                Ok(line) if line.trim().is_empty() => continue,
                Ok(line) => line,
                Err(e) => {
                    error!(line = n + 1, "Configuration line is not valid UTF-8: {}", e);
                    total += 1;
                    failed += 1;
                    continue;
                }
            };
            total += 1;
            if self.conf_parse_line(line).is_err() {
                failed += 1;
            }
        }
        if failed > 0 {
            return Err(ConfError::Rejected { failed, total });
        }
        Ok(())
    }

    /// Apply one structured command or an array of them
    ///
    /// Each command goes through [`Manager::exec_cmd`].
    pub fn load_from_bytes(&mut self, bytes: &[u8]) -> Result<(), ConfError> {
        let batch: CommandBatch = serde_json::from_slice(bytes).map_err(|e| {
            error!("Malformed structured command: {}", e);
            ConfError::Decode(e)
        })?;

        match batch {
            CommandBatch::One(command) => self.exec_command(&command),
            CommandBatch::Many(commands) => {
                let total = commands.len();
                let failed = commands
                    .iter()
                    .filter(|command| self.exec_command(command).is_err())
                    .count();
                if failed > 0 {
                    return Err(ConfError::Rejected { failed, total });
                }
                Ok(())
            }
        }
    }

    /// Dump the live blocks, ascending by id, as `<id> <type> <state>;` records
    pub fn conf_dump(&self) -> String {
        let mut dump = String::new();
        for entry in self.blocks() {
            let _ = write!(dump, "{} {} {};", entry.id(), entry.type_name(), entry.state().code());
        }
        dump
    }

    /// Write the block dump into `buf`, truncated to its capacity
    ///
    /// # Returns
    /// The number of bytes written
    pub fn conf_get(&self, buf: &mut [u8]) -> usize {
        let dump = self.conf_dump();
        if dump.len() > buf.len() {
            warn!(needed = dump.len(), capacity = buf.len(), "Not enough space to dump blocks");
        }
        write_stats(buf, &dump)
    }
}

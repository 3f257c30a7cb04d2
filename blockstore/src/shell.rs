//! Line-oriented command shell.
//!
//! Each input line is one command:
//!
//! - `open <db_name>`: open (or create) an image and make it current
//! - `put <local_file>`: store a local file in the current image
//! - `get <local_file>`: print a stored file
//! - `find <local_file> <key>`: print one record and the blocks read to find it
//! - `rm <local_file>`: delete a stored file
//! - `dir`: list image files
//! - `kill <db_name>`: delete an image (closing it if current)
//! - `quit`: exit
//!
//! Usage mistakes and failed operations produce a message; the shell keeps
//! accepting commands.

use std::path::Path;

use crate::storage::{Database, DatabaseError, ImageDirectory};

/// A parsed shell command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Open(String),
    Put(String),
    Get(String),
    Find { file: String, key: i32 },
    Remove(String),
    Dir,
    Kill(String),
    Quit,
}

impl Command {
    /// Parse one input line. Blank lines parse to `None`.
    pub fn parse(line: &str) -> Result<Option<Self>, ShellError> {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        let Some((&name, args)) = tokens.split_first() else {
            return Ok(None);
        };

        let command = match (name, args) {
            ("open", [db]) => Self::Open((*db).to_owned()),
            ("open", _) => return Err(ShellError::Usage("open <db_name>")),
            ("put", [file]) => Self::Put((*file).to_owned()),
            ("put", _) => return Err(ShellError::Usage("put <local_file>")),
            ("get", [file]) => Self::Get((*file).to_owned()),
            ("get", _) => return Err(ShellError::Usage("get <local_file>")),
            ("find", [file, key]) => Self::Find {
                file: (*file).to_owned(),
                key: key
                    .parse()
                    .map_err(|_| ShellError::InvalidKey((*key).to_owned()))?,
            },
            ("find", _) => return Err(ShellError::Usage("find <local_file> <key>")),
            ("rm", [file]) => Self::Remove((*file).to_owned()),
            ("rm", _) => return Err(ShellError::Usage("rm <local_file>")),
            ("dir", []) => Self::Dir,
            ("dir", _) => return Err(ShellError::Usage("dir")),
            ("kill", [db]) => Self::Kill((*db).to_owned()),
            ("kill", _) => return Err(ShellError::Usage("kill <db_name>")),
            ("quit", _) => Self::Quit,
            (other, _) => return Err(ShellError::UnknownCommand(other.to_owned())),
        };
        Ok(Some(command))
    }
}

/// Output of one command.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Reply {
    /// Lines to print.
    pub lines: Vec<String>,
    /// Whether the shell should stop.
    pub quit: bool,
}

impl Reply {
    fn line(text: String) -> Self {
        Self {
            lines: vec![text],
            quit: false,
        }
    }
}

/// Shell state: the image directory and the currently open image.
pub struct Shell {
    images: ImageDirectory,
    current: Option<Database>,
}

impl Shell {
    #[must_use]
    pub const fn new(images: ImageDirectory) -> Self {
        Self {
            images,
            current: None,
        }
    }

    /// The currently open image, if any.
    #[must_use]
    pub const fn current(&self) -> Option<&Database> {
        self.current.as_ref()
    }

    /// Parse and run one input line, turning any error into a message.
    pub fn handle_line(&mut self, line: &str) -> Reply {
        let result = Command::parse(line).and_then(|command| match command {
            Some(command) => self.execute(command),
            None => Ok(Reply::default()),
        });
        result.unwrap_or_else(|e| Reply::line(e.to_string()))
    }

    /// Run one command.
    pub fn execute(&mut self, command: Command) -> Result<Reply, ShellError> {
        match command {
            Command::Open(name) => {
                let db = self
                    .images
                    .open(&name)
                    .map_err(|e| ShellError::failed("Open", e))?;
                let reply = Reply::line(format!(
                    "Opened {} ({} files, {} free blocks)",
                    db.name(),
                    db.files().len(),
                    db.free_blocks()
                ));
                self.current = Some(db);
                Ok(reply)
            }
            Command::Put(file) => {
                let summary = self
                    .current_mut("put <local_file>")?
                    .put(Path::new(&file))
                    .map_err(|e| ShellError::failed("Put", e))?;
                Ok(Reply::line(format!(
                    "Stored {file}: {} records, {} data blocks, {} index blocks",
                    summary.records, summary.data_blocks, summary.index_blocks
                )))
            }
            Command::Get(file) => {
                let contents = self
                    .current_ref("get <local_file>")?
                    .get(&file)
                    .map_err(|e| ShellError::failed("Get", e))?;
                Ok(Reply::line(String::from_utf8_lossy(&contents).into_owned()))
            }
            Command::Find { file, key } => {
                let found = self
                    .current_ref("find <local_file> <key>")?
                    .find(&file, key)
                    .map_err(|e| ShellError::failed("Find", e))?;
                Ok(Reply::line(format!(
                    "Value: {}, Blocks Accessed: {}",
                    String::from_utf8_lossy(&found.value),
                    found.blocks_accessed
                )))
            }
            Command::Remove(file) => {
                self.current_mut("rm <local_file>")?
                    .remove(&file)
                    .map_err(|e| ShellError::failed("Remove", e))?;
                Ok(Reply::line(format!("Removed {file}")))
            }
            Command::Dir => {
                let lines = self
                    .images
                    .list_images()
                    .map_err(|e| ShellError::failed("Dir", e))?;
                Ok(Reply { lines, quit: false })
            }
            Command::Kill(name) => {
                if self.current.as_ref().is_some_and(|db| db.name() == name) {
                    self.current = None;
                }
                let removed = self
                    .images
                    .kill(&name)
                    .map_err(|e| ShellError::failed("Kill", e))?;
                Ok(Reply::line(format!("Killed {name} ({removed} files)")))
            }
            Command::Quit => Ok(Reply {
                lines: vec!["Bye!".to_owned()],
                quit: true,
            }),
        }
    }

    fn current_ref(&self, usage: &'static str) -> Result<&Database, ShellError> {
        self.current.as_ref().ok_or(ShellError::NoImageOpen(usage))
    }

    fn current_mut(&mut self, usage: &'static str) -> Result<&mut Database, ShellError> {
        self.current.as_mut().ok_or(ShellError::NoImageOpen(usage))
    }
}

/// Errors reported to the shell user.
#[derive(Debug)]
pub enum ShellError {
    /// Wrong number of arguments.
    Usage(&'static str),
    /// The first word is not a command.
    UnknownCommand(String),
    /// A `find` key is not an integer.
    InvalidKey(String),
    /// A file command ran with no image open.
    NoImageOpen(&'static str),
    /// A storage operation failed.
    Failed {
        command: &'static str,
        source: DatabaseError,
    },
}

impl ShellError {
    const fn failed(command: &'static str, source: DatabaseError) -> Self {
        Self::Failed { command, source }
    }
}

impl std::fmt::Display for ShellError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Usage(usage) => write!(f, "Usage: {usage}"),
            Self::UnknownCommand(name) => write!(f, "Unknown command: {name}"),
            Self::InvalidKey(key) => write!(f, "Invalid key: {key}"),
            Self::NoImageOpen(usage) => {
                write!(f, "Usage: {usage} (no image open, use: open <db_name>)")
            }
            Self::Failed { command, source } => write!(f, "{command} error: {source}"),
        }
    }
}

impl std::error::Error for ShellError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Failed { source, .. } => Some(source),
            Self::Usage(_) | Self::UnknownCommand(_) | Self::InvalidKey(_) | Self::NoImageOpen(_) => {
                None
            }
        }
    }
}

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Exit status for a successful get/put, including empty and truncated transfers.
pub const EXIT_OK: i32 = 0;
/// Exit status for any command-level failure.
pub const EXIT_COMMAND: i32 = 2;
/// Exit status for a malformed or privileged invocation.
pub const EXIT_INVOCATION: i32 = 126;

/// Failures of the invocation itself, before any request is looked at.
#[derive(Error, Debug)]
pub enum InvocationError {
    #[error("Bad invocation: expected -c as the first argument")]
    MissingCommandFlag,
    #[error("Refusing to run as root")]
    Privileged,
    #[error("Bad invocation: {0}")]
    BadArguments(String),
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Failures of a single get/put request.
#[derive(Error, Debug)]
pub enum CommandError {
    #[error("Incorrect number of arguments: {0}")]
    WrongArity(usize),
    #[error("Bad command: {0}")]
    UnknownAction(String),
    #[error("Invalid store: {0}")]
    UnknownStore(String),
    #[error("Request length {len} exceeds limit of {max}")]
    RequestTooLong { len: usize, max: usize },
    #[error("Request has more than {max} tokens")]
    TooManyTokens { max: usize },
    #[error("Can't put in readonly mode")]
    ReadOnly,
    #[error("Identity is empty after sanitization")]
    EmptyIdentity,
    #[error("Non-base64 byte 0x{byte:02x} at offset {offset}")]
    InvalidEncoding { offset: u64, byte: u8 },
    #[error("Not a directory: {}", .0.display())]
    NotADirectory(PathBuf),
    #[error("Dangling symlink: {}", .0.display())]
    DanglingLink(PathBuf),
    #[error("Store path length {len} exceeds limit of {max}")]
    PathTooLong { len: usize, max: usize },
    #[error("I/O error ({context}): {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },
}

impl CommandError {
    pub fn io(context: impl Into<String>, source: io::Error) -> Self {
        CommandError::Io {
            context: context.into(),
            source,
        }
    }
}

#[derive(Error, Debug)]
pub enum ShellError {
    #[error(transparent)]
    Invocation(#[from] InvocationError),
    #[error(transparent)]
    Command(#[from] CommandError),
}

impl ShellError {
    pub fn exit_code(&self) -> i32 {
        match self {
            ShellError::Invocation(_) => EXIT_INVOCATION,
            ShellError::Command(_) => EXIT_COMMAND,
        }
    }
}

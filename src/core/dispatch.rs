//! The restricted shell's dispatcher.
//!
//! One invocation walks the stages below in order. Any stage may abort, and
//! the abort records where it happened. Only [`crate::run`] turns an abort into
//! an exit status and jitter sleep.
//!
//! ```text
//! Start -> ParseInvocation -> ParseRestrictions -> ObtainRequest -> ValidateRequest
//!       -> EnforcePolicy -> ResolvePath -> PerformIo -> Done
//! ```

use crate::core::config::{OverflowPolicy, ShellConfig};
use crate::core::error::{CommandError, InvocationError, ShellError};
use crate::core::output::compact_line;
use crate::core::request::{Action, Request, parse_request};
use crate::core::resolver::{check_path_len, resolve_store_directory, store_file_path};
use crate::core::restriction::{PolicyContext, parse_restrictions};
use crate::core::tokenize::{TokenLimits, tokenize, tokenize_args};
use crate::core::transfer::{PollRead, TransferLimits, TransferResult, stream_get, stream_put};
use clap::Parser;
use std::ffi::{OsStr, OsString};
use std::fmt;
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

/// The flag sshd passes when it runs a login shell with a command string.
pub const COMMAND_FLAG: &str = "-c";

/// Environment variable sshd sets to the command the remote peer asked for.
pub const ORIGINAL_COMMAND_VAR: &str = "SSH_ORIGINAL_COMMAND";

const LOG_PREVIEW_CHARS: usize = 120;

#[derive(Parser, Debug)]
#[clap(
    name = "sshclip-shell",
    disable_help_flag = true,
    disable_version_flag = true
)]
struct ShellArgs {
    /// Restriction tokens, e.g. `user alice readonly`. Must be valid UTF-8.
    #[clap(short = 'c', num_args = 0.., allow_hyphen_values = true)]
    command: Option<Vec<String>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Start,
    ParseInvocation,
    ParseRestrictions,
    ObtainRequest,
    ValidateRequest,
    EnforcePolicy,
    ResolvePath,
    PerformIo,
    Done,
}

/// Everything the process environment contributes to one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    /// Arguments after the program name, as the OS passed them.
    pub args: Vec<OsString>,
    /// The remote peer's command, when running under sshd.
    pub original_command: Option<String>,
    /// Real uid of the process.
    pub uid: u32,
}

impl Invocation {
    pub fn from_env() -> Self {
        let args = std::env::args_os().skip(1).collect();
        let original_command =
            std::env::var_os(ORIGINAL_COMMAND_VAR).map(|c| c.to_string_lossy().into_owned());
        Self {
            args,
            original_command,
            uid: current_uid(),
        }
    }
}

/// A finished get or put.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub request: Request,
    pub policy: PolicyContext,
    pub store_path: PathBuf,
    pub transfer: TransferResult,
}

/// An invocation that stopped early.
#[derive(Debug)]
pub struct Aborted {
    pub stage: Stage,
    pub error: ShellError,
}

impl Aborted {
    pub fn exit_code(&self) -> i32 {
        self.error.exit_code()
    }
}

impl fmt::Display for Aborted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error)
    }
}

impl std::error::Error for Aborted {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

/// Real uid of the running process.
pub fn current_uid() -> u32 {
    // SAFETY: getuid has no preconditions and cannot fail.
    unsafe { libc::getuid() }
}

/// Refuse uid 0.
pub fn refuse_privileged(uid: u32) -> Result<(), InvocationError> {
    if uid == 0 {
        tracing::error!("Refusing to run as root");
        return Err(InvocationError::Privileged);
    }
    Ok(())
}

/// Check privilege and the `-c` flag, returning the restriction arguments.
///
/// Arguments that are not valid UTF-8 are rejected rather than mangled into
/// an identity.
pub fn parse_invocation(args: &[OsString], uid: u32) -> Result<Vec<String>, InvocationError> {
    refuse_privileged(uid)?;

    if args.first().map(OsString::as_os_str) != Some(OsStr::new(COMMAND_FLAG)) {
        tracing::warn!("Bad invocation");
        return Err(InvocationError::MissingCommandFlag);
    }

    let argv = std::iter::once(OsString::from("sshclip-shell")).chain(args.iter().cloned());
    let parsed = ShellArgs::try_parse_from(argv).map_err(|e| {
        tracing::warn!("Bad invocation: {}", e.kind());
        InvocationError::BadArguments(e.kind().to_string())
    })?;
    Ok(parsed.command.unwrap_or_default())
}

pub struct Dispatcher<'a> {
    config: &'a ShellConfig,
    stage: Stage,
}

impl<'a> Dispatcher<'a> {
    pub fn new(config: &'a ShellConfig) -> Self {
        Self {
            config,
            stage: Stage::Start,
        }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    fn enter(&mut self, stage: Stage) {
        tracing::trace!(?stage, "dispatch");
        self.stage = stage;
    }

    fn abort(&self, error: impl Into<ShellError>) -> Aborted {
        Aborted {
            stage: self.stage,
            error: error.into(),
        }
    }

    fn token_limits(&self) -> TokenLimits {
        TokenLimits {
            max_tokens: self.config.max_tokens,
            max_total_len: self.config.max_request_chars,
        }
    }

    fn transfer_limits(&self) -> TransferLimits {
        TransferLimits {
            max_bytes: self.config.max_transfer_bytes,
            chunk_size: self.config.chunk_size,
            read_timeout: Duration::from_millis(self.config.read_timeout_ms),
        }
    }

    /// Tokenize the remote command. Unlike restriction arguments, an
    /// over-budget remote command fails the invocation.
    fn untrusted_tokens(&self, command: &str) -> Result<Vec<String>, CommandError> {
        let tokens = tokenize(command, self.token_limits());
        if tokens.over_budget {
            tracing::error!(
                "Refusing to handle {} with length greater than {}",
                ORIGINAL_COMMAND_VAR,
                self.config.max_request_chars
            );
            return Err(CommandError::RequestTooLong {
                len: tokens.total_len,
                max: self.config.max_request_chars,
            });
        }
        if tokens.is_truncated() {
            match self.config.overflow_policy {
                OverflowPolicy::Reject => {
                    tracing::warn!("Rejecting request with {} extra tokens", tokens.dropped);
                    return Err(CommandError::TooManyTokens {
                        max: self.config.max_tokens,
                    });
                }
                OverflowPolicy::Truncate => {
                    tracing::warn!("Dropped {} request tokens past the limit", tokens.dropped)
                }
            }
        }
        Ok(tokens.tokens)
    }

    pub fn run<R, W>(
        mut self,
        invocation: &Invocation,
        input: &mut R,
        output: &mut W,
    ) -> Result<Completion, Aborted>
    where
        R: PollRead + ?Sized,
        W: Write + ?Sized,
    {
        self.enter(Stage::ParseInvocation);
        let restriction_args = parse_invocation(&invocation.args, invocation.uid)
            .map_err(|e| self.abort(e))?;

        self.enter(Stage::ParseRestrictions);
        let restriction_tokens = tokenize_args(&restriction_args, self.token_limits());
        for token in &restriction_tokens.tokens {
            tracing::debug!("argv: {}", compact_line(token, LOG_PREVIEW_CHARS));
        }
        if restriction_tokens.over_budget {
            tracing::error!(
                "Refusing to handle argv with length greater than {}",
                self.config.max_request_chars
            );
        }
        if restriction_tokens.is_truncated() {
            tracing::warn!(
                "Dropped {} argument tokens past the limit",
                restriction_tokens.dropped
            );
        }
        let policy = match invocation.original_command {
            Some(_) => parse_restrictions(&restriction_tokens.tokens),
            None => PolicyContext::default(),
        };

        self.enter(Stage::ObtainRequest);
        let request_tokens = match &invocation.original_command {
            Some(command) => {
                tracing::debug!(
                    "Running with {}: \"{}\"",
                    ORIGINAL_COMMAND_VAR,
                    compact_line(command, LOG_PREVIEW_CHARS)
                );
                self.untrusted_tokens(command).map_err(|e| self.abort(e))?
            }
            None => {
                tracing::debug!("No remote command; using arguments as the request");
                restriction_tokens.tokens
            }
        };

        self.enter(Stage::ValidateRequest);
        let request = parse_request(&request_tokens).map_err(|e| {
            match &e {
                CommandError::UnknownStore(store) => tracing::warn!(
                    "Got an invalid store: {}",
                    compact_line(store, LOG_PREVIEW_CHARS)
                ),
                other => tracing::debug!("{}", compact_line(&other.to_string(), LOG_PREVIEW_CHARS)),
            }
            self.abort(e)
        })?;

        self.enter(Stage::EnforcePolicy);
        if request.action == Action::Put && policy.read_only {
            tracing::warn!("Refusing put to {} in readonly mode", request.store);
            return Err(self.abort(CommandError::ReadOnly));
        }
        tracing::info!(
            "Action: {}, Store: {}, Read Only: {}, User: {}",
            request.action,
            request.store,
            if policy.read_only { "Yes" } else { "No" },
            policy
                .identity
                .as_ref()
                .map_or("(none)", |identity| identity.as_str())
        );

        self.enter(Stage::ResolvePath);
        let dir = resolve_store_directory(&self.config.store_root, policy.identity.as_ref())
            .map_err(|e| {
                tracing::error!("Could not get store directory: {}", e);
                self.abort(e)
            })?;
        let store_path = store_file_path(&dir, request.store);
        check_path_len(&store_path, self.config.max_path_len).map_err(|e| {
            tracing::error!("Could not get store filename: {}", e);
            self.abort(e)
        })?;
        tracing::debug!("Using store file: {}", store_path.display());

        self.enter(Stage::PerformIo);
        let limits = self.transfer_limits();
        let transfer = match request.action {
            Action::Get => stream_get(&store_path, output, &limits),
            Action::Put => stream_put(input, &store_path, &limits),
        }
        .map_err(|e| {
            if let CommandError::Io { source, .. } = &e {
                tracing::error!("[{}] {}", crate::core::telemetry::errno_name(source), e);
            }
            self.abort(e)
        })?;
        tracing::info!(
            "{} {}: read {} bytes, wrote {} bytes, truncated: {}, sha256: {}",
            request.action,
            store_path.display(),
            transfer.bytes_read,
            transfer.bytes_written,
            transfer.truncated,
            transfer.sha256
        );

        self.enter(Stage::Done);
        Ok(Completion {
            request,
            policy,
            store_path,
            transfer,
        })
    }
}

/// Run one invocation to completion or abort.
pub fn dispatch<R, W>(
    config: &ShellConfig,
    invocation: &Invocation,
    input: &mut R,
    output: &mut W,
) -> Result<Completion, Aborted>
where
    R: PollRead + ?Sized,
    W: Write + ?Sized,
{
    Dispatcher::new(config).run(invocation, input, output)
}

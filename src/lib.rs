//! sshclip-shell: a restricted shell for sharing clipboards over SSH
//!
//! **The remote peer may only `get` or `put` one of a fixed set of stores.**
//!
//! The shell is installed as the forced command (or login shell) of an SSH
//! account. sshd starts it as `sshclip-shell -c <restrictions>` and puts the
//! peer's own command in `SSH_ORIGINAL_COMMAND`.
//!
//! # Two channels
//!
//! - **Restrictions** (trusted): the words after `-c`, written by the operator
//!   in `authorized_keys`. `user <name>` namespaces the stores, `readonly`
//!   forbids puts.
//! - **Request** (untrusted): `SSH_ORIGINAL_COMMAND`, exactly
//!   `get <store>` or `put <store>` with `<store>` one of `clipboard`,
//!   `primary`, `secondary`.
//!
//! Stores live at `.sshclip_store/[<user>/]<store>` relative to the working
//! directory. Put input must already be base64 text.
//!
//! # Example
//!
//! ```text
//! # ~/.ssh/authorized_keys
//! command="sshclip-shell -c user laptop",no-pty ssh-ed25519 AAAA...
//!
//! $ base64 < notes.txt | ssh clip@host put clipboard
//! $ ssh clip@host get clipboard | base64 -d
//! ```
//!
//! # Exit status
//!
//! - `0`: success, including an empty get and a transfer cut at the size limit
//! - `2`: the request was refused or failed
//! - `126`: bad invocation, or running as root
//!
//! Every failure waits a random few seconds before exiting.
//!
//! # Crate Structure
//!
//! - [`core`]: tokenizer, parsers, resolver, transfer engine and dispatcher

pub mod core;

use crate::core::config::ShellConfig;
use crate::core::dispatch::{Aborted, Invocation, Stage, dispatch, refuse_privileged};
use crate::core::error::EXIT_OK;
use crate::core::output::compact_line;
use crate::core::telemetry;
use crate::core::transfer::PollRead;
use std::fs::File;
use std::io::{self, Write};
use std::os::fd::AsFd;
use std::path::PathBuf;

const STDERR_MESSAGE_CHARS: usize = 200;

/// Stdin as an unbuffered descriptor so readiness polling sees every byte.
fn stdin_source() -> Box<dyn PollRead> {
    match io::stdin().as_fd().try_clone_to_owned() {
        Ok(fd) => Box::new(File::from(fd)),
        Err(e) => {
            tracing::warn!("[{}] Could not duplicate stdin", telemetry::errno_name(&e));
            Box::new(io::Cursor::new(Vec::new()))
        }
    }
}

/// Print the abort, wait out the jitter and pick the exit status.
fn fail(config: &ShellConfig, aborted: Aborted) -> i32 {
    tracing::warn!(stage = ?aborted.stage, "Aborted: {}", aborted);
    let mut stderr = io::stderr();
    let _ = writeln!(
        stderr,
        "{}",
        compact_line(&aborted.to_string(), STDERR_MESSAGE_CHARS)
    );
    telemetry::jitter_sleep(config);
    aborted.exit_code()
}

/// Run one shell invocation against the real process environment and
/// return its exit status.
pub fn run() -> i32 {
    let invocation = Invocation::from_env();
    // Root gets no config read, log sink or store directory.
    if let Err(e) = refuse_privileged(invocation.uid) {
        return fail(
            &ShellConfig::default(),
            Aborted {
                stage: Stage::ParseInvocation,
                error: e.into(),
            },
        );
    }

    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    let (config, config_error) = match ShellConfig::load(&cwd) {
        Ok(config) => (config, None),
        Err(e) => (ShellConfig::default(), Some(e)),
    };
    // A missing log sink must not change what the peer sees.
    let _ = telemetry::init_logging(&config);

    let span = tracing::info_span!("invocation", id = %ulid::Ulid::new());
    let _entered = span.enter();

    let outcome = match config_error {
        Some(e) => Err(Aborted {
            stage: Stage::Start,
            error: e.into(),
        }),
        None => {
            let mut input = stdin_source();
            let stdout = io::stdout();
            let mut output = stdout.lock();
            dispatch(&config, &invocation, input.as_mut(), &mut output)
        }
    };

    match outcome {
        Ok(_) => EXIT_OK,
        Err(aborted) => fail(&config, aborted),
    }
}

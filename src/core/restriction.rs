//! Restrictions from the trusted channel.
//!
//! The operator puts these after `-c` in the forced command, e.g.
//! `command="sshclip-shell -c user alice readonly"`. They are never read
//! from the remote request.

use std::fmt;

/// A namespace for one caller's stores. Only `[A-Za-z0-9_-]` survives
/// construction, so an identity is always a single safe path component.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identity(String);

fn is_clean_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '-' || c == '_'
}

impl Identity {
    /// Strip every character outside `[A-Za-z0-9_-]`. The result may be empty.
    pub fn sanitize(raw: &str) -> Identity {
        Identity(raw.chars().filter(|c| is_clean_char(*c)).collect())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PolicyContext {
    pub identity: Option<Identity>,
    pub read_only: bool,
}

/// Scan restriction tokens left to right. `user <name>` sets the identity
/// (the last one wins), `readonly` forbids puts, anything else is ignored.
pub fn parse_restrictions<S: AsRef<str>>(tokens: &[S]) -> PolicyContext {
    let mut policy = PolicyContext::default();
    let mut iter = tokens.iter().map(AsRef::as_ref);
    while let Some(token) = iter.next() {
        match token {
            "user" => {
                if let Some(raw) = iter.next() {
                    policy.identity = Some(Identity::sanitize(raw));
                }
            }
            "readonly" => policy.read_only = true,
            other => tracing::debug!("Ignoring restriction token: {}", other),
        }
    }
    policy
}

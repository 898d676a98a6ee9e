//! Validation of the untrusted remote request.
//!
//! Pure syntax and whitelist checks. Nothing here touches the filesystem or
//! knows about identities.

use crate::core::error::CommandError;
use crate::core::store::StoreName;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Get,
    Put,
}

impl Action {
    pub fn as_str(self) -> &'static str {
        match self {
            Action::Get => "get",
            Action::Put => "put",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Request {
    pub action: Action,
    pub store: StoreName,
}

/// Accept exactly `get <store>` or `put <store>`.
pub fn parse_request<S: AsRef<str>>(tokens: &[S]) -> Result<Request, CommandError> {
    let [action, store] = tokens else {
        return Err(CommandError::WrongArity(tokens.len()));
    };

    let action = match action.as_ref() {
        "get" => Action::Get,
        "put" => Action::Put,
        other => return Err(CommandError::UnknownAction(other.to_string())),
    };

    let store = StoreName::parse(store.as_ref())
        .ok_or_else(|| CommandError::UnknownStore(store.as_ref().to_string()))?;

    Ok(Request { action, store })
}

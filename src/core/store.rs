//! Store names.
//!
//! The set of stores a session may touch is closed at build time. Anything
//! the remote peer sends is matched against this enum and never used as a
//! path component on its own.

use std::fmt;

/// One of the named byte stores a session may get or put.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreName {
    /// The regular clipboard.
    Clipboard,
    /// The X11 primary selection.
    Primary,
    /// The X11 secondary selection.
    Secondary,
}

impl StoreName {
    pub const ALL: [StoreName; 3] = [
        StoreName::Clipboard,
        StoreName::Primary,
        StoreName::Secondary,
    ];

    /// Exact, case-sensitive lookup.
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "clipboard" => Some(StoreName::Clipboard),
            "primary" => Some(StoreName::Primary),
            "secondary" => Some(StoreName::Secondary),
            _ => None,
        }
    }

    /// File name of the store inside its directory.
    pub fn as_str(self) -> &'static str {
        match self {
            StoreName::Clipboard => "clipboard",
            StoreName::Primary => "primary",
            StoreName::Secondary => "secondary",
        }
    }
}

impl fmt::Display for StoreName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

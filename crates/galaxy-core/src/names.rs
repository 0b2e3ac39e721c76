//! Environment, pool and app name rules.
//!
//! Names are spliced into `:`-separated backend keys and glob patterns,
//! so separators, wildcards and whitespace are rejected up front.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NameError {
    #[error("{kind} name is empty")]
    Empty { kind: &'static str },

    #[error("{kind} name {name:?} contains invalid character {ch:?}")]
    InvalidChar {
        kind: &'static str,
        name: String,
        ch: char,
    },
}

/// Check that `name` can be used as a key segment. `kind` is only used in
/// the error message ("app", "env", "pool").
pub fn validate_name(kind: &'static str, name: &str) -> Result<(), NameError> {
    if name.is_empty() {
        return Err(NameError::Empty { kind });
    }
    if let Some(ch) = name
        .chars()
        .find(|c| *c == ':' || *c == '*' || c.is_whitespace())
    {
        return Err(NameError::InvalidChar {
            kind,
            name: name.to_string(),
            ch,
        });
    }
    Ok(())
}

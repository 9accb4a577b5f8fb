//! Identity of a supervised process

use serde::{Deserialize, Serialize};
use std::fmt;

/// Key under which a process is registered
///
/// Two identities are equal exactly when their command strings are
/// byte-identical. Whitespace differences produce distinct identities even if
/// they resolve to the same arguments.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProcessIdentity(String);

impl ProcessIdentity {
    /// Create an identity from a command string
    pub fn new(command: impl Into<String>) -> Self {
        Self(command.into())
    }

    /// The command string this identity stands for
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProcessIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ProcessIdentity {
    fn from(command: &str) -> Self {
        Self::new(command)
    }
}

impl From<String> for ProcessIdentity {
    fn from(command: String) -> Self {
        Self(command)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_equality_is_byte_exact() {
        let a = ProcessIdentity::new("-server=a:1 -vkey=k");
        let b = ProcessIdentity::from("-server=a:1 -vkey=k");
        let spaced = ProcessIdentity::from("-server=a:1  -vkey=k");

        assert_eq!(a, b);
        assert_ne!(a, spaced);

        let set: HashSet<_> = [a, b, spaced].into_iter().collect();
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_serializes_as_plain_string() {
        let id = ProcessIdentity::new("-type=tcp");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"-type=tcp\"");
        assert_eq!(id.to_string(), "-type=tcp");
    }
}

//! # Error Definitions
//!
//! Failures surfaced to code on either side of the bridge.

use realmrpc::transport;

#[derive(Debug, Clone)]
pub enum Error {
    /// The other realm reported a failure: the target threw, or the target
    /// (method, instance, callback) could not be found. Carries its message.
    Remote(String),
    /// A function in this realm failed.
    Local(String),
    /// The message could not be posted.
    Transport(transport::Error),
    /// A value cannot cross the boundary in this direction.
    Unserializable(String),
    /// The method was not declared by the host during the handshake.
    UnknownMethod(String),
    /// The initial handshake failed or returned malformed metadata.
    Handshake(String),
    /// The bridge was torn down.
    Terminated,
}

impl Error {
    /// True for protocol misses (unknown method, released instance, missing
    /// callback) as opposed to errors thrown by the target itself.
    ///
    /// Only the exact replies the bridge itself generates count; a target
    /// that throws "card not found" threw.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::Remote(msg) => is_miss_reply(msg),
            Self::UnknownMethod(_) => true,
            _ => false,
        }
    }
}

fn is_miss_reply(msg: &str) -> bool {
    let name = |m: &str| !m.is_empty() && !m.contains(char::is_whitespace);
    let id = |m: &str| m.parse::<u64>().is_ok();

    between(msg, "API method ", " not found").is_some_and(name)
        || between(msg, "Method ", " missing on instance").is_some_and(name)
        || between(msg, "Instance ", " not found or released").is_some_and(id)
        || between(msg, "Callback ", " not found or released").is_some_and(id)
}

fn between<'a>(msg: &'a str, prefix: &str, suffix: &str) -> Option<&'a str> {
    msg.strip_prefix(prefix)?.strip_suffix(suffix)
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Remote(msg) => write!(f, "{}", msg),
            Self::Local(msg) => write!(f, "{}", msg),
            Self::Transport(e) => write!(f, "Transport error: {}", e),
            Self::Unserializable(msg) => write!(f, "Cannot serialize value: {}", msg),
            Self::UnknownMethod(name) => write!(f, "API method {} not found", name),
            Self::Handshake(msg) => write!(f, "Handshake failed: {}", msg),
            Self::Terminated => write!(f, "Bridge terminated"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Transport(e) => Some(e),
            _ => None,
        }
    }
}

impl From<transport::Error> for Error {
    fn from(e: transport::Error) -> Self {
        Self::Transport(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    fn remote(msg: &str) -> Error {
        Error::Remote(msg.to_string())
    }

    #[test]
    fn test_bridge_misses_are_not_found() {
        assert!(remote("API method shuffle not found").is_not_found());
        assert!(remote("Method reset missing on instance").is_not_found());
        assert!(remote("Instance 12 not found or released").is_not_found());
        assert!(remote("Callback 3 not found or released").is_not_found());
        assert!(Error::UnknownMethod("shuffle".into()).is_not_found());
    }

    #[test]
    fn test_thrown_messages_are_not_misses() {
        assert!(!remote("card not found in deck").is_not_found());
        assert!(!remote("API method shuffle not found, try draw").is_not_found());
        assert!(!remote("Instance of Deck not found or released").is_not_found());
        assert!(!remote("Callback  not found or released").is_not_found());
        assert!(!remote("the Method reset missing on instance").is_not_found());
        assert!(!Error::Local("Instance 1 not found or released".into()).is_not_found());
        assert!(!Error::Terminated.is_not_found());
    }
}

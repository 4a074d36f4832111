//! # Master ↔ worker message vocabulary.
//!
//! Messages are plain newline-delimited strings. The worker talks upward with
//! [`Message`]; the master talks downward with [`Command`].
//!
//! ```text
//! worker ──► master:  up | memoryUsage:<bytes> | error | warning | restartme | disconnectme
//! master ──► worker:  shutdown
//! ```
//!
//! ## Example
//! ```rust
//! use workervisor::protocol::Message;
//!
//! let msg: Message = "memoryUsage:1024".parse().unwrap();
//! assert_eq!(msg, Message::MemoryUsage(1024));
//! assert_eq!(msg.to_string(), "memoryUsage:1024");
//! ```

use std::fmt;
use std::str::FromStr;

const MEMORY_USAGE_PREFIX: &str = "memoryUsage:";

/// Message sent by a worker to its master.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Message {
    /// The application started; the worker is ready.
    Up,
    /// Periodic resident set size report, in bytes.
    MemoryUsage(u64),
    /// The application reported an error.
    Error,
    /// The application reported a warning.
    Warning,
    /// The worker asks to be replaced by a fresh instance.
    RestartMe,
    /// The worker asks to be disconnected (replaced if it was up).
    DisconnectMe,
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Message::Up => f.write_str("up"),
            Message::MemoryUsage(bytes) => write!(f, "{MEMORY_USAGE_PREFIX}{bytes}"),
            Message::Error => f.write_str("error"),
            Message::Warning => f.write_str("warning"),
            Message::RestartMe => f.write_str("restartme"),
            Message::DisconnectMe => f.write_str("disconnectme"),
        }
    }
}

/// A line that does not belong to the vocabulary.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown message: {0:?}")]
pub struct UnknownMessage(pub String);

impl FromStr for Message {
    type Err = UnknownMessage;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim_end();
        match s {
            "up" => Ok(Message::Up),
            "error" => Ok(Message::Error),
            "warning" => Ok(Message::Warning),
            "restartme" => Ok(Message::RestartMe),
            "disconnectme" => Ok(Message::DisconnectMe),
            _ => s
                .strip_prefix(MEMORY_USAGE_PREFIX)
                .and_then(|bytes| bytes.parse().ok())
                .map(Message::MemoryUsage)
                .ok_or_else(|| UnknownMessage(s.to_string())),
        }
    }
}

/// Command sent by the master to a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Stop the application and exit.
    Shutdown,
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Shutdown => f.write_str("shutdown"),
        }
    }
}

impl FromStr for Command {
    type Err = UnknownMessage;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim_end() {
            "shutdown" => Ok(Command::Shutdown),
            other => Err(UnknownMessage(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_fixed_vocabulary() {
        assert_eq!("up".parse(), Ok(Message::Up));
        assert_eq!("disconnectme\n".parse(), Ok(Message::DisconnectMe));
        assert_eq!("restartme".parse(), Ok(Message::RestartMe));
        assert_eq!("shutdown".parse(), Ok(Command::Shutdown));
    }

    #[test]
    fn rejects_malformed_memory_usage() {
        assert!("memoryUsage:".parse::<Message>().is_err());
        assert!("memoryUsage:12kb".parse::<Message>().is_err());
        assert!("UP".parse::<Message>().is_err());
    }

    #[test]
    fn memory_usage_keeps_payload() {
        let msg = Message::MemoryUsage(52_428_800);
        assert_eq!(msg.to_string(), "memoryUsage:52428800");
        assert_eq!(msg.to_string().parse(), Ok(msg));
    }
}

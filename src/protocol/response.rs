//! Command replies.

use core::fmt;

/// Success sentinel.
pub const SUCCESS: &str = "<O>";

/// Failure sentinel.
pub const FAILED: &str = "<X>";

/// What a command handler hands back to the transport.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Response {
    /// `<O>`
    Success,
    /// `<X>`
    Failed,
    /// Nothing is sent back.
    NoResponse,
    /// Preformatted status text, one or more `<...>` frames.
    Status(String),
}

impl Response {
    /// Join status frames back to back, or [`Response::Failed`] when there
    /// are none.
    pub fn from_lines(lines: Vec<String>) -> Self {
        if lines.is_empty() {
            Response::Failed
        } else {
            Response::Status(lines.concat())
        }
    }

    /// Whether anything should be written back.
    pub fn is_empty(&self) -> bool {
        match self {
            Response::NoResponse => true,
            Response::Status(text) => text.is_empty(),
            _ => false,
        }
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Response::Success => f.write_str(SUCCESS),
            Response::Failed => f.write_str(FAILED),
            Response::NoResponse => Ok(()),
            Response::Status(text) => f.write_str(text),
        }
    }
}

//! Framing and dispatch of `<ID arg ...>` commands.
//!
//! # Framing
//!
//! | Input | Effect |
//! |-------|--------|
//! | bytes before the first `<` | discarded |
//! | `<...>` | one frame, dispatched |
//! | `<...` without `>` | kept for the next [`feed`](CommandDispatcher::feed) |
//! | `<ab<cd>` | `<ab` dropped as malformed, `<cd>` dispatched |
//!
//! A frame's interior is split on whitespace; the first token is the
//! command ID, matched exactly against the registered handlers.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use rs_dcc_station::protocol::{CommandDispatcher, CommandRegistry, Response};
//!
//! let commands = Arc::new(CommandRegistry::new());
//! commands.register_command("ping", |_args| Ok(Response::Status("<pong>".into())));
//!
//! let mut dispatcher = CommandDispatcher::new(commands);
//! assert!(dispatcher.feed(b"<pi").is_empty());
//! assert_eq!(dispatcher.feed(b"ng>"), vec![Response::Status("<pong>".into())]);
//! ```

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use tracing::{debug, warn};

use crate::error::CommandError;

use super::response::Response;

/// A command handler: receives the arguments after the ID.
pub type CommandHandler = Arc<dyn Fn(&[&str]) -> Result<Response, CommandError> + Send + Sync>;

/// Table of command handlers keyed by ID, shared by every connection.
#[derive(Default)]
pub struct CommandRegistry {
    handlers: RwLock<HashMap<String, CommandHandler>>,
}

impl CommandRegistry {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `id`.
    ///
    /// The first registration of an ID wins; later ones are ignored and
    /// return `false`.
    pub fn register_command<F>(&self, id: &str, handler: F) -> bool
    where
        F: Fn(&[&str]) -> Result<Response, CommandError> + Send + Sync + 'static,
    {
        let mut handlers = self.handlers.write().unwrap_or_else(PoisonError::into_inner);
        if handlers.contains_key(id) {
            debug!(id, "command already registered");
            return false;
        }
        handlers.insert(id.to_string(), Arc::new(handler));
        true
    }

    /// Whether a handler exists for `id`.
    pub fn contains(&self, id: &str) -> bool {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(id)
    }

    /// Number of registered commands.
    pub fn len(&self) -> usize {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether no commands are registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Tokenize and run one frame interior (without the brackets).
    ///
    /// The handler runs after the table lock is released, so handlers may
    /// register further commands.
    pub fn process(&self, frame: &str) -> Response {
        let mut tokens = frame.split_whitespace();
        let Some(id) = tokens.next() else {
            return Response::Failed;
        };
        let args: Vec<&str> = tokens.collect();

        let handler = self
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned();
        let Some(handler) = handler else {
            debug!(id, "unknown command");
            return Response::Failed;
        };
        match handler(&args) {
            Ok(response) => response,
            Err(e) => {
                warn!(id, error = %e, "command failed");
                Response::Failed
            }
        }
    }
}

/// Per-connection framer in front of a shared [`CommandRegistry`].
pub struct CommandDispatcher {
    registry: Arc<CommandRegistry>,
    buffer: Vec<u8>,
}

impl CommandDispatcher {
    /// Create a dispatcher with an empty buffer.
    pub fn new(registry: Arc<CommandRegistry>) -> Self {
        Self {
            registry,
            buffer: Vec::new(),
        }
    }

    /// Bytes buffered for an incomplete frame.
    pub fn pending(&self) -> &[u8] {
        &self.buffer
    }

    /// Append `bytes` and dispatch every complete frame, returning each
    /// handler's response in order.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<Response> {
        self.buffer.extend_from_slice(bytes);
        let mut responses = Vec::new();

        loop {
            let Some(start) = self.buffer.iter().position(|&b| b == b'<') else {
                self.buffer.clear();
                break;
            };
            self.buffer.drain(..start);

            let Some(end) = self.buffer[1..]
                .iter()
                .position(|&b| b == b'>' || b == b'<')
                .map(|i| i + 1)
            else {
                break;
            };

            if self.buffer[end] == b'<' {
                debug!(
                    dropped = %String::from_utf8_lossy(&self.buffer[..end]),
                    "malformed frame"
                );
                self.buffer.drain(..end);
                continue;
            }

            let frame: Vec<u8> = self.buffer.drain(..=end).collect();
            let text = String::from_utf8_lossy(&frame[1..frame.len() - 1]);
            responses.push(self.registry.process(&text));
        }

        responses
    }
}

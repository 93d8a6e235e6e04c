//! Unsolicited status broadcasts.
//!
//! Some state changes are announced to every connected client, not just the
//! one that caused them: a turnout thrown from the layout bus must show up on
//! every JMRI panel. The registries push those lines into a [`StatusSink`].

/// Receiver for status lines such as `<H 5 1>`.
pub trait StatusSink: Send + Sync {
    /// Deliver `line` to every listener.
    fn broadcast(&self, line: &str);
}

/// Status sink that drops everything.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullStatus;

impl StatusSink for NullStatus {
    fn broadcast(&self, _line: &str) {}
}

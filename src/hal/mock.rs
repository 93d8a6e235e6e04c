//! Mock implementations for testing without a signal generator.
//!
//! This module provides test doubles for every collaborator trait, enabling
//! the registries and the protocol layer to be exercised on a desktop.
//!
//! # Available Mocks
//!
//! | Mock | Trait | Purpose |
//! |------|-------|---------|
//! | [`MockTrack`] | [`PacketSink`] | Records packets, controllable power state |
//! | [`MemoryStore`] | [`ConfigStore`] | In-memory document map |
//! | [`MockStatus`] | [`StatusSink`] | Records broadcast lines |
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use rs_dcc_station::hal::{MemoryStore, MockStatus, MockTrack};
//! use rs_dcc_station::TurnoutRegistry;
//!
//! let track = Arc::new(MockTrack::energized());
//! let status = Arc::new(MockStatus::new());
//! let turnouts = TurnoutRegistry::new(
//!     Arc::clone(&track),
//!     Arc::new(MemoryStore::new()),
//!     status.clone(),
//! );
//!
//! turnouts.create_or_update(5, 10, -1, Default::default());
//! turnouts.set(5, true).unwrap();
//!
//! assert_eq!(track.packets().len(), 1);
//! assert_eq!(status.lines(), vec!["<H 5 1>".to_string()]);
//! ```
//!
//! [`PacketSink`]: crate::traits::PacketSink
//! [`ConfigStore`]: crate::traits::ConfigStore
//! [`StatusSink`]: crate::traits::StatusSink

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use serde_json::Value;

use crate::error::StoreError;
use crate::traits::{ConfigStore, PacketSink, StatusSink, TrackOutput};

// ============================================================================
// Track
// ============================================================================

/// A packet captured by [`MockTrack`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SentPacket {
    /// Packet bytes, without checksum.
    pub bytes: Vec<u8>,
    /// Requested repeat count.
    pub repeat: u8,
    /// Target output.
    pub output: TrackOutput,
}

/// Mock track output for testing.
///
/// Records every queued packet. Both outputs start unpowered unless built
/// with [`MockTrack::energized`].
///
/// # Example
///
/// ```rust
/// use rs_dcc_station::hal::MockTrack;
/// use rs_dcc_station::traits::{PacketSink, TrackOutput};
///
/// let track = MockTrack::new();
/// assert!(!track.is_energized(TrackOutput::Operations));
/// track.set_energized(TrackOutput::Operations, true);
/// assert!(track.is_energized(TrackOutput::Operations));
/// ```
#[derive(Debug, Default)]
pub struct MockTrack {
    packets: Mutex<Vec<SentPacket>>,
    ops_energized: AtomicBool,
    prog_energized: AtomicBool,
    fail: bool,
}

impl MockTrack {
    /// Creates a mock track with both outputs off.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a mock track with the operations output on.
    pub fn energized() -> Self {
        let track = Self::default();
        track.ops_energized.store(true, Ordering::SeqCst);
        track
    }

    /// Make every `load_packet` call fail.
    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    /// Power an output on or off.
    pub fn set_energized(&self, output: TrackOutput, on: bool) {
        match output {
            TrackOutput::Operations => self.ops_energized.store(on, Ordering::SeqCst),
            TrackOutput::Programming => self.prog_energized.store(on, Ordering::SeqCst),
        }
    }

    /// Every packet queued so far, oldest first.
    pub fn packets(&self) -> Vec<SentPacket> {
        self.packets
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Bytes of every packet queued so far.
    pub fn packet_bytes(&self) -> Vec<Vec<u8>> {
        self.packets().into_iter().map(|p| p.bytes).collect()
    }

    /// Drain the recorded packets.
    pub fn take_packets(&self) -> Vec<SentPacket> {
        std::mem::take(&mut *self.packets.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

impl PacketSink for MockTrack {
    type Error = ();

    fn load_packet(&self, packet: &[u8], repeat: u8, output: TrackOutput) -> Result<(), ()> {
        if self.fail {
            return Err(());
        }
        self.packets
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(SentPacket {
                bytes: packet.to_vec(),
                repeat,
                output,
            });
        Ok(())
    }

    fn is_energized(&self, output: TrackOutput) -> bool {
        match output {
            TrackOutput::Operations => self.ops_energized.load(Ordering::SeqCst),
            TrackOutput::Programming => self.prog_energized.load(Ordering::SeqCst),
        }
    }
}

// ============================================================================
// Storage
// ============================================================================

/// In-memory document store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    documents: Mutex<BTreeMap<String, Value>>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store pre-populated with `documents`.
    pub fn with_documents<I, S>(documents: I) -> Self
    where
        I: IntoIterator<Item = (S, Value)>,
        S: Into<String>,
    {
        let store = Self::default();
        {
            let mut map = store.documents.lock().unwrap_or_else(PoisonError::into_inner);
            for (name, doc) in documents {
                map.insert(name.into(), doc);
            }
        }
        store
    }

    /// Sorted names of every stored document.
    pub fn names(&self) -> Vec<String> {
        self.documents
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    /// Clone of the document `name`, if present.
    pub fn get(&self, name: &str) -> Option<Value> {
        self.documents
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }
}

impl ConfigStore for MemoryStore {
    fn exists(&self, name: &str) -> bool {
        self.documents
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }

    fn load(&self, name: &str) -> Result<Value, StoreError> {
        self.get(name)
            .ok_or_else(|| StoreError::Missing(name.to_string()))
    }

    fn store(&self, name: &str, document: &Value) -> Result<(), StoreError> {
        self.documents
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), document.clone());
        Ok(())
    }

    fn remove(&self, name: &str) -> Result<(), StoreError> {
        self.documents
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name);
        Ok(())
    }
}

// ============================================================================
// Status
// ============================================================================

/// Records every broadcast status line.
#[derive(Debug, Default)]
pub struct MockStatus {
    lines: Mutex<Vec<String>>,
}

impl MockStatus {
    /// Creates an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Lines broadcast so far, oldest first.
    pub fn lines(&self) -> Vec<String> {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl StatusSink for MockStatus {
    fn broadcast(&self, line: &str) {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(line.to_string());
    }
}

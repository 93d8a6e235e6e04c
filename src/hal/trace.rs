//! Track output that logs packets instead of transmitting them.
//!
//! Used by the desktop `command_station` binary when no signal generator is
//! attached. Power state is toggled at runtime so the refresh scheduler can
//! be observed going quiet when the track is switched off.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::traits::{PacketSink, TrackOutput};

/// [`PacketSink`] that writes every packet to the `tracing` log.
#[derive(Debug)]
pub struct TraceTrack {
    ops_energized: AtomicBool,
    prog_energized: AtomicBool,
    sent: AtomicU64,
}

impl TraceTrack {
    /// Create with the given initial operations power state.
    pub fn new(ops_energized: bool) -> Self {
        Self {
            ops_energized: AtomicBool::new(ops_energized),
            prog_energized: AtomicBool::new(false),
            sent: AtomicU64::new(0),
        }
    }

    /// Power an output on or off.
    pub fn set_energized(&self, output: TrackOutput, on: bool) {
        tracing::info!(output = output.as_str(), on, "track power");
        match output {
            TrackOutput::Operations => self.ops_energized.store(on, Ordering::Relaxed),
            TrackOutput::Programming => self.prog_energized.store(on, Ordering::Relaxed),
        }
    }

    /// Number of packets accepted so far.
    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }
}

impl Default for TraceTrack {
    fn default() -> Self {
        Self::new(true)
    }
}

impl PacketSink for TraceTrack {
    type Error = core::convert::Infallible;

    fn load_packet(
        &self,
        packet: &[u8],
        repeat: u8,
        output: TrackOutput,
    ) -> Result<(), Self::Error> {
        self.sent.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(output = output.as_str(), repeat, packet = ?packet, "dcc packet");
        Ok(())
    }

    fn is_energized(&self, output: TrackOutput) -> bool {
        match output {
            TrackOutput::Operations => self.ops_energized.load(Ordering::Relaxed),
            TrackOutput::Programming => self.prog_energized.load(Ordering::Relaxed),
        }
    }
}

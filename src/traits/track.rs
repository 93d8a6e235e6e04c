//! Track output abstraction.
//!
//! The registries never drive the rails themselves. They hand finished DCC
//! packets to a [`PacketSink`], which owns the signal generator for the
//! operations (main) and programming tracks.
//!
//! # Implementation
//!
//! For testing use [`crate::hal::MockTrack`], which records every packet.
//! [`crate::hal::TraceTrack`] logs packets instead of transmitting them and
//! is what the desktop binary runs with.
//!
//! # Example
//!
//! ```rust
//! use rs_dcc_station::traits::{PacketSink, TrackOutput};
//! use rs_dcc_station::hal::MockTrack;
//!
//! let track = MockTrack::energized();
//! assert!(track.is_energized(TrackOutput::Operations));
//!
//! track.load_packet(&[0x03, 0x3F, 0x80], 0, TrackOutput::Operations).unwrap();
//! assert_eq!(track.packets().len(), 1);
//! ```

use std::sync::Arc;

/// Which track output a packet is meant for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum TrackOutput {
    /// Main line, where locomotives run.
    #[default]
    Operations,
    /// Programming track (long preamble, service mode).
    Programming,
}

impl TrackOutput {
    /// Returns the output as a lowercase string.
    #[inline]
    pub const fn as_str(&self) -> &'static str {
        match self {
            TrackOutput::Operations => "ops",
            TrackOutput::Programming => "prog",
        }
    }
}

/// Packet queue in front of the DCC signal generator.
///
/// Implementations are shared between the registries, the refresh task and
/// the layout bus, so both methods take `&self` and must be thread-safe.
///
/// # Implementation Notes
///
/// - `packet` excludes the error-detection byte
/// - `repeat` is the number of extra transmissions after the first
/// - Enqueueing must not block for long; callers may hold a registry lock
pub trait PacketSink: Send + Sync {
    /// Error type for enqueue failures.
    type Error: core::fmt::Debug;

    /// Queue `packet` for transmission on `output`.
    fn load_packet(&self, packet: &[u8], repeat: u8, output: TrackOutput)
        -> Result<(), Self::Error>;

    /// Whether `output` is currently powered.
    fn is_energized(&self, output: TrackOutput) -> bool;
}

impl<T: PacketSink + ?Sized> PacketSink for Arc<T> {
    type Error = T::Error;

    fn load_packet(
        &self,
        packet: &[u8],
        repeat: u8,
        output: TrackOutput,
    ) -> Result<(), Self::Error> {
        (**self).load_packet(packet, repeat, output)
    }

    fn is_energized(&self, output: TrackOutput) -> bool {
        (**self).is_energized(output)
    }
}

/// Queue a packet and log, rather than propagate, a failure.
pub(crate) fn send_logged<T: PacketSink + ?Sized>(
    track: &T,
    packet: &[u8],
    repeat: u8,
    output: TrackOutput,
) -> bool {
    match track.load_packet(packet, repeat, output) {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(output = output.as_str(), error = ?e, packet = ?packet, "failed to queue packet");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::MockTrack;

    #[test]
    fn output_names() {
        assert_eq!(TrackOutput::Operations.as_str(), "ops");
        assert_eq!(TrackOutput::Programming.as_str(), "prog");
        assert_eq!(TrackOutput::default(), TrackOutput::Operations);
    }

    #[test]
    fn arc_forwards_to_inner_sink() {
        let track = Arc::new(MockTrack::energized());
        let shared: Arc<MockTrack> = Arc::clone(&track);
        shared
            .load_packet(&[0x00, 0x41], 3, TrackOutput::Operations)
            .unwrap();
        assert_eq!(track.packets().len(), 1);
        assert_eq!(track.packets()[0].repeat, 3);
        assert!(PacketSink::is_energized(&shared, TrackOutput::Operations));
    }

    #[test]
    fn send_logged_reports_failure() {
        let track = MockTrack::energized().failing();
        assert!(!send_logged(&track, &[0x03, 0x3F, 0x00], 0, TrackOutput::Operations));
        assert!(track.packets().is_empty());
    }
}

//! Layout bus adapter.
//!
//! Other devices on the layout bus (boosters, a second command station, a
//! cab bus bridge) can inject packets and throttle events. The adapter
//! forwards them to the track and keeps the registries in step with what was
//! sent behind their back.

use tracing::{debug, trace};

use crate::error::RegistryError;
use crate::locomotive::Direction;
use crate::station::Station;
use crate::traits::track::send_logged;
use crate::traits::{PacketSink, TrackOutput};

/// Bridges layout bus events into a [`Station`].
pub struct LayoutBusAdapter<T: PacketSink> {
    station: Station<T>,
    repeat: u8,
}

impl<T: PacketSink + Clone> LayoutBusAdapter<T> {
    /// Attach to `station`; injected packets go out with `repeat` extra sends.
    pub fn new(station: &Station<T>, repeat: u8) -> Self {
        Self {
            station: station.clone(),
            repeat,
        }
    }
}

impl<T: PacketSink> LayoutBusAdapter<T> {
    /// Forward a raw packet to the track.
    ///
    /// A two-byte basic accessory packet also updates the matching turnout.
    /// The track sees the packet before the turnout registry does. Returns
    /// whether a turnout was reconciled.
    pub fn inject_packet(&self, bytes: &[u8], output: TrackOutput) -> bool {
        trace!(len = bytes.len(), output = output.as_str(), "bus packet");
        send_logged(self.station.track(), bytes, self.repeat, output);

        match bytes {
            [b0, b1] if output == TrackOutput::Operations => {
                self.station.turnouts().reconcile_from_bus(*b0, *b1)
            }
            _ => false,
        }
    }

    /// Emergency stop requested from the bus.
    pub fn on_emergency_stop(&self) {
        debug!("bus emergency stop");
        self.station.locos().emergency_stop();
    }

    /// Throttle change for a consist (by consist or member address) from a
    /// bus cab. Returns the consist address.
    pub fn on_consist_throttle(
        &self,
        address: u16,
        speed: i8,
        direction: Direction,
    ) -> Result<u16, RegistryError> {
        self.station
            .locos()
            .update_consist_throttle(address, speed, direction)
    }
}

//! The assembled command station core.
//!
//! [`Station`] bundles the two registries with the track they drive. It is
//! constructed once at startup, cloned into every command handler, the layout
//! bus adapter and the background tasks, and has an explicit lifecycle:
//! [`load`](Station::load) after construction, [`store`](Station::store) on
//! request or shutdown, [`clear`](Station::clear) to wipe everything.

use std::sync::Arc;

use tracing::info;

use crate::loco_registry::{LoadSummary, LocomotiveRegistry, RegistryOptions};
use crate::packet;
use crate::traits::track::send_logged;
use crate::traits::{ConfigStore, PacketSink, StatusSink, TrackOutput};
use crate::turnout::{TurnoutRegistry, ACCESSORY_REPEAT};

/// Shared handles to the registries and the track output.
pub struct Station<T: PacketSink> {
    locos: Arc<LocomotiveRegistry<T>>,
    turnouts: Arc<TurnoutRegistry<T>>,
    track: T,
}

impl<T: PacketSink + Clone> Clone for Station<T> {
    fn clone(&self) -> Self {
        Self {
            locos: Arc::clone(&self.locos),
            turnouts: Arc::clone(&self.turnouts),
            track: self.track.clone(),
        }
    }
}

impl<T: PacketSink + Clone> Station<T> {
    /// Build empty registries around `track`.
    pub fn new(
        track: T,
        store: Arc<dyn ConfigStore>,
        status: Arc<dyn StatusSink>,
        options: RegistryOptions,
    ) -> Self {
        Self {
            locos: Arc::new(LocomotiveRegistry::with_options(
                track.clone(),
                Arc::clone(&store),
                options,
            )),
            turnouts: Arc::new(TurnoutRegistry::new(track.clone(), store, status)),
            track,
        }
    }
}

impl<T: PacketSink> Station<T> {
    /// Locomotive, consist and roster registry.
    pub fn locos(&self) -> &Arc<LocomotiveRegistry<T>> {
        &self.locos
    }

    /// Turnout registry.
    pub fn turnouts(&self) -> &Arc<TurnoutRegistry<T>> {
        &self.turnouts
    }

    /// Track output.
    pub fn track(&self) -> &T {
        &self.track
    }

    /// Restore persisted state. Returns the turnout count and the
    /// locomotive registry summary.
    pub fn load(&self) -> (usize, LoadSummary) {
        let turnouts = self.turnouts.load();
        let locos = self.locos.load();
        info!(
            turnouts,
            roster = locos.roster,
            consists = locos.consists,
            "station state loaded"
        );
        (turnouts, locos)
    }

    /// Persist turnouts, roster and consists. Returns documents written.
    pub fn store(&self) -> usize {
        self.turnouts.store() + self.locos.store()
    }

    /// Drop all state and persist the empty registries.
    pub fn clear(&self) {
        self.turnouts.clear();
        self.locos.clear();
        self.locos.store();
    }

    /// Send a raw basic accessory packet when the operations output is on.
    pub fn send_accessory(&self, board: u16, index: u8, activate: bool) -> bool {
        if !self.track.is_energized(TrackOutput::Operations) {
            return false;
        }
        send_logged(
            &self.track,
            &packet::basic_accessory(board, index, activate),
            ACCESSORY_REPEAT,
            TrackOutput::Operations,
        )
    }

    /// Power, locomotive and turnout status frames, in that order.
    pub fn status_lines(&self) -> Vec<String> {
        let power = self.track.is_energized(TrackOutput::Operations) as u8;
        let mut lines = vec![format!("<p{}>", power)];
        lines.extend(self.locos.status_lines());
        lines.extend(self.turnouts.status_lines());
        lines
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::{MemoryStore, MockStatus, MockTrack};
    use crate::locomotive::Direction;
    use crate::turnout::TurnoutType;

    fn station() -> (Arc<MockTrack>, Arc<MemoryStore>, Station<Arc<MockTrack>>) {
        let track = Arc::new(MockTrack::energized());
        let store = Arc::new(MemoryStore::new());
        let station = Station::new(
            Arc::clone(&track),
            store.clone(),
            Arc::new(MockStatus::new()),
            RegistryOptions::default(),
        );
        (track, store, station)
    }

    #[test]
    fn status_lists_power_locos_then_turnouts() {
        let (_, _, station) = station();
        station
            .locos()
            .resolve_for_throttle(1, 3, 20, Direction::Forward)
            .unwrap();
        station.turnouts().create_or_update(5, 10, -1, TurnoutType::Left);
        assert_eq!(
            station.status_lines(),
            vec!["<p1>", "<T 1 20 1>", "<H 5 10 1 0>"]
        );
    }

    #[test]
    fn accessory_requires_power() {
        let (track, _, station) = station();
        assert!(station.send_accessory(1, 0, true));
        assert_eq!(track.packet_bytes(), vec![vec![0x81, 0xF9]]);
        track.set_energized(TrackOutput::Operations, false);
        assert!(!station.send_accessory(1, 0, true));
        assert_eq!(track.packets().len(), 1);
    }

    #[test]
    fn clone_shares_registries() {
        let (_, _, station) = station();
        let other = station.clone();
        other.turnouts().create_or_update(1, 4, -1, TurnoutType::Left);
        assert_eq!(station.turnouts().count(), 1);
    }

    #[test]
    fn clear_persists_empty_indexes() {
        let (_, store, station) = station();
        station.turnouts().create_or_update(1, 4, -1, TurnoutType::Left);
        station.locos().create_consist(20).unwrap();
        station.store();
        station.clear();
        assert_eq!(store.get("turnouts.json").unwrap()["count"], 0);
        assert_eq!(store.get("lococonsists.json").unwrap()["count"], 0);
        assert!(!store.exists("consist-20.json"));
    }
}

//! Turnout registry.
//!
//! A [`Turnout`] is a logical accessory driven by a DCC stationary decoder.
//! It is addressed either by a linear decoder address, from which the
//! (board, index) pair is derived, or by an explicit board address and
//! output index as the legacy `<T id addr subaddr>` command supplies them.
//!
//! The registry keeps turnouts in insertion order, emits accessory packets
//! when a turnout is thrown from a throttle, and reconciles state from
//! accessory packets observed on the layout bus without re-emitting them.
//!
//! # Persistence
//!
//! The whole registry is stored as one document, `turnouts.json`:
//!
//! ```json
//! {"count": 1, "turnouts": [
//!   {"id": 5, "address": 10, "boardAddress": 3, "subAddress": -1, "state": false, "type": 0}
//! ]}
//! ```
//!
//! `subAddress` is `-1` for turnouts whose pair is derived from `address`.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Deserializer, Serialize};
use tracing::{debug, info, warn};

use crate::accessory::{decode_basic_accessory, decompose, linear_address, AccessoryPacket};
use crate::error::RegistryError;
use crate::packet;
use crate::traits::storage::{load_as, store_as};
use crate::traits::track::send_logged;
use crate::traits::{ConfigStore, PacketSink, StatusSink, TrackOutput};

/// Document holding every turnout.
pub const TURNOUTS_FILE: &str = "turnouts.json";

/// Repeat count for accessory packets.
pub const ACCESSORY_REPEAT: u8 = 1;

/// Physical arrangement of a turnout. Persisted as its integer code.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum TurnoutType {
    /// Diverging route to the left.
    #[default]
    Left,
    /// Diverging route to the right.
    Right,
    /// Symmetric wye.
    Wye,
    /// Three-way or other multi-route turnout.
    Multi,
}

impl TurnoutType {
    /// Uppercase label used in logs.
    pub const fn as_str(&self) -> &'static str {
        match self {
            TurnoutType::Left => "LEFT",
            TurnoutType::Right => "RIGHT",
            TurnoutType::Wye => "WYE",
            TurnoutType::Multi => "MULTI",
        }
    }
}

impl From<TurnoutType> for u8 {
    fn from(kind: TurnoutType) -> u8 {
        kind as u8
    }
}

impl TryFrom<u8> for TurnoutType {
    type Error = String;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(TurnoutType::Left),
            1 => Ok(TurnoutType::Right),
            2 => Ok(TurnoutType::Wye),
            3 => Ok(TurnoutType::Multi),
            other => Err(format!("unknown turnout type {}", other)),
        }
    }
}

/// One accessory-decoder controlled turnout.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Turnout {
    id: u16,
    address: u16,
    board_address: u16,
    index: u8,
    derived: bool,
    thrown: bool,
    kind: TurnoutType,
}

impl Turnout {
    /// Create a closed turnout.
    ///
    /// An `index` of `-1` derives the board address and index from the
    /// linear `address`. Any other index is taken as-is, with `address`
    /// naming the decoder board.
    pub fn new(id: u16, address: u16, index: i16, kind: TurnoutType) -> Self {
        let mut turnout = Self {
            id,
            address,
            board_address: 0,
            index: 0,
            derived: true,
            thrown: false,
            kind,
        };
        turnout.readdress(address, index);
        turnout
    }

    fn readdress(&mut self, address: u16, index: i16) {
        self.address = address;
        if index < 0 {
            let (board, idx) = decompose(address);
            self.board_address = board;
            self.index = idx;
            self.derived = true;
        } else {
            self.board_address = address;
            self.index = (index % 4) as u8;
            self.derived = false;
        }
    }

    /// Turnout ID.
    pub fn id(&self) -> u16 {
        self.id
    }

    /// Address as configured (linear, or board for explicit turnouts).
    pub fn address(&self) -> u16 {
        self.address
    }

    /// Decoder board address.
    pub fn board_address(&self) -> u16 {
        self.board_address
    }

    /// Output index on the board (0-3).
    pub fn index(&self) -> u8 {
        self.index
    }

    /// Linear decoder address of the (board, index) pair this turnout
    /// drives. Equal to [`address`](Self::address) for derived turnouts.
    pub fn linear_address(&self) -> u16 {
        linear_address(self.board_address, self.index)
    }

    /// Whether board and index were derived from a linear address.
    pub fn is_derived(&self) -> bool {
        self.derived
    }

    /// Thrown (`true`) or closed.
    pub fn is_thrown(&self) -> bool {
        self.thrown
    }

    /// Turnout type.
    pub fn kind(&self) -> TurnoutType {
        self.kind
    }

    /// Accessory packet that moves this turnout to its current state.
    pub fn accessory(&self) -> AccessoryPacket {
        AccessoryPacket::new(self.board_address, self.index, self.thrown)
    }

    /// `<H id thrown>`, sent whenever the state changes.
    pub fn state_line(&self) -> String {
        format!("<H {} {}>", self.id, self.thrown as u8)
    }

    /// `<H id address index thrown>`, the listing format.
    pub fn status_line(&self) -> String {
        format!(
            "<H {} {} {} {}>",
            self.id, self.address, self.index, self.thrown as u8
        )
    }

    fn to_record(&self) -> TurnoutRecord {
        TurnoutRecord {
            id: self.id,
            address: self.address,
            board_address: self.board_address,
            sub_address: if self.derived { -1 } else { self.index as i16 },
            state: self.thrown,
            kind: self.kind,
        }
    }

    fn from_record(record: &TurnoutRecord) -> Self {
        let mut turnout = Turnout::new(record.id, record.address, record.sub_address, record.kind);
        turnout.thrown = record.state;
        turnout
    }
}

fn turnout_state<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum State {
        Flag(bool),
        Number(i64),
        Text(String),
    }

    Ok(match State::deserialize(deserializer)? {
        State::Flag(thrown) => thrown,
        State::Number(n) => n != 0,
        State::Text(text) => {
            text.eq_ignore_ascii_case("thrown") || text.eq_ignore_ascii_case("true")
        }
    })
}

/// Persisted form of a [`Turnout`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnoutRecord {
    /// Turnout ID.
    pub id: u16,
    /// Configured address.
    pub address: u16,
    /// Derived board address, informational on load.
    #[serde(default)]
    pub board_address: u16,
    /// Explicit index, or `-1` when derived.
    #[serde(default = "derived_sub_address")]
    pub sub_address: i16,
    /// Thrown flag.
    #[serde(default, deserialize_with = "turnout_state")]
    pub state: bool,
    /// Turnout type code.
    #[serde(rename = "type", default)]
    pub kind: TurnoutType,
}

fn derived_sub_address() -> i16 {
    -1
}

/// `turnouts.json`
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnoutDocument {
    /// Number of turnouts stored.
    #[serde(default)]
    pub count: usize,
    /// Turnouts in registry order.
    #[serde(default)]
    pub turnouts: Vec<TurnoutRecord>,
}

// ============================================================================
// Registry
// ============================================================================

/// Owns every [`Turnout`] on the layout.
///
/// Each method holds the registry lock for its whole body, including the
/// packet and status line a state change produces, so the order packets
/// reach the track matches the order states are recorded.
pub struct TurnoutRegistry<T: PacketSink> {
    turnouts: Mutex<Vec<Turnout>>,
    track: T,
    store: Arc<dyn ConfigStore>,
    status: Arc<dyn StatusSink>,
}

impl<T: PacketSink> TurnoutRegistry<T> {
    /// Create an empty registry. Call [`load`](Self::load) to restore
    /// persisted turnouts.
    pub fn new(track: T, store: Arc<dyn ConfigStore>, status: Arc<dyn StatusSink>) -> Self {
        Self {
            turnouts: Mutex::new(Vec::new()),
            track,
            store,
            status,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Turnout>> {
        self.turnouts.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create the turnout `id`, or update its address, index and type.
    pub fn create_or_update(&self, id: u16, address: u16, index: i16, kind: TurnoutType) -> Turnout {
        let mut turnouts = self.lock();
        if let Some(existing) = turnouts.iter_mut().find(|t| t.id == id) {
            existing.readdress(address, index);
            existing.kind = kind;
            debug!(
                id,
                address,
                board = existing.board_address,
                index = existing.index,
                kind = kind.as_str(),
                "turnout updated"
            );
            return existing.clone();
        }
        let turnout = Turnout::new(id, address, index, kind);
        info!(
            id,
            address,
            board = turnout.board_address,
            index = turnout.index,
            kind = kind.as_str(),
            "turnout created"
        );
        turnouts.push(turnout.clone());
        turnout
    }

    /// Throw or close the turnout `id`.
    ///
    /// Sends the accessory packet when the operations output is powered and
    /// broadcasts `<H id thrown>`.
    pub fn set(&self, id: u16, thrown: bool) -> Result<Turnout, RegistryError> {
        self.update_state(id, |_| thrown)
    }

    /// Flip the turnout `id`.
    pub fn toggle(&self, id: u16) -> Result<Turnout, RegistryError> {
        self.update_state(id, |current| !current)
    }

    fn update_state(&self, id: u16, next: impl FnOnce(bool) -> bool) -> Result<Turnout, RegistryError> {
        let mut turnouts = self.lock();
        let Some(turnout) = turnouts.iter_mut().find(|t| t.id == id) else {
            warn!(id, "unable to set state, turnout not found");
            return Err(RegistryError::TurnoutNotFound(id));
        };
        turnout.thrown = next(turnout.thrown);

        if self.track.is_energized(TrackOutput::Operations) {
            let accessory = turnout.accessory();
            send_logged(
                &self.track,
                &packet::basic_accessory(accessory.board, accessory.index, accessory.activate),
                ACCESSORY_REPEAT,
                TrackOutput::Operations,
            );
        }
        self.status.broadcast(&turnout.state_line());
        debug!(id, thrown = turnout.thrown, "turnout set");
        Ok(turnout.clone())
    }

    /// Remove the turnout `id`.
    pub fn remove(&self, id: u16) -> bool {
        let mut turnouts = self.lock();
        match turnouts.iter().position(|t| t.id == id) {
            Some(pos) => {
                turnouts.remove(pos);
                debug!(id, "turnout deleted");
                true
            }
            None => false,
        }
    }

    /// Remove the first turnout driving the linear decoder `address`.
    pub fn remove_by_address(&self, address: u16) -> bool {
        let mut turnouts = self.lock();
        match turnouts.iter().position(|t| t.linear_address() == address) {
            Some(pos) => {
                let removed = turnouts.remove(pos);
                debug!(id = removed.id, address, "turnout deleted by address");
                true
            }
            None => false,
        }
    }

    /// Apply an accessory packet seen on the layout bus.
    ///
    /// Looks up the first turnout driving the packet's board and index and
    /// sets its state from the activate bit. No packet is emitted. Returns
    /// whether a turnout was updated.
    pub fn reconcile_from_bus(&self, byte0: u8, byte1: u8) -> bool {
        let Some(observed) = decode_basic_accessory(byte0, byte1) else {
            return false;
        };
        let mut turnouts = self.lock();
        let Some(turnout) = turnouts
            .iter_mut()
            .find(|t| t.board_address == observed.board && t.index == observed.index)
        else {
            return false;
        };
        turnout.thrown = observed.activate;
        self.status.broadcast(&turnout.state_line());
        debug!(
            id = turnout.id,
            address = observed.linear_address(),
            thrown = turnout.thrown,
            "turnout reconciled from bus"
        );
        true
    }

    /// Snapshot of the turnout `id`.
    pub fn get_by_id(&self, id: u16) -> Option<Turnout> {
        self.lock().iter().find(|t| t.id == id).cloned()
    }

    /// Snapshot of the first turnout driving the linear decoder `address`.
    pub fn get_by_address(&self, address: u16) -> Option<Turnout> {
        self.lock().iter().find(|t| t.linear_address() == address).cloned()
    }

    /// Snapshot of the turnout at position `index` in registry order.
    pub fn get_by_index(&self, index: usize) -> Option<Turnout> {
        self.lock().get(index).cloned()
    }

    /// Number of turnouts.
    pub fn count(&self) -> usize {
        self.lock().len()
    }

    /// Snapshot of every turnout.
    pub fn turnouts(&self) -> Vec<Turnout> {
        self.lock().clone()
    }

    /// `<H id address index thrown>` for every turnout.
    pub fn status_lines(&self) -> Vec<String> {
        self.lock().iter().map(Turnout::status_line).collect()
    }

    /// Persist every turnout. Returns the number written.
    pub fn store(&self) -> usize {
        let document = {
            let turnouts = self.lock();
            TurnoutDocument {
                count: turnouts.len(),
                turnouts: turnouts.iter().map(Turnout::to_record).collect(),
            }
        };
        if let Err(e) = store_as(self.store.as_ref(), TURNOUTS_FILE, &document) {
            warn!(error = %e, "failed to store turnouts");
        }
        document.count
    }

    /// Replace the registry with the persisted turnouts. Returns the number
    /// loaded.
    pub fn load(&self) -> usize {
        let document: TurnoutDocument = if self.store.exists(TURNOUTS_FILE) {
            match load_as(self.store.as_ref(), TURNOUTS_FILE) {
                Ok(doc) => doc,
                Err(e) => {
                    warn!(error = %e, "failed to load turnouts");
                    return 0;
                }
            }
        } else {
            TurnoutDocument::default()
        };

        let mut turnouts = self.lock();
        turnouts.clear();
        for record in &document.turnouts {
            if turnouts.iter().any(|t| t.id == record.id) {
                warn!(id = record.id, "duplicate turnout id in store, skipping");
                continue;
            }
            turnouts.push(Turnout::from_record(record));
        }
        info!(count = turnouts.len(), "turnouts loaded");
        turnouts.len()
    }

    /// Drop every turnout and persist the empty registry.
    pub fn clear(&self) {
        self.lock().clear();
        self.store();
    }
}

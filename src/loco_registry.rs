//! Locomotive, consist and roster registry.
//!
//! [`LocomotiveRegistry`] owns three tables behind one lock:
//!
//! | Table | Entity | Lifetime |
//! |-------|--------|----------|
//! | locos | [`Locomotive`] | created on first throttle reference, transient |
//! | consists | [`Consist`] | created explicitly, persisted |
//! | roster | [`RosterEntry`] | created on demand, persisted |
//!
//! Throttle commands for an address that is a consist address, or a member
//! of one, never reach a standalone locomotive; they are routed to the
//! owning consist instead.
//!
//! # Refresh
//!
//! DCC decoders stop when they stop hearing their address. The station
//! calls [`refresh_tick`](LocomotiveRegistry::refresh_tick) on a fixed
//! period (25 ms by default); each tick re-sends the speed of every managed
//! locomotive and consist plus one rotating function group per locomotive,
//! but only while the operations output is powered.
//!
//! # Persistence
//!
//! Roster entries and consists are stored one document each, with an index
//! listing the files:
//!
//! ```text
//! locoroster.json      {"count": 2, "locos": [{"file": "roster-3.json"}, ...]}
//! roster-3.json        {"description": "...", "address": 3, ...}
//! lococonsists.json    {"count": 1, "consists": [{"file": "consist-10.json"}]}
//! consist-10.json      {"address": 10, "decoderAssisted": true, "locos": [...]}
//! ```
//!
//! [`load`](LocomotiveRegistry::load) also migrates the monolithic
//! `roster.json` / `consists.json` layout written by older firmware.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, error, info, warn};

use crate::consist::{
    consist_file, Consist, ConsistIndex, LegacyConsistDocument, CONSIST_INDEX_FILE,
    LEGACY_CONSIST_FILE, MAX_CONSIST_ADDRESS,
};
use crate::error::RegistryError;
use crate::locomotive::{
    decode_function_bytes, Direction, FunctionGroup, Locomotive, LocomotiveStatus,
};
use crate::packet::{self, Packet, MAX_LONG_ADDRESS};
use crate::roster::{
    roster_entry_file, FileRef, LegacyRosterDocument, RosterEntry, RosterIndex,
    LEGACY_ROSTER_FILE, ROSTER_INDEX_FILE,
};
use crate::traits::storage::{load_as, remove_logged, store_as};
use crate::traits::track::send_logged;
use crate::traits::{ConfigStore, PacketSink, TrackOutput};

/// Repeat counts and policies for [`LocomotiveRegistry`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RegistryOptions {
    /// Extra transmissions of the broadcast emergency stop.
    pub estop_repeat: u8,
    /// Extra transmissions of packets caused directly by a command.
    pub update_repeat: u8,
    /// Create a roster entry the first time a locomotive is driven.
    pub auto_create_roster_entries: bool,
}

impl Default for RegistryOptions {
    fn default() -> Self {
        Self {
            estop_repeat: 200,
            update_repeat: 2,
            auto_create_roster_entries: true,
        }
    }
}

/// Result of a throttle command.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ThrottleOutcome {
    /// A standalone locomotive was updated.
    Locomotive(LocomotiveStatus),
    /// The command was routed to the consist at this address.
    Consist(u16),
}

impl ThrottleOutcome {
    /// Text protocol reply, if any. Consist updates are silent.
    pub fn reply(&self) -> Option<String> {
        match self {
            ThrottleOutcome::Locomotive(status) => Some(status.to_protocol()),
            ThrottleOutcome::Consist(_) => None,
        }
    }
}

/// Counts reported by [`LocomotiveRegistry::load`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LoadSummary {
    /// Roster entries now in the registry.
    pub roster: usize,
    /// Consists now in the registry.
    pub consists: usize,
    /// A legacy document was imported and the new layout written.
    pub migrated: bool,
}

#[derive(Debug, Default)]
struct LocoTables {
    locos: Vec<Locomotive>,
    consists: Vec<Consist>,
    roster: Vec<RosterEntry>,
}

impl LocoTables {
    fn consist_index_for(&self, address: u16) -> Option<usize> {
        self.consists
            .iter()
            .position(|c| c.address() == address || c.contains(address))
    }

    fn is_consist_address(&self, address: u16) -> bool {
        self.consists.iter().any(|c| c.address() == address)
    }

    fn consist_with_member(&self, address: u16) -> Option<&Consist> {
        self.consists.iter().find(|c| c.contains(address))
    }

    /// Forget any standalone locomotive at `address`; it is now driven
    /// through a consist.
    fn drop_standalone(&mut self, address: u16) {
        let before = self.locos.len();
        self.locos.retain(|l| l.address() != address);
        if self.locos.len() != before {
            debug!(address, "standalone locomotive absorbed by consist");
        }
    }

    fn ensure_roster_entry(&mut self, address: u16) -> bool {
        if self.roster.iter().any(|e| e.address == address) {
            return false;
        }
        debug!(address, "no roster entry for address, creating");
        self.roster.push(RosterEntry::new(address));
        true
    }
}

fn check_address(address: u16) -> Result<u16, RegistryError> {
    if address == 0 || address > MAX_LONG_ADDRESS {
        Err(RegistryError::InvalidAddress(address))
    } else {
        Ok(address)
    }
}

/// Owns every locomotive, consist and roster entry.
///
/// Every public method holds the registry lock for its whole body, packet
/// sends included, so a refresh tick never interleaves with a command.
pub struct LocomotiveRegistry<T: PacketSink> {
    tables: Mutex<LocoTables>,
    track: T,
    store: Arc<dyn ConfigStore>,
    options: RegistryOptions,
}

impl<T: PacketSink> LocomotiveRegistry<T> {
    /// Create an empty registry with default options.
    pub fn new(track: T, store: Arc<dyn ConfigStore>) -> Self {
        Self::with_options(track, store, RegistryOptions::default())
    }

    /// Create an empty registry.
    pub fn with_options(track: T, store: Arc<dyn ConfigStore>, options: RegistryOptions) -> Self {
        Self {
            tables: Mutex::new(LocoTables::default()),
            track,
            store,
            options,
        }
    }

    /// Options in effect.
    pub fn options(&self) -> &RegistryOptions {
        &self.options
    }

    fn lock(&self) -> MutexGuard<'_, LocoTables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn send(&self, packet: &Packet, repeat: u8) -> bool {
        send_logged(&self.track, packet, repeat, TrackOutput::Operations)
    }

    fn send_all(&self, packets: &[Packet], repeat: u8) -> usize {
        packets.iter().filter(|p| self.send(p, repeat)).count()
    }

    // ========================================================================
    // Throttle
    // ========================================================================

    /// Legacy `<t register address speed dir>` throttle update.
    ///
    /// Consist addresses and consist members are routed to
    /// [`update_consist_throttle`](Self::update_consist_throttle). Otherwise
    /// the locomotive bound to `register` is found or created, pointed at
    /// `address`, and an immediate speed packet is sent.
    pub fn resolve_for_throttle(
        &self,
        register: u8,
        address: u16,
        speed: i8,
        direction: Direction,
    ) -> Result<ThrottleOutcome, RegistryError> {
        check_address(address)?;
        let mut tables = self.lock();

        if let Some(idx) = tables.consist_index_for(address) {
            let consist = self.drive_consist(&mut tables, idx, speed, direction);
            return Ok(ThrottleOutcome::Consist(consist));
        }

        let by_register = if register == 0 {
            None
        } else {
            tables.locos.iter().position(|l| l.register() == register)
        };
        let position =
            by_register.or_else(|| tables.locos.iter().position(|l| l.address() == address));
        let position = match position {
            Some(pos) => pos,
            None => {
                tables.locos.push(Locomotive::new(register, address));
                if self.options.auto_create_roster_entries {
                    tables.ensure_roster_entry(address);
                }
                tables.locos.len() - 1
            }
        };

        let loco = &mut tables.locos[position];
        loco.set_register(register);
        loco.set_address(address);
        loco.set_speed(speed);
        loco.set_direction(direction);
        let status = loco.status();
        let update = loco.speed_packet();

        // one locomotive per address
        let mut current = 0;
        tables.locos.retain(|l| {
            let keep = current == position || l.address() != address;
            current += 1;
            keep
        });

        self.send(&update, self.options.update_repeat);
        debug!(register, address, speed = status.speed, direction = direction.as_str(), "throttle");
        Ok(ThrottleOutcome::Locomotive(status))
    }

    /// Extended throttle update by address alone.
    ///
    /// `speed` or `direction` of `-1` leaves that field unchanged.
    pub fn resolve_for_throttle_ex(
        &self,
        address: u16,
        speed: i16,
        direction: i8,
    ) -> Result<ThrottleOutcome, RegistryError> {
        check_address(address)?;
        let mut tables = self.lock();

        if let Some(idx) = tables.consist_index_for(address) {
            let consist = &tables.consists[idx];
            let speed = if speed >= 0 { clamp_speed(speed) } else { consist.speed() };
            let direction = if direction >= 0 {
                Direction::from_flag(direction == 1)
            } else {
                consist.direction()
            };
            let consist = self.drive_consist(&mut tables, idx, speed, direction);
            return Ok(ThrottleOutcome::Consist(consist));
        }

        let idx = self.managed_index(&mut tables, address);
        let loco = &mut tables.locos[idx];
        if speed >= 0 {
            loco.set_speed(clamp_speed(speed));
        }
        if direction >= 0 {
            loco.set_direction(Direction::from_flag(direction == 1));
        }
        let update = loco.speed_packet();
        let status = loco.status();
        self.send(&update, self.options.update_repeat);
        Ok(ThrottleOutcome::Locomotive(status))
    }

    fn managed_index(&self, tables: &mut LocoTables, address: u16) -> usize {
        if let Some(pos) = tables.locos.iter().position(|l| l.address() == address) {
            return pos;
        }
        tables.locos.push(Locomotive::new(0, address));
        if self.options.auto_create_roster_entries {
            tables.ensure_roster_entry(address);
        }
        tables.locos.len() - 1
    }

    fn drive_consist(
        &self,
        tables: &mut LocoTables,
        idx: usize,
        speed: i8,
        direction: Direction,
    ) -> u16 {
        let consist = &mut tables.consists[idx];
        let packets = consist.update_throttle(speed, direction);
        self.send_all(&packets, self.options.update_repeat);
        debug!(consist = consist.address(), speed, direction = direction.as_str(), "consist throttle");
        consist.address()
    }

    /// Forward a throttle change to the consist owning `address`, either as
    /// its consist address or as a member. Returns the consist address.
    pub fn update_consist_throttle(
        &self,
        address: u16,
        speed: i8,
        direction: Direction,
    ) -> Result<u16, RegistryError> {
        let mut tables = self.lock();
        let Some(idx) = tables.consist_index_for(address) else {
            warn!(address, "no consist owns address");
            return Err(RegistryError::ConsistNotFound(address));
        };
        Ok(self.drive_consist(&mut tables, idx, speed, direction))
    }

    // ========================================================================
    // Functions
    // ========================================================================

    /// Apply a legacy `<f address byte [byte2]>` function instruction.
    ///
    /// See [`decode_function_bytes`] for the byte precedence. Consist
    /// addresses are ignored (`Ok(None)`). The affected group is sent
    /// immediately. Consist members get the packet at their own address
    /// but are not added to the managed locomotives.
    pub fn decode_function_bytes(
        &self,
        address: u16,
        primary: u8,
        secondary: Option<u8>,
    ) -> Result<Option<FunctionGroup>, RegistryError> {
        check_address(address)?;
        let mut tables = self.lock();
        if tables.is_consist_address(address) {
            debug!(address, "function bytes for consist address ignored");
            return Ok(None);
        }
        let mut member;
        let loco = if tables.consist_with_member(address).is_some() {
            member = Locomotive::new(0, address);
            &mut member
        } else {
            let idx = self.managed_index(&mut tables, address);
            &mut tables.locos[idx]
        };
        let group = decode_function_bytes(loco.functions_mut(), primary, secondary);
        let update = loco.function_packet(group);
        self.send(&update, self.options.update_repeat);
        Ok(Some(group))
    }

    /// Set a single function. Out of range functions and consist addresses
    /// are ignored (`Ok(None)`).
    pub fn set_function(
        &self,
        address: u16,
        function: u8,
        on: bool,
    ) -> Result<Option<FunctionGroup>, RegistryError> {
        check_address(address)?;
        let Some(group) = FunctionGroup::for_function(function) else {
            return Ok(None);
        };
        let mut tables = self.lock();
        if tables.is_consist_address(address) {
            return Ok(None);
        }
        let mut member;
        let loco = if tables.consist_with_member(address).is_some() {
            member = Locomotive::new(0, address);
            &mut member
        } else {
            let idx = self.managed_index(&mut tables, address);
            &mut tables.locos[idx]
        };
        loco.functions_mut().set(function, on);
        let update = loco.function_packet(group);
        self.send(&update, self.options.update_repeat);
        Ok(Some(group))
    }

    // ========================================================================
    // Refresh and emergency stop
    // ========================================================================

    /// One pass of the periodic refresh. Returns the number of packets
    /// queued; zero while the operations output is off.
    pub fn refresh_tick(&self) -> usize {
        if !self.track.is_energized(TrackOutput::Operations) {
            return 0;
        }
        let mut tables = self.lock();
        let mut sent = 0;
        for loco in tables.locos.iter_mut() {
            let group = loco.next_refresh_group();
            if self.send(&loco.speed_packet(), 0) {
                sent += 1;
            }
            if self.send(&loco.function_packet(group), 0) {
                sent += 1;
            }
        }
        for consist in tables.consists.iter() {
            sent += self.send_all(&consist.speed_packets(), 0);
        }
        sent
    }

    /// Stop everything immediately.
    ///
    /// Every locomotive and consist speed becomes the e-stop sentinel and a
    /// broadcast emergency stop is queued.
    pub fn emergency_stop(&self) {
        let mut tables = self.lock();
        for loco in tables.locos.iter_mut() {
            loco.set_speed(packet::EMERGENCY_STOP);
        }
        for consist in tables.consists.iter_mut() {
            consist.mark_emergency_stopped();
        }
        self.send(&packet::broadcast_emergency_stop(), self.options.estop_repeat);
        warn!(
            locos = tables.locos.len(),
            consists = tables.consists.len(),
            "emergency stop"
        );
    }

    // ========================================================================
    // Locomotives
    // ========================================================================

    /// Snapshot of the locomotive at `address`.
    ///
    /// With `managed` an unknown address is added to the registry; without
    /// it a transient, stopped instance is returned and nothing is retained.
    /// Consist members are never added.
    pub fn get_locomotive(&self, address: u16, managed: bool) -> Result<LocomotiveStatus, RegistryError> {
        check_address(address)?;
        let mut tables = self.lock();
        if managed && tables.consist_with_member(address).is_none() {
            let idx = self.managed_index(&mut tables, address);
            return Ok(tables.locos[idx].status());
        }
        Ok(match tables.locos.iter().find(|l| l.address() == address) {
            Some(loco) => loco.status(),
            None => Locomotive::new(0, address).status(),
        })
    }

    /// Snapshot of every managed locomotive.
    pub fn locomotives(&self) -> Vec<LocomotiveStatus> {
        self.lock().locos.iter().map(Locomotive::status).collect()
    }

    /// `<T register speed dir>` for every managed locomotive.
    pub fn status_lines(&self) -> Vec<String> {
        self.lock()
            .locos
            .iter()
            .map(|l| l.status().to_protocol())
            .collect()
    }

    /// Stop and forget the locomotive at `address`.
    pub fn remove_locomotive(&self, address: u16) -> bool {
        let mut tables = self.lock();
        let Some(pos) = tables.locos.iter().position(|l| l.address() == address) else {
            warn!(address, "locomotive not found, ignoring remove");
            return false;
        };
        let mut loco = tables.locos.remove(pos);
        loco.set_speed(0);
        self.send(&loco.speed_packet(), self.options.update_repeat);
        debug!(address, "locomotive removed");
        true
    }

    // ========================================================================
    // Consists
    // ========================================================================

    /// Create a consist.
    ///
    /// | `requested` | Result |
    /// |-------------|--------|
    /// | `0` | highest free address in 1-127, decoder assisted |
    /// | negative | decoder assisted at the absolute value |
    /// | positive | standard consist |
    ///
    /// An automatic address is free when it is neither a consist address
    /// nor a member of any consist.
    pub fn create_consist(&self, requested: i32) -> Result<u16, RegistryError> {
        let mut tables = self.lock();

        if requested == 0 {
            let free = (1..=MAX_CONSIST_ADDRESS).rev().find(|&a| {
                !tables.is_consist_address(a) && tables.consist_with_member(a).is_none()
            });
            let Some(address) = free else {
                warn!("unable to locate free address for new consist");
                return Err(RegistryError::NoFreeConsistAddress);
            };
            tables.consists.push(Consist::new(address, true));
            tables.drop_standalone(address);
            info!(address, "consist created with automatic address");
            return Ok(address);
        }

        let decoder_assisted = requested < 0;
        let magnitude = requested.unsigned_abs();
        let address = u16::try_from(magnitude)
            .map_err(|_| RegistryError::InvalidAddress(u16::MAX))
            .and_then(check_address)?;
        if decoder_assisted && address > MAX_CONSIST_ADDRESS {
            return Err(RegistryError::InvalidAddress(address));
        }
        if tables.is_consist_address(address) {
            return Err(RegistryError::ConsistExists(address));
        }
        if let Some(owner) = tables.consist_with_member(address) {
            return Err(RegistryError::AlreadyInConsist {
                address,
                consist: owner.address(),
            });
        }
        tables.consists.push(Consist::new(address, decoder_assisted));
        tables.drop_standalone(address);
        info!(address, decoder_assisted, "consist created");
        Ok(address)
    }

    /// Add `address` to the consist at `consist`.
    ///
    /// Decoder-assisted consists program the member's CV19. A standalone
    /// locomotive at `address` stops being refreshed on its own.
    pub fn add_consist_member(
        &self,
        consist: u16,
        address: u16,
        reversed: bool,
    ) -> Result<(), RegistryError> {
        check_address(address)?;
        let mut tables = self.lock();
        if address == consist || tables.is_consist_address(address) {
            return Err(RegistryError::InvalidAddress(address));
        }
        if let Some(owner) = tables.consist_with_member(address) {
            if owner.address() != consist {
                return Err(RegistryError::AlreadyInConsist {
                    address,
                    consist: owner.address(),
                });
            }
        }
        let Some(target) = tables.consists.iter_mut().find(|c| c.address() == consist) else {
            return Err(RegistryError::ConsistNotFound(consist));
        };
        let packets = target.add_member(address, reversed);
        tables.drop_standalone(address);
        self.send_all(&packets, self.options.update_repeat);
        debug!(consist, address, reversed, "consist member added");
        Ok(())
    }

    /// Release `address` from the consist at `consist`. Returns whether it
    /// was a member.
    pub fn remove_consist_member(&self, consist: u16, address: u16) -> Result<bool, RegistryError> {
        let mut tables = self.lock();
        let Some(target) = tables.consists.iter_mut().find(|c| c.address() == consist) else {
            return Err(RegistryError::ConsistNotFound(consist));
        };
        Ok(match target.remove_member(address) {
            Some(packets) => {
                self.send_all(&packets, self.options.update_repeat);
                debug!(consist, address, "consist member released");
                true
            }
            None => false,
        })
    }

    /// Release every member and delete the consist and its document.
    pub fn remove_consist(&self, address: u16) -> bool {
        let mut tables = self.lock();
        let Some(pos) = tables.consists.iter().position(|c| c.address() == address) else {
            warn!(address, "consist not found, ignoring remove");
            return false;
        };
        let mut consist = tables.consists.remove(pos);
        let packets = consist.release_all();
        self.send_all(&packets, self.options.update_repeat);
        remove_logged(self.store.as_ref(), &consist_file(address));
        info!(address, "consist removed");
        true
    }

    /// Snapshot of the consist at `address`.
    pub fn consist(&self, address: u16) -> Option<Consist> {
        self.lock()
            .consists
            .iter()
            .find(|c| c.address() == address)
            .cloned()
    }

    /// Snapshot of every consist.
    pub fn consists(&self) -> Vec<Consist> {
        self.lock().consists.clone()
    }

    /// Whether `address` is a consist address.
    pub fn is_consist_address(&self, address: u16) -> bool {
        self.lock().is_consist_address(address)
    }

    /// Whether `address` is a member of some consist.
    pub fn is_address_in_consist(&self, address: u16) -> bool {
        self.lock().consist_with_member(address).is_some()
    }

    // ========================================================================
    // Roster
    // ========================================================================

    /// Roster entry for `address`, created when missing and `create` is set.
    pub fn roster_entry(&self, address: u16, create: bool) -> Option<RosterEntry> {
        let mut tables = self.lock();
        if create {
            tables.ensure_roster_entry(address);
        }
        tables.roster.iter().find(|e| e.address == address).cloned()
    }

    /// Insert or replace the entry for `entry.address`. Returns whether it
    /// was new.
    pub fn upsert_roster_entry(&self, entry: RosterEntry) -> bool {
        let mut tables = self.lock();
        match tables.roster.iter_mut().find(|e| e.address == entry.address) {
            Some(existing) => {
                *existing = entry;
                false
            }
            None => {
                tables.roster.push(entry);
                true
            }
        }
    }

    /// Snapshot of the roster.
    pub fn roster_entries(&self) -> Vec<RosterEntry> {
        self.lock().roster.clone()
    }

    /// Entries flagged for new throttles, at most `max` when given.
    pub fn default_locos(&self, max: Option<usize>) -> Vec<RosterEntry> {
        self.lock()
            .roster
            .iter()
            .filter(|e| e.default_on_throttles)
            .take(max.unwrap_or(usize::MAX))
            .cloned()
            .collect()
    }

    /// Delete the roster entry for `address` and its document.
    pub fn remove_roster_entry(&self, address: u16) -> bool {
        let mut tables = self.lock();
        let Some(pos) = tables.roster.iter().position(|e| e.address == address) else {
            warn!(address, "roster entry doesn't exist, ignoring delete request");
            return false;
        };
        tables.roster.remove(pos);
        remove_logged(self.store.as_ref(), &roster_entry_file(address));
        debug!(address, "roster entry removed");
        true
    }

    // ========================================================================
    // Persistence
    // ========================================================================

    /// Restore the roster and consists, migrating legacy documents.
    ///
    /// Index entries whose document is missing are logged and skipped. When
    /// a legacy document was imported it is deleted and the new layout is
    /// stored immediately.
    pub fn load(&self) -> LoadSummary {
        let store = self.store.as_ref();
        let mut migrated = false;

        let mut roster: Vec<RosterEntry> = Vec::new();
        for file in index_files::<RosterIndex>(store, ROSTER_INDEX_FILE, |i| i.locos) {
            match load_as::<RosterEntry>(store, &file) {
                Ok(entry) => push_unique_entry(&mut roster, entry),
                Err(e) => error!(file = %file, error = %e, "unable to load roster entry"),
            }
        }
        if store.exists(LEGACY_ROSTER_FILE) {
            match load_as::<LegacyRosterDocument>(store, LEGACY_ROSTER_FILE) {
                Ok(legacy) => {
                    info!(count = legacy.locos.len(), "migrating legacy roster");
                    for entry in legacy.locos {
                        push_unique_entry(&mut roster, entry);
                    }
                }
                Err(e) => error!(error = %e, "unable to read legacy roster"),
            }
            remove_logged(store, LEGACY_ROSTER_FILE);
            migrated = true;
        }

        let mut consists: Vec<Consist> = Vec::new();
        for file in index_files::<ConsistIndex>(store, CONSIST_INDEX_FILE, |i| i.consists) {
            match load_as::<Consist>(store, &file) {
                Ok(consist) => push_unique_consist(&mut consists, consist),
                Err(e) => error!(file = %file, error = %e, "unable to load consist"),
            }
        }
        if store.exists(LEGACY_CONSIST_FILE) {
            match load_as::<LegacyConsistDocument>(store, LEGACY_CONSIST_FILE) {
                Ok(legacy) => {
                    info!(count = legacy.consists.len(), "migrating legacy consists");
                    for consist in legacy.consists {
                        push_unique_consist(&mut consists, consist);
                    }
                }
                Err(e) => error!(error = %e, "unable to read legacy consists"),
            }
            remove_logged(store, LEGACY_CONSIST_FILE);
            migrated = true;
        }

        let summary = LoadSummary {
            roster: roster.len(),
            consists: consists.len(),
            migrated,
        };
        {
            let mut tables = self.lock();
            tables.roster = roster;
            tables.consists = consists;
        }
        info!(roster = summary.roster, consists = summary.consists, "locomotive registry loaded");
        if migrated {
            self.store();
        }
        summary
    }

    /// Write every roster entry and consist plus both indexes. Returns the
    /// number of entity documents written.
    pub fn store(&self) -> usize {
        let (roster, consists) = {
            let tables = self.lock();
            (tables.roster.clone(), tables.consists.clone())
        };
        let store = self.store.as_ref();

        let mut roster_index = RosterIndex::default();
        for entry in &roster {
            let file = entry.file_name();
            if let Err(e) = store_as(store, &file, entry) {
                warn!(file = %file, error = %e, "failed to store roster entry");
            }
            roster_index.locos.push(FileRef { file });
        }
        roster_index.count = roster_index.locos.len();
        if let Err(e) = store_as(store, ROSTER_INDEX_FILE, &roster_index) {
            warn!(error = %e, "failed to store roster index");
        }

        let mut consist_index = ConsistIndex::default();
        for consist in &consists {
            let file = consist.file_name();
            if let Err(e) = store_as(store, &file, consist) {
                warn!(file = %file, error = %e, "failed to store consist");
            }
            consist_index.consists.push(FileRef { file });
        }
        consist_index.count = consist_index.consists.len();
        if let Err(e) = store_as(store, CONSIST_INDEX_FILE, &consist_index) {
            warn!(error = %e, "failed to store consist index");
        }

        roster.len() + consists.len()
    }

    /// Drop every locomotive, consist and roster entry, deleting the roster
    /// and consist documents. Indexes are rewritten on the next
    /// [`store`](Self::store).
    pub fn clear(&self) {
        let mut tables = self.lock();
        for entry in tables.roster.drain(..) {
            remove_logged(self.store.as_ref(), &entry.file_name());
        }
        for consist in tables.consists.drain(..) {
            remove_logged(self.store.as_ref(), &consist.file_name());
        }
        tables.locos.clear();
        info!("locomotive registry cleared");
    }
}

fn clamp_speed(speed: i16) -> i8 {
    speed.clamp(-1, packet::MAX_SPEED_STEP as i16) as i8
}

fn index_files<I>(store: &dyn ConfigStore, name: &str, files: fn(I) -> Vec<FileRef>) -> Vec<String>
where
    I: serde::de::DeserializeOwned,
{
    if !store.exists(name) {
        return Vec::new();
    }
    match load_as::<I>(store, name) {
        Ok(index) => files(index).into_iter().map(|f| f.file).collect(),
        Err(e) => {
            error!(file = name, error = %e, "unable to read index");
            Vec::new()
        }
    }
}

fn push_unique_entry(roster: &mut Vec<RosterEntry>, entry: RosterEntry) {
    if roster.iter().any(|e| e.address == entry.address) {
        warn!(address = entry.address, "duplicate roster entry, skipping");
        return;
    }
    roster.push(entry);
}

fn push_unique_consist(consists: &mut Vec<Consist>, consist: Consist) {
    if consists.iter().any(|c| c.address() == consist.address()) {
        warn!(address = consist.address(), "duplicate consist, skipping");
        return;
    }
    consists.push(consist);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::{MemoryStore, MockTrack};
    use serde_json::json;

    fn registry() -> (Arc<MockTrack>, Arc<MemoryStore>, LocomotiveRegistry<Arc<MockTrack>>) {
        let track = Arc::new(MockTrack::energized());
        let store = Arc::new(MemoryStore::new());
        let registry = LocomotiveRegistry::new(Arc::clone(&track), store.clone());
        (track, store, registry)
    }

    #[test]
    fn throttle_creates_and_updates_locomotive() {
        let (track, _, registry) = registry();
        let outcome = registry
            .resolve_for_throttle(1, 3, 50, Direction::Forward)
            .unwrap();
        assert_eq!(outcome.reply().as_deref(), Some("<T 1 50 1>"));

        let packets = track.packets();
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].bytes, vec![0x03, 0x3F, 0x80 | 51]);
        assert_eq!(packets[0].repeat, registry.options().update_repeat);

        registry.resolve_for_throttle(1, 3, 0, Direction::Reverse).unwrap();
        assert_eq!(registry.locomotives().len(), 1);
        assert_eq!(registry.locomotives()[0].direction, Direction::Reverse);
    }

    #[test]
    fn register_rebinding_keeps_addresses_unique() {
        let (_, _, registry) = registry();
        registry.resolve_for_throttle(1, 3, 10, Direction::Forward).unwrap();
        registry.resolve_for_throttle(2, 4, 10, Direction::Forward).unwrap();
        // register 2 moves to address 3, the loco on register 1 goes away
        registry.resolve_for_throttle(2, 3, 20, Direction::Forward).unwrap();
        let locos = registry.locomotives();
        assert_eq!(locos.len(), 1);
        assert_eq!((locos[0].register, locos[0].address, locos[0].speed), (2, 3, 20));
    }

    #[test]
    fn throttle_takes_over_loco_created_by_function_command() {
        let (_, _, registry) = registry();
        registry.decode_function_bytes(3, 0x90, None).unwrap();
        registry.resolve_for_throttle(5, 3, 10, Direction::Forward).unwrap();
        let locos = registry.locomotives();
        assert_eq!(locos.len(), 1);
        assert_eq!(locos[0].register, 5);
        assert!(locos[0].functions.get(0));
    }

    #[test]
    fn invalid_addresses_are_rejected() {
        let (_, _, registry) = registry();
        assert_eq!(
            registry.resolve_for_throttle(1, 0, 10, Direction::Forward),
            Err(RegistryError::InvalidAddress(0))
        );
        assert_eq!(
            registry.get_locomotive(10240, false),
            Err(RegistryError::InvalidAddress(10240))
        );
    }

    #[test]
    fn consist_member_routes_to_consist() {
        let (track, _, registry) = registry();
        registry.create_consist(20).unwrap();
        registry.add_consist_member(20, 3, false).unwrap();
        registry.add_consist_member(20, 4, true).unwrap();
        track.take_packets();

        let outcome = registry
            .resolve_for_throttle(1, 3, 40, Direction::Forward)
            .unwrap();
        assert_eq!(outcome, ThrottleOutcome::Consist(20));
        assert_eq!(outcome.reply(), None);
        assert!(registry.locomotives().is_empty());

        let bytes = track.packet_bytes();
        assert_eq!(bytes, vec![vec![3, 0x3F, 0x80 | 41], vec![4, 0x3F, 41]]);
    }

    #[test]
    fn extended_throttle_keeps_unchanged_fields() {
        let (_, _, registry) = registry();
        registry.resolve_for_throttle_ex(3, 30, 0).unwrap();
        let outcome = registry.resolve_for_throttle_ex(3, -1, -1).unwrap();
        match outcome {
            ThrottleOutcome::Locomotive(status) => {
                assert_eq!(status.speed, 30);
                assert_eq!(status.direction, Direction::Reverse);
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        registry.resolve_for_throttle_ex(3, 500, 1).unwrap();
        assert_eq!(registry.get_locomotive(3, false).unwrap().speed, 126);
    }

    #[test]
    fn extended_throttle_routes_consists() {
        let (_, _, registry) = registry();
        registry.create_consist(-10).unwrap();
        registry.add_consist_member(10, 3, false).unwrap();
        registry.resolve_for_throttle_ex(10, 25, 1).unwrap();
        let outcome = registry.resolve_for_throttle_ex(3, -1, 0).unwrap();
        assert_eq!(outcome, ThrottleOutcome::Consist(10));
        let consist = registry.consist(10).unwrap();
        assert_eq!(consist.speed(), 25);
        assert_eq!(consist.direction(), Direction::Reverse);
    }

    #[test]
    fn update_consist_throttle_unknown_address() {
        let (_, _, registry) = registry();
        assert_eq!(
            registry.update_consist_throttle(3, 10, Direction::Forward),
            Err(RegistryError::ConsistNotFound(3))
        );
    }

    #[test]
    fn function_bytes_update_state_and_send_group() {
        let (track, _, registry) = registry();
        let group = registry.decode_function_bytes(3, 0xB5, None).unwrap();
        assert_eq!(group, Some(FunctionGroup::F5F8));
        let status = registry.get_locomotive(3, false).unwrap();
        assert!(status.functions.get(5));
        assert!(status.functions.get(7));
        assert!(!status.functions.get(0));
        assert_eq!(track.packet_bytes(), vec![vec![3, 0xB5]]);
    }

    #[test]
    fn function_bytes_ignored_for_consist_address() {
        let (track, _, registry) = registry();
        registry.create_consist(20).unwrap();
        assert_eq!(registry.decode_function_bytes(20, 0x90, None).unwrap(), None);
        assert!(registry.locomotives().is_empty());
        assert!(track.packets().is_empty());
    }

    #[test]
    fn set_single_function() {
        let (track, _, registry) = registry();
        assert_eq!(
            registry.set_function(3, 14, true).unwrap(),
            Some(FunctionGroup::F13F20)
        );
        assert_eq!(registry.set_function(3, 29, true).unwrap(), None);
        assert_eq!(track.packet_bytes(), vec![vec![3, 0xDE, 0x02]]);
    }

    #[test]
    fn refresh_only_while_energized() {
        let (track, _, registry) = registry();
        registry.resolve_for_throttle(1, 3, 10, Direction::Forward).unwrap();
        registry.create_consist(-10).unwrap();
        track.take_packets();

        // speed + one function group for the loco, one packet for the consist
        assert_eq!(registry.refresh_tick(), 3);
        let packets = track.take_packets();
        assert!(packets.iter().all(|p| p.repeat == 0));
        assert_eq!(packets[1].bytes, vec![3, 0x80]);

        assert_eq!(registry.refresh_tick(), 3);
        assert_eq!(track.take_packets()[1].bytes, vec![3, 0xB0]);

        track.set_energized(TrackOutput::Operations, false);
        assert_eq!(registry.refresh_tick(), 0);
        assert!(track.packets().is_empty());
    }

    #[test]
    fn emergency_stop_sets_sentinel_and_broadcasts() {
        let (track, _, registry) = registry();
        registry.resolve_for_throttle(1, 3, 80, Direction::Forward).unwrap();
        registry.create_consist(20).unwrap();
        track.take_packets();

        registry.emergency_stop();
        assert_eq!(registry.locomotives()[0].speed, -1);
        assert_eq!(registry.consist(20).unwrap().speed(), -1);
        let packets = track.packets();
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].bytes, vec![0x00, 0x41]);
        assert_eq!(packets[0].repeat, 200);
    }

    #[test]
    fn unmanaged_lookup_is_not_retained() {
        let (_, _, registry) = registry();
        let status = registry.get_locomotive(42, false).unwrap();
        assert_eq!(status.address, 42);
        assert!(registry.locomotives().is_empty());
        registry.get_locomotive(42, true).unwrap();
        assert_eq!(registry.locomotives().len(), 1);
    }

    #[test]
    fn remove_locomotive_sends_idle() {
        let (track, _, registry) = registry();
        registry.resolve_for_throttle(1, 3, 80, Direction::Forward).unwrap();
        track.take_packets();
        assert!(registry.remove_locomotive(3));
        assert!(!registry.remove_locomotive(3));
        assert_eq!(track.packet_bytes(), vec![vec![3, 0x3F, 0x80]]);
    }

    #[test]
    fn auto_consist_address_skips_used_addresses() {
        let (_, _, registry) = registry();
        registry.create_consist(127).unwrap();
        registry.create_consist(126).unwrap();
        assert_eq!(registry.create_consist(0), Ok(125));
        assert!(registry.consist(125).unwrap().is_decoder_assisted());

        registry.add_consist_member(125, 124, false).unwrap();
        assert_eq!(registry.create_consist(0), Ok(123));
    }

    #[test]
    fn auto_consist_address_exhausted() {
        let (_, _, registry) = registry();
        for address in 1..=127 {
            registry.create_consist(address).unwrap();
        }
        assert_eq!(registry.create_consist(0), Err(RegistryError::NoFreeConsistAddress));
        assert_eq!(registry.consists().len(), 127);
    }

    #[test]
    fn consist_creation_rules() {
        let (_, _, registry) = registry();
        assert_eq!(registry.create_consist(-10), Ok(10));
        assert!(registry.consist(10).unwrap().is_decoder_assisted());
        assert_eq!(registry.create_consist(10), Err(RegistryError::ConsistExists(10)));
        assert_eq!(registry.create_consist(-200), Err(RegistryError::InvalidAddress(200)));
        assert_eq!(registry.create_consist(300), Ok(300));
        assert!(!registry.consist(300).unwrap().is_decoder_assisted());
    }

    #[test]
    fn member_of_one_consist_only() {
        let (_, _, registry) = registry();
        registry.create_consist(20).unwrap();
        registry.create_consist(21).unwrap();
        registry.add_consist_member(20, 3, false).unwrap();
        assert_eq!(
            registry.add_consist_member(21, 3, false),
            Err(RegistryError::AlreadyInConsist { address: 3, consist: 20 })
        );
        assert_eq!(
            registry.add_consist_member(20, 21, false),
            Err(RegistryError::InvalidAddress(21))
        );
        assert_eq!(
            registry.add_consist_member(99, 4, false),
            Err(RegistryError::ConsistNotFound(99))
        );
    }

    #[test]
    fn joining_consist_drops_standalone_loco() {
        let (_, _, registry) = registry();
        registry.resolve_for_throttle(1, 3, 10, Direction::Forward).unwrap();
        registry.create_consist(20).unwrap();
        registry.add_consist_member(20, 3, false).unwrap();
        assert!(registry.locomotives().is_empty());
        assert!(registry.is_address_in_consist(3));
    }

    #[test]
    fn consist_over_driven_loco_takes_over_refresh() {
        let (track, _, registry) = registry();
        registry.resolve_for_throttle(1, 10, 40, Direction::Forward).unwrap();
        registry.create_consist(10).unwrap();
        assert!(registry.locomotives().is_empty());

        let outcome = registry
            .resolve_for_throttle(1, 10, 0, Direction::Forward)
            .unwrap();
        assert_eq!(outcome, ThrottleOutcome::Consist(10));
        track.take_packets();

        // a memberless standard consist has nothing to refresh
        assert_eq!(registry.refresh_tick(), 0);
        assert!(track.packets().is_empty());
    }

    #[test]
    fn auto_consist_absorbs_driven_loco() {
        let (_, _, registry) = registry();
        registry.resolve_for_throttle(2, 127, 60, Direction::Reverse).unwrap();
        assert_eq!(registry.create_consist(0), Ok(127));
        assert!(registry.locomotives().is_empty());
    }

    #[test]
    fn member_functions_do_not_create_standalone_locos() {
        let (track, _, registry) = registry();
        registry.create_consist(20).unwrap();
        registry.add_consist_member(20, 3, false).unwrap();
        track.take_packets();

        assert_eq!(
            registry.decode_function_bytes(3, 0x90, None),
            Ok(Some(FunctionGroup::F0F4))
        );
        assert_eq!(
            registry.set_function(3, 5, true),
            Ok(Some(FunctionGroup::F5F8))
        );
        assert_eq!(track.packet_bytes(), vec![vec![3, 0x90], vec![3, 0xB1]]);

        registry.get_locomotive(3, true).unwrap();
        assert!(registry.locomotives().is_empty());

        // only the consist's fan-out speed packet for member 3
        track.take_packets();
        assert_eq!(registry.refresh_tick(), 1);
        assert_eq!(track.packet_bytes(), vec![vec![3, 0x3F, 0x80]]);
    }

    #[test]
    fn removing_consist_releases_members_and_document() {
        let (track, store, registry) = registry();
        registry.create_consist(-10).unwrap();
        registry.add_consist_member(10, 3, true).unwrap();
        registry.store();
        assert!(store.exists("consist-10.json"));
        track.take_packets();

        assert!(registry.remove_consist(10));
        assert!(!registry.remove_consist(10));
        assert!(!store.exists("consist-10.json"));
        assert_eq!(
            track.packet_bytes(),
            vec![vec![3, 0xEC, 0x12, 0x00], vec![3, 0x3F, 0x00]]
        );
        assert!(!registry.is_address_in_consist(3));
    }

    #[test]
    fn remove_consist_member_reports_membership() {
        let (_, _, registry) = registry();
        registry.create_consist(20).unwrap();
        registry.add_consist_member(20, 3, false).unwrap();
        assert_eq!(registry.remove_consist_member(20, 3), Ok(true));
        assert_eq!(registry.remove_consist_member(20, 3), Ok(false));
        assert_eq!(
            registry.remove_consist_member(21, 3),
            Err(RegistryError::ConsistNotFound(21))
        );
    }

    #[test]
    fn roster_queries() {
        let (_, store, registry) = registry();
        assert!(registry.roster_entry(3, false).is_none());
        assert_eq!(registry.roster_entry(3, true).unwrap().address, 3);
        assert!(!registry.upsert_roster_entry(
            RosterEntry::new(3).with_default_on_throttles(true)
        ));
        registry.upsert_roster_entry(RosterEntry::new(4).with_default_on_throttles(true));
        registry.upsert_roster_entry(RosterEntry::new(5));
        assert_eq!(registry.default_locos(None).len(), 2);
        assert_eq!(registry.default_locos(Some(1))[0].address, 3);

        registry.store();
        assert!(store.exists("roster-3.json"));
        assert!(registry.remove_roster_entry(3));
        assert!(!registry.remove_roster_entry(3));
        assert!(!store.exists("roster-3.json"));
    }

    #[test]
    fn throttle_auto_creates_roster_entry() {
        let (_, _, registry) = registry();
        registry.resolve_for_throttle(1, 3, 10, Direction::Forward).unwrap();
        assert!(registry.roster_entry(3, false).is_some());

        let quiet = LocomotiveRegistry::with_options(
            Arc::new(MockTrack::energized()),
            Arc::new(MemoryStore::new()),
            RegistryOptions {
                auto_create_roster_entries: false,
                ..RegistryOptions::default()
            },
        );
        quiet.resolve_for_throttle(1, 3, 10, Direction::Forward).unwrap();
        assert!(quiet.roster_entries().is_empty());
    }

    #[test]
    fn store_then_load_reproduces_state() {
        let (_, store, registry) = registry();
        registry.upsert_roster_entry(RosterEntry::new(3).with_description("GP38"));
        registry.upsert_roster_entry(RosterEntry::new(1234).with_kind("steam"));
        registry.create_consist(-10).unwrap();
        registry.add_consist_member(10, 3, true).unwrap();
        assert_eq!(registry.store(), 3);

        let restored = LocomotiveRegistry::new(Arc::new(MockTrack::new()), store.clone());
        let summary = restored.load();
        assert_eq!(summary, LoadSummary { roster: 2, consists: 1, migrated: false });
        assert_eq!(restored.roster_entries(), registry.roster_entries());
        assert_eq!(restored.consists(), registry.consists());
    }

    #[test]
    fn load_skips_missing_entry_documents() {
        let store = Arc::new(MemoryStore::with_documents([
            (
                ROSTER_INDEX_FILE,
                json!({"count": 2, "locos": [{"file": "roster-3.json"}, {"file": "roster-4.json"}]}),
            ),
            ("roster-3.json", json!({"address": 3, "description": "A"})),
        ]));
        let registry = LocomotiveRegistry::new(Arc::new(MockTrack::new()), store);
        let summary = registry.load();
        assert_eq!(summary.roster, 1);
        assert!(!summary.migrated);
    }

    #[test]
    fn load_migrates_legacy_documents() {
        let store = Arc::new(MemoryStore::with_documents([
            (
                LEGACY_ROSTER_FILE,
                json!({"count": 1, "locos": [
                    {"address": 3, "description": "Mogul", "type": "steam",
                     "idleOnStartup": "true", "defaultOnThrottles": "false"}
                ]}),
            ),
            (
                LEGACY_CONSIST_FILE,
                json!({"count": 1, "consists": [
                    {"address": 10, "decoderAssisted": true, "locos": [{"address": 3, "reversed": false}]}
                ]}),
            ),
        ]));
        let registry = LocomotiveRegistry::new(Arc::new(MockTrack::new()), store.clone());
        let summary = registry.load();
        assert_eq!(summary, LoadSummary { roster: 1, consists: 1, migrated: true });
        assert!(registry.roster_entry(3, false).unwrap().idle_on_startup);

        assert!(!store.exists(LEGACY_ROSTER_FILE));
        assert!(!store.exists(LEGACY_CONSIST_FILE));
        assert_eq!(store.get(ROSTER_INDEX_FILE).unwrap()["locos"][0]["file"], "roster-3.json");
        assert_eq!(store.get("roster-3.json").unwrap()["idleOnStartup"], true);
        assert_eq!(store.get(CONSIST_INDEX_FILE).unwrap()["count"], 1);
        assert!(store.exists("consist-10.json"));
    }

    #[test]
    fn clear_drops_everything_and_documents() {
        let (_, store, registry) = registry();
        registry.resolve_for_throttle(1, 3, 10, Direction::Forward).unwrap();
        registry.create_consist(20).unwrap();
        registry.store();
        registry.clear();
        assert!(registry.locomotives().is_empty());
        assert!(registry.consists().is_empty());
        assert!(registry.roster_entries().is_empty());
        assert!(!store.exists("roster-3.json"));
        assert!(!store.exists("consist-20.json"));
    }
}

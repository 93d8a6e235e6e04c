//! # rs-dcc-station
//!
//! Core of a DCC model railroad command station: the text command protocol
//! spoken by JMRI and similar throttles, the locomotive/consist/roster
//! registry and the turnout registry.
//!
//! ## Features
//!
//! - **Packet encoding**: 128-step speed, function groups, ops-mode CV writes,
//!   basic accessory packets with NMRA address arithmetic
//! - **Text protocol**: `<ID args>` framing with registerable handlers
//! - **Locomotives and consists**: throttle resolution, standard and
//!   decoder-assisted consists, periodic refresh, emergency stop
//! - **Turnouts**: state tracking, reconciliation from bus traffic
//! - **Persistence**: JSON documents, with migration of legacy single-file
//!   rosters and consist lists
//!
//! ## Architecture
//!
//! The crate is structured to allow testing on desktop without hardware:
//!
//! - `traits` - Track output, document store and status broadcast seams
//! - `packet`, `accessory` - DCC byte encoding
//! - `loco_registry`, `turnout` - Registries, each behind its own lock
//! - `protocol` - Framing, dispatch and the station command handlers
//! - `station` - The registries bundled with their track
//! - `hal` - Concrete implementations (mocks, file store, logging track)
//! - `services` - Tokio tasks and the TCP listener (`station` feature)
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use rs_dcc_station::{
//!     hal::{MemoryStore, MockTrack},
//!     protocol::{CommandDispatcher, CommandRegistry, Response},
//!     register_station_commands, NullStatus, RegistryOptions, Station,
//! };
//!
//! let track = Arc::new(MockTrack::energized());
//! let station = Station::new(
//!     Arc::clone(&track),
//!     Arc::new(MemoryStore::new()),
//!     Arc::new(NullStatus),
//!     RegistryOptions::default(),
//! );
//!
//! let commands = Arc::new(CommandRegistry::new());
//! register_station_commands(&commands, &station);
//!
//! let mut dispatcher = CommandDispatcher::new(commands);
//! let replies = dispatcher.feed(b"<t 1 3 50 1>");
//! assert_eq!(replies, vec![Response::Status("<T 1 50 1>".into())]);
//! assert_eq!(track.packet_bytes(), vec![vec![0x03, 0x3F, 0xB3]]);
//! ```

/// Basic accessory addressing and packet encoding.
pub mod accessory;
/// Layout bus adapter feeding foreign packets into the registries.
pub mod bus;
/// Configuration for the desktop command station.
pub mod config;
/// Consists and their persisted documents.
pub mod consist;
/// Error types.
pub mod error;
/// Concrete implementations of the collaborator traits.
pub mod hal;
/// Locomotive, consist and roster registry.
pub mod loco_registry;
/// Per-locomotive throttle and function state.
pub mod locomotive;
/// DCC packet encoding.
pub mod packet;
/// Text command protocol.
pub mod protocol;
/// Roster entries and their persisted documents.
pub mod roster;
/// Registries bundled with their track output.
pub mod station;
/// Collaborator traits.
pub mod traits;
/// Turnout registry.
pub mod turnout;

/// Tokio services: refresh scheduler, auto-persist and the TCP listener.
#[cfg(feature = "station")]
pub mod services;

// Re-exports for convenience
pub use accessory::AccessoryPacket;
pub use bus::LayoutBusAdapter;
pub use config::Config;
pub use consist::{Consist, ConsistMember};
pub use error::{CommandError, RegistryError, StoreError};
pub use loco_registry::{LoadSummary, LocomotiveRegistry, RegistryOptions, ThrottleOutcome};
pub use locomotive::{Direction, FunctionGroup, FunctionState, Locomotive, LocomotiveStatus};
pub use protocol::{register_station_commands, CommandDispatcher, CommandRegistry, Response};
pub use roster::RosterEntry;
pub use station::Station;
pub use traits::{ConfigStore, NullStatus, PacketSink, StatusSink, TrackOutput};
pub use turnout::{Turnout, TurnoutRegistry, TurnoutType};

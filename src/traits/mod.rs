//! Trait definitions for the collaborators the core talks to.
//!
//! The command station core owns state and protocol logic; everything that
//! touches hardware or storage sits behind one of these traits:
//!
//! - `track`: [`PacketSink`], the queue in front of the DCC signal generator
//! - `storage`: [`ConfigStore`], the JSON document store
//! - `status`: [`StatusSink`], broadcast of unsolicited status lines
//!
//! Test doubles for all three live in [`crate::hal::mock`].

pub mod status;
pub mod storage;
pub mod track;

pub use status::*;
pub use storage::*;
pub use track::*;

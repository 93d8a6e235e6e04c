//! Concrete implementations of the collaborator traits.
//!
//! This module contains implementations of the traits defined in
//! [`crate::traits`].
//!
//! # Available Implementations
//!
//! - `mock`: Test doubles for desktop development
//! - `fs_store`: JSON documents in a directory
//! - `trace`: Track output that logs packets

pub mod fs_store;
pub mod mock;
pub mod trace;

pub use fs_store::FileStore;
pub use mock::*;
pub use trace::TraceTrack;

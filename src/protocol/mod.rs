//! Legacy text command protocol.
//!
//! - `dispatcher`: stream framing and the shared command table
//! - `handlers`: the station's command set
//! - `response`: reply sentinels

pub mod dispatcher;
pub mod handlers;
pub mod response;

pub use dispatcher::{CommandDispatcher, CommandHandler, CommandRegistry};
pub use handlers::register_station_commands;
pub use response::Response;

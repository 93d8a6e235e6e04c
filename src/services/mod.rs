//! Runtime services for a desktop command station (`station` feature).
//!
//! - `scheduler`: refresh and auto-persist tasks
//! - `jmri`: the text protocol TCP listener and broadcast status sink
//!
//! All services share one [`Station`](crate::station::Station) and one
//! [`CommandRegistry`](crate::protocol::CommandRegistry):
//!
//! ```ignore
//! let status = BroadcastStatus::default();
//! let station = Station::new(track, store, Arc::new(status.clone()), options);
//! let commands = Arc::new(CommandRegistry::new());
//! register_station_commands(&commands, &station);
//!
//! spawn_refresh_task(Arc::clone(station.locos()), Duration::from_millis(25));
//! JmriListener::bind("0.0.0.0:2560", commands, status).await?.run().await?;
//! ```

pub mod jmri;
pub mod scheduler;

pub use jmri::{BroadcastStatus, JmriListener};
pub use scheduler::{spawn_persist_task, spawn_refresh_task};

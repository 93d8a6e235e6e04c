//! Periodic background tasks.
//!
//! Both tasks run on the tokio runtime until their `JoinHandle` is aborted.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::loco_registry::LocomotiveRegistry;
use crate::station::Station;
use crate::traits::PacketSink;

/// Run [`LocomotiveRegistry::refresh_tick`] every `period`.
///
/// A tick that overruns delays the next one rather than bursting to catch up.
pub fn spawn_refresh_task<T>(locos: Arc<LocomotiveRegistry<T>>, period: Duration) -> JoinHandle<()>
where
    T: PacketSink + 'static,
{
    info!(period_ms = period.as_millis() as u64, "refresh task started");
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            locos.refresh_tick();
        }
    })
}

/// Store the whole station every `period`. The first store happens one
/// period after the task starts.
pub fn spawn_persist_task<T>(station: Station<T>, period: Duration) -> JoinHandle<()>
where
    T: PacketSink + Clone + 'static,
{
    info!(period_secs = period.as_secs(), "persist task started");
    tokio::spawn(async move {
        let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            let written = station.store();
            debug!(written, "auto-persist");
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::hal::{MemoryStore, MockTrack};
    use crate::loco_registry::RegistryOptions;
    use crate::locomotive::Direction;
    use crate::traits::{NullStatus, TrackOutput};
    use crate::turnout::TurnoutType;

    #[tokio::test]
    async fn refresh_task_sends_while_energized() {
        let track = Arc::new(MockTrack::energized());
        let locos = Arc::new(LocomotiveRegistry::new(
            Arc::clone(&track),
            Arc::new(MemoryStore::new()),
        ));
        locos.resolve_for_throttle(1, 3, 10, Direction::Forward).unwrap();
        track.take_packets();

        let handle = spawn_refresh_task(Arc::clone(&locos), Duration::from_millis(5));
        tokio::time::sleep(Duration::from_millis(60)).await;
        handle.abort();

        let sent = track.take_packets();
        assert!(!sent.is_empty());
        assert!(sent.iter().all(|p| p.repeat == 0));
        assert!(sent.iter().all(|p| p.output == TrackOutput::Operations));
    }

    #[tokio::test]
    async fn refresh_task_is_quiet_without_power() {
        let track = Arc::new(MockTrack::new());
        let locos = Arc::new(LocomotiveRegistry::new(
            Arc::clone(&track),
            Arc::new(MemoryStore::new()),
        ));
        locos.resolve_for_throttle(1, 3, 10, Direction::Forward).unwrap();
        track.take_packets();

        let handle = spawn_refresh_task(locos, Duration::from_millis(5));
        tokio::time::sleep(Duration::from_millis(30)).await;
        handle.abort();

        assert!(track.packets().is_empty());
    }

    #[tokio::test]
    async fn persist_task_stores_station() {
        let store = Arc::new(MemoryStore::new());
        let station = Station::new(
            Arc::new(MockTrack::energized()),
            store.clone(),
            Arc::new(NullStatus),
            RegistryOptions::default(),
        );
        station.turnouts().create_or_update(5, 10, -1, TurnoutType::Left);

        let handle = spawn_persist_task(station, Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.abort();

        assert_eq!(store.get("turnouts.json").unwrap()["count"], 1);
    }
}

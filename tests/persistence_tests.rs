//! Integration tests for storing, reloading and migrating station state

use std::sync::Arc;

use serde_json::json;

use rs_dcc_station::{
    hal::{FileStore, MemoryStore, MockTrack},
    ConfigStore, Direction, NullStatus, RegistryOptions, RosterEntry, Station, TurnoutType,
};

fn station_on(store: Arc<dyn ConfigStore>) -> Station<Arc<MockTrack>> {
    Station::new(
        Arc::new(MockTrack::energized()),
        store,
        Arc::new(NullStatus),
        RegistryOptions::default(),
    )
}

#[test]
fn file_store_round_trip() {
    let dir = tempfile::tempdir().unwrap();

    {
        let store = Arc::new(FileStore::open(dir.path()).unwrap());
        let station = station_on(store);
        station.turnouts().create_or_update(5, 10, -1, TurnoutType::Wye);
        station.turnouts().create_or_update(6, 3, 2, TurnoutType::Left);
        station.turnouts().set(5, true).unwrap();

        let locos = station.locos();
        locos.upsert_roster_entry(
            RosterEntry::new(1234)
                .with_description("GP9")
                .with_kind("diesel"),
        );
        locos.create_consist(20).unwrap();
        locos.add_consist_member(20, 1234, false).unwrap();
        locos.add_consist_member(20, 5, true).unwrap();
        assert!(station.store() > 0);
    }

    let store = Arc::new(FileStore::open(dir.path()).unwrap());
    assert!(store.exists("turnouts.json"));
    assert!(store.exists("locoroster.json"));
    assert!(store.exists("roster-1234.json"));
    assert!(store.exists("consist-20.json"));

    let station = station_on(store);
    let (turnouts, summary) = station.load();
    assert_eq!(turnouts, 2);
    assert_eq!(summary.consists, 1);
    assert!(!summary.migrated);

    let wye = station.turnouts().get_by_id(5).unwrap();
    assert!(wye.is_thrown());
    assert_eq!(wye.kind(), TurnoutType::Wye);
    assert_eq!(wye.board_address(), 3);
    assert_eq!(wye.index(), 1);
    let explicit = station.turnouts().get_by_id(6).unwrap();
    assert_eq!(explicit.board_address(), 3);
    assert_eq!(explicit.index(), 2);

    let entry = station.locos().roster_entry(1234, false).unwrap();
    assert_eq!(entry.description, "GP9");
    assert_eq!(entry.kind, "diesel");

    let consist = station.locos().consist(20).unwrap();
    assert_eq!(consist.members().len(), 2);
    assert!(consist.members()[1].reversed);

    // runtime state is not persisted
    assert_eq!(consist.speed(), 0);
    assert_eq!(consist.direction(), Direction::Forward);
}

#[test]
fn legacy_documents_are_migrated_once() {
    let store = Arc::new(MemoryStore::with_documents([
        (
            "roster.json",
            json!({
                "count": 2,
                "locos": [
                    {"address": 3, "description": "Switcher", "idleOnStartup": "true"},
                    {"address": 44, "description": "Mogul", "type": "steam"}
                ]
            }),
        ),
        (
            "consists.json",
            json!({
                "count": 1,
                "consists": [
                    {"address": 12, "decoderAssisted": true,
                     "locos": [{"address": 3}, {"address": 44, "reversed": true}]}
                ]
            }),
        ),
    ]));

    let station = station_on(store.clone());
    let (_, summary) = station.load();
    assert!(summary.migrated);
    assert_eq!(summary.roster, 2);
    assert_eq!(summary.consists, 1);

    assert!(!store.exists("roster.json"));
    assert!(!store.exists("consists.json"));
    assert_eq!(store.get("locoroster.json").unwrap()["count"], 2);
    assert_eq!(store.get("lococonsists.json").unwrap()["count"], 1);
    assert!(store.get("roster-3.json").unwrap()["idleOnStartup"] == json!(true));
    assert!(store.exists("consist-12.json"));

    // a second boot reads the migrated layout
    let again = station_on(store);
    let (_, summary) = again.load();
    assert!(!summary.migrated);
    assert_eq!(summary.roster, 2);
    assert!(again.locos().consist(12).unwrap().is_decoder_assisted());
    assert!(again.locos().is_address_in_consist(44));
}

#[test]
fn clear_removes_documents() {
    let store = Arc::new(MemoryStore::new());
    let station = station_on(store.clone());
    station.turnouts().create_or_update(1, 4, -1, TurnoutType::Left);
    station.locos().upsert_roster_entry(RosterEntry::new(7));
    station.locos().create_consist(30).unwrap();
    station.store();
    assert!(store.exists("roster-7.json"));

    station.clear();

    assert!(!store.exists("roster-7.json"));
    assert!(!store.exists("consist-30.json"));
    assert_eq!(store.get("turnouts.json").unwrap()["count"], 0);
    assert_eq!(store.get("locoroster.json").unwrap()["count"], 0);

    let fresh = station_on(store);
    let (turnouts, summary) = fresh.load();
    assert_eq!(turnouts, 0);
    assert_eq!(summary.roster, 0);
    assert_eq!(summary.consists, 0);
}

#[test]
fn missing_roster_document_is_skipped() {
    let store = Arc::new(MemoryStore::with_documents([
        (
            "locoroster.json",
            json!({"count": 2, "locos": [{"file": "roster-9.json"}, {"file": "roster-3.json"}]}),
        ),
        ("roster-3.json", json!({"address": 3, "description": "Switcher"})),
        (
            "lococonsists.json",
            json!({"count": 1, "consists": [{"file": "consist-12.json"}]}),
        ),
        (
            "consist-12.json",
            json!({"address": 12, "decoderAssisted": false,
                   "locos": [{"address": 3, "reversed": false}]}),
        ),
    ]));

    let station = station_on(store.clone());
    let (_, summary) = station.load();
    assert_eq!(summary.roster, 1);
    assert_eq!(summary.consists, 1);
    assert!(!summary.migrated);

    assert!(station.locos().roster_entry(9, false).is_none());
    assert_eq!(station.locos().roster_entry(3, false).unwrap().description, "Switcher");
    assert!(station.locos().is_address_in_consist(3));

    // the index is left alone until the next store
    assert_eq!(store.get("locoroster.json").unwrap()["count"], 2);
}

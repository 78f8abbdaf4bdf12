use connectivity::{
    ConnectivitySettings, FileSettingsStore, PolicyAction, PropertyValue, SimEvent,
    SimManagerState, SimRecord,
};
use std::path::Path;

const MODEM: &str = "/ril_0";
const ICCID: &str = "8901260882";

fn open(dir: &Path) -> SimManagerState {
    let store = FileSettingsStore::open(dir).unwrap();
    SimManagerState::new(ConnectivitySettings::new(Box::new(store)))
}

fn strs(list: &[&str]) -> PropertyValue {
    PropertyValue::StrList(list.iter().map(|s| s.to_string()).collect())
}

fn insert_modem(state: &mut SimManagerState) {
    state.modem_added(MODEM);
    state.modem_property(
        MODEM,
        "Interfaces",
        &strs(&["org.ofono.SimManager", "org.ofono.ConnectionManager"]),
    );
    state.connection_property(MODEM, "Powered", &PropertyValue::Bool(false));
    state.connection_property(MODEM, "RoamingAllowed", &PropertyValue::Bool(false));
}

/// Feeds a full SIM snapshot. Returns the events and the writes the
/// manager asked for.
fn insert_sim(state: &mut SimManagerState) -> (Vec<SimEvent>, Vec<PolicyAction>) {
    let props = [
        ("Present", PropertyValue::Bool(true)),
        ("CardIdentifier", PropertyValue::from(ICCID)),
        ("SubscriberIdentity", PropertyValue::from("244910000000001")),
        ("SubscriberNumbers", strs(&["+358401234567"])),
        ("MobileCountryCode", PropertyValue::from("244")),
        ("MobileNetworkCode", PropertyValue::from("91")),
        ("PreferredLanguages", strs(&["fi", "en"])),
        ("PinRequired", PropertyValue::from("none")),
    ];
    let mut events = Vec::new();
    let mut actions = Vec::new();
    for (name, value) in props {
        let outcome = state.sim_property(MODEM, name, &value);
        events.extend(outcome.events);
        actions.extend(outcome.actions.into_iter().map(|(_, action)| action));
    }
    (events, actions)
}

#[test]
fn sim_record_round_trips_through_the_file() {
    let dir = tempfile::tempdir().unwrap();
    let record = SimRecord {
        iccid: ICCID.into(),
        primary_phone_number: "+358401234567".into(),
        mcc: "244".into(),
        mnc: "91".into(),
        preferred_languages: vec!["fi".into(), "en".into()],
        data_roaming_enabled: true,
    };

    {
        let store = FileSettingsStore::open(dir.path()).unwrap();
        let mut settings = ConnectivitySettings::new(Box::new(store));
        settings.save_sim_record(&record).unwrap();
        settings.set_known_sims(vec![ICCID.into()]).unwrap();
    }

    let store = FileSettingsStore::open(dir.path()).unwrap();
    let mut settings = ConnectivitySettings::new(Box::new(store));
    assert_eq!(settings.known_sims(), vec![ICCID.to_string()]);
    assert_eq!(settings.sim_record(ICCID), Some(record));
}

#[test]
fn reinserted_sim_gets_roaming_back_after_restart() {
    let dir = tempfile::tempdir().unwrap();

    {
        let mut state = open(dir.path());
        insert_modem(&mut state);
        let (events, actions) = insert_sim(&mut state);
        assert!(events.contains(&SimEvent::SimAdded(ICCID.into())));
        assert!(!actions.contains(&PolicyAction::SetRoamingAllowed(true)));
        state.set_data_roaming_enabled(ICCID, true).unwrap();
        state.modem_removed(MODEM);
    }

    let mut state = open(dir.path());
    let known = state.sim(ICCID).unwrap();
    assert!(known.data_roaming_enabled);
    assert!(!known.present);

    insert_modem(&mut state);
    let (events, actions) = insert_sim(&mut state);

    assert!(!events.contains(&SimEvent::SimAdded(ICCID.into())));
    assert_eq!(actions, vec![PolicyAction::SetRoamingAllowed(true)]);
    let sim = state.sim(ICCID).unwrap();
    assert!(sim.present);
    assert!(sim.data_roaming_enabled);
    assert_eq!(sim.modem.as_deref(), Some(MODEM));
}

#[test]
fn corrupt_record_is_forgotten() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("settings.toml"),
        format!("KnownSims = [\"{ICCID}\"]\n\n[Sims.{ICCID}]\nMcc = \"244\"\n"),
    )
    .unwrap();

    let state = open(dir.path());
    assert!(state.sim(ICCID).is_none());

    let text = std::fs::read_to_string(dir.path().join("settings.toml")).unwrap();
    assert!(!text.contains("Mcc"));
}

use connectivity::{AccessPoint, AccessPointGrouper, ConnectivityError, GroupChange};

const WPA2: u32 = 0x188;
const INFRA: u32 = 2;

fn ap(path: &str, ssid: &str, strength: u8) -> AccessPoint {
    AccessPoint::new(path, ssid.as_bytes(), WPA2, INFRA, strength)
}

#[test]
fn duplicate_scan_results_share_one_network() {
    let mut grouper = AccessPointGrouper::new();
    let first = grouper.add(ap("/ap/1", "Home", 40)).unwrap();
    let second = grouper.add(ap("/ap/2", "Home", 80)).unwrap();

    let key = ap("/ap/1", "Home", 40).key();
    assert_eq!(first, GroupChange::Created(key.clone()));
    assert_eq!(second, GroupChange::Updated(key.clone()));
    assert_eq!(grouper.len(), 1);
    assert_eq!(grouper.get(&key).unwrap().strength(), 80);

    assert_eq!(grouper.remove("/ap/2"), GroupChange::Updated(key.clone()));
    assert_eq!(grouper.get(&key).unwrap().strength(), 40);

    assert_eq!(grouper.remove("/ap/1"), GroupChange::Removed(key));
    assert!(grouper.is_empty());
}

#[test]
fn security_and_mode_split_networks() {
    let mut grouper = AccessPointGrouper::new();
    grouper.add(ap("/ap/1", "Cafe", 50)).unwrap();
    grouper
        .add(AccessPoint::new("/ap/2", "Cafe".as_bytes(), 0, INFRA, 60))
        .unwrap();
    grouper
        .add(AccessPoint::new("/ap/3", "Cafe".as_bytes(), WPA2, 1, 70))
        .unwrap();

    assert_eq!(grouper.len(), 3);
    assert!(grouper.groups().all(|(_, group)| group.len() == 1));
}

#[test]
fn strength_updates_move_the_maximum() {
    let mut grouper = AccessPointGrouper::new();
    grouper.add(ap("/ap/1", "Home", 40)).unwrap();
    grouper.add(ap("/ap/2", "Home", 80)).unwrap();
    let key = ap("/ap/1", "Home", 0).key();

    assert_eq!(grouper.update_strength("/ap/1", 90), GroupChange::Updated(key.clone()));
    assert_eq!(grouper.get(&key).unwrap().strength(), 90);
    assert_eq!(grouper.update_strength("/ap/2", 10), GroupChange::Unchanged);
    assert_eq!(grouper.update_strength("/ap/unknown", 10), GroupChange::Unchanged);
}

#[test]
fn last_connected_never_goes_backwards() {
    let mut grouper = AccessPointGrouper::new();
    grouper.add(ap("/ap/1", "Home", 40)).unwrap();
    grouper.add(ap("/ap/2", "Home", 80)).unwrap();
    let key = ap("/ap/1", "Home", 0).key();

    grouper.update_last_connected("/ap/2", 500);
    grouper.update_last_connected("/ap/1", 300);
    assert_eq!(grouper.get(&key).unwrap().last_connected(), Some(500));

    grouper.remove("/ap/2");
    assert_eq!(grouper.get(&key).unwrap().last_connected(), Some(500));
}

#[test]
fn group_rejects_a_foreign_network() {
    let mut group = connectivity::GroupedAccessPoint::new(ap("/ap/1", "Home", 40));
    let err = group.add(ap("/ap/2", "Work", 80)).unwrap_err();
    assert!(matches!(err, ConnectivityError::GroupingMismatch { .. }));
    assert_eq!(group.len(), 1);
}

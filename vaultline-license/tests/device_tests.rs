use vaultline_license::{DeviceInfo, HardwareFingerprint, LicenseError, MachineIdentifier};

#[test]
fn device_info_collection() {
    let info = DeviceInfo::collect();
    assert!(!info.os_name.is_empty());
    assert!(!info.arch.is_empty());
    assert!(!info.hostname.is_empty());
}

#[test]
fn device_info_serde() {
    let info = DeviceInfo::collect();
    let json = serde_json::to_string(&info).unwrap();
    let parsed: DeviceInfo = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed.os_name, info.os_name);
    assert_eq!(parsed.arch, info.arch);
}

#[test]
fn fingerprint_is_stable_for_same_identifiers() {
    let ids = [
        MachineIdentifier::MachineId("4c4c4544-0042".into()),
        MachineIdentifier::HardwareUuid("A1B2-C3D4".into()),
    ];
    let fp1 = HardwareFingerprint::from_identifiers(&ids).unwrap();
    let fp2 = HardwareFingerprint::from_identifiers(&ids).unwrap();
    assert_eq!(fp1, fp2);
    assert_eq!(fp1.id().len(), 64);
    assert!(fp1.id().chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
}

#[test]
fn fingerprint_changes_with_identifiers() {
    let a = HardwareFingerprint::from_identifiers(&[MachineIdentifier::MachineId("a".into())])
        .unwrap();
    let b = HardwareFingerprint::from_identifiers(&[MachineIdentifier::MachineId("b".into())])
        .unwrap();
    assert_ne!(a, b);
}

#[test]
fn hostname_ignored_when_stable_ids_exist() {
    let machine = MachineIdentifier::MachineId("4c4c4544".into());
    let with_host = HardwareFingerprint::from_identifiers(&[
        machine.clone(),
        MachineIdentifier::Hostname("backup-01".into()),
    ])
    .unwrap();
    let without = HardwareFingerprint::from_identifiers(&[machine]).unwrap();
    assert_eq!(with_host, without);
}

#[test]
fn hostname_used_as_last_resort() {
    let fp = HardwareFingerprint::from_identifiers(&[
        MachineIdentifier::MachineId("   ".into()),
        MachineIdentifier::Hostname("backup-01".into()),
    ])
    .unwrap();
    assert!(!fp.id().is_empty());
}

#[test]
fn no_identifiers_is_an_error() {
    assert!(matches!(
        HardwareFingerprint::from_identifiers(&[]),
        Err(LicenseError::HardwareUnavailable)
    ));
    assert!(matches!(
        HardwareFingerprint::from_identifiers(&[MachineIdentifier::HardwareUuid(String::new())]),
        Err(LicenseError::HardwareUnavailable)
    ));
}

#[test]
fn fingerprint_match_ignores_case_and_whitespace() {
    let fp = HardwareFingerprint::from_id("a1b2c3");
    assert!(fp.matches("A1B2C3"));
    assert!(fp.matches(" a1b2c3\n"));
    assert!(!fp.matches("a1b2c4"));
}

#[test]
fn fingerprint_serializes_as_plain_string() {
    let fp = HardwareFingerprint::from_id("a1b2c3");
    assert_eq!(serde_json::to_string(&fp).unwrap(), "\"a1b2c3\"");
    let parsed: HardwareFingerprint = serde_json::from_str("\"a1b2c3\"").unwrap();
    assert_eq!(parsed, fp);
}

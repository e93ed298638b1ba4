//! Integration tests for plugsight-common library.

use std::io::Write;

use plugsight_common::{
    DeviceList, MetricKind, MetricRecord, MetricValue, RawDatapoint, RawValue, validate_devices,
};

#[test]
fn test_load_device_list_from_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"{{
            "devices": [
                {{"id": "bf01", "key": "k1", "ip": "10.0.0.10", "friendly_name": "fridge"}},
                {{"id": "bf02", "key": "k2", "ip": "10.0.0.11", "friendly_name": "washer"}}
            ]
        }}"#
    )
    .unwrap();

    let list = DeviceList::load(file.path()).expect("device list should load");

    assert_eq!(list.devices.len(), 2);
    assert_eq!(list.devices[0].id, "bf01");
    assert_eq!(list.devices[1].name.as_deref(), Some("washer"));
    assert!(validate_devices(&list.devices).is_ok());
}

#[test]
fn test_load_device_list_json5() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"{{
            // trailing commas and comments are accepted
            devices: [
                {{ id: "shelly-1", key: "pw", address: "10.0.0.30", poll_interval_secs: 5 }},
            ],
        }}"#
    )
    .unwrap();

    let list = DeviceList::load(file.path()).unwrap();
    assert_eq!(list.devices[0].poll_interval_secs, Some(5));
}

#[test]
fn test_load_device_list_invalid() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(file, "{{ devices: [ {{ id: 42 }} ] }}").unwrap();

    let err = DeviceList::load(file.path()).unwrap_err();
    assert!(err.to_string().contains("Failed to parse config file"));
}

#[test]
fn test_datapoint_from_tuya_payload() {
    let payload = r#"{
        "1": true, "9": 0, "17": 100, "18": 944, "19": 2727, "20": 2438,
        "38": "memory", "39": false, "42": ""
    }"#;

    let datapoint: RawDatapoint = serde_json::from_str(payload).unwrap();

    assert_eq!(datapoint.len(), 9);
    assert_eq!(datapoint.get("18"), Some(&RawValue::Number(944.0)));
    assert_eq!(datapoint.get("39"), Some(&RawValue::Bool(false)));
}

#[test]
fn test_metric_record_serialization() {
    let record = MetricRecord::new(
        "switch",
        MetricKind::BooleanState,
        MetricValue::Bool(true),
        "",
        "bf01",
        42,
    );

    let json = serde_json::to_value(&record).unwrap();
    assert_eq!(json["kind"], "boolean_state");
    assert_eq!(json["value"], true);
    assert_eq!(json["device_id"], "bf01");
}

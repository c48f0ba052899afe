//! Settings access, payload codecs, reply carriers, and hashing.
// crates/calib-core/tests/core_types.rs
// ============================================================================
// Module: Core Type Tests
// Description: Settings access, payload codecs, reply carriers, and hashing.
// Purpose: Pin wire-facing shapes and small value semantics.
// Dependencies: calib-core, proptest, serde_json
// ============================================================================

#![allow(
    clippy::panic,
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::dbg_macro,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    clippy::missing_docs_in_private_items,
    reason = "Test-only assertions and helpers are permitted."
)]

use calib_core::AccessRegistry;
use calib_core::DetectorSettings;
use calib_core::ErrorKind;
use calib_core::ExactAccess;
use calib_core::FallbackAccess;
use calib_core::HashAlgorithm;
use calib_core::Histogram;
use calib_core::Payload;
use calib_core::PhaseId;
use calib_core::Reply;
use calib_core::ServiceError;
use calib_core::SettingKey;
use calib_core::SettingValue;
use calib_core::SettingsDelta;
use calib_core::SettingsError;
use calib_core::SettingsStore;
use calib_core::StepCursor;
use calib_core::binary_to_string;
use calib_core::core::hashing::canonical_json_bytes;
use calib_core::core::hashing::hash_canonical_json;
use calib_core::string_to_binary;
use proptest::prelude::*;

// ============================================================================
// SECTION: Settings
// ============================================================================

fn settings() -> DetectorSettings {
    DetectorSettings::new()
        .with("global", "threshold", SettingValue::Number(0.5))
        .with("hcal", "threshold", SettingValue::Number(0.25))
        .with("global", "gear", SettingValue::Text("gear_ILD.xml".to_string()))
}

#[test]
fn fallback_access_prefers_subsystem_then_global() {
    let mut values = settings();
    let store = SettingsStore::new(&mut values, &FallbackAccess);
    assert_eq!(store.read("hcal", "threshold"), Some(SettingValue::Number(0.25)));
    assert_eq!(store.read("ecal", "threshold"), Some(SettingValue::Number(0.5)));
    assert!(store.has("muon", "gear"));
    assert_eq!(store.read("ecal", "missing"), None);
}

#[test]
fn exact_access_never_falls_back() {
    let mut values = settings();
    let store = SettingsStore::new(&mut values, &ExactAccess);
    assert_eq!(store.read("ecal", "threshold"), None);
    assert!(!store.has("ecal", "gear"));
    assert_eq!(store.read_number(&SettingKey::new("hcal", "threshold")), Some(0.25));
}

#[test]
fn set_returns_previous_and_apply_writes_in_order() {
    let mut values = settings();
    let mut store = SettingsStore::new(&mut values, &ExactAccess);
    let previous = store.set("hcal", "threshold", SettingValue::Number(0.3));
    assert_eq!(previous, Some(SettingValue::Number(0.25)));

    let delta = SettingsDelta::new()
        .with(SettingKey::new("ecal", "mip"), SettingValue::Number(1.0))
        .with(SettingKey::new("ecal", "mip"), SettingValue::Number(1.1));
    store.apply(&delta);
    let snapshot = store.snapshot();
    assert_eq!(snapshot.get("ecal", "mip"), Some(&SettingValue::Number(1.1)));
    assert_eq!(snapshot.get("hcal", "threshold"), Some(&SettingValue::Number(0.3)));
}

#[test]
fn access_registry_rejects_unknown_names() {
    let registry = AccessRegistry::with_defaults();
    assert!(registry.contains("exact"));
    assert_eq!(registry.create("fallback").unwrap().name(), "fallback");
    assert_eq!(
        registry.create("psychic").err(),
        Some(SettingsError::UnknownAccess("psychic".to_string()))
    );
}

#[test]
fn setting_values_keep_their_type_through_json() {
    let values = settings().with("ecal", "gain", SettingValue::Number(1.0)).with(
        "ecal",
        "layers",
        SettingValue::Integer(30),
    );
    let json = serde_json::to_string(&values).unwrap();
    let back: DetectorSettings = serde_json::from_str(&json).unwrap();
    assert_eq!(back, values);
    assert_eq!(back.get("ecal", "gain"), Some(&SettingValue::Number(1.0)));
}

// ============================================================================
// SECTION: Payloads
// ============================================================================

#[test]
fn histogram_peak_prefers_lowest_bin_on_ties() {
    let histogram = Histogram { lower: -1.0, upper: 3.0, bins: vec![2, 9, 9, 1] };
    assert!((histogram.peak_centre() - 0.5).abs() < 1e-12);
    assert_eq!(histogram.total(), 21);
    let mean = histogram.mean().unwrap();
    let expected = (-0.5 * 2.0 + 0.5 * 9.0 + 1.5 * 9.0 + 2.5) / 21.0;
    assert!((mean - expected).abs() < 1e-12);
}

#[test]
fn histogram_decode_rejects_bad_layouts() {
    assert!(Histogram::decode(&[0; 19]).is_err());
    assert!(Histogram::decode(&[0; 22]).is_err());
    let inverted = Histogram { lower: 2.0, upper: 1.0, bins: vec![1] }.encode();
    assert!(Histogram::decode(&inverted).is_err());
    let infinite = Histogram { lower: 0.0, upper: f64::INFINITY, bins: vec![1] }.encode();
    assert!(Histogram::decode(&infinite).is_err());
    let valid = Histogram { lower: 0.0, upper: 1.0, bins: vec![3, 4] };
    assert_eq!(Histogram::decode(&valid.encode()).unwrap(), valid);
}

#[test]
fn histogram_decode_rejects_edge_span_that_overflows() {
    let overflowing = Histogram { lower: -1e308, upper: 1e308, bins: vec![5, 10, 5] }.encode();
    assert!(Histogram::decode(&overflowing).is_err());

    let wide = Histogram { lower: -8e307, upper: 8e307, bins: vec![5, 10, 5] };
    let decoded = Histogram::decode(&wide.encode()).unwrap();
    assert!(decoded.peak_centre().is_finite());
    assert!(decoded.mean().unwrap().is_finite());
}

#[test]
fn payload_wire_shape_is_kind_tagged_with_base64_blobs() {
    let payload = Payload::Histogram { data: vec![0xde, 0xad, 0xbe, 0xef] };
    let json = serde_json::to_value(&payload).unwrap();
    assert_eq!(json, serde_json::json!({"kind": "histogram", "data": "3q2+7w=="}));

    let scalar: Payload = serde_json::from_str(r#"{"kind":"scalar","value":1.5}"#).unwrap();
    assert_eq!(scalar, Payload::Scalar { value: 1.5, events: 0 });
    assert!(serde_json::from_str::<Payload>(r#"{"kind":"histogram","data":"***"}"#).is_err());
}

#[test]
fn invalid_base64_is_an_encoding_error() {
    assert!(string_to_binary("not base64!").is_err());
}

proptest! {
    #[test]
    fn binary_payloads_survive_text_encoding(bytes in prop::collection::vec(any::<u8>(), 0..512)) {
        let text = binary_to_string(&bytes);
        prop_assert_eq!(string_to_binary(&text).unwrap(), bytes.clone());
        let payload = Payload::Histogram { data: bytes };
        let json = serde_json::to_string(&payload).unwrap();
        prop_assert_eq!(serde_json::from_str::<Payload>(&json).unwrap(), payload);
    }
}

// ============================================================================
// SECTION: Cursors and Replies
// ============================================================================

#[test]
fn cursor_order_follows_phase_then_step() {
    let early = StepCursor::new(PhaseId::EcalDigi, 7);
    let late = StepCursor::new(PhaseId::HcalDigi, 0);
    assert!(early < late);
    assert!(late < StepCursor::done());
    assert_eq!(early.next_step(), StepCursor::new(PhaseId::EcalDigi, 8));
    assert_eq!(early.to_string(), "ecal_digi/7");
    assert_eq!(PhaseId::from_label("pandora_mip"), Some(PhaseId::PandoraMip));
    assert_eq!(PhaseId::ALL.len(), 10);
}

#[test]
fn reply_round_trips_success_and_failure() {
    let ok: Reply<u32> = Ok(7).into();
    let json = serde_json::to_value(&ok).unwrap();
    assert_eq!(json, serde_json::json!({"ok": true, "value": 7}));
    assert_eq!(serde_json::from_value::<Reply<u32>>(json).unwrap().into_result().unwrap(), 7);

    let failed: Reply<u32> = Err(ServiceError::stale("slice 3 is closed")).into();
    let json = serde_json::to_value(&failed).unwrap();
    let expected =
        serde_json::json!({"ok": false, "error_kind": "stale", "message": "slice 3 is closed"});
    assert_eq!(json, expected);
    let err = serde_json::from_value::<Reply<u32>>(json).unwrap().into_result().unwrap_err();
    assert_eq!(err.kind, ErrorKind::Stale);

    let broken = Reply::<u32> { ok: true, value: None, error_kind: None, message: None };
    assert_eq!(broken.into_result().unwrap_err().kind, ErrorKind::Internal);
}

// ============================================================================
// SECTION: Hashing
// ============================================================================

#[test]
fn canonical_hash_ignores_field_order() {
    let left: serde_json::Value = serde_json::from_str(r#"{"b":1,"a":[true,"x"]}"#).unwrap();
    let right: serde_json::Value = serde_json::from_str(r#"{"a":[true,"x"],"b":1}"#).unwrap();
    assert_eq!(canonical_json_bytes(&left).unwrap(), br#"{"a":[true,"x"],"b":1}"#.to_vec());
    let digest = hash_canonical_json(HashAlgorithm::Sha256, &left).unwrap();
    assert_eq!(digest, hash_canonical_json(HashAlgorithm::Sha256, &right).unwrap());
    assert_eq!(digest.value.len(), 64);
    assert_eq!(HashAlgorithm::from_label("sha256"), Some(HashAlgorithm::Sha256));
}

use querypilot::models::{CommandFailure, ENVELOPE_SCHEMA_VERSION, Envelope, FailureKind};
use serde_json::json;

#[test]
fn success_envelope_tracks_contract_fields() {
    let envelope = Envelope::success("run", json!({"result": {"row_count": 2}}))
        .with_meta("row_count", json!(2))
        .with_detailed_warning(
            "result_truncated",
            "stopped after 2 record(s)",
            json!({"max_records": 2}),
        );

    assert!(envelope.ok);
    assert_eq!(envelope.command, "run");
    assert!(envelope.generated_at_utc.ends_with('Z'));
    assert_eq!(
        envelope.meta.get("schema_version"),
        Some(&json!(ENVELOPE_SCHEMA_VERSION))
    );
    assert_eq!(envelope.warnings.len(), 1);
    assert_eq!(
        envelope.warnings[0].details.as_ref(),
        Some(&json!({"max_records": 2}))
    );
    assert!(envelope.error.is_none());
}

#[test]
fn success_envelope_omits_error_key() {
    let encoded = serde_json::to_value(Envelope::success("schema", json!({})))
        .expect("envelope should serialize");
    let object = encoded.as_object().expect("envelope JSON should be object");

    for key in ["ok", "command", "generated_at_utc", "data", "meta", "warnings"] {
        assert!(object.contains_key(key), "missing {key}");
    }
    assert!(!object.contains_key("error"));
}

#[test]
fn error_details_are_ignored_on_success() {
    let envelope = Envelope::success("parse", json!([])).with_error_details(json!({"x": 1}));
    assert!(envelope.error.is_none());
}

#[test]
fn failure_keeps_kind_and_renders_as_json() {
    let error = Envelope::failure("expand", "macro_expansion", "1 macro error(s)")
        .with_error_details(json!({"errors": [{"code": "missing_time_column"}]}))
        .into_error(FailureKind::QueryContent);

    let failure = error
        .downcast_ref::<CommandFailure>()
        .expect("failure should downcast");
    assert_eq!(failure.kind(), FailureKind::QueryContent);
    assert_eq!(
        failure
            .envelope()
            .error
            .as_ref()
            .map(|notice| notice.code.as_str()),
        Some("macro_expansion")
    );

    let rendered: serde_json::Value =
        serde_json::from_str(&error.to_string()).expect("display should be JSON");
    assert_eq!(rendered.get("ok"), Some(&json!(false)));
    assert_eq!(
        rendered.pointer("/error/details/errors/0/code"),
        Some(&json!("missing_time_column"))
    );
}

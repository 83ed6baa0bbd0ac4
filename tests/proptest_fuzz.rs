//! Property-based tests (fuzzing) for the admission policy and queue input
//! handling.
//!
//! Uses proptest to generate random/malformed inputs and verify the policy is
//! total and pure, and that validation never panics, only returns clean errors.
//!
//! Run with: `cargo test --test proptest_fuzz`

use chrono::{Duration as ChronoDuration, NaiveDate, NaiveDateTime};
use proptest::prelude::*;
use serde_json::{json, Value};

use attendance_edge::config::ScheduleConfig;
use attendance_edge::queue::{validate_payload, RecordType};
use attendance_edge::scanner::student_id_from_qr;
use attendance_edge::{LastScan, ScanType, ScheduleAdmissionController, Session};

// =============================================================================
// Strategies for generating test data
// =============================================================================

fn controller() -> ScheduleAdmissionController {
    ScheduleAdmissionController::new(&ScheduleConfig::default()).unwrap()
}

/// Any second of a few days around the test date.
fn datetime_strategy() -> impl Strategy<Value = NaiveDateTime> {
    (0i64..3 * 86_400).prop_map(|secs| {
        NaiveDate::from_ymd_opt(2026, 10, 15)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
            + ChronoDuration::seconds(secs)
    })
}

fn scan_type_strategy() -> impl Strategy<Value = ScanType> {
    prop_oneof![Just(ScanType::Login), Just(ScanType::Logout)]
}

fn last_scan_strategy() -> impl Strategy<Value = Option<LastScan>> {
    prop::option::of(
        (datetime_strategy(), scan_type_strategy())
            .prop_map(|(timestamp, scan_type)| LastScan { timestamp, scan_type }),
    )
}

/// Generate arbitrary JSON values (including invalid structures)
fn arbitrary_json_strategy() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(|n| Value::Number(n.into())),
        ".*".prop_map(Value::String),
    ];

    leaf.prop_recursive(
        4,   // depth
        64,  // max nodes
        10,  // items per collection
        |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..10).prop_map(Value::Array),
                prop::collection::hash_map(".*", inner, 0..10)
                    .prop_map(|m| Value::Object(m.into_iter().collect())),
            ]
        },
    )
}

/// Attendance-shaped payloads with each field possibly garbage.
fn attendance_like_strategy() -> impl Strategy<Value = Value> {
    (
        prop_oneof![Just(json!("S-1")), Just(json!("")), Just(json!("   ")), arbitrary_json_strategy()],
        prop_oneof![
            Just(json!("2026-10-16T07:20:00")),
            Just(json!("2026-10-16T07:20:00+08:00")),
            Just(json!("16/10/2026 07:20")),
            arbitrary_json_strategy(),
        ],
        prop_oneof![Just(json!("present")), Just(json!("LATE")), Just(json!("tardy")), arbitrary_json_strategy()],
        prop_oneof![Just(json!("login")), Just(json!("time_in")), Just(Value::Null), arbitrary_json_strategy()],
    )
        .prop_map(|(student_id, timestamp, status, scan_type)| {
            json!({
                "student_id": student_id,
                "timestamp": timestamp,
                "status": status,
                "scan_type": scan_type,
            })
        })
}

// =============================================================================
// Admission policy
// =============================================================================

proptest! {
    /// Every instant maps to exactly one session, the same one every time.
    #[test]
    fn prop_current_session_total_and_deterministic(t in datetime_strategy()) {
        let c = controller();
        let first = c.current_session(t);
        prop_assert!(matches!(first, Session::Morning | Session::Afternoon | Session::Unknown));
        prop_assert_eq!(first, c.current_session(t));
    }

    /// The expected session agrees with the session span.
    #[test]
    fn prop_expected_scan_type_matches_session(t in datetime_strategy()) {
        let c = controller();
        let (_, session) = c.expected_scan_type(t);
        prop_assert_eq!(session, c.current_session(t));
    }

    /// Identical inputs, identical decision.
    #[test]
    fn prop_should_allow_scan_is_pure(
        last in last_scan_strategy(),
        scan_type in scan_type_strategy(),
        now in datetime_strategy(),
    ) {
        let c = controller();
        prop_assert_eq!(
            c.should_allow_scan(last, scan_type, now),
            c.should_allow_scan(last, scan_type, now)
        );
    }

    /// A refusal always reports a remaining wait inside the cooldown.
    #[test]
    fn prop_denial_remaining_is_within_cooldown(
        last in last_scan_strategy(),
        scan_type in scan_type_strategy(),
        now in datetime_strategy(),
    ) {
        prop_assume!(last.map_or(true, |l| l.timestamp <= now));
        let c = controller();
        if let attendance_edge::Admission::Denied(attendance_edge::schedule::DenyReason::Cooldown { remaining }) =
            c.should_allow_scan(last, scan_type, now)
        {
            prop_assert!(remaining > ChronoDuration::zero());
            prop_assert!(remaining <= c.cooldown());
        }
    }

    /// Once the cooldown has passed the same scan is always admitted.
    #[test]
    fn prop_after_cooldown_always_allowed(
        t in datetime_strategy(),
        scan_type in scan_type_strategy(),
        extra in 0i64..3_600,
    ) {
        let c = controller();
        let last = Some(LastScan { timestamp: t, scan_type });
        let later = t + c.cooldown() + ChronoDuration::seconds(extra);
        prop_assert!(c.should_allow_scan(last, scan_type, later).is_allowed());
    }
}

// =============================================================================
// Input handling
// =============================================================================

proptest! {
    /// Validation should never panic on arbitrary JSON
    #[test]
    fn fuzz_validate_payload_arbitrary_json(payload in arbitrary_json_strategy()) {
        let _ = validate_payload(RecordType::Attendance, &payload);
    }

    /// Near-miss attendance payloads are either accepted or cleanly rejected,
    /// and an accepted one always carries a non-blank student id.
    #[test]
    fn fuzz_validate_payload_attendance_like(payload in attendance_like_strategy()) {
        if validate_payload(RecordType::Attendance, &payload).is_ok() {
            let id = payload["student_id"].as_str().unwrap_or_default();
            prop_assert!(!id.trim().is_empty());
        }
    }

    /// QR parsing should never panic, and never yield a blank id.
    #[test]
    fn fuzz_qr_payload(raw in ".*") {
        if let Some(id) = student_id_from_qr(&raw) {
            prop_assert!(!id.trim().is_empty());
        }
    }
}

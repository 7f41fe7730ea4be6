//! Property: registry record JSON is stable under
//! serialize -> deserialize -> serialize.

use std::collections::BTreeMap;

use chrono::{TimeZone, Utc};
use proptest::prelude::*;

use fr0g_core::types::{HealthCheckSpec, HealthStatus, ServiceRecord};

fn health_status() -> impl Strategy<Value = HealthStatus> {
    prop_oneof![
        Just(HealthStatus::Passing),
        Just(HealthStatus::Warning),
        Just(HealthStatus::Critical),
        Just(HealthStatus::Unknown),
    ]
}

fn check_spec() -> impl Strategy<Value = HealthCheckSpec> {
    (
        "[a-z0-9:/._-]{1,40}",
        1u64..3600,
        1u64..600,
        proptest::option::of(1u64..86_400),
    )
        .prop_map(|(http, interval, timeout, deregister_critical_after)| HealthCheckSpec {
            http,
            interval,
            timeout,
            deregister_critical_after,
        })
}

fn service_record() -> impl Strategy<Value = ServiceRecord> {
    (
        "[a-zA-Z0-9_-]{1,32}",
        "[a-zA-Z0-9_-]{1,32}",
        "[a-z0-9.-]{1,32}",
        any::<u16>(),
        proptest::collection::vec("[a-z]{1,12}", 0..4),
        proptest::collection::btree_map("[a-z_]{1,12}", "[a-zA-Z0-9 ]{0,20}", 0..4),
        health_status(),
        0i64..4_102_444_800_000,
        proptest::option::of(check_spec()),
    )
        .prop_map(
            |(id, name, address, port, tags, meta, health, millis, check)| ServiceRecord {
                id,
                name,
                address,
                port,
                tags,
                meta: meta.into_iter().collect::<BTreeMap<_, _>>(),
                health,
                last_seen: Utc.timestamp_millis_opt(millis).single().unwrap(),
                check,
            },
        )
}

proptest! {
    #[test]
    fn round_trip_is_byte_identical(record in service_record()) {
        let first = serde_json::to_string(&record).unwrap();
        let parsed: ServiceRecord = serde_json::from_str(&first).unwrap();
        let second = serde_json::to_string(&parsed).unwrap();
        prop_assert_eq!(first, second);
    }

    #[test]
    fn round_trip_preserves_value(record in service_record()) {
        let json = serde_json::to_string(&record).unwrap();
        let parsed: ServiceRecord = serde_json::from_str(&json).unwrap();
        prop_assert_eq!(record, parsed);
    }
}

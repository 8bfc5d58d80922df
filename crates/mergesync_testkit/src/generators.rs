//! proptest strategies.

use crate::fixtures::RecordExt;
use mergesync_model::{ConflictPolicy, Record, RecordId, Timestamp};
use proptest::prelude::*;

/// Any conflict policy.
pub fn conflict_policy() -> impl Strategy<Value = ConflictPolicy> {
    prop_oneof![
        Just(ConflictPolicy::MasterWins),
        Just(ConflictPolicy::LocalWins),
        Just(ConflictPolicy::LatestWins),
    ]
}

/// An optional timestamp in a narrow range, so ties are common.
pub fn maybe_timestamp() -> impl Strategy<Value = Option<Timestamp>> {
    prop::option::weighted(0.9, (0i64..20).prop_map(Timestamp::from_millis))
}

/// A record with random timestamps and tombstone state.
pub fn record_with_uuid(uuid: &'static str) -> impl Strategy<Value = Record> {
    (
        maybe_timestamp(),
        maybe_timestamp(),
        any::<bool>(),
        "[a-z]{0,8}",
    )
        .prop_map(move |(created, updated, deleted, name)| {
            let mut record = Record::new(RecordId::Int(1))
                .with("uuid", uuid)
                .with("name", name);
            if let Some(ts) = created {
                record.set("created_at", ts.to_value());
            }
            if let Some(ts) = updated {
                record = record.stamped(ts);
            }
            if deleted {
                record = record.tombstoned();
            }
            record
        })
}

/// A (local, master) pair describing the same logical record.
pub fn synced_pair() -> impl Strategy<Value = (Record, Record)> {
    (record_with_uuid("u1"), record_with_uuid("u1"))
}

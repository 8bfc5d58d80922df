//! Conflict detection and resolution.

use crate::record::{Record, RecordId};
use crate::timestamp::Timestamp;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Policy for automatic conflict resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
    /// The master copy always wins.
    MasterWins,
    /// The local copy always wins.
    LocalWins,
    /// The copy with the newer `updated_at` wins.
    #[default]
    LatestWins,
}

impl ConflictPolicy {
    /// Returns the policy's wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictPolicy::MasterWins => "master_wins",
            ConflictPolicy::LocalWins => "local_wins",
            ConflictPolicy::LatestWins => "latest_wins",
        }
    }
}

impl fmt::Display for ConflictPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConflictPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "master_wins" => Ok(ConflictPolicy::MasterWins),
            "local_wins" => Ok(ConflictPolicy::LocalWins),
            "latest_wins" => Ok(ConflictPolicy::LatestWins),
            other => Err(format!("unknown conflict strategy: {other}")),
        }
    }
}

/// Which copy survives a conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Winner {
    /// Keep the local copy.
    Local,
    /// Accept the master copy.
    Master,
}

/// Why a winner was chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictReason {
    /// The local copy is a tombstone and the master copy is active and newer.
    StaleLocalTombstone,
    /// The configured policy is `master_wins`.
    PolicyMasterWins,
    /// The configured policy is `local_wins`.
    PolicyLocalWins,
    /// The master copy was modified later.
    MasterNewer,
    /// The local copy was modified later.
    LocalNewer,
    /// Both copies carry the same modification time; local is kept.
    TieKeepsLocal,
}

impl fmt::Display for ConflictReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ConflictReason::StaleLocalTombstone => "local deletion is older than active master record",
            ConflictReason::PolicyMasterWins => "policy master_wins",
            ConflictReason::PolicyLocalWins => "policy local_wins",
            ConflictReason::MasterNewer => "master record is newer",
            ConflictReason::LocalNewer => "local record is newer",
            ConflictReason::TieKeepsLocal => "equal timestamps, local kept",
        };
        f.write_str(text)
    }
}

/// The result of resolving one conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConflictDecision {
    /// Surviving copy.
    pub winner: Winner,
    /// Why it survived.
    pub reason: ConflictReason,
}

impl ConflictDecision {
    const fn new(winner: Winner, reason: ConflictReason) -> Self {
        Self { winner, reason }
    }
}

/// Chooses between a local record with pending edits and its master counterpart.
///
/// A stale local tombstone never shadows a newer active master record,
/// whatever the policy. Under `LatestWins` the side with the strictly newer
/// `updated_at` (falling back to `created_at`) wins; a missing timestamp is
/// older than any present one, and an exact tie keeps the local copy.
pub fn resolve_conflict(policy: ConflictPolicy, local: &Record, master: &Record) -> ConflictDecision {
    let local_ts = local.last_modified();
    let master_ts = master.last_modified();

    if local.is_deleted() && !master.is_deleted() && master_ts > local_ts {
        return ConflictDecision::new(Winner::Master, ConflictReason::StaleLocalTombstone);
    }

    match policy {
        ConflictPolicy::MasterWins => {
            ConflictDecision::new(Winner::Master, ConflictReason::PolicyMasterWins)
        }
        ConflictPolicy::LocalWins => {
            ConflictDecision::new(Winner::Local, ConflictReason::PolicyLocalWins)
        }
        ConflictPolicy::LatestWins => match master_ts.cmp(&local_ts) {
            std::cmp::Ordering::Greater => {
                ConflictDecision::new(Winner::Master, ConflictReason::MasterNewer)
            }
            std::cmp::Ordering::Less => {
                ConflictDecision::new(Winner::Local, ConflictReason::LocalNewer)
            }
            std::cmp::Ordering::Equal => {
                ConflictDecision::new(Winner::Local, ConflictReason::TieKeepsLocal)
            }
        },
    }
}

/// A resolved conflict, surfaced in the cycle result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictOutcome {
    /// Entity type.
    pub entity: String,
    /// Local id of the record.
    pub id: RecordId,
    /// Stable identity, if assigned.
    pub uuid: Option<String>,
    /// Surviving copy.
    pub winner: Winner,
    /// Why it survived.
    pub reason: ConflictReason,
    /// Local modification time at resolution.
    pub local_updated_at: Option<Timestamp>,
    /// Master modification time at resolution.
    pub master_updated_at: Option<Timestamp>,
}

impl ConflictOutcome {
    /// Records a decision for a local/master pair.
    pub fn new(entity: &str, local: &Record, master: &Record, decision: ConflictDecision) -> Self {
        Self {
            entity: entity.to_string(),
            id: local.id.clone(),
            uuid: local.uuid().map(str::to_string),
            winner: decision.winner,
            reason: decision.reason,
            local_updated_at: local.last_modified(),
            master_updated_at: master.last_modified(),
        }
    }
}

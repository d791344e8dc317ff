use crate::archive::table::{ChannelTable, EnrichedMessage, WindowBounds};
use crate::archive::timestamp::Timestamp;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// How previously persisted rows are reconciled with a fresh window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MergePolicy {
    /// Drop every persisted row at or after the fresh window's minimum `ts`,
    /// then append the fresh rows. Persisted rows in the gap between the old
    /// and new windows are lost.
    #[default]
    Boundary,
    /// Keep the union of persisted and fresh rows keyed by `ts`; fresh rows
    /// replace persisted ones with the same `ts`.
    Union,
}

impl MergePolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Boundary => "boundary",
            Self::Union => "union",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MergeOutcome {
    pub table: ChannelTable,
    pub retained: usize,
    pub superseded: usize,
    /// Persisted rows dropped by the boundary cut that the fresh window did
    /// not bring back.
    pub gap_lost: usize,
}

pub fn merge(
    previous: ChannelTable,
    fresh: ChannelTable,
    bounds: Option<&WindowBounds>,
    policy: MergePolicy,
) -> MergeOutcome {
    if previous.is_empty() {
        return MergeOutcome {
            table: fresh,
            retained: 0,
            superseded: 0,
            gap_lost: 0,
        };
    }
    match policy {
        MergePolicy::Boundary => merge_boundary(previous, fresh, bounds),
        MergePolicy::Union => merge_union(previous, fresh),
    }
}

fn merge_boundary(
    previous: ChannelTable,
    fresh: ChannelTable,
    bounds: Option<&WindowBounds>,
) -> MergeOutcome {
    let Some(bounds) = bounds else {
        let retained = previous.len();
        let mut rows = previous.rows;
        rows.extend(fresh.rows);
        return MergeOutcome {
            table: ChannelTable { rows },
            retained,
            superseded: 0,
            gap_lost: 0,
        };
    };

    let fresh_ts: BTreeSet<&Timestamp> = fresh.rows.iter().map(|r| &r.ts).collect();
    let (kept, dropped): (Vec<EnrichedMessage>, Vec<EnrichedMessage>) = previous
        .rows
        .into_iter()
        .partition(|row| row.ts < bounds.min);
    let gap_lost = dropped
        .iter()
        .filter(|row| !fresh_ts.contains(&row.ts))
        .count();

    let retained = kept.len();
    let superseded = dropped.len();
    let mut rows = kept;
    rows.extend(fresh.rows);

    MergeOutcome {
        table: ChannelTable { rows },
        retained,
        superseded,
        gap_lost,
    }
}

fn merge_union(previous: ChannelTable, fresh: ChannelTable) -> MergeOutcome {
    let previous_len = previous.len();
    let mut by_ts: BTreeMap<Timestamp, EnrichedMessage> = previous
        .rows
        .into_iter()
        .map(|row| (row.ts.clone(), row))
        .collect();
    // Duplicate ts inside the persisted table collapse here as well.
    let distinct_previous = by_ts.len();

    let mut superseded = 0usize;
    for row in fresh.rows {
        if by_ts.insert(row.ts.clone(), row).is_some() {
            superseded += 1;
        }
    }

    MergeOutcome {
        table: ChannelTable {
            rows: by_ts.into_values().collect(),
        },
        retained: distinct_previous - superseded,
        superseded: superseded + (previous_len - distinct_previous),
        gap_lost: 0,
    }
}

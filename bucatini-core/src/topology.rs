// Copyright 2025 Bucatini Contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

//! Replica-set topology inspection.
//!
//! `config.shards` declares each shard as `"<replset>/<host1>,<host2>,…"`.
//! The coordinator contacts one declared member directly (bypassing the
//! router), asks it for the runtime member states, and picks the member to
//! tail. The pure parts of that process live here: parsing the compound
//! host string, joining `replSetGetStatus` output with the
//! `local.system.replset` declaration, and the selection policy itself.
//!
//! The policy is order-independent: any eligible secondary wins over any
//! eligible primary, and delayed members are never eligible (tailing a
//! delayed member would replay the past).

use bson::{Bson, Document};
use std::collections::HashMap;
use thiserror::Error;

/// `replSetGetStatus` member state for a primary.
pub const STATE_PRIMARY: i32 = 1;

/// `replSetGetStatus` member state for a secondary.
pub const STATE_SECONDARY: i32 = 2;

/// Errors parsing a shard's compound host string.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TopologyError {
    /// The host string carries no `<replset>/` prefix.
    #[error("shard host {host:?} is not replica-set qualified")]
    MissingReplicaSetPrefix {
        /// The compound host string as read from `config.shards`.
        host: String,
    },

    /// The declared member list is too short to pick a non-first seed.
    #[error("shard host {host:?} declares fewer than two members")]
    TooFewMembers {
        /// The compound host string as read from `config.shards`.
        host: String,
    },
}

/// One replica-set member, joining its runtime state with its declared
/// configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberView {
    /// Member `_id` shared by status and configuration documents.
    pub member_id: i64,
    /// Declared `host:port`.
    pub host: String,
    /// Runtime state from `replSetGetStatus`.
    pub state: i32,
    /// Whether the member is configured with a nonzero replication delay.
    pub delayed: bool,
}

/// Extracts the seed member to contact from a compound host string.
///
/// The member at index 1 of the declared list is used deliberately: index 0
/// is commonly the primary, and the seed is only a vantage point; real
/// selection runs against that member's view of the set.
///
/// # Errors
///
/// Fails when the string has no `/` separator or declares fewer than two
/// members.
pub fn seed_from_compound_host(compound: &str) -> Result<&str, TopologyError> {
    let (_, members) = compound
        .split_once('/')
        .ok_or_else(|| TopologyError::MissingReplicaSetPrefix {
            host: compound.to_string(),
        })?;

    let mut members = members.split(',');
    let _first = members.next();
    match members.next() {
        Some(seed) if !seed.is_empty() => Ok(seed),
        _ => Err(TopologyError::TooFewMembers {
            host: compound.to_string(),
        }),
    }
}

/// Joins `replSetGetStatus` members with the `local.system.replset`
/// declaration on member `_id`.
///
/// Members that cannot be read on either side are skipped; the selection
/// policy simply never sees them.
#[must_use]
pub fn member_views(status: &Document, replset_config: &Document) -> Vec<MemberView> {
    let mut declared: HashMap<i64, (String, bool)> = HashMap::new();
    if let Ok(members) = replset_config.get_array("members") {
        for member in members.iter().filter_map(Bson::as_document) {
            let Some(member_id) = member.get("_id").and_then(bson_int) else {
                continue;
            };
            let Some(host) = member.get("host").and_then(Bson::as_str) else {
                continue;
            };
            let delayed = match member.get("slaveDelay") {
                None | Some(Bson::Null) => false,
                Some(value) => bson_int(value) != Some(0),
            };
            declared.insert(member_id, (host.to_string(), delayed));
        }
    }

    let mut views = Vec::new();
    if let Ok(members) = status.get_array("members") {
        for member in members.iter().filter_map(Bson::as_document) {
            let Some(member_id) = member.get("_id").and_then(bson_int) else {
                continue;
            };
            let Some(state) = member.get("state").and_then(bson_int) else {
                continue;
            };
            let Some((host, delayed)) = declared.get(&member_id) else {
                continue;
            };
            views.push(MemberView {
                member_id,
                host: host.clone(),
                state: state as i32,
                delayed: *delayed,
            });
        }
    }
    views
}

/// Picks the member to tail: the first eligible secondary, else the last
/// eligible primary, else none.
///
/// A member is eligible when its state is primary or secondary and it is
/// not delayed.
#[must_use]
pub fn select_tail_member(members: &[MemberView]) -> Option<String> {
    let mut fallback_primary = None;
    for member in members {
        if member.delayed {
            continue;
        }
        match member.state {
            STATE_SECONDARY => return Some(member.host.clone()),
            STATE_PRIMARY => fallback_primary = Some(member.host.clone()),
            _ => {}
        }
    }
    fallback_primary
}

fn bson_int(value: &Bson) -> Option<i64> {
    match value {
        Bson::Int32(v) => Some(i64::from(*v)),
        Bson::Int64(v) => Some(*v),
        Bson::Double(v) if v.fract() == 0.0 => Some(*v as i64),
        _ => None,
    }
}

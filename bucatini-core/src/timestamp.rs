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

//! Oplog timestamp helpers.
//!
//! Oplog entries are stamped with [`bson::Timestamp`], an internal format
//! distinct from the regular BSON datetime: on the wire it is a single
//! 64-bit value packing seconds since the UNIX epoch in the upper 32 bits
//! and an ordinal in the lower 32 bits. The ordinal counts operations within
//! a given second on one node, so timestamps are unique per `mongod` but not
//! across shards.

use bson::Timestamp;
use chrono::{DateTime, Utc};

/// Packs a timestamp into its 64-bit wire form: seconds in the upper 32
/// bits, ordinal in the lower 32 bits.
#[must_use]
pub fn pack(ts: Timestamp) -> u64 {
    (u64::from(ts.time) << 32) | u64::from(ts.increment)
}

/// Splits a packed 64-bit value back into seconds and ordinal.
#[must_use]
pub fn unpack(raw: u64) -> Timestamp {
    Timestamp {
        time: (raw >> 32) as u32,
        increment: raw as u32,
    }
}

/// Timestamp for a wall-clock instant, with the ordinal starting at zero.
///
/// Instants before the UNIX epoch clamp to zero.
#[must_use]
pub fn at_wall_clock(at: DateTime<Utc>) -> Timestamp {
    let seconds = at.timestamp().clamp(0, i64::from(u32::MAX));
    Timestamp {
        time: seconds as u32,
        increment: 0,
    }
}

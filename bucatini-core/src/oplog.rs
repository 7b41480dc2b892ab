//! Oplog entry representation.
//!
//! Every write on a `mongod` is recorded in the `local.oplog.rs` capped
//! collection. The fields carried here are the ones the replication
//! machinery writes:
//!
//! - `ts`: when the operation occurred ([`bson::Timestamp`])
//! - `h`: a unique ID for the operation on its originating node
//! - `v`: oplog entry schema version
//! - `op`: operation type letter ("i" insert, "u" update, "d" delete,
//!   "c" command, "n" no-op)
//! - `ns`: `database.collection` the operation applies to
//! - `o`: the operation payload
//! - `o2`: update criteria, present on update operations
//!
//! Timestamps are unique per node only; a sharded cluster can record the
//! same `ts` on several shards, which is why `(ts, h)` is the identity used
//! by the resume logic.
//!
//! # Examples
//!
//! ```rust
//! use bucatini_core::oplog::{OperationKind, OplogDoc};
//! use bson::{doc, Timestamp};
//!
//! let entry = OplogDoc::from_document(doc! {
//!     "ts": Timestamp { time: 1_700_000_000, increment: 1 },
//!     "h": 42_i64,
//!     "v": 2_i64,
//!     "op": "i",
//!     "ns": "appdb.users",
//!     "o": { "_id": 1, "name": "Alice" },
//! })
//! .unwrap();
//!
//! assert_eq!(entry.kind(), OperationKind::Insert);
//! assert_eq!(entry.database_name(), "appdb");
//! assert_eq!(entry.collection_name(), "users");
//! ```

use bson::{Document, Timestamp};
use serde::{Deserialize, Serialize};

/// One oplog entry as observed on the wire.
///
/// Unknown fields are ignored during decoding; a missing required field is a
/// decode error. The raw `op` string is preserved as received: no-ops and
/// unrecognized operations pass through verbatim, interpretation belongs to
/// consumers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OplogDoc {
    /// Time the operation occurred. Unique per node, not across shards.
    #[serde(rename = "ts")]
    pub timestamp: Timestamp,

    /// Unique ID for this operation on its originating node; the tie-breaker
    /// between entries sharing a timestamp.
    #[serde(rename = "h")]
    pub history_id: i64,

    /// Oplog entry schema version.
    #[serde(rename = "v")]
    pub version: i64,

    /// Operation type letter, preserved as received.
    #[serde(rename = "op")]
    pub operation: String,

    /// `database.collection` the operation applies to.
    #[serde(rename = "ns")]
    pub namespace: String,

    /// Operation payload.
    #[serde(rename = "o", default, skip_serializing_if = "Option::is_none")]
    pub object: Option<Document>,

    /// Update criteria, present on update operations.
    #[serde(rename = "o2", default, skip_serializing_if = "Option::is_none")]
    pub update_object: Option<Document>,
}

impl OplogDoc {
    /// Decodes an entry from the wire document.
    ///
    /// # Errors
    ///
    /// Returns a decode error when a required field is missing or mistyped.
    pub fn from_document(document: Document) -> Result<Self, bson::de::Error> {
        bson::from_document(document)
    }

    /// Classifies the raw operation letter.
    #[must_use]
    pub fn kind(&self) -> OperationKind {
        OperationKind::classify(&self.operation)
    }

    /// Returns true for insert operations.
    #[must_use]
    pub fn is_insert(&self) -> bool {
        self.kind() == OperationKind::Insert
    }

    /// Returns true for update operations.
    #[must_use]
    pub fn is_update(&self) -> bool {
        self.kind() == OperationKind::Update
    }

    /// Returns true for delete operations.
    #[must_use]
    pub fn is_delete(&self) -> bool {
        self.kind() == OperationKind::Delete
    }

    /// Returns true for replication no-ops.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.kind() == OperationKind::Noop
    }

    /// Database part of the namespace.
    #[must_use]
    pub fn database_name(&self) -> &str {
        self.namespace
            .split_once('.')
            .map_or(self.namespace.as_str(), |(database, _)| database)
    }

    /// Collection part of the namespace; empty when the namespace names a
    /// whole database (command entries do this).
    #[must_use]
    pub fn collection_name(&self) -> &str {
        self.namespace
            .split_once('.')
            .map_or("", |(_, collection)| collection)
    }
}

/// Classification of the raw `op` letter.
///
/// `Other` covers letters this library does not recognize; the raw string
/// stays available on [`OplogDoc::operation`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum OperationKind {
    /// A document was inserted (`"i"`).
    Insert,
    /// A document was updated (`"u"`).
    Update,
    /// A document was deleted (`"d"`).
    Delete,
    /// A database command was applied (`"c"`).
    Command,
    /// A replication no-op (`"n"`).
    Noop,
    /// Any other operation letter.
    Other,
}

impl OperationKind {
    /// Maps an operation letter to its kind.
    #[must_use]
    pub fn classify(operation: &str) -> Self {
        match operation {
            "i" => Self::Insert,
            "u" => Self::Update,
            "d" => Self::Delete,
            "c" => Self::Command,
            "n" => Self::Noop,
            _ => Self::Other,
        }
    }
}

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

//! Driver seam over the MongoDB client.
//!
//! Discovery and tailing consume the database exclusively through the
//! [`Dialer`], [`OplogSession`], and [`OplogCursor`] traits, so the core
//! logic can be driven by a scripted implementation in tests. The
//! production implementation, [`MongoDialer`], is backed by the official
//! driver.
//!
//! A tailable-cursor poll has four distinguishable outcomes, modeled by
//! [`CursorOutcome`]:
//!
//! - a document arrived;
//! - the await window elapsed with nothing new (not an error; poll again);
//! - the server invalidated the cursor (recoverable by reopening);
//! - anything else (not recoverable).

use async_trait::async_trait;
use bson::Document;
use futures::TryStreamExt;
use mongodb::error::{Error as MongoError, ErrorKind as MongoErrorKind};
use mongodb::options::CursorType;
use mongodb::{Client, Cursor};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Server-side await window for tailable cursors.
pub const TAIL_TIMEOUT: Duration = Duration::from_secs(100);

/// Client-side grace on top of [`TAIL_TIMEOUT`] before a poll is reported as
/// [`CursorOutcome::Timeout`]. The server normally answers first.
const CLIENT_GRACE: Duration = Duration::from_secs(10);

/// Outcome of one tailable-cursor poll.
#[derive(Debug)]
pub enum CursorOutcome {
    /// The cursor produced a document.
    Document(Document),
    /// No document arrived within the await window; the cursor is still
    /// live and can be polled again.
    Timeout,
    /// The server invalidated the cursor; it must be reopened.
    Expired,
    /// Any other driver failure; reopening will not help.
    Fatal(MongoError),
}

/// A live cursor over one node's oplog.
#[async_trait]
pub trait OplogCursor: Send {
    /// Waits for the next document, bounded by the cursor's await window.
    async fn advance(&mut self) -> CursorOutcome;
}

/// A dialed connection to a single node or router.
#[async_trait]
pub trait OplogSession: Send + Sync {
    /// Runs a database command (`isMaster`, `replSetGetStatus`, …) and
    /// returns the raw reply.
    async fn run_command(&self, db: &str, command: Document) -> Result<Document, MongoError>;

    /// Reads every document matching `filter` from a collection. Used for
    /// small metadata collections (`config.shards`, `local.system.replset`).
    async fn find_all(
        &self,
        db: &str,
        collection: &str,
        filter: Document,
    ) -> Result<Vec<Document>, MongoError>;

    /// Reads a single document under the given sort; `$natural: -1` yields
    /// the newest entry of a capped collection.
    async fn find_one_sorted(
        &self,
        db: &str,
        collection: &str,
        sort: Document,
    ) -> Result<Option<Document>, MongoError>;

    /// Opens a tailable cursor over a capped collection. The timestamp
    /// clause of `filter` positions the cursor at the resume point.
    async fn open_tailable(
        &self,
        db: &str,
        collection: &str,
        filter: Document,
    ) -> Result<Box<dyn OplogCursor>, MongoError>;
}

/// Dials nodes by connection string.
#[async_trait]
pub trait Dialer: Send + Sync {
    /// Establishes a session against the node at `uri`.
    async fn dial(&self, uri: &str) -> Result<Arc<dyn OplogSession>, MongoError>;
}

/// [`Dialer`] backed by the official MongoDB driver.
#[derive(Debug, Clone, Copy, Default)]
pub struct MongoDialer;

impl MongoDialer {
    /// Creates the production dialer.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Dialer for MongoDialer {
    async fn dial(&self, uri: &str) -> Result<Arc<dyn OplogSession>, MongoError> {
        let client = Client::with_uri_str(uri).await?;
        Ok(Arc::new(MongoSession { client }))
    }
}

struct MongoSession {
    client: Client,
}

#[async_trait]
impl OplogSession for MongoSession {
    async fn run_command(&self, db: &str, command: Document) -> Result<Document, MongoError> {
        self.client.database(db).run_command(command).await
    }

    async fn find_all(
        &self,
        db: &str,
        collection: &str,
        filter: Document,
    ) -> Result<Vec<Document>, MongoError> {
        let cursor = self
            .client
            .database(db)
            .collection::<Document>(collection)
            .find(filter)
            .await?;
        cursor.try_collect().await
    }

    async fn find_one_sorted(
        &self,
        db: &str,
        collection: &str,
        sort: Document,
    ) -> Result<Option<Document>, MongoError> {
        self.client
            .database(db)
            .collection::<Document>(collection)
            .find_one(Document::new())
            .sort(sort)
            .await
    }

    async fn open_tailable(
        &self,
        db: &str,
        collection: &str,
        filter: Document,
    ) -> Result<Box<dyn OplogCursor>, MongoError> {
        debug!(db, collection, "opening tailable cursor");
        let cursor = self
            .client
            .database(db)
            .collection::<Document>(collection)
            .find(filter)
            .cursor_type(CursorType::TailableAwait)
            .max_await_time(TAIL_TIMEOUT)
            .await?;
        Ok(Box::new(MongoTailCursor { inner: cursor }))
    }
}

struct MongoTailCursor {
    inner: Cursor<Document>,
}

#[async_trait]
impl OplogCursor for MongoTailCursor {
    async fn advance(&mut self) -> CursorOutcome {
        match tokio::time::timeout(TAIL_TIMEOUT + CLIENT_GRACE, self.inner.try_next()).await {
            Err(_elapsed) => CursorOutcome::Timeout,
            Ok(Ok(Some(document))) => CursorOutcome::Document(document),
            Ok(Ok(None)) => CursorOutcome::Expired,
            Ok(Err(error)) if cursor_is_gone(&error) => CursorOutcome::Expired,
            Ok(Err(error)) => CursorOutcome::Fatal(error),
        }
    }
}

/// The server signals that a tailable cursor no longer exists with
/// 43 `CursorNotFound` or 237 `CursorKilled`.
fn cursor_is_gone(error: &MongoError) -> bool {
    match error.kind.as_ref() {
        MongoErrorKind::Command(command_error) => matches!(command_error.code, 43 | 237),
        _ => false,
    }
}

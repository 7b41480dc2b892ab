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

//! Scripted in-memory driver for the integration tests.
//!
//! [`ScriptedSession`] answers commands and reads from canned documents and
//! replays cursor scripts in order, recording every filter a tailable
//! cursor was opened with so tests can assert on resume behavior.

#![allow(dead_code)]

use async_trait::async_trait;
use bson::{doc, Document, Timestamp};
use bucatini_core::driver::{CursorOutcome, Dialer, OplogCursor, OplogSession};
use mongodb::error::Error as MongoError;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// One scripted cursor poll outcome.
pub enum Step {
    /// Yield a document.
    Document(Document),
    /// Report an empty await window; the cursor stays live.
    Timeout,
    /// Report the cursor as invalidated.
    Expired,
    /// Fail the cursor with a non-recoverable error.
    Fatal(&'static str),
}

/// Builds a minimal wire-shaped oplog insert entry.
pub fn entry(time: u32, ordinal: u32, history_id: i64) -> Document {
    doc! {
        "ts": Timestamp { time, increment: ordinal },
        "h": history_id,
        "v": 2_i64,
        "op": "i",
        "ns": "appdb.users",
        "o": { "_id": history_id },
    }
}

fn unscripted(what: &str) -> MongoError {
    MongoError::from(std::io::Error::new(
        std::io::ErrorKind::NotFound,
        format!("unscripted {what}"),
    ))
}

/// In-memory [`OplogSession`] answering from canned state.
#[derive(Default)]
pub struct ScriptedSession {
    commands: Mutex<HashMap<String, Document>>,
    collections: Mutex<HashMap<(String, String), Vec<Document>>>,
    newest: Mutex<HashMap<(String, String), Document>>,
    cursor_scripts: Mutex<VecDeque<VecDeque<Step>>>,
    opened_filters: Mutex<Vec<Document>>,
    sorts: Mutex<Vec<Document>>,
}

impl ScriptedSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cans the reply for a command, keyed by its name.
    pub fn with_command(self, name: &str, reply: Document) -> Self {
        self.commands.lock().unwrap().insert(name.to_string(), reply);
        self
    }

    /// Cans the contents of a collection.
    pub fn with_collection(self, db: &str, collection: &str, documents: Vec<Document>) -> Self {
        self.collections
            .lock()
            .unwrap()
            .insert((db.to_string(), collection.to_string()), documents);
        self
    }

    /// Cans the newest document of a capped collection.
    pub fn with_newest(self, db: &str, collection: &str, document: Document) -> Self {
        self.newest
            .lock()
            .unwrap()
            .insert((db.to_string(), collection.to_string()), document);
        self
    }

    /// Queues a cursor script; each `open_tailable` call consumes one. A
    /// cursor opened past the end of its script (or with no script at all)
    /// parks until the tailer shuts down.
    pub fn push_cursor(&self, steps: Vec<Step>) {
        self.cursor_scripts.lock().unwrap().push_back(steps.into());
    }

    /// Every filter a tailable cursor was opened with, in order.
    pub fn opened_filters(&self) -> Vec<Document> {
        self.opened_filters.lock().unwrap().clone()
    }

    /// Every sort passed to `find_one_sorted`, in order.
    pub fn sorts(&self) -> Vec<Document> {
        self.sorts.lock().unwrap().clone()
    }
}

#[async_trait]
impl OplogSession for ScriptedSession {
    async fn run_command(&self, _db: &str, command: Document) -> Result<Document, MongoError> {
        let name = command.keys().next().cloned().unwrap_or_default();
        self.commands
            .lock()
            .unwrap()
            .get(&name)
            .cloned()
            .ok_or_else(|| unscripted(&format!("command {name}")))
    }

    async fn find_all(
        &self,
        db: &str,
        collection: &str,
        _filter: Document,
    ) -> Result<Vec<Document>, MongoError> {
        Ok(self
            .collections
            .lock()
            .unwrap()
            .get(&(db.to_string(), collection.to_string()))
            .cloned()
            .unwrap_or_default())
    }

    async fn find_one_sorted(
        &self,
        db: &str,
        collection: &str,
        sort: Document,
    ) -> Result<Option<Document>, MongoError> {
        self.sorts.lock().unwrap().push(sort);
        Ok(self
            .newest
            .lock()
            .unwrap()
            .get(&(db.to_string(), collection.to_string()))
            .cloned())
    }

    async fn open_tailable(
        &self,
        _db: &str,
        _collection: &str,
        filter: Document,
    ) -> Result<Box<dyn OplogCursor>, MongoError> {
        self.opened_filters.lock().unwrap().push(filter);
        let steps = self
            .cursor_scripts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_default();
        Ok(Box::new(ScriptedCursor { steps }))
    }
}

struct ScriptedCursor {
    steps: VecDeque<Step>,
}

#[async_trait]
impl OplogCursor for ScriptedCursor {
    async fn advance(&mut self) -> CursorOutcome {
        match self.steps.pop_front() {
            Some(Step::Document(document)) => CursorOutcome::Document(document),
            Some(Step::Timeout) => CursorOutcome::Timeout,
            Some(Step::Expired) => CursorOutcome::Expired,
            Some(Step::Fatal(message)) => CursorOutcome::Fatal(MongoError::from(
                std::io::Error::new(std::io::ErrorKind::BrokenPipe, message),
            )),
            None => futures::future::pending().await,
        }
    }
}

/// In-memory [`Dialer`] handing out registered sessions by connection
/// string. Dialing an unregistered string fails, which is how tests model
/// unreachable nodes.
#[derive(Default)]
pub struct ScriptedDialer {
    sessions: Mutex<HashMap<String, Arc<ScriptedSession>>>,
    dialed: Mutex<Vec<String>>,
}

impl ScriptedDialer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, uri: &str, session: Arc<ScriptedSession>) {
        self.sessions.lock().unwrap().insert(uri.to_string(), session);
    }

    /// Every connection string dialed, in order.
    pub fn dialed(&self) -> Vec<String> {
        self.dialed.lock().unwrap().clone()
    }
}

#[async_trait]
impl Dialer for ScriptedDialer {
    async fn dial(&self, uri: &str) -> Result<Arc<dyn OplogSession>, MongoError> {
        self.dialed.lock().unwrap().push(uri.to_string());
        self.sessions
            .lock()
            .unwrap()
            .get(uri)
            .cloned()
            .map(|session| session as Arc<dyn OplogSession>)
            .ok_or_else(|| {
                MongoError::from(std::io::Error::new(
                    std::io::ErrorKind::ConnectionRefused,
                    format!("no scripted node at {uri}"),
                ))
            })
    }
}

/// Polls `predicate` until it holds, panicking after five seconds.
pub async fn wait_until(predicate: impl Fn() -> bool) {
    for _ in 0..1000 {
        if predicate() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached within five seconds");
}

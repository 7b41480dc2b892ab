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

//! Resumable oplog tailer for a single `mongod`.
//!
//! A [`Tailer`] presents one node's oplog as an append-only event stream.
//! [`Tailer::start`] resolves a starting timestamp from a [`StartSpec`],
//! spawns the tail task, and returns the output channel; [`Tailer::stop`]
//! shuts the task down and surfaces its terminal result.
//!
//! # Lifecycle
//!
//! ```text
//! IDLE ── start ──► RUNNING(no cursor) ◄──► RUNNING(cursor open) ── stop / fatal error ──► STOPPED
//! ```
//!
//! # Resume state
//!
//! The task tracks the highest timestamp seen (`last_ts`) and the history
//! IDs already emitted at exactly that timestamp. When a cursor expires, the
//! replacement is opened with `ts >= last_ts` and `h $nin seen`, so entries at
//! the resumption boundary are never emitted twice. Timestamps are unique
//! per node only, which is why the history-ID set is needed at all; it is
//! cleared whenever the timestamp advances, keeping it bounded.
//!
//! # Ordering and backpressure
//!
//! Within one tailer, timestamps are non-decreasing and `(ts, h)` pairs are
//! unique. Across tailers nothing is guaranteed; consumers wanting a total
//! order must merge externally. The output channel holds a single event: a
//! slow consumer directly stalls the cursor, nothing is buffered or
//! dropped.

use crate::config::MongoConfig;
use crate::driver::{CursorOutcome, Dialer, OplogSession};
use crate::metrics;
use crate::oplog::OplogDoc;
use crate::timestamp;
use bson::{doc, Document, Timestamp};
use chrono::Utc;
use mongodb::error::Error as MongoError;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument};

/// Errors from starting, running, or stopping a tailer.
#[derive(Debug, Error)]
pub enum TailerError {
    /// `start` was called while the tail task is still running.
    #[error("tailer for {host:?} is already running")]
    AlreadyRunning {
        /// The node this tailer targets.
        host: String,
    },

    /// The target node could not be dialed.
    #[error("could not dial {host:?}")]
    Dial {
        /// The node this tailer targets.
        host: String,
        #[source]
        source: MongoError,
    },

    /// `"now"` was requested but the node's oplog holds no entries.
    #[error("oplog on {host:?} is empty")]
    EmptyOplog {
        /// The node this tailer targets.
        host: String,
    },

    /// An oplog entry could not be decoded into an [`OplogDoc`].
    #[error("oplog entry could not be decoded")]
    Decode(#[from] bson::de::Error),

    /// An oplog document carried a missing or mistyped timestamp.
    #[error("oplog timestamp missing or mistyped")]
    Timestamp(#[from] bson::document::ValueAccessError),

    /// A non-recoverable driver failure.
    #[error("mongodb driver error")]
    Driver(#[from] MongoError),

    /// The tail task panicked or was aborted.
    #[error("tail task did not run to completion")]
    Join(#[from] tokio::task::JoinError),
}

impl TailerError {
    /// Error category for metrics and logging.
    #[must_use]
    pub fn category(&self) -> &'static str {
        match self {
            Self::AlreadyRunning { .. } => "already_running",
            Self::Dial { .. } => "dial",
            Self::EmptyOplog { .. } => "empty_oplog",
            Self::Decode(_) => "decode",
            Self::Timestamp(_) => "timestamp",
            Self::Driver(_) => "driver",
            Self::Join(_) => "join",
        }
    }
}

/// Where in time to begin tailing.
///
/// Grammar: `"now"` (case-insensitive) resumes at the newest entry currently
/// in the oplog; `"-<N>"` backs off N minutes from the wall clock; anything
/// else reads as the wall clock now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartSpec {
    /// The newest entry currently in the node's oplog.
    Latest,
    /// Wall-clock time now, minus the given number of minutes.
    MinutesAgo(u32),
}

impl StartSpec {
    /// Parses a caller-supplied start specifier. A malformed `"-<N>"` suffix
    /// reads as zero minutes.
    #[must_use]
    pub fn parse(specifier: &str) -> Self {
        if specifier.eq_ignore_ascii_case("now") {
            return Self::Latest;
        }
        if let Some(minutes) = specifier.strip_prefix('-') {
            return Self::MinutesAgo(minutes.parse().unwrap_or(0));
        }
        Self::MinutesAgo(0)
    }
}

/// Tails one node's oplog onto an event channel, reopening the cursor
/// across expiry without re-emitting entries.
///
/// Constructed by the coordinator (or directly); does nothing until
/// [`Tailer::start`] is called.
pub struct Tailer {
    dialer: Arc<dyn Dialer>,
    config: Arc<MongoConfig>,
    base_query: Document,
    host: String,
    shutdown_tx: broadcast::Sender<()>,
    task: Option<JoinHandle<Result<(), TailerError>>>,
}

impl Tailer {
    /// Creates a tailer for `host`. No I/O happens until `start`.
    #[must_use]
    pub fn new(
        dialer: Arc<dyn Dialer>,
        config: Arc<MongoConfig>,
        base_query: Document,
        host: impl Into<String>,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            dialer,
            config,
            base_query,
            host: host.into(),
            shutdown_tx,
            task: None,
        }
    }

    /// The node this tailer targets.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Whether the tail task has been started and has not yet finished.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Dials the target node, resolves the starting timestamp from
    /// `specifier`, and spawns the tail task. Returns the event channel;
    /// it closes when the task exits.
    ///
    /// # Errors
    ///
    /// Fails when the tailer is already running, the node cannot be dialed,
    /// or `"now"` is requested against an empty oplog.
    #[instrument(skip(self), fields(host = %self.host))]
    pub async fn start(&mut self, specifier: &str) -> Result<mpsc::Receiver<OplogDoc>, TailerError> {
        if self.task.is_some() {
            return Err(TailerError::AlreadyRunning {
                host: self.host.clone(),
            });
        }

        let uri = self.config.connection_string_for(&self.host);
        let session = self.dialer.dial(&uri).await.map_err(|source| TailerError::Dial {
            host: self.host.clone(),
            source,
        })?;

        let initial_ts = self
            .resolve_start(session.as_ref(), StartSpec::parse(specifier))
            .await?;
        info!(?initial_ts, "starting oplog tail");

        // Capacity 1 is the closest tokio gets to a rendezvous channel: the
        // task cannot run ahead of its consumer.
        let (event_tx, event_rx) = mpsc::channel(1);
        let shutdown_rx = self.shutdown_tx.subscribe();
        let worker = TailWorker {
            session,
            config: Arc::clone(&self.config),
            base_query: self.base_query.clone(),
            host: self.host.clone(),
        };
        self.task = Some(tokio::spawn(worker.run(initial_ts, event_tx, shutdown_rx)));
        metrics::increment_active_tailers();
        Ok(event_rx)
    }

    async fn resolve_start(
        &self,
        session: &dyn OplogSession,
        spec: StartSpec,
    ) -> Result<Timestamp, TailerError> {
        match spec {
            StartSpec::Latest => {
                let newest = session
                    .find_one_sorted(
                        &self.config.oplog_database,
                        &self.config.oplog_collection,
                        doc! { "$natural": -1 },
                    )
                    .await?
                    .ok_or_else(|| TailerError::EmptyOplog {
                        host: self.host.clone(),
                    })?;
                Ok(newest.get_timestamp("ts")?)
            }
            StartSpec::MinutesAgo(minutes) => Ok(timestamp::at_wall_clock(
                Utc::now() - chrono::Duration::minutes(i64::from(minutes)),
            )),
        }
    }

    /// Signals the tail task to exit and surfaces its terminal result. The
    /// event channel closes once the task is gone. Stopping a tailer that
    /// was never started (or already stopped) is a no-op.
    ///
    /// # Errors
    ///
    /// Returns the error the tail task terminated with, if any.
    pub async fn stop(&mut self) -> Result<(), TailerError> {
        let Some(task) = self.task.take() else {
            return Ok(());
        };
        // No receivers is fine: the task may already have exited.
        let _ = self.shutdown_tx.send(());
        let result = task.await;
        metrics::decrement_active_tailers();
        if let Err(err) = &result {
            error!(host = %self.host, error = %err, "tail task did not run to completion");
        }
        result??;
        Ok(())
    }
}

struct TailWorker {
    session: Arc<dyn OplogSession>,
    config: Arc<MongoConfig>,
    base_query: Document,
    host: String,
}

impl TailWorker {
    #[instrument(skip_all, fields(host = %self.host))]
    async fn run(
        self,
        initial_ts: Timestamp,
        events: mpsc::Sender<OplogDoc>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), TailerError> {
        let mut last_ts = initial_ts;
        let mut hids_for_last_ts: Vec<i64> = Vec::new();

        // Outer iteration: no cursor; open one at the resume point.
        // Inner iteration: poll the open cursor until it expires or fails.
        'reopen: loop {
            let filter = resume_filter(&self.base_query, last_ts, &hids_for_last_ts);
            debug!(?last_ts, seen = hids_for_last_ts.len(), "opening tailable cursor");

            let mut cursor = tokio::select! {
                _ = shutdown.recv() => return Ok(()),
                opened = self.session.open_tailable(
                    &self.config.oplog_database,
                    &self.config.oplog_collection,
                    filter,
                ) => opened?,
            };
            metrics::increment_cursor_reopens(&self.host);

            loop {
                let outcome = tokio::select! {
                    _ = shutdown.recv() => return Ok(()),
                    outcome = cursor.advance() => outcome,
                };

                match outcome {
                    CursorOutcome::Document(raw) => {
                        let entry = OplogDoc::from_document(raw)?;
                        let ts = entry.timestamp;
                        let hid = entry.history_id;
                        let operation = entry.operation.clone();

                        tokio::select! {
                            _ = shutdown.recv() => return Ok(()),
                            sent = events.send(entry) => {
                                if sent.is_err() {
                                    debug!("event receiver dropped, stopping tail");
                                    return Ok(());
                                }
                            }
                        }

                        if ts > last_ts {
                            last_ts = ts;
                            hids_for_last_ts.clear();
                        }
                        hids_for_last_ts.push(hid);
                        metrics::increment_events_emitted(&self.host, &operation);
                    }
                    CursorOutcome::Timeout => {
                        metrics::increment_cursor_timeouts(&self.host);
                    }
                    CursorOutcome::Expired => {
                        debug!(?last_ts, "cursor expired, resuming past the last emitted entry");
                        continue 'reopen;
                    }
                    CursorOutcome::Fatal(err) => {
                        error!(error = %err, "tail cursor failed");
                        metrics::increment_tailer_errors(&self.host, "driver");
                        return Err(err.into());
                    }
                }
            }
        }
    }
}

/// Builds the oplog query for (re)opening a cursor: the base query plus
/// `ts >= last_ts`, plus `h $nin seen` when any history IDs were already
/// emitted at `last_ts`. An empty `$nin` would be inert, so it is elided.
fn resume_filter(base_query: &Document, last_ts: Timestamp, seen: &[i64]) -> Document {
    let mut filter = base_query.clone();
    filter.insert("ts", doc! { "$gte": last_ts });
    if !seen.is_empty() {
        filter.insert("h", doc! { "$nin": seen.to_vec() });
    }
    filter
}

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

//! Tail-loop tests against the scripted driver: start-specifier
//! resolution, resume across cursor expiry, and shutdown behavior.

mod support;

use bson::{doc, Bson, Timestamp};
use bucatini_core::config::MongoConfig;
use bucatini_core::tailer::{Tailer, TailerError};
use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use support::{entry, wait_until, ScriptedDialer, ScriptedSession, Step};

const HOST: &str = "node0.example:27017";

fn config() -> Arc<MongoConfig> {
    Arc::new(
        MongoConfig::builder()
            .host("entry.example")
            .database("appdb")
            .build()
            .unwrap(),
    )
}

fn tailer_for(session: Arc<ScriptedSession>) -> Tailer {
    let dialer = ScriptedDialer::new();
    dialer.register("mongodb://node0.example:27017/appdb", session);
    Tailer::new(Arc::new(dialer), config(), doc! {}, HOST)
}

async fn next_event(
    events: &mut tokio::sync::mpsc::Receiver<bucatini_core::oplog::OplogDoc>,
) -> bucatini_core::oplog::OplogDoc {
    tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("timed out waiting for an event")
        .expect("event channel closed early")
}

#[tokio::test]
async fn test_resume_across_cursor_expiry() {
    let session = Arc::new(ScriptedSession::new().with_newest(
        "local",
        "oplog.rs",
        entry(100, 1, 0),
    ));
    // Two entries share a timestamp before it advances; then the server
    // invalidates the cursor mid-stream.
    session.push_cursor(vec![
        Step::Document(entry(100, 1, 1)),
        Step::Document(entry(100, 1, 2)),
        Step::Document(entry(101, 1, 3)),
        Step::Expired,
    ]);
    session.push_cursor(vec![Step::Document(entry(101, 1, 4)), Step::Timeout]);

    let mut tailer = tailer_for(Arc::clone(&session));
    let mut events = tailer.start("now").await.unwrap();

    let mut emitted = Vec::new();
    for _ in 0..4 {
        let event = next_event(&mut events).await;
        emitted.push((event.timestamp, event.history_id));
    }
    tailer.stop().await.unwrap();

    // Timestamps never go backwards and no (ts, h) pair repeats, even
    // across the restart.
    let mut previous: Option<Timestamp> = None;
    let mut seen = HashSet::new();
    for (ts, hid) in &emitted {
        if let Some(previous) = previous {
            assert!(*ts >= previous);
        }
        previous = Some(*ts);
        assert!(seen.insert((ts.time, ts.increment, *hid)));
    }
    assert_eq!(
        emitted.last(),
        Some(&(Timestamp { time: 101, increment: 1 }, 4))
    );

    let filters = session.opened_filters();
    assert_eq!(filters.len(), 2);

    // Initial open: at the newest entry, no history filter yet.
    assert_eq!(
        filters[0].get_document("ts").unwrap().get_timestamp("$gte").unwrap(),
        Timestamp { time: 100, increment: 1 }
    );
    assert!(!filters[0].contains_key("h"));

    // Reopen after expiry: at the last emitted timestamp, excluding the
    // history IDs already delivered there.
    assert_eq!(
        filters[1].get_document("ts").unwrap().get_timestamp("$gte").unwrap(),
        Timestamp { time: 101, increment: 1 }
    );
    assert_eq!(
        filters[1].get_document("h").unwrap().get_array("$nin").unwrap(),
        &vec![Bson::Int64(3)]
    );
}

#[tokio::test]
async fn test_now_resolves_to_newest_oplog_entry() {
    let session = Arc::new(ScriptedSession::new().with_newest(
        "local",
        "oplog.rs",
        entry(500, 7, 99),
    ));

    let mut tailer = tailer_for(Arc::clone(&session));
    let _events = tailer.start("NOW").await.unwrap();

    wait_until(|| !session.opened_filters().is_empty()).await;
    let filter = session.opened_filters().remove(0);
    assert_eq!(
        filter.get_document("ts").unwrap().get_timestamp("$gte").unwrap(),
        Timestamp { time: 500, increment: 7 }
    );
    // The newest entry is found by walking the capped collection backwards.
    assert_eq!(session.sorts(), vec![doc! { "$natural": -1 }]);

    tailer.stop().await.unwrap();
}

#[tokio::test]
async fn test_minutes_ago_start_encodes_wall_clock_offset() {
    let session = Arc::new(ScriptedSession::new());

    let mut tailer = tailer_for(Arc::clone(&session));
    let earliest = Utc::now().timestamp() - 300;
    let _events = tailer.start("-5").await.unwrap();
    let latest = Utc::now().timestamp() - 300;

    wait_until(|| !session.opened_filters().is_empty()).await;
    let filter = session.opened_filters().remove(0);
    let ts = filter.get_document("ts").unwrap().get_timestamp("$gte").unwrap();
    assert!(i64::from(ts.time) >= earliest);
    assert!(i64::from(ts.time) <= latest);
    assert_eq!(ts.increment, 0);
    assert!(!filter.contains_key("h"));

    tailer.stop().await.unwrap();
}

#[tokio::test]
async fn test_now_against_empty_oplog_fails() {
    let session = Arc::new(ScriptedSession::new());
    let mut tailer = tailer_for(session);

    let error = tailer.start("now").await.unwrap_err();
    assert!(matches!(error, TailerError::EmptyOplog { .. }));
    assert!(!tailer.is_running());
}

#[tokio::test]
async fn test_unreachable_host_fails_start() {
    let mut tailer = Tailer::new(
        Arc::new(ScriptedDialer::new()),
        config(),
        doc! {},
        "nowhere:1",
    );

    let error = tailer.start("now").await.unwrap_err();
    assert!(matches!(error, TailerError::Dial { ref host, .. } if host == "nowhere:1"));
}

#[tokio::test]
async fn test_stop_before_start_is_clean() {
    let mut tailer = tailer_for(Arc::new(ScriptedSession::new()));

    assert!(!tailer.is_running());
    tailer.stop().await.unwrap();
    tailer.stop().await.unwrap();
}

#[tokio::test]
async fn test_double_start_is_rejected() {
    let session = Arc::new(ScriptedSession::new());
    let mut tailer = tailer_for(session);

    let _events = tailer.start("-0").await.unwrap();
    assert!(tailer.is_running());

    let error = tailer.start("-0").await.unwrap_err();
    assert!(matches!(error, TailerError::AlreadyRunning { .. }));

    tailer.stop().await.unwrap();
    assert!(!tailer.is_running());
}

#[tokio::test]
async fn test_fatal_cursor_error_surfaces_through_stop() {
    let session = Arc::new(ScriptedSession::new());
    session.push_cursor(vec![Step::Fatal("socket torn down")]);

    let mut tailer = tailer_for(session);
    let _events = tailer.start("-0").await.unwrap();

    wait_until(|| !tailer.is_running()).await;
    let error = tailer.stop().await.unwrap_err();
    assert!(matches!(error, TailerError::Driver(_)));
}

#[tokio::test]
async fn test_timeout_keeps_the_same_cursor() {
    let session = Arc::new(ScriptedSession::new());
    session.push_cursor(vec![
        Step::Timeout,
        Step::Timeout,
        Step::Document(entry(100, 1, 1)),
    ]);

    let mut tailer = tailer_for(Arc::clone(&session));
    let mut events = tailer.start("-0").await.unwrap();

    let event = next_event(&mut events).await;
    assert_eq!(event.history_id, 1);
    // Both timeouts were absorbed without reopening.
    assert_eq!(session.opened_filters().len(), 1);

    tailer.stop().await.unwrap();
}

#[tokio::test]
async fn test_dropped_receiver_stops_the_task() {
    let session = Arc::new(ScriptedSession::new());
    session.push_cursor(vec![
        Step::Document(entry(100, 1, 1)),
        Step::Document(entry(100, 1, 2)),
    ]);

    let mut tailer = tailer_for(session);
    let events = tailer.start("-0").await.unwrap();
    drop(events);

    wait_until(|| !tailer.is_running()).await;
    tailer.stop().await.unwrap();
}

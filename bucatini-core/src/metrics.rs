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

//! Metrics instrumentation for oplog tailing.
//!
//! Uses the `metrics` crate, so any exporter (Prometheus, StatsD, …) the
//! embedding application installs will pick these up; nothing is exported
//! from here.
//!
//! All names follow Prometheus conventions: underscores, a `bucatini_`
//! prefix, counters ending in `_total`. Labels stay low-cardinality:
//! `host` is one label per tailed node, and `operation`/`error_type` are
//! small fixed sets.
//!
//! # Examples
//!
//! ```rust
//! use bucatini_core::metrics;
//!
//! metrics::init_metrics();
//! metrics::increment_events_emitted("shard1.example:27017", "i");
//! metrics::set_discovered_shards(3);
//! ```

use metrics::{counter, describe_counter, describe_gauge, gauge};

/// Total oplog entries emitted on tailer output channels.
///
/// Type: Counter
/// Labels: host, operation
pub const EVENTS_EMITTED_TOTAL: &str = "bucatini_events_emitted_total";

/// Total tailable-cursor opens, including the initial open of each tailer.
///
/// Type: Counter
/// Labels: host
pub const CURSOR_REOPENS_TOTAL: &str = "bucatini_cursor_reopens_total";

/// Total cursor polls that elapsed without a document.
///
/// Type: Counter
/// Labels: host
pub const CURSOR_TIMEOUTS_TOTAL: &str = "bucatini_cursor_timeouts_total";

/// Total non-recoverable tailer failures.
///
/// Type: Counter
/// Labels: host, error_type
pub const TAILER_ERRORS_TOTAL: &str = "bucatini_tailer_errors_total";

/// Number of tail tasks currently running.
///
/// Type: Gauge
pub const ACTIVE_TAILERS: &str = "bucatini_active_tailers";

/// Number of shards found by the last discovery (0 for standalone
/// deployments).
///
/// Type: Gauge
pub const DISCOVERED_SHARDS: &str = "bucatini_discovered_shards";

/// Registers metric descriptions with the installed recorder.
///
/// Call once at startup, before any tailer runs; exporters like Prometheus
/// surface these as help texts.
pub fn init_metrics() {
    describe_counter!(
        EVENTS_EMITTED_TOTAL,
        "Total oplog entries emitted on tailer output channels"
    );
    describe_counter!(
        CURSOR_REOPENS_TOTAL,
        "Total tailable-cursor opens, including each tailer's initial open"
    );
    describe_counter!(
        CURSOR_TIMEOUTS_TOTAL,
        "Total cursor polls that elapsed without producing a document"
    );
    describe_counter!(
        TAILER_ERRORS_TOTAL,
        "Total non-recoverable tailer failures by category"
    );

    describe_gauge!(
        ACTIVE_TAILERS,
        metrics::Unit::Count,
        "Number of tail tasks currently running"
    );
    describe_gauge!(
        DISCOVERED_SHARDS,
        metrics::Unit::Count,
        "Number of shards found by the last discovery"
    );
}

/// Counts one emitted oplog entry.
pub fn increment_events_emitted(host: &str, operation: &str) {
    counter!(
        EVENTS_EMITTED_TOTAL,
        "host" => host.to_string(),
        "operation" => operation.to_string()
    )
    .increment(1);
}

/// Counts one tailable-cursor open.
pub fn increment_cursor_reopens(host: &str) {
    counter!(CURSOR_REOPENS_TOTAL, "host" => host.to_string()).increment(1);
}

/// Counts one empty cursor poll.
pub fn increment_cursor_timeouts(host: &str) {
    counter!(CURSOR_TIMEOUTS_TOTAL, "host" => host.to_string()).increment(1);
}

/// Counts one non-recoverable tailer failure.
pub fn increment_tailer_errors(host: &str, error_type: &str) {
    counter!(
        TAILER_ERRORS_TOTAL,
        "host" => host.to_string(),
        "error_type" => error_type.to_string()
    )
    .increment(1);
}

/// Records a tail task starting.
pub fn increment_active_tailers() {
    gauge!(ACTIVE_TAILERS).increment(1.0);
}

/// Records a tail task stopping.
pub fn decrement_active_tailers() {
    gauge!(ACTIVE_TAILERS).decrement(1.0);
}

/// Records the shard count of a discovery run.
pub fn set_discovered_shards(count: usize) {
    gauge!(DISCOVERED_SHARDS).set(count as f64);
}

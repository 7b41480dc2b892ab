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

//! Tail every shard of a sharded cluster through its `mongos` router.
//!
//! The coordinator reads `config.shards`, picks one secondary per shard,
//! and this program runs one consumer task per shard stream. Events from
//! different shards interleave arbitrarily; there is no cross-shard
//! ordering to preserve.
//!
//! # Running
//!
//! ```bash
//! MONGO_HOST=mongos.internal MONGO_PORT=27017 START_SPEC=-10 \
//!   cargo run --bin tail_cluster
//! ```
//!
//! `START_SPEC` accepts `now`, or `-<minutes>` to back-fill recent history.

use bson::doc;
use bucatini_core::config::MongoConfig;
use bucatini_core::coordinator::Coordinator;
use bucatini_core::metrics;
use std::error::Error;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    metrics::init_metrics();

    let port = std::env::var("MONGO_PORT")
        .ok()
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(27017);
    let config = MongoConfig::builder()
        .host(std::env::var("MONGO_HOST").unwrap_or_else(|_| "localhost".to_string()))
        .port(port)
        .database(std::env::var("MONGO_DB").unwrap_or_else(|_| "appdb".to_string()))
        .build()?;
    let start_spec = std::env::var("START_SPEC").unwrap_or_else(|_| "now".to_string());

    let mut coordinator = Coordinator::connect(config, doc! {}).await?;
    if !coordinator.is_router() {
        warn!("source is not a mongos; tailing it as a single node");
    }
    for (shard, host) in coordinator.shards() {
        info!(shard = %shard, host = %host, "discovered shard");
    }

    let mut consumers = Vec::new();
    for tailer in coordinator.tailers_mut() {
        let host = tailer.host().to_string();
        let mut events = tailer.start(&start_spec).await?;
        consumers.push(tokio::spawn(async move {
            while let Some(entry) = events.recv().await {
                info!(
                    host = %host,
                    ns = %entry.namespace,
                    op = %entry.operation,
                    ts = ?entry.timestamp,
                    "oplog entry"
                );
            }
        }));
    }

    signal::ctrl_c().await?;
    warn!("interrupt received, stopping");
    coordinator.stop_all().await?;
    for consumer in consumers {
        let _ = consumer.await;
    }
    Ok(())
}

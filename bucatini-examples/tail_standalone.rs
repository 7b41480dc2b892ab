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

//! Tail one mongod's oplog from "now" and log every operation.
//!
//! # Prerequisites
//!
//! Start MongoDB as a single-member replica set (standalone servers keep no
//! oplog):
//! ```bash
//! docker run -d --name mongodb -p 27017:27017 mongo:4.0 --replSet rs0
//! docker exec mongodb mongo --eval "rs.initiate()"
//! ```
//!
//! # Running
//!
//! ```bash
//! MONGO_HOST=localhost cargo run --bin tail_standalone
//! ```
//!
//! Then write something in another terminal and watch it stream:
//! ```bash
//! docker exec mongodb mongo appdb --eval '
//!   db.users.insertOne({name: "Alice"})
//! '
//! ```

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

    let config = MongoConfig::builder()
        .host(std::env::var("MONGO_HOST").unwrap_or_else(|_| "localhost".to_string()))
        .database(std::env::var("MONGO_DB").unwrap_or_else(|_| "appdb".to_string()))
        .build()?;

    let mut coordinator = Coordinator::connect(config, doc! {}).await?;
    info!(
        router = coordinator.is_router(),
        tailers = coordinator.tailers().len(),
        "deployment discovered"
    );

    let mut consumers = Vec::new();
    for tailer in coordinator.tailers_mut() {
        let host = tailer.host().to_string();
        let mut events = tailer.start("now").await?;
        consumers.push(tokio::spawn(async move {
            while let Some(entry) = events.recv().await {
                info!(
                    host = %host,
                    ns = %entry.namespace,
                    op = %entry.operation,
                    ts = ?entry.timestamp,
                    object = ?entry.object,
                    "oplog entry"
                );
            }
            info!(host = %host, "event stream closed");
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

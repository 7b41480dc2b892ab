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

//! Deployment discovery and tailer construction.
//!
//! A [`Coordinator`] turns a connection to a MongoDB deployment into a
//! concrete set of [`Tailer`]s, one per oplog source:
//!
//! 1. **Probe**: `isMaster` against the given session. A `mongos` answers
//!    with `msg: "isdbgrid"`; anything else is a plain `mongod`.
//! 2. **Shard enumeration** (router only): read `config.shards` and, for
//!    every replica-set-backed shard, contact one declared member directly
//!    and pick the member to tail (see [`crate::topology`]).
//! 3. **Construction**: one tailer per shard, or a single tailer at the
//!    configured `host:port`.
//!
//! Tailers come back *unstarted*; the caller starts each with its own start
//! specifier and consumes each output stream independently. The outputs are
//! never merged; cross-shard ordering is the consumer's problem.
//!
//! Discovery failures (unreadable shard metadata, unreachable members) fail
//! construction; no tailers are produced.

use crate::config::MongoConfig;
use crate::driver::{Dialer, MongoDialer, OplogSession};
use crate::metrics;
use crate::tailer::{Tailer, TailerError};
use crate::topology::{self, TopologyError};
use bson::{doc, Document};
use mongodb::error::Error as MongoError;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

/// Literal `msg` value with which a `mongos` answers `isMaster`.
const ROUTER_MSG: &str = "isdbgrid";

/// Errors that fail coordinator construction.
#[derive(Debug, Error)]
pub enum CoordinatorError {
    /// The `isMaster` probe against the source failed.
    #[error("could not probe the deployment")]
    Probe(#[source] MongoError),

    /// `config.shards` could not be read.
    #[error("could not read config.shards")]
    ShardScan(#[source] MongoError),

    /// A shard document was missing a readable `_id` or `host`.
    #[error("could not parse shard document: missing or mistyped {field}")]
    MalformedShard {
        /// The unreadable field.
        field: &'static str,
    },

    /// A shard's compound host string was unusable.
    #[error("unusable shard host")]
    ShardHost(#[from] TopologyError),

    /// A node could not be dialed during discovery.
    #[error("could not dial {host:?} during discovery")]
    Dial {
        /// The node being dialed.
        host: String,
        #[source]
        source: MongoError,
    },

    /// A replica-set member refused the status or configuration queries.
    #[error("could not inspect the replica set via {host:?}")]
    Inspect {
        /// The member being inspected.
        host: String,
        #[source]
        source: MongoError,
    },
}

/// Discovers a deployment and owns one unstarted [`Tailer`] per oplog
/// source.
pub struct Coordinator {
    tailers: Vec<Tailer>,
    shards: HashMap<String, String>,
    is_router: bool,
}

impl std::fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("tailers", &self.tailers.len())
            .field("shards", &self.shards)
            .field("is_router", &self.is_router)
            .finish()
    }
}

impl Coordinator {
    /// Dials the configured entry point with the production driver and runs
    /// discovery against it.
    ///
    /// # Errors
    ///
    /// Fails when the entry point cannot be dialed or discovery fails; see
    /// [`Coordinator::discover`].
    pub async fn connect(
        config: MongoConfig,
        base_query: Document,
    ) -> Result<Self, CoordinatorError> {
        let dialer: Arc<dyn Dialer> = Arc::new(MongoDialer::new());
        let uri = config.connection_string_for(&config.address());
        let session = dialer.dial(&uri).await.map_err(|source| CoordinatorError::Dial {
            host: config.address(),
            source,
        })?;
        Self::discover(dialer, session, config, base_query).await
    }

    /// Probes the given session, enumerates shards when it fronts a sharded
    /// cluster, and constructs one unstarted tailer per oplog source.
    ///
    /// `base_query` is appended to every oplog query each tailer issues;
    /// pass an empty document to tail everything.
    ///
    /// # Errors
    ///
    /// Fails on probe errors, unreadable shard metadata, and unreachable
    /// replica-set members. No tailers are produced on failure.
    #[instrument(skip_all, fields(host = %config.host))]
    pub async fn discover(
        dialer: Arc<dyn Dialer>,
        session: Arc<dyn OplogSession>,
        config: MongoConfig,
        base_query: Document,
    ) -> Result<Self, CoordinatorError> {
        let config = Arc::new(config);
        let is_router = Self::source_is_router(session.as_ref()).await?;
        info!(is_router, "probed deployment");

        let shards = if is_router {
            Self::shard_map(dialer.as_ref(), &config, session.as_ref()).await?
        } else {
            HashMap::new()
        };
        metrics::set_discovered_shards(shards.len());

        let tailers = if is_router {
            shards
                .iter()
                .map(|(shard, host)| {
                    debug!(shard = %shard, host = %host, "creating shard tailer");
                    Tailer::new(
                        Arc::clone(&dialer),
                        Arc::clone(&config),
                        base_query.clone(),
                        host.clone(),
                    )
                })
                .collect()
        } else {
            vec![Tailer::new(
                Arc::clone(&dialer),
                Arc::clone(&config),
                base_query.clone(),
                config.address(),
            )]
        };
        info!(tailers = tailers.len(), "deployment discovered");

        Ok(Self {
            tailers,
            shards,
            is_router,
        })
    }

    /// Whether the probed source is a `mongos` router.
    #[must_use]
    pub fn is_router(&self) -> bool {
        self.is_router
    }

    /// Shard id to selected host. Empty for standalone deployments. A shard
    /// with no eligible member maps to an empty host; its tailer surfaces a
    /// dial error at start.
    #[must_use]
    pub fn shards(&self) -> &HashMap<String, String> {
        &self.shards
    }

    /// The constructed tailers.
    #[must_use]
    pub fn tailers(&self) -> &[Tailer] {
        &self.tailers
    }

    /// Mutable access to the tailers, for starting them.
    pub fn tailers_mut(&mut self) -> &mut [Tailer] {
        &mut self.tailers
    }

    /// Takes ownership of the tailers, dissolving the coordinator.
    #[must_use]
    pub fn into_tailers(self) -> Vec<Tailer> {
        self.tailers
    }

    /// Stops every tailer. All tailers are stopped even when some fail; the
    /// first failure is returned.
    ///
    /// # Errors
    ///
    /// Returns the first error any tail task terminated with.
    pub async fn stop_all(&mut self) -> Result<(), TailerError> {
        let mut first_error = None;
        for tailer in &mut self.tailers {
            if let Err(err) = tailer.stop().await {
                warn!(host = tailer.host(), error = %err, "tailer stopped with an error");
                first_error.get_or_insert(err);
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn source_is_router(session: &dyn OplogSession) -> Result<bool, CoordinatorError> {
        let reply = session
            .run_command("admin", doc! { "isMaster": 1 })
            .await
            .map_err(CoordinatorError::Probe)?;
        Ok(reply.get_str("msg") == Ok(ROUTER_MSG))
    }

    /// Reads `config.shards` and selects the tail target for every
    /// replica-set-backed shard. Shards without a `/` in their host string
    /// have no replica set to select from and are skipped.
    async fn shard_map(
        dialer: &dyn Dialer,
        config: &MongoConfig,
        session: &dyn OplogSession,
    ) -> Result<HashMap<String, String>, CoordinatorError> {
        let mut shards = HashMap::new();
        let documents = session
            .find_all("config", "shards", Document::new())
            .await
            .map_err(CoordinatorError::ShardScan)?;

        for document in documents {
            let host = document
                .get_str("host")
                .map_err(|_| CoordinatorError::MalformedShard { field: "host" })?
                .to_string();
            if !host.contains('/') {
                debug!(host = %host, "skipping shard without a replica set");
                continue;
            }
            let shard = document
                .get_str("_id")
                .map_err(|_| CoordinatorError::MalformedShard { field: "_id" })?
                .to_string();

            match Self::tail_target_for_shard(dialer, config, &host).await? {
                Some(target) => {
                    info!(shard = %shard, host = %target, "selected tail target");
                    shards.insert(shard, target);
                }
                None => {
                    warn!(shard = %shard, "no eligible member to tail");
                    shards.insert(shard, String::new());
                }
            }
        }
        Ok(shards)
    }

    /// Picks the member to tail for one shard: dial the second declared
    /// seed (the first is commonly the primary) and let the member states
    /// decide.
    async fn tail_target_for_shard(
        dialer: &dyn Dialer,
        config: &MongoConfig,
        compound_host: &str,
    ) -> Result<Option<String>, CoordinatorError> {
        let seed = topology::seed_from_compound_host(compound_host)?;
        let uri = config.connection_string_for(seed);
        let node = dialer.dial(&uri).await.map_err(|source| CoordinatorError::Dial {
            host: seed.to_string(),
            source,
        })?;

        let status = node
            .run_command("admin", doc! { "replSetGetStatus": 1 })
            .await
            .map_err(|source| CoordinatorError::Inspect {
                host: seed.to_string(),
                source,
            })?;
        // A missing replset declaration reads as an empty member list, which
        // selects nothing.
        let replset_config = node
            .find_all("local", "system.replset", Document::new())
            .await
            .map_err(|source| CoordinatorError::Inspect {
                host: seed.to_string(),
                source,
            })?
            .into_iter()
            .next()
            .unwrap_or_default();

        let members = topology::member_views(&status, &replset_config);
        Ok(topology::select_tail_member(&members))
    }
}

//! Bucatini Core - MongoDB Oplog Tailing
//!
//! This crate turns a MongoDB deployment into a set of live oplog streams.
//! Point it at a single `mongod` and you get one stream; point it at a
//! `mongos` router and the [`coordinator::Coordinator`] discovers every
//! shard, picks one secondary per shard, and hands out one
//! [`tailer::Tailer`] per oplog source. Each tailer survives cursor expiry
//! without re-emitting entries it has already delivered.
//!
//! # Key Components
//!
//! - **Coordinator**: [`coordinator`] probes the deployment and constructs
//!   the tailers
//! - **Tailer**: [`tailer`] streams [`oplog::OplogDoc`] events from one node
//! - **Driver seam**: [`driver`] abstracts the MongoDB client so the core
//!   stays testable without a live deployment
//!
//! # Example
//!
//! ```rust,no_run
//! use bucatini_core::config::MongoConfig;
//! use bucatini_core::coordinator::Coordinator;
//! use bson::doc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = MongoConfig::builder()
//!     .host("localhost")
//!     .database("appdb")
//!     .build()?;
//!
//! let mut coordinator = Coordinator::connect(config, doc! {}).await?;
//!
//! for tailer in coordinator.tailers_mut() {
//!     let mut events = tailer.start("now").await?;
//!     tokio::spawn(async move {
//!         while let Some(entry) = events.recv().await {
//!             println!("{} {}", entry.namespace, entry.operation);
//!         }
//!     });
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod coordinator;
pub mod driver;
pub mod metrics;
pub mod oplog;
pub mod tailer;
pub mod timestamp;
pub mod topology;

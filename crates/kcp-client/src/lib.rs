//! kcp Cluster Client
//!
//! A thin, logical-cluster aware layer over `kube::Client`. kcp serves every
//! workspace under `<base>/clusters/<name>`, so one REST config can reach
//! any workspace by rewriting its base URL; this crate does that rewriting
//! and exposes exactly the operations the init-agent needs.
//!
//! # Example
//!
//! ```no_run
//! use kcp_client::{ClusterClientFactory, KcpClusterClient};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = kube::Config::infer().await?;
//! let clusters = KcpClusterClient::new(config, "initagent-init");
//!
//! let client = clusters.cluster("root:my-org")?;
//! let template = client.get_init_template("my-template").await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Features
//!
//! - **Cluster retargeting**: per-workspace clients from one base config
//! - **Untyped creation**: create any `DynamicObject` after discovery,
//!   reporting unknown kinds separately from other failures
//! - **Mocking**: an in-memory implementation behind the `test-util` feature

pub mod client;
pub mod error;
pub mod rest;
#[path = "trait.rs"]
pub mod kcp_trait;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;

pub use client::{KcpClient, KcpClusterClient};
pub use error::KcpError;
pub use kcp_trait::{ClusterClientFactory, KcpClientTrait};
#[cfg(any(test, feature = "test-util"))]
pub use mock::{MockKcpClient, RecordedEvent};

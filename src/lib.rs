//! Flowplane Control Plane
//!
//! This crate provides the control plane for deployable stream pipelines.
//! It enforces the stream lifecycle state machine, maintains an append-only
//! release history per stream, and delegates the actual rollout of a
//! release to an external deploy backend.
//!
//! # Architecture
//!
//! The control plane is responsible for:
//!
//! - **Stream registry**: Mapping stream names to pipeline definitions and
//!   answering paged listings in stable insertion order
//! - **Lifecycle enforcement**: Serialising deploy, undeploy, update and
//!   rollback commands per stream and validating their preconditions
//! - **Release history**: Recording an immutable, versioned snapshot for
//!   every successful deploy, update and rollback
//! - **API surface**: Providing HTTP endpoints for the operations above,
//!   plus health and metrics
//!
//! # State Machine
//!
//! Each stream's deployment follows a strict state machine enforced at
//! compile time using the typestate pattern:
//!
//! ```text
//! Undeployed ──▶ Deploying ──▶ Deployed ──▶ Updating
//!                    │           ▲  │  ▲        │
//!                    ▼           │  ▼  └────────┘
//!                  Failed ───────┘ Undeployed
//! ```
//!
//! Deploy moves an undeployed (or failed) stream through deploying to
//! deployed; update moves a deployed stream through updating and either
//! commits a new release or reverts; rollback re-enters deploying towards
//! an earlier release. Invalid transitions are caught at compile time.
//!
//! # Example
//!
//! ```ignore
//! use flowplane::{
//!     state::{Deployment, Undeployed},
//!     types::{DeploymentRecord, StreamName},
//! };
//!
//! let record = DeploymentRecord::new(StreamName::new("ticker")?);
//! let undeployed = Deployment::<Undeployed>::create(record);
//!
//! // State transitions are type-safe
//! let deploying = undeployed.begin_deploy(Default::default());
//! let deployed = deploying.complete(1);
//!
//! // This would not compile:
//! // let invalid = deployed.complete(2); // Error!
//! ```

#![forbid(unsafe_code)]

pub mod api;
pub mod backend;
pub mod client;
pub mod config;
pub mod deployment;
pub mod error;
pub mod history;
pub mod manifest;
pub mod registry;
pub mod service;
pub mod state;
pub mod store;
pub mod types;

// Re-export commonly used types at the crate root
pub use backend::{BackendRequest, DeployBackend, MockBackend, RemoteBackend};
pub use client::StreamClient;
pub use config::FlowConfig;
pub use deployment::DeploymentController;
pub use error::{FlowError, FlowResult};
pub use history::ReleaseHistory;
pub use registry::StreamRegistry;
pub use service::FlowService;
pub use state::{AnyDeployment, Deployed, Deploying, Deployment, Failed, Undeployed, Updating};
pub use store::{FlowStore, MemoryStore, PostgresStore};
pub use types::{
    BatchReport, DeploymentRecord, DeploymentStatus, PackageIdentifier, Release, StreamDefinition,
    StreamName,
};

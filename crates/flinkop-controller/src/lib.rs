// Allow unused assignments for diagnostic fields - they're used by the thiserror/miette macros
#![allow(unused_assignments)]

//! Reconciliation engine for FlinkCluster resources.
//!
//! Each pass observes a cluster and its children through a [`StateGateway`],
//! converts the spec into the resources it should have, applies the
//! difference and records the outcome in the cluster's status.

pub mod api_client;
pub mod controller;
pub mod converter;
pub mod diff;
pub mod error;
pub mod gateway;
pub mod manager_api;
pub mod mock;
pub mod observer;
pub mod prober;
pub mod reconciler;
pub mod state_machine;
pub mod status;

// Re-export primary types
pub use error::{ControllerError, Result};
pub use gateway::{DeletePropagation, StateGateway, TypedGateway};
pub use mock::{MockGateway, MockJobManager};

// Re-export controller types
pub use api_client::{ApiClient, GatewayConfig};
pub use controller::{ClusterController, ControllerConfig};
pub use converter::{desired_state, DesiredClusterState};
pub use manager_api::{FlinkRestClient, JobManagerApi, JobManagerEndpoint};
pub use observer::{ClusterObserver, ObservedClusterState};
pub use prober::{JobStatusProber, SavepointTaker};
pub use reconciler::{ClusterReconciler, PassOutcome};
pub use state_machine::{ClusterEvent, PassFacts};

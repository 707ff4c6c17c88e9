// Allow unused assignments for diagnostic fields - they're used by the thiserror/miette macros
#![allow(unused_assignments)]

pub mod api_client;
pub mod command;
pub mod config;
pub mod error;
pub mod mock;
pub mod nodeport;
pub mod nodes;
pub mod probes;
pub mod scenario;
pub mod traits;
pub mod verifier;

// Re-export primary types
pub use error::{Result, VerifierError};
pub use traits::{
    ClusterClient, ExecTarget, LoadBalancerRef, RemoteExec, Sleeper, TokioSleeper,
    LOAD_BALANCER_CLEANUP_FINALIZER,
};
pub use verifier::{check_status, ReachabilityVerifier};

pub use api_client::ApiClient;
pub use command::{CommandOutput, KubectlExec};
pub use config::{
    DiagnosticTarget, ProbeTimeout, VerifierConfig, WorkloadTemplate, DEFAULT_NODE_PORT_RANGE,
    DEFAULT_WORKLOAD_IMAGE,
};
pub use mock::{MockCluster, MockExec, RecordingSleeper};
pub use nodeport::{run_nodeport_scenario, NodePortReport, ProbeMode, ScenarioConfig};
pub use nodes::{pick_node_address, NodeTarget};
pub use probes::{ListenPoll, ListenProber, ListenState};
pub use scenario::{
    load_balancer_name, load_balancer_name_for_uid, FailureHook, ResourceTracker, Scenario,
    ScenarioContext, TrackedResource,
};

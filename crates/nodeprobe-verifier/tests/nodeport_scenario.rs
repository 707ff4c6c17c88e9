//! NodePort reachability scenario end to end against MockCluster, with a
//! local HTTP backend standing in for the node port

use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use nodeprobe_core::{service_from_spec, ExposureSpec, ExposureType, NodeOs};
use nodeprobe_verifier::{
    run_nodeport_scenario, ClusterClient, CommandOutput, MockCluster, MockExec, ProbeMode,
    ReachabilityVerifier, RecordingSleeper, ScenarioConfig, VerifierError,
};
use std::sync::Arc;
use tokio::net::TcpListener;

struct Env {
    cluster: MockCluster,
    exec: MockExec,
    sleeper: RecordingSleeper,
    verifier: Arc<ReachabilityVerifier>,
    config: ScenarioConfig,
}

async fn backend(status: StatusCode) -> u16 {
    let app = Router::new().route("/", get(move || async move { (status, "hostname") }));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    port
}

/// A port nothing listens on
async fn dead_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    port
}

fn ss_listing(port: u16) -> CommandOutput {
    CommandOutput::success(format!(
        "State  Recv-Q Send-Q Local Address:Port Peer Address:Port\nLISTEN 0 4096 0.0.0.0:{} 0.0.0.0:*\n",
        port
    ))
}

async fn env(node_port: u16, os: NodeOs, tweak: impl FnOnce(&mut ScenarioConfig)) -> Env {
    let cluster = MockCluster::with_node_port_range(node_port..=node_port);
    cluster.add_node("node-1", os, "127.0.0.1", None).await;
    cluster.set_pending_polls(2).await;

    let mut config = ScenarioConfig {
        namespace: "e2e".to_string(),
        node_os: Some(os),
        probe_timeout_secs: 5,
        listen_attempts: 4,
        node_port_range_start: node_port,
        node_port_range_end: node_port,
        ..Default::default()
    };
    tweak(&mut config);

    let exec = MockExec::new();
    let sleeper = RecordingSleeper::new();
    let verifier = ReachabilityVerifier::new(
        Arc::new(cluster.clone()),
        Arc::new(exec.clone()),
        config.verifier_config().unwrap(),
    )
    .unwrap()
    .with_sleeper(Arc::new(sleeper.clone()));

    Env {
        cluster,
        exec,
        sleeper,
        verifier: Arc::new(verifier),
        config,
    }
}

async fn assert_all_released(cluster: &MockCluster) {
    assert_eq!(cluster.service_count().await, 0, "services left behind");
    assert_eq!(cluster.pod_count().await, 0, "pods left behind");
}

#[tokio::test]
async fn test_direct_probe_and_listen_check_pass() {
    let port = backend(StatusCode::OK).await;
    let env = env(port, NodeOs::Linux, |_| {}).await;
    env.exec.respond("ss -ltn", ss_listing(port));

    let report = run_nodeport_scenario(env.verifier.clone(), &env.config)
        .await
        .unwrap();

    assert_eq!(report.node_name, "node-1");
    assert_eq!(report.node_address, "127.0.0.1");
    assert_eq!(report.node_port, port);
    assert_eq!(report.exposure.exposure_type, ExposureType::NodePort);
    assert_eq!(report.http.status_code, Some(200));
    let listen = report.listen.unwrap();
    assert_eq!(listen.listening, Some(true));
    assert_eq!(listen.attempts, 1);

    // Listen state was read from a pod on the probed node
    let executed = env.exec.executed();
    assert_eq!(executed.len(), 1);
    assert_eq!(executed[0].0.pod, "nodeport-test-diag");

    assert_all_released(&env.cluster).await;
}

#[tokio::test]
async fn test_in_cluster_probe_on_windows() {
    let env = env(30080, NodeOs::Windows, |c| c.probe_mode = ProbeMode::InCluster).await;
    env.exec.respond("curl.exe", CommandOutput::success("200"));
    env.exec.respond(
        "netstat",
        CommandOutput::success(
            "  TCP    0.0.0.0:30080          0.0.0.0:0              LISTENING\r\n",
        ),
    );

    let report = run_nodeport_scenario(env.verifier.clone(), &env.config)
        .await
        .unwrap();
    assert_eq!(report.http.status_code, Some(200));
    assert_eq!(report.node_port, 30080);

    let executed = env.exec.executed();
    let (client, curl) = &executed[0];
    assert_eq!(client.pod, "nanotest");
    assert!(curl[2].contains("http://127.0.0.1:30080/"));
    assert!(executed[1].1[2].contains("netstat"));

    assert_all_released(&env.cluster).await;
}

#[tokio::test]
async fn test_wrong_status_is_assertion_failure() {
    let port = backend(StatusCode::SERVICE_UNAVAILABLE).await;
    let env = env(port, NodeOs::Linux, |_| {}).await;

    let err = run_nodeport_scenario(env.verifier.clone(), &env.config)
        .await
        .unwrap_err();

    assert!(matches!(
        err.root(),
        VerifierError::ProbeAssertionFailed { .. }
    ));
    match &err {
        VerifierError::ScenarioFailed { diagnostics, .. } => {
            assert!(diagnostics.contains("name: nodeport-test"));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_all_released(&env.cluster).await;
}

#[tokio::test]
async fn test_unreachable_node_port_is_connection_failure() {
    let port = dead_port().await;
    let env = env(port, NodeOs::Linux, |_| {}).await;

    let err = run_nodeport_scenario(env.verifier.clone(), &env.config)
        .await
        .unwrap_err();

    assert!(matches!(
        err.root(),
        VerifierError::ProbeConnectionFailed { .. }
    ));
    assert_all_released(&env.cluster).await;
}

#[tokio::test]
async fn test_port_never_listening_times_out() {
    let port = backend(StatusCode::OK).await;
    let env = env(port, NodeOs::Linux, |_| {}).await;

    let err = run_nodeport_scenario(env.verifier.clone(), &env.config)
        .await
        .unwrap_err();

    assert!(matches!(
        err.root(),
        VerifierError::ListenStateTimeout { attempts: 4, .. }
    ));
    assert_eq!(env.exec.executed().len(), 4);
    // Two workload waits of two pending polls each, then three listen intervals
    assert_eq!(env.sleeper.sleeps().len(), 7);
    assert_all_released(&env.cluster).await;
}

#[tokio::test]
async fn test_existing_diagnostic_pod_is_used() {
    let port = backend(StatusCode::OK).await;
    let env = env(port, NodeOs::Linux, |c| {
        c.diagnostic_pod = Some("hostdiag".to_string())
    })
    .await;
    env.exec.respond("ss -ltn", ss_listing(port));

    run_nodeport_scenario(env.verifier.clone(), &env.config)
        .await
        .unwrap();

    let executed = env.exec.executed();
    assert_eq!(executed.len(), 1);
    assert_eq!(executed[0].0.pod, "hostdiag");
    assert_all_released(&env.cluster).await;
}

#[tokio::test]
async fn test_listen_check_can_be_skipped() {
    let port = backend(StatusCode::OK).await;
    let env = env(port, NodeOs::Linux, |c| c.listen_check = false).await;

    let report = run_nodeport_scenario(env.verifier.clone(), &env.config)
        .await
        .unwrap();
    assert!(report.listen.is_none());
    assert!(env.exec.executed().is_empty());
}

#[tokio::test]
async fn test_duplicate_exposure_fails_and_leaves_existing_service() {
    let port = backend(StatusCode::OK).await;
    let env = env(port, NodeOs::Linux, |_| {}).await;

    // Someone else's service already holds the name
    let existing = ExposureSpec::tcp("e2e", "nodeport-test", 80, 9376);
    env.cluster
        .create_service(&service_from_spec(&existing))
        .await
        .unwrap();

    let err = run_nodeport_scenario(env.verifier.clone(), &env.config)
        .await
        .unwrap_err();

    assert!(matches!(
        err.root(),
        VerifierError::ExposureCreationFailed { .. }
    ));
    assert!(env.cluster.has_service("e2e", "nodeport-test").await);
    assert_eq!(env.cluster.pod_count().await, 0);
}

#[tokio::test]
async fn test_unpullable_workload_fails_without_retry() {
    let port = backend(StatusCode::OK).await;
    let env = env(port, NodeOs::Linux, |c| {
        c.workload_image = "registry.invalid/missing:1".to_string()
    })
    .await;
    env.cluster
        .mark_image_unpullable("registry.invalid/missing:1")
        .await;

    let err = run_nodeport_scenario(env.verifier.clone(), &env.config)
        .await
        .unwrap_err();

    assert!(matches!(
        err.root(),
        VerifierError::WorkloadSchedulingFailed { .. }
    ));
    assert!(env.sleeper.sleeps().is_empty());
    assert_all_released(&env.cluster).await;
}

#[tokio::test]
async fn test_no_ready_node_of_requested_os() {
    let port = backend(StatusCode::OK).await;
    let env = env(port, NodeOs::Linux, |_| {}).await;
    let windows_config = ScenarioConfig {
        node_os: Some(NodeOs::Windows),
        ..env.config.clone()
    };
    let verifier = ReachabilityVerifier::new(
        Arc::new(env.cluster.clone()),
        Arc::new(env.exec.clone()),
        windows_config.verifier_config().unwrap(),
    )
    .unwrap();

    let err = run_nodeport_scenario(Arc::new(verifier), &windows_config)
        .await
        .unwrap_err();
    assert!(matches!(err.root(), VerifierError::NoNodeAddress { .. }));
    assert_all_released(&env.cluster).await;
}

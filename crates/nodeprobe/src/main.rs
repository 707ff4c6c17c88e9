mod settings;

use clap::{Args, Parser, Subcommand};
use nodeprobe_core::NodeOs;
use nodeprobe_verifier::{
    run_nodeport_scenario, ApiClient, KubectlExec, ReachabilityVerifier, ScenarioConfig,
};
use settings::{apply_overrides, load_scenario_config, Overrides};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Allowance for kubectl start-up and the API round trip on top of the probe timeout
const EXEC_GRACE: Duration = Duration::from_secs(15);

#[derive(Parser)]
#[command(
    name = "nodeprobe",
    about = "Verify that NodePort services are reachable on node addresses"
)]
struct Cli {
    /// Emit logs as JSON lines
    #[arg(long, global = true, env = "NODEPROBE_LOG_JSON")]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the NodePort reachability scenario and print a JSON report
    Run {
        #[command(flatten)]
        cluster: ClusterArgs,
        #[command(flatten)]
        scenario: ScenarioArgs,
    },
    /// Print the effective scenario configuration as YAML
    Config {
        #[command(flatten)]
        scenario: ScenarioArgs,
    },
}

#[derive(Args)]
struct ClusterArgs {
    /// API server URL, e.g. the address of `kubectl proxy`
    #[arg(long, env = "NODEPROBE_API_URL", default_value = "http://127.0.0.1:8001")]
    api_url: String,
    /// Bearer token for the API server
    #[arg(long, env = "NODEPROBE_TOKEN", hide_env_values = true)]
    token: Option<String>,
    /// kubectl binary used for exec
    #[arg(long, env = "NODEPROBE_KUBECTL", default_value = "kubectl")]
    kubectl: String,
    #[arg(long)]
    kubeconfig: Option<String>,
    #[arg(long)]
    context: Option<String>,
}

#[derive(Args)]
struct ScenarioArgs {
    /// Scenario config YAML
    #[arg(long, env = "NODEPROBE_CONFIG")]
    config: Option<PathBuf>,
    #[arg(long)]
    namespace: Option<String>,
    #[arg(long)]
    service_name: Option<String>,
    /// Only use nodes of this OS (linux or windows)
    #[arg(long)]
    node_os: Option<NodeOs>,
    /// Probe with curl from a client pod instead of from this host
    #[arg(long)]
    in_cluster: bool,
    #[arg(long, allow_negative_numbers = true)]
    probe_timeout_secs: Option<i64>,
    /// Existing pod on the probed node to read socket listings from
    #[arg(long)]
    diagnostic_pod: Option<String>,
    #[arg(long)]
    skip_listen_check: bool,
    /// Abandon the scenario and tear down after this many seconds (0 = never)
    #[arg(long, env = "NODEPROBE_DEADLINE_SECS")]
    deadline_secs: Option<u64>,
}

impl ScenarioArgs {
    fn resolve(&self) -> miette::Result<ScenarioConfig> {
        let config = load_scenario_config(self.config.as_deref())?;
        Ok(apply_overrides(
            config,
            &Overrides {
                namespace: self.namespace.clone(),
                service_name: self.service_name.clone(),
                node_os: self.node_os,
                in_cluster: self.in_cluster,
                probe_timeout_secs: self.probe_timeout_secs,
                diagnostic_pod: self.diagnostic_pod.clone(),
                skip_listen_check: self.skip_listen_check,
                deadline_secs: self.deadline_secs,
            },
        ))
    }
}

#[tokio::main]
async fn main() -> miette::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    match cli.command {
        Commands::Run { cluster, scenario } => run(cluster, scenario).await,
        Commands::Config { scenario } => show_config(scenario),
    }
}

/// Logs go to stderr so the report on stdout stays machine readable
fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn run(cluster: ClusterArgs, scenario: ScenarioArgs) -> miette::Result<()> {
    let config = scenario.resolve()?;
    let verifier_config = config.verifier_config()?;

    info!(
        "Verifying NodePort reachability via {} in namespace {}",
        cluster.api_url, config.namespace
    );

    let mut client = ApiClient::new(&cluster.api_url);
    if let Some(token) = cluster.token {
        client = client.with_token(token);
    }

    let mut exec = KubectlExec::new()
        .with_binary(cluster.kubectl)
        .with_timeout(verifier_config.probe_timeout.as_duration() + EXEC_GRACE);
    if let Some(kubeconfig) = cluster.kubeconfig {
        exec = exec.with_kubeconfig(kubeconfig);
    }
    if let Some(context) = cluster.context {
        exec = exec.with_context(context);
    }

    let verifier = ReachabilityVerifier::new(Arc::new(client), Arc::new(exec), verifier_config)?;
    let report = run_nodeport_scenario(Arc::new(verifier), &config).await?;

    println!("{}", nodeprobe_core::to_json_pretty(&report)?);
    info!(
        "NodePort {} on {} ({}) is reachable",
        report.node_port, report.node_name, report.node_address
    );
    Ok(())
}

fn show_config(scenario: ScenarioArgs) -> miette::Result<()> {
    let config = scenario.resolve()?;
    config.verifier_config()?;
    print!("{}", nodeprobe_core::to_yaml(&config)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use nodeprobe_verifier::ProbeMode;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_run_flags_override_defaults() {
        let cli = Cli::try_parse_from([
            "nodeprobe",
            "run",
            "--api-url",
            "http://10.0.0.1:6443",
            "--namespace",
            "e2e",
            "--node-os",
            "windows",
            "--in-cluster",
            "--probe-timeout-secs",
            "10",
        ])
        .unwrap();

        let Commands::Run { cluster, scenario } = cli.command else {
            panic!("expected run subcommand");
        };
        assert_eq!(cluster.api_url, "http://10.0.0.1:6443");

        let config = scenario.resolve().unwrap();
        assert_eq!(config.namespace, "e2e");
        assert_eq!(config.node_os, Some(NodeOs::Windows));
        assert_eq!(config.probe_mode, ProbeMode::InCluster);
        assert_eq!(config.probe_timeout_secs, 10);
    }

    #[test]
    fn test_negative_timeout_parses_but_is_rejected() {
        let cli =
            Cli::try_parse_from(["nodeprobe", "config", "--probe-timeout-secs", "-3"]).unwrap();
        let Commands::Config { scenario } = cli.command else {
            panic!("expected config subcommand");
        };

        let config = scenario.resolve().unwrap();
        assert!(config.verifier_config().is_err());
    }

    #[test]
    fn test_unknown_node_os_rejected() {
        assert!(Cli::try_parse_from(["nodeprobe", "run", "--node-os", "plan9"]).is_err());
    }
}

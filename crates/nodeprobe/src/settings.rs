use miette::{IntoDiagnostic, WrapErr};
use nodeprobe_core::NodeOs;
use nodeprobe_verifier::{ProbeMode, ScenarioConfig};
use std::path::Path;

/// Command-line values that take precedence over the config file
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub namespace: Option<String>,
    pub service_name: Option<String>,
    pub node_os: Option<NodeOs>,
    pub in_cluster: bool,
    pub probe_timeout_secs: Option<i64>,
    pub diagnostic_pod: Option<String>,
    pub skip_listen_check: bool,
    pub deadline_secs: Option<u64>,
}

/// Read a scenario config from YAML, or use the defaults when no file is given.
/// Keys missing from the file keep their default values.
pub fn load_scenario_config(path: Option<&Path>) -> miette::Result<ScenarioConfig> {
    let Some(path) = path else {
        return Ok(ScenarioConfig::default());
    };

    let data = std::fs::read_to_string(path)
        .into_diagnostic()
        .wrap_err_with(|| format!("Failed to read scenario config {}", path.display()))?;

    nodeprobe_core::from_yaml(&data)
        .wrap_err_with(|| format!("Invalid scenario config {}", path.display()))
}

pub fn apply_overrides(mut config: ScenarioConfig, overrides: &Overrides) -> ScenarioConfig {
    if let Some(namespace) = &overrides.namespace {
        config.namespace = namespace.clone();
    }
    if let Some(name) = &overrides.service_name {
        config.service_name = name.clone();
    }
    if let Some(os) = overrides.node_os {
        config.node_os = Some(os);
    }
    if overrides.in_cluster {
        config.probe_mode = ProbeMode::InCluster;
    }
    if let Some(secs) = overrides.probe_timeout_secs {
        config.probe_timeout_secs = secs;
    }
    if let Some(pod) = &overrides.diagnostic_pod {
        config.diagnostic_pod = Some(pod.clone());
    }
    if overrides.skip_listen_check {
        config.listen_check = false;
    }
    if let Some(secs) = overrides.deadline_secs {
        config.deadline_secs = secs;
    }
    config
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_config(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_no_file_uses_defaults() {
        let config = load_scenario_config(None).unwrap();
        assert_eq!(config, ScenarioConfig::default());
    }

    #[test]
    fn test_load_yaml_file() {
        let file = write_config(
            "namespace: e2e-nodeport\nnodeOs: windows\nprobeMode: in-cluster\nlistenAttempts: 20\nregion: us-east1\n",
        );

        let config = load_scenario_config(Some(file.path())).unwrap();
        assert_eq!(config.namespace, "e2e-nodeport");
        assert_eq!(config.node_os, Some(NodeOs::Windows));
        assert_eq!(config.probe_mode, ProbeMode::InCluster);
        assert_eq!(config.listen_attempts, 20);
        assert_eq!(config.region.as_deref(), Some("us-east1"));
        assert_eq!(config.target_port, 9376);
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.yaml");

        let err = load_scenario_config(Some(&path)).unwrap_err();
        assert!(err.to_string().contains("Failed to read scenario config"));
    }

    #[test]
    fn test_malformed_yaml_is_an_error() {
        let file = write_config("listenAttempts: [not, a, number]\n");
        let err = load_scenario_config(Some(file.path())).unwrap_err();
        assert!(err.to_string().contains("Invalid scenario config"));
    }

    #[test]
    fn test_overrides_win_over_file() {
        let file = write_config("namespace: from-file\nlistenCheck: true\nprobeTimeoutSecs: 30\n");
        let config = load_scenario_config(Some(file.path())).unwrap();

        let overrides = Overrides {
            namespace: Some("from-flag".to_string()),
            probe_timeout_secs: Some(5),
            skip_listen_check: true,
            deadline_secs: Some(0),
            ..Default::default()
        };
        let config = apply_overrides(config, &overrides);

        assert_eq!(config.namespace, "from-flag");
        assert_eq!(config.probe_timeout_secs, 5);
        assert!(!config.listen_check);
        assert_eq!(config.deadline_secs, 0);
        assert_eq!(config.probe_mode, ProbeMode::Direct);
    }
}

use crate::error::{Result, VerifierError};
use crate::traits::{ExecTarget, RemoteExec};
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, warn};

/// Output from a command execution
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl CommandOutput {
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: String::new(),
            exit_code: 0,
        }
    }

    pub fn failure(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            stdout: String::new(),
            stderr: stderr.into(),
            exit_code,
        }
    }
}

/// Execute a command and return output regardless of exit code
pub async fn exec_unchecked(program: &str, args: &[&str]) -> Result<CommandOutput> {
    debug!("Executing: {} {}", program, args.join(" "));

    let output = tokio::process::Command::new(program)
        .args(args)
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| {
            VerifierError::command_failed(
                format!("{} {}", program, args.join(" ")),
                -1,
                e.to_string(),
            )
        })?;

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let exit_code = output.status.code().unwrap_or(-1);

    debug!(
        "Command exited with code {}: {} {}",
        exit_code,
        program,
        args.join(" ")
    );

    Ok(CommandOutput {
        stdout,
        stderr,
        exit_code,
    })
}

/// Like `exec_unchecked`, but gives up after `limit` and kills the process
pub async fn exec_with_timeout(
    program: &str,
    args: &[&str],
    limit: Duration,
) -> Result<CommandOutput> {
    match tokio::time::timeout(limit, exec_unchecked(program, args)).await {
        Ok(result) => result,
        Err(_) => {
            warn!("Command timed out after {:?}: {} {}", limit, program, args.join(" "));
            Err(VerifierError::command_failed(
                format!("{} {}", program, args.join(" ")),
                -1,
                format!("timed out after {:?}", limit),
            ))
        }
    }
}

/// `RemoteExec` over `kubectl exec`
#[derive(Debug, Clone)]
pub struct KubectlExec {
    kubectl: String,
    kubeconfig: Option<String>,
    context: Option<String>,
    timeout: Option<Duration>,
}

impl KubectlExec {
    pub fn new() -> Self {
        Self {
            kubectl: "kubectl".to_string(),
            kubeconfig: None,
            context: None,
            timeout: None,
        }
    }

    /// Bound every exec call; a hung command is killed and reported as failed
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Use a specific kubectl binary
    pub fn with_binary(mut self, path: impl Into<String>) -> Self {
        self.kubectl = path.into();
        self
    }

    pub fn with_kubeconfig(mut self, path: impl Into<String>) -> Self {
        self.kubeconfig = Some(path.into());
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    /// Arguments passed to kubectl for one exec call
    pub fn build_args(&self, target: &ExecTarget, command: &[String]) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(kubeconfig) = &self.kubeconfig {
            args.push(format!("--kubeconfig={}", kubeconfig));
        }
        if let Some(context) = &self.context {
            args.push(format!("--context={}", context));
        }
        args.extend([
            "exec".to_string(),
            "-n".to_string(),
            target.namespace.clone(),
            target.pod.clone(),
            "-c".to_string(),
            target.container.clone(),
            "--".to_string(),
        ]);
        args.extend(command.iter().cloned());
        args
    }
}

impl Default for KubectlExec {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteExec for KubectlExec {
    async fn exec(&self, target: &ExecTarget, command: &[String]) -> Result<CommandOutput> {
        let args = self.build_args(target, command);
        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        match self.timeout {
            Some(limit) => exec_with_timeout(&self.kubectl, &arg_refs, limit).await,
            None => exec_unchecked(&self.kubectl, &arg_refs).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kubectl_args() {
        let kubectl = KubectlExec::new().with_context("win-cluster");
        let target = ExecTarget::new("e2e", "nanotest", "nanotest");
        let args = kubectl.build_args(
            &target,
            &["cmd".to_string(), "/c".to_string(), "netstat -a -n".to_string()],
        );

        assert_eq!(
            args,
            vec![
                "--context=win-cluster",
                "exec",
                "-n",
                "e2e",
                "nanotest",
                "-c",
                "nanotest",
                "--",
                "cmd",
                "/c",
                "netstat -a -n",
            ]
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_exec_unchecked_captures_exit_code() {
        let output = exec_unchecked("sh", &["-c", "echo out; echo err >&2; exit 3"])
            .await
            .unwrap();
        assert_eq!(output.stdout.trim(), "out");
        assert_eq!(output.stderr.trim(), "err");
        assert_eq!(output.exit_code, 3);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_exec_with_timeout_kills_hung_command() {
        let start = std::time::Instant::now();
        let err = exec_with_timeout("sleep", &["30"], Duration::from_millis(200))
            .await
            .unwrap_err();

        assert!(matches!(err, VerifierError::CommandFailed { exit_code: -1, .. }));
        assert!(err.to_string().contains("sleep 30"));
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_exec_with_timeout_returns_fast_output() {
        let output = exec_with_timeout("sh", &["-c", "echo ok"], Duration::from_secs(10))
            .await
            .unwrap();
        assert_eq!(output.stdout.trim(), "ok");
    }

    #[tokio::test]
    async fn test_missing_program_is_command_failure() {
        let err = exec_unchecked("definitely-not-a-real-binary-nodeprobe", &[])
            .await
            .unwrap_err();
        assert!(matches!(err, VerifierError::CommandFailed { exit_code: -1, .. }));
    }
}

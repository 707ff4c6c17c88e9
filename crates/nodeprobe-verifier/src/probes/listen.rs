use crate::traits::{ExecTarget, RemoteExec, Sleeper};
use nodeprobe_core::NodeOs;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Progress of a listen-state poll
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenState {
    /// No positive observation yet, attempts remain
    Pending,
    /// The port was observed listening
    Confirmed,
    /// Every attempt came back negative
    Exhausted,
}

impl std::fmt::Display for ListenState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ListenState::Pending => write!(f, "pending"),
            ListenState::Confirmed => write!(f, "confirmed"),
            ListenState::Exhausted => write!(f, "exhausted"),
        }
    }
}

/// Final state of a poll and what it took to get there
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenPoll {
    pub state: ListenState,
    pub attempts: u32,
    pub elapsed: Duration,
}

/// Socket listing command for the node OS
pub fn listen_command(os: NodeOs) -> Vec<String> {
    match os {
        NodeOs::Windows => vec![
            "cmd".to_string(),
            "/c".to_string(),
            // No protocol filter: `-p TCP` would hide TCPv6 listeners
            "netstat -a -n".to_string(),
        ],
        NodeOs::Linux => vec!["ss".to_string(), "-ltn".to_string()],
    }
}

/// Whether a socket listing shows `port` in a listening state.
///
/// Understands both `netstat` (`TCP 0.0.0.0:30080 0.0.0.0:0 LISTENING`) and
/// `ss` (`LISTEN 0 4096 *:30080 *:*`) output.
pub fn is_listening(listing: &str, port: u16) -> bool {
    let wanted = port.to_string();

    listing.lines().any(|line| {
        if !line.to_ascii_uppercase().contains("LISTEN") {
            return false;
        }
        line.split_whitespace().any(|token| {
            token
                .rsplit_once(':')
                .is_some_and(|(_, p)| p == wanted)
        })
    })
}

/// Polls a remote node's socket table until a port is seen listening
pub struct ListenProber<'a> {
    exec: &'a dyn RemoteExec,
    sleeper: &'a dyn Sleeper,
}

impl<'a> ListenProber<'a> {
    pub fn new(exec: &'a dyn RemoteExec, sleeper: &'a dyn Sleeper) -> Self {
        Self { exec, sleeper }
    }

    /// Observe up to `max_attempts` times, sleeping `interval` between
    /// observations. A negative or failed observation is not conclusive;
    /// only running out of attempts is.
    pub async fn poll(
        &self,
        target: &ExecTarget,
        os: NodeOs,
        port: u16,
        max_attempts: u32,
        interval: Duration,
    ) -> ListenPoll {
        let start = Instant::now();
        let command = listen_command(os);
        let mut state = ListenState::Pending;
        let mut attempts = 0;

        while state == ListenState::Pending {
            attempts += 1;

            if self.observe(target, &command, port).await {
                state = ListenState::Confirmed;
            } else if attempts >= max_attempts {
                state = ListenState::Exhausted;
            } else {
                debug!(
                    "Port {} not listening yet on {} (attempt {}/{})",
                    port, target, attempts, max_attempts
                );
                self.sleeper.sleep(interval).await;
            }
        }

        ListenPoll {
            state,
            attempts,
            elapsed: start.elapsed(),
        }
    }

    async fn observe(&self, target: &ExecTarget, command: &[String], port: u16) -> bool {
        match self.exec.exec(target, command).await {
            Ok(output) if output.exit_code == 0 => is_listening(&output.stdout, port),
            Ok(output) => {
                warn!(
                    "Listen-state command exited with code {} in {}: {}",
                    output.exit_code,
                    target,
                    output.stderr.trim()
                );
                false
            }
            Err(e) => {
                warn!("Listen-state command could not run in {}: {}", target, e);
                false
            }
        }
    }
}

use crate::command::CommandOutput;
use crate::config::ProbeTimeout;
use crate::error::{Result, VerifierError};
use nodeprobe_core::{NodeOs, ProbeResult};
use std::time::Instant;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

/// curl exit codes that mean the target could not be reached
const CURL_CONNECTION_EXIT_CODES: &[i32] = &[6, 7, 28, 52, 55, 56];

/// Most response bytes read; the status line and headers fit well within it
const MAX_RESPONSE_HEAD: usize = 16 * 1024;

/// `host:port`, bracketing IPv6 literals
pub fn join_host_port(host: &str, port: u16) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}

/// Issue one `GET path` to `address:port` and report the response status.
///
/// Timeouts, refused and reset connections become `ProbeConnectionFailed`;
/// a response that is not HTTP becomes `ProbeAssertionFailed`. Any status,
/// including errors, is returned as a result for the caller to judge.
pub async fn probe_http(
    address: &str,
    port: u16,
    path: &str,
    timeout: ProbeTimeout,
) -> Result<ProbeResult> {
    let start = Instant::now();
    let limit = timeout.as_duration();

    let status = match tokio::time::timeout(limit, request_status(address, port, path)).await {
        Ok(status) => status?,
        Err(_) => {
            return Err(VerifierError::probe_connection_failed(
                address,
                port,
                format!("no response within {:?}", limit),
            ))
        }
    };

    debug!(
        "GET http://{}{} returned {}",
        join_host_port(address, port),
        path,
        status
    );

    Ok(ProbeResult::http(
        address,
        port,
        status,
        start.elapsed().as_millis() as u64,
    ))
}

async fn request_status(address: &str, port: u16, path: &str) -> Result<u16> {
    let addr = join_host_port(address, port);
    let mut stream = TcpStream::connect(&addr).await.map_err(|e| {
        VerifierError::probe_connection_failed(address, port, format!("connect failed: {}", e))
    })?;

    let request = format!(
        "GET {} HTTP/1.1\r\nHost: {}\r\nUser-Agent: nodeprobe\r\nConnection: close\r\n\r\n",
        path, addr
    );

    stream.write_all(request.as_bytes()).await.map_err(|e| {
        VerifierError::probe_connection_failed(address, port, format!("write failed: {}", e))
    })?;

    let response = read_response_head(&mut stream).await.map_err(|e| {
        VerifierError::probe_connection_failed(address, port, format!("read failed: {}", e))
    })?;

    if response.is_empty() {
        return Err(VerifierError::probe_connection_failed(
            address,
            port,
            "connection closed without a response",
        ));
    }

    let response_str = String::from_utf8_lossy(&response);
    let status_line = response_str.lines().next().unwrap_or_default();

    parse_status_line(status_line).ok_or_else(|| {
        VerifierError::probe_assertion_failed(
            address,
            port,
            "an HTTP status line",
            status_line.chars().take(80).collect::<String>(),
        )
    })
}

/// Read until the end of the response headers, EOF, or `MAX_RESPONSE_HEAD`
/// bytes, whichever comes first. The body is never waited for, so servers
/// that keep the connection open still answer promptly.
async fn read_response_head(stream: &mut TcpStream) -> std::io::Result<Vec<u8>> {
    let mut head = Vec::with_capacity(1024);
    let mut buf = [0u8; 1024];

    while head.len() < MAX_RESPONSE_HEAD {
        let n = stream.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        head.extend_from_slice(&buf[..n]);
        if head.windows(4).any(|w| w == b"\r\n\r\n") {
            break;
        }
    }

    head.truncate(MAX_RESPONSE_HEAD);
    Ok(head)
}

/// Parse the status code out of `HTTP/1.x NNN Reason`
fn parse_status_line(line: &str) -> Option<u16> {
    let mut parts = line.split_whitespace();
    let version = parts.next()?;
    if !version.starts_with("HTTP/") {
        return None;
    }
    parts
        .next()?
        .parse::<u16>()
        .ok()
        .filter(|s| (100..600).contains(s))
}

/// Command that fetches `http://address:port/` from inside a pod and prints only the status code
pub fn curl_command(os: NodeOs, address: &str, port: u16, timeout: ProbeTimeout) -> Vec<String> {
    let url = format!("http://{}/", join_host_port(address, port));
    let max_time = timeout.as_secs_ceil().to_string();

    match os {
        NodeOs::Windows => vec![
            "cmd".to_string(),
            "/c".to_string(),
            format!(
                "curl.exe -s -o NUL -w \"%{{http_code}}\" --max-time {} {}",
                max_time, url
            ),
        ],
        NodeOs::Linux => vec![
            "curl".to_string(),
            "-s".to_string(),
            "-o".to_string(),
            "/dev/null".to_string(),
            "-w".to_string(),
            "%{http_code}".to_string(),
            "--max-time".to_string(),
            max_time,
            url,
        ],
    }
}

/// Interpret the output of `curl_command`
pub fn parse_curl_output(address: &str, port: u16, output: &CommandOutput) -> Result<u16> {
    if CURL_CONNECTION_EXIT_CODES.contains(&output.exit_code) {
        return Err(VerifierError::probe_connection_failed(
            address,
            port,
            format!(
                "curl exited with code {}{}",
                output.exit_code,
                stderr_suffix(&output.stderr)
            ),
        ));
    }

    if output.exit_code != 0 {
        return Err(VerifierError::command_failed(
            format!("curl http://{}/", join_host_port(address, port)),
            output.exit_code,
            output.stderr.trim(),
        ));
    }

    let code = output.stdout.trim().trim_matches('"');
    match code.parse::<u16>() {
        // curl reports 000 when no response arrived
        Ok(0) => Err(VerifierError::probe_connection_failed(
            address,
            port,
            "no HTTP response received",
        )),
        Ok(status) => Ok(status),
        Err(_) => Err(VerifierError::probe_assertion_failed(
            address,
            port,
            "a numeric HTTP status",
            code,
        )),
    }
}

fn stderr_suffix(stderr: &str) -> String {
    let stderr = stderr.trim();
    if stderr.is_empty() {
        String::new()
    } else {
        format!(" (stderr: {})", stderr)
    }
}

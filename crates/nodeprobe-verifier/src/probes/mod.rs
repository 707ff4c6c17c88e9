pub mod http;
pub mod listen;

pub use http::{curl_command, join_host_port, parse_curl_output, probe_http};
pub use listen::{is_listening, listen_command, ListenPoll, ListenProber, ListenState};

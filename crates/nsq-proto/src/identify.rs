//! The `IDENTIFY` command payload and nsqd's response to it.

use serde::{Deserialize, Serialize};

/// Options sent to nsqd as the JSON body of `IDENTIFY`.
///
/// Field names match the wire protocol exactly (snake_case), so this struct
/// serializes directly with no renames.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IdentifyOptions {
    pub client_id: String,
    pub hostname: String,
    pub user_agent: String,
    pub heartbeat_interval: i32,
    pub output_buffer_size: i32,
    pub output_buffer_timeout: i32,
    pub sample_rate: i32,
    pub feature_negotiation: bool,
    pub msg_timeout: i32,
    pub tls_v1: bool,
    /// Advertised but never negotiated: this client does not implement the
    /// snappy stream transform.
    pub snappy: bool,
    /// Advertised but never negotiated: this client does not implement the
    /// deflate stream transform.
    pub deflate: bool,
}

impl Default for IdentifyOptions {
    fn default() -> Self {
        Self {
            client_id: "nsq-client".to_string(),
            hostname: "nsq-client".to_string(),
            user_agent: format!("nsq-client/{}", env!("CARGO_PKG_VERSION")),
            heartbeat_interval: 30_000,
            output_buffer_size: 16_384,
            output_buffer_timeout: 250,
            sample_rate: 0,
            feature_negotiation: true,
            msg_timeout: 60_000,
            tls_v1: false,
            snappy: false,
            deflate: false,
        }
    }
}

/// The JSON body nsqd returns in its `IDENTIFY` response frame when
/// `feature_negotiation` is set. Only the fields this client consults are
/// modeled; unrecognized fields are ignored by serde's default behavior.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IdentifyResponse {
    #[serde(default)]
    pub max_rdy_count: i64,
    #[serde(default)]
    pub max_msg_timeout: i64,
    #[serde(default)]
    pub msg_timeout: i64,
    #[serde(default)]
    pub tls_v1: bool,
    #[serde(default)]
    pub auth_required: bool,
}

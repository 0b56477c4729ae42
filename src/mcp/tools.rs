//! MCP tool parameter schemas for SSH operations.

use rmcp::model::Tool;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::sync::Arc;

/// Parameters for the ssh_connect tool.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SshConnectParams {
    /// The hostname or IP address of the SSH server.
    pub host: String,

    /// The port number of the SSH server (default: 22).
    #[serde(default = "default_port")]
    pub port: u16,

    /// The username to authenticate with.
    pub username: String,

    /// Password for authentication. Leave empty when using a key.
    #[serde(default)]
    pub password: Option<String>,

    /// Path to a private key file on the server running this tool.
    #[serde(default)]
    pub key_path: Option<String>,

    /// Private key content, used when neither password nor keyPath is given.
    #[serde(default)]
    pub private_key: Option<String>,

    /// Connection timeout in seconds (default: 10).
    #[serde(default = "default_connect_timeout")]
    pub timeout: u64,
}

fn default_port() -> u16 {
    22
}

fn default_connect_timeout() -> u64 {
    10
}

/// Parameters for the ssh_execute tool.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SshExecuteParams {
    /// The SSH session identifier.
    pub session_id: String,

    /// The command to execute.
    pub command: String,

    /// Command execution timeout in seconds (default: 30).
    #[serde(default = "default_command_timeout")]
    pub timeout: u64,
}

fn default_command_timeout() -> u64 {
    30
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SessionParams {
    /// The SSH session identifier.
    pub session_id: String,
}

#[derive(Debug, Clone, Default, Deserialize, JsonSchema)]
pub struct NoParams {}

/// Parameters shared by the four transfer tools.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TransferParams {
    /// The SSH session identifier.
    pub session_id: String,

    /// Path to copy from.
    pub source: String,

    /// Path to copy to.
    pub destination: String,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ListDirectoryParams {
    /// The SSH session identifier.
    pub session_id: String,

    /// Remote directory to list.
    pub path: String,
}

/// Convert a schemars schema to the Arc<Map<String, Value>> format expected by rmcp.
fn schema_to_arc_map<T: JsonSchema>() -> Arc<Map<String, Value>> {
    let schema = schemars::schema_for!(T);
    let value = serde_json::to_value(schema).unwrap_or_default();
    if let Value::Object(map) = value {
        Arc::new(map)
    } else {
        Arc::new(Map::new())
    }
}

fn tool<T: JsonSchema>(name: &'static str, description: &'static str) -> Tool {
    Tool {
        name: name.into(),
        description: Some(description.into()),
        input_schema: schema_to_arc_map::<T>(),
        annotations: None,
        output_schema: None,
        meta: None,
        icons: None,
        title: None,
    }
}

/// Every tool this server exposes.
pub fn tool_catalog() -> Vec<Tool> {
    vec![
        tool::<SshConnectParams>("ssh_connect", "Establish an SSH connection"),
        tool::<SshExecuteParams>("ssh_execute", "Execute a command over SSH"),
        tool::<SessionParams>("ssh_disconnect", "Close an SSH connection"),
        tool::<NoParams>("ssh_list_sessions", "List active SSH sessions"),
        tool::<TransferParams>("ssh_upload_file", "Upload a file to the SSH server"),
        tool::<TransferParams>("ssh_download_file", "Download a file from the SSH server"),
        tool::<ListDirectoryParams>(
            "ssh_list_directory",
            "List contents of a directory on the SSH server",
        ),
        tool::<TransferParams>("ssh_upload_directory", "Upload a directory to the SSH server"),
        tool::<TransferParams>(
            "ssh_download_directory",
            "Download a directory from the SSH server",
        ),
    ]
}

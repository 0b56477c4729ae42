//! MCP server implementation for SSH tools.
//!
//! Each tool parses its arguments, runs the operation against the session
//! manager, and renders either a text result or an error result. Uses rmcp
//! 0.12.0 model types for MCP-compliant responses.

use rmcp::model::{CallToolResult, Content, Tool};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::error::{Result, SshError};
use crate::exec;
use crate::listing;
use crate::mcp::tools::{
    tool_catalog, ListDirectoryParams, SessionParams, SshConnectParams, SshExecuteParams,
    TransferParams,
};
use crate::scp;
use crate::security::SecurityGate;
use crate::state::{session_id, SessionManager};
use crate::transport::{Connector, SshAuth, SshConfig};

/// MCP service providing SSH tools.
pub struct McpSshService {
    sessions: Arc<SessionManager>,
    security: Arc<SecurityGate>,
    connector: Arc<dyn Connector>,
}

impl McpSshService {
    pub fn new(
        sessions: Arc<SessionManager>,
        security: Arc<SecurityGate>,
        connector: Arc<dyn Connector>,
    ) -> Self {
        Self {
            sessions,
            security,
            connector,
        }
    }

    /// Get server info for MCP initialization.
    pub fn get_server_info(&self) -> Value {
        json!({
            "name": "ssh-mcp",
            "version": env!("CARGO_PKG_VERSION")
        })
    }

    /// List available tools with their schemas.
    pub fn list_tools(&self) -> Vec<Tool> {
        tool_catalog()
    }

    /// Call a tool by name with the given arguments.
    pub async fn call_tool(&self, name: &str, arguments: Value) -> CallToolResult {
        let (label, outcome) = match name {
            "ssh_connect" => ("Connection error", self.connect(arguments).await),
            "ssh_execute" => ("Command error", self.execute(arguments).await),
            "ssh_disconnect" => ("Disconnect error", self.disconnect(arguments).await),
            "ssh_list_sessions" => ("List sessions error", Ok(self.list_sessions().await)),
            "ssh_upload_file" => ("Upload error", self.upload_file(arguments).await),
            "ssh_download_file" => ("Download error", self.download_file(arguments).await),
            "ssh_list_directory" => ("List directory error", self.list_directory(arguments).await),
            "ssh_upload_directory" => (
                "Directory upload error",
                self.upload_directory(arguments).await,
            ),
            "ssh_download_directory" => (
                "Directory download error",
                self.download_directory(arguments).await,
            ),
            _ => {
                return CallToolResult::error(vec![Content::text(format!(
                    "Unknown tool: {}",
                    name
                ))])
            }
        };

        match outcome {
            Ok(text) => CallToolResult::success(vec![Content::text(text)]),
            Err(e) => {
                warn!(tool = name, "Tool call failed: {}", e);
                let label = if e.is_security() { "Security error" } else { label };
                CallToolResult::error(vec![Content::text(format!("{}: {}", label, e))])
            }
        }
    }

    async fn connect(&self, arguments: Value) -> Result<String> {
        let params: SshConnectParams = parse(arguments)?;
        self.security.check_host(&params.host)?;

        let auth = SshAuth::from_parts(params.password, params.key_path, params.private_key)?;
        let timeout = if params.timeout == 0 {
            Duration::from_secs(10)
        } else {
            Duration::from_secs(params.timeout)
        };
        let connection = self
            .connector
            .dial(SshConfig {
                host: params.host.clone(),
                port: if params.port == 0 { 22 } else { params.port },
                username: params.username.clone(),
                auth,
                timeout,
            })
            .await?;

        let id = session_id(&params.host, &params.username, self.sessions.now());
        let session = self
            .sessions
            .add_session(id, connection, &params.host, &params.username)
            .await;
        info!(session_id = %session.id, host = %session.host, "Connected");
        Ok(format!("Connected. Session ID: {}", session.id))
    }

    async fn execute(&self, arguments: Value) -> Result<String> {
        let params: SshExecuteParams = parse(arguments)?;
        self.security
            .check_command(&params.session_id, &params.command)
            .await?;

        let session = self.sessions.get_session(&params.session_id).await?;
        let output = exec::execute(
            session.connection.as_ref(),
            &params.command,
            Duration::from_secs(params.timeout),
        )
        .await?;
        Ok(output.combined())
    }

    async fn disconnect(&self, arguments: Value) -> Result<String> {
        let params: SessionParams = parse(arguments)?;
        self.sessions.remove_session(&params.session_id).await?;
        Ok(format!("Disconnected session: {}", params.session_id))
    }

    async fn list_sessions(&self) -> String {
        let sessions = self.sessions.list_sessions().await;
        if sessions.is_empty() {
            return "No active SSH sessions".to_string();
        }

        let mut result = String::from("Active SSH Sessions:\n");
        for session in sessions {
            result.push_str(&format!(
                "- ID: {}\n  Host: {}\n  Username: {}\n  Created: {}\n  Last Activity: {}\n\n",
                session.id,
                session.host,
                session.username,
                session.created_at.to_rfc3339(),
                session.last_activity.to_rfc3339(),
            ));
        }
        result
    }

    async fn upload_file(&self, arguments: Value) -> Result<String> {
        let params: TransferParams = parse(arguments)?;
        let session = self.sessions.get_session(&params.session_id).await?;
        scp::upload_file(
            session.connection.as_ref(),
            Path::new(&params.source),
            &params.destination,
        )
        .await?;
        Ok("File uploaded successfully".to_string())
    }

    async fn download_file(&self, arguments: Value) -> Result<String> {
        let params: TransferParams = parse(arguments)?;
        let session = self.sessions.get_session(&params.session_id).await?;
        scp::download_file(
            session.connection.as_ref(),
            &params.source,
            Path::new(&params.destination),
        )
        .await?;
        Ok("File downloaded successfully".to_string())
    }

    async fn list_directory(&self, arguments: Value) -> Result<String> {
        let params: ListDirectoryParams = parse(arguments)?;
        let session = self.sessions.get_session(&params.session_id).await?;
        let entries = listing::list_directory(session.connection.as_ref(), &params.path).await?;
        if entries.is_empty() {
            return Ok("Directory is empty".to_string());
        }

        let mut result = format!("Contents of {}:\n", params.path);
        for entry in entries {
            result.push_str(&entry.to_string());
            result.push('\n');
        }
        Ok(result)
    }

    async fn upload_directory(&self, arguments: Value) -> Result<String> {
        let params: TransferParams = parse(arguments)?;
        let session = self.sessions.get_session(&params.session_id).await?;
        scp::upload_directory(
            session.connection.as_ref(),
            Path::new(&params.source),
            &params.destination,
        )
        .await?;
        Ok("Directory uploaded successfully".to_string())
    }

    async fn download_directory(&self, arguments: Value) -> Result<String> {
        let params: TransferParams = parse(arguments)?;
        let session = self.sessions.get_session(&params.session_id).await?;
        scp::download_directory(
            session.connection.as_ref(),
            &params.source,
            Path::new(&params.destination),
        )
        .await?;
        Ok("Directory downloaded successfully".to_string())
    }
}

fn parse<T: DeserializeOwned>(arguments: Value) -> Result<T> {
    // Tools without parameters may be called with `null`
    let arguments = if arguments.is_null() { json!({}) } else { arguments };
    serde_json::from_value(arguments).map_err(|e| SshError::InvalidArguments(e.to_string()))
}

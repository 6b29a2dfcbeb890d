//! Tool-server connections.
//!
//! The transport behind a tool server is opaque to the engine: anything that
//! implements [`ToolServer`] can be registered. The manager owns connections
//! for the duration of a run, de-duplicates them by server name, and tears
//! everything down when the run ends.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::types::{RemoteToolSpec, ToolDef, ToolError, ToolOrigin, ToolResponse};

/// An external tool server. Identified by name; connections survive across
/// nodes that declare the same server.
#[async_trait]
pub trait ToolServer: Send + Sync {
    fn name(&self) -> &str;

    async fn connect(&self) -> Result<(), ToolError>;

    async fn disconnect(&self) -> Result<(), ToolError>;

    async fn list_tools(&self) -> Result<Vec<RemoteToolSpec>, ToolError>;

    async fn call_tool(
        &self,
        tool: &str,
        args: serde_json::Value,
    ) -> Result<ToolResponse, ToolError>;
}

#[derive(Default)]
struct ManagerState {
    servers: HashMap<String, Arc<dyn ToolServer>>,
    connected: HashSet<String>,
}

/// Run-scoped registry of tool servers and their connection state.
#[derive(Default)]
pub struct ToolServerManager {
    state: Mutex<ManagerState>,
}

impl ToolServerManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a server implementation. Registration does not connect.
    pub async fn register(&self, server: Arc<dyn ToolServer>) {
        let mut state = self.state.lock().await;
        let name = server.name().to_string();
        if state.servers.insert(name.clone(), server).is_some() {
            warn!("tool server '{}' re-registered, replacing previous", name);
        }
    }

    /// Connect to a server by name. Idempotent: an already-connected server
    /// is left alone.
    pub async fn connect(&self, name: &str) -> Result<(), ToolError> {
        let server = {
            let state = self.state.lock().await;
            if state.connected.contains(name) {
                return Ok(());
            }
            state
                .servers
                .get(name)
                .cloned()
                .ok_or_else(|| ToolError::UnknownServer(name.to_string()))?
        };
        server.connect().await?;
        debug!("connected to tool server '{}'", name);
        self.state.lock().await.connected.insert(name.to_string());
        Ok(())
    }

    /// Import tools from the named servers only. Each imported tool gets a
    /// dispatch shim routing back through this manager.
    pub async fn import_tools(
        self: &Arc<Self>,
        server_names: &[String],
    ) -> Result<Vec<ToolDef>, ToolError> {
        let mut imported = Vec::new();
        for server_name in server_names {
            let server = {
                let state = self.state.lock().await;
                state
                    .servers
                    .get(server_name)
                    .cloned()
                    .ok_or_else(|| ToolError::UnknownServer(server_name.clone()))?
            };
            for spec in server.list_tools().await? {
                let manager = Arc::clone(self);
                let server_name = server_name.clone();
                let tool_name = spec.name.clone();
                let mut def = ToolDef::new(spec.name, spec.description, spec.input_schema);
                def.origin = ToolOrigin::Remote {
                    server: server_name.clone(),
                };
                def.executor = Some(Arc::new(move |args| {
                    let manager = Arc::clone(&manager);
                    let server_name = server_name.clone();
                    let tool_name = tool_name.clone();
                    Box::pin(async move {
                        manager.call(&server_name, &tool_name, args).await
                    })
                }));
                imported.push(def);
            }
        }
        Ok(imported)
    }

    /// Dispatch a call to a connected server, mapping text content to a JSON
    /// string result and raising on non-success responses.
    pub async fn call(
        &self,
        server_name: &str,
        tool: &str,
        args: serde_json::Value,
    ) -> Result<serde_json::Value, ToolError> {
        let server = {
            let state = self.state.lock().await;
            state
                .servers
                .get(server_name)
                .cloned()
                .ok_or_else(|| ToolError::UnknownServer(server_name.to_string()))?
        };
        let response = server.call_tool(tool, args).await?;
        if !response.success {
            return Err(ToolError::Server {
                server: server_name.to_string(),
                message: response
                    .error
                    .unwrap_or_else(|| format!("tool '{tool}' reported failure")),
            });
        }
        Ok(serde_json::Value::String(response.joined_text()))
    }

    /// Names of every server connected during this run.
    pub async fn connected_servers(&self) -> Vec<String> {
        let state = self.state.lock().await;
        let mut names: Vec<String> = state.connected.iter().cloned().collect();
        names.sort();
        names
    }

    /// Disconnect every connected server. Called once when the run ends.
    pub async fn disconnect_all(&self) {
        let (servers, connected) = {
            let mut state = self.state.lock().await;
            let connected: Vec<String> = state.connected.drain().collect();
            let servers = state.servers.clone();
            (servers, connected)
        };
        for name in connected {
            if let Some(server) = servers.get(&name)
                && let Err(err) = server.disconnect().await
            {
                warn!("failed to disconnect tool server '{}': {}", name, err);
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// In-memory tool server for tests: counts connects and echoes args.
    pub struct EchoServer {
        pub name: String,
        pub tools: Vec<RemoteToolSpec>,
        pub connects: AtomicUsize,
    }

    impl EchoServer {
        pub fn new(name: &str, tool_names: &[&str]) -> Self {
            Self {
                name: name.to_string(),
                tools: tool_names
                    .iter()
                    .map(|t| RemoteToolSpec {
                        name: t.to_string(),
                        description: format!("echo tool {t}"),
                        input_schema: serde_json::json!({"type": "object", "properties": {}}),
                    })
                    .collect(),
                connects: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl ToolServer for EchoServer {
        fn name(&self) -> &str {
            &self.name
        }

        async fn connect(&self) -> Result<(), ToolError> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn disconnect(&self) -> Result<(), ToolError> {
            Ok(())
        }

        async fn list_tools(&self) -> Result<Vec<RemoteToolSpec>, ToolError> {
            Ok(self.tools.clone())
        }

        async fn call_tool(
            &self,
            tool: &str,
            args: serde_json::Value,
        ) -> Result<ToolResponse, ToolError> {
            if tool == "always_fails" {
                return Ok(ToolResponse::failure("deliberate failure"));
            }
            Ok(ToolResponse::text(format!("{}:{}", tool, args)))
        }
    }
}

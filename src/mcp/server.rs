//! MCP server implementation for image generation.
//!
//! This module implements the protocol loop:
//!
//! 1. **Decode**: one complete JSON-RPC value per iteration, newline-agnostic
//! 2. **Dispatch**: through an explicit method router built at startup
//! 3. **Encode**: exactly one response per request, none for notifications
//!
//! The loop is strictly sequential. A request is fully handled, response
//! included, before the next value is decoded; the only blocking points are
//! the stdin read and the backend's network calls.
//!
//! # Router
//!
//! The method→handler mapping lives in [`Router`] rather than a match so
//! tests can swap individual handlers for fakes via [`Router::insert`].

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

use serde::Serialize;
use serde_json::{json, Value};

use crate::mcp::protocol::{
    parse_value, IncomingMessage, JsonRpcError, JsonRpcNotification, JsonRpcRequest,
    JsonRpcResponse, MCP_PROTOCOL_VERSION, SERVER_NAME,
};
use crate::mcp::transport::{ReadOutcome, StdioTransport};
use crate::openai::ImageBackend;
use crate::paths::PathResolver;

/// Name of the single tool this server exposes.
pub const TOOL_NAME: &str = "generate-image";

/// Dimension used when width/height are absent or non-numeric.
pub const DEFAULT_DIMENSION: u32 = 512;

/// A tool definition for the tools/list response.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDefinition {
    /// Unique tool name.
    pub name: String,
    /// Human-readable description.
    pub description: String,
    /// JSON Schema for the tool's input parameters.
    pub input_schema: Value,
}

/// Content item in a tool call response.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ToolContent {
    /// Text content.
    Text {
        /// The text content.
        text: String,
    },
}

/// Result of a successful tool call.
#[derive(Debug, Clone, Serialize)]
pub struct ToolCallResult {
    /// Content returned by the tool.
    pub content: Vec<ToolContent>,
}

impl ToolCallResult {
    /// Creates a single-block text result.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![ToolContent::Text { text: text.into() }],
        }
    }
}

/// Future returned by a request handler.
pub type HandlerFuture<'a> = Pin<Box<dyn Future<Output = Result<JsonRpcResponse, JsonRpcError>> + 'a>>;

/// A request handler: consumes the request, produces one response or error.
pub type Handler<B> = for<'a> fn(&'a mut ImagegenServer<B>, JsonRpcRequest) -> HandlerFuture<'a>;

/// Explicit method→handler mapping, built once at startup.
pub struct Router<B> {
    handlers: HashMap<&'static str, Handler<B>>,
}

impl<B: ImageBackend> Router<B> {
    /// Builds the router with the fixed set of MCP methods.
    #[must_use]
    pub fn new() -> Self {
        let mut router = Self {
            handlers: HashMap::new(),
        };
        router.insert("initialize", initialize_handler);
        router.insert("tools/list", tools_list_handler);
        router.insert("resources/list", resources_list_handler);
        router.insert("prompts/list", prompts_list_handler);
        router.insert("tools/call", tools_call_handler);
        router
    }

    /// Registers (or replaces) the handler for a method.
    pub fn insert(&mut self, method: &'static str, handler: Handler<B>) {
        self.handlers.insert(method, handler);
    }

    /// Looks up the handler for a method.
    #[must_use]
    pub fn get(&self, method: &str) -> Option<Handler<B>> {
        self.handlers.get(method).copied()
    }
}

impl<B: ImageBackend> Default for Router<B> {
    fn default() -> Self {
        Self::new()
    }
}

fn initialize_handler<B: ImageBackend>(
    server: &mut ImagegenServer<B>,
    req: JsonRpcRequest,
) -> HandlerFuture<'_> {
    Box::pin(async move { Ok(server.handle_initialize(&req)) })
}

fn tools_list_handler<B: ImageBackend>(
    server: &mut ImagegenServer<B>,
    req: JsonRpcRequest,
) -> HandlerFuture<'_> {
    Box::pin(async move { Ok(server.handle_tools_list(&req)) })
}

fn resources_list_handler<B: ImageBackend>(
    _server: &mut ImagegenServer<B>,
    req: JsonRpcRequest,
) -> HandlerFuture<'_> {
    Box::pin(async move { Ok(JsonRpcResponse::success(req.id, json!({"resources": []}))) })
}

fn prompts_list_handler<B: ImageBackend>(
    _server: &mut ImagegenServer<B>,
    req: JsonRpcRequest,
) -> HandlerFuture<'_> {
    Box::pin(async move { Ok(JsonRpcResponse::success(req.id, json!({"prompts": []}))) })
}

fn tools_call_handler<B: ImageBackend>(
    server: &mut ImagegenServer<B>,
    req: JsonRpcRequest,
) -> HandlerFuture<'_> {
    Box::pin(server.handle_tools_call(req))
}

/// The MCP server for image generation.
pub struct ImagegenServer<B> {
    /// The transport layer.
    transport: StdioTransport,
    /// Image generation backend.
    backend: B,
    /// Output path resolver.
    resolver: PathResolver,
    /// Method dispatch table.
    router: Router<B>,
    /// Whether the client has completed initialisation.
    initialized: bool,
}

impl<B: ImageBackend> ImagegenServer<B> {
    /// Creates a new server with the default router.
    #[must_use]
    pub fn new(backend: B, resolver: PathResolver) -> Self {
        Self {
            transport: StdioTransport::new(),
            backend,
            resolver,
            router: Router::new(),
            initialized: false,
        }
    }

    /// Mutable access to the router, for handler substitution in tests.
    pub fn router_mut(&mut self) -> &mut Router<B> {
        &mut self.router
    }

    /// Runs the MCP server main loop with graceful shutdown handling.
    ///
    /// The loop ends when stdin closes, a JSON decode error occurs, or a
    /// termination signal arrives.
    ///
    /// # Errors
    ///
    /// Returns an error if transport I/O fails.
    pub async fn run(&mut self) -> std::io::Result<()> {
        self.run_with_shutdown().await
    }

    /// Runs the main loop and handles shutdown.
    #[cfg(unix)]
    async fn run_with_shutdown(&mut self) -> std::io::Result<()> {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigint = signal(SignalKind::interrupt()).map_err(std::io::Error::other)?;
        let mut sigterm = signal(SignalKind::terminate()).map_err(std::io::Error::other)?;

        loop {
            tokio::select! {
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT, initiating graceful shutdown");
                    return Ok(());
                }

                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM, initiating graceful shutdown");
                    return Ok(());
                }

                outcome = self.transport.read_value() => {
                    if self.handle_read_outcome(outcome).await? {
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Runs the main loop and handles shutdown.
    #[cfg(windows)]
    async fn run_with_shutdown(&mut self) -> std::io::Result<()> {
        let ctrl_c = tokio::signal::ctrl_c();
        tokio::pin!(ctrl_c);

        loop {
            tokio::select! {
                _ = &mut ctrl_c => {
                    tracing::info!("Received Ctrl+C, initiating graceful shutdown");
                    return Ok(());
                }

                outcome = self.transport.read_value() => {
                    if self.handle_read_outcome(outcome).await? {
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Handles the outcome of one transport read.
    ///
    /// Returns `true` if the server should shut down. A malformed stream is
    /// unrecoverable: a parse error is reported and the loop terminates.
    async fn handle_read_outcome(
        &mut self,
        outcome: std::io::Result<ReadOutcome>,
    ) -> std::io::Result<bool> {
        match outcome? {
            ReadOutcome::Eof => {
                tracing::info!("stdin closed, shutting down");
                Ok(true)
            }
            ReadOutcome::Malformed => {
                tracing::error!("Unrecoverable decode error, terminating loop");
                self.transport.write_error(&JsonRpcError::parse_error()).await?;
                Ok(true)
            }
            ReadOutcome::Value(value) => {
                match parse_value(value) {
                    Ok(msg) => self.handle_message(msg).await?,
                    Err(error) => self.transport.write_error(&error).await?,
                }
                Ok(false)
            }
        }
    }

    /// Handles a parsed incoming message.
    async fn handle_message(&mut self, msg: IncomingMessage) -> std::io::Result<()> {
        tracing::debug!(method = msg.method(), "Received message");
        match msg {
            IncomingMessage::Request(req) => self.handle_request(req).await,
            IncomingMessage::Notification(ref notif) => {
                self.handle_notification(notif);
                Ok(())
            }
        }
    }

    /// Handles an incoming request by routing it to its handler.
    async fn handle_request(&mut self, req: JsonRpcRequest) -> std::io::Result<()> {
        if !self.initialized && req.method != "initialize" {
            tracing::debug!(method = %req.method, "Request before initialized notification");
        }

        let Some(handler) = self.router.get(&req.method) else {
            let error = JsonRpcError::method_not_found(
                req.id.clone(),
                format!("Method not found: {}", req.method),
            );
            return self.transport.write_error(&error).await;
        };

        match handler(self, req).await {
            Ok(response) => self.transport.write_response(&response).await,
            Err(error) => self.transport.write_error(&error).await,
        }
    }

    /// Handles an incoming notification. Never produces a response.
    fn handle_notification(&mut self, notif: &JsonRpcNotification) {
        match notif.method.as_str() {
            "notifications/initialized" | "initialized" => {
                self.initialized = true;
                tracing::info!("Client completed initialisation");
            }
            "cancelled" | "notifications/cancelled" => {
                // Observed only: a blocking backend call cannot be aborted
                // once started.
                tracing::info!("Received cancellation notification");
            }
            other => {
                tracing::debug!(method = other, "Ignoring unknown notification");
            }
        }
    }

    /// Handles the initialize request.
    fn handle_initialize(&self, req: &JsonRpcRequest) -> JsonRpcResponse {
        tracing::info!("Initialising session");

        let result = json!({
            "protocolVersion": MCP_PROTOCOL_VERSION,
            "capabilities": {
                "tools": {}
            },
            "serverInfo": {
                "name": SERVER_NAME,
                "version": env!("CARGO_PKG_VERSION"),
            },
        });

        JsonRpcResponse::success(req.id.clone(), result)
    }

    /// Handles the tools/list request.
    fn handle_tools_list(&self, req: &JsonRpcRequest) -> JsonRpcResponse {
        let result = json!({
            "tools": [tool_definition()],
        });

        JsonRpcResponse::success(req.id.clone(), result)
    }

    /// Handles the tools/call request.
    ///
    /// Validates name and arguments, resolves the output path, then drives
    /// the backend: generate, download, report the final path.
    async fn handle_tools_call(
        &mut self,
        req: JsonRpcRequest,
    ) -> Result<JsonRpcResponse, JsonRpcError> {
        let id = req.id.clone();

        let Some(params) = req.params.as_ref().and_then(Value::as_object) else {
            return Err(JsonRpcError::invalid_params(id, "Invalid parameters"));
        };

        let Some(tool) = params.get("name").and_then(Value::as_str) else {
            return Err(JsonRpcError::invalid_params(id, "Invalid tool name"));
        };

        if tool != TOOL_NAME {
            return Err(JsonRpcError::method_not_found(
                id,
                format!("Unknown tool: {tool}"),
            ));
        }

        let Some(args) = params.get("arguments").and_then(Value::as_object) else {
            return Err(JsonRpcError::invalid_params(id, "Invalid arguments"));
        };

        let Some(prompt) = args
            .get("prompt")
            .and_then(Value::as_str)
            .filter(|p| !p.is_empty())
        else {
            return Err(JsonRpcError::invalid_params(id, "Prompt is required"));
        };

        let destination = args
            .get("destination")
            .and_then(Value::as_str)
            .filter(|d| !d.is_empty());

        let path = self.resolver.resolve(destination, prompt).map_err(|e| {
            JsonRpcError::internal_error(id.clone(), format!("Error generating filename: {e}"))
        })?;
        tracing::debug!(path = %path.display(), "Resolved output path");

        let width = dimension(args.get("width"));
        let height = dimension(args.get("height"));

        tracing::info!(width, height, "Generating image");
        let url = self
            .backend
            .generate(prompt, width, height)
            .await
            .map_err(|e| {
                JsonRpcError::internal_error(id.clone(), format!("Error generating image: {e}"))
            })?;

        self.backend.download(&url, &path).await.map_err(|e| {
            JsonRpcError::internal_error(id.clone(), format!("Error saving image: {e}"))
        })?;
        tracing::info!(path = %path.display(), "Image saved");

        let result = ToolCallResult::text(format!(
            "Image generated and saved to: {}",
            path.display()
        ));
        let value = serde_json::to_value(&result).map_err(|e| {
            JsonRpcError::internal_error(id.clone(), format!("Failed to serialise result: {e}"))
        })?;

        Ok(JsonRpcResponse::success(id, value))
    }
}

/// Extracts a dimension argument, defaulting when absent or non-numeric.
///
/// Fractional values truncate toward zero; dimensions are unsigned, so
/// negative values clamp to zero.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn dimension(value: Option<&Value>) -> u32 {
    value
        .and_then(Value::as_f64)
        .map_or(DEFAULT_DIMENSION, |f| f.max(0.0) as u32)
}

/// The static descriptor advertised via tools/list.
#[must_use]
pub fn tool_definition() -> ToolDefinition {
    ToolDefinition {
        name: TOOL_NAME.to_string(),
        description: "Generate an image from a text prompt and save it to disk".to_string(),
        input_schema: json!({
            "type": "object",
            "properties": {
                "prompt": {
                    "type": "string",
                    "description": "Description of the image to generate"
                },
                "width": {
                    "type": "number",
                    "description": "Width of the image in pixels",
                    "default": DEFAULT_DIMENSION
                },
                "height": {
                    "type": "number",
                    "description": "Height of the image in pixels",
                    "default": DEFAULT_DIMENSION
                },
                "destination": {
                    "type": "string",
                    "description": "Path where the generated image should be saved"
                }
            },
            "required": ["prompt"]
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dimension_defaults_when_absent() {
        assert_eq!(dimension(None), DEFAULT_DIMENSION);
    }

    #[test]
    fn dimension_defaults_when_non_numeric() {
        assert_eq!(dimension(Some(&json!("wide"))), DEFAULT_DIMENSION);
    }

    #[test]
    fn dimension_truncates_toward_zero() {
        assert_eq!(dimension(Some(&json!(1023.9))), 1023);
        assert_eq!(dimension(Some(&json!(800))), 800);
    }

    #[test]
    fn dimension_clamps_negative_to_zero() {
        assert_eq!(dimension(Some(&json!(-512))), 0);
        assert_eq!(dimension(Some(&json!(-0.9))), 0);
    }

    #[test]
    fn schema_declares_exactly_four_properties() {
        let def = tool_definition();
        let props = def.input_schema["properties"].as_object().unwrap();
        let mut keys: Vec<_> = props.keys().map(String::as_str).collect();
        keys.sort_unstable();
        assert_eq!(keys, ["destination", "height", "prompt", "width"]);
    }

    #[test]
    fn schema_requires_only_prompt() {
        let def = tool_definition();
        assert_eq!(def.input_schema["required"], json!(["prompt"]));
    }

    #[test]
    fn tool_result_serialises_as_content_blocks() {
        let result = ToolCallResult::text("Image generated and saved to: /tmp/out.png");
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(
            value["content"][0]["text"],
            "Image generated and saved to: /tmp/out.png"
        );
        assert_eq!(value["content"][0]["type"], "text");
    }

    #[test]
    fn tool_definition_serialises_camel_case() {
        let value = serde_json::to_value(tool_definition()).unwrap();
        assert!(value.get("inputSchema").is_some());
        assert_eq!(value["name"], TOOL_NAME);
    }
}

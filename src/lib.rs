//! imagegen-mcp: MCP server exposing text-to-image generation as a tool
//!
//! This library implements a minimal Model Context Protocol server that speaks
//! JSON-RPC 2.0 over stdio and advertises a single tool, `generate-image`.
//! A tool call turns a free-text prompt into an image file on disk: the prompt
//! is sent to the OpenAI images API, the resulting image is downloaded, and
//! the final path is reported back to the client.
//!
//! # Architecture
//!
//! - **Protocol loop**: one JSON value decoded per iteration, dispatched
//!   through an explicit method router, exactly one response (or none, for
//!   notifications) encoded per request. Strictly sequential.
//! - **Path resolution**: a destination hint or a sanitised prompt is turned
//!   into an absolute, collision-free `.png` path with a bounded retry loop.
//! - **Image backend**: the OpenAI calls sit behind the [`openai::ImageBackend`]
//!   trait so the protocol loop can be exercised without network access.
//!
//! # Modules
//!
//! - [`config`] — Settings assembled from environment variables
//! - [`error`] — Error types
//! - [`mcp`] — MCP protocol implementation
//! - [`openai`] — OpenAI images API client
//! - [`paths`] — Output path resolution and collision avoidance

pub mod config;
pub mod error;
pub mod mcp;
pub mod openai;
pub mod paths;

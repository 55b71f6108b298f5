//! stdio transport for MCP server.
//!
//! This module implements the stdio transport as specified by MCP:
//!
//! - Incoming messages are UTF-8 encoded JSON-RPC values. The reader is
//!   newline-agnostic: bytes are buffered until a complete JSON value is
//!   available, so pretty-printed and concatenated messages both decode.
//! - Outgoing messages are written one per line without embedded newlines.
//! - stdin: receives messages from client
//! - stdout: sends messages to client
//! - stderr: may be used for logging (not MCP messages)

use std::io;

use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::mcp::protocol::{JsonRpcError, JsonRpcResponse};

const READ_CHUNK: usize = 4096;

/// Outcome of one read from the transport.
#[derive(Debug)]
pub enum ReadOutcome {
    /// A complete JSON value was decoded.
    Value(Value),
    /// The stream contains bytes that can never form a valid JSON value.
    Malformed,
    /// The input stream is exhausted.
    Eof,
}

/// Result of one decode attempt against the buffered bytes.
enum DecodeStep {
    /// A complete value, plus how many buffered bytes it consumed.
    Value(Value, usize),
    /// The buffer holds a prefix of a value; more input is needed.
    NeedMore,
    /// The buffer holds bytes that cannot start a valid value.
    Malformed,
}

fn decode_step(buffer: &[u8]) -> DecodeStep {
    let mut stream = serde_json::Deserializer::from_slice(buffer).into_iter::<Value>();
    match stream.next() {
        Some(Ok(value)) => DecodeStep::Value(value, stream.byte_offset()),
        Some(Err(e)) if e.is_eof() => DecodeStep::NeedMore,
        Some(Err(_)) => DecodeStep::Malformed,
        None => DecodeStep::NeedMore,
    }
}

/// A stdio-based MCP transport.
///
/// Handles reading JSON-RPC messages from stdin and writing responses to stdout.
pub struct StdioTransport {
    /// Handle for stdin.
    reader: tokio::io::Stdin,
    /// Bytes read from stdin but not yet decoded.
    buffer: Vec<u8>,
    /// Handle for stdout.
    writer: tokio::io::Stdout,
}

impl StdioTransport {
    /// Creates a new stdio transport.
    #[must_use]
    pub fn new() -> Self {
        Self {
            reader: tokio::io::stdin(),
            buffer: Vec::new(),
            writer: tokio::io::stdout(),
        }
    }

    /// Reads the next JSON value from stdin.
    ///
    /// Buffers input until a complete value can be decoded, regardless of
    /// where line breaks fall.
    ///
    /// # Errors
    ///
    /// Returns an error if reading from stdin fails.
    pub async fn read_value(&mut self) -> io::Result<ReadOutcome> {
        loop {
            match decode_step(&self.buffer) {
                DecodeStep::Value(value, consumed) => {
                    self.buffer.drain(..consumed);
                    return Ok(ReadOutcome::Value(value));
                }
                DecodeStep::Malformed => return Ok(ReadOutcome::Malformed),
                DecodeStep::NeedMore => {}
            }

            let mut chunk = [0u8; READ_CHUNK];
            let n = self.reader.read(&mut chunk).await?;
            if n == 0 {
                // EOF with leftover non-whitespace bytes means a truncated value.
                if self.buffer.iter().all(u8::is_ascii_whitespace) {
                    return Ok(ReadOutcome::Eof);
                }
                return Ok(ReadOutcome::Malformed);
            }
            self.buffer.extend_from_slice(&chunk[..n]);
        }
    }

    /// Writes a JSON-RPC response to stdout.
    ///
    /// The response is serialised to JSON and terminated with a newline.
    ///
    /// # Errors
    ///
    /// Returns an error if serialisation or writing fails.
    pub async fn write_response(&mut self, response: &JsonRpcResponse) -> io::Result<()> {
        self.write_message(response).await
    }

    /// Writes a JSON-RPC error to stdout.
    ///
    /// # Errors
    ///
    /// Returns an error if serialisation or writing fails.
    pub async fn write_error(&mut self, error: &JsonRpcError) -> io::Result<()> {
        self.write_message(error).await
    }

    /// Serialises a message and writes it with newline termination.
    async fn write_message<T: serde::Serialize>(&mut self, message: &T) -> io::Result<()> {
        let json = serde_json::to_string(message)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

        // MCP spec: messages must not contain embedded newlines
        debug_assert!(
            !json.contains('\n'),
            "JSON message must not contain embedded newlines"
        );

        self.writer.write_all(json.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;
        self.writer.flush().await?;

        Ok(())
    }
}

impl Default for StdioTransport {
    fn default() -> Self {
        Self::new()
    }
}

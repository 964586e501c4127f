//! mcphost is a terminal chat host that connects one language model to any
//! number of Model Context Protocol servers.
//!
//! The crate is organized around a small set of collaborating layers:
//! - [`mcp`] owns the server sessions: transports, the JSON-RPC client,
//!   lifecycle management, the merged tool registry and server-initiated
//!   callbacks (sampling, roots, elicitation).
//! - [`core`] holds the conversation loop, bounded history, configuration
//!   and the provider abstraction.
//! - [`commands`] implements the slash commands available at the prompt.
//! - [`api`] defines the OpenAI-compatible chat-completions payloads and the
//!   HTTP provider built on them.
//!
//! The binary (`src/main.rs`) routes through [`crate::cli::main`], which
//! loads configuration, starts every server and runs [`cli::repl::run`].

pub mod api;
pub mod cli;
pub mod commands;
pub mod core;
pub mod mcp;
pub mod utils;

//! Handlers for requests a server sends back to the host mid-session.

pub mod elicitation;
pub mod roots;
pub mod sampling;

use crate::core::interaction::Interaction;
use crate::core::provider::CompletionProvider;
use async_trait::async_trait;
use rust_mcp_schema::RpcError;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::debug;

pub const METHOD_SAMPLING: &str = "sampling/createMessage";
pub const METHOD_ELICITATION: &str = "elicitation/create";
pub const METHOD_ROOTS: &str = "roots/list";
pub const METHOD_PING: &str = "ping";

/// JSON-RPC code for a request the host refuses to serve.
pub const RPC_INVALID_REQUEST: i64 = -32600;
/// Code used when the user declines a request.
pub const RPC_USER_REJECTED: i64 = -1;

/// Answers one server-to-client request.
#[async_trait]
pub trait CallbackHandler: Send + Sync {
    async fn handle(&self, server: &str, method: &str, params: Value) -> Result<Value, RpcError>;
}

pub(crate) fn rpc_error(code: i64, message: impl Into<String>) -> RpcError {
    RpcError {
        code,
        message: message.into(),
        data: None,
    }
}

pub struct CallbackBridge {
    provider: Arc<dyn CompletionProvider>,
    interaction: Arc<dyn Interaction>,
    roots: Vec<String>,
}

impl CallbackBridge {
    pub fn new(
        provider: Arc<dyn CompletionProvider>,
        interaction: Arc<dyn Interaction>,
        roots: Vec<String>,
    ) -> Self {
        Self {
            provider,
            interaction,
            roots,
        }
    }
}

#[async_trait]
impl CallbackHandler for CallbackBridge {
    async fn handle(&self, server: &str, method: &str, params: Value) -> Result<Value, RpcError> {
        debug!(server = %server, method = %method, "Dispatching MCP callback");
        match method {
            METHOD_SAMPLING => {
                sampling::handle_sampling(
                    self.provider.as_ref(),
                    self.interaction.as_ref(),
                    server,
                    params,
                )
                .await
            }
            METHOD_ELICITATION => {
                elicitation::handle_elicitation(self.interaction.as_ref(), server, params).await
            }
            METHOD_ROOTS => Ok(roots::list_roots(&self.roots)),
            METHOD_PING => Ok(json!({})),
            other => Err(RpcError::method_not_found()
                .with_message(&format!("Unsupported server request: {other}"))),
        }
    }
}

use crate::error::{constants, ProtocolError, Result};
use crate::protocol::message::Generic;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::debug;

type HandlerFn = dyn Fn(&Generic) -> Result<Option<Generic>> + Send + Sync + 'static;

/// Routes secure channel chunks by their three-byte message type.
///
/// A handler returns the chunk to send back, or `None` when there is no reply.
/// Cloning shares the handler table.
#[derive(Clone)]
pub struct Dispatcher {
    handlers: Arc<RwLock<HashMap<[u8; 3], Box<HandlerFn>>>>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let count = self.handlers.read().map(|h| h.len()).unwrap_or_default();
        f.debug_struct("Dispatcher").field("handlers", &count).finish()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        Self {
            handlers: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Register `handler` for `message_type`, replacing any earlier one.
    pub fn register<F>(&self, message_type: &[u8; 3], handler: F) -> Result<()>
    where
        F: Fn(&Generic) -> Result<Option<Generic>> + Send + Sync + 'static,
    {
        let mut handlers = self
            .handlers
            .write()
            .map_err(|_| ProtocolError::Custom(constants::ERR_DISPATCHER_WRITE_LOCK.to_string()))?;

        handlers.insert(*message_type, Box::new(handler));
        Ok(())
    }

    pub fn is_registered(&self, message_type: &[u8; 3]) -> bool {
        self.handlers
            .read()
            .map(|h| h.contains_key(message_type))
            .unwrap_or(false)
    }

    pub fn dispatch(&self, chunk: &Generic) -> Result<Option<Generic>> {
        let handlers = self
            .handlers
            .read()
            .map_err(|_| ProtocolError::Custom(constants::ERR_DISPATCHER_READ_LOCK.to_string()))?;

        debug!(
            message_type = %String::from_utf8_lossy(&chunk.message_type),
            chunk_type = %char::from(chunk.chunk_type),
            len = chunk.payload.len(),
            "Dispatching chunk"
        );

        handlers
            .get(&chunk.message_type)
            .ok_or(ProtocolError::UnexpectedMessage)
            .and_then(|handler| handler(chunk))
    }
}

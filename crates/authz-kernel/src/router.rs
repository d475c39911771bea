use std::collections::HashMap;

use authz_types::{Message, Principal, TypeTag};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RouterError {
    #[error("no handler registered for '{0}'")]
    UnknownAction(TypeTag),
    #[error("handler rejected action: {0}")]
    Rejected(String),
}

/// Executes leaf actions against ledger state on behalf of `signer`.
pub trait ActionRouter: Send {
    fn route(&mut self, signer: &Principal, message: &Message) -> Result<Vec<u8>, RouterError>;
}

pub trait ActionHandler: Send {
    fn handle(&mut self, signer: &Principal, message: &Message) -> Result<Vec<u8>, RouterError>;
}

impl<F> ActionHandler for F
where
    F: FnMut(&Principal, &Message) -> Result<Vec<u8>, RouterError> + Send,
{
    fn handle(&mut self, signer: &Principal, message: &Message) -> Result<Vec<u8>, RouterError> {
        self(signer, message)
    }
}

/// Routes each message to the handler registered for its type tag.
#[derive(Default)]
pub struct HandlerRouter {
    handlers: HashMap<TypeTag, Box<dyn ActionHandler>>,
}

impl HandlerRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_handler(
        mut self,
        type_tag: impl Into<TypeTag>,
        handler: impl ActionHandler + 'static,
    ) -> Self {
        self.register(type_tag, handler);
        self
    }

    /// Registers `handler`, replacing any previous handler for the tag.
    pub fn register(
        &mut self,
        type_tag: impl Into<TypeTag>,
        handler: impl ActionHandler + 'static,
    ) {
        let type_tag = type_tag.into();
        if self.handlers.insert(type_tag.clone(), Box::new(handler)).is_some() {
            log::warn!("replaced handler for '{type_tag}'");
        }
    }

    pub fn has_route(&self, type_tag: &TypeTag) -> bool {
        self.handlers.contains_key(type_tag)
    }
}

impl std::fmt::Debug for HandlerRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut tags: Vec<_> = self.handlers.keys().map(TypeTag::as_str).collect();
        tags.sort_unstable();
        f.debug_struct("HandlerRouter").field("routes", &tags).finish()
    }
}

impl ActionRouter for HandlerRouter {
    fn route(&mut self, signer: &Principal, message: &Message) -> Result<Vec<u8>, RouterError> {
        let handler = self
            .handlers
            .get_mut(&message.type_tag)
            .ok_or_else(|| RouterError::UnknownAction(message.type_tag.clone()))?;
        handler.handle(signer, message)
    }
}

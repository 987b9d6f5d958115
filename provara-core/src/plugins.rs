//! Registry for pluggable event types.
//!
//! Core types are built into the envelope and reducer; reverse-domain types
//! register a payload validator and, optionally, a reducer hook at startup.
//! The registry is an explicit object threaded through calls, never a
//! process-wide singleton.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::error::{ProvaraError, Result};
use crate::reducer::ReducerState;

/// Payload validator for one registered event type.
pub type PayloadValidator = Box<dyn Fn(&Value) -> std::result::Result<(), String> + Send + Sync>;

/// Reducer hook: folds one event of a registered type into the state.
pub type ReducerHook = Box<dyn Fn(&mut ReducerState, &Value) + Send + Sync>;

/// Behavior registered for one reverse-domain event type.
#[derive(Default)]
pub struct EventTypeHandler {
    pub validator: Option<PayloadValidator>,
    pub reducer_hook: Option<ReducerHook>,
}

/// Core type names that plugins may not claim.
pub const RESERVED_EVENT_TYPES: &[&str] = &[
    "GENESIS",
    "OBSERVATION",
    "ASSERTION",
    "ATTESTATION",
    "RETRACTION",
    "KEY_REVOCATION",
    "KEY_PROMOTION",
    "REDUCER_EPOCH",
];

/// Maps reverse-domain event types to their handlers.
#[derive(Default)]
pub struct EventTypeRegistry {
    handlers: BTreeMap<String, EventTypeHandler>,
}

impl EventTypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for a reverse-domain type name.
    pub fn register(&mut self, name: &str, handler: EventTypeHandler) -> Result<()> {
        if RESERVED_EVENT_TYPES.contains(&name) {
            return Err(ProvaraError::RequiredFieldMissing {
                context: format!("event type {name} is reserved for core types"),
            });
        }
        if !name.contains('.') {
            return Err(ProvaraError::RequiredFieldMissing {
                context: format!("plugin event type {name} must use reverse-domain notation"),
            });
        }
        if self.handlers.contains_key(name) {
            return Err(ProvaraError::DuplicateEventId {
                context: format!("event type {name} already registered"),
            });
        }
        self.handlers.insert(name.to_string(), handler);
        Ok(())
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    pub fn registered_types(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }

    /// Run the registered validator for a type, if any.
    pub fn validate_payload(&self, type_name: &str, payload: &Value) -> Result<()> {
        if let Some(validator) = self
            .handlers
            .get(type_name)
            .and_then(|h| h.validator.as_ref())
        {
            validator(payload).map_err(|reason| ProvaraError::RequiredFieldMissing {
                context: format!("{type_name} payload: {reason}"),
            })?;
        }
        Ok(())
    }

    pub(crate) fn reducer_hook(&self, type_name: &str) -> Option<&ReducerHook> {
        self.handlers
            .get(type_name)
            .and_then(|h| h.reducer_hook.as_ref())
    }
}

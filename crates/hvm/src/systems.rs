//! System messages and the router that delivers them
//!
//! The relay produces [`SystemMessage`]s addressed to a system by name. The
//! [`SystemRouter`] hands each one to the handler registered under that name,
//! synchronously and in arrival order.

use crate::error::RouterError;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Name the display subsystem is registered under
pub const DISPLAY_SYSTEM: &str = "display";

/// Operations understood by the host systems.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    /// Wipe the text buffer currently being written
    TextModeClear,
    /// Append bytes to the text buffer currently being written
    TextModePushChars(Vec<u8>),
    /// Flip the text double buffer
    TextModeSwap,
}

impl Operation {
    /// Wire tag of the operation.
    pub fn tag(&self) -> &'static str {
        match self {
            Operation::TextModeClear => "textmode-clear",
            Operation::TextModePushChars(_) => "textmode-push-chars",
            Operation::TextModeSwap => "textmode-swap",
        }
    }

    pub fn data(&self) -> Option<&[u8]> {
        match self {
            Operation::TextModePushChars(bytes) => Some(bytes),
            Operation::TextModeClear | Operation::TextModeSwap => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemMessage {
    pub system: String,
    pub operation: Operation,
}

impl SystemMessage {
    pub fn new(system: impl Into<String>, operation: Operation) -> Self {
        Self {
            system: system.into(),
            operation,
        }
    }

    /// A message for the display subsystem.
    pub fn display(operation: Operation) -> Self {
        Self::new(DISPLAY_SYSTEM, operation)
    }
}

/// A host subsystem that consumes messages.
pub trait System: Send + Sync {
    fn process_message(&self, message: &SystemMessage);
}

/// Maps system names to their handlers.
#[derive(Default)]
pub struct SystemRouter {
    systems: HashMap<String, Arc<dyn System>>,
}

impl SystemRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `system` to `name`. Fails if the name is already taken; the
    /// existing binding is left in place.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        system: Arc<dyn System>,
    ) -> Result<(), RouterError> {
        let name = name.into();
        if self.systems.contains_key(&name) {
            return Err(RouterError::DuplicateSystem(name));
        }
        log::debug!("Registered system '{}'", name);
        self.systems.insert(name, system);
        Ok(())
    }

    pub fn unregister(&mut self, name: &str) -> Option<Arc<dyn System>> {
        self.systems.remove(name)
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.systems.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.systems.len()
    }

    pub fn is_empty(&self) -> bool {
        self.systems.is_empty()
    }

    /// Deliver `message` to its system. Messages for unknown systems are
    /// dropped; returns whether a handler received it.
    pub fn dispatch(&self, message: &SystemMessage) -> bool {
        match self.systems.get(&message.system) {
            Some(system) => {
                system.process_message(message);
                true
            }
            None => {
                log::trace!(
                    "Dropping {} for unregistered system '{}'",
                    message.operation.tag(),
                    message.system
                );
                false
            }
        }
    }
}

impl fmt::Debug for SystemRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&String> = self.systems.keys().collect();
        names.sort();
        f.debug_struct("SystemRouter").field("systems", &names).finish()
    }
}

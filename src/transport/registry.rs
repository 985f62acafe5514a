//! Consumer registry.
//!
//! Local registrations (address → handlers) outlive sessions. The set of
//! addresses registered on the bridge is per session: it is cleared on
//! every disconnect and rebuilt after every connect.

// ============================================================================
// Imports
// ============================================================================

use rustc_hash::{FxHashMap, FxHashSet};

use crate::identifiers::RegistrationId;
use crate::protocol::Message;

// ============================================================================
// Types
// ============================================================================

/// Consumer callback.
///
/// Runs on the connection task: it must not block.
pub type MessageHandler = Box<dyn Fn(Message) + Send + Sync>;

// ============================================================================
// ConsumerRegistry
// ============================================================================

#[derive(Default)]
pub(crate) struct ConsumerRegistry {
    handlers: FxHashMap<String, Vec<(RegistrationId, MessageHandler)>>,
    on_server: FxHashSet<String>,
}

impl ConsumerRegistry {
    /// Adds a handler. Returns `true` if it is the first for `address`.
    pub(crate) fn add(&mut self, address: &str, id: RegistrationId, handler: MessageHandler) -> bool {
        let entries = self.handlers.entry(address.to_string()).or_default();
        entries.push((id, handler));
        entries.len() == 1
    }

    /// Removes a handler.
    ///
    /// Returns `None` if the registration is unknown, otherwise `Some(true)`
    /// when `address` has no handlers left.
    pub(crate) fn remove(&mut self, address: &str, id: RegistrationId) -> Option<bool> {
        let entries = self.handlers.get_mut(address)?;
        let index = entries.iter().position(|(entry_id, _)| *entry_id == id)?;
        drop(entries.remove(index));

        if entries.is_empty() {
            self.handlers.remove(address);
            Some(true)
        } else {
            Some(false)
        }
    }

    /// Returns `true` if any handler listens on `address`.
    #[cfg(test)]
    pub(crate) fn has_handlers(&self, address: &str) -> bool {
        self.handlers.contains_key(address)
    }

    /// Delivers `message` to every handler of its address.
    ///
    /// Returns the number of handlers invoked.
    pub(crate) fn dispatch(&self, message: &Message) -> usize {
        let Some(entries) = self.handlers.get(message.address()) else {
            return 0;
        };

        for (_, handler) in entries {
            handler(message.clone());
        }
        entries.len()
    }

    /// Addresses with at least one local handler.
    pub(crate) fn addresses(&self) -> Vec<String> {
        self.handlers.keys().cloned().collect()
    }

    /// Records that the bridge forwards `address` in this session.
    #[inline]
    pub(crate) fn mark_registered(&mut self, address: &str) {
        self.on_server.insert(address.to_string());
    }

    /// Records that the bridge stopped forwarding `address`.
    #[inline]
    pub(crate) fn mark_unregistered(&mut self, address: &str) -> bool {
        self.on_server.remove(address)
    }

    /// Returns `true` if `address` is registered on the bridge.
    #[inline]
    pub(crate) fn is_registered(&self, address: &str) -> bool {
        self.on_server.contains(address)
    }

    /// Forgets all bridge-side registrations. Local handlers are kept.
    #[inline]
    pub(crate) fn clear_server_state(&mut self) {
        self.on_server.clear();
    }

    /// Number of local registrations.
    pub(crate) fn len(&self) -> usize {
        self.handlers.values().map(Vec::len).sum()
    }
}

// ============================================================================
// Tests
// ============================================================================

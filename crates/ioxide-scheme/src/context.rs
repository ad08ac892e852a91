use std::cell::{Ref, RefCell, RefMut};
use std::collections::HashSet;
use std::fmt;

use ioxide_net::{Endpoint, LineStream};
use ioxide_reactor::{Dispatcher, RawHandle, Registry, WatchId};
use tracing::debug;

use crate::protect::{ProtectError, ProtectionTable};
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum_macros::Display)]
#[strum(serialize_all = "lowercase")]
pub enum HandleKind {
    Dispatcher,
    Watch,
    Endpoint,
    Stream,
}

/// Script-visible reference to a native object in a [`HandleTable`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Token {
    kind: HandleKind,
    raw: RawHandle,
}

impl Token {
    pub fn kind(&self) -> HandleKind {
        self.kind
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#<{} {}>", self.kind, self.raw)
    }
}

/// A watch registered by interpreted code
pub struct WatchEntry {
    pub dispatcher: Token,
    pub handle: Dispatcher,
    /// Unset only while the watch is being registered
    pub id: Option<WatchId>,
}

/// Native objects reachable from one interpreter, one registry per kind
#[derive(Default)]
pub struct HandleTable {
    dispatchers: Registry<Dispatcher>,
    watches: Registry<WatchEntry>,
    endpoints: Registry<Endpoint>,
    streams: Registry<LineStream>,
    /// Dispatchers the host lent to this interpreter; scripts may not destroy them
    shared: HashSet<Token>,
}

fn token(kind: HandleKind, raw: RawHandle) -> Token {
    Token { kind, raw }
}

impl HandleTable {
    /// Register a dispatcher, reusing the existing token if it is already known
    pub fn add_dispatcher(&mut self, dispatcher: Dispatcher) -> Token {
        let existing = self
            .dispatchers
            .iter()
            .find(|(_, known)| known.ptr_eq(&dispatcher))
            .map(|(raw, _)| raw);
        let raw = existing.unwrap_or_else(|| self.dispatchers.insert(dispatcher));
        token(HandleKind::Dispatcher, raw)
    }

    pub fn dispatcher(&self, token: Token) -> Option<Dispatcher> {
        if token.kind != HandleKind::Dispatcher {
            return None;
        }
        self.dispatchers.get(token.raw).cloned()
    }

    pub fn remove_dispatcher(&mut self, token: Token) -> Option<Dispatcher> {
        if token.kind != HandleKind::Dispatcher {
            return None;
        }
        self.shared.remove(&token);
        self.dispatchers.remove(token.raw)
    }

    pub fn mark_shared(&mut self, token: Token) {
        if self.dispatcher(token).is_some() {
            self.shared.insert(token);
        }
    }

    pub fn is_shared(&self, token: Token) -> bool {
        self.shared.contains(&token)
    }

    pub fn add_watch(&mut self, entry: WatchEntry) -> Token {
        token(HandleKind::Watch, self.watches.insert(entry))
    }

    pub fn watch(&self, token: Token) -> Option<&WatchEntry> {
        if token.kind != HandleKind::Watch {
            return None;
        }
        self.watches.get(token.raw)
    }

    pub fn watch_mut(&mut self, token: Token) -> Option<&mut WatchEntry> {
        if token.kind != HandleKind::Watch {
            return None;
        }
        self.watches.get_mut(token.raw)
    }

    pub fn remove_watch(&mut self, token: Token) -> Option<WatchEntry> {
        if token.kind != HandleKind::Watch {
            return None;
        }
        self.watches.remove(token.raw)
    }

    /// Every registered watch with the dispatcher that owns it
    pub fn live_watches(&self) -> Vec<(Dispatcher, WatchId)> {
        self.watches
            .iter()
            .filter_map(|(_, entry)| entry.id.map(|id| (entry.handle.clone(), id)))
            .collect()
    }

    pub fn watch_count(&self) -> usize {
        self.watches.len()
    }

    pub fn add_endpoint(&mut self, endpoint: Endpoint) -> Token {
        token(HandleKind::Endpoint, self.endpoints.insert(endpoint))
    }

    pub fn endpoint(&self, token: Token) -> Option<&Endpoint> {
        if token.kind != HandleKind::Endpoint {
            return None;
        }
        self.endpoints.get(token.raw)
    }

    pub fn remove_endpoint(&mut self, token: Token) -> Option<Endpoint> {
        if token.kind != HandleKind::Endpoint {
            return None;
        }
        self.endpoints.remove(token.raw)
    }

    pub fn add_stream(&mut self, stream: LineStream) -> Token {
        token(HandleKind::Stream, self.streams.insert(stream))
    }

    pub fn stream(&self, token: Token) -> Option<&LineStream> {
        if token.kind != HandleKind::Stream {
            return None;
        }
        self.streams.get(token.raw)
    }

    pub fn stream_mut(&mut self, token: Token) -> Option<&mut LineStream> {
        if token.kind != HandleKind::Stream {
            return None;
        }
        self.streams.get_mut(token.raw)
    }

    pub fn remove_stream(&mut self, token: Token) -> Option<LineStream> {
        if token.kind != HandleKind::Stream {
            return None;
        }
        self.streams.remove(token.raw)
    }
}

/// Per-interpreter state behind the extension functions: the protection
/// table for values referenced by native callbacks, and the handle table.
#[derive(Default)]
pub struct ExtensionContext {
    protection: RefCell<ProtectionTable<Value>>,
    handles: RefCell<HandleTable>,
}

impl ExtensionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn protect(&self, value: Value) -> u64 {
        self.protection.borrow_mut().protect(value)
    }

    pub fn retrieve(&self, id: u64) -> Result<Value, ProtectError> {
        self.protection.borrow().retrieve(id).cloned()
    }

    pub fn unprotect(&self, id: u64) -> Result<Value, ProtectError> {
        self.protection.borrow_mut().unprotect(id)
    }

    pub fn is_protected(&self, id: u64) -> bool {
        self.protection.borrow().contains(id)
    }

    pub fn protected_count(&self) -> usize {
        self.protection.borrow().len()
    }

    /// Borrow the handle table. Never hold the borrow across a call that can
    /// run callbacks.
    pub fn handles(&self) -> Ref<'_, HandleTable> {
        self.handles.borrow()
    }

    pub fn handles_mut(&self) -> RefMut<'_, HandleTable> {
        self.handles.borrow_mut()
    }

    /// Release every handle and protected value
    pub fn clear(&self) {
        let handles = std::mem::take(&mut *self.handles.borrow_mut());
        let values = self.protection.borrow_mut().drain();
        debug!(
            target: "scheme",
            "Releasing {} watch(es), {} dispatcher(s) and {} protected value(s)",
            handles.watches.len(),
            handles.dispatchers.len(),
            values.len()
        );
        drop(handles);
        drop(values);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dispatcher_tokens_are_shared_per_dispatcher() {
        let mut table = HandleTable::default();
        let dispatcher = Dispatcher::new();
        let first = table.add_dispatcher(dispatcher.clone());
        let second = table.add_dispatcher(dispatcher.clone());
        assert_eq!(first, second);

        let other = table.add_dispatcher(Dispatcher::new());
        assert_ne!(first, other);
        assert!(table.dispatcher(first).unwrap().ptr_eq(&dispatcher));
    }

    #[test]
    fn test_tokens_are_kind_checked() {
        let mut table = HandleTable::default();
        let token = table.add_dispatcher(Dispatcher::new());
        assert!(table.watch(token).is_none());
        assert!(table.endpoint(token).is_none());
        assert!(table.stream_mut(token).is_none());
        assert_eq!(token.kind(), HandleKind::Dispatcher);
        assert!(token.to_string().starts_with("#<dispatcher "));
    }

    #[test]
    fn test_stale_tokens_are_rejected() {
        let mut table = HandleTable::default();
        let token = table.add_dispatcher(Dispatcher::new());
        assert!(table.remove_dispatcher(token).is_some());
        assert!(table.dispatcher(token).is_none());

        let fresh = table.add_dispatcher(Dispatcher::new());
        assert_ne!(token, fresh);
        assert!(table.dispatcher(token).is_none());
    }

    #[test]
    fn test_shared_dispatchers() {
        let mut table = HandleTable::default();
        let dispatcher = Dispatcher::new();
        let token = table.add_dispatcher(dispatcher.clone());
        assert!(!table.is_shared(token));

        table.mark_shared(token);
        assert!(table.is_shared(token));
        // Re-adding the same dispatcher keeps its token and its mark
        let id = table.add_dispatcher(dispatcher);
        assert!(table.is_shared(id));

        table.remove_dispatcher(token);
        assert!(!table.is_shared(token));
    }

    #[test]
    fn test_clear_releases_everything() {
        let context = ExtensionContext::new();
        context.protect(Value::Int(1));
        context.handles_mut().add_dispatcher(Dispatcher::new());
        context.clear();
        assert_eq!(context.protected_count(), 0);
        assert!(context.handles().dispatchers.is_empty());
    }
}

use std::fmt;
use std::sync::Arc;

use ksim_protocol::{EventKind, ExtensionError, ExtensionHandle, ExtensionRegistry};
use parking_lot::RwLock;
use tracing::debug;

/// In-process extension registry filled by the host's mod loader.
///
/// Registering a handle whose name is already taken replaces the old one in
/// place, keeping notification order stable across reloads.
#[derive(Default)]
pub struct StaticExtensionRegistry {
    handles: RwLock<Vec<Arc<dyn ExtensionHandle>>>,
}

impl StaticExtensionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, handle: Arc<dyn ExtensionHandle>) {
        let mut handles = self.handles.write();
        match handles.iter().position(|existing| existing.name() == handle.name()) {
            Some(index) => {
                debug!(extension = handle.name(), "extension replaced");
                handles[index] = handle;
            }
            None => {
                debug!(extension = handle.name(), "extension registered");
                handles.push(handle);
            }
        }
    }

    pub fn unregister(&self, name: &str) -> bool {
        let mut handles = self.handles.write();
        let before = handles.len();
        handles.retain(|handle| handle.name() != name);
        before != handles.len()
    }

    pub fn names(&self) -> Vec<String> {
        self.handles
            .read()
            .iter()
            .map(|handle| handle.name().to_owned())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.handles.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ExtensionRegistry for StaticExtensionRegistry {
    fn enumerate(&self) -> Vec<Arc<dyn ExtensionHandle>> {
        self.handles.read().clone()
    }
}

impl fmt::Debug for StaticExtensionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticExtensionRegistry")
            .field("extensions", &self.names())
            .finish()
    }
}

/// Extension backed by a closure.
pub struct FnExtension<F> {
    name: String,
    handler: F,
}

impl<F> FnExtension<F>
where
    F: Fn(&EventKind) -> Result<(), ExtensionError> + Send + Sync,
{
    pub fn new(name: impl Into<String>, handler: F) -> Self {
        Self {
            name: name.into(),
            handler,
        }
    }
}

impl<F> ExtensionHandle for FnExtension<F>
where
    F: Fn(&EventKind) -> Result<(), ExtensionError> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn notify(&self, event: &EventKind) -> Result<(), ExtensionError> {
        (self.handler)(event)
    }
}

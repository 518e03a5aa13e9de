//! User-supplied lifecycle hooks
//!
//! Hooks compose with the default handlers: `open` runs after the default
//! connect work, `message` replaces the default handling of non-heartbeat
//! frames, `close` runs before the default disconnect cleanup. The hub
//! invokes every hook outside of its locks, so hooks may block or call back
//! into the hub freely.

use crate::client::Client;
use crate::types::BoxFuture;
use std::sync::Arc;

pub type OpenHook = Arc<dyn Fn(Arc<Client>) -> BoxFuture<'static, ()> + Send + Sync>;
pub type MessageHook = Arc<dyn Fn(Arc<Client>, String) -> BoxFuture<'static, ()> + Send + Sync>;
pub type CloseHook = Arc<dyn Fn(Arc<Client>, u16, String) -> BoxFuture<'static, ()> + Send + Sync>;

/// Optional per-event callbacks composed with the default handlers
#[derive(Clone, Default)]
pub struct InterfaceHooks {
    pub open: Option<OpenHook>,
    pub message: Option<MessageHook>,
    pub close: Option<CloseHook>,
}

impl InterfaceHooks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run after the default open work (welcome + global join)
    pub fn on_open<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(Arc<Client>) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        self.open = Some(Arc::new(move |client| Box::pin(hook(client))));
        self
    }

    /// Replace the default message handler for non-heartbeat frames
    pub fn on_message<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(Arc<Client>, String) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        self.message = Some(Arc::new(move |client, raw| Box::pin(hook(client, raw))));
        self
    }

    /// Run before the default close cleanup (channel evacuation)
    pub fn on_close<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(Arc<Client>, u16, String) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        self.close = Some(Arc::new(move |client, code, reason| {
            Box::pin(hook(client, code, reason))
        }));
        self
    }
}

impl std::fmt::Debug for InterfaceHooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InterfaceHooks")
            .field("open", &self.open.is_some())
            .field("message", &self.message.is_some())
            .field("close", &self.close.is_some())
            .finish()
    }
}

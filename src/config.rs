//! Hub configuration

use crate::channel::Channel;
use crate::client::Client;
use crate::hooks::InterfaceHooks;
use crate::transport::Transport;
use crate::types::{ChannelId, EntityIdentity};
use std::collections::HashMap;
use std::sync::Arc;

/// Constructs client variants; receives the upgrade identity and the
/// connection transport
pub type ClientFactory =
    Arc<dyn Fn(EntityIdentity, Arc<dyn Transport>) -> Arc<Client> + Send + Sync>;

/// Constructs channel variants; receives `(id, name, limit)`
pub type ChannelFactory = Arc<dyn Fn(&str, &str, usize) -> Arc<Channel> + Send + Sync>;

/// Default member limit of the auto-created `"global"` channel
pub const DEFAULT_GLOBAL_CHANNEL_LIMIT: usize = 1000;

/// Hub construction options
#[derive(Clone)]
pub struct HubConfig {
    /// Verbose lifecycle logging
    pub debug: bool,
    /// User callbacks composed with the default lifecycle handlers
    pub hooks: InterfaceHooks,
    /// Alternate client constructor
    pub client_factory: Option<ClientFactory>,
    /// Alternate channel constructor, also used for the global channel
    pub channel_factory: Option<ChannelFactory>,
    /// Pre-populated channel map used in lieu of the default bootstrap
    pub channels_seed: Option<HashMap<ChannelId, Arc<Channel>>>,
    /// Member limit of the auto-created `"global"` channel
    pub global_channel_limit: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            debug: false,
            hooks: InterfaceHooks::default(),
            client_factory: None,
            channel_factory: None,
            channels_seed: None,
            global_channel_limit: DEFAULT_GLOBAL_CHANNEL_LIMIT,
        }
    }
}

impl HubConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn with_hooks(mut self, hooks: InterfaceHooks) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn with_client_factory<F>(mut self, factory: F) -> Self
    where
        F: Fn(EntityIdentity, Arc<dyn Transport>) -> Arc<Client> + Send + Sync + 'static,
    {
        self.client_factory = Some(Arc::new(factory));
        self
    }

    pub fn with_channel_factory<F>(mut self, factory: F) -> Self
    where
        F: Fn(&str, &str, usize) -> Arc<Channel> + Send + Sync + 'static,
    {
        self.channel_factory = Some(Arc::new(factory));
        self
    }

    pub fn with_channels_seed(mut self, channels: HashMap<ChannelId, Arc<Channel>>) -> Self {
        self.channels_seed = Some(channels);
        self
    }

    pub fn with_global_channel_limit(mut self, limit: usize) -> Self {
        self.global_channel_limit = limit;
        self
    }
}

impl std::fmt::Debug for HubConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HubConfig")
            .field("debug", &self.debug)
            .field("hooks", &self.hooks)
            .field("client_factory", &self.client_factory.is_some())
            .field("channel_factory", &self.channel_factory.is_some())
            .field("channels_seed", &self.channels_seed.as_ref().map(|seed| seed.len()))
            .field("global_channel_limit", &self.global_channel_limit)
            .finish()
    }
}

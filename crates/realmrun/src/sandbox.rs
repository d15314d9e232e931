//! # Sandbox Host
//!
//! Pairs a [`HostDispatcher`] with a freshly created guest realm over an
//! in-process duplex channel.
//!
//! ```ignore
//! let host = SandboxHost::builder(api)
//!     .name("deck-stats")
//!     .pending_policy(PendingPolicy::Reject)
//!     .spawn(|ctx| async move {
//!         let total = ctx.api().call("countCards", vec![]).await?;
//!         Ok(())
//!     });
//!
//! let teardown = host.teardown_handle();
//! teardown.terminate();
//! ```

use std::future::Future;
use std::sync::Arc;

use realmrpc::ChannelConfig;
use realmrpc::DuplexChannel;
use realmrpc::Inbox;

use crate::api::ApiTable;
use crate::config::BridgeConfig;
use crate::config::PendingPolicy;
use crate::error::Result;
use crate::guest::GuestContext;
use crate::host::HostDispatcher;
use crate::realm::Realm;
use crate::realm::RealmView;
use crate::realm::script;
use crate::value::Value;

/// Fluent builder for a [`SandboxHost`].
pub struct SandboxBuilder {
    api: ApiTable,
    config: BridgeConfig,
    view: Option<Arc<dyn RealmView>>,
}

impl SandboxBuilder {
    pub fn new(api: ApiTable) -> Self {
        Self { api, config: BridgeConfig::default(), view: None }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.config.name = name.into();
        self
    }

    pub fn pending_policy(mut self, policy: PendingPolicy) -> Self {
        self.config.pending_policy = policy;
        self
    }

    pub fn channel(mut self, channel: ChannelConfig) -> Self {
        self.config.channel = channel;
        self
    }

    pub fn config(mut self, config: BridgeConfig) -> Self {
        self.config = config;
        self
    }

    pub fn view(mut self, view: impl RealmView) -> Self {
        self.view = Some(Arc::new(view));
        self
    }

    /// Creates the realm and starts `plugin` inside it.
    ///
    /// Must be called inside a tokio runtime.
    pub fn spawn<F, Fut>(self, plugin: F) -> SandboxHost
    where
        F: FnOnce(GuestContext) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let (host_end, guest_end) = DuplexChannel::pair_with(self.config.channel.clone());
        let inbox = host_end.inbox();

        let dispatcher = HostDispatcher::attach(self.api, host_end, &self.config);
        let realm = Realm::spawn(&self.config.name, guest_end, script(plugin), self.view);

        SandboxHost { dispatcher, realm, inbox }
    }
}

/// A running plugin: the host dispatcher plus the realm it serves.
///
/// Dropping the host unloads the plugin, even while [`Teardown`] handles or
/// dispatcher clones are still around.
pub struct SandboxHost {
    dispatcher: HostDispatcher,
    realm: Arc<Realm>,
    inbox: Inbox,
}

impl SandboxHost {
    pub fn builder(api: ApiTable) -> SandboxBuilder {
        SandboxBuilder::new(api)
    }

    /// Spawns `plugin` with the default configuration.
    pub fn spawn<F, Fut>(api: ApiTable, plugin: F) -> Self
    where
        F: FnOnce(GuestContext) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        SandboxBuilder::new(api).spawn(plugin)
    }

    pub fn dispatcher(&self) -> &HostDispatcher {
        &self.dispatcher
    }

    pub async fn execute_code(&self, code: impl Into<String>) -> Result<Value> {
        self.dispatcher.execute_code(code).await
    }

    /// The host window's message queue, open to any sender.
    pub fn inbox(&self) -> Inbox {
        self.inbox.clone()
    }

    pub fn instance_count(&self) -> usize {
        self.dispatcher.instance_count()
    }

    /// Callbacks the guest currently has registered.
    pub fn guest_callback_count(&self) -> usize {
        self.realm.callback_count()
    }

    pub fn teardown_handle(&self) -> Teardown {
        Teardown { dispatcher: self.dispatcher.clone(), realm: self.realm.clone() }
    }

    pub fn terminate(&self) {
        self.teardown_handle().terminate();
    }
}

impl Drop for SandboxHost {
    fn drop(&mut self) {
        self.terminate();
    }
}

/// Destroys a sandbox from anywhere, including from inside a host method.
#[derive(Clone)]
pub struct Teardown {
    dispatcher: HostDispatcher,
    realm: Arc<Realm>,
}

impl Teardown {
    /// Removes the listener, destroys the realm and clears every registry.
    /// Calling it again does nothing.
    pub fn terminate(&self) {
        self.dispatcher.terminate_with(|| self.realm.destroy());
    }

    pub fn is_terminated(&self) -> bool {
        self.dispatcher.is_terminated()
    }
}

//! # Guest realm
//!
//! The isolated side of a sandbox: a set of tasks that share nothing with the
//! host except one end of a message channel. Creating a realm installs the
//! guest pump first, then performs the handshake, then runs the plugin
//! script with the resulting [`GuestContext`].

use std::future::Future;
use std::sync::Arc;
use std::sync::Mutex;

use futures::future::BoxFuture;
use tokio::task::AbortHandle;
use tracing::debug;
use tracing::warn;

use realmrpc::Transport;

use crate::guest::GuestApi;
use crate::guest::GuestContext;
use crate::guest::GuestShared;
use crate::pump;

/// Plugin code run inside the realm once the API is ready.
pub type Script = Box<dyn FnOnce(GuestContext) -> BoxFuture<'static, anyhow::Result<()>> + Send>;

/// Boxes an async closure into a [`Script`].
pub fn script<F, Fut>(f: F) -> Script
where
    F: FnOnce(GuestContext) -> Fut + Send + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Box::new(move |ctx| Box::pin(f(ctx)))
}

/// Whatever the realm draws into. Attached when the realm is created and
/// detached when it is destroyed.
pub trait RealmView: Send + Sync + 'static {
    fn attach(&self, name: &str);
    fn detach(&self);
}

pub(crate) struct Realm {
    name: String,
    guest: Arc<GuestShared>,
    tasks: Mutex<Vec<AbortHandle>>,
    view: Option<Arc<dyn RealmView>>,
}

impl Realm {
    pub(crate) fn spawn(
        name: &str,
        transport: impl Transport,
        script: Script,
        view: Option<Arc<dyn RealmView>>,
    ) -> Arc<Self> {
        if let Some(view) = &view {
            view.attach(name);
        }

        let guest = GuestShared::new(name, transport);
        let pump = tokio::spawn(pump::run(guest.clone()));

        let bridge = guest.clone();
        let label = name.to_string();
        let main = tokio::spawn(async move {
            let api = match GuestApi::connect(&bridge).await {
                Ok(api) => api,
                Err(e) => {
                    warn!(bridge = %label, error = %e, "guest bridge failed to start");
                    return;
                }
            };
            if let Err(e) = script(GuestContext::new(bridge, api)).await {
                warn!(bridge = %label, error = %format!("{:#}", e), "plugin script failed");
            }
        });

        debug!(bridge = %name, "realm created");
        Arc::new(Self {
            name: name.to_string(),
            guest,
            tasks: Mutex::new(vec![pump.abort_handle(), main.abort_handle()]),
            view,
        })
    }

    /// Stops every realm task and drops what the realm holds.
    pub(crate) fn destroy(&self) {
        let tasks = std::mem::take(&mut *self.tasks.lock().unwrap_or_else(|e| e.into_inner()));
        for task in tasks {
            task.abort();
        }
        self.guest.clear();
        if let Some(view) = &self.view {
            view.detach();
        }
        debug!(bridge = %self.name, "realm destroyed");
    }

    pub(crate) fn callback_count(&self) -> usize {
        self.guest.callback_count()
    }
}

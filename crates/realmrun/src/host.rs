//! # Host Dispatcher
//!
//! Serves the guest's requests against an [`ApiTable`] and the capabilities
//! handed out so far, and runs the reverse direction: invoking guest
//! callbacks and evaluating code in the guest.
//!
//! ## Request handling
//!
//! Lookups and argument decoding happen as soon as a message is read, in
//! arrival order. Only execution is deferred to a concurrent future, so a
//! `RELEASE_INSTANCE` that follows a `CALL_INSTANCE` can never overtake it.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::Weak;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use futures::future::BoxFuture;
use tokio::task::AbortHandle;
use tracing::debug;
use tracing::trace;

use realmrpc::Message;
use realmrpc::RefId;
use realmrpc::Reply;
use realmrpc::ReqId;
use realmrpc::Transport;

use crate::api::ApiTable;
use crate::api::HANDSHAKE_METHOD;
use crate::api::LEGACY_NAMES_METHOD;
use crate::capability::Capability;
use crate::config::BridgeConfig;
use crate::config::PendingPolicy;
use crate::error::Error;
use crate::error::Result;
use crate::function::CallbackInvoker;
use crate::function::Function;
use crate::guest::RemoteObject;
use crate::marshal;
use crate::marshal::Direction;
use crate::marshal::Marshaler;
use crate::pump;
use crate::pump::Dispatch;
use crate::registry::InstanceRegistry;
use crate::registry::Pending;
use crate::value::Value;

type Call = BoxFuture<'static, anyhow::Result<Value>>;

pub(crate) struct HostShared {
    name: String,
    api: ApiTable,
    transport: Arc<dyn Transport>,
    instances: InstanceRegistry,
    pending: Pending,
    policy: PendingPolicy,
    terminated: AtomicBool,
    pump: Mutex<Option<AbortHandle>>,
    this: Weak<HostShared>,
}

impl HostShared {
    fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }

    /// Sends a request to the guest and waits for its reply.
    async fn request(&self, make: impl FnOnce(ReqId) -> Message) -> Result<Value> {
        if self.is_terminated() {
            return Err(Error::Terminated);
        }
        let (req_id, rx) = self.pending.register();
        // Teardown may have cleared the map before the insert landed.
        if self.is_terminated() {
            self.pending.forget(req_id);
            return Err(Error::Terminated);
        }

        let message = make(req_id);
        trace!(bridge = %self.name, req_id = %req_id, kind = %message.msg_type(), "sending request");
        let transfer = pump::transfer_list(&*self.transport, &message);
        if let Err(e) = self.transport.post(message, transfer).await {
            self.pending.forget(req_id);
            return Err(e.into());
        }

        let reply = match rx.await {
            Ok(reply) => reply,
            Err(_) => match self.policy {
                PendingPolicy::Reject => return Err(Error::Terminated),
                PendingPolicy::Abandon => futures::future::pending().await,
            },
        };

        match reply {
            Ok(wire) => marshal::decode(self, wire),
            Err(msg) => Err(Error::Remote(msg)),
        }
    }

    fn serve_root(bridge: &Arc<Self>, req_id: ReqId, method: String, args: Vec<realmrpc::Value>) -> BoxFuture<'static, ()> {
        debug!(bridge = %bridge.name, req_id = %req_id, method = %method, "root call");
        let call: Result<Call> = match method.as_str() {
            HANDSHAKE_METHOD => {
                let handshake = bridge.api.handshake().to_value();
                Ok(Box::pin(async move { Ok(handshake) }))
            }
            LEGACY_NAMES_METHOD => {
                let names = bridge.api.legacy_names().into_iter().map(Value::from).collect();
                Ok(Box::pin(async move { Ok(Value::Array(names)) }))
            }
            _ => match bridge.api.get(&method) {
                Some(f) => marshal::decode_all(&**bridge, args).map(|args| f(args)),
                None => Err(Error::UnknownMethod(method)),
            },
        };
        Self::respond(bridge, req_id, call)
    }

    fn serve_instance(
        bridge: &Arc<Self>,
        req_id: ReqId,
        id: RefId,
        method: String,
        args: Vec<realmrpc::Value>,
    ) -> BoxFuture<'static, ()> {
        debug!(bridge = %bridge.name, req_id = %req_id, id = %id, method = %method, "instance call");
        let call: Result<Call> = match bridge.instances.get(id) {
            None => Err(Error::Local(format!("Instance {} not found or released", id.0))),
            Some(capability) if !capability.has_method(&method) => {
                Err(Error::Local(format!("Method {} missing on instance", method)))
            }
            Some(capability) => marshal::decode_all(&**bridge, args)
                .map(|args| -> Call { Box::pin(async move { capability.invoke(&method, args).await }) }),
        };
        Self::respond(bridge, req_id, call)
    }

    fn respond(bridge: &Arc<Self>, req_id: ReqId, call: Result<Call>) -> BoxFuture<'static, ()> {
        let bridge = bridge.clone();
        Box::pin(async move {
            let reply: Reply = match call {
                Ok(call) => match call.await {
                    Ok(value) => marshal::encode(&*bridge, value, Direction::Result).map_err(|e| e.to_string()),
                    Err(e) => Err(e.to_string()),
                },
                Err(e) => Err(e.to_string()),
            };
            if bridge.is_terminated() {
                return;
            }
            pump::post_reply(&*bridge.transport, &bridge.name, req_id, reply, |req_id, reply| Message::Response {
                req_id,
                reply,
            })
            .await;
        })
    }

    /// Stops the listener, runs `destroy_realm`, then drops every registry
    /// entry. Only the first call does anything.
    fn terminate(&self, destroy_realm: impl FnOnce()) -> bool {
        if self.terminated.swap(true, Ordering::SeqCst) {
            return false;
        }
        let pump = self.pump.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(pump) = pump {
            pump.abort();
        }
        destroy_realm();
        self.instances.clear();
        // Dropping the senders settles every waiter per the pending policy.
        self.pending.clear();
        debug!(bridge = %self.name, "bridge terminated");
        true
    }
}

impl Dispatch for HostShared {
    fn label(&self) -> &str {
        &self.name
    }

    fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    fn dispatch(bridge: &Arc<Self>, message: Message) -> Option<BoxFuture<'static, ()>> {
        if bridge.is_terminated() {
            return None;
        }
        match message {
            Message::CallRoot { req_id, method, args } => Some(Self::serve_root(bridge, req_id, method, args)),
            Message::CallInstance { req_id, id, method, args } => {
                Some(Self::serve_instance(bridge, req_id, id, method, args))
            }
            Message::CallbackReturn { req_id, reply } | Message::ExecResult { req_id, reply } => {
                if !bridge.pending.settle(req_id, reply) {
                    trace!(bridge = %bridge.name, req_id = %req_id, "reply for unknown request");
                }
                None
            }
            Message::ReleaseInstance { id } => {
                let released = bridge.instances.release(id);
                debug!(bridge = %bridge.name, id = %id, released, "release instance");
                None
            }
            other => {
                trace!(bridge = %bridge.name, kind = %other.msg_type(), "ignoring message not meant for the host");
                None
            }
        }
    }
}

#[async_trait::async_trait]
impl CallbackInvoker for HostShared {
    async fn invoke_callback(&self, id: RefId, args: Vec<Value>) -> Result<Value> {
        let args = marshal::encode_all(self, args, Direction::Argument)?;
        self.request(|req_id| Message::InvokeCallback { req_id, id, args }).await
    }
}

impl Marshaler for HostShared {
    fn export_capability(&self, capability: &Capability) -> Result<RefId> {
        Ok(self.instances.register(capability.clone()))
    }

    fn export_remote(&self, remote: &RemoteObject) -> Result<RefId> {
        Err(Error::Unserializable(format!("guest proxy {} has no meaning on the host", remote.id())))
    }

    fn export_function(&self, function: &Function, _direction: Direction) -> Result<RefId> {
        function.callback_id().ok_or_else(|| {
            Error::Unserializable("host functions cannot cross into the guest; wrap them in a Capability".into())
        })
    }

    fn import_remote(&self, id: RefId) -> Result<Value> {
        self.instances
            .get(id)
            .map(Value::Capability)
            .ok_or_else(|| Error::Local(format!("Instance {} not found or released", id.0)))
    }

    fn import_callback(&self, id: RefId) -> Result<Value> {
        let invoker: Weak<dyn CallbackInvoker> = self.this.clone();
        Ok(Value::Function(Function::callback(id, invoker)))
    }
}

/// Host end of a bridge, serving one guest over one transport.
#[derive(Clone)]
pub struct HostDispatcher {
    shared: Arc<HostShared>,
}

impl HostDispatcher {
    /// Starts serving `api` to whatever is on the other end of `transport`.
    ///
    /// Must be called inside a tokio runtime.
    pub fn attach(api: ApiTable, transport: impl Transport, config: &BridgeConfig) -> Self {
        let transport: Arc<dyn Transport> = Arc::new(transport);
        let shared = Arc::new_cyclic(|this| HostShared {
            name: config.name.clone(),
            api,
            transport,
            instances: InstanceRegistry::new(),
            pending: Pending::new(),
            policy: config.pending_policy,
            terminated: AtomicBool::new(false),
            pump: Mutex::new(None),
            this: this.clone(),
        });

        let task = tokio::spawn(pump::run(shared.clone()));
        *shared.pump.lock().unwrap_or_else(|e| e.into_inner()) = Some(task.abort_handle());
        debug!(bridge = %shared.name, "host dispatcher attached");

        Self { shared }
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Evaluates `code` with the guest's installed evaluator.
    pub async fn execute_code(&self, code: impl Into<String>) -> Result<Value> {
        let code = code.into();
        self.shared.request(|req_id| Message::ExecuteCode { req_id, code }).await
    }

    /// Capabilities currently reachable by the guest.
    pub fn instance_count(&self) -> usize {
        self.shared.instances.len()
    }

    /// Requests to the guest still waiting for a reply.
    pub fn pending_count(&self) -> usize {
        self.shared.pending.len()
    }

    pub fn is_terminated(&self) -> bool {
        self.shared.is_terminated()
    }

    /// Stops serving and clears all state. Idempotent.
    pub fn terminate(&self) {
        self.shared.terminate(|| {});
    }

    pub(crate) fn terminate_with(&self, destroy_realm: impl FnOnce()) -> bool {
        self.shared.terminate(destroy_realm)
    }
}

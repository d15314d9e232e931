//! # Guest Bridge
//!
//! The plugin's side of the boundary. A plugin never sees a host object; it
//! sees:
//!
//! - [`GuestApi`]: one [`MethodStub`] per method the host declared in the
//!   handshake, plus the host's constants and alias [`Namespace`]s.
//! - [`RemoteObject`]: a proxy for a capability the host returned. Any method
//!   name may be called on it; the host decides whether it exists.
//! - [`Function`]s it passes to the host, which are registered as callbacks
//!   and invoked by id.
//!
//! The pump answers `INVOKE_CALLBACK` and `EXECUTE_CODE` and settles
//! responses to the plugin's own calls.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::RwLock;
use std::sync::Weak;

use dashmap::DashMap;
use futures::future::BoxFuture;
use tracing::debug;
use tracing::trace;

use realmrpc::Message;
use realmrpc::RefId;
use realmrpc::Reply;
use realmrpc::ReqId;
use realmrpc::Transport;

use crate::api::HANDSHAKE_METHOD;
use crate::api::Handshake;
use crate::api::LEGACY_NAMES_METHOD;
use crate::capability::Capability;
use crate::error::Error;
use crate::error::Result;
use crate::function::Function;
use crate::marshal;
use crate::marshal::Direction;
use crate::marshal::Marshaler;
use crate::pump;
use crate::pump::Dispatch;
use crate::registry::CallbackRegistry;
use crate::registry::Pending;
use crate::value::Value;

type Wire = realmrpc::Value;

/// Runs code sent by the host with `EXECUTE_CODE`.
#[async_trait::async_trait]
pub trait Evaluator: Send + Sync + 'static {
    async fn evaluate(&self, code: &str) -> anyhow::Result<Value>;
}

struct FnEvaluator<F>(F);

#[async_trait::async_trait]
impl<F, Fut> Evaluator for FnEvaluator<F>
where
    F: Fn(String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
{
    async fn evaluate(&self, code: &str) -> anyhow::Result<Value> {
        (self.0)(code.to_string()).await
    }
}

/// Wraps an async closure as an [`Evaluator`].
pub fn evaluator_fn<F, Fut>(f: F) -> impl Evaluator
where
    F: Fn(String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
{
    FnEvaluator(f)
}

pub(crate) struct GuestShared {
    name: String,
    transport: Arc<dyn Transport>,
    callbacks: CallbackRegistry,
    pending: Pending,
    proxies: DashMap<RefId, RemoteObject>,
    evaluator: RwLock<Option<Arc<dyn Evaluator>>>,
    this: Weak<GuestShared>,
}

impl GuestShared {
    pub(crate) fn new(name: impl Into<String>, transport: impl Transport) -> Arc<Self> {
        let transport: Arc<dyn Transport> = Arc::new(transport);
        Arc::new_cyclic(|this| Self {
            name: name.into(),
            transport,
            callbacks: CallbackRegistry::new(),
            pending: Pending::new(),
            proxies: DashMap::new(),
            evaluator: RwLock::new(None),
            this: this.clone(),
        })
    }

    async fn request(&self, args: Vec<Value>, make: impl FnOnce(ReqId, Vec<Wire>) -> Message) -> Result<Value> {
        let (args, staged) = self.stage(args)?;
        let (req_id, rx) = self.pending.register();
        let message = make(req_id, args);
        trace!(bridge = %self.name, req_id = %req_id, kind = %message.msg_type(), "sending request");

        let transfer = pump::transfer_list(&*self.transport, &message);
        if let Err(e) = self.transport.post(message, transfer).await {
            self.pending.forget(req_id);
            self.unstage(&staged);
            return Err(e.into());
        }

        match rx.await.map_err(|_| Error::Terminated)? {
            Ok(wire) => marshal::decode(self, wire),
            Err(msg) => Err(Error::Remote(msg)),
        }
    }

    /// Encodes call arguments, returning the callback ids registered for
    /// them. Nothing stays registered if encoding fails.
    fn stage(&self, args: Vec<Value>) -> Result<(Vec<Wire>, Vec<RefId>)> {
        let staging = Staging { bridge: self, registered: Mutex::new(Vec::new()) };
        let encoded = marshal::encode_all(&staging, args, Direction::Argument);
        let registered = staging.registered.into_inner().unwrap_or_else(|e| e.into_inner());
        match encoded {
            Ok(args) => Ok((args, registered)),
            Err(e) => {
                self.unstage(&registered);
                Err(e)
            }
        }
    }

    /// Drops callbacks the host never learned about.
    fn unstage(&self, registered: &[RefId]) {
        for id in registered {
            self.callbacks.release(*id);
        }
        if !registered.is_empty() {
            trace!(bridge = %self.name, count = registered.len(), "dropped callbacks of an unsent request");
        }
    }

    async fn call_root(&self, method: &str, args: Vec<Value>) -> Result<Value> {
        let method = method.to_string();
        self.request(args, |req_id, args| Message::CallRoot { req_id, method, args }).await
    }

    fn set_evaluator(&self, evaluator: Arc<dyn Evaluator>) {
        *self.evaluator.write().unwrap_or_else(|e| e.into_inner()) = Some(evaluator);
    }

    fn evaluator(&self) -> Option<Arc<dyn Evaluator>> {
        self.evaluator.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub(crate) fn callback_count(&self) -> usize {
        self.callbacks.len()
    }

    /// Drops everything the realm holds for the host.
    pub(crate) fn clear(&self) {
        self.callbacks.clear();
        self.pending.clear();
        self.proxies.clear();
        *self.evaluator.write().unwrap_or_else(|e| e.into_inner()) = None;
    }

    fn serve_callback(bridge: &Arc<Self>, req_id: ReqId, id: RefId, args: Vec<Wire>) -> BoxFuture<'static, ()> {
        debug!(bridge = %bridge.name, req_id = %req_id, id = %id, "invoke callback");
        let call = match bridge.callbacks.get(id) {
            None => Err(format!("Callback {} not found or released", id.0)),
            Some(function) => marshal::decode_all(&**bridge, args)
                .map(|args| async move { function.call(args).await })
                .map_err(|e| e.to_string()),
        };

        let bridge = bridge.clone();
        Box::pin(async move {
            let reply: Reply = match call {
                Ok(call) => match call.await {
                    Ok(value) => marshal::encode(&*bridge, value, Direction::Result).map_err(|e| e.to_string()),
                    Err(e) => Err(e.to_string()),
                },
                Err(msg) => Err(msg),
            };
            pump::post_reply(&*bridge.transport, &bridge.name, req_id, reply, |req_id, reply| {
                Message::CallbackReturn { req_id, reply }
            })
            .await;
        })
    }

    fn serve_exec(bridge: &Arc<Self>, req_id: ReqId, code: String) -> BoxFuture<'static, ()> {
        debug!(bridge = %bridge.name, req_id = %req_id, "execute code");
        let evaluator = bridge.evaluator();
        let bridge = bridge.clone();
        Box::pin(async move {
            let reply: Reply = match evaluator {
                None => Err("No evaluator installed".to_string()),
                Some(evaluator) => match evaluator.evaluate(&code).await {
                    Ok(value) => marshal::encode(&*bridge, value, Direction::Argument).map_err(|e| e.to_string()),
                    Err(e) => Err(e.to_string()),
                },
            };
            pump::post_reply(&*bridge.transport, &bridge.name, req_id, reply, |req_id, reply| {
                Message::ExecResult { req_id, reply }
            })
            .await;
        })
    }
}

impl Dispatch for GuestShared {
    fn label(&self) -> &str {
        &self.name
    }

    fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    fn dispatch(bridge: &Arc<Self>, message: Message) -> Option<BoxFuture<'static, ()>> {
        match message {
            Message::Response { req_id, reply } => {
                if !bridge.pending.settle(req_id, reply) {
                    trace!(bridge = %bridge.name, req_id = %req_id, "response for unknown request");
                }
                None
            }
            Message::InvokeCallback { req_id, id, args } => Some(Self::serve_callback(bridge, req_id, id, args)),
            Message::ExecuteCode { req_id, code } => Some(Self::serve_exec(bridge, req_id, code)),
            other => {
                trace!(bridge = %bridge.name, kind = %other.msg_type(), "ignoring message not meant for the guest");
                None
            }
        }
    }
}

impl Marshaler for GuestShared {
    fn export_capability(&self, _capability: &Capability) -> Result<RefId> {
        Err(Error::Unserializable("capabilities can only be handed out by the host".into()))
    }

    fn export_remote(&self, remote: &RemoteObject) -> Result<RefId> {
        Ok(remote.id())
    }

    fn export_function(&self, function: &Function, direction: Direction) -> Result<RefId> {
        match direction {
            Direction::Argument => Ok(self.callbacks.register(function.clone())),
            Direction::Result => Err(Error::Unserializable("a function cannot be returned to the host".into())),
        }
    }

    fn import_remote(&self, id: RefId) -> Result<Value> {
        let proxy = self
            .proxies
            .entry(id)
            .or_insert_with(|| RemoteObject::new(id, self.this.clone()))
            .clone();
        Ok(Value::Remote(proxy))
    }

    fn import_callback(&self, id: RefId) -> Result<Value> {
        self.callbacks
            .get(id)
            .map(Value::Function)
            .ok_or_else(|| Error::Local(format!("Callback {} not found or released", id.0)))
    }
}

/// Guest marshalling that remembers which callbacks it registered.
struct Staging<'a> {
    bridge: &'a GuestShared,
    registered: Mutex<Vec<RefId>>,
}

impl Marshaler for Staging<'_> {
    fn export_capability(&self, capability: &Capability) -> Result<RefId> {
        self.bridge.export_capability(capability)
    }

    fn export_remote(&self, remote: &RemoteObject) -> Result<RefId> {
        self.bridge.export_remote(remote)
    }

    fn export_function(&self, function: &Function, direction: Direction) -> Result<RefId> {
        let id = self.bridge.export_function(function, direction)?;
        self.registered.lock().unwrap_or_else(|e| e.into_inner()).push(id);
        Ok(id)
    }

    fn import_remote(&self, id: RefId) -> Result<Value> {
        self.bridge.import_remote(id)
    }

    fn import_callback(&self, id: RefId) -> Result<Value> {
        self.bridge.import_callback(id)
    }
}

fn upgrade(bridge: &Weak<GuestShared>) -> Result<Arc<GuestShared>> {
    bridge.upgrade().ok_or(Error::Terminated)
}

/// The guest's handle to a host capability.
///
/// Receiving the same remote id twice yields the same proxy.
#[derive(Clone)]
pub struct RemoteObject {
    inner: Arc<RemoteInner>,
}

struct RemoteInner {
    id: RefId,
    bridge: Weak<GuestShared>,
}

impl RemoteObject {
    fn new(id: RefId, bridge: Weak<GuestShared>) -> Self {
        Self { inner: Arc::new(RemoteInner { id, bridge }) }
    }

    pub fn id(&self) -> RefId {
        self.inner.id
    }

    /// Calls `method` on the host object.
    pub async fn call(&self, method: &str, args: Vec<Value>) -> Result<Value> {
        let bridge = upgrade(&self.inner.bridge)?;
        let id = self.inner.id;
        let method = method.to_string();
        bridge
            .request(args, |req_id, args| Message::CallInstance { req_id, id, method, args })
            .await
    }

    /// Tells the host to forget the object. Later calls fail as not found.
    pub async fn release(&self) -> Result<()> {
        let bridge = upgrade(&self.inner.bridge)?;
        bridge.proxies.remove(&self.inner.id);
        bridge
            .transport
            .post(Message::ReleaseInstance { id: self.inner.id }, Vec::new())
            .await?;
        Ok(())
    }

    pub fn ptr_eq(&self, other: &RemoteObject) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl std::fmt::Debug for RemoteObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "RemoteObject({})", self.inner.id)
    }
}

/// Calls one root method of the host API.
#[derive(Clone)]
pub struct MethodStub {
    method: String,
    bridge: Weak<GuestShared>,
}

impl MethodStub {
    /// The root method this stub calls.
    pub fn method(&self) -> &str {
        &self.method
    }

    pub async fn call(&self, args: Vec<Value>) -> Result<Value> {
        upgrade(&self.bridge)?.call_root(&self.method, args).await
    }

    /// The stub as a plain function value.
    pub fn to_function(&self) -> Function {
        let stub = self.clone();
        Function::new(move |args| {
            let stub = stub.clone();
            async move { Ok(stub.call(args).await?) }
        })
    }
}

/// An alias group: `namespace.prop` stubs for root methods.
#[derive(Clone)]
pub struct Namespace {
    name: String,
    members: BTreeMap<String, MethodStub>,
}

impl Namespace {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn get(&self, prop: &str) -> Option<&MethodStub> {
        self.members.get(prop)
    }

    pub async fn call(&self, prop: &str, args: Vec<Value>) -> Result<Value> {
        match self.members.get(prop) {
            Some(stub) => stub.call(args).await,
            None => Err(Error::UnknownMethod(format!("{}.{}", self.name, prop))),
        }
    }

    pub fn props(&self) -> impl Iterator<Item = &str> {
        self.members.keys().map(String::as_str)
    }
}

/// The host API as the plugin sees it.
#[derive(Clone)]
pub struct GuestApi {
    methods: BTreeMap<String, MethodStub>,
    constants: BTreeMap<String, Value>,
    namespaces: BTreeMap<String, Namespace>,
}

impl GuestApi {
    pub(crate) async fn connect(bridge: &Arc<GuestShared>) -> Result<Self> {
        let value = match bridge.call_root(HANDSHAKE_METHOD, Vec::new()).await {
            Ok(value) => value,
            Err(Error::Terminated) => return Err(Error::Terminated),
            Err(e) => return Err(Error::Handshake(e.to_string())),
        };
        let handshake = Handshake::from_value(value)?;
        debug!(bridge = %bridge.name, methods = handshake.methods.len(), "handshake complete");

        let stub = |method: String| MethodStub { method, bridge: Arc::downgrade(bridge) };
        let methods = handshake.methods.into_iter().map(|m| (m.clone(), stub(m))).collect();
        let namespaces = handshake
            .aliases
            .into_iter()
            .map(|(ns, props)| {
                let members = props.into_iter().map(|(prop, method)| (prop, stub(method))).collect();
                (ns.clone(), Namespace { name: ns, members })
            })
            .collect();

        Ok(Self { methods, constants: handshake.constants, namespaces })
    }

    /// The stub for `name`, if the host declared it.
    pub fn method(&self, name: &str) -> Result<&MethodStub> {
        self.methods.get(name).ok_or_else(|| Error::UnknownMethod(name.to_string()))
    }

    pub fn has_method(&self, name: &str) -> bool {
        self.methods.contains_key(name)
    }

    pub async fn call(&self, name: &str, args: Vec<Value>) -> Result<Value> {
        self.method(name)?.call(args).await
    }

    pub fn constant(&self, name: &str) -> Option<&Value> {
        self.constants.get(name)
    }

    pub fn namespace(&self, name: &str) -> Option<&Namespace> {
        self.namespaces.get(name)
    }

    pub fn method_names(&self) -> impl Iterator<Item = &str> {
        self.methods.keys().map(String::as_str)
    }
}

/// Names visible to every piece of plugin code in the realm.
#[derive(Default)]
pub struct GlobalScope {
    entries: RwLock<BTreeMap<String, Value>>,
}

impl GlobalScope {
    pub fn get(&self, name: &str) -> Option<Value> {
        self.entries.read().unwrap_or_else(|e| e.into_inner()).get(name).cloned()
    }

    pub fn set(&self, name: impl Into<String>, value: impl Into<Value>) {
        self.entries
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(name.into(), value.into());
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.read().unwrap_or_else(|e| e.into_inner()).contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.entries.read().unwrap_or_else(|e| e.into_inner()).keys().cloned().collect()
    }
}

/// What a plugin script is given to work with.
#[derive(Clone)]
pub struct GuestContext {
    bridge: Arc<GuestShared>,
    api: GuestApi,
    globals: Arc<GlobalScope>,
}

impl GuestContext {
    pub(crate) fn new(bridge: Arc<GuestShared>, api: GuestApi) -> Self {
        Self { bridge, api, globals: Arc::new(GlobalScope::default()) }
    }

    pub fn api(&self) -> &GuestApi {
        &self.api
    }

    pub fn globals(&self) -> &GlobalScope {
        &self.globals
    }

    /// Installs the handler for code the host asks the realm to run.
    pub fn set_evaluator(&self, evaluator: impl Evaluator) {
        self.bridge.set_evaluator(Arc::new(evaluator));
    }

    /// Copies the host's legacy names into [`GlobalScope`]: methods as
    /// functions, constants as values. Returns how many were installed.
    pub async fn init_old_api_global(&self) -> Result<usize> {
        let names = match self.bridge.call_root(LEGACY_NAMES_METHOD, Vec::new()).await? {
            Value::Array(names) => names,
            other => return Err(Error::Remote(format!("legacy names are {}", other.type_name()))),
        };

        let mut installed = 0;
        for name in names.iter().filter_map(Value::as_str) {
            if let Ok(stub) = self.api.method(name) {
                self.globals.set(name, stub.to_function());
            } else if let Some(constant) = self.api.constant(name) {
                self.globals.set(name, constant.clone());
            } else {
                continue;
            }
            installed += 1;
        }
        debug!(bridge = %self.bridge.name, installed, "legacy globals installed");
        Ok(installed)
    }
}

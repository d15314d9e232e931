//! # Functions
//!
//! A [`Function`] is either a closure living in this realm or, on the host, a
//! stub standing in for a callback the guest passed as an argument. Both are
//! called the same way; a stub call is one `INVOKE_CALLBACK` round trip.

use std::future::Future;
use std::sync::Arc;
use std::sync::Weak;

use futures::future::BoxFuture;
use realmrpc::RefId;

use crate::error::Error;
use crate::error::Result;
use crate::value::Value;

type LocalFn = Arc<dyn Fn(Vec<Value>) -> BoxFuture<'static, anyhow::Result<Value>> + Send + Sync>;

/// Performs callback round trips on behalf of stubs.
#[async_trait::async_trait]
pub(crate) trait CallbackInvoker: Send + Sync + 'static {
    async fn invoke_callback(&self, id: RefId, args: Vec<Value>) -> Result<Value>;
}

#[derive(Clone)]
pub struct Function {
    kind: Kind,
}

#[derive(Clone)]
enum Kind {
    Local(LocalFn),
    Callback { id: RefId, invoker: Weak<dyn CallbackInvoker> },
}

impl Function {
    /// Wraps an async closure.
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        Self { kind: Kind::Local(Arc::new(move |args| Box::pin(f(args)))) }
    }

    pub(crate) fn callback(id: RefId, invoker: Weak<dyn CallbackInvoker>) -> Self {
        Self { kind: Kind::Callback { id, invoker } }
    }

    /// The guest callback id, if this is a host-side stub.
    pub fn callback_id(&self) -> Option<RefId> {
        match &self.kind {
            Kind::Callback { id, .. } => Some(*id),
            Kind::Local(_) => None,
        }
    }

    pub async fn call(&self, args: Vec<Value>) -> Result<Value> {
        match &self.kind {
            Kind::Local(f) => f(args).await.map_err(|e| Error::Local(e.to_string())),
            Kind::Callback { id, invoker } => {
                let invoker = invoker.upgrade().ok_or(Error::Terminated)?;
                invoker.invoke_callback(*id, args).await
            }
        }
    }

    /// Identity: same closure, or stubs for the same callback id.
    pub fn ptr_eq(&self, other: &Function) -> bool {
        match (&self.kind, &other.kind) {
            (Kind::Local(a), Kind::Local(b)) => Arc::ptr_eq(a, b),
            (Kind::Callback { id: a, invoker: x }, Kind::Callback { id: b, invoker: y }) => {
                a == b && Weak::ptr_eq(x, y)
            }
            _ => false,
        }
    }
}

impl std::fmt::Debug for Function {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.kind {
            Kind::Local(_) => write!(f, "Function(local)"),
            Kind::Callback { id, .. } => write!(f, "Function(callback {})", id),
        }
    }
}

//! # Capabilities
//!
//! A capability is a host object the guest may drive by method name but never
//! hold. Wrapping an object in [`Capability`] is the explicit opt-in: only
//! values of that variant are registered and handed out as remote ids.

use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;

use crate::value::Value;

/// A type-erased async host function.
pub type HostFn = Arc<dyn Fn(Vec<Value>) -> BoxFuture<'static, anyhow::Result<Value>> + Send + Sync>;

/// Boxes a closure into a [`HostFn`].
pub fn host_fn<F, Fut>(f: F) -> HostFn
where
    F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
{
    Arc::new(move |args| Box::pin(f(args)))
}

/// An object whose methods can be invoked from the guest realm.
#[async_trait::async_trait]
pub trait Remotable: Send + Sync + 'static {
    /// Whether `method` exists. Checked before `invoke` so a miss is reported
    /// as a protocol error rather than as a thrown one.
    fn has_method(&self, method: &str) -> bool;

    async fn invoke(&self, method: &str, args: Vec<Value>) -> anyhow::Result<Value>;
}

/// Identity-carrying handle to a remotable host object.
#[derive(Clone)]
pub struct Capability {
    object: Arc<dyn Remotable>,
    any: Arc<dyn Any + Send + Sync>,
}

impl Capability {
    pub fn new<T: Remotable>(object: T) -> Self {
        Self::from_arc(Arc::new(object))
    }

    pub fn from_arc<T: Remotable>(object: Arc<T>) -> Self {
        Self { object: object.clone(), any: object }
    }

    pub fn has_method(&self, method: &str) -> bool {
        self.object.has_method(method)
    }

    pub async fn invoke(&self, method: &str, args: Vec<Value>) -> anyhow::Result<Value> {
        self.object.invoke(method, args).await
    }

    /// Recovers the concrete object, if it is a `T`.
    pub fn downcast<T: Remotable>(&self) -> Option<Arc<T>> {
        self.any.clone().downcast::<T>().ok()
    }

    /// True when both handles wrap the very same object.
    pub fn ptr_eq(&self, other: &Capability) -> bool {
        Arc::ptr_eq(&self.any, &other.any)
    }
}

impl std::fmt::Debug for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Capability({:p})", Arc::as_ptr(&self.any))
    }
}

/// A method table built from closures.
///
/// Serves as the body of ad-hoc capability objects and as the root table of
/// an [`ApiTable`](crate::api::ApiTable).
#[derive(Clone, Default)]
pub struct Methods {
    table: HashMap<String, HostFn>,
}

impl Methods {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn method<F, Fut>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        self.table.insert(name.into(), host_fn(f));
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, f: HostFn) {
        self.table.insert(name.into(), f);
    }

    pub fn get(&self, name: &str) -> Option<&HostFn> {
        self.table.get(name)
    }

    /// Method names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.table.keys().cloned().collect();
        names.sort();
        names
    }
}

#[async_trait::async_trait]
impl Remotable for Methods {
    fn has_method(&self, method: &str) -> bool {
        self.table.contains_key(method)
    }

    async fn invoke(&self, method: &str, args: Vec<Value>) -> anyhow::Result<Value> {
        let f = self
            .table
            .get(method)
            .ok_or_else(|| anyhow::anyhow!("Method {} missing on instance", method))?;
        f(args).await
    }
}

//! # realmrun
//!
//! Runtime for plugins sandboxed in an isolated realm.
//!
//! ## Architecture
//!
//! A [`SandboxHost`] owns two sides joined by a [`realmrpc::Transport`]:
//!
//! - [`HostDispatcher`]: serves the [`ApiTable`] and every [`Capability`]
//!   handed to the guest, invokes guest callbacks and evaluates guest code.
//! - The guest realm: its own pump plus the plugin script, which reaches the
//!   host only through [`GuestApi`], [`RemoteObject`]s and callbacks.
//!
//! Live values ([`Value`]) are marshalled to wire values at the boundary:
//! capabilities become remote ids, functions become callback ids. Each side
//! keeps its own registries, so any number of sandboxes can coexist.

pub mod api;
pub mod capability;
pub mod config;
pub mod error;
pub mod function;
pub mod guest;
pub mod host;
pub mod marshal;
pub mod realm;
pub mod registry;
pub mod sandbox;
pub mod value;

mod pump;

pub use api::ApiTable;
pub use api::Handshake;
pub use capability::Capability;
pub use capability::Methods;
pub use capability::Remotable;
pub use config::BridgeConfig;
pub use config::PendingPolicy;
pub use error::Error;
pub use error::Result;
pub use function::Function;
pub use guest::Evaluator;
pub use guest::GlobalScope;
pub use guest::GuestApi;
pub use guest::GuestContext;
pub use guest::MethodStub;
pub use guest::Namespace;
pub use guest::RemoteObject;
pub use guest::evaluator_fn;
pub use host::HostDispatcher;
pub use marshal::Direction;
pub use realm::RealmView;
pub use realm::Script;
pub use sandbox::SandboxBuilder;
pub use sandbox::SandboxHost;
pub use sandbox::Teardown;
pub use value::Value;

//! # realmrpc
//!
//! Wire layer for a bridge between a host and an isolated guest realm.
//!
//! ## Architecture
//!
//! Nothing live ever crosses the boundary. A [`Message`] carries only
//! [`Value`]s: plain data, binary payloads, and opaque [`RefId`]s standing in
//! for host objects and guest functions. Binary payloads found by
//! [`collect`] can be *transferred* (moved by ownership) instead of copied.
//!
//! ## Protocol
//!
//! - Call: `CALL_ROOT` / `CALL_INSTANCE` -> `RESPONSE`
//! - Callback: `INVOKE_CALLBACK` -> `CALLBACK_RETURN`
//! - Eval: `EXECUTE_CODE` -> `EXEC_RESULT`
//! - Release: `RELEASE_INSTANCE`, no reply
//!
//! Correlation is by [`ReqId`] only; replies may arrive in any order.

pub mod buffer;
pub mod channel;
pub mod clone;
pub mod collect;
pub mod message;
pub mod transport;
pub mod value;

pub use buffer::Bitmap;
pub use buffer::BitmapData;
pub use buffer::Buffer;
pub use buffer::BufferView;
pub use buffer::Transferable;
pub use channel::ChannelConfig;
pub use channel::DuplexChannel;
pub use channel::Inbox;
pub use clone::structured_clone;
pub use collect::collect;
pub use collect::collect_message;
pub use message::Message;
pub use message::MsgType;
pub use message::Reply;
pub use message::ReqId;
pub use transport::Envelope;
pub use transport::Origin;
pub use transport::Transport;
pub use value::RefId;
pub use value::Value;

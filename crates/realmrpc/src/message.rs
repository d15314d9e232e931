//! # Bridge messages
//!
//! The envelope vocabulary shared by both realms.
//!
//! - Call: `CALL_ROOT {reqId, method, args}` / `CALL_INSTANCE {reqId, id, method, args}` -> `RESPONSE`
//! - Callback: `INVOKE_CALLBACK {reqId, id, args}` -> `CALLBACK_RETURN`
//! - Release: `RELEASE_INSTANCE {id}`, fire-and-forget
//! - Eval: `EXECUTE_CODE {reqId, code}` -> `EXEC_RESULT`
//!
//! Every reply carries either a result or an error string. Errors are never
//! thrown objects; they are plain messages so they always survive a clone.

use std::fmt;

use crate::value::RefId;
use crate::value::Value;

/// Correlation id pairing a request with its reply.
#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct ReqId(pub u64);

impl fmt::Display for ReqId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "req-{}", self.0)
    }
}

/// The `result?` / `error?` pair of a reply.
pub type Reply = std::result::Result<Value, String>;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum MsgType {
    CallRoot,
    CallInstance,
    InvokeCallback,
    CallbackReturn,
    Response,
    ReleaseInstance,
    ExecuteCode,
    ExecResult,
}

impl MsgType {
    pub fn wire_name(self) -> &'static str {
        match self {
            Self::CallRoot => "CALL_ROOT",
            Self::CallInstance => "CALL_INSTANCE",
            Self::InvokeCallback => "INVOKE_CALLBACK",
            Self::CallbackReturn => "CALLBACK_RETURN",
            Self::Response => "RESPONSE",
            Self::ReleaseInstance => "RELEASE_INSTANCE",
            Self::ExecuteCode => "EXECUTE_CODE",
            Self::ExecResult => "EXEC_RESULT",
        }
    }
}

impl fmt::Display for MsgType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_name())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Message {
    CallRoot { req_id: ReqId, method: String, args: Vec<Value> },
    CallInstance { req_id: ReqId, id: RefId, method: String, args: Vec<Value> },
    InvokeCallback { req_id: ReqId, id: RefId, args: Vec<Value> },
    CallbackReturn { req_id: ReqId, reply: Reply },
    Response { req_id: ReqId, reply: Reply },
    ReleaseInstance { id: RefId },
    ExecuteCode { req_id: ReqId, code: String },
    ExecResult { req_id: ReqId, reply: Reply },
}

impl Message {
    pub fn msg_type(&self) -> MsgType {
        match self {
            Self::CallRoot { .. } => MsgType::CallRoot,
            Self::CallInstance { .. } => MsgType::CallInstance,
            Self::InvokeCallback { .. } => MsgType::InvokeCallback,
            Self::CallbackReturn { .. } => MsgType::CallbackReturn,
            Self::Response { .. } => MsgType::Response,
            Self::ReleaseInstance { .. } => MsgType::ReleaseInstance,
            Self::ExecuteCode { .. } => MsgType::ExecuteCode,
            Self::ExecResult { .. } => MsgType::ExecResult,
        }
    }

    /// The correlation id, absent only on `ReleaseInstance`.
    pub fn req_id(&self) -> Option<ReqId> {
        match self {
            Self::CallRoot { req_id, .. }
            | Self::CallInstance { req_id, .. }
            | Self::InvokeCallback { req_id, .. }
            | Self::CallbackReturn { req_id, .. }
            | Self::Response { req_id, .. }
            | Self::ExecuteCode { req_id, .. }
            | Self::ExecResult { req_id, .. } => Some(*req_id),
            Self::ReleaseInstance { .. } => None,
        }
    }

    /// All top-level values carried by this message, in order.
    pub fn values(&self) -> Vec<&Value> {
        match self {
            Self::CallRoot { args, .. }
            | Self::CallInstance { args, .. }
            | Self::InvokeCallback { args, .. } => args.iter().collect(),
            Self::CallbackReturn { reply, .. }
            | Self::Response { reply, .. }
            | Self::ExecResult { reply, .. } => reply.as_ref().ok().into_iter().collect(),
            Self::ReleaseInstance { .. } | Self::ExecuteCode { .. } => Vec::new(),
        }
    }

    /// Rebuilds the message with every carried value passed through `f`.
    pub fn try_map_values<E>(
        self,
        mut f: impl FnMut(Value) -> std::result::Result<Value, E>,
    ) -> std::result::Result<Self, E> {
        Ok(match self {
            Self::CallRoot { req_id, method, args } => {
                Self::CallRoot { req_id, method, args: map_args(args, &mut f)? }
            }
            Self::CallInstance { req_id, id, method, args } => {
                Self::CallInstance { req_id, id, method, args: map_args(args, &mut f)? }
            }
            Self::InvokeCallback { req_id, id, args } => {
                Self::InvokeCallback { req_id, id, args: map_args(args, &mut f)? }
            }
            Self::CallbackReturn { req_id, reply } => {
                Self::CallbackReturn { req_id, reply: map_reply(reply, &mut f)? }
            }
            Self::Response { req_id, reply } => {
                Self::Response { req_id, reply: map_reply(reply, &mut f)? }
            }
            Self::ExecResult { req_id, reply } => {
                Self::ExecResult { req_id, reply: map_reply(reply, &mut f)? }
            }
            other @ (Self::ReleaseInstance { .. } | Self::ExecuteCode { .. }) => other,
        })
    }
}

fn map_args<E>(
    args: Vec<Value>,
    f: &mut impl FnMut(Value) -> std::result::Result<Value, E>,
) -> std::result::Result<Vec<Value>, E> {
    args.into_iter().map(f).collect()
}

fn map_reply<E>(
    reply: Reply,
    f: &mut impl FnMut(Value) -> std::result::Result<Value, E>,
) -> std::result::Result<Reply, E> {
    match reply {
        Ok(value) => Ok(Ok(f(value)?)),
        Err(message) => Ok(Err(message)),
    }
}

//! # Message pump
//!
//! One task per side reads envelopes in arrival order and drives the handlers
//! they start concurrently, so a slow call never holds up the next message.
//! Envelopes whose source is not the peer are dropped before dispatch.

use std::sync::Arc;

use futures::StreamExt;
use futures::future::BoxFuture;
use futures::stream::FuturesUnordered;
use tracing::debug;
use tracing::trace;
use tracing::warn;

use realmrpc::Message;
use realmrpc::Reply;
use realmrpc::ReqId;
use realmrpc::Transferable;
use realmrpc::Transport;
use realmrpc::collect_message;

/// A bridge side the pump can feed.
pub(crate) trait Dispatch: Send + Sync + 'static {
    fn label(&self) -> &str;

    fn transport(&self) -> &Arc<dyn Transport>;

    /// Handles one message from the peer. Work that has to wait is returned
    /// as a future for the pump to drive.
    fn dispatch(bridge: &Arc<Self>, message: Message) -> Option<BoxFuture<'static, ()>>;
}

pub(crate) async fn run<D: Dispatch>(bridge: Arc<D>) {
    let transport = bridge.transport().clone();
    let peer = transport.peer_origin();
    let mut inflight = FuturesUnordered::new();

    loop {
        tokio::select! {
            received = transport.recv() => match received {
                Ok(Some(envelope)) => {
                    if envelope.source != peer {
                        trace!(bridge = %bridge.label(), source = %envelope.source, kind = %envelope.message.msg_type(), "dropping foreign message");
                        continue;
                    }
                    if let Some(task) = D::dispatch(&bridge, envelope.message) {
                        inflight.push(task);
                    }
                }
                Ok(None) => {
                    debug!(bridge = %bridge.label(), "channel closed, pump stopping");
                    break;
                }
                Err(e) => {
                    warn!(bridge = %bridge.label(), error = %e, "receive failed, pump stopping");
                    break;
                }
            },
            Some(()) = inflight.next(), if !inflight.is_empty() => {}
        }
    }
}

/// Binary payloads to move with `message`, when the transport can move them.
pub(crate) fn transfer_list(transport: &dyn Transport, message: &Message) -> Vec<Transferable> {
    if transport.supports_transfer() {
        collect_message(message)
    } else {
        Vec::new()
    }
}

/// Posts a reply. If the reply itself cannot be posted, posts a minimal error
/// reply in its place so the requester is not left waiting.
pub(crate) async fn post_reply(
    transport: &dyn Transport,
    label: &str,
    req_id: ReqId,
    reply: Reply,
    make: fn(ReqId, Reply) -> Message,
) {
    let message = make(req_id, reply);
    let transfer = transfer_list(transport, &message);
    let Err(e) = transport.post(message, transfer).await else {
        return;
    };

    warn!(bridge = %label, req_id = %req_id, error = %e, "failed to post reply, sending error instead");
    let fallback = make(req_id, Err(format!("Failed to post response: {}", e)));
    if let Err(e) = transport.post(fallback, Vec::new()).await {
        warn!(bridge = %label, req_id = %req_id, error = %e, "dropping reply");
    }
}

//! Protocol tests for the host dispatcher, with the test playing the guest.

use std::collections::BTreeMap;
use std::time::Duration;

use realmrpc::Buffer;
use realmrpc::DuplexChannel;
use realmrpc::Message;
use realmrpc::Origin;
use realmrpc::RefId;
use realmrpc::ReqId;
use realmrpc::Transferable;
use realmrpc::Transport;
use realmrun::ApiTable;
use realmrun::BridgeConfig;
use realmrun::Capability;
use realmrun::Function;
use realmrun::HostDispatcher;
use realmrun::Methods;
use realmrun::Value;

type Wire = realmrpc::Value;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn api() -> ApiTable {
    let counter = Capability::new(Methods::new().method("inc", |args: Vec<Value>| async move {
        Ok(Value::Number(args.first().and_then(Value::as_f64).unwrap_or(0.0) + 1.0))
    }));

    ApiTable::new()
        .method("echo", |args: Vec<Value>| async move { Ok(args.into_iter().next().unwrap_or(Value::Null)) })
        .method("counter", move |_| {
            let counter = counter.clone();
            async move { Ok(Value::Capability(counter)) }
        })
        .method("slow", |_| async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(Value::from("slow"))
        })
        .method("fail", |_| async { anyhow::bail!("deck is empty") })
        .method("apply", |args: Vec<Value>| async move {
            let mut args = args.into_iter();
            let Some(Value::Function(f)) = args.next() else { anyhow::bail!("expected a function") };
            Ok(f.call(args.collect()).await?)
        })
        .method("local", |_| async { Ok(Value::Function(Function::new(|_| async { Ok(Value::Null) }))) })
        .method("detached", |_| async {
            // Moving the buffer through another channel leaves this handle detached.
            let buffer = Buffer::new(vec![1, 2, 3]);
            let (elsewhere, _peer) = DuplexChannel::pair();
            let message = Message::Response { req_id: ReqId(0), reply: Ok(Wire::Buffer(buffer.clone())) };
            elsewhere.post(message, vec![Transferable::Buffer(buffer.clone())]).await?;
            Ok(Value::Buffer(buffer))
        })
        .constant("VERSION", "3.0")
        .alias("math", "inc", "echo")
        .legacy("echo")
}

/// The guest end of a dispatcher serving `api()`.
fn attach() -> (HostDispatcher, DuplexChannel) {
    let (host, guest) = DuplexChannel::pair();
    let dispatcher = HostDispatcher::attach(api(), host, &BridgeConfig::default());
    (dispatcher, guest)
}

async fn next(guest: &DuplexChannel) -> Message {
    tokio::time::timeout(Duration::from_secs(2), guest.recv())
        .await
        .expect("timed out waiting for the host")
        .expect("recv failed")
        .expect("channel closed")
        .message
}

async fn call_root(guest: &DuplexChannel, req: u64, method: &str, args: Vec<Wire>) -> realmrpc::Reply {
    let message = Message::CallRoot { req_id: ReqId(req), method: method.into(), args };
    guest.post(message, vec![]).await.unwrap();
    expect_response(guest, req).await
}

async fn call_instance(guest: &DuplexChannel, req: u64, id: RefId, method: &str, args: Vec<Wire>) -> realmrpc::Reply {
    let message = Message::CallInstance { req_id: ReqId(req), id, method: method.into(), args };
    guest.post(message, vec![]).await.unwrap();
    expect_response(guest, req).await
}

async fn expect_response(guest: &DuplexChannel, req: u64) -> realmrpc::Reply {
    match next(guest).await {
        Message::Response { req_id, reply } if req_id == ReqId(req) => reply,
        other => panic!("expected response to {}, got {:?}", req, other),
    }
}

#[tokio::test]
async fn test_handshake_describes_the_table() {
    init_tracing();
    let (_dispatcher, guest) = attach();

    let Ok(Wire::Object(meta)) = call_root(&guest, 1, "__handshake", vec![]).await else {
        panic!("handshake did not return an object");
    };
    let methods: Vec<Wire> = ["apply", "counter", "detached", "echo", "fail", "local", "slow"]
        .into_iter()
        .map(Wire::from)
        .collect();
    assert_eq!(meta["methods"], Wire::Array(methods));

    let Wire::Object(constants) = &meta["constants"] else { panic!("constants missing") };
    assert_eq!(constants["VERSION"], Wire::from("3.0"));

    let mut math = BTreeMap::new();
    math.insert("inc".to_string(), Wire::from("echo"));
    let Wire::Object(aliases) = &meta["aliases"] else { panic!("aliases missing") };
    assert_eq!(aliases["math"], Wire::Object(math));

    assert_eq!(
        call_root(&guest, 2, "__legacyNames", vec![]).await,
        Ok(Wire::Array(vec![Wire::from("echo")]))
    );
}

#[tokio::test]
async fn test_root_calls_and_errors() {
    init_tracing();
    let (_dispatcher, guest) = attach();

    assert_eq!(call_root(&guest, 1, "echo", vec![Wire::from("hi")]).await, Ok(Wire::from("hi")));
    assert_eq!(call_root(&guest, 2, "echo", vec![]).await, Ok(Wire::Null));
    assert_eq!(call_root(&guest, 3, "nope", vec![]).await, Err("API method nope not found".into()));
    assert_eq!(call_root(&guest, 4, "fail", vec![]).await, Err("deck is empty".into()));

    let reply = call_root(&guest, 5, "local", vec![]).await.unwrap_err();
    assert!(reply.starts_with("Cannot serialize value"), "unexpected error: {}", reply);

    // An id the guest was never given.
    let reply = call_root(&guest, 6, "echo", vec![Wire::Remote(RefId(77))]).await;
    assert_eq!(reply, Err("Instance 77 not found or released".into()));
}

#[tokio::test]
async fn test_instance_lifecycle() {
    init_tracing();
    let (dispatcher, guest) = attach();

    let Ok(Wire::Remote(id)) = call_root(&guest, 1, "counter", vec![]).await else {
        panic!("expected a remote ref");
    };
    assert_eq!(dispatcher.instance_count(), 1);

    assert_eq!(call_instance(&guest, 2, id, "inc", vec![Wire::Number(1.0)]).await, Ok(Wire::Number(2.0)));
    assert_eq!(
        call_instance(&guest, 3, id, "reset", vec![]).await,
        Err("Method reset missing on instance".into())
    );

    // A remote ref passed back resolves to the same capability.
    assert_eq!(call_root(&guest, 4, "echo", vec![Wire::Remote(id)]).await, Ok(Wire::Remote(RefId(id.0 + 1))));

    guest.post(Message::ReleaseInstance { id }, vec![]).await.unwrap();
    guest.post(Message::ReleaseInstance { id }, vec![]).await.unwrap();
    assert_eq!(
        call_instance(&guest, 5, id, "inc", vec![]).await,
        Err(format!("Instance {} not found or released", id.0))
    );

    // Unknown ids are ignored as well.
    guest.post(Message::ReleaseInstance { id: RefId(999) }, vec![]).await.unwrap();
    assert_eq!(call_root(&guest, 6, "echo", vec![Wire::Bool(true)]).await, Ok(Wire::Bool(true)));
}

#[tokio::test]
async fn test_call_then_release_still_answers_the_call() {
    init_tracing();
    let (_dispatcher, guest) = attach();

    let Ok(Wire::Remote(id)) = call_root(&guest, 1, "counter", vec![]).await else {
        panic!("expected a remote ref");
    };
    let call = Message::CallInstance { req_id: ReqId(2), id, method: "inc".into(), args: vec![Wire::Number(9.0)] };
    guest.post(call, vec![]).await.unwrap();
    guest.post(Message::ReleaseInstance { id }, vec![]).await.unwrap();

    assert_eq!(expect_response(&guest, 2).await, Ok(Wire::Number(10.0)));
}

#[tokio::test]
async fn test_replies_arrive_in_completion_order() {
    init_tracing();
    let (_dispatcher, guest) = attach();

    let slow = Message::CallRoot { req_id: ReqId(1), method: "slow".into(), args: vec![] };
    let fast = Message::CallRoot { req_id: ReqId(2), method: "echo".into(), args: vec![Wire::from("fast")] };
    guest.post(slow, vec![]).await.unwrap();
    guest.post(fast, vec![]).await.unwrap();

    assert_eq!(expect_response(&guest, 2).await, Ok(Wire::from("fast")));
    assert_eq!(expect_response(&guest, 1).await, Ok(Wire::from("slow")));
}

#[tokio::test]
async fn test_callback_stub_round_trip() {
    init_tracing();
    let (dispatcher, guest) = attach();

    let apply = Message::CallRoot {
        req_id: ReqId(1),
        method: "apply".into(),
        args: vec![Wire::Callback(RefId(5)), Wire::Number(2.0)],
    };
    guest.post(apply, vec![]).await.unwrap();

    let Message::InvokeCallback { req_id, id, args } = next(&guest).await else {
        panic!("expected a callback invocation");
    };
    assert_eq!(id, RefId(5));
    assert_eq!(args, vec![Wire::Number(2.0)]);
    assert_eq!(dispatcher.pending_count(), 1);

    guest.post(Message::CallbackReturn { req_id, reply: Ok(Wire::Number(4.0)) }, vec![]).await.unwrap();
    assert_eq!(expect_response(&guest, 1).await, Ok(Wire::Number(4.0)));
    assert_eq!(dispatcher.pending_count(), 0);

    // Returning the stub hands back the guest's own ref.
    assert_eq!(call_root(&guest, 2, "echo", vec![Wire::Callback(RefId(5))]).await, Ok(Wire::Callback(RefId(5))));
}

#[tokio::test]
async fn test_callback_errors_propagate() {
    init_tracing();
    let (_dispatcher, guest) = attach();

    let apply = Message::CallRoot { req_id: ReqId(1), method: "apply".into(), args: vec![Wire::Callback(RefId(3))] };
    guest.post(apply, vec![]).await.unwrap();
    let Message::InvokeCallback { req_id, .. } = next(&guest).await else {
        panic!("expected a callback invocation");
    };
    let reply = Err("Callback 3 not found or released".to_string());
    guest.post(Message::CallbackReturn { req_id, reply }, vec![]).await.unwrap();

    assert_eq!(expect_response(&guest, 1).await, Err("Callback 3 not found or released".into()));
}

#[tokio::test]
async fn test_unpostable_result_falls_back_to_error() {
    init_tracing();
    let (_dispatcher, guest) = attach();

    let reply = call_root(&guest, 1, "detached", vec![]).await.unwrap_err();
    assert!(reply.starts_with("Failed to post response:"), "unexpected error: {}", reply);
}

#[tokio::test]
async fn test_foreign_origin_is_dropped() {
    init_tracing();
    let (host, guest) = DuplexChannel::pair();
    let window = host.inbox();
    let _dispatcher = HostDispatcher::attach(api(), host, &BridgeConfig::default());

    let forged = Message::CallRoot { req_id: ReqId(1), method: "echo".into(), args: vec![Wire::from("forged")] };
    window.post_from(Origin::fresh(), forged, vec![]).unwrap();

    // Only the genuine call is answered.
    assert_eq!(call_root(&guest, 2, "echo", vec![Wire::from("real")]).await, Ok(Wire::from("real")));
    let quiet = tokio::time::timeout(Duration::from_millis(100), guest.recv()).await;
    assert!(quiet.is_err());
}

#[tokio::test]
async fn test_execute_code_settles_on_exec_result() {
    init_tracing();
    let (dispatcher, guest) = attach();

    let eval = tokio::spawn({
        let dispatcher = dispatcher.clone();
        async move { dispatcher.execute_code("2 * 21").await }
    });

    let Message::ExecuteCode { req_id, code } = next(&guest).await else {
        panic!("expected code to execute");
    };
    assert_eq!(code, "2 * 21");
    guest.post(Message::ExecResult { req_id, reply: Ok(Wire::Number(42.0)) }, vec![]).await.unwrap();

    assert_eq!(eval.await.unwrap().unwrap(), Value::Number(42.0));
}

//! Teardown: state is cleared, pending host requests follow the configured
//! policy, and nothing runs afterwards.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::OnceLock;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::time::Duration;

use tokio::sync::oneshot;

use realmrun::ApiTable;
use realmrun::Capability;
use realmrun::Error;
use realmrun::Function;
use realmrun::Methods;
use realmrun::PendingPolicy;
use realmrun::RealmView;
use realmrun::SandboxHost;
use realmrun::Teardown;
use realmrun::Value;
use realmrun::evaluator_fn;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

async fn eventually(what: &str, check: impl Fn() -> bool) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {}", what);
}

#[derive(Clone, Default)]
struct RecordingView {
    events: Arc<Mutex<Vec<String>>>,
}

impl RecordingView {
    fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }
}

impl RealmView for RecordingView {
    fn attach(&self, name: &str) {
        self.events.lock().unwrap().push(format!("attach {}", name));
    }

    fn detach(&self) {
        self.events.lock().unwrap().push("detach".to_string());
    }
}

/// A sandbox whose evaluator never finishes, so `execute_code` stays pending.
fn stalled(policy: PendingPolicy) -> (SandboxHost, oneshot::Receiver<()>) {
    let (ready_tx, ready_rx) = oneshot::channel();
    let host = SandboxHost::builder(ApiTable::new())
        .name("stalled")
        .pending_policy(policy)
        .spawn(move |ctx| async move {
            ctx.set_evaluator(evaluator_fn(|_| async {
                futures::future::pending::<()>().await;
                Ok(Value::Null)
            }));
            let _ = ready_tx.send(());
            Ok(())
        });
    (host, ready_rx)
}

#[tokio::test]
async fn test_reject_policy_fails_pending_requests() {
    init_tracing();
    let (host, ready) = stalled(PendingPolicy::Reject);
    ready.await.unwrap();

    let teardown = host.teardown_handle();
    let dispatcher = host.dispatcher().clone();
    let waiting = tokio::spawn(async move { dispatcher.execute_code("forever").await });
    eventually("request to be pending", || host.dispatcher().pending_count() == 1).await;

    teardown.terminate();
    let result = tokio::time::timeout(Duration::from_secs(2), waiting).await.unwrap().unwrap();
    assert!(matches!(result, Err(Error::Terminated)));
    assert_eq!(host.dispatcher().pending_count(), 0);
}

#[tokio::test]
async fn test_abandon_policy_leaves_pending_requests_unsettled() {
    init_tracing();
    let (host, ready) = stalled(PendingPolicy::Abandon);
    ready.await.unwrap();

    let dispatcher = host.dispatcher().clone();
    let waiting = tokio::spawn(async move { dispatcher.execute_code("forever").await });
    eventually("request to be pending", || host.dispatcher().pending_count() == 1).await;

    host.terminate();
    assert_eq!(host.dispatcher().pending_count(), 0);
    let outcome = tokio::time::timeout(Duration::from_millis(200), waiting).await;
    assert!(outcome.is_err(), "abandoned request settled");
}

#[tokio::test]
async fn test_teardown_clears_state_and_is_idempotent() {
    init_tracing();
    let view = RecordingView::default();
    let doc = Capability::new(Methods::new().method("title", |_| async { Ok(Value::from("Deck")) }));
    let api = ApiTable::new()
        .method("open", move |_| {
            let doc = doc.clone();
            async move { Ok(Value::Capability(doc)) }
        })
        .method("subscribe", |_| async { Ok(Value::Null) });
    let (tx, rx) = oneshot::channel();

    let host = SandboxHost::builder(api).name("cards").view(view.clone()).spawn(move |ctx| async move {
        ctx.api().call("open", vec![]).await?;
        ctx.api().call("subscribe", vec![Value::Function(Function::new(|_| async { Ok(Value::Null) }))]).await?;
        let _ = tx.send(());
        Ok(())
    });
    rx.await.unwrap();

    assert_eq!(view.events(), vec!["attach cards".to_string()]);
    assert_eq!(host.instance_count(), 1);
    assert_eq!(host.guest_callback_count(), 1);

    let teardown = host.teardown_handle();
    teardown.terminate();
    teardown.terminate();
    host.terminate();

    assert!(teardown.is_terminated());
    assert_eq!(host.instance_count(), 0);
    assert_eq!(host.guest_callback_count(), 0);
    assert_eq!(view.events(), vec!["attach cards".to_string(), "detach".to_string()]);

    // Nothing is posted after teardown.
    assert!(matches!(host.execute_code("1").await, Err(Error::Terminated)));
}

#[tokio::test]
async fn test_callback_stubs_fail_after_teardown() {
    init_tracing();
    let kept: Arc<Mutex<Option<Function>>> = Arc::default();
    let store = kept.clone();
    let api = ApiTable::new().method("subscribe", move |args: Vec<Value>| {
        *store.lock().unwrap() = args.first().and_then(Value::as_function).cloned();
        async { Ok(Value::Null) }
    });
    let (tx, rx) = oneshot::channel();

    let host = SandboxHost::spawn(api, move |ctx| async move {
        let listener = Function::new(|_| async { Ok(Value::from("heard")) });
        ctx.api().call("subscribe", vec![Value::Function(listener)]).await?;
        let _ = tx.send(());
        Ok(())
    });
    rx.await.unwrap();

    let listener = kept.lock().unwrap().clone().expect("no listener stored");
    assert_eq!(listener.call(vec![]).await.unwrap(), Value::from("heard"));

    host.terminate();
    assert!(matches!(listener.call(vec![]).await, Err(Error::Terminated)));
}

#[tokio::test]
async fn test_plugin_can_be_terminated_from_a_host_method() {
    init_tracing();
    let handle: Arc<OnceLock<Teardown>> = Arc::default();
    let quit = handle.clone();
    let api = ApiTable::new().method("quit", move |_| {
        if let Some(teardown) = quit.get() {
            teardown.terminate();
        }
        async { Ok(Value::Null) }
    });
    let (tx, rx) = oneshot::channel::<()>();
    let (go_tx, go_rx) = oneshot::channel::<()>();

    let host = SandboxHost::spawn(api, move |ctx| async move {
        let _ = go_rx.await;
        let _ = ctx.api().call("quit", vec![]).await;
        // The realm is gone before a reply could arrive.
        let _ = tx.send(());
        Ok(())
    });
    assert!(handle.set(host.teardown_handle()).is_ok());
    go_tx.send(()).unwrap();

    eventually("teardown", || host.dispatcher().is_terminated()).await;
    let reported = tokio::time::timeout(Duration::from_millis(200), rx).await;
    assert!(matches!(reported, Ok(Err(_))), "plugin kept running after teardown");
}

#[tokio::test]
async fn test_dropping_the_host_unloads_the_plugin() {
    init_tracing();
    let view = RecordingView::default();
    let ticks = Arc::new(AtomicUsize::new(0));
    let counted = ticks.clone();
    let api = ApiTable::new().method("tick", move |_| {
        counted.fetch_add(1, Ordering::SeqCst);
        async { Ok(Value::Null) }
    });

    let host = SandboxHost::builder(api).name("ticker").view(view.clone()).spawn(|ctx| async move {
        loop {
            ctx.api().call("tick", vec![]).await?;
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    });
    eventually("plugin to start ticking", || ticks.load(Ordering::SeqCst) > 3).await;

    let teardown = host.teardown_handle();
    drop(host);
    assert!(teardown.is_terminated());
    assert_eq!(view.events(), vec!["attach ticker".to_string(), "detach".to_string()]);

    let stopped_at = ticks.load(Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(ticks.load(Ordering::SeqCst) <= stopped_at + 1, "plugin kept calling after the host was dropped");
}

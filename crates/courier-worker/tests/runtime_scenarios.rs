//! End-to-end scenarios: a runtime serving one end of a memory channel while
//! the test plays the supervisor on the other end.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use courier_transport::{Channel, MemoryChannel};
use courier_worker::{
    CallError, CallId, CallRequest, Envelope, HandlerError, HostError, LifecycleHook,
    ListenerHandle, ShutdownSignal, StartArgs, WorkerConfig, WorkerHost, WorkerRuntime,
};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::time::Instant;

#[derive(Default)]
struct RecordingHost {
    hooks: Mutex<Vec<String>>,
}

struct NoopListener;

#[async_trait]
impl ListenerHandle for NoopListener {
    async fn close(&mut self) -> Result<(), HostError> {
        Ok(())
    }
}

#[async_trait]
impl WorkerHost for RecordingHost {
    async fn listen(&self, _config: &WorkerConfig) -> Result<Box<dyn ListenerHandle>, HostError> {
        Ok(Box::new(NoopListener))
    }

    async fn invoke(
        &self,
        hook: LifecycleHook,
        _signal: Option<&ShutdownSignal>,
    ) -> Result<(), HostError> {
        self.hooks.lock().push(hook.to_string());
        Ok(())
    }
}

fn runtime_with(config: WorkerConfig) -> (WorkerRuntime, Arc<MemoryChannel>, Arc<RecordingHost>) {
    let (worker_end, supervisor_end) = MemoryChannel::pair();
    let host = Arc::new(RecordingHost::default());
    let runtime = WorkerRuntime::new(Arc::new(worker_end), host.clone(), config);
    (runtime, Arc::new(supervisor_end), host)
}

fn runtime() -> (WorkerRuntime, Arc<MemoryChannel>, Arc<RecordingHost>) {
    runtime_with(WorkerConfig::default())
}

#[tokio::test(start_paused = true)]
async fn unanswered_call_times_out_after_its_deadline() {
    let (runtime, supervisor, _host) = runtime();

    let started = Instant::now();
    let err = runtime
        .call("peerA", "ping", json!({ "x": 1 }), Some(Duration::from_millis(50)))
        .await
        .unwrap_err();
    let elapsed = started.elapsed();

    assert!(matches!(err, CallError::Timeout { .. }));
    let message = err.to_string();
    assert!(message.contains("peerA"), "{message}");
    assert!(message.contains("ping"), "{message}");
    assert!(elapsed >= Duration::from_millis(50));
    assert!(elapsed < Duration::from_millis(60));

    let sent = supervisor.recv().await.unwrap().unwrap();
    assert_eq!(sent.action, "ping");
    assert_eq!(sent.body["correlationId"], json!(1));
}

#[tokio::test(start_paused = true)]
async fn configured_agent_timeout_applies_when_no_explicit_timeout() {
    let (runtime, _supervisor, _host) = runtime_with(WorkerConfig {
        agent_timeout: Some(200),
        ..Default::default()
    });

    let started = Instant::now();
    let err = runtime.call("sup", "slow", Value::Null, None).await.unwrap_err();
    assert!(err.is_timeout());
    assert!(started.elapsed() >= Duration::from_millis(200));
    assert!(started.elapsed() < Duration::from_millis(210));
}

#[tokio::test]
async fn send_transmits_without_bookkeeping() {
    let (runtime, supervisor, _host) = runtime();
    runtime
        .send("sup", "log", json!({ "line": "started" }))
        .await
        .unwrap();

    let sent = supervisor.recv().await.unwrap().unwrap();
    assert_eq!(sent.to, "sup");
    assert_eq!(sent.action, "log");
    assert_eq!(sent.body, json!({ "line": "started" }));
    assert_eq!(runtime.correlation().pending_count(), 0);
    assert_eq!(runtime.correlation().next_id(), CallId::new(1));
}

#[tokio::test]
async fn reply_through_serve_loop_resolves_call() {
    let (runtime, supervisor, _host) = runtime();
    let serving = tokio::spawn({
        let runtime = runtime.clone();
        async move { runtime.serve().await }
    });

    let echo = tokio::spawn({
        let supervisor = Arc::clone(&supervisor);
        async move {
            let call = supervisor.recv().await.unwrap().unwrap();
            let request = CallRequest::from_body(&call.body).unwrap();
            supervisor
                .send_raw(Envelope::reply("worker", request.id, Ok(request.data)))
                .await
                .unwrap();
        }
    });

    let value = runtime
        .call("sup", "echo", json!({ "n": 5 }), Some(Duration::from_secs(5)))
        .await
        .unwrap();
    assert_eq!(value, json!({ "n": 5 }));
    echo.await.unwrap();

    runtime.shutdown();
    serving.await.unwrap().unwrap();
}

#[tokio::test]
async fn remote_error_reaches_caller() {
    let (runtime, supervisor, _host) = runtime();
    let serving = tokio::spawn({
        let runtime = runtime.clone();
        async move { runtime.serve().await }
    });

    let pending = runtime
        .begin_call("sup", "charge", json!(10), Some(Duration::from_secs(5)))
        .await
        .unwrap();
    supervisor
        .send_raw(Envelope::new(
            "worker",
            pending.id().to_string(),
            json!({ "error": "card declined" }),
        ))
        .await
        .unwrap();

    let err = pending.wait().await.unwrap_err();
    assert!(matches!(err, CallError::Remote(ref m) if m == "card declined"));

    runtime.shutdown();
    serving.await.unwrap().unwrap();
}

#[tokio::test]
async fn handler_can_await_a_call_while_serving() {
    let (runtime, supervisor, _host) = runtime();
    let results = Arc::new(Mutex::new(Vec::new()));

    let outbox = runtime.outbox();
    let sink = Arc::clone(&results);
    runtime.subscribe("job", move |payload: Value| {
        let outbox = outbox.clone();
        let sink = Arc::clone(&sink);
        async move {
            let looked_up = outbox
                .call("sup", "lookup", payload, Some(Duration::from_secs(5)))
                .await
                .map_err(|err| HandlerError::new(err.to_string()))?;
            sink.lock().push(looked_up);
            Ok::<(), HandlerError>(())
        }
    });

    let serving = tokio::spawn({
        let runtime = runtime.clone();
        async move { runtime.serve().await }
    });

    supervisor
        .send_raw(Envelope::new("worker", "job", json!("key-1")))
        .await
        .unwrap();

    let lookup = supervisor.recv().await.unwrap().unwrap();
    assert_eq!(lookup.action, "lookup");
    let request = CallRequest::from_body(&lookup.body).unwrap();
    supervisor
        .send_raw(Envelope::reply("worker", request.id, Ok(json!("value-1"))))
        .await
        .unwrap();

    // Closing the supervisor side ends serve after queued events drain
    supervisor.close().await.unwrap();
    serving.await.unwrap().unwrap();
    assert_eq!(*results.lock(), vec![json!("value-1")]);
}

#[tokio::test]
async fn inbound_call_is_answered_with_its_id() {
    let (runtime, supervisor, _host) = runtime();
    let outbox = runtime.outbox();
    runtime.subscribe("add", move |body: Value| {
        let outbox = outbox.clone();
        async move {
            let request = CallRequest::from_body(&body)
                .ok_or_else(|| HandlerError::new("expected a call"))?;
            let sum: i64 = request
                .data
                .as_array()
                .map(|xs| xs.iter().filter_map(Value::as_i64).sum())
                .unwrap_or(0);
            outbox
                .reply("sup", request.id, Ok(json!(sum)))
                .await
                .map_err(|err| HandlerError::new(err.to_string()))
        }
    });

    let serving = tokio::spawn({
        let runtime = runtime.clone();
        async move { runtime.serve().await }
    });

    supervisor
        .send_raw(Envelope::call("worker", "add", CallId::new(41), json!([1, 2, 3])))
        .await
        .unwrap();
    let reply = supervisor.recv().await.unwrap().unwrap();
    assert_eq!(reply.action, "41");
    assert_eq!(reply.body["data"], json!(6));

    runtime.shutdown();
    serving.await.unwrap().unwrap();
}

#[tokio::test]
async fn control_actions_reach_registry_and_host() {
    let (runtime, supervisor, host) = runtime();
    let serving = tokio::spawn({
        let runtime = runtime.clone();
        async move { runtime.serve().await }
    });

    for envelope in [
        Envelope::new(
            "worker",
            "agent:plugins",
            json!({ "name": "workerA", "plugins": ["cache", "auth"] }),
        ),
        Envelope::new(
            "worker",
            "agent:plugins",
            json!({ "name": "workerA", "plugins": ["cache"] }),
        ),
        Envelope::new("worker", "cluster:ready", Value::Null),
    ] {
        supervisor.send_raw(envelope).await.unwrap();
    }
    supervisor.close().await.unwrap();
    serving.await.unwrap().unwrap();

    assert_eq!(runtime.plugins().providers("cache"), vec!["workerA"]);
    assert_eq!(runtime.plugins().providers("auth"), vec!["workerA"]);
    assert_eq!(*host.hooks.lock(), vec!["ready"]);
}

#[tokio::test]
async fn channel_close_fails_outstanding_calls() {
    let (runtime, supervisor, _host) = runtime();
    let pending = runtime
        .begin_call("sup", "never", Value::Null, Some(Duration::from_secs(30)))
        .await
        .unwrap();

    let serving = tokio::spawn({
        let runtime = runtime.clone();
        async move { runtime.serve().await }
    });
    supervisor.close().await.unwrap();
    serving.await.unwrap().unwrap();

    assert!(matches!(pending.wait().await, Err(CallError::Closed)));
    assert_eq!(runtime.correlation().pending_count(), 0);
}

#[tokio::test]
async fn bounded_runtime_rejects_excess_calls() {
    let (runtime, _supervisor, _host) = runtime_with(WorkerConfig {
        max_pending_calls: Some(2),
        ..Default::default()
    });
    let timeout = Some(Duration::from_secs(30));

    let _a = runtime.begin_call("sup", "e", Value::Null, timeout).await.unwrap();
    let _b = runtime.begin_call("sup", "e", Value::Null, timeout).await.unwrap();
    let err = runtime
        .begin_call("sup", "e", Value::Null, timeout)
        .await
        .err()
        .unwrap();
    assert!(matches!(err, CallError::TooManyPending { limit: 2 }));
    assert_eq!(runtime.correlation().pending_count(), 2);
}

#[tokio::test]
async fn shutdown_requested_before_serve_still_stops_it() {
    let (runtime, _supervisor, _host) = runtime();
    let pending = runtime
        .begin_call("sup", "never", Value::Null, Some(Duration::from_secs(30)))
        .await
        .unwrap();

    runtime.shutdown();
    tokio::time::timeout(Duration::from_millis(500), runtime.serve())
        .await
        .expect("serve ignored an earlier shutdown")
        .unwrap();

    assert!(matches!(pending.wait().await, Err(CallError::Closed)));
}

#[tokio::test]
async fn create_and_destroy_stop_serving() {
    let (runtime, _supervisor, host) = runtime();
    runtime
        .create(&StartArgs {
            cwd: Some("/srv/app".into()),
            service: Some("billing".into()),
        })
        .await
        .unwrap();
    assert_eq!(runtime.config().service.as_deref(), Some("billing"));

    let serving = tokio::spawn({
        let runtime = runtime.clone();
        async move { runtime.serve().await }
    });

    runtime.destroy(ShutdownSignal::Terminate).await.unwrap();
    serving.await.unwrap().unwrap();
    assert_eq!(*host.hooks.lock(), vec!["beforeDestroy", "destroyed"]);
}

proptest::proptest! {
    #[test]
    fn ids_are_per_runtime_and_strictly_increasing(calls in 1usize..24) {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap();
        rt.block_on(async {
            let (first, _s1, _h1) = runtime();
            let (second, _s2, _h2) = runtime();
            let timeout = Some(Duration::from_secs(1));

            let mut held = Vec::new();
            for expected in 1..=calls as u64 {
                let reply = first.begin_call("p", "e", Value::Null, timeout).await.unwrap();
                assert_eq!(reply.id(), CallId::new(expected));
                held.push(reply);
            }
            // Dropped calls free their slot but never their id
            held.clear();
            assert_eq!(first.correlation().pending_count(), 0);
            assert_eq!(first.correlation().next_id(), CallId::new(calls as u64 + 1));

            let other = second.begin_call("p", "e", Value::Null, timeout).await.unwrap();
            assert_eq!(other.id(), CallId::new(1));
        });
    }
}

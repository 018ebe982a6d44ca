//! Built-in event handlers every worker answers

use courier_worker::{CallRequest, HandlerError, Outbox, SubscriptionId, WorkerRuntime};
use serde_json::{json, Value};

/// Supervisor liveness probe
pub const PING_EVENT: &str = "ping";

/// Subscribe the built-in handlers
pub fn install(runtime: &WorkerRuntime, reply_to: &str) -> Vec<SubscriptionId> {
    let outbox = runtime.outbox();
    let reply_to = reply_to.to_owned();
    let ping = runtime.subscribe(PING_EVENT, move |body: Value| {
        let outbox = outbox.clone();
        let reply_to = reply_to.clone();
        async move { answer_ping(&outbox, &reply_to, body).await }
    });
    vec![ping]
}

async fn answer_ping(outbox: &Outbox, reply_to: &str, body: Value) -> Result<(), HandlerError> {
    // A ping without a correlation id is a plain notification
    let Some(request) = CallRequest::from_body(&body) else {
        tracing::debug!("ping notification");
        return Ok(());
    };

    outbox
        .reply(reply_to, request.id, Ok(json!({ "pong": request.data })))
        .await
        .map_err(|err| HandlerError::new(format!("ping reply failed: {err}")))
}

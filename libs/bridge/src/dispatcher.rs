//! # Request Dispatcher
//!
//! Runs one blocking call/response cycle against the remote, including any
//! number of nested callback round trips the remote injects before the
//! terminal answer.
//!
//! ## State Machine
//!
//! ```text
//! Idle -> AwaitingResponse -> Result | Error          (terminal)
//!                          -> CallbackRequested -> AwaitingResponse ...
//! ```
//!
//! The cycle is an explicit loop over [`DispatchState`], so stack depth does
//! not grow with the number of nested callbacks in one exchange.
//!
//! ## Ordering
//!
//! Requests are strictly sequential. Every cycle holds the dispatch gate,
//! cancels the background poll before sending, and re-arms it only after
//! the terminal answer. The gate is re-entrant so a local callback may
//! itself issue remote calls on the same thread.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use bridge_config::{commands, keys, PollSettings};
use parking_lot::{Mutex, ReentrantMutex, RwLock};
use serde_json::{Map, Value as Json};
use tracing::{debug, trace, warn};

use crate::error::RemoteError;
use crate::protocol::{
    strip_error_prefix, CallbackRequest, Codec, ConverterTable, Envelope, ErrorPayload, Outcome,
    RemoteFailure, Response,
};
use crate::registry::{Callback, CallbackError, CallbackHandle, CallbackRegistry};
use crate::scheduler::{Backoff, PollScheduler, PollTarget};
use crate::session::Session;
use crate::transports::{command_url, Transport};
use crate::value::{Dict, Value};
use crate::{BridgeError, Result};

/// Dispatch cycle states; `Idle` is simply not being inside [`Dispatcher::call`]
#[derive(Debug)]
enum DispatchState {
    AwaitingResponse {
        command: String,
        payload: Map<String, Json>,
    },
    CallbackRequested {
        command: String,
        request: CallbackRequest,
    },
    Finished(Result<Value>),
}

/// Reply command for a callback requested while serving `command`
///
/// Poll-driven chains answer with `callback_poll_result` so the remote can
/// route the reply to the waiter of the poll rather than of a call.
pub fn follow_up_command(command: &str) -> &'static str {
    if command == commands::CALLBACKS_POLL || command == commands::CALLBACK_POLL_RESULT {
        commands::CALLBACK_POLL_RESULT
    } else {
        commands::CALLBACK_RESULT
    }
}

/// Protocol driver bound to one transport and one session
pub struct Dispatcher {
    transport: Box<dyn Transport>,
    codec: Codec,
    session: RwLock<Option<Session>>,
    backoff: Mutex<Backoff>,
    scheduler: PollScheduler,
    gate: ReentrantMutex<()>,
    exchanges: AtomicU64,
}

impl Dispatcher {
    /// Build a dispatcher; spawns the poll thread when polling is enabled
    pub fn new(
        transport: Box<dyn Transport>,
        converters: ConverterTable,
        poll: &PollSettings,
    ) -> Result<Arc<Self>> {
        let registry = Arc::new(Mutex::new(CallbackRegistry::new()));
        let mut spawn_error = None;

        let dispatcher = Arc::new_cyclic(|weak: &Weak<Dispatcher>| {
            let scheduler = if poll.enabled {
                let target: Weak<dyn PollTarget> = weak.clone();
                PollScheduler::spawn(target).unwrap_or_else(|e| {
                    spawn_error = Some(e);
                    PollScheduler::disabled()
                })
            } else {
                PollScheduler::disabled()
            };

            Dispatcher {
                transport,
                codec: Codec::new(registry, converters),
                session: RwLock::new(None),
                backoff: Mutex::new(Backoff::from_settings(poll)),
                scheduler,
                gate: ReentrantMutex::new(()),
                exchanges: AtomicU64::new(0),
            }
        });

        if let Some(e) = spawn_error {
            return Err(BridgeError::configuration(
                format!("failed to spawn poll thread: {}", e),
                Some("poll.enabled"),
            ));
        }

        debug!(
            transport = dispatcher.transport.name(),
            polling = poll.enabled,
            "dispatcher ready"
        );
        Ok(dispatcher)
    }

    /// Issue `command` and wait for its terminal answer
    ///
    /// `host` overrides the session host; one of the two is required.
    pub fn call(&self, command: &str, data: Map<String, Json>, host: Option<&str>) -> Result<Value> {
        let _gate = self.gate.lock();
        self.scheduler.cancel();

        let outcome = self.run(command, data, host);

        let delay = self.backoff.lock().current();
        self.scheduler.arm(delay);
        outcome
    }

    /// Drain server-initiated callbacks once
    pub fn poll(&self) -> Result<Value> {
        self.call(commands::CALLBACKS_POLL, Map::new(), None)
    }

    fn run(&self, origin: &str, data: Map<String, Json>, host: Option<&str>) -> Result<Value> {
        let host = self.resolve_host(origin, host)?;

        let mut state = DispatchState::AwaitingResponse {
            command: origin.to_string(),
            payload: data,
        };

        loop {
            state = match state {
                DispatchState::AwaitingResponse { command, payload } => {
                    let response = self.exchange(&host, &command, payload)?;
                    self.backoff
                        .lock()
                        .record(&command, response.carries_callback());

                    match response.into_outcome() {
                        Outcome::Result(envelope) => {
                            DispatchState::Finished(self.codec.deserialize(None, &envelope))
                        }
                        Outcome::Error(failure) => {
                            DispatchState::Finished(Err(self.reconstruct_error(origin, failure)))
                        }
                        Outcome::Callback(request) => {
                            DispatchState::CallbackRequested { command, request }
                        }
                    }
                }
                DispatchState::CallbackRequested { command, request } => {
                    let payload = self.run_callback(&request);
                    DispatchState::AwaitingResponse {
                        command: follow_up_command(&command).to_string(),
                        payload,
                    }
                }
                DispatchState::Finished(result) => return result,
            };
        }
    }

    fn resolve_host(&self, command: &str, host: Option<&str>) -> Result<String> {
        if let Some(host) = host {
            return Ok(host.to_string());
        }
        self.session
            .read()
            .as_ref()
            .map(|session| session.host().to_string())
            .ok_or_else(|| BridgeError::missing_host(command))
    }

    /// One HTTP round trip
    fn exchange(&self, host: &str, command: &str, mut payload: Map<String, Json>) -> Result<Response> {
        if command != commands::CREATE_SESSION {
            let session_id = self
                .session
                .read()
                .as_ref()
                .and_then(|session| session.id().cloned());
            if let Some(id) = session_id {
                payload.insert(keys::SESSION_ID.to_string(), id.as_json().clone());
            }
        }

        let url = command_url(host, command);
        let body = Json::Object(payload);
        debug!(command, host, "sending request");
        trace!(%body, "request body");

        self.exchanges.fetch_add(1, Ordering::Relaxed);
        let reply = self.transport.post(&url, &body)?;

        if !reply.is_success() {
            return Err(BridgeError::transport(reply.status, reply.body));
        }

        trace!(body = %reply.body, "response body");
        Response::parse(&reply.body)
    }

    /// Run the requested callback locally and build the follow-up payload
    ///
    /// Failures are reported to the remote as data; they never propagate
    /// to the caller of the original command.
    fn run_callback(&self, request: &CallbackRequest) -> Map<String, Json> {
        let mut reply = Map::new();
        reply.insert(keys::CALLBACK.to_string(), Json::from(request.callback.0));

        let outcome = self
            .invoke_callback(request)
            .and_then(|envelope| envelope.to_json().map_err(|e| CallbackError::new(e.to_string())));

        match outcome {
            Ok(result) => {
                reply.insert(keys::RESULT.to_string(), result);
            }
            Err(failure) => {
                debug!(handle = %request.callback, error = %failure, "callback failed");
                reply.insert(keys::ERROR.to_string(), Json::String(failure.message));
                if let Some(stack) = failure.stack {
                    reply.insert(keys::STACK.to_string(), Json::String(stack));
                }
            }
        }

        if let Some(counter) = request.call_counter {
            reply.insert(keys::CALLBACK_CALL_COUNTER.to_string(), Json::from(counter));
        }
        reply
    }

    fn invoke_callback(&self, request: &CallbackRequest) -> std::result::Result<Envelope, CallbackError> {
        let this = self
            .codec
            .deserialize(None, &request.this)
            .map_err(|e| CallbackError::new(e.to_string()))?;
        let args = match self
            .codec
            .deserialize(None, &request.arguments)
            .map_err(|e| CallbackError::new(e.to_string()))?
        {
            Value::Array(items) => items,
            Value::Undefined => Vec::new(),
            single => vec![single],
        };

        let resolved = self.codec.registry().lock().resolve(request.callback);
        let callback = match resolved {
            Some(callback) => callback,
            None => {
                warn!(handle = %request.callback, "remote requested an unknown callback");
                return Err(CallbackError::new(format!(
                    "Unknown callback id: {}",
                    request.callback
                )));
            }
        };

        debug!(handle = %request.callback, args = args.len(), "invoking callback");
        let value = panic::catch_unwind(AssertUnwindSafe(|| callback.invoke(&this, &args)))
            .map_err(|payload| CallbackError::new(panic_message(payload.as_ref())))??;

        Ok(self.codec.serialize(None, &value))
    }

    fn reconstruct_error(&self, command: &str, failure: RemoteFailure) -> BridgeError {
        let error = match failure.error {
            ErrorPayload::Text(text) if text.is_empty() => BridgeError::NoMessage {
                command: command.to_string(),
            },
            ErrorPayload::Text(text) => RemoteError::new(strip_error_prefix(&text)).into(),
            ErrorPayload::Structured(envelope) => {
                let decoded = match self.codec.deserialize(None, &envelope) {
                    Ok(decoded) => decoded,
                    Err(e) => return e,
                };
                let (fields, embedded) = match decoded {
                    Value::Dict(mut dict) => {
                        let embedded = dict.remove("message");
                        (dict, embedded)
                    }
                    other => (Dict::new(), Some(other)),
                };

                let message = failure
                    .message
                    .or_else(|| embedded.as_ref().and_then(Value::as_str).map(str::to_string));

                match message {
                    Some(message) => {
                        RemoteError::with_fields(strip_error_prefix(&message), fields).into()
                    }
                    None => BridgeError::NoMessage {
                        command: command.to_string(),
                    },
                }
            }
        };

        debug!(command, error = %error, "remote reported an error");
        error
    }

    /// Current session, if any
    pub fn session(&self) -> Option<Session> {
        self.session.read().clone()
    }

    /// Bind the session used for host resolution and id attachment
    ///
    /// Re-arms the poll timer, since ticks without a session do not.
    pub fn bind_session(&self, session: Session) {
        let _gate = self.gate.lock();
        *self.session.write() = Some(session);
        self.scheduler.arm(self.backoff.lock().current());
    }

    pub fn codec(&self) -> &Codec {
        &self.codec
    }

    /// Register a callback directly (e.g. a persistent session hook)
    pub fn register_callback(&self, callback: &Callback, persistent: bool) -> CallbackHandle {
        self.codec.registry().lock().register(callback, persistent)
    }

    /// Purge non-persistent callbacks
    pub fn clear_callbacks(&self) -> usize {
        self.codec.registry().lock().clear()
    }

    /// Delay the poll timer is (or will next be) armed with
    pub fn poll_interval(&self) -> Duration {
        self.backoff.lock().current()
    }

    pub fn is_polling(&self) -> bool {
        self.scheduler.is_enabled()
    }

    /// Number of HTTP round trips issued so far
    pub fn exchanges(&self) -> u64 {
        self.exchanges.load(Ordering::Relaxed)
    }

    /// Stop background polling
    ///
    /// From inside a dispatch (a callback calling back in) the timer thread
    /// may be parked on the gate this thread holds, so it is only signalled.
    pub fn shutdown(&self) {
        self.scheduler.cancel();
        if self.gate.is_owned_by_current_thread() {
            self.scheduler.stop();
        } else {
            self.scheduler.shutdown();
        }
    }
}

impl PollTarget for Dispatcher {
    fn poll_tick(&self, generation: u64) {
        let _gate = self.gate.lock();

        // A request ran between expiry and acquiring the gate
        if !self.scheduler.is_current(generation) {
            trace!(generation, "discarding stale poll timer");
            return;
        }

        if self.session.read().is_none() {
            debug!("no session host yet, idle polling paused");
            return;
        }

        if let Err(e) = self.poll() {
            warn!(error = %e, "background poll failed");
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "callback panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionId;
    use crate::transports::MockTransport;
    use bridge_config::BridgeConfig;
    use serde_json::json;

    const HOST: &str = "localhost:8083";

    fn dispatcher(mock: &MockTransport) -> Arc<Dispatcher> {
        let config = BridgeConfig::default().with_polling(false);
        let dispatcher =
            Dispatcher::new(Box::new(mock.clone()), ConverterTable::new(), &config.poll).unwrap();
        dispatcher.bind_session(Session::established(
            HOST,
            SessionId::from_value(&Value::from("s-1")).unwrap(),
        ));
        dispatcher
    }

    #[test]
    fn test_follow_up_command_routing() {
        assert_eq!(follow_up_command("call_method"), "callback_result");
        assert_eq!(follow_up_command("callback_result"), "callback_result");
        assert_eq!(follow_up_command("callbacks_poll"), "callback_poll_result");
        assert_eq!(follow_up_command("callback_poll_result"), "callback_poll_result");
    }

    #[test]
    fn test_plain_result_with_session_id() {
        let mock = MockTransport::new();
        mock.push_json(json!({"result": {"value": "ok"}}));
        let dispatcher = dispatcher(&mock);

        let mut data = Map::new();
        data.insert("id".into(), json!(3));
        let value = dispatcher.call("get_property", data, None).unwrap();

        assert_eq!(value, Value::from("ok"));
        let requests = mock.requests();
        assert_eq!(requests[0].url, "http://localhost:8083/get_property");
        assert_eq!(requests[0].body, json!({"id": 3, "sessionId": "s-1"}));
    }

    #[test]
    fn test_create_session_never_carries_session_id() {
        let mock = MockTransport::new();
        mock.push_json(json!({"result": {"value": "s-2"}}));
        let dispatcher = dispatcher(&mock);

        dispatcher
            .call(commands::CREATE_SESSION, Map::new(), Some("other:1"))
            .unwrap();

        let request = &mock.requests()[0];
        assert_eq!(request.url, "http://other:1/create_session");
        assert_eq!(request.body, json!({}));
    }

    #[test]
    fn test_missing_host_sends_nothing() {
        let mock = MockTransport::new();
        let dispatcher =
            Dispatcher::new(Box::new(mock.clone()), ConverterTable::new(), &PollSettings {
                enabled: false,
                ..PollSettings::default()
            })
            .unwrap();

        let err = dispatcher.call("get_all_users", Map::new(), None).unwrap_err();
        assert!(matches!(err, BridgeError::MissingHost { .. }));
        assert!(mock.requests().is_empty());
    }

    #[test]
    fn test_transport_fault_carries_raw_body() {
        let mock = MockTransport::new();
        mock.push_status(500, "internal explosion");
        let dispatcher = dispatcher(&mock);

        match dispatcher.call("call_method", Map::new(), None).unwrap_err() {
            BridgeError::Transport { status, body } => {
                assert_eq!(status, 500);
                assert_eq!(body, "internal explosion");
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_string_error_is_prefix_normalized() {
        let mock = MockTransport::new();
        mock.push_json(json!({"error": "Error: boom"}));
        let dispatcher = dispatcher(&mock);

        let err = dispatcher.call("call_method", Map::new(), None).unwrap_err();
        assert_eq!(err.as_remote().unwrap().message, "boom");
    }

    #[test]
    fn test_structured_error_keeps_fields() {
        let mock = MockTransport::new();
        mock.push_json(json!({
            "error": {"type": "dict", "keys": ["code", "path"], "values": [{"value": 611}, {"value": "/x"}]},
            "message": "Error: boom"
        }));
        let dispatcher = dispatcher(&mock);

        let err = dispatcher.call("call_method", Map::new(), None).unwrap_err();
        let remote = err.as_remote().unwrap();
        assert_eq!(remote.message, "boom");
        assert_eq!(remote.field("code"), Some(&Value::from(611)));
        assert_eq!(remote.field("path"), Some(&Value::from("/x")));
    }

    #[test]
    fn test_structured_error_with_embedded_message() {
        let mock = MockTransport::new();
        mock.push_json(json!({
            "error": {"type": "dict", "keys": ["message", "code"], "values": [{"value": "TypeError: nope"}, {"value": 1}]}
        }));
        let dispatcher = dispatcher(&mock);

        let err = dispatcher.call("call_method", Map::new(), None).unwrap_err();
        let remote = err.as_remote().unwrap();
        assert_eq!(remote.message, "nope");
        assert_eq!(remote.fields.len(), 1);
    }

    #[test]
    fn test_error_without_message_names_command() {
        let mock = MockTransport::new();
        mock.push_json(json!({"error": {"type": "dict", "keys": ["code"], "values": [{"value": 1}]}}));
        let dispatcher = dispatcher(&mock);

        let err = dispatcher.call("set_property", Map::new(), None).unwrap_err();
        assert!(matches!(err, BridgeError::NoMessage { ref command } if command == "set_property"));
    }

    #[test]
    fn test_nested_callback_round_trip() {
        let mock = MockTransport::new();
        let dispatcher = dispatcher(&mock);

        let doubler = Callback::new(|_, args| {
            let n = args.first().and_then(Value::as_i64).unwrap_or_default();
            Ok(Value::from(n * 2))
        });
        let handle = dispatcher.register_callback(&doubler, false);

        mock.push_json(json!({
            "callback": handle.0,
            "this": {"type": "undefined"},
            "arguments": {"value": [{"value": 21}]},
            "callback_call_counter": 4
        }))
        .push_json(json!({"result": {"value": "done"}}));

        let value = dispatcher.call("call_method", Map::new(), None).unwrap();
        assert_eq!(value, Value::from("done"));

        assert_eq!(mock.commands(), vec!["call_method", "callback_result"]);
        assert_eq!(
            mock.requests()[1].body,
            json!({"callback": handle.0, "result": {"value": 42}, "callback_call_counter": 4, "sessionId": "s-1"})
        );
    }

    #[test]
    fn test_callback_failures_are_reported_not_raised() {
        let mock = MockTransport::new();
        let dispatcher = dispatcher(&mock);

        let failing = Callback::new(|_, _| Err(CallbackError::with_stack("token expired", "at refresh")));
        let panicking = Callback::new(|_, _| panic!("callback blew up"));
        let failing_handle = dispatcher.register_callback(&failing, false);
        let panicking_handle = dispatcher.register_callback(&panicking, false);

        mock.push_json(json!({"callback": failing_handle.0, "this": {"type": "undefined"}, "arguments": {"value": []}}))
            .push_json(json!({"callback": panicking_handle.0, "this": {"type": "undefined"}, "arguments": {"value": []}}))
            .push_json(json!({"callback": 999, "this": {"type": "undefined"}, "arguments": {"value": []}}))
            .push_json(json!({"result": {"value": 1}}));

        let value = dispatcher.call("call_method", Map::new(), None).unwrap();
        assert_eq!(value, Value::from(1));

        let requests = mock.requests();
        assert_eq!(requests[1].body["error"], json!("token expired"));
        assert_eq!(requests[1].body["stack"], json!("at refresh"));
        assert_eq!(requests[2].body["error"], json!("callback blew up"));
        assert_eq!(requests[3].body["error"], json!("Unknown callback id: 999"));
        assert!(requests[3].body.get("callback_call_counter").is_none());
    }

    #[test]
    fn test_poll_chain_uses_poll_result_command() {
        let mock = MockTransport::new();
        let dispatcher = dispatcher(&mock);
        let noop = Callback::new(|_, _| Ok(Value::Undefined));
        let handle = dispatcher.register_callback(&noop, true);

        mock.push_json(json!({"callback": handle.0, "this": {"type": "undefined"}, "arguments": {"value": []}, "callback_call_counter": 1}))
            .push_json(json!({"callback": handle.0, "this": {"type": "undefined"}, "arguments": {"value": []}, "callback_call_counter": 2}))
            .push_json(json!({"result": {"type": "undefined"}}));

        assert_eq!(dispatcher.poll().unwrap(), Value::Undefined);
        assert_eq!(
            mock.commands(),
            vec!["callbacks_poll", "callback_poll_result", "callback_poll_result"]
        );
    }

    #[test]
    fn test_backoff_follows_cycles() {
        let mock = MockTransport::new();
        let dispatcher = dispatcher(&mock);
        mock.set_fallback(json!({}));

        assert_eq!(dispatcher.poll_interval(), Duration::from_millis(10));
        for expected in [20, 40, 80] {
            dispatcher.poll().unwrap();
            assert_eq!(dispatcher.poll_interval(), Duration::from_millis(expected));
        }

        dispatcher.call("get_all_users", Map::new(), None).unwrap();
        assert_eq!(dispatcher.poll_interval(), Duration::from_millis(10));
    }

    #[test]
    fn test_shutdown_from_inside_callback_returns() {
        let mock = MockTransport::new();
        let config = BridgeConfig::default().with_poll_bounds(1, 1);
        mock.set_fallback(json!({}));
        let dispatcher =
            Dispatcher::new(Box::new(mock.clone()), ConverterTable::new(), &config.poll).unwrap();
        dispatcher.bind_session(Session::established(
            HOST,
            SessionId::from_value(&Value::from("s-1")).unwrap(),
        ));
        assert!(dispatcher.is_polling());

        let weak = Arc::downgrade(&dispatcher);
        let stopper = Callback::new(move |_, _| {
            if let Some(dispatcher) = weak.upgrade() {
                // Give a due timer the chance to park on the gate
                std::thread::sleep(Duration::from_millis(20));
                dispatcher.shutdown();
            }
            Ok(Value::Undefined)
        });
        let handle = dispatcher.register_callback(&stopper, false);

        mock.push_json(json!({"callback": handle.0}));
        dispatcher.call("call_method", Map::new(), None).unwrap();

        assert!(!dispatcher.is_polling());
        let settled = dispatcher.exchanges();
        std::thread::sleep(Duration::from_millis(50));
        assert!(dispatcher.exchanges() <= settled + 1);
    }

    #[test]
    fn test_many_nested_callbacks_do_not_recurse() {
        let mock = MockTransport::new();
        let dispatcher = dispatcher(&mock);
        let noop = Callback::new(|_, _| Ok(Value::Null));
        let handle = dispatcher.register_callback(&noop, false);

        for _ in 0..5_000 {
            mock.push_json(json!({"callback": handle.0, "this": {"type": "undefined"}, "arguments": {"value": []}}));
        }
        mock.push_json(json!({"result": {"value": true}}));

        assert_eq!(dispatcher.call("call_method", Map::new(), None).unwrap(), Value::Bool(true));
        assert_eq!(dispatcher.exchanges(), 5_001);
    }
}

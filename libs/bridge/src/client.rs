//! # Bridge Client
//!
//! Typed wrappers for every command the remote object server understands,
//! built on [`Dispatcher::call`]. Arguments are encoded through the shared
//! codec, so callables passed anywhere become registered callbacks.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use bridge::{BridgeClient, Callback, Value};
//! use bridge_config::BridgeConfig;
//!
//! # fn main() -> bridge::Result<()> {
//! let config = BridgeConfig::default().with_host("localhost:8083");
//! let client = BridgeClient::connect(&config)?;
//!
//! let refresh = Callback::new(|_, _| Ok(Value::Undefined));
//! client.create_session(None, refresh)?;
//!
//! let realm = client.create_realm(&[])?;
//! let schema = realm.get("schema")?;
//! # let _ = schema;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use bridge_config::{commands, keys, BridgeConfig};
use serde_json::{Map, Value as Json};
use tracing::info;

use crate::dispatcher::Dispatcher;
use crate::isolation::{PropertyCache, ReadIsolation};
use crate::object::RemoteObject;
use crate::protocol::ConverterTable;
use crate::registry::Callback;
use crate::session::{Session, SessionId};
use crate::transports::{HttpTransport, Transport};
use crate::value::{RemoteId, Value};
use crate::{BridgeError, Result};

/// Handle to one bridge session; clones share the same dispatcher
#[derive(Clone)]
pub struct BridgeClient {
    dispatcher: Arc<Dispatcher>,
    isolation: Arc<ReadIsolation>,
    default_host: Option<String>,
}

impl BridgeClient {
    /// Client over HTTP using the configured transport settings
    pub fn connect(config: &BridgeConfig) -> Result<Self> {
        let transport = HttpTransport::new(&config.http)?;
        Self::with_converters(config, transport, ConverterTable::new())
    }

    /// Client over an arbitrary transport
    pub fn with_transport(config: &BridgeConfig, transport: impl Transport + 'static) -> Result<Self> {
        Self::with_converters(config, transport, ConverterTable::new())
    }

    /// Client with custom type converters installed
    pub fn with_converters(
        config: &BridgeConfig,
        transport: impl Transport + 'static,
        converters: ConverterTable,
    ) -> Result<Self> {
        config
            .validate()
            .map_err(|e| BridgeError::configuration(format!("{:#}", e), None))?;

        let dispatcher = Dispatcher::new(Box::new(transport), converters, &config.poll)?;
        let isolation = Arc::new(ReadIsolation::new(Arc::new(PropertyCache::new())));

        Ok(Self {
            dispatcher,
            isolation,
            default_host: config.host.clone(),
        })
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn isolation(&self) -> &ReadIsolation {
        &self.isolation
    }

    pub fn session(&self) -> Option<Session> {
        self.dispatcher.session()
    }

    pub fn poll_interval(&self) -> Duration {
        self.dispatcher.poll_interval()
    }

    /// Raw command with an already-encoded payload
    pub fn call(&self, command: &str, data: Map<String, Json>) -> Result<Value> {
        self.dispatcher.call(command, data, None)
    }

    fn encode(&self, context: Option<&RemoteId>, value: &Value) -> Result<Json> {
        self.dispatcher.codec().serialize(context, value).to_json()
    }

    /// Arguments as a bare JSON array of envelopes
    fn encode_args(&self, context: Option<&RemoteId>, args: &[Value]) -> Result<Json> {
        args.iter()
            .map(|arg| self.encode(context, arg))
            .collect::<Result<Vec<_>>>()
            .map(Json::Array)
    }

    fn args_payload(&self, args: &[Value]) -> Result<Map<String, Json>> {
        let mut data = Map::new();
        data.insert(keys::ARGUMENTS.to_string(), self.encode_args(None, args)?);
        Ok(data)
    }

    fn target_payload(&self, realm_id: Option<&RemoteId>, id: &RemoteId) -> Result<Map<String, Json>> {
        let mut data = Map::new();
        if let Some(realm_id) = realm_id {
            data.insert(keys::REALM_ID.to_string(), to_json(realm_id)?);
        }
        data.insert(keys::ID.to_string(), to_json(id)?);
        Ok(data)
    }

    /// Establish the session; `refresh_access_token` stays registered for
    /// the life of the client
    pub fn create_session(&self, host: Option<&str>, refresh_access_token: Callback) -> Result<Session> {
        let host = host
            .map(str::to_string)
            .or_else(|| self.default_host.clone())
            .ok_or_else(|| BridgeError::missing_host(commands::CREATE_SESSION))?;

        self.dispatcher.register_callback(&refresh_access_token, true);
        let mut data = Map::new();
        data.insert(
            keys::REFRESH_ACCESS_TOKEN.to_string(),
            self.encode(None, &Value::Function(refresh_access_token))?,
        );

        let id = self
            .dispatcher
            .call(commands::CREATE_SESSION, data, Some(&host))?;
        let session = Session::established(host, SessionId::from_value(&id)?);
        self.dispatcher.bind_session(session.clone());

        info!(host = session.host(), id = ?session.id(), "session established");
        Ok(session)
    }

    /// Open a realm; the read-isolation hook is attached at creation
    pub fn create_realm(&self, args: &[Value]) -> Result<RemoteObject> {
        let mut data = self.args_payload(args)?;
        data.insert(
            keys::BEFORE_NOTIFY.to_string(),
            self.encode(None, &Value::Function(self.isolation.hook().clone()))?,
        );

        match self.dispatcher.call(commands::CREATE_REALM, data, None)? {
            Value::Remote(reference) => {
                let context = Some(reference.id.clone());
                Ok(RemoteObject::new(self.clone(), context, reference))
            }
            other => Err(BridgeError::protocol(format!(
                "create_realm returned {:?} instead of a remote reference",
                other
            ))),
        }
    }

    pub fn create_user(&self, args: &[Value]) -> Result<Value> {
        self.call(commands::CREATE_USER, self.args_payload(args)?)
    }

    pub fn admin_user(&self, args: &[Value]) -> Result<Value> {
        self.call(commands::ADMIN_USER, self.args_payload(args)?)
    }

    pub fn get_existing_user(&self, args: &[Value]) -> Result<Value> {
        self.call(commands::GET_EXISTING_USER, self.args_payload(args)?)
    }

    pub fn reconnect(&self, realm_id: &RemoteId) -> Result<Value> {
        let mut data = Map::new();
        data.insert(keys::REALM_ID.to_string(), to_json(realm_id)?);
        self.call(commands::RECONNECT, data)
    }

    pub fn initialize_sync_manager(&self, args: &[Value]) -> Result<Value> {
        self.call(commands::INITIALIZE_SYNC_MANAGER, self.args_payload(args)?)
    }

    pub fn has_existing_sessions(&self) -> Result<bool> {
        match self.call(commands::HAS_EXISTING_SESSIONS, Map::new())? {
            Value::Bool(b) => Ok(b),
            other => Err(BridgeError::protocol(format!(
                "_hasExistingSessions returned {:?} instead of a boolean",
                other
            ))),
        }
    }

    /// Invoke a remote method
    ///
    /// Any method may mutate its context, so cached reads for it are
    /// dropped whether or not the call succeeds.
    pub fn call_method(
        &self,
        realm_id: Option<&RemoteId>,
        id: &RemoteId,
        name: &str,
        args: &[Value],
    ) -> Result<Value> {
        let mut data = self.target_payload(realm_id, id)?;
        data.insert(keys::NAME.to_string(), Json::String(name.to_string()));
        data.insert(
            keys::ARGUMENTS.to_string(),
            self.encode(realm_id, &Value::Array(args.to_vec()))?,
        );
        let outcome = self.call(commands::CALL_METHOD, data);
        self.isolation.cache().invalidate(realm_id);
        outcome
    }

    pub fn get_object(&self, realm_id: Option<&RemoteId>, id: &RemoteId) -> Result<Value> {
        self.call(commands::GET_OBJECT, self.target_payload(realm_id, id)?)
    }

    pub fn get_property(&self, realm_id: Option<&RemoteId>, id: &RemoteId, name: &str) -> Result<Value> {
        let mut data = self.target_payload(realm_id, id)?;
        data.insert(keys::NAME.to_string(), Json::String(name.to_string()));
        self.call(commands::GET_PROPERTY, data)
    }

    /// Write a property; like `call_method`, drops cached reads for the
    /// context since setters may have side effects
    pub fn set_property(
        &self,
        realm_id: Option<&RemoteId>,
        id: &RemoteId,
        name: &str,
        value: &Value,
    ) -> Result<()> {
        let mut data = self.target_payload(realm_id, id)?;
        data.insert(keys::NAME.to_string(), Json::String(name.to_string()));
        data.insert(keys::VALUE.to_string(), self.encode(realm_id, value)?);
        let outcome = self.call(commands::SET_PROPERTY, data);
        self.isolation.cache().invalidate(realm_id);
        outcome.map(|_| ())
    }

    pub fn get_all_users(&self) -> Result<Value> {
        self.call(commands::GET_ALL_USERS, Map::new())
    }

    /// Reset test-scoped state on both sides; persistent callbacks survive
    ///
    /// Local callbacks stay resolvable until the remote has finished
    /// tearing down, since it may still fire listeners while doing so.
    pub fn clear_test_state(&self) -> Result<()> {
        let outcome = self.call(commands::CLEAR_TEST_STATE, Map::new());
        let removed = self.dispatcher.clear_callbacks();
        self.isolation.reset();
        info!(removed, "cleared test state");
        outcome.map(|_| ())
    }

    /// Drain pending server-initiated callbacks now
    pub fn poll(&self) -> Result<Value> {
        self.dispatcher.poll()
    }

    /// Stop the background poll thread
    pub fn shutdown(&self) {
        self.dispatcher.shutdown();
    }
}

fn to_json(id: &RemoteId) -> Result<Json> {
    serde_json::to_value(id).map_err(|e| BridgeError::protocol_with_source("failed to encode remote id", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transports::MockTransport;
    use serde_json::json;

    fn client(mock: &MockTransport) -> BridgeClient {
        let config = BridgeConfig::default()
            .with_host("localhost:8083")
            .with_polling(false);
        BridgeClient::with_transport(&config, mock.clone()).unwrap()
    }

    fn session(client: &BridgeClient, mock: &MockTransport) {
        mock.push_json(json!({"result": {"value": "s-1"}}));
        client
            .create_session(None, Callback::new(|_, _| Ok(Value::Undefined)))
            .unwrap();
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = BridgeConfig::default().with_poll_bounds(100, 10);
        assert!(BridgeClient::with_transport(&config, MockTransport::new()).is_err());

        let config = BridgeConfig::default().with_host("http://localhost:8083");
        let err = BridgeClient::with_transport(&config, MockTransport::new())
            .err()
            .expect("scheme in host must be rejected");
        assert!(matches!(err, BridgeError::Configuration { .. }));
        assert!(err.to_string().contains("without a scheme"));
    }

    #[test]
    fn test_listeners_resolvable_during_clear_test_state() {
        let mock = MockTransport::new();
        let client = client(&mock);
        session(&client, &mock);

        let listener = Callback::new(|_, _| Ok(Value::from("closed")));
        mock.set_fallback(json!({}));
        client
            .call_method(None, &RemoteId::Int(1), "addListener", &[Value::Function(listener)])
            .unwrap();

        // The remote fires the listener while tearing down
        mock.push_json(json!({"callback": 1}))
            .push_json(json!({}));
        client.clear_test_state().unwrap();

        let requests = mock.requests();
        assert_eq!(requests[2].command, "clear_test_state");
        assert_eq!(requests[3].command, "callback_result");
        assert_eq!(requests[3].body["result"], json!({"value": "closed"}));
        assert!(requests[3].body.get("error").is_none());

        // Purged once the command completed
        let registry = client.dispatcher().codec().registry().lock();
        assert!(registry.resolve(crate::CallbackHandle(1)).is_none());
    }

    #[test]
    fn test_mutations_drop_cached_reads_for_context() {
        let mock = MockTransport::new();
        let client = client(&mock);
        session(&client, &mock);
        mock.set_fallback(json!({}));

        let realm = RemoteId::from("r-1");
        let cache = client.isolation().cache();
        cache.insert(Some(&realm), &RemoteId::Int(2), "length", Value::from(1));
        client.call_method(Some(&realm), &RemoteId::Int(3), "push", &[]).unwrap();
        assert!(cache.is_empty());

        cache.insert(Some(&realm), &RemoteId::Int(2), "length", Value::from(1));
        mock.push_status(500, "write failed");
        assert!(client
            .set_property(Some(&realm), &RemoteId::Int(2), "name", &Value::from("x"))
            .is_err());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_create_session_registers_persistent_refresh() {
        let mock = MockTransport::new();
        let client = client(&mock);
        session(&client, &mock);

        let request = &mock.requests()[0];
        assert_eq!(request.url, "http://localhost:8083/create_session");
        assert_eq!(
            request.body,
            json!({"refreshAccessToken": {"type": "function", "value": 0}})
        );

        let session = client.session().unwrap();
        assert_eq!(session.host(), "localhost:8083");
        assert_eq!(session.id().unwrap().to_string(), "s-1");

        // The refresh hook survives a test-state reset
        mock.push_json(json!({}));
        client.clear_test_state().unwrap();
        let registry = client.dispatcher().codec().registry().lock();
        assert!(registry.resolve(crate::CallbackHandle(0)).is_some());
    }

    #[test]
    fn test_create_session_without_any_host() {
        let mock = MockTransport::new();
        let config = BridgeConfig::default().with_polling(false);
        let client = BridgeClient::with_transport(&config, mock.clone()).unwrap();

        let err = client
            .create_session(None, Callback::new(|_, _| Ok(Value::Undefined)))
            .unwrap_err();
        assert!(matches!(err, BridgeError::MissingHost { .. }));
        assert!(mock.requests().is_empty());
    }

    #[test]
    fn test_create_realm_attaches_hook() {
        let mock = MockTransport::new();
        let client = client(&mock);
        session(&client, &mock);

        mock.push_json(json!({"result": {"type": "realm", "id": "r-1"}}));
        let realm = client.create_realm(&[Value::from("/tmp/db.realm")]).unwrap();

        assert_eq!(realm.id(), &RemoteId::from("r-1"));
        assert_eq!(realm.context(), Some(&RemoteId::from("r-1")));
        assert_eq!(realm.type_tag(), Some("realm"));

        let body = &mock.requests()[1].body;
        assert_eq!(body["arguments"], json!([{"value": "/tmp/db.realm"}]));
        assert_eq!(body["beforeNotify"], json!({"type": "function", "value": 1}));
        assert_eq!(body["sessionId"], json!("s-1"));
    }

    #[test]
    fn test_create_realm_requires_reference() {
        let mock = MockTransport::new();
        let client = client(&mock);
        session(&client, &mock);

        mock.push_json(json!({"result": {"value": 5}}));
        assert!(matches!(
            client.create_realm(&[]).unwrap_err(),
            BridgeError::Protocol { .. }
        ));
    }

    #[test]
    fn test_target_payloads() {
        let mock = MockTransport::new();
        let client = client(&mock);
        session(&client, &mock);
        mock.set_fallback(json!({}));

        let realm = RemoteId::from("r-1");
        let object = RemoteId::Int(8);
        client
            .call_method(Some(&realm), &object, "filtered", &[Value::from("age > 3")])
            .unwrap();
        client
            .set_property(Some(&realm), &object, "age", &Value::from(4))
            .unwrap();
        client.get_property(None, &object, "age").unwrap();
        client.reconnect(&realm).unwrap();

        let requests = mock.requests();
        assert_eq!(
            requests[1].body,
            json!({"realmId": "r-1", "id": 8, "name": "filtered",
                   "arguments": {"value": [{"value": "age > 3"}]}, "sessionId": "s-1"})
        );
        assert_eq!(
            requests[2].body,
            json!({"realmId": "r-1", "id": 8, "name": "age", "value": {"value": 4}, "sessionId": "s-1"})
        );
        assert_eq!(
            requests[3].body,
            json!({"id": 8, "name": "age", "sessionId": "s-1"})
        );
        assert_eq!(requests[4].body, json!({"realmId": "r-1", "sessionId": "s-1"}));
    }

    #[test]
    fn test_user_commands() {
        let mock = MockTransport::new();
        let client = client(&mock);
        session(&client, &mock);

        mock.push_json(json!({"result": {"value": true}}))
            .push_json(json!({"result": {"value": [{"id": 1}, {"id": 2}]}}))
            .push_json(json!({"result": {"id": 3}}))
            .push_json(json!({"result": {"value": "ok"}}));

        assert!(client.has_existing_sessions().unwrap());
        let users = client.get_all_users().unwrap();
        assert_eq!(users.as_array().map(|items| items.len()), Some(2));
        assert!(client.admin_user(&[Value::from("http://x"), Value::from("token")]).unwrap().as_remote().is_some());
        assert_eq!(client.initialize_sync_manager(&[]).unwrap(), Value::from("ok"));

        assert_eq!(
            mock.commands()[1..].to_vec(),
            vec!["_hasExistingSessions", "get_all_users", "_adminUser", "_initializeSyncManager"]
        );
    }
}

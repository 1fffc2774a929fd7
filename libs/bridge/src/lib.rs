//! # Bridge Client Library
//!
//! Client half of a synchronous HTTP/JSON remote object bridge. Every
//! operation is a POST of a JSON payload to `http://{host}/{command}`; the
//! remote either answers or asks this side to run one of its callbacks
//! first, and the dispatcher keeps answering until a terminal reply lands.
//!
//! ## Layers
//!
//! - **Envelope codec** ([`protocol`]): tagged wire form of values, remote
//!   references and callables
//! - **Callback registry** ([`registry`]): handle table for callables sent
//!   to the remote
//! - **Dispatcher** ([`dispatcher`]): request/callback state machine
//! - **Poll scheduler** ([`scheduler`]): adaptive timer that drains
//!   server-initiated callbacks while idle
//! - **Read isolation** ([`isolation`]): `beforenotify` hook plus the
//!   property cache it guards
//! - **Client** ([`client`], [`object`]): typed command wrappers and remote
//!   object proxies
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use bridge::{BridgeClient, Callback, Value};
//! use bridge_config::load_config;
//!
//! # fn main() -> anyhow::Result<()> {
//! let config = load_config(None, None)?;
//! let client = BridgeClient::connect(&config)?;
//!
//! client.create_session(Some("localhost:8083"), Callback::new(|_, _| Ok(Value::Undefined)))?;
//! let realm = client.create_realm(&[Value::from("default.realm")])?;
//! let dogs = realm.call("objects", &[Value::from("Dog")])?;
//! println!("{:?}", dogs);
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod dispatcher;
pub mod error;
pub mod isolation;
pub mod object;
pub mod protocol;
pub mod registry;
pub mod scheduler;
pub mod session;
pub mod transports;
pub mod value;

pub use client::BridgeClient;
pub use dispatcher::{follow_up_command, Dispatcher};
pub use error::{BridgeError, RemoteError, Result};
pub use isolation::{PropertyCache, ReadIsolation};
pub use object::RemoteObject;
pub use protocol::{Codec, ConverterTable, Envelope, TypeTag};
pub use registry::{Callback, CallbackError, CallbackHandle, CallbackRegistry};
pub use scheduler::{Backoff, PollScheduler, PollTarget};
pub use session::{Session, SessionId};
pub use transports::{HttpTransport, MockTransport, Transport, TransportResponse};
pub use value::{Dict, RemoteId, RemoteRef, Value};

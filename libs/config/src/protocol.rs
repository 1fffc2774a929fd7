//! Wire protocol constants
//!
//! Command names are appended to the host as the request path
//! (`http://{host}/{command}`); payload keys are the JSON object keys
//! the remote server expects in request bodies.

/// Commands understood by the remote object server
pub mod commands {
    pub const CREATE_SESSION: &str = "create_session";
    pub const CREATE_REALM: &str = "create_realm";
    pub const CREATE_USER: &str = "create_user";
    pub const ADMIN_USER: &str = "_adminUser";
    pub const GET_EXISTING_USER: &str = "_getExistingUser";
    pub const RECONNECT: &str = "reconnect";
    pub const INITIALIZE_SYNC_MANAGER: &str = "_initializeSyncManager";
    pub const HAS_EXISTING_SESSIONS: &str = "_hasExistingSessions";
    pub const CALL_METHOD: &str = "call_method";
    pub const GET_OBJECT: &str = "get_object";
    pub const GET_PROPERTY: &str = "get_property";
    pub const SET_PROPERTY: &str = "set_property";
    pub const GET_ALL_USERS: &str = "get_all_users";
    pub const CLEAR_TEST_STATE: &str = "clear_test_state";

    /// Idle drain of server-initiated callbacks
    pub const CALLBACKS_POLL: &str = "callbacks_poll";
    /// Reply to a callback requested while serving an ordinary call
    pub const CALLBACK_RESULT: &str = "callback_result";
    /// Reply to a callback requested while serving a poll
    pub const CALLBACK_POLL_RESULT: &str = "callback_poll_result";
}

/// JSON keys used in request payloads
pub mod keys {
    pub const SESSION_ID: &str = "sessionId";
    pub const REALM_ID: &str = "realmId";
    pub const ID: &str = "id";
    pub const NAME: &str = "name";
    pub const ARGUMENTS: &str = "arguments";
    pub const VALUE: &str = "value";
    pub const REFRESH_ACCESS_TOKEN: &str = "refreshAccessToken";
    pub const BEFORE_NOTIFY: &str = "beforeNotify";

    // Callback replies
    pub const CALLBACK: &str = "callback";
    pub const RESULT: &str = "result";
    pub const ERROR: &str = "error";
    pub const STACK: &str = "stack";
    pub const CALLBACK_CALL_COUNTER: &str = "callback_call_counter";
}

/// Event name the read-isolation hook is registered under
pub const BEFORE_NOTIFY_EVENT: &str = "beforenotify";

/// Remote method that attaches a listener to an object
pub const ADD_LISTENER_METHOD: &str = "addListener";

/// Type tags of remote collections; each gets its own `beforenotify`
/// listener when first wrapped on this side
pub const COLLECTION_TYPES: &[&str] = &["results", "list", "collection"];

//! Literal tokens of the console wire protocol.
//!
//! These are exchanged as bare newline-terminated lines during the
//! handshake and relay authentication, before framed operation begins.

// ========== Handshake commands (client -> server) ==========

/// Credential exchange: `#UI {user},{secret}`
pub const CMD_USER_IDENT: &str = "#UI";
/// Server metadata request (name, type, title, domain)
pub const CMD_SERVER_INFO: &str = "#ST";
/// Prompt counter request
pub const CMD_COUNTERS: &str = "#CNTR";
/// Protocol version negotiation
pub const CMD_VERSION: &str = "#VERSION 2.0";
/// Server clock request
pub const CMD_TIMESTAMP: &str = "#TIMESTAMP";
/// Access level check
pub const CMD_CHECK_ACCESS: &str = "#CHKACCESS";
/// Session termination
pub const CMD_EXIT: &str = "#EXIT";

// ========== Handshake responses (server -> client) ==========

/// Credentials accepted
pub const RSP_VALID_USER: &str = "VALID_USER";
/// Secret rejected; retry allowed within the budget
pub const RSP_WRONG_PASSWORD: &str = "WRONG_PASSWORD";
/// Too many failed attempts; terminal
pub const RSP_MAXED_TRIALS: &str = "MAXED_TRIALS";
/// User is not a registered administrator; terminal
pub const RSP_NOT_REG_ADMIN: &str = "NOT_REG_ADMIN";
/// User is not a local administrator; terminal
pub const RSP_NOT_LOCAL_ADMIN: &str = "NOT_LOCAL_ADMIN";
/// User holds restricted rights only; terminal
pub const RSP_RESTRICTED_ADMIN: &str = "RESTRICTED_ADMIN";
/// Server connection limit reached; terminal
pub const RSP_MAXED_OUT: &str = "MAXED_OUT";
/// Full access granted
pub const RSP_FULL_ACCESS: &str = "FULLACCESS";
/// Request not understood by the remote
pub const RSP_BAD_COMMAND: &str = "BAD_COMMAND";

// ========== Relay (binder) authentication ==========

/// Step 1: identify the caller type
pub const RELAY_TYPE: &str = "#TYPE client";
/// Step 2: identify the requested logical service
pub const RELAY_SERVICE: &str = "#SERVICE";
/// Step 3: identify the requesting user
pub const RELAY_USER: &str = "#USER";
/// Step 4: identify the requesting host
pub const RELAY_HOST: &str = "#HOST";
/// Endpoint found; followed by `host:port` to connect to directly
pub const RELAY_FOUND: &str = "#OK";
/// Endpoint unknown to the relay; terminal
pub const RELAY_NOT_FOUND: &str = "#NOTFOUND";

// ========== Administrative commands ==========

/// Request a full server-directory refresh
pub const ADMIN_REFRESH_SERVERS: &str = "#refresh servers";
/// Broadcast text to all connected consoles
pub const ADMIN_BROADCAST: &str = "#broadcast";
/// Disconnect the current console session
pub const ADMIN_DISCONNECT: &str = "#disconnect";

// ========== Prompt replies ==========

/// Reply tag for password challenges: `PasswordCntr{n}={value}`
pub const REPLY_PASSWORD_CNTR: &str = "PasswordCntr";
/// Reply tag for yes/no challenges: `PromptCntr{n}={value}`
pub const REPLY_PROMPT_CNTR: &str = "PromptCntr";

/// Remote protocol versions below this use the legacy line-only wire format
pub const LEGACY_PROTO_THRESHOLD: u32 = 20;

//! Data models for the console client.

mod command;
mod credentials;
mod group;
mod line;
mod login;
mod server;

pub use command::{CommandKind, Destination, OutboundCommand};
pub use credentials::Credentials;
pub use group::{GroupKind, GroupRecord};
pub use line::ConsoleLine;
pub use login::{Endpoint, LoginSettings};
pub use server::{qualified_name, EventFilter, ServerOs, ServerRecord, SharedWriter};

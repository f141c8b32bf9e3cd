//! Command implementations for remotecar

pub mod command;
pub mod fingerprint;
pub mod login;
pub mod status;

pub use command::{command, CommandArgs};
pub use fingerprint::fingerprint;
pub use login::login;
pub use status::status;

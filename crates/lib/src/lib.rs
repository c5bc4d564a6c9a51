//! TECHWOLF core library: messaging client seam, per-number sessions, group commands, and the
//! HTTP gateway used by the CLI.

pub mod client;
pub mod commands;
pub mod config;
pub mod gateway;
pub mod init;
pub mod jid;
pub mod session;

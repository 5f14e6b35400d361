#![forbid(unsafe_code)]
//! Framed stdio transport, inject script rendering, binary sourcing, and
//! the retry/timeout engine that back the devpod agent bootstrap.
//!
//! This crate is the reusable core named in the top-level design: it knows
//! nothing about SSH, `exec`, or any particular RPC framework. Callers
//! supply the byte channel (an SSH session, a container `exec`, a plain
//! pipe) and an `Exec`-shaped capability; this crate supplies the protocol
//! plumbing around it.

pub mod arch;
pub mod binary_source;
pub mod cache;
pub mod retry;
pub mod script;
pub mod stdio_conn;

pub use arch::Arch;
pub use binary_source::{BinarySource, BinarySourceChain, BinarySourceError, BinaryStream};
pub use cache::BinaryCache;
pub use retry::{retry, RetryConfig, RetryError};
pub use script::{render as render_script, ScriptParams};
pub use stdio_conn::{CloseBehavior, StdioConnection};

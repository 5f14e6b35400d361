#![forbid(unsafe_code)]
//! The host-side bootstrap driver: handshake/injector orchestration over
//! an opaque [`exec::Exec`] transport, version checking, and per-attempt
//! metrics.

pub mod driver;
pub mod error;
pub mod exec;
pub mod options;
pub mod stderr_buffer;
pub mod version;

pub use driver::inject;
pub use error::{BootstrapError, InjectCause, InjectError, Stage};
pub use exec::{Exec, ExecError, ExecOutcome, ExecSession, ExecStderr, ExecStdin, ExecStdout, ExecWait};
pub use options::{
    DownloadPreference, FollowUpCommand, InjectOptions, InjectionMetrics, VersionCheckOutcome,
    DEFAULT_BASE_URL,
};
pub use stderr_buffer::DelayedStderr;

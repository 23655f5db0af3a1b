//! Pola: least-authority filesystem confinement
//!
//! Pola confines a launched process to the paths it was named with on its
//! command line, plus whatever the user grants interactively. This crate holds
//! the decision engine; the `pola-preload` library installs it in front of the
//! process's `open`/`opendir` calls and `pola-cli` launches commands under it.
//!
//! The pieces, leaf first:
//!
//! - [`PermissionStore`] answers "is this path allowed for this mode" and
//!   records grants.
//! - [`parse`] turns a command line into an argument vector and the write
//!   grants embedded in it (`+path` and `<path>`).
//! - [`ConsentProtocol`] asks the user about a single path and mode.
//! - [`PolicedGateway`] ties them together behind the [`FilesystemGateway`]
//!   interface.

mod audit;
mod config;
mod consent;
mod context;
mod error;
mod gateway;
mod launcher;
mod parser;
mod permissions;


pub use audit::{AuditRecord, AuditSink, StderrNotice, SyslogAudit, Target};
pub use config::{MatchMode, PolaConfig, PolicySettings};
pub use consent::{ConsentDecision, ConsentProtocol, ConsentRequest, Prompter, TerminalPrompter};
pub use context::{AuthorizationContext, Environment, InteractionMode, PermissionSet, ProcessEnv, vars};
pub use error::{Error, Result};
pub use gateway::{DirHandle, FilesystemGateway, PolicedGateway, RealGateway};
pub use launcher::Invocation;
pub use parser::{ParsedCommand, parse};
pub use permissions::{AccessMode, PermissionStore};

//! Authorization context and the environment contract that carries it from
//! the launching shell into the confined process and its descendants.

use std::collections::HashMap;
use std::ffi::{OsStr, OsString};
use std::os::unix::ffi::{OsStrExt, OsStringExt};
use std::process::Command;

use percent_encoding::{AsciiSet, CONTROLS, percent_decode, percent_encode};

use crate::config::{MatchMode, PolicySettings};
use crate::permissions::contains_subslice;

/// Names of the propagated variables.
pub mod vars {
    /// Present when the confined process must ask before every access.
    pub const INTERACTIVE_MODE: &str = "INTERACTIVE_MODE";
    /// Raw command line of the current invocation.
    pub const POLASH_CMD: &str = "POLASH_CMD";
    /// Serialized read grants.
    pub const READ_PERM: &str = "READ_PERM";
    /// Serialized write grants.
    pub const WRITE_PERM: &str = "WRITE_PERM";
    /// Read grants with each entry percent-encoded, so paths containing
    /// `+` survive the trip.
    pub const READ_SET: &str = "POLA_READ_SET";
    /// Write grants, encoded like [`READ_SET`].
    pub const WRITE_SET: &str = "POLA_WRITE_SET";
    /// Identity attached to audit records.
    pub const USERNAME: &str = "USERNAME";
    /// Fallback identity.
    pub const USER: &str = "USER";
    /// Maximum consent prompts per request.
    pub const PROMPT_ATTEMPTS: &str = "POLA_PROMPT_ATTEMPTS";
    /// `substring` or `exact`.
    pub const MATCH_MODE: &str = "POLA_MATCH_MODE";
    /// `1` to write denials to syslog.
    pub const SYSLOG: &str = "POLA_SYSLOG";
    /// Dynamic loader preload list.
    pub const LD_PRELOAD: &str = "LD_PRELOAD";
    /// Configuration file location.
    pub const CONFIG: &str = "POLA_CONFIG";
}

/// Whether the confined process decides alone or asks the user.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum InteractionMode {
    /// Every access is put to the user unless already remembered.
    Interactive,
    /// Reads are authorized by the command line, writes by annotations.
    #[default]
    NonInteractive,
}

/// A key/value environment the context can be loaded from and exported to.
pub trait Environment {
    /// Look up a variable.
    fn get(&self, key: &str) -> Option<OsString>;
    /// Set a variable.
    fn set(&mut self, key: &str, value: &OsStr);
    /// Remove a variable.
    fn remove(&mut self, key: &str);
}

/// The environment of the running process.
#[derive(Debug)]
pub struct ProcessEnv {
    _private: (),
}

impl ProcessEnv {
    /// Access the process environment.
    ///
    /// # Safety
    ///
    /// `set` and `remove` modify the process environment. No other thread
    /// may read or write the environment while they run.
    pub unsafe fn new() -> Self {
        Self { _private: () }
    }
}

impl Environment for ProcessEnv {
    fn get(&self, key: &str) -> Option<OsString> {
        std::env::var_os(key)
    }

    fn set(&mut self, key: &str, value: &OsStr) {
        // SAFETY: guaranteed by the contract of `ProcessEnv::new`.
        unsafe { std::env::set_var(key, value) }
    }

    fn remove(&mut self, key: &str) {
        // SAFETY: guaranteed by the contract of `ProcessEnv::new`.
        unsafe { std::env::remove_var(key) }
    }
}

impl Environment for HashMap<String, OsString> {
    fn get(&self, key: &str) -> Option<OsString> {
        HashMap::get(self, key).cloned()
    }

    fn set(&mut self, key: &str, value: &OsStr) {
        self.insert(key.to_string(), value.to_os_string());
    }

    fn remove(&mut self, key: &str) {
        HashMap::remove(self, key);
    }
}

/// A child's environment: explicit settings first, then what it inherits.
impl Environment for Command {
    fn get(&self, key: &str) -> Option<OsString> {
        match self.get_envs().find(|(k, _)| *k == OsStr::new(key)) {
            Some((_, value)) => value.map(OsStr::to_os_string),
            None => std::env::var_os(key),
        }
    }

    fn set(&mut self, key: &str, value: &OsStr) {
        self.env(key, value);
    }

    fn remove(&mut self, key: &str) {
        self.env_remove(key);
    }
}

/// Bytes escaped inside an encoded entry.
const ENTRY: &AsciiSet = &CONTROLS.add(b'+').add(b'%');

/// An ordered, de-duplicated set of granted paths.
///
/// The propagated form is each path prefixed with `+` and concatenated
/// (`+a.txt+/tmp/out`). Substring queries run against that text. Since a
/// path may itself contain `+`, the entries also travel in an encoded form
/// (see [`PermissionSet::encoded`]) that exact queries are rebuilt from.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PermissionSet {
    entries: Vec<Vec<u8>>,
    text: Vec<u8>,
}

impl PermissionSet {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a set from its propagated form.
    pub fn from_serialized(text: &[u8]) -> Self {
        let entries = text
            .split(|b| *b == b'+')
            .filter(|entry| !entry.is_empty())
            .map(<[u8]>::to_vec)
            .fold(Vec::new(), |mut acc: Vec<Vec<u8>>, entry| {
                if !acc.contains(&entry) {
                    acc.push(entry);
                }
                acc
            });
        Self {
            entries,
            text: text.to_vec(),
        }
    }

    /// Rebuild a set from its propagated form, taking the entries from
    /// `encoded` when it is available.
    pub fn from_propagated(text: &[u8], encoded: Option<&[u8]>) -> Self {
        let Some(encoded) = encoded else {
            return Self::from_serialized(text);
        };
        let mut entries: Vec<Vec<u8>> = Vec::new();
        for entry in encoded.split(|b| *b == b'+').filter(|e| !e.is_empty()) {
            let entry: Vec<u8> = percent_decode(entry).collect();
            if !entry.is_empty() && !entries.contains(&entry) {
                entries.push(entry);
            }
        }
        Self {
            entries,
            text: text.to_vec(),
        }
    }

    /// Each entry percent-encoded and prefixed with `+`.
    pub fn encoded(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for entry in &self.entries {
            out.push(b'+');
            out.extend(percent_encode(entry, ENTRY).flat_map(str::bytes));
        }
        out
    }

    /// Add a path. Returns false if it was already present or empty.
    pub fn insert(&mut self, path: &[u8]) -> bool {
        if path.is_empty() || self.contains(path) {
            return false;
        }
        self.entries.push(path.to_vec());
        self.text.push(b'+');
        self.text.extend_from_slice(path);
        true
    }

    /// Returns true if exactly `path` was granted.
    pub fn contains(&self, path: &[u8]) -> bool {
        self.entries.iter().any(|entry| entry == path)
    }

    /// Returns true if `path` is covered by the set under `match_mode`.
    pub fn matches(&self, path: &[u8], match_mode: MatchMode) -> bool {
        if path.is_empty() {
            return false;
        }
        match match_mode {
            MatchMode::Substring => contains_subslice(&self.text, path),
            MatchMode::Exact => self.contains(path),
        }
    }

    /// Propagated form of the set.
    pub fn serialized(&self) -> &[u8] {
        &self.text
    }

    /// Iterate over granted paths in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &[u8]> {
        self.entries.iter().map(Vec::as_slice)
    }

    /// Number of distinct entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing was granted.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Everything the interception layer needs to decide, for one invocation.
///
/// Created when a command is accepted, handed to the child through
/// [`AuthorizationContext::export`] and rebuilt on the other side with
/// [`AuthorizationContext::load`].
#[derive(Clone, Debug)]
pub struct AuthorizationContext {
    /// Raw command text; any substring of it is readable in non-interactive mode.
    pub command_line: Vec<u8>,
    /// Read grants.
    pub read: PermissionSet,
    /// Write grants.
    pub write: PermissionSet,
    /// Interaction mode, fixed for the lifetime of the confined process.
    pub interaction: InteractionMode,
    /// Identity attached to audit records.
    pub user: String,
    /// Policy knobs propagated alongside the grants.
    pub settings: PolicySettings,
}

impl AuthorizationContext {
    /// Context for a command launched from the shell.
    pub fn non_interactive(command_line: impl Into<Vec<u8>>) -> Self {
        Self {
            command_line: command_line.into(),
            read: PermissionSet::new(),
            write: PermissionSet::new(),
            interaction: InteractionMode::NonInteractive,
            user: resolve_user(std::env::var_os(vars::USERNAME), std::env::var_os(vars::USER)),
            settings: PolicySettings::default(),
        }
    }

    /// Context for a command run under interactive consent.
    pub fn interactive() -> Self {
        Self {
            interaction: InteractionMode::Interactive,
            ..Self::non_interactive(Vec::new())
        }
    }

    /// Replace the policy settings.
    pub fn with_settings(mut self, settings: PolicySettings) -> Self {
        self.settings = settings;
        self
    }

    /// Replace the audited identity.
    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = user.into();
        self
    }

    /// Rebuild the context from an environment.
    ///
    /// Missing variables load as empty.
    pub fn load(env: &impl Environment, settings: PolicySettings) -> Self {
        let var = |key: &str| env.get(key).map(OsString::into_vec);
        let bytes = |key: &str| var(key).unwrap_or_default();
        let interaction = if env.get(vars::INTERACTIVE_MODE).is_some() {
            InteractionMode::Interactive
        } else {
            InteractionMode::NonInteractive
        };
        Self {
            command_line: bytes(vars::POLASH_CMD),
            read: PermissionSet::from_propagated(
                &bytes(vars::READ_PERM),
                var(vars::READ_SET).as_deref(),
            ),
            write: PermissionSet::from_propagated(
                &bytes(vars::WRITE_PERM),
                var(vars::WRITE_SET).as_deref(),
            ),
            interaction,
            user: resolve_user(env.get(vars::USERNAME), env.get(vars::USER)),
            settings,
        }
    }

    /// Write the full context into an environment.
    pub fn export(&self, env: &mut impl Environment) {
        match self.interaction {
            InteractionMode::Interactive => env.set(vars::INTERACTIVE_MODE, OsStr::new("1")),
            InteractionMode::NonInteractive => env.remove(vars::INTERACTIVE_MODE),
        }
        env.set(vars::POLASH_CMD, OsStr::from_bytes(&self.command_line));
        env.set(vars::USERNAME, OsStr::new(&self.user));
        self.settings.export(env);
        self.export_grants(env);
    }

    /// Write only the grant sets, after they changed.
    pub fn export_grants(&self, env: &mut impl Environment) {
        env.set(vars::READ_PERM, OsStr::from_bytes(self.read.serialized()));
        env.set(vars::WRITE_PERM, OsStr::from_bytes(self.write.serialized()));
        env.set(vars::READ_SET, OsStr::from_bytes(&self.read.encoded()));
        env.set(vars::WRITE_SET, OsStr::from_bytes(&self.write.encoded()));
    }
}

fn resolve_user(username: Option<OsString>, user: Option<OsString>) -> String {
    username
        .or(user)
        .map(|u| u.to_string_lossy().into_owned())
        .filter(|u| !u.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}

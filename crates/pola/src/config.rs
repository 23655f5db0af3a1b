//! Configuration for launching and confining commands

use std::ffi::{OsStr, OsString};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::context::{Environment, vars};
use crate::error::{Error, Result};

/// How a requested path is compared with the command line and grant lists.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchMode {
    /// The path only has to occur somewhere in the text (`a` matches `cats`).
    #[default]
    Substring,
    /// The path must equal a granted path or a command-line word.
    Exact,
}

impl MatchMode {
    /// Name used in configuration and in the propagated environment.
    pub fn as_str(self) -> &'static str {
        match self {
            MatchMode::Substring => "substring",
            MatchMode::Exact => "exact",
        }
    }
}

impl fmt::Display for MatchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MatchMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "substring" => Ok(MatchMode::Substring),
            "exact" => Ok(MatchMode::Exact),
            _ => Err(Error::InvalidSetting {
                key: vars::MATCH_MODE.to_string(),
                value: s.to_string(),
            }),
        }
    }
}

/// Policy knobs that travel with the grants into the confined process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicySettings {
    /// How many unrecognized answers are tolerated before a request is denied
    pub max_prompt_attempts: u32,
    /// Path comparison rule
    pub match_mode: MatchMode,
    /// Send denials to syslog (`LOG_AUTHPRIV`)
    pub syslog: bool,
}

impl Default for PolicySettings {
    fn default() -> Self {
        Self {
            max_prompt_attempts: 3,
            match_mode: MatchMode::Substring,
            syslog: true,
        }
    }
}

impl PolicySettings {
    /// Read settings from an environment, defaulting what is unset.
    pub fn from_env(env: &impl Environment) -> Result<Self> {
        let mut settings = Self::default();

        if let Some(value) = lookup(env, vars::PROMPT_ATTEMPTS) {
            settings.max_prompt_attempts =
                value.trim().parse().map_err(|_| Error::InvalidSetting {
                    key: vars::PROMPT_ATTEMPTS.to_string(),
                    value: value.clone(),
                })?;
        }
        if let Some(value) = lookup(env, vars::MATCH_MODE) {
            settings.match_mode = value.parse()?;
        }
        if let Some(value) = lookup(env, vars::SYSLOG) {
            settings.syslog = match value.trim() {
                "1" | "true" | "yes" => true,
                "0" | "false" | "no" => false,
                _ => {
                    return Err(Error::InvalidSetting {
                        key: vars::SYSLOG.to_string(),
                        value,
                    });
                }
            };
        }

        Ok(settings)
    }

    /// Write settings into an environment.
    pub fn export(&self, env: &mut impl Environment) {
        env.set(
            vars::PROMPT_ATTEMPTS,
            OsStr::new(&self.max_prompt_attempts.to_string()),
        );
        env.set(vars::MATCH_MODE, OsStr::new(self.match_mode.as_str()));
        env.set(vars::SYSLOG, OsStr::new(if self.syslog { "1" } else { "0" }));
    }
}

fn lookup(env: &impl Environment, key: &str) -> Option<String> {
    env.get(key)
        .map(|v| v.to_string_lossy().into_owned())
        .filter(|v| !v.trim().is_empty())
}

/// Launcher configuration.
///
/// Loaded from a JSON file; every field has a default.
///
/// ```json
/// {
///   "preload_library": "/usr/lib/pola/libpola_preload.so",
///   "extra_path": ["bin"],
///   "policy": { "max_prompt_attempts": 5, "match_mode": "exact" }
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolaConfig {
    /// Shared library installed with `LD_PRELOAD` in every launched command
    pub preload_library: PathBuf,
    /// Directories appended to `PATH`; relative entries are resolved against
    /// the launcher's working directory
    pub extra_path: Vec<PathBuf>,
    /// Settings propagated to the confined process
    pub policy: PolicySettings,
}

impl Default for PolaConfig {
    fn default() -> Self {
        Self {
            preload_library: PathBuf::from("./lib/libpola_preload.so"),
            extra_path: vec![PathBuf::from("bin")],
            policy: PolicySettings::default(),
        }
    }
}

impl PolaConfig {
    /// Load configuration from `path`, or from `$POLA_CONFIG`, or defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => Some(p.to_path_buf()),
            None => std::env::var_os(vars::CONFIG)
                .filter(|p| !p.is_empty())
                .map(PathBuf::from),
        };

        match path {
            Some(path) => {
                tracing::debug!(path = %path.display(), "loading configuration");
                Self::from_json(&std::fs::read_to_string(&path)?)
            }
            None => Ok(Self::default()),
        }
    }

    /// Parse configuration from JSON text.
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Absolute location of the preload library.
    pub fn preload_path(&self, cwd: &Path) -> PathBuf {
        cwd.join(&self.preload_library)
    }

    /// `current` with the extra directories appended.
    pub fn search_path(&self, current: Option<&OsStr>, cwd: &Path) -> Result<OsString> {
        let existing = current
            .map(|p| std::env::split_paths(p).collect::<Vec<_>>())
            .unwrap_or_default();
        let extra = self.extra_path.iter().map(|p| cwd.join(p));

        std::env::join_paths(existing.into_iter().chain(extra)).map_err(|e| {
            Error::InvalidSetting {
                key: "PATH".to_string(),
                value: e.to_string(),
            }
        })
    }
}

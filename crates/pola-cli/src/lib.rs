//! Shared plumbing for the `polash` and `pola-i` launchers.

use std::path::PathBuf;

use anyhow::Context;
use clap::Args;
use pola::{MatchMode, PolaConfig};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Options accepted by both launchers. Flags override the configuration file.
#[derive(Args, Debug, Default)]
pub struct ConfigArgs {
    /// JSON configuration file (defaults to $POLA_CONFIG)
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Preload library installed into launched commands
    #[arg(long, value_name = "LIB")]
    pub preload: Option<PathBuf>,

    /// How requested paths are compared with granted ones
    #[arg(long, value_name = "MODE")]
    pub match_mode: Option<MatchMode>,

    /// Answers accepted before a consent prompt gives up
    #[arg(long, value_name = "N", value_parser = clap::value_parser!(u32).range(1..))]
    pub prompt_attempts: Option<u32>,

    /// Do not send denials to syslog
    #[arg(long)]
    pub no_syslog: bool,
}

impl ConfigArgs {
    /// Load the configuration and apply the command-line overrides.
    pub fn resolve(&self) -> anyhow::Result<PolaConfig> {
        let mut config = PolaConfig::load(self.config.as_deref())
            .context("failed to load configuration")?;

        if let Some(preload) = &self.preload {
            config.preload_library = preload.clone();
        }
        if let Some(mode) = self.match_mode {
            config.policy.match_mode = mode;
        }
        if let Some(attempts) = self.prompt_attempts {
            config.policy.max_prompt_attempts = attempts;
        }
        if self.no_syslog {
            config.policy.syslog = false;
        }

        tracing::debug!(?config, "configuration resolved");
        Ok(config)
    }
}

/// Install the diagnostic subscriber. Defaults to warnings only; `RUST_LOG`
/// raises it.
pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();
}

//! pola-i - run one command with interactive consent
//!
//! The command starts with no grants. Each file it opens is put to the user,
//! who may allow it once, allow and remember it, or refuse.
//!
//! Usage:
//!   pola-i [flags] <command> [args]...

use clap::Parser;
use pola::Invocation;
use pola_cli::{ConfigArgs, init_tracing};

#[derive(Parser, Debug)]
#[command(name = "pola-i")]
#[command(about = "Run a command, asking before each file it opens")]
struct Cli {
    #[command(flatten)]
    config: ConfigArgs,

    /// Command to run, followed by its arguments
    #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
    command: Vec<String>,
}

fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = cli.config.resolve()?;

    let invocation = Invocation::interactive(cli.command, config.policy.clone());
    Err(invocation.exec(&config).into())
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_command_keeps_its_own_flags() {
        let cli =
            Cli::try_parse_from(["pola-i", "--prompt-attempts", "1", "ls", "-la", "/tmp"]).unwrap();
        assert_eq!(cli.config.prompt_attempts, Some(1));
        assert_eq!(cli.command, ["ls", "-la", "/tmp"]);
    }

    #[test]
    fn test_command_is_required() {
        assert!(Cli::try_parse_from(["pola-i"]).is_err());
    }
}

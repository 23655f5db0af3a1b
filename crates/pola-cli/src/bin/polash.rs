//! polash - a shell where every command runs confined
//!
//! Each line is launched under the pola preload library. Files named on the
//! line may be read; files annotated with `+path` or `<path>` may be written.
//!
//! Usage:
//!   polash [--config FILE] [--preload LIB] [--match-mode M] [--prompt-attempts N]

use std::io::{self, BufRead, Write};

use clap::Parser;
use pola::Invocation;
use pola_cli::{ConfigArgs, init_tracing};

const PROMPT: &str = "# ";

#[derive(Parser, Debug)]
#[command(name = "polash")]
#[command(about = "Shell granting each command only the files named on its line")]
struct Cli {
    #[command(flatten)]
    config: ConfigArgs,
}

fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = cli.config.resolve()?;

    let stdin = io::stdin();
    let mut stdout = io::stdout();
    let mut line = String::new();

    loop {
        write!(stdout, "{PROMPT}")?;
        stdout.flush()?;

        line.clear();
        if stdin.lock().read_line(&mut line)? == 0 {
            writeln!(stdout)?;
            break;
        }

        let command = line.trim_end_matches(['\n', '\r']);
        if command.trim().is_empty() {
            continue;
        }
        if command.trim() == "exit" {
            break;
        }

        let invocation = Invocation::parse(command, config.policy.clone());
        if invocation.program().is_none() {
            continue;
        }
        match invocation.run(&config) {
            Ok(status) => tracing::debug!(%status, "command exited"),
            Err(e) => eprintln!("polash: {e}"),
        }
    }

    Ok(())
}

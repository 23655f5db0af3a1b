//! Turning an accepted command into a confined child process.

use std::io;
use std::path::Path;
use std::process::Command;

use crate::config::{PolaConfig, PolicySettings};
use crate::context::{AuthorizationContext, vars};
use crate::error::{Error, Result};
use crate::parser;

/// One top-level command and the authority it carries.
///
/// The context is created fresh for every invocation: nothing granted to an
/// earlier command survives into this one.
#[derive(Clone, Debug)]
pub struct Invocation {
    argv: Vec<String>,
    context: AuthorizationContext,
}

impl Invocation {
    /// A command typed at the shell, decided without prompting.
    ///
    /// The annotations become write grants and the raw line itself becomes
    /// the read authority.
    pub fn parse(line: &str, settings: PolicySettings) -> Self {
        let line = line.trim_end_matches(['\n', '\r']);
        let parsed = parser::parse(line);

        let mut context = AuthorizationContext::non_interactive(line).with_settings(settings);
        for grant in &parsed.write_grants {
            context.write.insert(grant.as_bytes());
        }
        tracing::debug!(
            argv = ?parsed.argv,
            write_grants = ?parsed.write_grants,
            "command parsed"
        );

        Self {
            argv: parsed.argv,
            context,
        }
    }

    /// A command run under interactive consent, starting with no grants.
    pub fn interactive(argv: Vec<String>, settings: PolicySettings) -> Self {
        Self {
            argv,
            context: AuthorizationContext::interactive().with_settings(settings),
        }
    }

    /// Arguments, program first.
    pub fn argv(&self) -> &[String] {
        &self.argv
    }

    /// The program to run.
    pub fn program(&self) -> Option<&str> {
        self.argv.first().map(String::as_str)
    }

    /// The authority handed to the child.
    pub fn context(&self) -> &AuthorizationContext {
        &self.context
    }

    /// Build the child process, using the current directory to resolve
    /// relative paths in `config`.
    pub fn command(&self, config: &PolaConfig) -> Result<Command> {
        let cwd = std::env::current_dir()?;
        self.command_in(config, &cwd)
    }

    /// Build the child process, resolving relative paths against `cwd`.
    pub fn command_in(&self, config: &PolaConfig, cwd: &Path) -> Result<Command> {
        let (program, args) = self.argv.split_first().ok_or_else(|| Error::Launch {
            program: String::new(),
            source: io::Error::new(io::ErrorKind::InvalidInput, "empty command"),
        })?;

        let mut command = Command::new(program);
        command.args(args);
        command.env(vars::LD_PRELOAD, config.preload_path(cwd));
        command.env(
            "PATH",
            config.search_path(std::env::var_os("PATH").as_deref(), cwd)?,
        );
        self.context.export(&mut command);

        Ok(command)
    }

    /// Run the command to completion.
    pub fn run(&self, config: &PolaConfig) -> Result<std::process::ExitStatus> {
        let mut command = self.command(config)?;
        let program = self.program().unwrap_or_default().to_string();
        let status = command
            .status()
            .map_err(|source| Error::Launch { program, source })?;
        tracing::debug!(?status, "command finished");
        Ok(status)
    }

    /// Replace the current process with the command. Only returns on error.
    pub fn exec(&self, config: &PolaConfig) -> Error {
        use std::os::unix::process::CommandExt;

        match self.command(config) {
            Ok(mut command) => Error::Launch {
                program: self.program().unwrap_or_default().to_string(),
                source: command.exec(),
            },
            Err(e) => e,
        }
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use std::ffi::OsStr;
    use std::path::PathBuf;

    use super::*;
    use crate::context::InteractionMode;

    fn explicit_env<'a>(command: &'a Command, key: &str) -> Option<&'a OsStr> {
        command
            .get_envs()
            .find(|(k, _)| *k == OsStr::new(key))
            .and_then(|(_, v)| v)
    }

    #[test]
    fn test_parse_seeds_write_grants() {
        let inv = Invocation::parse("cp <in.txt> out.txt +out.txt\n", PolicySettings::default());

        assert_eq!(inv.argv(), &["cp", "in.txt", "out.txt"]);
        assert_eq!(inv.program(), Some("cp"));
        assert_eq!(inv.context().command_line, b"cp <in.txt> out.txt +out.txt");
        assert!(inv.context().write.contains(b"in.txt"));
        assert!(inv.context().write.contains(b"out.txt"));
        assert!(inv.context().read.is_empty());
        assert_eq!(inv.context().interaction, InteractionMode::NonInteractive);
    }

    #[test]
    fn test_interactive_starts_empty() {
        let inv = Invocation::interactive(
            vec!["vim".to_string(), "notes.txt".to_string()],
            PolicySettings::default(),
        );
        assert_eq!(inv.context().interaction, InteractionMode::Interactive);
        assert!(inv.context().write.is_empty());
        assert!(inv.context().command_line.is_empty());
    }

    #[test]
    fn test_command_environment() {
        let config = PolaConfig::default();
        let inv = Invocation::parse("ls +out", PolicySettings::default());
        let command = inv.command_in(&config, Path::new("/work")).unwrap();

        assert_eq!(command.get_program(), "ls");
        assert_eq!(command.get_args().count(), 0);
        assert_eq!(
            explicit_env(&command, "LD_PRELOAD").map(PathBuf::from),
            Some(PathBuf::from("/work/./lib/libpola_preload.so"))
        );
        assert_eq!(
            explicit_env(&command, "POLASH_CMD"),
            Some(OsStr::new("ls +out"))
        );
        assert_eq!(explicit_env(&command, "WRITE_PERM"), Some(OsStr::new("+out")));
        assert_eq!(explicit_env(&command, "READ_PERM"), Some(OsStr::new("")));
        assert!(
            explicit_env(&command, "PATH")
                .unwrap()
                .to_string_lossy()
                .ends_with("/work/bin")
        );
        // Non-interactive commands must not inherit the interactive flag.
        assert!(
            command
                .get_envs()
                .any(|(k, v)| k == OsStr::new("INTERACTIVE_MODE") && v.is_none())
        );
    }

    #[test]
    fn test_empty_command_is_rejected() {
        let inv = Invocation::parse("   ", PolicySettings::default());
        let err = inv
            .command_in(&PolaConfig::default(), Path::new("/"))
            .unwrap_err();
        assert!(matches!(err, Error::Launch { .. }));
    }
}

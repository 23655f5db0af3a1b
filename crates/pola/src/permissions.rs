//! Permission store: what a confined process may open, and in which mode.

use std::fmt;

use libc::c_int;

use crate::config::MatchMode;
use crate::context::{AuthorizationContext, InteractionMode, PermissionSet};
use crate::parser;

/// The kind of access an open request asks for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AccessMode {
    /// Reading file or directory contents
    Read,
    /// Writing file contents
    Write,
    /// Both at once (`O_RDWR`)
    ReadWrite,
}

impl AccessMode {
    /// Derive the access mode from `open(2)` flags.
    ///
    /// Only the `O_ACCMODE` bits are considered. The invalid combination `3`
    /// is treated as [`AccessMode::ReadWrite`], the strictest reading.
    pub fn from_flags(flags: c_int) -> Self {
        match flags & libc::O_ACCMODE {
            libc::O_RDONLY => AccessMode::Read,
            libc::O_WRONLY => AccessMode::Write,
            _ => AccessMode::ReadWrite,
        }
    }

    /// The `O_ACCMODE` bits for this mode.
    pub fn access_bits(self) -> c_int {
        match self {
            AccessMode::Read => libc::O_RDONLY,
            AccessMode::Write => libc::O_WRONLY,
            AccessMode::ReadWrite => libc::O_RDWR,
        }
    }

    /// The single modes this mode is made of, read first.
    pub fn parts(self) -> &'static [AccessMode] {
        match self {
            AccessMode::Read => &[AccessMode::Read],
            AccessMode::Write => &[AccessMode::Write],
            AccessMode::ReadWrite => &[AccessMode::Read, AccessMode::Write],
        }
    }

    /// Returns true if this mode lets the caller write.
    pub fn includes_write(self) -> bool {
        matches!(self, AccessMode::Write | AccessMode::ReadWrite)
    }

    /// The smallest mode covering both `self` and `other`.
    pub fn union(self, other: AccessMode) -> AccessMode {
        if self == other {
            self
        } else {
            AccessMode::ReadWrite
        }
    }
}

impl fmt::Display for AccessMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AccessMode::Read => "read",
            AccessMode::Write => "write",
            AccessMode::ReadWrite => "read/write",
        })
    }
}

/// Holds the authorization state of one invocation and answers questions
/// about it.
///
/// Membership only grows: there is no revoke. A denial is the outcome of one
/// request, never a permanent block.
#[derive(Clone, Debug)]
pub struct PermissionStore {
    context: AuthorizationContext,
}

impl PermissionStore {
    /// Create a store over an authorization context.
    pub fn new(context: AuthorizationContext) -> Self {
        Self { context }
    }

    /// The context this store decides from.
    pub fn context(&self) -> &AuthorizationContext {
        &self.context
    }

    /// Interaction mode of the invocation.
    pub fn interaction(&self) -> InteractionMode {
        self.context.interaction
    }

    /// Check whether `path` may be opened with `mode`.
    ///
    /// * Read: in non-interactive mode the path must appear in the raw
    ///   command line; in interactive mode it must appear in the read grants.
    /// * Write: the path must appear in the write grants.
    /// * ReadWrite: both checks must pass.
    ///
    /// An empty path is never authorized.
    pub fn is_authorized(&self, path: &[u8], mode: AccessMode) -> bool {
        if path.is_empty() {
            return false;
        }
        mode.parts().iter().all(|part| match part {
            AccessMode::Read => self.read_authorized(path),
            _ => self
                .context
                .write
                .matches(path, self.context.settings.match_mode),
        })
    }

    /// Record a grant for `path`. Returns true if the state changed.
    ///
    /// Granting a path twice has no further effect on authorization.
    pub fn grant(&mut self, path: &[u8], mode: AccessMode) -> bool {
        let mut grew = false;
        for part in mode.parts() {
            grew |= self.set_mut(*part).insert(path);
        }
        grew
    }

    fn read_authorized(&self, path: &[u8]) -> bool {
        let match_mode = self.context.settings.match_mode;
        match self.context.interaction {
            InteractionMode::NonInteractive => command_line_mentions(
                &self.context.command_line,
                path,
                match_mode,
            ),
            InteractionMode::Interactive => self.context.read.matches(path, match_mode),
        }
    }

    fn set_mut(&mut self, part: AccessMode) -> &mut PermissionSet {
        match part {
            AccessMode::Read => &mut self.context.read,
            _ => &mut self.context.write,
        }
    }
}

/// Returns true if `needle` occurs anywhere inside `haystack`.
pub(crate) fn contains_subslice(haystack: &[u8], needle: &[u8]) -> bool {
    if needle.is_empty() {
        return true;
    }
    haystack
        .windows(needle.len())
        .any(|window| window == needle)
}

fn command_line_mentions(command_line: &[u8], path: &[u8], match_mode: MatchMode) -> bool {
    match match_mode {
        MatchMode::Substring => contains_subslice(command_line, path),
        MatchMode::Exact => {
            let parsed = parser::parse(&String::from_utf8_lossy(command_line));
            parsed
                .argv
                .iter()
                .chain(parsed.write_grants.iter())
                .any(|word| word.as_bytes() == path)
        }
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::config::PolicySettings;

    fn non_interactive(command_line: &str) -> PermissionStore {
        PermissionStore::new(AuthorizationContext::non_interactive(command_line))
    }

    #[test]
    fn test_access_mode_from_flags() {
        assert_eq!(AccessMode::from_flags(libc::O_RDONLY), AccessMode::Read);
        assert_eq!(
            AccessMode::from_flags(libc::O_WRONLY | libc::O_CREAT | libc::O_TRUNC),
            AccessMode::Write
        );
        assert_eq!(
            AccessMode::from_flags(libc::O_RDWR | libc::O_APPEND),
            AccessMode::ReadWrite
        );
        assert_eq!(AccessMode::from_flags(libc::O_ACCMODE), AccessMode::ReadWrite);
    }

    #[test]
    fn test_access_mode_union() {
        assert_eq!(AccessMode::Read.union(AccessMode::Read), AccessMode::Read);
        assert_eq!(AccessMode::Read.union(AccessMode::Write), AccessMode::ReadWrite);
        assert_eq!(AccessMode::Write.union(AccessMode::Read), AccessMode::ReadWrite);
        assert_eq!(
            AccessMode::ReadWrite.parts(),
            &[AccessMode::Read, AccessMode::Write]
        );
    }

    #[test]
    fn test_read_authorized_by_command_line() {
        let store = non_interactive("cat notes.txt");

        assert!(store.is_authorized(b"notes.txt", AccessMode::Read));
        assert!(!store.is_authorized(b"/etc/passwd", AccessMode::Read));
        // Writing needs an explicit grant even when the path was named.
        assert!(!store.is_authorized(b"notes.txt", AccessMode::Write));
    }

    #[test]
    fn test_substring_matching_is_loose() {
        let store = non_interactive("cat cats.txt");

        // "a" appears inside "cats", which is enough in substring mode.
        assert!(store.is_authorized(b"a", AccessMode::Read));
        assert!(store.is_authorized(b"cats", AccessMode::Read));
    }

    #[test]
    fn test_exact_matching_requires_whole_words() {
        let settings = PolicySettings {
            match_mode: MatchMode::Exact,
            ..PolicySettings::default()
        };
        let mut context = AuthorizationContext::non_interactive("cat cats.txt +out.log")
            .with_settings(settings);
        context.write.insert(b"out.log");
        let store = PermissionStore::new(context);

        assert!(store.is_authorized(b"cats.txt", AccessMode::Read));
        assert!(store.is_authorized(b"out.log", AccessMode::Read));
        assert!(!store.is_authorized(b"a", AccessMode::Read));
        assert!(store.is_authorized(b"out.log", AccessMode::Write));
        assert!(!store.is_authorized(b"out", AccessMode::Write));
    }

    #[test]
    fn test_empty_command_line_denies_reads() {
        let store = non_interactive("");
        assert!(!store.is_authorized(b"/tmp/x", AccessMode::Read));
        assert!(!store.is_authorized(b"", AccessMode::Read));
    }

    #[test]
    fn test_read_write_needs_both() {
        let mut store = non_interactive("sort data.csv");
        assert!(!store.is_authorized(b"data.csv", AccessMode::ReadWrite));

        store.grant(b"data.csv", AccessMode::Write);
        assert!(store.is_authorized(b"data.csv", AccessMode::ReadWrite));
    }

    #[test]
    fn test_interactive_reads_ignore_command_line() {
        let mut context = AuthorizationContext::interactive();
        context.command_line = b"cat notes.txt".to_vec();
        let mut store = PermissionStore::new(context);

        assert!(!store.is_authorized(b"notes.txt", AccessMode::Read));
        assert!(store.grant(b"notes.txt", AccessMode::Read));
        assert!(store.is_authorized(b"notes.txt", AccessMode::Read));
        assert!(!store.is_authorized(b"notes.txt", AccessMode::Write));
    }

    #[test]
    fn test_grant_is_idempotent() {
        let mut store = non_interactive("");
        assert!(store.grant(b"/tmp/x", AccessMode::Write));
        assert!(!store.grant(b"/tmp/x", AccessMode::Write));

        assert!(store.is_authorized(b"/tmp/x", AccessMode::Write));
        assert_eq!(store.context().write.len(), 1);
    }

    #[test]
    fn test_grant_read_write_fills_both_sets() {
        let mut store = PermissionStore::new(AuthorizationContext::interactive());
        assert!(store.grant(b"/srv/db", AccessMode::ReadWrite));
        assert!(store.is_authorized(b"/srv/db", AccessMode::ReadWrite));
    }

    #[test]
    fn test_empty_grant_is_ignored() {
        let mut store = non_interactive("");
        assert!(!store.grant(b"", AccessMode::Write));
        assert!(store.context().write.is_empty());
    }

    #[test]
    fn test_contains_subslice() {
        assert!(contains_subslice(b"+a+bcd", b"bc"));
        assert!(!contains_subslice(b"+a", b"ab"));
        assert!(contains_subslice(b"", b""));
    }
}

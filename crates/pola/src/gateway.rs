//! Filesystem gateways: the genuine primitives and the policy wrapper in
//! front of them.
//!
//! The interception mechanism itself (symbol override) lives in the preload
//! library; everything that decides lives here, behind [`FilesystemGateway`].

use std::ffi::{CStr, c_void};
use std::fmt;
use std::io;
use std::os::fd::{FromRawFd, OwnedFd};
use std::ptr::NonNull;

use libc::{c_char, c_int, c_uint, mode_t};

use crate::audit::{AuditRecord, AuditSink, Target};
use crate::consent::{ConsentDecision, ConsentProtocol, ConsentRequest, Prompter};
use crate::context::{Environment, InteractionMode};
use crate::error::{Error, Result};
use crate::permissions::{AccessMode, PermissionStore};

/// The two filesystem entry points that are mediated.
///
/// Signatures mirror `open(2)` and `opendir(3)`.
pub trait FilesystemGateway {
    /// Handle returned by a successful `open`.
    type File;
    /// Handle returned by a successful `opendir`.
    type Dir;

    /// Open a file.
    fn open(&mut self, path: &CStr, flags: c_int, mode: mode_t) -> io::Result<Self::File>;

    /// Open a directory stream.
    fn opendir(&mut self, path: &CStr) -> io::Result<Self::Dir>;
}

type OpenFn = unsafe extern "C" fn(*const c_char, c_int, ...) -> c_int;
type OpenDirFn = unsafe extern "C" fn(*const c_char) -> *mut libc::DIR;

/// An open directory stream, closed on drop.
#[derive(Debug)]
pub struct DirHandle(NonNull<libc::DIR>);

impl DirHandle {
    /// Borrow the raw stream.
    pub fn as_ptr(&self) -> *mut libc::DIR {
        self.0.as_ptr()
    }

    /// Give up ownership of the stream without closing it.
    pub fn into_raw(self) -> *mut libc::DIR {
        let ptr = self.0.as_ptr();
        std::mem::forget(self);
        ptr
    }
}

impl Drop for DirHandle {
    fn drop(&mut self) {
        // SAFETY: the pointer came from a successful opendir and is owned.
        unsafe { libc::closedir(self.0.as_ptr()) };
    }
}

/// The unmediated primitives.
#[derive(Clone, Copy)]
pub struct RealGateway {
    open: OpenFn,
    opendir: OpenDirFn,
}

impl fmt::Debug for RealGateway {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RealGateway").finish_non_exhaustive()
    }
}

impl RealGateway {
    /// Bind the libc functions directly.
    ///
    /// Only correct in a process where those symbols are not overridden;
    /// inside the preload library use [`RealGateway::next`].
    pub fn direct() -> Self {
        Self {
            open: libc::open,
            opendir: libc::opendir,
        }
    }

    /// Resolve the next definitions of `open` and `opendir` after the calling
    /// object, skipping the override.
    pub fn next() -> io::Result<Self> {
        let open = resolve_next(c"open")?;
        let opendir = resolve_next(c"opendir")?;
        // SAFETY: the symbols are the libc functions with these signatures.
        unsafe {
            Ok(Self {
                open: std::mem::transmute::<*mut c_void, OpenFn>(open),
                opendir: std::mem::transmute::<*mut c_void, OpenDirFn>(opendir),
            })
        }
    }
}

fn resolve_next(symbol: &CStr) -> io::Result<*mut c_void> {
    // SAFETY: dlsym is given a valid NUL-terminated name.
    let ptr = unsafe { libc::dlsym(libc::RTLD_NEXT, symbol.as_ptr()) };
    if ptr.is_null() {
        return Err(io::Error::other(format!(
            "symbol {} not found",
            symbol.to_string_lossy()
        )));
    }
    Ok(ptr)
}

impl FilesystemGateway for RealGateway {
    type File = OwnedFd;
    type Dir = DirHandle;

    #[allow(clippy::useless_conversion)]
    fn open(&mut self, path: &CStr, flags: c_int, mode: mode_t) -> io::Result<OwnedFd> {
        // SAFETY: path is NUL-terminated; the mode is promoted as for a
        // variadic call.
        let fd = unsafe { (self.open)(path.as_ptr(), flags, c_uint::from(mode)) };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }
        // SAFETY: a non-negative return is a fresh descriptor we now own.
        Ok(unsafe { OwnedFd::from_raw_fd(fd) })
    }

    fn opendir(&mut self, path: &CStr) -> io::Result<DirHandle> {
        // SAFETY: path is NUL-terminated.
        let dir = unsafe { (self.opendir)(path.as_ptr()) };
        NonNull::new(dir)
            .map(DirHandle)
            .ok_or_else(io::Error::last_os_error)
    }
}

/// The flags actually passed down once `effective` has been approved.
///
/// The access bits are replaced only when they changed. Without write
/// approval, flags that modify the file (`O_CREAT`, `O_TRUNC`, `O_APPEND`)
/// are removed.
pub(crate) fn restrict_flags(flags: c_int, requested: AccessMode, effective: AccessMode) -> c_int {
    let mut flags = if requested == effective {
        flags
    } else {
        (flags & !libc::O_ACCMODE) | effective.access_bits()
    };
    if !effective.includes_write() {
        flags &= !(libc::O_CREAT | libc::O_TRUNC | libc::O_APPEND);
    }
    flags
}

/// A gateway that consults the permission store (and, in interactive mode,
/// the user) before delegating to `inner`.
///
/// Grants remembered during consent are written back to `env` so that
/// processes started afterwards inherit them.
pub struct PolicedGateway<G, P, A, E> {
    inner: G,
    store: PermissionStore,
    consent: ConsentProtocol,
    prompter: P,
    audit: A,
    env: E,
}

impl<G, P, A, E> fmt::Debug for PolicedGateway<G, P, A, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PolicedGateway")
            .field("store", &self.store)
            .field("consent", &self.consent)
            .finish_non_exhaustive()
    }
}

impl<G, P, A, E> PolicedGateway<G, P, A, E> {
    /// Create a policed gateway.
    pub fn new(inner: G, store: PermissionStore, prompter: P, audit: A, env: E) -> Self {
        let consent = ConsentProtocol::new(store.context().settings.max_prompt_attempts);
        Self {
            inner,
            store,
            consent,
            prompter,
            audit,
            env,
        }
    }

    /// The permission store.
    pub fn store(&self) -> &PermissionStore {
        &self.store
    }

    /// The wrapped gateway.
    pub fn inner(&self) -> &G {
        &self.inner
    }

    /// The prompter used for consent.
    pub fn prompter(&self) -> &P {
        &self.prompter
    }

    /// The audit sink.
    pub fn audit(&self) -> &A {
        &self.audit
    }

    /// The environment grants are propagated to.
    pub fn env(&self) -> &E {
        &self.env
    }
}

impl<G, P, A, E> PolicedGateway<G, P, A, E>
where
    G: FilesystemGateway,
    P: Prompter,
    A: AuditSink,
    E: Environment,
{
    /// Decide a request, returning the mode that may be used.
    ///
    /// Non-interactive requests are all or nothing. Interactive requests run
    /// one consent cycle per missing mode (read first) and yield whatever was
    /// approved, so a read/write request approved only for reading degrades
    /// to a read.
    fn authorize(&mut self, path: &CStr, requested: AccessMode, target: Target) -> Result<AccessMode> {
        let bytes = path.to_bytes();

        match self.store.interaction() {
            InteractionMode::NonInteractive => {
                let refused = requested
                    .parts()
                    .iter()
                    .copied()
                    .find(|part| !self.store.is_authorized(bytes, *part));
                match refused {
                    None => Ok(requested),
                    Some(part) => Err(self.deny(bytes, part, target)),
                }
            }
            InteractionMode::Interactive => {
                let mut approved: Option<AccessMode> = None;
                let mut refused = None;
                for &part in requested.parts() {
                    if self.store.is_authorized(bytes, part) || self.consent_to(bytes, part, target) {
                        approved = Some(approved.map_or(part, |m| m.union(part)));
                    } else {
                        refused.get_or_insert(part);
                    }
                }
                approved.ok_or_else(|| Error::AuthorizationDenied {
                    path: String::from_utf8_lossy(bytes).into_owned(),
                    mode: refused.unwrap_or(requested),
                })
            }
        }
    }

    fn consent_to(&mut self, path: &[u8], part: AccessMode, target: Target) -> bool {
        let request = ConsentRequest {
            path,
            mode: part,
            target,
        };
        match self.consent.decide(&mut self.prompter, &request) {
            ConsentDecision::Deny => {
                self.deny(path, part, target);
                false
            }
            ConsentDecision::AllowOnce => true,
            ConsentDecision::AllowAndRemember => {
                if self.store.grant(path, part) {
                    self.store.context().export_grants(&mut self.env);
                }
                true
            }
        }
    }

    fn deny(&self, path: &[u8], part: AccessMode, target: Target) -> Error {
        let record = AuditRecord {
            path: String::from_utf8_lossy(path).into_owned(),
            mode: part,
            target,
            user: self.store.context().user.clone(),
        };
        tracing::warn!(
            path = %record.path,
            mode = %record.mode,
            target = ?record.target,
            user = %record.user,
            "access denied"
        );
        self.audit.deny(&record);
        Error::AuthorizationDenied {
            path: record.path,
            mode: part,
        }
    }
}

impl<G, P, A, E> FilesystemGateway for PolicedGateway<G, P, A, E>
where
    G: FilesystemGateway,
    P: Prompter,
    A: AuditSink,
    E: Environment,
{
    type File = G::File;
    type Dir = G::Dir;

    fn open(&mut self, path: &CStr, flags: c_int, mode: mode_t) -> io::Result<G::File> {
        let requested = AccessMode::from_flags(flags);
        let effective = self.authorize(path, requested, Target::File)?;
        let flags = restrict_flags(flags, requested, effective);
        tracing::debug!(
            path = %path.to_string_lossy(),
            requested = %requested,
            effective = %effective,
            "open authorized"
        );
        self.inner.open(path, flags, mode)
    }

    fn opendir(&mut self, path: &CStr) -> io::Result<G::Dir> {
        self.authorize(path, AccessMode::Read, Target::Directory)?;
        tracing::debug!(path = %path.to_string_lossy(), "opendir authorized");
        self.inner.opendir(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_restrict_flags_unchanged_when_fully_approved() {
        let flags = libc::O_WRONLY | libc::O_CREAT | libc::O_TRUNC;
        assert_eq!(
            restrict_flags(flags, AccessMode::Write, AccessMode::Write),
            flags
        );
    }

    #[test]
    fn test_restrict_flags_degrades_to_read() {
        let flags = libc::O_RDWR | libc::O_CREAT | libc::O_APPEND | libc::O_CLOEXEC;
        assert_eq!(
            restrict_flags(flags, AccessMode::ReadWrite, AccessMode::Read),
            libc::O_RDONLY | libc::O_CLOEXEC
        );
    }

    #[test]
    fn test_restrict_flags_degrades_to_write() {
        let flags = libc::O_RDWR | libc::O_CREAT;
        assert_eq!(
            restrict_flags(flags, AccessMode::ReadWrite, AccessMode::Write),
            libc::O_WRONLY | libc::O_CREAT
        );
    }

    #[test]
    fn test_restrict_flags_read_cannot_truncate() {
        let flags = libc::O_RDONLY | libc::O_TRUNC;
        assert_eq!(
            restrict_flags(flags, AccessMode::Read, AccessMode::Read),
            libc::O_RDONLY
        );
    }
}

//! Runtime override of the filesystem entry points.
//!
//! Built as a shared object and installed with `LD_PRELOAD` by the pola
//! launchers. The exported `open`, `open64` and `opendir` shadow the libc
//! definitions: each call is decided by a [`PolicedGateway`] built from the
//! propagated environment, then forwarded to the genuine function found with
//! `dlsym(RTLD_NEXT, ..)`.
//!
//! The gateway is created on the first intercepted call. From then on the
//! interaction mode is fixed for the life of the process.
//!
//! The exported symbols are not compiled into the unit test harness, where
//! they would shadow libc for the test binary itself.

use std::cell::Cell;
use std::ffi::CStr;
use std::io;
use std::os::fd::IntoRawFd;
use std::ptr;
use std::sync::{Mutex, OnceLock, PoisonError};

use libc::{c_char, c_int, mode_t};
use pola::{
    AuthorizationContext, FilesystemGateway, PermissionStore, PolicedGateway, PolicySettings,
    ProcessEnv, RealGateway, StderrNotice, SyslogAudit,
};

mod terminal;

use terminal::LazyTerminal;

type Audit = (StderrNotice, Option<SyslogAudit>);
type PreloadGateway = PolicedGateway<RealGateway, LazyTerminal, Audit, ProcessEnv>;

static REAL: OnceLock<Option<RealGateway>> = OnceLock::new();
static GATEWAY: Mutex<Option<PreloadGateway>> = Mutex::new(None);

thread_local! {
    static INSIDE: Cell<bool> = const { Cell::new(false) };
}

/// Marks the current thread as deciding. Calls made while it is held are
/// the policy's own and go straight to libc.
struct Reentry;

impl Reentry {
    fn enter() -> Option<Self> {
        INSIDE.with(|inside| (!inside.replace(true)).then_some(Reentry))
    }
}

impl Drop for Reentry {
    fn drop(&mut self) {
        INSIDE.with(|inside| inside.set(false));
    }
}

fn real() -> io::Result<RealGateway> {
    let real = REAL.get_or_init(|| match RealGateway::next() {
        Ok(real) => Some(real),
        Err(e) => {
            tracing::error!(error = %e, "cannot resolve libc primitives");
            None
        }
    });
    real.ok_or_else(|| io::Error::from_raw_os_error(libc::ENOSYS))
}

fn build_gateway(real: RealGateway) -> PreloadGateway {
    // SAFETY: the environment is only modified while GATEWAY is locked, and
    // the confined process is driven from a single thread.
    let env = unsafe { ProcessEnv::new() };
    let settings = PolicySettings::from_env(&env).unwrap_or_else(|e| {
        tracing::warn!(error = %e, "ignoring invalid policy settings");
        PolicySettings::default()
    });
    let syslog = settings.syslog.then_some(SyslogAudit);
    let context = AuthorizationContext::load(&env, settings);
    tracing::debug!(
        interaction = ?context.interaction,
        user = %context.user,
        "confinement initialized"
    );

    PolicedGateway::new(
        real,
        PermissionStore::new(context),
        LazyTerminal::new(real),
        (StderrNotice, syslog),
        env,
    )
}

/// Run `policed` against the process gateway, or `direct` for nested calls.
fn dispatch<T>(
    policed: impl FnOnce(&mut PreloadGateway) -> io::Result<T>,
    direct: impl FnOnce(&mut RealGateway) -> io::Result<T>,
) -> io::Result<T> {
    let mut real = real()?;
    let Some(_reentry) = Reentry::enter() else {
        return direct(&mut real);
    };

    let mut slot = GATEWAY.lock().unwrap_or_else(PoisonError::into_inner);
    let gateway = slot.get_or_insert_with(|| build_gateway(real));
    policed(gateway)
}

fn set_errno(err: &io::Error) {
    let code = err.raw_os_error().unwrap_or(libc::EIO);
    // SAFETY: the errno location is valid for the calling thread.
    unsafe {
        #[cfg(any(target_os = "linux", target_os = "android"))]
        {
            *libc::__errno_location() = code;
        }
        #[cfg(not(any(target_os = "linux", target_os = "android")))]
        {
            *libc::__error() = code;
        }
    }
}

fn intercept_open(path: *const c_char, flags: c_int, mode: mode_t) -> c_int {
    if path.is_null() {
        set_errno(&io::Error::from_raw_os_error(libc::EFAULT));
        return -1;
    }
    // SAFETY: checked for null; the caller passes a NUL-terminated path.
    let path = unsafe { CStr::from_ptr(path) };

    let result = dispatch(
        |gw| gw.open(path, flags, mode).map(IntoRawFd::into_raw_fd),
        |real| real.open(path, flags, mode).map(IntoRawFd::into_raw_fd),
    );
    result.unwrap_or_else(|e| {
        set_errno(&e);
        -1
    })
}

/// Policed `open(2)`.
///
/// `mode` is only meaningful when `flags` contains `O_CREAT` or `O_TMPFILE`,
/// as for the libc function.
///
/// # Safety
/// `path` must be null or a valid NUL-terminated string.
#[cfg(not(test))]
#[unsafe(no_mangle)]
pub unsafe extern "C" fn open(path: *const c_char, flags: c_int, mode: mode_t) -> c_int {
    intercept_open(path, flags, mode)
}

/// Policed `open64(2)`: `open` with `O_LARGEFILE`.
///
/// # Safety
/// `path` must be null or a valid NUL-terminated string.
#[cfg(all(not(test), any(target_os = "linux", target_os = "android")))]
#[unsafe(no_mangle)]
pub unsafe extern "C" fn open64(path: *const c_char, flags: c_int, mode: mode_t) -> c_int {
    intercept_open(path, flags | libc::O_LARGEFILE, mode)
}

/// Policed `opendir(3)`.
///
/// # Safety
/// `name` must be null or a valid NUL-terminated string.
#[cfg(not(test))]
#[unsafe(no_mangle)]
pub unsafe extern "C" fn opendir(name: *const c_char) -> *mut libc::DIR {
    intercept_opendir(name)
}

fn intercept_opendir(name: *const c_char) -> *mut libc::DIR {
    if name.is_null() {
        set_errno(&io::Error::from_raw_os_error(libc::EFAULT));
        return ptr::null_mut();
    }
    // SAFETY: checked for null; the caller passes a NUL-terminated name.
    let name = unsafe { CStr::from_ptr(name) };

    let result = dispatch(
        |gw| gw.opendir(name).map(|dir| dir.into_raw()),
        |real| real.opendir(name).map(|dir| dir.into_raw()),
    );
    result.unwrap_or_else(|e| {
        set_errno(&e);
        ptr::null_mut()
    })
}

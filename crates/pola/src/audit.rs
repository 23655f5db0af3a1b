//! Security audit trail for denied accesses.

use std::ffi::{CStr, CString};

use crate::permissions::AccessMode;

/// What kind of filesystem entry a request targets.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Target {
    /// A file opened with `open`
    File,
    /// A directory opened with `opendir`
    Directory,
}

/// One denied request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuditRecord {
    /// Path as requested
    pub path: String,
    /// Mode that was refused
    pub mode: AccessMode,
    /// File or directory
    pub target: Target,
    /// Identity of the acting user
    pub user: String,
}

impl AuditRecord {
    /// The line written to the system log.
    pub fn message(&self) -> String {
        match self.target {
            Target::File => format!("Non authorized access to {} by user {}", self.path, self.user),
            Target::Directory => format!(
                "Non authorized access to directory {} by user {}",
                self.path, self.user
            ),
        }
    }

    /// What was refused, as shown to the user (`read access`, `access`).
    pub fn access_label(&self) -> String {
        match self.target {
            Target::File => format!("{} access", self.mode),
            Target::Directory => "access".to_string(),
        }
    }
}

/// Receives every denial, synchronously, before the caller gets its error.
pub trait AuditSink {
    /// Record a denial.
    fn deny(&self, record: &AuditRecord);
}

impl AuditSink for () {
    fn deny(&self, _record: &AuditRecord) {}
}

impl<A: AuditSink, B: AuditSink> AuditSink for (A, B) {
    fn deny(&self, record: &AuditRecord) {
        self.0.deny(record);
        self.1.deny(record);
    }
}

impl<A: AuditSink> AuditSink for Option<A> {
    fn deny(&self, record: &AuditRecord) {
        if let Some(sink) = self {
            sink.deny(record);
        }
    }
}

/// Tells the user on stderr.
#[derive(Clone, Copy, Debug, Default)]
pub struct StderrNotice;

impl AuditSink for StderrNotice {
    fn deny(&self, record: &AuditRecord) {
        eprintln!(
            "> pola error : {} to {} is not authorized.",
            record.access_label(),
            record.path
        );
    }
}

/// Writes to the system log with facility `LOG_AUTHPRIV`.
#[derive(Clone, Copy, Debug, Default)]
pub struct SyslogAudit;

impl SyslogAudit {
    fn ident(target: Target) -> &'static CStr {
        match target {
            Target::File => c"open :",
            Target::Directory => c"opendir :",
        }
    }
}

impl AuditSink for SyslogAudit {
    fn deny(&self, record: &AuditRecord) {
        let message = CString::new(record.message().replace('\0', "")).unwrap_or_default();
        // SAFETY: the ident is a 'static C string, and the message is passed
        // through a "%s" format so it is never interpreted.
        unsafe {
            libc::openlog(
                Self::ident(record.target).as_ptr(),
                libc::LOG_NDELAY,
                libc::LOG_AUTHPRIV,
            );
            libc::syslog(
                libc::LOG_ERR | libc::LOG_AUTHPRIV,
                c"%s".as_ptr(),
                message.as_ptr(),
            );
            libc::closelog();
        }
    }
}

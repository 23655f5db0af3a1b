//! Error types shared by the pola crates.

use thiserror::Error;

use crate::permissions::AccessMode;

/// Result alias using [`enum@Error`].
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors produced by the confinement engine and its launcher.
#[derive(Debug, Error)]
pub enum Error {
    /// The policy refused the request.
    #[error("{mode} access to {path} is not authorized")]
    AuthorizationDenied {
        /// Path as requested by the confined program
        path: String,
        /// Mode that was refused
        mode: AccessMode,
    },
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// Malformed configuration file
    #[error("invalid configuration: {0}")]
    Config(#[from] serde_json::Error),
    /// A propagated setting could not be interpreted
    #[error("invalid value {value:?} for {key}")]
    InvalidSetting {
        /// Variable or field name
        key: String,
        /// Offending value
        value: String,
    },
    /// The command could not be started
    #[error("failed to launch {program}: {source}")]
    Launch {
        /// Program name (argv\[0\])
        program: String,
        /// Underlying spawn/exec error
        #[source]
        source: std::io::Error,
    },
}

impl From<Error> for std::io::Error {
    fn from(err: Error) -> Self {
        match err {
            Error::AuthorizationDenied { .. } => std::io::Error::from_raw_os_error(libc::EACCES),
            Error::Io(e) => e,
            Error::Launch { source, .. } => source,
            other => std::io::Error::other(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_denial_maps_to_eacces() {
        let err = Error::AuthorizationDenied {
            path: "/etc/shadow".to_string(),
            mode: AccessMode::Read,
        };
        assert_eq!(err.to_string(), "read access to /etc/shadow is not authorized");

        let io: std::io::Error = err.into();
        assert_eq!(io.raw_os_error(), Some(libc::EACCES));
        assert_eq!(io.kind(), std::io::ErrorKind::PermissionDenied);
    }

    #[test]
    fn test_invalid_setting_message() {
        let err = Error::InvalidSetting {
            key: "POLA_MATCH_MODE".to_string(),
            value: "fuzzy".to_string(),
        };
        assert_eq!(err.to_string(), "invalid value \"fuzzy\" for POLA_MATCH_MODE");
    }
}

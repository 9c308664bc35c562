use std::{fmt, io, time::Duration};

use crate::{
    profile::TrafficClass,
    target::{cidr::CidrError, ports::PortExprError},
};

/// Rejected configuration. The run never begins when one of these is raised.
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("invalid subnet '{input}': {source}")]
    Cidr {
        input: String,
        #[source]
        source: CidrError,
    },
    #[error("invalid port expression: {0}")]
    Ports(#[from] PortExprError),
    #[error("target subnets expand to no usable address")]
    EmptyAddresses,
    #[error("target port expression expands to no port")]
    EmptyPorts,
    #[error("unknown traffic class '{0}'")]
    UnknownClass(String),
    #[error("unrecognized configuration key '{0}'")]
    UnknownKey(String),
    #[error("no profile configured for class {0}")]
    MissingProfile(TrafficClass),
    #[error("allocation ratios sum to {0}, expected 1.0")]
    RatioSum(f64),
    #[error("allocation counts sum to {actual}, expected total_count {expected}")]
    CountSum { expected: usize, actual: usize },
    #[error("invalid packet size for {class}: {reason}")]
    PacketSize { class: TrafficClass, reason: String },
    #[error("invalid burst settings for {class}: {reason}")]
    Burst { class: TrafficClass, reason: String },
    #[error("invalid value for '{field}': {reason}")]
    InvalidValue { field: &'static str, reason: String },
    #[error("no unit left to simulate")]
    NoUsableUnits,
}

impl ConfigError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field,
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Transient,
    Setup,
    Invariant,
}

impl ErrorKind {
    pub const ALL: [ErrorKind; 3] = [ErrorKind::Transient, ErrorKind::Setup, ErrorKind::Invariant];

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Transient => "transient",
            ErrorKind::Setup => "setup",
            ErrorKind::Invariant => "invariant",
        }
    }

    pub(crate) fn index(&self) -> usize {
        match self {
            ErrorKind::Transient => 0,
            ErrorKind::Setup => 1,
            ErrorKind::Invariant => 2,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a failed send. Only [`SendError::is_fatal`] errors stop the owning worker.
#[derive(thiserror::Error, Debug)]
pub enum SendError {
    #[error("send failed: {0}")]
    Transient(#[source] io::Error),
    #[error("no reply within {0:?}")]
    Timeout(Duration),
    #[error("local port {port} unavailable: {source}")]
    PortUnavailable {
        port: u16,
        #[source]
        source: io::Error,
    },
    #[error("socket setup failed: {0}")]
    Setup(#[source] io::Error),
    #[error("internal invariant violated: {0}")]
    Invariant(String),
}

impl SendError {
    /// Classifies an error returned by a send syscall on an already open socket.
    pub fn from_send_io(err: io::Error) -> Self {
        match err.raw_os_error() {
            Some(libc::EACCES) => SendError::Setup(err),
            _ => SendError::Transient(err),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            SendError::Transient(_) | SendError::Timeout(_) => ErrorKind::Transient,
            SendError::PortUnavailable { .. } | SendError::Setup(_) => ErrorKind::Setup,
            SendError::Invariant(_) => ErrorKind::Invariant,
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, SendError::Setup(_) | SendError::Invariant(_))
    }
}

#[derive(thiserror::Error, Debug)]
pub enum RunError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("raw socket unavailable (elevated privileges required): {0}")]
    Preflight(#[source] io::Error),
    #[error("all {0} workers stopped on fatal errors")]
    AllWorkersFailed(usize),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_errors_are_classified() {
        let enobufs = SendError::from_send_io(io::Error::from_raw_os_error(libc::ENOBUFS));
        assert_eq!(enobufs.kind(), ErrorKind::Transient);
        assert!(!enobufs.is_fatal());

        let eacces = SendError::from_send_io(io::Error::from_raw_os_error(libc::EACCES));
        assert_eq!(eacces.kind(), ErrorKind::Setup);
        assert!(eacces.is_fatal());

        let port = SendError::PortUnavailable {
            port: 53,
            source: io::Error::from(io::ErrorKind::AddrInUse),
        };
        assert_eq!(port.kind(), ErrorKind::Setup);
        assert!(!port.is_fatal());

        assert!(SendError::Invariant("x".into()).is_fatal());
        assert!(!SendError::Timeout(Duration::from_secs(1)).is_fatal());
    }
}

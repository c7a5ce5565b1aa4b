use thiserror::Error;

/// The six error kinds the driver core distinguishes. Every public operation across
/// the capability probe, networking, PTY tunnel, launcher, reaper, registry, and
/// driver shell returns `Result<T, DriverError>`.
#[derive(Debug, Error)]
pub enum DriverError {
    #[error("capability missing: {0}")]
    CapabilityMissing(String),

    #[error("no such domain: {0}")]
    NoDomain(String),

    #[error("invalid domain state: {0}")]
    InvalidDomain(String),

    #[error("allocation failed: {0}")]
    NoMemory(String),

    #[error("operation not supported: {0}")]
    NoSupport(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl DriverError {
    pub fn kind(&self) -> &'static str {
        match self {
            DriverError::CapabilityMissing(_) => "capability-missing",
            DriverError::NoDomain(_) => "no-domain",
            DriverError::InvalidDomain(_) => "invalid-domain",
            DriverError::NoMemory(_) => "no-memory",
            DriverError::NoSupport(_) => "no-support",
            DriverError::Internal(_) => "internal",
        }
    }

    pub fn internal<E: std::fmt::Display>(err: E) -> Self {
        DriverError::Internal(err.to_string())
    }
}

impl From<nix::Error> for DriverError {
    fn from(e: nix::Error) -> Self {
        DriverError::Internal(e.to_string())
    }
}

impl From<std::io::Error> for DriverError {
    fn from(e: std::io::Error) -> Self {
        DriverError::Internal(e.to_string())
    }
}

impl From<serde_json::Error> for DriverError {
    fn from(e: serde_json::Error) -> Self {
        DriverError::Internal(e.to_string())
    }
}

impl From<String> for DriverError {
    fn from(e: String) -> Self {
        DriverError::Internal(e)
    }
}

pub type DriverResult<T> = Result<T, DriverError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_strings_match_spec_vocabulary() {
        assert_eq!(DriverError::NoDomain("x".into()).kind(), "no-domain");
        assert_eq!(DriverError::NoSupport("x".into()).kind(), "no-support");
    }
}

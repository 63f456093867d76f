///
/// Thread error types.
///
/// Spawning an OS thread is the only operation in this crate that can fail
/// for reasons outside the caller's control; everything else reports through
/// booleans or is a defined no-op.
///

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ThreadError {
    #[error("Failed to spawn thread '{name}': {source}")]
    Spawn {
        name: String,
        #[source]
        source: std::io::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_messages() {
        let err = ThreadError::Spawn {
            name: "worker-1".to_string(),
            source: std::io::Error::new(std::io::ErrorKind::OutOfMemory, "no memory"),
        };
        assert!(err.to_string().contains("worker-1"));
        assert!(err.to_string().contains("no memory"));
        assert!(std::error::Error::source(&err).is_some());
    }
}

//! Request checksum calculation mode for the S3 client.

use crate::errors::SyncError;
use std::{fmt, str::FromStr};

/// When the S3 client should compute request checksums.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChecksumMode {
    /// Checksum every request the service supports checksums for.
    Supported,
    /// Only checksum requests where the service requires it.
    #[default]
    Required,
}

impl ChecksumMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Supported => "supported",
            Self::Required => "required",
        }
    }
}

impl FromStr for ChecksumMode {
    type Err = SyncError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "supported" => Ok(Self::Supported),
            "required" => Ok(Self::Required),
            other => Err(SyncError::InvalidChecksumMode(other.to_string())),
        }
    }
}

impl fmt::Display for ChecksumMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_modes() {
        assert_eq!("supported".parse::<ChecksumMode>().unwrap(), ChecksumMode::Supported);
        assert_eq!("required".parse::<ChecksumMode>().unwrap(), ChecksumMode::Required);
        assert_eq!(ChecksumMode::default(), ChecksumMode::Required);
    }

    #[test]
    fn rejects_unknown_mode() {
        let err = "always".parse::<ChecksumMode>().unwrap_err();
        assert_eq!(err.to_string(), "invalid checksum calculation mode: always");
    }
}

//! Common types used across artifact storage operations.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::StorageError;

/// Unique identifier of a stored artifact.
///
/// Drawn from a random UUIDv4, so concurrent stores never collide on an id
/// and ids cannot be enumerated.
///
/// # Examples
///
/// ```
/// use gplot_common_storage::ArtifactId;
///
/// let id = ArtifactId::generate();
/// let parsed = ArtifactId::parse(&id.to_string()).unwrap();
/// assert_eq!(id, parsed);
///
/// assert!(ArtifactId::parse("../../etc/passwd").is_err());
/// ```
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArtifactId(Uuid);

impl ArtifactId {
    /// Generates a fresh random id.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parses an id presented by a caller (e.g. from a request path).
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::InvalidId`] if `value` is not a UUID.
    pub fn parse(value: &str) -> Result<Self, StorageError> {
        Uuid::parse_str(value).map(Self).map_err(|_| StorageError::invalid_id(value))
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for ArtifactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.hyphenated().fmt(f)
    }
}

impl FromStr for ArtifactId {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Output format of a rendered artifact.
///
/// Serialized as the lowercase file extension (`"png"`, `"svg"`, ...).
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactFormat {
    /// Portable Network Graphics.
    Png,
    /// JPEG, stored with the `.jpg` extension.
    Jpg,
    /// JPEG, stored with the `.jpeg` extension.
    Jpeg,
    /// Scalable Vector Graphics.
    Svg,
    /// Portable Document Format.
    Pdf,
}

impl ArtifactFormat {
    /// All supported formats.
    pub const ALL: [ArtifactFormat; 5] = [Self::Png, Self::Jpg, Self::Jpeg, Self::Svg, Self::Pdf];

    /// File extension used for the payload file.
    #[must_use]
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Jpg => "jpg",
            Self::Jpeg => "jpeg",
            Self::Svg => "svg",
            Self::Pdf => "pdf",
        }
    }

    /// MIME type to report to HTTP clients.
    #[must_use]
    pub fn mime_type(&self) -> &'static str {
        match self {
            Self::Png => "image/png",
            Self::Jpg | Self::Jpeg => "image/jpeg",
            Self::Svg => "image/svg+xml",
            Self::Pdf => "application/pdf",
        }
    }

    /// Looks up a format by file extension (case-insensitive).
    #[must_use]
    pub fn from_extension(ext: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.extension().eq_ignore_ascii_case(ext))
    }
}

impl fmt::Display for ArtifactFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for ArtifactFormat {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_extension(s.trim()).ok_or_else(|| StorageError::Config(
            crate::error::ConfigError::Invalid {
                field: "format",
                reason: format!("unsupported artifact format '{s}'"),
            },
        ))
    }
}

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

/// The physical encoding of a container.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    /// A directory tree with one file per blob
    #[default]
    Directory,
    /// The same tree packed as a gzip compressed tar archive
    Tgz,
}

impl Display for Format {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Format::Directory => write!(f, "directory"),
            Format::Tgz => write!(f, "tgz"),
        }
    }
}

/// How a container is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessMode {
    /// Nothing can be added and closing never writes
    ReadOnly,
    /// The container must exist and can be modified
    Writable,
    /// Like [`AccessMode::Writable`], but the container is created if it does
    /// not exist yet
    Create,
}

impl AccessMode {
    /// Returns true if the mode does not allow modifications.
    pub fn is_read_only(self) -> bool {
        self == AccessMode::ReadOnly
    }
}

/// Select the gzip compression level used when packing a tgz archive.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionLevel {
    /// Use the lowest compression level (1)
    Lowest,
    /// Use the highest compression level (9)
    Highest,
    /// Use the default compression level (6)
    #[default]
    Default,
    /// Use a numeric compression level (0-9)
    Numeric(u32),
}

impl CompressionLevel {
    pub(crate) fn to_gzip_level(self) -> Result<flate2::Compression, std::io::Error> {
        match self {
            CompressionLevel::Lowest => Ok(flate2::Compression::fast()),
            CompressionLevel::Highest => Ok(flate2::Compression::best()),
            CompressionLevel::Default => Ok(flate2::Compression::default()),
            CompressionLevel::Numeric(n) => {
                if n > 9 {
                    Err(std::io::Error::new(
                        std::io::ErrorKind::InvalidInput,
                        "gzip compression level must be between 0 and 9",
                    ))
                } else {
                    Ok(flate2::Compression::new(n))
                }
            }
        }
    }
}

/// Options used when creating (or repacking) a container.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ArtifactSetOptions {
    /// The physical format of a newly created container. Ignored when opening
    /// an existing one, whose format is detected.
    #[serde(default)]
    pub format: Format,

    /// Unix permissions of the created directory or archive file.
    #[serde(default)]
    pub file_mode: Option<u32>,

    /// The compression level of tgz archives.
    #[serde(default)]
    pub compression: CompressionLevel,
}

impl ArtifactSetOptions {
    /// Sets the format.
    pub fn with_format(self, format: Format) -> Self {
        Self { format, ..self }
    }

    /// Sets the permissions of the created directory or archive file.
    pub fn with_file_mode(self, mode: u32) -> Self {
        Self {
            file_mode: Some(mode),
            ..self
        }
    }

    /// Sets the compression level.
    pub fn with_compression(self, compression: CompressionLevel) -> Self {
        Self {
            compression,
            ..self
        }
    }
}

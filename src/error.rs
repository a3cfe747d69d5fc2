//! Unified error types for xrbook
//!
//! Provides a top-level `EpubError` that wraps module-specific errors,
//! plus `From` impls so `?` works across module boundaries.

use std::fmt;

/// Top-level error type for xrbook operations
#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum EpubError {
    /// Bytes are not a readable ZIP archive
    Archive(ZipError),
    /// `META-INF/container.xml` is missing or has no `<rootfile full-path>`
    InvalidContainer(String),
    /// The OPF package document could not be resolved or parsed
    InvalidPackage(String),
    /// Chapter index requested is outside `0..chapter_count`
    IndexOutOfRange {
        /// Requested chapter index.
        index: i64,
        /// Total number of chapters available.
        chapter_count: usize,
    },
    /// Spine references a manifest item that does not exist
    MissingManifestEntry {
        /// Missing manifest `id` referenced by spine `idref`.
        idref: String,
    },
    /// Manifest entry points at a path that is not in the archive
    MissingResource {
        /// Archive path that was looked up.
        path: String,
    },
    /// Text measurement or page geometry failure
    Layout(LayoutError),
    /// XML parsing error
    Parse(String),
    /// I/O error (description only, since `std::io::Error` is not `Clone`)
    Io(String),
    /// A newer chapter request replaced this one before it finished
    Superseded,
}

impl fmt::Display for EpubError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EpubError::Archive(kind) => write!(f, "Archive error: {}", kind),
            EpubError::InvalidContainer(msg) => write!(f, "Invalid container: {}", msg),
            EpubError::InvalidPackage(msg) => write!(f, "Invalid package: {}", msg),
            EpubError::IndexOutOfRange {
                index,
                chapter_count,
            } => {
                if *chapter_count == 0 {
                    write!(f, "Chapter index {} out of range (book has no chapters)", index)
                } else {
                    write!(
                        f,
                        "Chapter index {} out of range (0-{})",
                        index,
                        chapter_count - 1
                    )
                }
            }
            EpubError::MissingManifestEntry { idref } => {
                write!(f, "Chapter not found in manifest: {}", idref)
            }
            EpubError::MissingResource { path } => {
                write!(f, "Resource not found in archive: {}", path)
            }
            EpubError::Layout(err) => write!(f, "Layout error: {}", err),
            EpubError::Parse(msg) => write!(f, "Parse error: {}", msg),
            EpubError::Io(msg) => write!(f, "I/O error: {}", msg),
            EpubError::Superseded => write!(f, "request superseded by a newer one"),
        }
    }
}

/// ZIP-specific error variants
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ZipErrorKind {
    /// File not found in archive
    FileNotFound,
    /// Invalid ZIP format
    InvalidFormat,
    /// Unsupported compression method
    UnsupportedCompression,
    /// Decompression failed
    DecompressError,
    /// CRC32 mismatch
    CrcMismatch,
    /// Central directory has more entries than the configured limit
    CentralDirFull,
    /// File exceeds maximum allowed size
    FileTooLarge,
    /// Invalid or missing mimetype file
    InvalidMimetype(String),
    /// ZIP64 structures are present but unsupported
    UnsupportedZip64,
}

/// Public ZIP error type alias used across the crate API.
pub type ZipError = ZipErrorKind;

impl fmt::Display for ZipErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ZipErrorKind::FileNotFound => write!(f, "file not found in archive"),
            ZipErrorKind::InvalidFormat => write!(f, "invalid ZIP format"),
            ZipErrorKind::UnsupportedCompression => write!(f, "unsupported compression method"),
            ZipErrorKind::DecompressError => write!(f, "decompression failed"),
            ZipErrorKind::CrcMismatch => write!(f, "CRC32 checksum mismatch"),
            ZipErrorKind::CentralDirFull => write!(f, "central directory full"),
            ZipErrorKind::FileTooLarge => write!(f, "file too large"),
            ZipErrorKind::InvalidMimetype(msg) => write!(f, "invalid mimetype: {}", msg),
            ZipErrorKind::UnsupportedZip64 => write!(f, "ZIP64 is not supported"),
        }
    }
}

/// Failures raised while measuring or laying out text
#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum LayoutError {
    /// The measurer returned a NaN, infinite or negative width
    InvalidMeasurement {
        /// Text that was being measured.
        text: String,
        /// Width the measurer reported.
        width: f32,
    },
    /// The measurer itself failed
    Measurement(String),
    /// Page geometry leaves no room for text
    InvalidLayout(String),
}

impl fmt::Display for LayoutError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LayoutError::InvalidMeasurement { text, width } => {
                write!(f, "measurer returned width {} for {:?}", width, text)
            }
            LayoutError::Measurement(msg) => write!(f, "measurement failed: {}", msg),
            LayoutError::InvalidLayout(msg) => write!(f, "invalid page layout: {}", msg),
        }
    }
}

impl std::error::Error for EpubError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            EpubError::Archive(err) => Some(err),
            EpubError::Layout(err) => Some(err),
            _ => None,
        }
    }
}

impl std::error::Error for ZipErrorKind {}

impl std::error::Error for LayoutError {}

impl From<LayoutError> for EpubError {
    fn from(err: LayoutError) -> Self {
        EpubError::Layout(err)
    }
}

impl From<std::io::Error> for EpubError {
    fn from(err: std::io::Error) -> Self {
        EpubError::Io(err.to_string())
    }
}

//! In-memory ZIP reader for EPUB files
//!
//! The whole archive is owned as a byte buffer and the central directory is
//! parsed once on open. Every later read borrows `&self`, so one `Archive`
//! can serve concurrent chapter and image fetches without locking.
//! Supports stored and DEFLATE entries using miniz_oxide.

use miniz_oxide::inflate::stream::InflateState;
use miniz_oxide::{DataFormat, MZFlush, MZStatus};

/// Default maximum number of central directory entries
const DEFAULT_MAX_ENTRIES: usize = 4096;

/// Maximum filename length in ZIP entries
const MAX_FILENAME_LEN: usize = 1024;

/// Runtime-configurable ZIP safety limits.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ZipLimits {
    /// Maximum compressed or uncompressed file size allowed for reads.
    pub max_file_read_size: usize,
    /// Maximum allowed size for the required `mimetype` entry.
    pub max_mimetype_size: usize,
    /// Maximum number of central directory entries kept.
    pub max_entries: usize,
    /// Whether ZIP parsing should fail on strict structural issues.
    pub strict: bool,
    /// Maximum bytes scanned from file tail while searching for EOCD.
    pub max_eocd_scan: usize,
}

impl Default for ZipLimits {
    fn default() -> Self {
        Self {
            max_file_read_size: usize::MAX,
            max_mimetype_size: 1024,
            max_entries: DEFAULT_MAX_ENTRIES,
            strict: false,
            max_eocd_scan: MAX_EOCD_SCAN,
        }
    }
}

impl ZipLimits {
    /// Create explicit ZIP limits.
    pub fn new(max_file_read_size: usize, max_mimetype_size: usize) -> Self {
        Self {
            max_file_read_size,
            max_mimetype_size,
            ..Self::default()
        }
    }

    /// Enable or disable strict ZIP parsing behavior.
    pub fn with_strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// Cap the number of central directory entries.
    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries;
        self
    }

    /// Set a cap for EOCD tail scan bytes.
    pub fn with_max_eocd_scan(mut self, max_eocd_scan: usize) -> Self {
        self.max_eocd_scan = max_eocd_scan.max(EOCD_MIN_SIZE);
        self
    }
}

/// Local file header signature (little-endian)
const SIG_LOCAL_FILE_HEADER: u32 = 0x04034b50;

/// Central directory entry signature (little-endian)
const SIG_CD_ENTRY: u32 = 0x02014b50;

/// End of central directory signature (little-endian)
const SIG_EOCD: u32 = 0x06054b50;
/// ZIP64 end of central directory locator signature (little-endian)
const SIG_ZIP64_EOCD_LOCATOR: u32 = 0x07064b50;
/// Minimum EOCD record size in bytes
const EOCD_MIN_SIZE: usize = 22;
/// Maximum EOCD search window (EOCD + max comment length)
const MAX_EOCD_SCAN: usize = EOCD_MIN_SIZE + u16::MAX as usize;

/// Fixed part of a central directory record
const CD_ENTRY_FIXED_SIZE: usize = 46;
/// Fixed part of a local file header
const LOCAL_HEADER_FIXED_SIZE: usize = 30;

/// Output chunk size for streaming inflate
const INFLATE_CHUNK_SIZE: usize = 8 * 1024;

/// Compression methods
const METHOD_STORED: u16 = 0;
const METHOD_DEFLATED: u16 = 8;

// Re-export the crate's public ZIP error alias for module consumers.
pub use crate::error::ZipError;

#[derive(Clone, Copy, Debug)]
struct EocdInfo {
    cd_offset: usize,
    cd_size: usize,
    num_entries: u16,
    uses_zip64: bool,
}

/// Central directory entry metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CdEntry {
    /// Compression method (0=stored, 8=deflated)
    pub method: u16,
    /// Compressed size in bytes
    pub compressed_size: u32,
    /// Uncompressed size in bytes
    pub uncompressed_size: u32,
    /// Offset to local file header
    pub local_header_offset: u32,
    /// CRC32 checksum
    pub crc32: u32,
    /// Archive-relative path
    pub filename: String,
}

/// Read-only in-memory ZIP archive
#[derive(Clone)]
pub struct Archive {
    data: Vec<u8>,
    entries: Vec<CdEntry>,
    declared_entries: usize,
    limits: ZipLimits,
}

impl core::fmt::Debug for Archive {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Archive")
            .field("len", &self.data.len())
            .field("entries", &self.entries.len())
            .finish()
    }
}

impl Archive {
    /// Parse the central directory of an archive held in memory.
    pub fn from_bytes(data: Vec<u8>) -> Result<Self, ZipError> {
        Self::from_bytes_with_limits(data, ZipLimits::default())
    }

    /// Parse the central directory with explicit runtime limits.
    pub fn from_bytes_with_limits(data: Vec<u8>, limits: ZipLimits) -> Result<Self, ZipError> {
        let eocd = find_eocd(&data, limits.max_eocd_scan.min(MAX_EOCD_SCAN))?;
        if eocd.uses_zip64 {
            return Err(ZipError::UnsupportedZip64);
        }
        let declared = eocd.num_entries as usize;
        if limits.strict && declared > limits.max_entries {
            return Err(ZipError::CentralDirFull);
        }

        let cd_end = eocd.cd_offset + eocd.cd_size;
        let mut entries = Vec::with_capacity(declared.min(limits.max_entries));
        let mut pos = eocd.cd_offset;

        for _ in 0..declared.min(limits.max_entries) {
            if pos >= cd_end {
                if limits.strict {
                    return Err(ZipError::InvalidFormat);
                }
                break;
            }
            match read_cd_entry(&data, pos)? {
                Some((entry, next)) => {
                    entries.push(entry);
                    pos = next;
                }
                None if limits.strict => return Err(ZipError::InvalidFormat),
                None => break,
            }
        }

        if declared > limits.max_entries {
            log::warn!(
                "[ZIP] Archive has {} entries but only {} were loaded (max: {})",
                declared,
                entries.len(),
                limits.max_entries
            );
        }

        log::debug!(
            "[ZIP] Parsed {} central directory entries (offset {})",
            entries.len(),
            eocd.cd_offset
        );

        Ok(Self {
            data,
            entries,
            declared_entries: declared,
            limits,
        })
    }

    /// Get entry by filename.
    ///
    /// Exact matches win; otherwise the lookup is ASCII case-insensitive and
    /// ignores a leading `/` on either side.
    pub fn get_entry(&self, name: &str) -> Option<&CdEntry> {
        let name = name.strip_prefix('/').unwrap_or(name);
        self.entries
            .iter()
            .find(|e| e.filename == name)
            .or_else(|| {
                self.entries.iter().find(|e| {
                    let stored = e.filename.strip_prefix('/').unwrap_or(&e.filename);
                    stored.eq_ignore_ascii_case(name)
                })
            })
    }

    /// Whether an entry with this name exists.
    pub fn contains(&self, name: &str) -> bool {
        self.get_entry(name).is_some()
    }

    /// Read and decompress an entry by name.
    pub fn read(&self, name: &str) -> Result<Vec<u8>, ZipError> {
        let entry = self.get_entry(name).ok_or(ZipError::FileNotFound)?;
        self.read_entry(entry)
    }

    /// Read and decompress a central directory entry.
    pub fn read_entry(&self, entry: &CdEntry) -> Result<Vec<u8>, ZipError> {
        if entry.uncompressed_size as usize > self.limits.max_file_read_size
            || entry.compressed_size as usize > self.limits.max_file_read_size
        {
            return Err(ZipError::FileTooLarge);
        }

        let start = self.data_offset(entry)?;
        let end = start
            .checked_add(entry.compressed_size as usize)
            .ok_or(ZipError::InvalidFormat)?;
        let compressed = self.data.get(start..end).ok_or(ZipError::InvalidFormat)?;

        let out = match entry.method {
            METHOD_STORED => compressed.to_vec(),
            METHOD_DEFLATED => inflate_raw(compressed, entry.uncompressed_size as usize)?,
            _ => return Err(ZipError::UnsupportedCompression),
        };

        // Verify CRC32 if available
        if entry.crc32 != 0 && crc32fast::hash(&out) != entry.crc32 {
            return Err(ZipError::CrcMismatch);
        }
        Ok(out)
    }

    /// Calculate the offset to the actual file data (past local header)
    fn data_offset(&self, entry: &CdEntry) -> Result<usize, ZipError> {
        let offset = entry.local_header_offset as usize;
        let header = self
            .data
            .get(offset..offset + LOCAL_HEADER_FIXED_SIZE)
            .ok_or(ZipError::InvalidFormat)?;

        if read_u32_le(header, 0) != SIG_LOCAL_FILE_HEADER {
            return Err(ZipError::InvalidFormat);
        }

        // Local name/extra lengths may differ from the central directory copy.
        let name_len = read_u16_le(header, 26) as usize;
        let extra_len = read_u16_le(header, 28) as usize;

        Ok(offset + LOCAL_HEADER_FIXED_SIZE + name_len + extra_len)
    }

    /// Validate that the archive contains a valid EPUB mimetype file
    ///
    /// Checks that a file named "mimetype" exists and its content is exactly
    /// `application/epub+zip`, as required by the EPUB specification.
    pub fn validate_mimetype(&self) -> Result<(), ZipError> {
        let entry = self.get_entry("mimetype").ok_or_else(|| {
            ZipError::InvalidMimetype("mimetype file not found in archive".to_string())
        })?;

        if entry.uncompressed_size as usize > self.limits.max_mimetype_size {
            return Err(ZipError::InvalidMimetype(
                "mimetype file too large".to_string(),
            ));
        }

        let buf = self.read_entry(entry)?;
        let content = core::str::from_utf8(&buf).map_err(|_| {
            ZipError::InvalidMimetype("mimetype file is not valid UTF-8".to_string())
        })?;

        if content.trim_end() != "application/epub+zip" {
            return Err(ZipError::InvalidMimetype(format!(
                "expected 'application/epub+zip', got '{}'",
                content
            )));
        }

        Ok(())
    }

    /// Number of entries loaded from the central directory
    pub fn num_entries(&self) -> usize {
        self.entries.len()
    }

    /// Number of entries the EOCD record declares
    pub fn declared_entries(&self) -> usize {
        self.declared_entries
    }

    /// Iterate over all entries
    pub fn entries(&self) -> impl Iterator<Item = &CdEntry> {
        self.entries.iter()
    }

    /// Size of the raw archive in bytes
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the raw archive is empty
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Get the active limits used by this archive.
    pub fn limits(&self) -> ZipLimits {
        self.limits
    }
}

/// Find EOCD and extract central directory info
fn find_eocd(data: &[u8], max_eocd_scan: usize) -> Result<EocdInfo, ZipError> {
    let file_size = data.len();
    if file_size < EOCD_MIN_SIZE {
        return Err(ZipError::InvalidFormat);
    }

    // Scan last (EOCD + max comment) bytes for EOCD signature.
    let scan_base = file_size - file_size.min(max_eocd_scan);
    let window = &data[scan_base..];

    // Scan backwards for EOCD signature
    for i in (0..=window.len() - EOCD_MIN_SIZE).rev() {
        if read_u32_le(window, i) != SIG_EOCD {
            continue;
        }
        let num_entries = read_u16_le(window, i + 10);
        let cd_size = read_u32_le(window, i + 12);
        let cd_offset = read_u32_le(window, i + 16);
        let comment_len = read_u16_le(window, i + 20) as usize;
        let eocd_pos = scan_base + i;
        if eocd_pos + EOCD_MIN_SIZE + comment_len != file_size {
            continue;
        }

        let cd_end = (cd_offset as usize)
            .checked_add(cd_size as usize)
            .ok_or(ZipError::InvalidFormat)?;
        if cd_end > eocd_pos {
            return Err(ZipError::InvalidFormat);
        }

        let uses_zip64_sentinel =
            num_entries == u16::MAX || cd_size == u32::MAX || cd_offset == u32::MAX;
        let uses_zip64_locator =
            eocd_pos >= 20 && read_u32_le(data, eocd_pos - 20) == SIG_ZIP64_EOCD_LOCATOR;

        return Ok(EocdInfo {
            cd_offset: cd_offset as usize,
            cd_size: cd_size as usize,
            num_entries,
            uses_zip64: uses_zip64_sentinel || uses_zip64_locator,
        });
    }

    Err(ZipError::InvalidFormat)
}

/// Read a central directory entry at `pos`, returning it and the next offset.
fn read_cd_entry(data: &[u8], pos: usize) -> Result<Option<(CdEntry, usize)>, ZipError> {
    let Some(fixed) = data.get(pos..pos + CD_ENTRY_FIXED_SIZE) else {
        return Ok(None);
    };
    if read_u32_le(fixed, 0) != SIG_CD_ENTRY {
        return Ok(None); // End of central directory
    }

    let name_len = read_u16_le(fixed, 28) as usize;
    let extra_len = read_u16_le(fixed, 30) as usize;
    let comment_len = read_u16_le(fixed, 32) as usize;

    let name_start = pos + CD_ENTRY_FIXED_SIZE;
    let filename = if name_len <= MAX_FILENAME_LEN {
        let raw = data
            .get(name_start..name_start + name_len)
            .ok_or(ZipError::InvalidFormat)?;
        String::from_utf8_lossy(raw).into_owned()
    } else {
        String::new()
    };

    let entry = CdEntry {
        method: read_u16_le(fixed, 10),
        crc32: read_u32_le(fixed, 16),
        compressed_size: read_u32_le(fixed, 20),
        uncompressed_size: read_u32_le(fixed, 24),
        local_header_offset: read_u32_le(fixed, 42),
        filename,
    };

    Ok(Some((entry, name_start + name_len + extra_len + comment_len)))
}

/// Inflate a raw DEFLATE stream that must produce exactly `expected` bytes.
///
/// Output is streamed through a fixed chunk and grows only with the bytes
/// actually produced, never with the declared size alone.
fn inflate_raw(compressed: &[u8], expected: usize) -> Result<Vec<u8>, ZipError> {
    let mut state = Box::new(InflateState::new(DataFormat::Raw));
    let mut chunk = [0u8; INFLATE_CHUNK_SIZE];
    let mut out = Vec::with_capacity(expected.min(compressed.len().saturating_mul(4)));
    let mut pending = compressed;

    loop {
        let result =
            miniz_oxide::inflate::stream::inflate(&mut state, pending, &mut chunk, MZFlush::None);
        pending = &pending[result.bytes_consumed..];
        if out.len() + result.bytes_written > expected {
            return Err(ZipError::DecompressError);
        }
        out.extend_from_slice(&chunk[..result.bytes_written]);

        match result.status {
            Ok(MZStatus::StreamEnd) => break,
            Ok(MZStatus::Ok) => {
                if result.bytes_consumed == 0 && result.bytes_written == 0 {
                    return Err(ZipError::DecompressError);
                }
            }
            Ok(MZStatus::NeedDict) | Err(_) => return Err(ZipError::DecompressError),
        }
    }

    if out.len() != expected {
        return Err(ZipError::DecompressError);
    }
    Ok(out)
}

/// Read u16 from buffer at offset (little-endian)
fn read_u16_le(buf: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([buf[offset], buf[offset + 1]])
}

/// Read u32 from buffer at offset (little-endian)
fn read_u32_le(buf: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        buf[offset],
        buf[offset + 1],
        buf[offset + 2],
        buf[offset + 3],
    ])
}

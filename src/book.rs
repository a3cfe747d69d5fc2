//! High-level EPUB API for the reader.
//!
//! A [`LoadedBook`] owns the whole archive in memory together with the parsed
//! package metadata, manifest and spine. It is immutable after load, so it can
//! be shared across threads and read concurrently without locking.

use std::path::Path;

use crate::error::{EpubError, ZipError};
use crate::extract::{document_title, extract_structured_text, StructuredText};
use crate::metadata::{parse_container_xml, parse_opf, Manifest, ManifestEntry, PackageMetadata};
use crate::spine::{parse_spine, Spine};
use crate::zip::{Archive, ZipLimits};

/// Archive path of the OCF container document
pub const CONTAINER_PATH: &str = "META-INF/container.xml";

/// Validation strictness for high-level load flows.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[non_exhaustive]
pub enum ValidationMode {
    /// Best-effort behavior for partial/quirky EPUBs.
    #[default]
    Lenient,
    /// Fail early for structural inconsistencies.
    Strict,
}

/// High-level configuration for loading EPUB books.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BookOptions {
    /// Optional ZIP safety limits used while reading archive entries.
    ///
    /// When `None`, [`ZipLimits::default`] applies.
    pub zip_limits: Option<ZipLimits>,
    /// Validation strictness for load behavior.
    pub validation_mode: ValidationMode,
}

/// Builder for loading EPUBs with explicit options.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct BookBuilder {
    options: BookOptions,
}

impl BookBuilder {
    /// Create a new builder with lenient defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set explicit ZIP limits.
    pub fn with_zip_limits(mut self, limits: ZipLimits) -> Self {
        self.options.zip_limits = Some(limits);
        self
    }

    /// Enable strict validation mode.
    pub fn strict(mut self) -> Self {
        self.options.validation_mode = ValidationMode::Strict;
        self
    }

    /// Set explicit validation mode.
    pub fn validation_mode(mut self, mode: ValidationMode) -> Self {
        self.options.validation_mode = mode;
        self
    }

    /// Options collected so far.
    pub fn options(&self) -> BookOptions {
        self.options
    }

    /// Load an EPUB held in memory.
    pub fn load(self, bytes: impl Into<Vec<u8>>) -> Result<LoadedBook, EpubError> {
        LoadedBook::load_with_options(bytes, self.options)
    }

    /// Read and load an EPUB from disk.
    pub fn open<P: AsRef<Path>>(self, path: P) -> Result<LoadedBook, EpubError> {
        LoadedBook::open_with_options(path, self.options)
    }
}

/// Load an EPUB held in memory with default options.
pub fn load_book(bytes: impl Into<Vec<u8>>) -> Result<LoadedBook, EpubError> {
    LoadedBook::load(bytes)
}

/// Lightweight chapter descriptor in spine order.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "persist", derive(serde::Serialize))]
pub struct ChapterRef {
    /// Spine position index.
    pub index: usize,
    /// Spine `idref`.
    pub idref: String,
    /// Manifest href relative to OPF.
    pub href: String,
    /// Manifest media type.
    pub media_type: String,
}

/// Cover art chosen from the manifest
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CoverImage {
    /// Manifest id
    pub id: String,
    /// Archive path the bytes were read from
    pub path: String,
    /// Declared image media type
    pub media_type: String,
    /// Raw image bytes
    pub data: Vec<u8>,
}

/// A resource referenced from a chapter, such as an `<img>` source
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Resource {
    /// Archive path the bytes were read from
    pub path: String,
    /// Media type from the manifest, else guessed from the extension
    pub media_type: String,
    /// Raw bytes
    pub data: Vec<u8>,
}

/// A fully loaded EPUB
#[derive(Clone, Debug)]
pub struct LoadedBook {
    archive: Archive,
    opf_path: String,
    content_dir: String,
    metadata: PackageMetadata,
    manifest: Manifest,
    spine: Spine,
}

impl LoadedBook {
    /// Parse an EPUB held in memory.
    pub fn load(bytes: impl Into<Vec<u8>>) -> Result<Self, EpubError> {
        Self::load_with_options(bytes, BookOptions::default())
    }

    /// Read an EPUB from disk and parse it.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, EpubError> {
        Self::open_with_options(path, BookOptions::default())
    }

    /// Read an EPUB from disk and parse it with explicit options.
    pub fn open_with_options<P: AsRef<Path>>(
        path: P,
        options: BookOptions,
    ) -> Result<Self, EpubError> {
        let bytes = std::fs::read(path)?;
        Self::load_with_options(bytes, options)
    }

    /// Parse an EPUB held in memory with explicit options.
    pub fn load_with_options(
        bytes: impl Into<Vec<u8>>,
        options: BookOptions,
    ) -> Result<Self, EpubError> {
        let limits = options.zip_limits.unwrap_or_default();
        let archive = Archive::from_bytes_with_limits(bytes.into(), limits)
            .map_err(EpubError::Archive)?;

        let strict = matches!(options.validation_mode, ValidationMode::Strict);
        if strict {
            archive.validate_mimetype().map_err(EpubError::Archive)?;
        }

        let container = match archive.read(CONTAINER_PATH) {
            Ok(bytes) => bytes,
            Err(ZipError::FileNotFound) => {
                return Err(EpubError::InvalidContainer(format!(
                    "{} not found",
                    CONTAINER_PATH
                )))
            }
            Err(err) => return Err(EpubError::Archive(err)),
        };
        let opf_path = parse_container_xml(&container)?;

        let opf = match archive.read(&opf_path) {
            Ok(bytes) => bytes,
            Err(ZipError::FileNotFound) => {
                return Err(EpubError::InvalidPackage(format!(
                    "package document not found: {}",
                    opf_path
                )))
            }
            Err(err) => return Err(EpubError::Archive(err)),
        };
        let package = parse_opf(&opf)?;
        let spine = parse_spine(&opf)?;

        let content_dir = match opf_path.rfind('/') {
            Some(pos) => opf_path[..=pos].to_string(),
            None => String::new(),
        };

        let book = Self {
            archive,
            opf_path,
            content_dir,
            metadata: package.metadata,
            manifest: package.manifest,
            spine,
        };
        if strict {
            book.validate_strict()?;
        }

        log::debug!(
            "[BOOK] Loaded '{}' ({} chapters, {} manifest entries)",
            book.metadata.title,
            book.spine.len(),
            book.manifest.len()
        );
        Ok(book)
    }

    /// Create a builder for loading with options.
    pub fn builder() -> BookBuilder {
        BookBuilder::new()
    }

    fn validate_strict(&self) -> Result<(), EpubError> {
        for item in self.spine.items() {
            if self.manifest.get(&item.idref).is_none() {
                return Err(EpubError::MissingManifestEntry {
                    idref: item.idref.clone(),
                });
            }
        }
        for entry in self.manifest.iter() {
            if entry.href.contains("://") {
                continue;
            }
            let path = self.resolve_href(&entry.href);
            if self.find_archive_path(&path).is_none() {
                return Err(EpubError::MissingResource { path });
            }
        }
        Ok(())
    }

    /// EPUB package metadata.
    pub fn metadata(&self) -> &PackageMetadata {
        &self.metadata
    }

    /// Convenience: metadata title.
    pub fn title(&self) -> &str {
        &self.metadata.title
    }

    /// Convenience: metadata creator.
    pub fn creator(&self) -> &str {
        &self.metadata.creator
    }

    /// Convenience: metadata language.
    pub fn language(&self) -> &str {
        &self.metadata.language
    }

    /// Resources declared in the manifest.
    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    /// Reading order from `<spine>`.
    pub fn spine(&self) -> &Spine {
        &self.spine
    }

    /// Underlying archive.
    pub fn archive(&self) -> &Archive {
        &self.archive
    }

    /// Archive path of the OPF package document.
    pub fn opf_path(&self) -> &str {
        &self.opf_path
    }

    /// Directory of the OPF document including the trailing `/`, or `""`.
    pub fn content_dir(&self) -> &str {
        &self.content_dir
    }

    /// Number of entries in the spine reading order.
    pub fn chapter_count(&self) -> usize {
        self.spine.len()
    }

    /// Enumerate chapters whose spine entry resolves in the manifest.
    pub fn chapters(&self) -> impl Iterator<Item = ChapterRef> + '_ {
        self.spine
            .items()
            .iter()
            .enumerate()
            .filter_map(|(index, spine_item)| {
                self.manifest
                    .get(&spine_item.idref)
                    .map(|entry| chapter_ref(index, entry))
            })
    }

    /// Get a chapter descriptor by spine index.
    pub fn chapter(&self, index: usize) -> Result<ChapterRef, EpubError> {
        let entry = self.chapter_entry(index as i64)?;
        Ok(chapter_ref(index, entry))
    }

    fn chapter_entry(&self, index: i64) -> Result<&ManifestEntry, EpubError> {
        let out_of_range = || EpubError::IndexOutOfRange {
            index,
            chapter_count: self.spine.len(),
        };
        let position = usize::try_from(index).map_err(|_| out_of_range())?;
        let item = self.spine.get_item(position).ok_or_else(out_of_range)?;

        self.manifest
            .get(&item.idref)
            .ok_or_else(|| EpubError::MissingManifestEntry {
                idref: item.idref.clone(),
            })
    }

    /// Raw bytes of the chapter document at spine position `index`.
    ///
    /// Takes a signed index so that callers stepping backwards past the first
    /// chapter get [`EpubError::IndexOutOfRange`] instead of an overflow.
    pub fn chapter_bytes(&self, index: i64) -> Result<Vec<u8>, EpubError> {
        let entry = self.chapter_entry(index)?;
        let path = self.resolve_href(&entry.href);
        self.read_archive_path(&path)
    }

    /// Chapter document decoded as UTF-8, replacing invalid sequences.
    pub fn chapter_html(&self, index: i64) -> Result<String, EpubError> {
        let bytes = self.chapter_bytes(index)?;
        match String::from_utf8(bytes) {
            Ok(html) => Ok(html),
            Err(err) => {
                log::warn!("[BOOK] Chapter {} is not valid UTF-8, decoding lossily", index);
                Ok(String::from_utf8_lossy(err.as_bytes()).into_owned())
            }
        }
    }

    /// Chapter flattened into paragraphs and image placeholders.
    pub fn chapter_text(&self, index: i64) -> Result<StructuredText, EpubError> {
        let bytes = self.chapter_bytes(index)?;
        Ok(extract_structured_text(&bytes))
    }

    /// Display title of a chapter.
    ///
    /// The first `h1`-`h3`, else the document `<title>`, else `Chapter {n}`
    /// counting from 1. Only an out-of-range index is an error.
    pub fn chapter_title(&self, index: i64) -> Result<String, EpubError> {
        let fallback = format!("Chapter {}", index.saturating_add(1));
        match self.chapter_bytes(index) {
            Ok(bytes) => Ok(document_title(&bytes).unwrap_or(fallback)),
            Err(err @ EpubError::IndexOutOfRange { .. }) => Err(err),
            Err(err) => {
                log::warn!("[BOOK] No title for chapter {}: {}", index, err);
                Ok(fallback)
            }
        }
    }

    /// Titles for every chapter, for a table of contents.
    pub fn chapter_titles(&self) -> Vec<String> {
        (0..self.spine.len() as i64)
            .map(|index| {
                self.chapter_title(index)
                    .unwrap_or_else(|_| format!("Chapter {}", index + 1))
            })
            .collect()
    }

    /// Pick the cover image.
    ///
    /// Prefers the first image whose id or href mentions "cover", then the
    /// first image in the manifest. A chosen entry whose file is missing
    /// yields `Ok(None)`.
    pub fn cover_image(&self) -> Result<Option<CoverImage>, EpubError> {
        let Some(entry) = self.cover_entry() else {
            return Ok(None);
        };

        let path = self.resolve_href(&entry.href);
        match self.read_archive_path(&path) {
            Ok(data) => Ok(Some(CoverImage {
                id: entry.id.clone(),
                path,
                media_type: entry.media_type.clone(),
                data,
            })),
            Err(EpubError::MissingResource { path }) => {
                log::warn!("[BOOK] Cover image '{}' is missing from the archive", path);
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    /// Manifest entry that [`Self::cover_image`] would read.
    pub fn cover_entry(&self) -> Option<&ManifestEntry> {
        let named = self.manifest.iter().find(|entry| {
            entry.is_image()
                && (entry.id.to_lowercase().contains("cover")
                    || entry.href.to_lowercase().contains("cover"))
        });
        named.or_else(|| self.manifest.iter().find(|entry| entry.is_image()))
    }

    /// Read a resource by OPF-relative href.
    ///
    /// Fragment suffixes (e.g. `chapter.xhtml#p3`) are ignored.
    pub fn read_resource(&self, href: &str) -> Result<Vec<u8>, EpubError> {
        let path = self.resolve_href(href);
        self.read_archive_path(&path)
    }

    /// Resolve and read a resource referenced from a chapter document,
    /// such as an `<img src>`.
    pub fn resolve_chapter_resource(&self, index: i64, src: &str) -> Result<Resource, EpubError> {
        let entry = self.chapter_entry(index)?;
        let chapter_path = self.resolve_href(&entry.href);
        let path = resolve_relative_path(&chapter_path, src);
        let data = self.read_archive_path(&path)?;

        let media_type = self
            .manifest
            .iter()
            .find(|candidate| self.resolve_href(&candidate.href) == path)
            .map(|candidate| candidate.media_type.clone())
            .unwrap_or_else(|| media_type_for_path(&path).to_string());

        Ok(Resource {
            path,
            media_type,
            data,
        })
    }

    /// Archive path of an OPF-relative href.
    pub fn resolve_href(&self, href: &str) -> String {
        resolve_relative_path(&self.opf_path, href)
    }

    fn find_archive_path(&self, path: &str) -> Option<String> {
        if self.archive.contains(path) {
            return Some(path.to_string());
        }
        let decoded = percent_decode(path);
        if decoded != path && self.archive.contains(&decoded) {
            return Some(decoded);
        }
        None
    }

    fn read_archive_path(&self, path: &str) -> Result<Vec<u8>, EpubError> {
        let found = self
            .find_archive_path(path)
            .ok_or_else(|| EpubError::MissingResource {
                path: path.to_string(),
            })?;
        self.archive.read(&found).map_err(EpubError::Archive)
    }
}

/// Guess an image media type from a file extension.
///
/// Unknown extensions are reported as `image/jpeg`.
pub fn media_type_for_path(path: &str) -> &'static str {
    let ext = path
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" => "image/png",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "webp" => "image/webp",
        _ => "image/jpeg",
    }
}

fn chapter_ref(index: usize, entry: &ManifestEntry) -> ChapterRef {
    ChapterRef {
        index,
        idref: entry.id.clone(),
        href: entry.href.clone(),
        media_type: entry.media_type.clone(),
    }
}

/// Resolve `href` against the directory of the document at `base_path`.
fn resolve_relative_path(base_path: &str, href: &str) -> String {
    let href = href.split('#').next().unwrap_or(href);
    if href.is_empty() {
        return normalize_path(base_path);
    }
    if href.starts_with('/') {
        return normalize_path(href.trim_start_matches('/'));
    }
    if href.contains("://") {
        return href.to_string();
    }

    let base_dir = base_path.rsplit_once('/').map(|(dir, _)| dir).unwrap_or("");
    if base_dir.is_empty() {
        normalize_path(href)
    } else {
        normalize_path(&format!("{}/{}", base_dir, href))
    }
}

fn normalize_path(path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            _ => parts.push(part),
        }
    }
    parts.join("/")
}

/// Decode `%XX` escapes; malformed escapes are kept verbatim.
fn percent_decode(path: &str) -> String {
    let bytes = path.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            if let (Some(hi), Some(lo)) = (hex_value(bytes[i + 1]), hex_value(bytes[i + 2])) {
                out.push(hi << 4 | lo);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn hex_value(byte: u8) -> Option<u8> {
    match byte {
        b'0'..=b'9' => Some(byte - b'0'),
        b'a'..=b'f' => Some(byte - b'a' + 10),
        b'A'..=b'F' => Some(byte - b'A' + 10),
        _ => None,
    }
}

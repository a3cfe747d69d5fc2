//! Package document parser using quick-xml SAX-style parsing
//!
//! Parses container.xml to find the OPF package file,
//! then extracts metadata and manifest from the OPF.

use quick_xml::events::{BytesRef, BytesStart, Event};
use quick_xml::reader::Reader;

use crate::error::EpubError;

/// Title used when the package declares none
pub const DEFAULT_TITLE: &str = "Unknown";

/// Creator used when the package declares none
pub const DEFAULT_CREATOR: &str = "Unknown";

/// Language used when the package declares none
pub const DEFAULT_LANGUAGE: &str = "en";

/// Maximum number of subject tags
const MAX_SUBJECTS: usize = 64;

/// A single item in the EPUB manifest (id -> href mapping)
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "persist", derive(serde::Serialize))]
pub struct ManifestEntry {
    /// Resource identifier
    pub id: String,
    /// Path relative to OPF
    pub href: String,
    /// MIME type
    pub media_type: String,
    /// Optional properties (e.g. "cover-image", "nav")
    pub properties: Option<String>,
}

impl ManifestEntry {
    /// Whether the declared media type is an image.
    pub fn is_image(&self) -> bool {
        self.media_type.starts_with("image/")
    }
}

/// All resources declared in the OPF manifest, in document order
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Manifest {
    entries: Vec<ManifestEntry>,
}

impl Manifest {
    /// Build a manifest from entries in document order.
    ///
    /// A later entry never replaces an earlier one with the same id.
    pub fn from_entries(entries: Vec<ManifestEntry>) -> Self {
        Self { entries }
    }

    /// Get manifest entry by id
    pub fn get(&self, id: &str) -> Option<&ManifestEntry> {
        self.entries.iter().find(|entry| entry.id == id)
    }

    /// Find an entry by its OPF-relative href
    pub fn find_by_href(&self, href: &str) -> Option<&ManifestEntry> {
        self.entries.iter().find(|entry| entry.href == href)
    }

    /// Iterate entries in document order
    pub fn iter(&self) -> impl Iterator<Item = &ManifestEntry> {
        self.entries.iter()
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the manifest declares nothing
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Book-level metadata extracted from the OPF `<metadata>` section
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "persist", derive(serde::Serialize))]
pub struct PackageMetadata {
    /// Book title
    pub title: String,
    /// Primary creator (author)
    pub creator: String,
    /// Language code (e.g. "en")
    pub language: String,

    // -- Dublin Core extended metadata --
    /// Publication date (dc:date)
    pub date: Option<String>,
    /// Publisher (dc:publisher)
    pub publisher: Option<String>,
    /// Rights statement (dc:rights)
    pub rights: Option<String>,
    /// Book description / blurb (dc:description)
    pub description: Option<String>,
    /// Subject tags (dc:subject)
    pub subjects: Vec<String>,
    /// Unique identifier (dc:identifier), ISBN, UUID, etc.
    pub identifier: Option<String>,
    /// Last modified date (dcterms:modified)
    pub modified: Option<String>,
    /// Manifest id named by `<meta name="cover">` or `properties="cover-image"`
    pub cover_id: Option<String>,
}

impl Default for PackageMetadata {
    fn default() -> Self {
        Self {
            title: DEFAULT_TITLE.to_string(),
            creator: DEFAULT_CREATOR.to_string(),
            language: DEFAULT_LANGUAGE.to_string(),
            date: None,
            publisher: None,
            rights: None,
            description: None,
            subjects: Vec::new(),
            identifier: None,
            modified: None,
            cover_id: None,
        }
    }
}

/// Metadata and manifest parsed from one OPF document
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct OpfPackage {
    /// `<metadata>` contents with defaults applied
    pub metadata: PackageMetadata,
    /// `<manifest>` contents
    pub manifest: Manifest,
}

/// Parse container.xml to find the OPF package file path
///
/// Returns the full-path attribute of the first rootfile element.
pub fn parse_container_xml(content: &[u8]) -> Result<String, EpubError> {
    let mut reader = Reader::from_reader(content);
    reader.config_mut().trim_text(true);

    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => {
                if e.local_name().as_ref() == b"rootfile" {
                    if let Some(path) = attribute(&e, &reader, "full-path")? {
                        if !path.trim().is_empty() {
                            return Ok(path.trim().to_string());
                        }
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(EpubError::InvalidContainer(format!(
                    "XML parse error: {:?}",
                    e
                )))
            }
            _ => {}
        }
        buf.clear();
    }

    Err(EpubError::InvalidContainer(
        "No rootfile found in container.xml".into(),
    ))
}

/// Dublin Core field currently collecting text
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Field {
    Title,
    Creator,
    Language,
    Date,
    Publisher,
    Rights,
    Description,
    Subject,
    Identifier,
    Modified,
}

impl Field {
    fn from_element(local: &[u8], property: Option<&str>) -> Option<Self> {
        match local {
            b"title" => Some(Field::Title),
            b"creator" => Some(Field::Creator),
            b"language" => Some(Field::Language),
            b"date" => Some(Field::Date),
            b"publisher" => Some(Field::Publisher),
            b"rights" => Some(Field::Rights),
            b"description" => Some(Field::Description),
            b"subject" => Some(Field::Subject),
            b"identifier" => Some(Field::Identifier),
            b"meta" if property == Some("dcterms:modified") => Some(Field::Modified),
            _ => None,
        }
    }
}

/// Parse content.opf to extract metadata and manifest
///
/// Missing metadata fields fall back to the defaults. Only the first
/// occurrence of title, creator and language is kept.
pub fn parse_opf(content: &[u8]) -> Result<OpfPackage, EpubError> {
    let mut reader = Reader::from_reader(content);

    let mut buf = Vec::new();
    let mut metadata = PackageMetadata::default();
    let mut entries: Vec<ManifestEntry> = Vec::new();
    let mut seen = SeenFields::default();

    // State tracking
    let mut in_metadata = false;
    let mut in_manifest = false;
    let mut field: Option<Field> = None;
    let mut text = String::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"metadata" => in_metadata = true,
                b"manifest" => in_manifest = true,
                b"item" if in_manifest => push_manifest_entry(&mut entries, &e, &reader)?,
                b"meta" if in_metadata => {
                    read_cover_meta(&mut metadata, &e, &reader)?;
                    let property = attribute(&e, &reader, "property")?;
                    field = Field::from_element(b"meta", property.as_deref());
                    text.clear();
                }
                local if in_metadata => {
                    field = Field::from_element(local, None);
                    text.clear();
                }
                _ => {}
            },
            Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"item" if in_manifest => push_manifest_entry(&mut entries, &e, &reader)?,
                b"meta" if in_metadata => read_cover_meta(&mut metadata, &e, &reader)?,
                _ => {}
            },
            Ok(Event::Text(e)) => {
                if field.is_some() {
                    let decoded = e
                        .decode()
                        .map_err(|err| EpubError::Parse(format!("Decode error: {:?}", err)))?;
                    text.push_str(&decoded);
                }
            }
            Ok(Event::CData(e)) => {
                if field.is_some() {
                    let decoded = reader
                        .decoder()
                        .decode(&e)
                        .map_err(|err| EpubError::Parse(format!("Decode error: {:?}", err)))?;
                    text.push_str(&decoded);
                }
            }
            Ok(Event::GeneralRef(e)) => {
                if field.is_some() {
                    push_entity(&mut text, &e)?;
                }
            }
            Ok(Event::End(e)) => {
                match e.local_name().as_ref() {
                    b"metadata" => in_metadata = false,
                    b"manifest" => in_manifest = false,
                    _ => {}
                }
                if let Some(done) = field.take() {
                    seen.apply(&mut metadata, done, text.trim());
                    text.clear();
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(EpubError::InvalidPackage(format!(
                    "XML parse error: {:?}",
                    e
                )))
            }
            _ => {}
        }
        buf.clear();
    }

    if metadata.cover_id.is_none() {
        metadata.cover_id = entries
            .iter()
            .find(|entry| {
                entry
                    .properties
                    .as_deref()
                    .is_some_and(|p| p.split_whitespace().any(|p| p == "cover-image"))
            })
            .map(|entry| entry.id.clone());
    }

    Ok(OpfPackage {
        metadata,
        manifest: Manifest::from_entries(entries),
    })
}

/// Tracks which single-valued fields were already assigned
#[derive(Default)]
struct SeenFields {
    title: bool,
    creator: bool,
    language: bool,
}

impl SeenFields {
    fn apply(&mut self, metadata: &mut PackageMetadata, field: Field, value: &str) {
        if value.is_empty() {
            return;
        }
        let value = value.to_string();
        match field {
            Field::Title if !self.title => {
                self.title = true;
                metadata.title = value;
            }
            Field::Creator if !self.creator => {
                self.creator = true;
                metadata.creator = value;
            }
            Field::Language if !self.language => {
                self.language = true;
                metadata.language = value;
            }
            Field::Date => metadata.date = metadata.date.take().or(Some(value)),
            Field::Publisher => metadata.publisher = metadata.publisher.take().or(Some(value)),
            Field::Rights => metadata.rights = metadata.rights.take().or(Some(value)),
            Field::Description => {
                metadata.description = metadata.description.take().or(Some(value))
            }
            Field::Identifier => {
                metadata.identifier = metadata.identifier.take().or(Some(value))
            }
            Field::Modified => metadata.modified = Some(value),
            Field::Subject => {
                if metadata.subjects.len() < MAX_SUBJECTS {
                    metadata.subjects.push(value);
                }
            }
            Field::Title | Field::Creator | Field::Language => {}
        }
    }
}

/// Resolve a predefined or numeric entity reference into `out`.
fn push_entity(out: &mut String, e: &BytesRef<'_>) -> Result<(), EpubError> {
    if let Ok(Some(ch)) = e.resolve_char_ref() {
        out.push(ch);
        return Ok(());
    }
    let name = e
        .decode()
        .map_err(|err| EpubError::Parse(format!("Decode error: {:?}", err)))?;
    match quick_xml::escape::resolve_predefined_entity(&name) {
        Some(resolved) => out.push_str(resolved),
        None => {
            out.push('&');
            out.push_str(&name);
            out.push(';');
        }
    }
    Ok(())
}

/// Handle EPUB2 `<meta name="cover" content="...">`
fn read_cover_meta(
    metadata: &mut PackageMetadata,
    e: &BytesStart<'_>,
    reader: &Reader<&[u8]>,
) -> Result<(), EpubError> {
    if attribute(e, reader, "name")?.as_deref() == Some("cover") {
        if let Some(content) = attribute(e, reader, "content")? {
            metadata.cover_id = Some(content);
        }
    }
    Ok(())
}

/// Parse a manifest item and keep it when it carries id, href and media-type
fn push_manifest_entry(
    entries: &mut Vec<ManifestEntry>,
    e: &BytesStart<'_>,
    reader: &Reader<&[u8]>,
) -> Result<(), EpubError> {
    let id = attribute(e, reader, "id")?;
    let href = attribute(e, reader, "href")?;
    let media_type = attribute(e, reader, "media-type")?;

    if let (Some(id), Some(href), Some(media_type)) = (id, href, media_type) {
        if entries.iter().any(|entry| entry.id == id) {
            log::warn!("[OPF] Duplicate manifest id '{}' ignored", id);
            return Ok(());
        }
        entries.push(ManifestEntry {
            id,
            href,
            media_type,
            properties: attribute(e, reader, "properties")?,
        });
    }
    Ok(())
}

/// Read and unescape a single attribute by local name
/// Unescaped value of the attribute whose local name is `key`
pub(crate) fn attribute(
    e: &BytesStart<'_>,
    reader: &Reader<&[u8]>,
    key: &str,
) -> Result<Option<String>, EpubError> {
    for attr in e.attributes() {
        let attr = attr.map_err(|err| EpubError::Parse(format!("Attr error: {:?}", err)))?;
        if attr.key.local_name().as_ref() != key.as_bytes() {
            continue;
        }
        let value = attr
            .decode_and_unescape_value(reader.decoder())
            .map_err(|err| EpubError::Parse(format!("Decode error: {:?}", err)))?;
        return Ok(Some(value.into_owned()));
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_container_xml() {
        let container = br#"<?xml version="1.0"?>
<container xmlns="urn:oasis:names:tc:opendocument:xmlns:container" version="1.0">
   <rootfiles>
      <rootfile full-path="EPUB/package.opf" media-type="application/oebps-package+xml"/>
   </rootfiles>
</container>"#;

        let result = parse_container_xml(container).unwrap();
        assert_eq!(result, "EPUB/package.opf");
    }

    #[test]
    fn test_parse_container_xml_without_rootfile() {
        let container = br#"<?xml version="1.0"?>
<container version="1.0"><rootfiles/></container>"#;

        let err = parse_container_xml(container).unwrap_err();
        assert!(matches!(err, EpubError::InvalidContainer(_)));
    }

    #[test]
    fn test_parse_container_xml_empty_full_path() {
        let container = br#"<container><rootfiles><rootfile full-path=""/></rootfiles></container>"#;
        assert!(matches!(
            parse_container_xml(container),
            Err(EpubError::InvalidContainer(_))
        ));
    }

    #[test]
    fn test_parse_opf_basic() {
        let opf = br#"<?xml version="1.0"?>
<package xmlns="http://www.idpf.org/2007/opf" version="3.0">
  <metadata xmlns:dc="http://purl.org/dc/elements/1.1/">
    <dc:title>Test Book</dc:title>
    <dc:creator>Test Author</dc:creator>
    <dc:language>fr</dc:language>
  </metadata>
  <manifest>
    <item id="cover" href="cover.xhtml" media-type="application/xhtml+xml"/>
    <item id="chapter1" href="chapter1.xhtml" media-type="application/xhtml+xml"/>
  </manifest>
</package>"#;

        let package = parse_opf(opf).unwrap();
        assert_eq!(package.metadata.title, "Test Book");
        assert_eq!(package.metadata.creator, "Test Author");
        assert_eq!(package.metadata.language, "fr");
        assert_eq!(package.manifest.len(), 2);
        assert_eq!(package.manifest.iter().next().unwrap().id, "cover");
        assert_eq!(package.manifest.get("chapter1").unwrap().href, "chapter1.xhtml");
    }

    #[test]
    fn test_parse_opf_defaults_when_metadata_missing() {
        let opf = br#"<package><metadata/><manifest/></package>"#;
        let package = parse_opf(opf).unwrap();
        assert_eq!(package.metadata.title, "Unknown");
        assert_eq!(package.metadata.creator, "Unknown");
        assert_eq!(package.metadata.language, "en");
        assert!(package.manifest.is_empty());
    }

    #[test]
    fn test_parse_opf_blank_title_keeps_default() {
        let opf = br#"<package><metadata><dc:title>   </dc:title></metadata></package>"#;
        assert_eq!(parse_opf(opf).unwrap().metadata.title, "Unknown");
    }

    #[test]
    fn test_parse_opf_first_creator_wins() {
        let opf = br#"<package><metadata>
    <dc:creator>First Author</dc:creator>
    <dc:creator>Second Author</dc:creator>
  </metadata></package>"#;
        assert_eq!(parse_opf(opf).unwrap().metadata.creator, "First Author");
    }

    #[test]
    fn test_parse_opf_entities_in_title() {
        let opf = br#"<package><metadata>
    <dc:title>Pride &amp; Prejudice &#8212; Vol. 1</dc:title>
  </metadata></package>"#;
        assert_eq!(
            parse_opf(opf).unwrap().metadata.title,
            "Pride & Prejudice \u{2014} Vol. 1"
        );
    }

    #[test]
    fn test_parse_opf_skips_incomplete_items() {
        let opf = br#"<package><manifest>
    <item id="a" href="a.xhtml"/>
    <item id="b" href="b.xhtml" media-type="application/xhtml+xml"/>
    <item href="c.xhtml" media-type="application/xhtml+xml"/>
  </manifest></package>"#;
        let package = parse_opf(opf).unwrap();
        assert_eq!(package.manifest.len(), 1);
        assert!(package.manifest.get("a").is_none());
        assert!(package.manifest.get("b").is_some());
    }

    #[test]
    fn test_parse_opf_duplicate_id_keeps_first() {
        let opf = br#"<package><manifest>
    <item id="a" href="first.xhtml" media-type="application/xhtml+xml"/>
    <item id="a" href="second.xhtml" media-type="application/xhtml+xml"/>
  </manifest></package>"#;
        let package = parse_opf(opf).unwrap();
        assert_eq!(package.manifest.len(), 1);
        assert_eq!(package.manifest.get("a").unwrap().href, "first.xhtml");
    }

    #[test]
    fn test_parse_opf_with_cover_meta() {
        let opf = br#"<?xml version="1.0"?>
<package xmlns="http://www.idpf.org/2007/opf" version="2.0">
  <metadata xmlns:dc="http://purl.org/dc/elements/1.1/">
    <dc:title>Book with Cover</dc:title>
    <meta name="cover" content="img-front"/>
  </metadata>
  <manifest>
    <item id="img-front" href="images/front.jpg" media-type="image/jpeg"/>
  </manifest>
</package>"#;

        let package = parse_opf(opf).unwrap();
        assert_eq!(package.metadata.cover_id, Some("img-front".to_string()));
        assert!(package.manifest.get("img-front").unwrap().is_image());
    }

    #[test]
    fn test_parse_opf_cover_image_property() {
        let opf = br#"<package><manifest>
    <item id="pic" href="pic.png" media-type="image/png" properties="cover-image"/>
  </manifest></package>"#;
        let package = parse_opf(opf).unwrap();
        assert_eq!(package.metadata.cover_id.as_deref(), Some("pic"));
    }

    #[test]
    fn test_parse_opf_all_dublin_core_fields() {
        let opf = br#"<?xml version="1.0"?>
<package xmlns="http://www.idpf.org/2007/opf" version="3.0">
  <metadata xmlns:dc="http://purl.org/dc/elements/1.1/">
    <dc:title>Complete Book</dc:title>
    <dc:creator>Jane Doe</dc:creator>
    <dc:language>fr</dc:language>
    <dc:date>2023-03-20</dc:date>
    <dc:publisher>Example Press</dc:publisher>
    <dc:rights>All rights reserved</dc:rights>
    <dc:description>A comprehensive test book.</dc:description>
    <dc:subject>Testing</dc:subject>
    <dc:subject>Software</dc:subject>
    <dc:identifier>urn:uuid:12345678-1234-1234-1234-123456789abc</dc:identifier>
    <meta property="dcterms:modified">2023-06-15T10:30:00Z</meta>
  </metadata>
  <manifest>
    <item id="ch1" href="chapter1.xhtml" media-type="application/xhtml+xml"/>
  </manifest>
</package>"#;

        let metadata = parse_opf(opf).unwrap().metadata;
        assert_eq!(metadata.title, "Complete Book");
        assert_eq!(metadata.creator, "Jane Doe");
        assert_eq!(metadata.language, "fr");
        assert_eq!(metadata.date, Some("2023-03-20".to_string()));
        assert_eq!(metadata.publisher, Some("Example Press".to_string()));
        assert_eq!(metadata.rights, Some("All rights reserved".to_string()));
        assert_eq!(
            metadata.description,
            Some("A comprehensive test book.".to_string())
        );
        assert_eq!(metadata.subjects, vec!["Testing", "Software"]);
        assert_eq!(
            metadata.identifier,
            Some("urn:uuid:12345678-1234-1234-1234-123456789abc".to_string())
        );
        assert_eq!(metadata.modified, Some("2023-06-15T10:30:00Z".to_string()));
    }

    #[test]
    fn test_parse_opf_malformed_is_invalid_package() {
        let opf = br#"<package><metadata><dc:title>Broken</dc:creator></metadata></package>"#;
        assert!(matches!(parse_opf(opf), Err(EpubError::InvalidPackage(_))));
    }
}

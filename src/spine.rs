//! EPUB spine parser
//!
//! The spine defines the reading order of chapters. Position tracking lives
//! with the caller, so a `Spine` is immutable once parsed.

use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;

use crate::error::EpubError;
use crate::metadata::attribute;

/// A single item in the EPUB spine (chapter reference)
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SpineItem {
    /// Manifest item this spine entry references
    pub idref: String,
    /// Whether this item is part of the linear reading order
    pub linear: bool,
    /// Optional properties (e.g. "page-spread-left")
    pub properties: Option<String>,
}

impl SpineItem {
    /// Linear item referencing `idref`
    pub fn new(idref: impl Into<String>) -> Self {
        Self {
            idref: idref.into(),
            linear: true,
            properties: None,
        }
    }
}

/// Reading order of an EPUB
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Spine {
    items: Vec<SpineItem>,
    toc_id: Option<String>,
}

impl Spine {
    /// Create an empty spine
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a linear spine from manifest ids
    pub fn from_idrefs<I, S>(idrefs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            items: idrefs.into_iter().map(SpineItem::new).collect(),
            toc_id: None,
        }
    }

    /// Spine entries in reading order
    pub fn items(&self) -> &[SpineItem] {
        &self.items
    }

    /// EPUB2 NCX id from `<spine toc="...">`
    pub fn toc_id(&self) -> Option<&str> {
        self.toc_id.as_deref()
    }

    /// Number of chapters
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the book has no chapters
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Manifest id at `index`
    pub fn get_id(&self, index: usize) -> Option<&str> {
        self.items.get(index).map(|item| item.idref.as_str())
    }

    /// Spine entry at `index`
    pub fn get_item(&self, index: usize) -> Option<&SpineItem> {
        self.items.get(index)
    }

    /// Position of the first entry referencing `idref`
    pub fn position_of(&self, idref: &str) -> Option<usize> {
        self.items.iter().position(|item| item.idref == idref)
    }

    /// All manifest ids in reading order
    pub fn chapter_ids(&self) -> Vec<&str> {
        self.items.iter().map(|item| item.idref.as_str()).collect()
    }
}

/// Parse the `<spine>` section of an OPF document
///
/// Itemrefs without an `idref` are skipped. Duplicates are kept, since
/// a spine may legitimately revisit a document.
pub fn parse_spine(content: &[u8]) -> Result<Spine, EpubError> {
    let mut reader = Reader::from_reader(content);
    reader.config_mut().trim_text(true);

    let mut buf = Vec::new();
    let mut spine = Spine::new();
    let mut in_spine = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"spine" => {
                    in_spine = true;
                    spine.toc_id = attribute(&e, &reader, "toc")?;
                }
                b"itemref" if in_spine => push_itemref(&mut spine, &e, &reader)?,
                _ => {}
            },
            Ok(Event::Empty(e)) => {
                if in_spine && e.local_name().as_ref() == b"itemref" {
                    push_itemref(&mut spine, &e, &reader)?;
                }
            }
            Ok(Event::End(e)) => {
                if e.local_name().as_ref() == b"spine" {
                    break;
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

    Ok(spine)
}

fn push_itemref(
    spine: &mut Spine,
    e: &BytesStart<'_>,
    reader: &Reader<&[u8]>,
) -> Result<(), EpubError> {
    let Some(idref) = attribute(e, reader, "idref")? else {
        return Ok(());
    };
    let linear = attribute(e, reader, "linear")?.as_deref() != Some("no");
    spine.items.push(SpineItem {
        idref,
        linear,
        properties: attribute(e, reader, "properties")?,
    });
    Ok(())
}

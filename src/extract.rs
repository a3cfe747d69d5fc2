//! Chapter HTML to structured text
//!
//! Chapter documents are parsed leniently into a small typed node tree and
//! flattened into a sequence of paragraphs and image placeholders. Real-world
//! EPUB markup is often not well-formed XHTML, so end-name checks are off,
//! stray end tags and bare `&` are tolerated, a `<` that cannot open a tag
//! is kept as text and HTML void elements are treated as leaves.
//! When even that fails, the chapter degrades to a single raw-text paragraph.
//! Extraction never returns an error.

use std::borrow::Cow;

use quick_xml::escape::resolve_html5_entity;
use quick_xml::events::{BytesRef, BytesStart, Event};
use quick_xml::reader::Reader;

/// Paragraph used when a chapter yields no visible content
pub const FALLBACK_TEXT: &str = "No content available for this chapter.";

/// Alt text for images that declare none
pub const DEFAULT_IMAGE_ALT: &str = "Image";

/// Nesting beyond this depth is flattened into the deepest open element
const MAX_DEPTH: usize = 256;

/// One unit of extracted chapter content
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "persist", derive(serde::Serialize))]
#[cfg_attr(feature = "persist", serde(rename_all = "lowercase"))]
pub enum Segment {
    /// Whitespace-normalised paragraph text. Empty means a blank spacer.
    Paragraph(String),
    /// Image placeholder carrying its alt text
    Image {
        /// Alt text, `"Image"` when the source declared none
        alt: String,
    },
}

impl Segment {
    /// Whether this segment renders nothing but spacing.
    pub fn is_blank(&self) -> bool {
        matches!(self, Segment::Paragraph(text) if text.trim().is_empty())
    }

    /// Paragraph shortcut
    pub fn paragraph(text: impl Into<String>) -> Self {
        Segment::Paragraph(text.into())
    }

    /// Image shortcut
    pub fn image(alt: impl Into<String>) -> Self {
        Segment::Image { alt: alt.into() }
    }
}

/// Ordered paragraphs and image placeholders of one chapter
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "persist", derive(serde::Serialize))]
#[cfg_attr(feature = "persist", serde(transparent))]
pub struct StructuredText(Vec<Segment>);

impl StructuredText {
    /// Wrap already-extracted segments
    pub fn new(segments: Vec<Segment>) -> Self {
        Self(segments)
    }

    /// The single fallback paragraph
    pub fn fallback() -> Self {
        Self(vec![Segment::Paragraph(FALLBACK_TEXT.to_string())])
    }

    /// Borrow the segments
    pub fn segments(&self) -> &[Segment] {
        &self.0
    }

    /// Take ownership of the segments
    pub fn into_segments(self) -> Vec<Segment> {
        self.0
    }

    /// Number of segments
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether there are no segments at all
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Whether every segment is blank
    pub fn is_blank(&self) -> bool {
        self.0.iter().all(Segment::is_blank)
    }

    /// Whether this is exactly the fallback paragraph
    pub fn is_fallback(&self) -> bool {
        matches!(self.0.as_slice(), [Segment::Paragraph(text)] if text == FALLBACK_TEXT)
    }

    /// Iterate the segments
    pub fn iter(&self) -> std::slice::Iter<'_, Segment> {
        self.0.iter()
    }

    /// Words of every paragraph, in order
    pub fn words(&self) -> impl Iterator<Item = &str> {
        self.0.iter().flat_map(|segment| match segment {
            Segment::Paragraph(text) => text.split_whitespace(),
            Segment::Image { .. } => "".split_whitespace(),
        })
    }
}

impl From<Vec<Segment>> for StructuredText {
    fn from(segments: Vec<Segment>) -> Self {
        Self(segments)
    }
}

impl<'a> IntoIterator for &'a StructuredText {
    type Item = &'a Segment;
    type IntoIter = std::slice::Iter<'a, Segment>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Lenient HTML node
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Node {
    /// Character data with entities resolved
    Text(String),
    /// Element with lowercased local name
    Element {
        /// Local name, lowercased
        name: String,
        /// Attributes in source order
        attrs: Vec<(String, String)>,
        /// Child nodes
        children: Vec<Node>,
    },
    /// Comment, doctype or processing instruction
    Other,
}

impl Node {
    /// Element name, if this is an element
    pub fn name(&self) -> Option<&str> {
        match self {
            Node::Element { name, .. } => Some(name),
            _ => None,
        }
    }

    /// Attribute value by name
    pub fn attr(&self, key: &str) -> Option<&str> {
        match self {
            Node::Element { attrs, .. } => attrs
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(key))
                .map(|(_, v)| v.as_str()),
            _ => None,
        }
    }

    /// Child nodes (empty for non-elements)
    pub fn children(&self) -> &[Node] {
        match self {
            Node::Element { children, .. } => children,
            _ => &[],
        }
    }

    /// Concatenated, whitespace-normalised text of this subtree
    pub fn text_content(&self) -> String {
        let mut raw = String::new();
        collect_text(self, &mut raw);
        normalize_whitespace(&raw)
    }

    /// First element named `name` in depth-first document order
    pub fn find(&self, name: &str) -> Option<&Node> {
        if self.name() == Some(name) {
            return Some(self);
        }
        self.children().iter().find_map(|child| child.find(name))
    }
}

fn collect_text(node: &Node, out: &mut String) {
    match node {
        Node::Text(text) => {
            out.push_str(text);
            out.push(' ');
        }
        Node::Element { name, children, .. } if !should_skip_element(name) => {
            for child in children {
                collect_text(child, out);
            }
        }
        _ => {}
    }
}

/// Parse HTML or XHTML bytes into a forest of top-level nodes.
///
/// Errors only on unrecoverable syntax or encoding problems.
pub fn parse_html(html: &[u8]) -> Result<Vec<Node>, quick_xml::Error> {
    let html = escape_stray_lt(html);
    let mut reader = Reader::from_reader(&*html);
    {
        let config = reader.config_mut();
        config.trim_text(false);
        config.check_end_names = false;
        config.allow_unmatched_ends = true;
        config.allow_dangling_amp = true;
        config.expand_empty_elements = false;
    }

    let mut buf = Vec::new();
    let mut builder = TreeBuilder::default();

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) => {
                let (name, attrs) = element_parts(&e, &reader);
                if is_void_element(&name) {
                    builder.leaf(name, attrs);
                } else {
                    builder.open(name, attrs);
                }
            }
            Event::Empty(e) => {
                let (name, attrs) = element_parts(&e, &reader);
                builder.leaf(name, attrs);
            }
            Event::End(e) => {
                let name = lower_name(e.local_name().as_ref());
                if !is_void_element(&name) {
                    builder.close(&name);
                }
            }
            Event::Text(e) => {
                let text = e.decode()?;
                builder.text(&text);
            }
            Event::CData(e) => {
                let text = reader.decoder().decode(&e)?;
                builder.text(&text);
            }
            Event::GeneralRef(e) => {
                let resolved = resolve_entity(&e)?;
                builder.text(&resolved);
            }
            Event::Comment(_) | Event::DocType(_) | Event::PI(_) => builder.other(),
            Event::Decl(_) => {}
            Event::Eof => break,
        }
        buf.clear();
    }

    Ok(builder.finish())
}

/// Flatten chapter HTML into paragraphs and image placeholders.
///
/// Block tags (`p`, `div`, `h1`-`h6`, `br`) end the current paragraph, `img`
/// becomes a placeholder and non-visible elements are skipped. A chapter with
/// nothing visible yields [`FALLBACK_TEXT`].
pub fn extract_structured_text(html: &[u8]) -> StructuredText {
    let nodes = match parse_html(html) {
        Ok(nodes) => nodes,
        Err(err) => {
            log::warn!(
                "[EXTRACT] HTML parse failed ({}), falling back to raw text",
                err
            );
            return extract_raw_text(html);
        }
    };

    let body = nodes.iter().find_map(|node| node.find("body"));
    let roots: &[Node] = match body {
        Some(body) => body.children(),
        None => &nodes,
    };

    let mut flattener = Flattener::default();
    flattener.walk(roots);
    flattener.flush();

    let text = StructuredText(flattener.segments);
    if text.is_blank() {
        log::warn!("[EXTRACT] Chapter has no visible content");
        return StructuredText::fallback();
    }
    text
}

/// Strip tags and collapse whitespace into a single paragraph.
pub fn extract_raw_text(html: &[u8]) -> StructuredText {
    let source = String::from_utf8_lossy(html);
    let mut out = String::with_capacity(source.len());
    let mut in_tag = false;

    for ch in source.chars() {
        match ch {
            '<' => in_tag = true,
            '>' if in_tag => {
                in_tag = false;
                out.push(' ');
            }
            _ if !in_tag => out.push(ch),
            _ => {}
        }
    }

    let text = normalize_whitespace(&out);
    if text.is_empty() {
        StructuredText::fallback()
    } else {
        StructuredText(vec![Segment::Paragraph(text)])
    }
}

/// Best title for a chapter document: first `h1`-`h3`, else `<title>`.
pub fn document_title(html: &[u8]) -> Option<String> {
    let nodes = parse_html(html).ok()?;
    let body = nodes.iter().find_map(|node| node.find("body"));

    let heading = match body {
        Some(body) => first_heading(body.children()),
        None => first_heading(&nodes),
    };
    heading.or_else(|| {
        nodes
            .iter()
            .find_map(|node| node.find("title"))
            .map(Node::text_content)
            .filter(|title| !title.is_empty())
    })
}

fn first_heading(nodes: &[Node]) -> Option<String> {
    for node in nodes {
        match node.name() {
            Some("h1" | "h2" | "h3") => {
                let text = node.text_content();
                if !text.is_empty() {
                    return Some(text);
                }
            }
            Some(name) if should_skip_element(name) => {}
            Some(_) => {
                if let Some(found) = first_heading(node.children()) {
                    return Some(found);
                }
            }
            None => {}
        }
    }
    None
}

/// Depth-first flattening state
#[derive(Default)]
struct Flattener {
    segments: Vec<Segment>,
    current: String,
}

impl Flattener {
    fn walk(&mut self, nodes: &[Node]) {
        for node in nodes {
            match node {
                Node::Text(text) => {
                    let text = text.trim();
                    if !text.is_empty() {
                        self.current.push_str(text);
                        self.current.push(' ');
                    }
                }
                Node::Element { name, children, .. } => match name.as_str() {
                    skip if should_skip_element(skip) => {}
                    "img" => {
                        self.flush();
                        let alt = node
                            .attr("alt")
                            .map(str::trim)
                            .filter(|alt| !alt.is_empty())
                            .unwrap_or(DEFAULT_IMAGE_ALT);
                        self.segments.push(Segment::image(alt));
                    }
                    "br" => {
                        if self.current.trim().is_empty() {
                            self.current.clear();
                            self.segments.push(Segment::Paragraph(String::new()));
                        } else {
                            self.flush();
                        }
                    }
                    block if is_block_element(block) => {
                        self.flush();
                        self.walk(children);
                        self.flush();
                    }
                    _ => self.walk(children),
                },
                Node::Other => {}
            }
        }
    }

    fn flush(&mut self) {
        let text = normalize_whitespace(&self.current);
        self.current.clear();
        if !text.is_empty() {
            self.segments.push(Segment::Paragraph(text));
        }
    }
}

/// Open-element stack for the lenient tree
#[derive(Default)]
struct TreeBuilder {
    roots: Vec<Node>,
    stack: Vec<(String, Vec<(String, String)>, Vec<Node>)>,
}

impl TreeBuilder {
    fn children_mut(&mut self) -> &mut Vec<Node> {
        match self.stack.last_mut() {
            Some((_, _, children)) => children,
            None => &mut self.roots,
        }
    }

    fn open(&mut self, name: String, attrs: Vec<(String, String)>) {
        // A new block implicitly ends an open paragraph, as in HTML.
        if is_block_element(&name) && self.stack.last().is_some_and(|(top, _, _)| top == "p") {
            self.pop();
        }
        if self.stack.len() >= MAX_DEPTH {
            self.leaf(name, attrs);
            return;
        }
        self.stack.push((name, attrs, Vec::new()));
    }

    fn leaf(&mut self, name: String, attrs: Vec<(String, String)>) {
        self.children_mut().push(Node::Element {
            name,
            attrs,
            children: Vec::new(),
        });
    }

    fn close(&mut self, name: &str) {
        if let Some(pos) = self.stack.iter().rposition(|(open, _, _)| open == name) {
            while self.stack.len() > pos {
                self.pop();
            }
        }
    }

    fn pop(&mut self) {
        if let Some((name, attrs, children)) = self.stack.pop() {
            self.children_mut().push(Node::Element {
                name,
                attrs,
                children,
            });
        }
    }

    fn text(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        let children = self.children_mut();
        if let Some(Node::Text(last)) = children.last_mut() {
            last.push_str(text);
        } else {
            children.push(Node::Text(text.to_string()));
        }
    }

    fn other(&mut self) {
        self.children_mut().push(Node::Other);
    }

    fn finish(mut self) -> Vec<Node> {
        while !self.stack.is_empty() {
            self.pop();
        }
        self.roots
    }
}

fn element_parts(e: &BytesStart<'_>, reader: &Reader<&[u8]>) -> (String, Vec<(String, String)>) {
    let name = lower_name(e.local_name().as_ref());
    let attrs = e
        .html_attributes()
        .flatten()
        .map(|attr| {
            let key = lower_name(attr.key.local_name().as_ref());
            let value = attr
                .decode_and_unescape_value_with(reader.decoder(), resolve_html5_entity)
                .map(Cow::into_owned)
                .unwrap_or_else(|_| String::from_utf8_lossy(&attr.value).into_owned());
            (key, value)
        })
        .collect();
    (name, attrs)
}

/// Escape every `<` that cannot open markup, as HTML reads it as text.
///
/// Comments, CDATA sections, processing instructions and quoted attribute
/// values are copied through untouched.
fn escape_stray_lt(html: &[u8]) -> Cow<'_, [u8]> {
    let stray = html
        .iter()
        .enumerate()
        .any(|(i, &b)| b == b'<' && !html.get(i + 1).is_some_and(|&next| opens_markup(next)));
    if !stray {
        return Cow::Borrowed(html);
    }

    let mut out = Vec::with_capacity(html.len() + 16);
    let mut pos = 0;
    while let Some(offset) = html[pos..].iter().position(|&b| b == b'<') {
        let start = pos + offset;
        out.extend_from_slice(&html[pos..start]);
        match html.get(start + 1) {
            Some(&next) if opens_markup(next) => {
                let end = markup_end(html, start);
                out.extend_from_slice(&html[start..end]);
                pos = end;
            }
            _ => {
                out.extend_from_slice(b"&lt;");
                pos = start + 1;
            }
        }
    }
    out.extend_from_slice(&html[pos..]);
    Cow::Owned(out)
}

fn opens_markup(byte: u8) -> bool {
    byte.is_ascii_alphabetic() || matches!(byte, b'/' | b'!' | b'?')
}

/// Index just past the markup starting at `start`, or the end of input
fn markup_end(html: &[u8], start: usize) -> usize {
    let rest = &html[start..];
    let terminator: &[u8] = if rest.starts_with(b"<!--") {
        b"-->"
    } else if rest.starts_with(b"<![CDATA[") {
        b"]]>"
    } else if rest.starts_with(b"<?") {
        b"?>"
    } else {
        let mut quote = None;
        for (offset, &b) in rest.iter().enumerate().skip(1) {
            match quote {
                Some(q) if b == q => quote = None,
                Some(_) => {}
                None if b == b'"' || b == b'\'' => quote = Some(b),
                None if b == b'>' => return start + offset + 1,
                None => {}
            }
        }
        return html.len();
    };
    rest.windows(terminator.len())
        .position(|window| window == terminator)
        .map_or(html.len(), |found| start + found + terminator.len())
}

fn resolve_entity(e: &BytesRef<'_>) -> Result<String, quick_xml::Error> {
    if let Ok(Some(ch)) = e.resolve_char_ref() {
        return Ok(ch.to_string());
    }
    let name = e.decode()?;
    Ok(match resolve_html5_entity(&name) {
        Some(resolved) => resolved.to_string(),
        None => format!("&{};", name),
    })
}

fn lower_name(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw).to_ascii_lowercase()
}

/// Elements that end the current paragraph before and after their content
fn is_block_element(name: &str) -> bool {
    matches!(
        name,
        "p" | "div" | "h1" | "h2" | "h3" | "h4" | "h5" | "h6" | "br"
    )
}

/// Elements whose content is never visible text
fn should_skip_element(name: &str) -> bool {
    matches!(name, "script" | "style" | "head" | "noscript" | "template")
}

/// HTML elements that never have content or an end tag
fn is_void_element(name: &str) -> bool {
    matches!(
        name,
        "area"
            | "base"
            | "br"
            | "col"
            | "embed"
            | "hr"
            | "img"
            | "input"
            | "link"
            | "meta"
            | "param"
            | "source"
            | "track"
            | "wbr"
    )
}

/// Collapse whitespace runs to single spaces and trim both ends
pub(crate) fn normalize_whitespace(text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    let mut prev_was_space = true; // Start true to trim leading whitespace

    for ch in text.chars() {
        if ch.is_whitespace() {
            if !prev_was_space {
                result.push(' ');
                prev_was_space = true;
            }
        } else {
            result.push(ch);
            prev_was_space = false;
        }
    }

    if result.ends_with(' ') {
        result.pop();
    }
    result
}

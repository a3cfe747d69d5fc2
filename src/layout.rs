//! Text layout engine for chapter pagination
//!
//! Converts structured chapter text into fixed-size pages. Uses greedy line
//! breaking against a caller-supplied [`TextMeasurer`], so the same segments,
//! layout and measurer always produce the same pages. The measurement pass
//! ([`LayoutEngine::page_count`]) and the render pass
//! ([`LayoutEngine::render_page`]) share one pagination routine.

use crate::error::LayoutError;
use crate::extract::{Segment, StructuredText};

/// Height of an image placeholder, in line heights
pub const IMAGE_HEIGHT_LINES: f32 = 2.0;

/// Gap after every paragraph and image, in line heights
pub const PARAGRAPH_GAP_LINES: f32 = 0.3;

/// Height of a blank paragraph, in line heights
pub const BLANK_HEIGHT_LINES: f32 = 0.5;

/// Text length above which a single-page chapter is reported
const LONG_SINGLE_PAGE_CHARS: usize = 1000;

/// Slack for floating point comparisons against the page bottom
const FIT_EPSILON: f32 = 1e-3;

/// Font used for measurement
#[derive(Clone, Debug, PartialEq)]
pub struct FontSpec {
    /// Font size in pixels
    pub size: f32,
    /// CSS font family list
    pub family: String,
}

impl FontSpec {
    /// Create a font spec
    pub fn new(size: f32, family: impl Into<String>) -> Self {
        Self {
            size,
            family: family.into(),
        }
    }

    /// CSS shorthand such as `36px Georgia, serif`
    pub fn css(&self) -> String {
        format!("{}px {}", self.size, self.family)
    }
}

/// Measures the rendered width of a string.
///
/// Implemented for [`MonospaceMetrics`] and for any
/// `Fn(&str, &FontSpec) -> f32` closure.
pub trait TextMeasurer {
    /// Width of `text` in pixels when drawn in `font`.
    fn text_width(&self, text: &str, font: &FontSpec) -> Result<f32, LayoutError>;
}

impl<F> TextMeasurer for F
where
    F: Fn(&str, &FontSpec) -> f32,
{
    fn text_width(&self, text: &str, font: &FontSpec) -> Result<f32, LayoutError> {
        Ok(self(text, font))
    }
}

/// Fixed-advance font metrics
///
/// Every character advances by `advance * font.size` pixels.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MonospaceMetrics {
    /// Character advance as a fraction of the font size
    pub advance: f32,
}

impl Default for MonospaceMetrics {
    fn default() -> Self {
        Self { advance: 0.6 }
    }
}

impl MonospaceMetrics {
    /// Metrics with an explicit per-character advance ratio
    pub fn new(advance: f32) -> Self {
        Self { advance }
    }
}

impl TextMeasurer for MonospaceMetrics {
    fn text_width(&self, text: &str, font: &FontSpec) -> Result<f32, LayoutError> {
        Ok(text.chars().count() as f32 * self.advance * font.size)
    }
}

/// Page geometry and typography
#[derive(Clone, Debug, PartialEq)]
pub struct PageLayout {
    /// Page width in pixels
    pub page_width: f32,
    /// Page height in pixels
    pub page_height: f32,
    /// Left margin in pixels
    pub left_margin: f32,
    /// Right margin in pixels
    pub right_margin: f32,
    /// Top margin in pixels (first line starts here)
    pub top_margin: f32,
    /// Bottom margin in pixels
    pub bottom_margin: f32,
    /// Font size in pixels
    pub font_size: f32,
    /// Line height as a multiple of the font size
    pub line_height_multiplier: f32,
    /// CSS font family list
    pub font_family: String,
}

impl Default for PageLayout {
    /// 1024x1024 canvas, 36px Georgia at 1.3 line height.
    fn default() -> Self {
        Self {
            page_width: 1024.0,
            page_height: 1024.0,
            left_margin: 40.0,
            right_margin: 40.0,
            top_margin: 40.0,
            bottom_margin: 80.0,
            font_size: 36.0,
            line_height_multiplier: 1.3,
            font_family: String::from("Georgia, serif"),
        }
    }
}

impl PageLayout {
    /// Set page size
    pub fn with_page_size(mut self, width: f32, height: f32) -> Self {
        self.page_width = width;
        self.page_height = height;
        self
    }

    /// Set all four margins
    pub fn with_margins(mut self, left: f32, right: f32, top: f32, bottom: f32) -> Self {
        self.left_margin = left;
        self.right_margin = right;
        self.top_margin = top;
        self.bottom_margin = bottom;
        self
    }

    /// Set font size
    pub fn with_font_size(mut self, font_size: f32) -> Self {
        self.font_size = font_size;
        self
    }

    /// Set line height multiplier
    pub fn with_line_height_multiplier(mut self, multiplier: f32) -> Self {
        self.line_height_multiplier = multiplier;
        self
    }

    /// Set font family
    pub fn with_font_family(mut self, family: impl Into<String>) -> Self {
        self.font_family = family.into();
        self
    }

    /// Line height in pixels
    pub fn line_height(&self) -> f32 {
        self.font_size * self.line_height_multiplier
    }

    /// Width available for a line of text
    pub fn available_width(&self) -> f32 {
        self.page_width - self.left_margin - self.right_margin
    }

    /// Lowest y a block may reach
    pub fn max_y(&self) -> f32 {
        self.page_height - self.bottom_margin
    }

    /// Vertical space available on an empty page
    pub fn content_height(&self) -> f32 {
        self.max_y() - self.top_margin
    }

    /// Font used for measurement
    pub fn font(&self) -> FontSpec {
        FontSpec::new(self.font_size, self.font_family.clone())
    }

    /// Reject geometry that leaves no room for text.
    pub fn validate(&self) -> Result<(), LayoutError> {
        let values = [
            self.page_width,
            self.page_height,
            self.left_margin,
            self.right_margin,
            self.top_margin,
            self.bottom_margin,
            self.font_size,
            self.line_height_multiplier,
        ];
        if values.iter().any(|v| !v.is_finite()) {
            return Err(LayoutError::InvalidLayout(
                "layout values must be finite".into(),
            ));
        }
        if self.font_size <= 0.0 || self.line_height_multiplier <= 0.0 {
            return Err(LayoutError::InvalidLayout(format!(
                "line height must be positive (font size {}, multiplier {})",
                self.font_size, self.line_height_multiplier
            )));
        }
        if self.available_width() <= 0.0 {
            return Err(LayoutError::InvalidLayout(format!(
                "no horizontal space: width {} with margins {}+{}",
                self.page_width, self.left_margin, self.right_margin
            )));
        }
        if self.content_height() <= 0.0 {
            return Err(LayoutError::InvalidLayout(format!(
                "no vertical space: height {} with margins {}+{}",
                self.page_height, self.top_margin, self.bottom_margin
            )));
        }
        Ok(())
    }
}

/// A single wrapped line
#[derive(Clone, Debug, PartialEq)]
pub struct Line {
    /// Text of the line
    pub text: String,
    /// Top of the line on the page
    pub y: f32,
}

/// One positioned block on a page
#[derive(Clone, Debug, PartialEq)]
pub enum PageBlock {
    /// Lines of a paragraph (or one slice of a paragraph too tall for a page)
    Paragraph {
        /// Wrapped lines with their positions
        lines: Vec<Line>,
        /// Whether more lines of the same paragraph follow on the next page
        continues: bool,
    },
    /// Image placeholder box
    Image {
        /// Alt text shown in the box
        alt: String,
        /// Top of the box
        y: f32,
        /// Box height
        height: f32,
    },
    /// Vertical space left by a blank paragraph
    Spacer {
        /// Top of the space
        y: f32,
        /// Space height
        height: f32,
    },
}

impl PageBlock {
    /// Plain-text rendering of the block
    pub fn text(&self) -> String {
        match self {
            PageBlock::Paragraph { lines, .. } => lines
                .iter()
                .map(|line| line.text.as_str())
                .collect::<Vec<_>>()
                .join("\n"),
            PageBlock::Image { alt, .. } => format!("[{}]", alt),
            PageBlock::Spacer { .. } => String::new(),
        }
    }

    fn is_spacer(&self) -> bool {
        matches!(self, PageBlock::Spacer { .. })
    }
}

/// A single page of laid-out content
#[derive(Clone, Debug, PartialEq)]
pub struct Page {
    /// Page number (1-indexed)
    pub page_number: usize,
    /// Blocks in top-to-bottom order
    pub blocks: Vec<PageBlock>,
}

impl Page {
    /// Create a new empty page
    pub fn new(page_number: usize) -> Self {
        Self {
            page_number,
            blocks: Vec::new(),
        }
    }

    /// Check if page has no blocks
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// All text lines on the page
    pub fn lines(&self) -> impl Iterator<Item = &Line> {
        self.blocks.iter().flat_map(|block| match block {
            PageBlock::Paragraph { lines, .. } => lines.as_slice(),
            _ => &[][..],
        })
    }

    /// Get number of text lines on page
    pub fn line_count(&self) -> usize {
        self.lines().count()
    }

    /// Page as plain text: blocks separated by a blank line
    pub fn text(&self) -> String {
        self.blocks
            .iter()
            .map(PageBlock::text)
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

/// Host-side drawing of a laid-out page. The core never draws.
pub trait DocumentRenderer {
    /// Draw `page` using the geometry it was laid out with.
    fn render_page(&mut self, page: &Page, layout: &PageLayout);
}

/// Paginate `text` with the given layout and measurer.
pub fn paginate<M>(
    text: &StructuredText,
    layout: &PageLayout,
    measurer: &M,
) -> Result<Vec<Page>, LayoutError>
where
    M: TextMeasurer + ?Sized,
{
    layout.validate()?;

    let fallback;
    let text = if text.is_blank() {
        fallback = StructuredText::fallback();
        &fallback
    } else {
        text
    };

    let mut paginator = Paginator::new(layout, measurer);
    for segment in text {
        paginator.place(segment)?;
    }
    let pages = paginator.finish();

    let chars: usize = text
        .iter()
        .map(|segment| match segment {
            Segment::Paragraph(p) => p.len(),
            Segment::Image { alt } => alt.len(),
        })
        .sum();
    if pages.len() == 1 && chars > LONG_SINGLE_PAGE_CHARS {
        log::debug!(
            "[LAYOUT] {} chars of text fit on a single page; check the layout",
            chars
        );
    }
    log::debug!(
        "[LAYOUT] Paginated {} segments into {} pages",
        text.len(),
        pages.len()
    );
    Ok(pages)
}

/// Greedy word wrap of one paragraph against the layout's line width.
pub fn wrap_paragraph<M>(
    text: &str,
    layout: &PageLayout,
    measurer: &M,
) -> Result<Vec<String>, LayoutError>
where
    M: TextMeasurer + ?Sized,
{
    let font = layout.font();
    wrap_words(text, layout.available_width(), &font, measurer)
}

fn wrap_words<M>(
    text: &str,
    max_width: f32,
    font: &FontSpec,
    measurer: &M,
) -> Result<Vec<String>, LayoutError>
where
    M: TextMeasurer + ?Sized,
{
    let mut lines = Vec::new();
    let mut line = String::new();

    for word in text.split_whitespace() {
        let candidate = if line.is_empty() {
            word.to_string()
        } else {
            format!("{} {}", line, word)
        };
        let width = checked_width(measurer, &candidate, font)?;
        if width > max_width && !line.is_empty() {
            lines.push(core::mem::take(&mut line));
            line.push_str(word);
        } else {
            line = candidate;
        }
    }
    if !line.is_empty() {
        lines.push(line);
    }
    Ok(lines)
}

fn checked_width<M>(measurer: &M, text: &str, font: &FontSpec) -> Result<f32, LayoutError>
where
    M: TextMeasurer + ?Sized,
{
    let width = measurer.text_width(text, font)?;
    if !width.is_finite() || width < 0.0 {
        return Err(LayoutError::InvalidMeasurement {
            text: text.to_string(),
            width,
        });
    }
    Ok(width)
}

/// Pagination state for one run
struct Paginator<'a, M: ?Sized> {
    layout: &'a PageLayout,
    measurer: &'a M,
    font: FontSpec,
    line_height: f32,
    max_y: f32,
    y: f32,
    blocks: Vec<PageBlock>,
    pages: Vec<Page>,
}

impl<'a, M> Paginator<'a, M>
where
    M: TextMeasurer + ?Sized,
{
    fn new(layout: &'a PageLayout, measurer: &'a M) -> Self {
        Self {
            layout,
            measurer,
            font: layout.font(),
            line_height: layout.line_height(),
            max_y: layout.max_y(),
            y: layout.top_margin,
            blocks: Vec::new(),
            pages: Vec::new(),
        }
    }

    fn place(&mut self, segment: &Segment) -> Result<(), LayoutError> {
        let lh = self.line_height;
        match segment {
            Segment::Paragraph(text) if text.trim().is_empty() => {
                let height = BLANK_HEIGHT_LINES * lh;
                self.make_room(height);
                self.blocks.push(PageBlock::Spacer { y: self.y, height });
                self.y += height;
            }
            Segment::Image { alt } => {
                self.make_room((IMAGE_HEIGHT_LINES + PARAGRAPH_GAP_LINES) * lh);
                self.blocks.push(PageBlock::Image {
                    alt: alt.clone(),
                    y: self.y,
                    height: IMAGE_HEIGHT_LINES * lh,
                });
                self.y += (IMAGE_HEIGHT_LINES + PARAGRAPH_GAP_LINES) * lh;
            }
            Segment::Paragraph(text) => {
                let lines = wrap_words(
                    text,
                    self.layout.available_width(),
                    &self.font,
                    self.measurer,
                )?;
                let height = lines.len() as f32 * lh + PARAGRAPH_GAP_LINES * lh;
                if height > self.layout.content_height() + FIT_EPSILON {
                    self.place_split(lines);
                } else {
                    self.make_room(height);
                    self.push_lines(lines, false);
                }
                self.y += PARAGRAPH_GAP_LINES * lh;
            }
        }
        Ok(())
    }

    /// Start a new page when `height` would overflow the current one.
    fn make_room(&mut self, height: f32) {
        if self.y + height > self.max_y + FIT_EPSILON && !self.blocks.is_empty() {
            self.flush_page();
        }
    }

    /// Spread a paragraph taller than a full page over several pages.
    fn place_split(&mut self, lines: Vec<String>) {
        let mut remaining = lines.into_iter().peekable();
        while remaining.peek().is_some() {
            let room = ((self.max_y - self.y + FIT_EPSILON) / self.line_height).floor();
            let room = if room.is_finite() && room > 0.0 {
                room as usize
            } else {
                0
            };
            if room == 0 && !self.blocks.is_empty() {
                self.flush_page();
                continue;
            }
            let slice: Vec<String> = remaining.by_ref().take(room.max(1)).collect();
            let continues = remaining.peek().is_some();
            self.push_lines(slice, continues);
            if continues {
                self.flush_page();
            }
        }
    }

    fn push_lines(&mut self, lines: Vec<String>, continues: bool) {
        let mut placed = Vec::with_capacity(lines.len());
        for text in lines {
            placed.push(Line { text, y: self.y });
            self.y += self.line_height;
        }
        self.blocks.push(PageBlock::Paragraph {
            lines: placed,
            continues,
        });
    }

    /// Emit the pending page. A page holding only spacers is discarded.
    fn flush_page(&mut self) {
        if !self.blocks.iter().any(|block| !block.is_spacer()) {
            self.blocks.clear();
            self.y = self.layout.top_margin;
            return;
        }
        let page_number = self.pages.len() + 1;
        self.pages.push(Page {
            page_number,
            blocks: core::mem::take(&mut self.blocks),
        });
        self.y = self.layout.top_margin;
    }

    fn finish(mut self) -> Vec<Page> {
        self.flush_page();
        self.pages
    }
}

/// Paginator bound to a layout and a measurer
#[derive(Clone, Debug)]
pub struct LayoutEngine<M> {
    layout: PageLayout,
    measurer: M,
}

impl LayoutEngine<MonospaceMetrics> {
    /// Default page layout with monospace metrics
    pub fn with_defaults() -> Self {
        Self::new(PageLayout::default(), MonospaceMetrics::default())
    }
}

impl<M: TextMeasurer> LayoutEngine<M> {
    /// Create a layout engine
    pub fn new(layout: PageLayout, measurer: M) -> Self {
        Self { layout, measurer }
    }

    /// Active layout
    pub fn layout(&self) -> &PageLayout {
        &self.layout
    }

    /// Active measurer
    pub fn measurer(&self) -> &M {
        &self.measurer
    }

    /// Replace the layout, keeping the measurer
    pub fn with_layout(mut self, layout: PageLayout) -> Self {
        self.layout = layout;
        self
    }

    /// Lay out every segment into pages.
    pub fn paginate(&self, text: &StructuredText) -> Result<Vec<Page>, LayoutError> {
        paginate(text, &self.layout, &self.measurer)
    }

    /// Number of pages `text` occupies.
    pub fn page_count(&self, text: &StructuredText) -> Result<usize, LayoutError> {
        Ok(self.paginate(text)?.len())
    }

    /// Page at zero-based `index`, or `None` past the last page.
    pub fn render_page(
        &self,
        text: &StructuredText,
        index: usize,
    ) -> Result<Option<Page>, LayoutError> {
        Ok(self.paginate(text)?.into_iter().nth(index))
    }

    /// Wrap one paragraph with this engine's layout.
    pub fn wrap_paragraph(&self, text: &str) -> Result<Vec<String>, LayoutError> {
        wrap_paragraph(text, &self.layout, &self.measurer)
    }

    /// Measure a string in the layout's font.
    pub fn measure_text(&self, text: &str) -> Result<f32, LayoutError> {
        checked_width(&self.measurer, text, &self.layout.font())
    }

    /// Paginate and hand every page to `renderer`, returning the page count.
    pub fn render_all<R>(&self, text: &StructuredText, renderer: &mut R) -> Result<usize, LayoutError>
    where
        R: DocumentRenderer + ?Sized,
    {
        let pages = self.paginate(text)?;
        for page in &pages {
            renderer.render_page(page, &self.layout);
        }
        Ok(pages.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::FALLBACK_TEXT;

    /// 100x100 page, no margins, 10px lines, 10px per character.
    fn small_layout() -> PageLayout {
        PageLayout::default()
            .with_page_size(100.0, 100.0)
            .with_margins(0.0, 0.0, 0.0, 0.0)
            .with_font_size(10.0)
            .with_line_height_multiplier(1.0)
    }

    fn ten_px(text: &str, _font: &FontSpec) -> f32 {
        text.chars().count() as f32 * 10.0
    }

    fn para(text: &str) -> Segment {
        Segment::Paragraph(text.to_string())
    }

    fn words(n: usize) -> String {
        vec!["a"; n].join(" ")
    }

    #[test]
    fn test_default_layout() {
        let layout = PageLayout::default();
        assert_eq!(layout.line_height(), 36.0 * 1.3);
        assert_eq!(layout.available_width(), 944.0);
        assert_eq!(layout.max_y(), 944.0);
        assert_eq!(layout.content_height(), 904.0);
        assert_eq!(layout.font().css(), "36px Georgia, serif");
        assert!(layout.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_no_width() {
        let layout = PageLayout::default().with_margins(600.0, 600.0, 40.0, 80.0);
        assert!(matches!(
            layout.validate(),
            Err(LayoutError::InvalidLayout(_))
        ));
    }

    #[test]
    fn test_validate_rejects_nan() {
        let layout = PageLayout::default().with_font_size(f32::NAN);
        assert!(layout.validate().is_err());
    }

    #[test]
    fn test_monospace_metrics() {
        let metrics = MonospaceMetrics::new(0.5);
        let font = FontSpec::new(20.0, "monospace");
        assert_eq!(metrics.text_width("hello", &font).unwrap(), 50.0);
    }

    #[test]
    fn test_wrap_measures_whole_candidate_line() {
        let layout = small_layout();
        let lines = wrap_paragraph("aaaa bbbb cccc", &layout, &ten_px).unwrap();
        assert_eq!(lines, vec!["aaaa bbbb", "cccc"]);
    }

    #[test]
    fn test_wrap_overlong_word_stays_alone() {
        let layout = small_layout();
        let lines = wrap_paragraph("hi supercalifragilistic yo", &layout, &ten_px).unwrap();
        assert_eq!(lines, vec!["hi", "supercalifragilistic", "yo"]);
    }

    #[test]
    fn test_wrap_empty_text() {
        let layout = small_layout();
        assert!(wrap_paragraph("   ", &layout, &ten_px).unwrap().is_empty());
    }

    #[test]
    fn test_single_paragraph_single_page() {
        let text = StructuredText::new(vec![para("hello world")]);
        let pages = paginate(&text, &small_layout(), &ten_px).unwrap();
        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0].page_number, 1);
        assert_eq!(pages[0].text(), "hello\nworld");
        assert_eq!(pages[0].line_count(), 2);
    }

    #[test]
    fn test_line_positions_advance_by_line_height() {
        let text = StructuredText::new(vec![para("aaaa bbbb cccc dddd")]);
        let layout = small_layout().with_margins(0.0, 0.0, 5.0, 0.0);
        let pages = paginate(&text, &layout, &ten_px).unwrap();
        let ys: Vec<f32> = pages[0].lines().map(|l| l.y).collect();
        assert_eq!(ys, vec![5.0, 15.0]);
    }

    #[test]
    fn test_page_text_joins_blocks() {
        let text = StructuredText::new(vec![
            para("aaaa bbbb cccc"),
            Segment::image("map"),
            para(""),
            para("end"),
        ]);
        let pages = paginate(&text, &small_layout(), &ten_px).unwrap();
        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0].text(), "aaaa bbbb\ncccc\n\n[map]\n\n\n\nend");
    }

    #[test]
    fn test_images_are_never_split() {
        // Each image costs 23px; four fit in 100px, the fifth does not.
        let text = StructuredText::new((0..5).map(|i| Segment::image(format!("img{}", i))).collect());
        let pages = paginate(&text, &small_layout(), &ten_px).unwrap();
        assert_eq!(pages.len(), 2);
        assert_eq!(pages[0].blocks.len(), 4);
        assert_eq!(pages[1].blocks.len(), 1);
        assert!(matches!(&pages[1].blocks[0], PageBlock::Image { alt, y, .. } if alt == "img4" && *y == 0.0));
    }

    #[test]
    fn test_paragraph_moves_to_next_page_when_it_overflows() {
        // 4 lines (43px) + 4 lines (43px) fit; the third 4-line paragraph does not.
        let four_lines = words(20);
        let text = StructuredText::new(vec![
            para(&four_lines),
            para(&four_lines),
            para(&four_lines),
        ]);
        let pages = paginate(&text, &small_layout(), &ten_px).unwrap();
        assert_eq!(pages.len(), 2);
        assert_eq!(pages[0].line_count(), 8);
        assert_eq!(pages[1].line_count(), 4);
    }

    #[test]
    fn test_oversize_paragraph_split_across_pages() {
        // 60 words, 5 per line: 12 lines, taller than the 100px page.
        let text = StructuredText::new(vec![para(&words(60))]);
        let pages = paginate(&text, &small_layout(), &ten_px).unwrap();
        assert_eq!(pages.len(), 2);
        assert_eq!(pages[0].line_count(), 10);
        assert_eq!(pages[1].line_count(), 2);
        assert!(matches!(
            pages[0].blocks[0],
            PageBlock::Paragraph { continues: true, .. }
        ));
        assert!(matches!(
            pages[1].blocks[0],
            PageBlock::Paragraph { continues: false, .. }
        ));
    }

    #[test]
    fn test_oversize_paragraph_fills_current_page_first() {
        let text = StructuredText::new(vec![para("intro"), para(&words(60))]);
        let pages = paginate(&text, &small_layout(), &ten_px).unwrap();
        // "intro" uses 13px, leaving room for 8 lines.
        assert_eq!(pages.len(), 2);
        assert_eq!(pages[0].line_count(), 9);
        assert_eq!(pages[1].line_count(), 4);
    }

    #[test]
    fn test_tiny_page_places_one_line_per_page() {
        let layout = small_layout().with_page_size(100.0, 5.0);
        let text = StructuredText::new(vec![para("aaaa bbbb cccc")]);
        let pages = paginate(&text, &layout, &ten_px).unwrap();
        assert_eq!(pages.len(), 2);
        assert!(pages.iter().all(|p| p.line_count() == 1));
    }

    #[test]
    fn test_empty_text_yields_fallback_page() {
        let pages = paginate(&StructuredText::default(), &small_layout(), &ten_px).unwrap();
        assert_eq!(pages.len(), 1);
        assert!(pages[0].text().contains("No content"));

        let blank = StructuredText::new(vec![para(""), para("  ")]);
        let layout = PageLayout::default();
        let pages = paginate(&blank, &layout, &MonospaceMetrics::default()).unwrap();
        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0].text(), FALLBACK_TEXT);
    }

    #[test]
    fn test_invalid_measurement_is_error() {
        let text = StructuredText::new(vec![para("a b")]);
        let bad = |_: &str, _: &FontSpec| f32::NAN;
        let err = paginate(&text, &small_layout(), &bad).unwrap_err();
        assert!(matches!(err, LayoutError::InvalidMeasurement { .. }));

        let negative = |_: &str, _: &FontSpec| -1.0;
        assert!(paginate(&text, &small_layout(), &negative).is_err());
    }

    #[test]
    fn test_failing_measurer_propagates() {
        struct Broken;
        impl TextMeasurer for Broken {
            fn text_width(&self, _: &str, _: &FontSpec) -> Result<f32, LayoutError> {
                Err(LayoutError::Measurement("context lost".into()))
            }
        }
        let text = StructuredText::new(vec![para("word")]);
        let err = paginate(&text, &small_layout(), &Broken).unwrap_err();
        assert_eq!(err, LayoutError::Measurement("context lost".into()));
    }

    #[test]
    fn test_engine_passes_agree() {
        let engine = LayoutEngine::new(small_layout(), ten_px);
        let text = StructuredText::new(vec![para(&words(60)), Segment::image("x"), para("tail")]);
        let pages = engine.paginate(&text).unwrap();
        assert_eq!(engine.page_count(&text).unwrap(), pages.len());
        for (i, page) in pages.iter().enumerate() {
            assert_eq!(engine.render_page(&text, i).unwrap().as_ref(), Some(page));
        }
        assert_eq!(engine.render_page(&text, pages.len()).unwrap(), None);
    }

    #[test]
    fn test_page_numbers_are_sequential() {
        let engine = LayoutEngine::new(small_layout(), ten_px);
        let text = StructuredText::new((0..10).map(|_| para(&words(20))).collect());
        let pages = engine.paginate(&text).unwrap();
        for (i, page) in pages.iter().enumerate() {
            assert_eq!(page.page_number, i + 1);
        }
    }

    #[test]
    fn test_render_all_drives_renderer() {
        struct Recorder(Vec<usize>);
        impl DocumentRenderer for Recorder {
            fn render_page(&mut self, page: &Page, _layout: &PageLayout) {
                self.0.push(page.page_number);
            }
        }
        let engine = LayoutEngine::new(small_layout(), ten_px);
        let text = StructuredText::new(vec![para(&words(60))]);
        let mut recorder = Recorder(Vec::new());
        let count = engine.render_all(&text, &mut recorder).unwrap();
        assert_eq!(count, 2);
        assert_eq!(recorder.0, vec![1, 2]);
    }

    #[test]
    fn test_with_defaults_monospace() {
        let engine = LayoutEngine::with_defaults();
        // 0.6 * 36 = 21.6px per char
        let width = engine.measure_text("abcde").unwrap();
        assert!((width - 108.0).abs() < 1e-3);
    }
}

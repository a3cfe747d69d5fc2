//! xrbook -- EPUB ingestion and deterministic pagination for an XR reader
//!
//! Opens EPUB archives held in memory, resolves their metadata, manifest and
//! reading order, flattens chapters into paragraphs and image placeholders,
//! and lays that text out into fixed-size pages. Drawing, text measurement
//! and progress storage are supplied by the host through small traits.
//!
//! # Features
//!
//! - `async` -- tokio helpers for background loading and chapter pipelines
//! - `persist` -- serde support and a JSON-file progress store
//! - `cli` -- the `xrbook` inspection binary
//!
//! # Example
//!
//! ```no_run
//! use xrbook::{LayoutEngine, LoadedBook};
//!
//! let book = LoadedBook::open("book.epub")?;
//! let engine = LayoutEngine::with_defaults();
//! let pages = engine.paginate(&book.chapter_text(0)?)?;
//! println!("{} has {} pages in chapter 1", book.title(), pages.len());
//! # Ok::<(), xrbook::EpubError>(())
//! ```

#![warn(missing_docs)]
#![deny(clippy::large_enum_variant, clippy::large_stack_arrays, clippy::redundant_clone)]
#![warn(
    clippy::box_collection,
    clippy::needless_collect,
    clippy::map_clone,
    clippy::implicit_clone,
    clippy::inefficient_to_string
)]

pub mod book;
pub mod error;
pub mod extract;
pub mod layout;
pub mod metadata;
pub mod progress;
pub mod spine;
pub mod zip;

#[cfg(feature = "async")]
pub mod async_api;

// Re-export key types for convenience
#[cfg(feature = "async")]
pub use async_api::{
    chapter_bytes_async, cover_image_async, load_book_async, open_book_file_async,
    spawn_book_load, BookLoad, ChapterPipeline,
};
pub use book::{
    load_book, BookBuilder, BookOptions, ChapterRef, CoverImage, LoadedBook, Resource,
    ValidationMode,
};
pub use error::{EpubError, LayoutError, ZipError, ZipErrorKind};
pub use extract::{extract_structured_text, Segment, StructuredText};
pub use layout::{
    paginate, wrap_paragraph, DocumentRenderer, FontSpec, LayoutEngine, Line, MonospaceMetrics,
    Page, PageBlock, PageLayout, TextMeasurer,
};
pub use metadata::{Manifest, ManifestEntry, PackageMetadata};
#[cfg(feature = "persist")]
pub use progress::JsonFileProgressStore;
pub use progress::{MemoryProgressStore, ProgressRecord, ProgressStore};
pub use spine::{Spine, SpineItem};
pub use zip::{Archive, ZipLimits};

//! Optional async helpers for loading books and paginating chapters.
//!
//! This module is available with the `async` feature. Parsing and layout are
//! CPU-bound, so they run on tokio's blocking pool.

use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::sync::{oneshot, watch};
use tokio::task::JoinError;

use crate::book::{BookOptions, CoverImage, LoadedBook};
use crate::error::EpubError;
use crate::extract::extract_structured_text;
use crate::layout::{LayoutEngine, Page, TextMeasurer};

fn join_error(err: JoinError) -> EpubError {
    EpubError::Io(format!("background task failed: {}", err))
}

/// Parse an in-memory EPUB on the blocking pool.
pub async fn load_book_async(bytes: Vec<u8>) -> Result<LoadedBook, EpubError> {
    load_book_async_with_options(bytes, BookOptions::default()).await
}

/// Parse an in-memory EPUB on the blocking pool with options.
pub async fn load_book_async_with_options(
    bytes: Vec<u8>,
    options: BookOptions,
) -> Result<LoadedBook, EpubError> {
    tokio::task::spawn_blocking(move || LoadedBook::load_with_options(bytes, options))
        .await
        .map_err(join_error)?
}

/// Read an EPUB file asynchronously and parse it.
pub async fn open_book_file_async<P: AsRef<Path>>(path: P) -> Result<LoadedBook, EpubError> {
    open_book_file_async_with_options(path, BookOptions::default()).await
}

/// Read an EPUB file asynchronously and parse it with options.
pub async fn open_book_file_async_with_options<P: AsRef<Path>>(
    path: P,
    options: BookOptions,
) -> Result<LoadedBook, EpubError> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| EpubError::Io(e.to_string()))?;
    load_book_async_with_options(bytes, options).await
}

/// Read a chapter's bytes on the blocking pool.
pub async fn chapter_bytes_async(book: Arc<LoadedBook>, index: i64) -> Result<Vec<u8>, EpubError> {
    tokio::task::spawn_blocking(move || book.chapter_bytes(index))
        .await
        .map_err(join_error)?
}

/// Pick and read the cover image on the blocking pool.
pub async fn cover_image_async(book: Arc<LoadedBook>) -> Result<Option<CoverImage>, EpubError> {
    tokio::task::spawn_blocking(move || book.cover_image())
        .await
        .map_err(join_error)?
}

/// Completion signal for a background load started by [`spawn_book_load`].
///
/// Resolves exactly once with the load result.
#[derive(Debug)]
pub struct BookLoad {
    rx: oneshot::Receiver<Result<LoadedBook, EpubError>>,
}

impl BookLoad {
    /// Take the result if the load has finished, without waiting.
    pub fn try_take(&mut self) -> Option<Result<LoadedBook, EpubError>> {
        match self.rx.try_recv() {
            Ok(result) => Some(result),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => Some(Err(load_dropped())),
        }
    }
}

fn load_dropped() -> EpubError {
    EpubError::Io("book load ended without a result".to_string())
}

impl Future for BookLoad {
    type Output = Result<LoadedBook, EpubError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|received| received.unwrap_or_else(|_| Err(load_dropped())))
    }
}

/// Start parsing `bytes` in the background.
///
/// Must be called from within a tokio runtime.
pub fn spawn_book_load(bytes: Vec<u8>) -> BookLoad {
    spawn_book_load_with_options(bytes, BookOptions::default())
}

/// Start parsing `bytes` in the background with options.
pub fn spawn_book_load_with_options(bytes: Vec<u8>, options: BookOptions) -> BookLoad {
    let (tx, rx) = oneshot::channel();
    tokio::task::spawn_blocking(move || {
        let result = LoadedBook::load_with_options(bytes, options);
        if tx.send(result).is_err() {
            log::debug!("[ASYNC] Book load finished after its receiver was dropped");
        }
    });
    BookLoad { rx }
}

/// Chapter loader where each new request supersedes the previous ones.
///
/// Jumping quickly between chapters starts a new request per jump; only the
/// most recent one delivers pages. Older requests resolve to
/// [`EpubError::Superseded`] as soon as they are overtaken.
#[derive(Debug)]
pub struct ChapterPipeline<M> {
    engine: Arc<LayoutEngine<M>>,
    generation: watch::Sender<u64>,
}

impl<M> ChapterPipeline<M>
where
    M: TextMeasurer + Send + Sync + 'static,
{
    /// Create a pipeline paginating with `engine`.
    pub fn new(engine: LayoutEngine<M>) -> Self {
        let (generation, _) = watch::channel(0);
        Self {
            engine: Arc::new(engine),
            generation,
        }
    }

    /// Layout engine shared by all requests.
    pub fn engine(&self) -> &LayoutEngine<M> {
        &self.engine
    }

    /// Generation of the most recent request.
    pub fn current_generation(&self) -> u64 {
        *self.generation.borrow()
    }

    /// Invalidate any in-flight request without starting a new one.
    pub fn cancel(&self) {
        self.generation.send_modify(|generation| *generation += 1);
    }

    /// Extract and paginate chapter `index`.
    pub async fn request(&self, book: Arc<LoadedBook>, index: i64) -> Result<Vec<Page>, EpubError> {
        let mut mine = 0;
        self.generation.send_modify(|generation| {
            *generation += 1;
            mine = *generation;
        });
        let mut newer = self.generation.subscribe();

        let engine = Arc::clone(&self.engine);
        let work = tokio::task::spawn_blocking(move || -> Result<Vec<Page>, EpubError> {
            let bytes = book.chapter_bytes(index)?;
            let text = extract_structured_text(&bytes);
            Ok(engine.paginate(&text)?)
        });

        let pages = tokio::select! {
            joined = work => joined.map_err(join_error)??,
            _ = superseded(&mut newer, mine) => return Err(EpubError::Superseded),
        };

        if *newer.borrow() != mine {
            return Err(EpubError::Superseded);
        }
        log::debug!("[ASYNC] Chapter {} ready with {} pages", index, pages.len());
        Ok(pages)
    }
}

async fn superseded(rx: &mut watch::Receiver<u64>, mine: u64) {
    loop {
        if *rx.borrow_and_update() != mine {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

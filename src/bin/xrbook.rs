use std::env;
use std::process::ExitCode;

use serde_json::{json, Value};
use xrbook::{
    DocumentRenderer, EpubError, LayoutEngine, LoadedBook, MonospaceMetrics, Page, PageBlock,
    PageLayout,
};

fn main() -> ExitCode {
    match run(env::args().collect()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(msg) => {
            eprintln!("error: {}", msg);
            ExitCode::FAILURE
        }
    }
}

fn run(args: Vec<String>) -> Result<(), String> {
    let mut rest = args.into_iter().skip(1).collect::<Vec<_>>();
    let pretty = pop_flag(&mut rest, "--pretty");
    let strict = pop_flag(&mut rest, "--strict");

    if rest.is_empty() || rest[0] == "--help" || rest[0] == "-h" {
        print_help();
        return Ok(());
    }

    let cmd = rest.remove(0);
    let output = match cmd.as_str() {
        "info" => {
            let path = first_arg(&rest, "info requires <epub_path>")?;
            let book = open(&path, strict)?;
            let cover = book.cover_image().map_err(display_err)?;
            json!({
                "epub": path,
                "metadata": book.metadata(),
                "chapter_count": book.chapter_count(),
                "cover": cover.map(|c| json!({
                    "id": c.id,
                    "path": c.path,
                    "media_type": c.media_type,
                    "size": c.data.len(),
                })),
            })
        }
        "chapters" => {
            let path = first_arg(&rest, "chapters requires <epub_path>")?;
            let book = open(&path, strict)?;
            let titles = book.chapter_titles();
            let chapters = book
                .chapters()
                .map(|chapter| {
                    let title = titles.get(chapter.index).cloned();
                    json!({
                        "index": chapter.index,
                        "idref": chapter.idref,
                        "href": chapter.href,
                        "media_type": chapter.media_type,
                        "title": title,
                    })
                })
                .collect::<Vec<_>>();
            json!({
                "epub": path,
                "count": chapters.len(),
                "chapters": chapters,
            })
        }
        "text" => {
            let raw = pop_flag(&mut rest, "--raw");
            let (path, index) = parse_chapter_args(&rest, "text")?;
            let book = open(&path, strict)?;
            let text = book.chapter_text(index).map_err(display_err)?;
            if raw {
                for segment in &text {
                    match segment {
                        xrbook::Segment::Paragraph(p) => println!("{}\n", p),
                        xrbook::Segment::Image { alt } => println!("[{}]\n", alt),
                    }
                }
                return Ok(());
            }
            json!({
                "epub": path,
                "index": index,
                "segments": text,
            })
        }
        "paginate" => {
            let mut args = rest;
            let font_size = pop_value(&mut args, "--font-size")?;
            let width = pop_value(&mut args, "--width")?;
            let height = pop_value(&mut args, "--height")?;
            let (path, index) = parse_chapter_args(&args, "paginate")?;

            let mut layout = PageLayout::default();
            if let Some(size) = font_size {
                layout = layout.with_font_size(size);
            }
            if width.is_some() || height.is_some() {
                let width = width.unwrap_or(layout.page_width);
                let height = height.unwrap_or(layout.page_height);
                layout = layout.with_page_size(width, height);
            }

            let book = open(&path, strict)?;
            let text = book.chapter_text(index).map_err(display_err)?;
            let engine = LayoutEngine::new(layout, MonospaceMetrics::default());
            let mut collector = JsonPages::default();
            let count = engine
                .render_all(&text, &mut collector)
                .map_err(|e| e.to_string())?;
            json!({
                "epub": path,
                "index": index,
                "page_count": count,
                "pages": collector.pages,
            })
        }
        other => return Err(format!("unknown command '{}' (see --help)", other)),
    };

    let rendered = if pretty {
        serde_json::to_string_pretty(&output)
    } else {
        serde_json::to_string(&output)
    }
    .map_err(|e| e.to_string())?;
    println!("{}", rendered);
    Ok(())
}

/// Renderer that records each page as JSON instead of drawing it.
#[derive(Default)]
struct JsonPages {
    pages: Vec<Value>,
}

impl DocumentRenderer for JsonPages {
    fn render_page(&mut self, page: &Page, _layout: &PageLayout) {
        let images = page
            .blocks
            .iter()
            .filter_map(|block| match block {
                PageBlock::Image { alt, y, .. } => Some(json!({ "alt": alt, "y": y })),
                _ => None,
            })
            .collect::<Vec<_>>();
        self.pages.push(json!({
            "page_number": page.page_number,
            "lines": page.line_count(),
            "images": images,
            "text": page.text(),
        }));
    }
}

fn open(path: &str, strict: bool) -> Result<LoadedBook, String> {
    let builder = if strict {
        LoadedBook::builder().strict()
    } else {
        LoadedBook::builder()
    };
    builder.open(path).map_err(display_err)
}

fn parse_chapter_args(args: &[String], command: &str) -> Result<(String, i64), String> {
    let path = first_arg(args, &format!("{} requires <epub_path> <index>", command))?;
    let value = args
        .get(1)
        .ok_or_else(|| format!("{} requires a chapter index", command))?;
    let index = value
        .parse::<i64>()
        .map_err(|_| format!("invalid chapter index '{}'", value))?;
    Ok((path, index))
}

fn first_arg(args: &[String], msg: &str) -> Result<String, String> {
    args.first().cloned().ok_or_else(|| msg.to_string())
}

fn pop_flag(args: &mut Vec<String>, flag: &str) -> bool {
    if let Some(pos) = args.iter().position(|a| a == flag) {
        args.remove(pos);
        true
    } else {
        false
    }
}

fn pop_value(args: &mut Vec<String>, flag: &str) -> Result<Option<f32>, String> {
    let Some(pos) = args.iter().position(|a| a == flag) else {
        return Ok(None);
    };
    if pos + 1 >= args.len() {
        return Err(format!("{} requires a value", flag));
    }
    let value = args.remove(pos + 1);
    args.remove(pos);
    value
        .parse::<f32>()
        .map(Some)
        .map_err(|_| format!("invalid {} value '{}'", flag, value))
}

fn display_err(err: EpubError) -> String {
    err.to_string()
}

fn print_help() {
    let help = r#"xrbook - inspect and paginate EPUB files

USAGE:
  xrbook [--pretty] [--strict] <command> [args...]

COMMANDS:
  info <epub_path>
  chapters <epub_path>
  text <epub_path> <index> [--raw]
  paginate <epub_path> <index> [--font-size N] [--width W] [--height H]

NOTES:
  - Output is JSON by default.
  - `text --raw` prints paragraphs and [image] placeholders as plain text.
  - `paginate` measures with fixed-advance monospace metrics.
"#;
    println!("{}", help);
}

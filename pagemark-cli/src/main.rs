use std::fs;
use std::io::{self, BufRead, Write};
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use directories::ProjectDirs;
use pagemark_core::{
    document_key, markups_on_page, BackendKind, Bounds, EditorConfig, FileViewStateStore,
    LinkedContext, LinkedType, Markup, MarkupKind, PixelPoint, PromptKind, PromptRequest,
    QueuedPrompt, ScopeResolution, TextPrompt, ToolMode,
};
use pagemark_http::HttpPersistence;
use pagemark_render::{
    DocumentView, Editor, EditorDeps, EngineProvider, GestureOutcome, OverlayBackend, PageCache,
    PointerEvent, RenderBackend, RenderingEngine,
};
use serde::Deserialize;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{prelude::*, EnvFilter};
use url::Url;

#[derive(Debug, Parser)]
#[command(
    name = "pagemark",
    version,
    about = "Review and annotate documents stored on a pagemark server"
)]
struct Args {
    /// Base url of the document service
    #[arg(long, global = true, default_value = "http://localhost:8000")]
    server: Url,

    /// Id of the document to open
    #[arg(short, long, global = true)]
    document: Option<u64>,

    /// Kind of entity the markups belong to (project, area, task)
    #[arg(long, global = true, requires = "linked_id")]
    linked_type: Option<LinkedType>,

    /// Id of the entity the markups belong to
    #[arg(long, global = true, requires = "linked_type")]
    linked_id: Option<i64>,

    /// Editor config file (TOML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Render backend to draw markups with (overlay, canvas)
    #[arg(long, global = true)]
    backend: Option<BackendKind>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List the markups stored for the scope
    Show {
        /// Print the raw markup records as JSON
        #[arg(long)]
        json: bool,
    },
    /// List the scopes this document is linked to
    Scopes,
    /// List stored markup versions
    History,
    /// Restore a stored markup version
    Restore { version: u64 },
    /// Replace the scope's markups with the records in a JSON file
    Import { file: PathBuf },
    /// Save pending markups and flatten them into the document
    Flatten,
    /// Write page rasters and markup overlays to a directory
    Render {
        out_dir: PathBuf,
        /// Pages to export, numbered from 1 (`3` or `2..5`)
        #[arg(long, value_parser = parse_pages)]
        pages: Option<RangeInclusive<usize>>,
        /// Zoom scale to render at; remembered for the document
        #[arg(long)]
        scale: Option<f64>,
    },
    /// Drop a comment on a page
    Comment {
        /// Page number, starting at 1
        #[arg(long)]
        page: usize,
        /// Horizontal position as a fraction of the page width
        #[arg(long)]
        x: f64,
        /// Vertical position as a fraction of the page height
        #[arg(long)]
        y: f64,
        /// Comment text; asked for on stdin when omitted
        #[arg(long)]
        text: Option<String>,
    },
}

/// Reads prompt answers from stdin. End of input cancels.
struct StdinPrompt;

#[async_trait]
impl TextPrompt for StdinPrompt {
    async fn ask(&self, request: &PromptRequest) -> Option<String> {
        let title = request.kind.title();
        tokio::task::spawn_blocking(move || {
            eprint!("{title}: ");
            io::stderr().flush().ok();
            let mut line = String::new();
            match io::stdin().lock().read_line(&mut line) {
                Ok(0) | Err(_) => None,
                Ok(_) => Some(line),
            }
        })
        .await
        .ok()
        .flatten()
    }
}

/// Stands in for the rendering engine when none can be loaded; the editor
/// then opens the read-only fallback view.
struct UnavailableEngine(String);

#[async_trait]
impl EngineProvider for UnavailableEngine {
    async fn open(&self, _bytes: Vec<u8>) -> Result<Arc<dyn RenderingEngine>> {
        Err(anyhow!("{}", self.0))
    }
}

#[cfg(feature = "pdf")]
fn engine_provider() -> Arc<dyn EngineProvider> {
    match pagemark_render::PdfiumEngineProvider::new() {
        Ok(provider) => Arc::new(provider),
        Err(err) => {
            warn!(error = %format!("{err:#}"), "pdfium could not be loaded");
            Arc::new(UnavailableEngine(format!("{err:#}")))
        }
    }
}

#[cfg(not(feature = "pdf"))]
fn engine_provider() -> Arc<dyn EngineProvider> {
    Arc::new(UnavailableEngine(
        "built without PDF rendering; rebuild with --features pdf".into(),
    ))
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ImportFile {
    Bare(Vec<Markup>),
    Wrapped { markups: Vec<Markup> },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let document_id = args
        .document
        .ok_or_else(|| anyhow!("--document <id> is required"))?;

    let project_dirs = ProjectDirs::from("org", "pagemark", "pagemark")
        .ok_or_else(|| anyhow!("unable to resolve platform data directories"))?;
    let _log_guard = init_logging(&project_dirs)?;
    let config = load_config(args.config.as_deref(), args.backend, &project_dirs)?;

    let scope = match (args.linked_type, args.linked_id) {
        (Some(linked_type), Some(linked_id)) => Some(LinkedContext::new(linked_type, linked_id)),
        _ => None,
    };
    let server = args.server.as_str().to_owned();
    let api = Arc::new(HttpPersistence::new(&server, document_id)?);
    let views = Arc::new(FileViewStateStore::new(
        project_dirs.data_local_dir().join("views"),
    )?);
    let prompt: Arc<dyn TextPrompt> = match &args.command {
        Command::Comment {
            text: Some(text), ..
        } => Arc::new(QueuedPrompt::new([Some(text.clone())])),
        _ => Arc::new(StdinPrompt),
    };

    let deps = EditorDeps {
        api,
        provider: engine_provider(),
        prompt,
        views,
        document_key: document_key(&server, document_id),
    };
    let mut editor = Editor::load(deps, config, document_id, scope).await;
    report_scope(editor.scope_resolution());

    let result = run(&mut editor, args.command).await;
    editor.teardown();
    result
}

async fn run(editor: &mut Editor, command: Command) -> Result<()> {
    match command {
        Command::Show { json } => show(editor, json)?,
        Command::Scopes => {
            if editor.links().is_empty() {
                println!("(document is not linked to any scope)");
            }
            for link in editor.links() {
                println!("{}\t{}", link.context(), link.title);
            }
        }
        Command::History => {
            for entry in editor.history().await? {
                let count = entry.count.map_or_else(|| "-".to_owned(), |c| c.to_string());
                println!(
                    "{}\t{}\t{}",
                    entry.version,
                    entry.saved_at.as_deref().unwrap_or("-"),
                    count
                );
            }
        }
        Command::Restore { version } => {
            editor.restore_version(version).await?;
            println!(
                "restored version {version} ({} markups)",
                editor.markups().len()
            );
        }
        Command::Import { file } => {
            let source = fs::read_to_string(&file)
                .with_context(|| format!("failed to read {:?}", file))?;
            let markups = parse_import(&source)?;
            let count = markups.len();
            editor.replace_all(markups)?;
            editor.perform_save(true).await?;
            println!("imported {count} markups");
        }
        Command::Flatten => {
            editor.perform_save_document().await?;
            println!("document saved");
        }
        Command::Render {
            out_dir,
            pages,
            scale,
        } => render(editor, &out_dir, pages, scale).await?,
        Command::Comment { page, x, y, .. } => comment(editor, page, x, y).await?,
    }
    Ok(())
}

fn report_scope(resolution: &ScopeResolution) {
    match resolution {
        ScopeResolution::Reset { requested } => eprintln!(
            "{requested} is not linked to this document; using document-level markups"
        ),
        ScopeResolution::Unverified { requested, reason } => eprintln!(
            "could not verify {requested} ({reason}); using document-level markups"
        ),
        ScopeResolution::DocumentLevel | ScopeResolution::Validated(_) => {}
    }
}

fn show(editor: &Editor, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(editor.markups())?);
        return Ok(());
    }
    let name = editor
        .document()
        .map(|d| d.original_name.clone().unwrap_or_else(|| d.filename.clone()))
        .unwrap_or_else(|| "(unknown document)".to_owned());
    let scope = editor
        .scope()
        .map_or_else(|| "document level".to_owned(), |s| s.to_string());
    println!("{name}: {} markups, {scope}", editor.markups().len());
    for markup in editor.markups() {
        println!(
            "p{:<4} {:<24} {}",
            markup.page + 1,
            markup.id,
            describe(markup)
        );
    }
    Ok(())
}

fn describe(markup: &Markup) -> String {
    match &markup.kind {
        MarkupKind::Highlight { color } => format!("highlight {}", color.to_hex()),
        MarkupKind::Ink { points, .. } => format!("ink, {} points", points.len()),
        MarkupKind::Text {
            text, font_size, ..
        } => format!("text {font_size}pt {text:?}"),
        MarkupKind::Comment { text } => format!("comment {text:?}"),
    }
}

fn parse_import(source: &str) -> Result<Vec<Markup>> {
    let file: ImportFile = serde_json::from_str(source).context("invalid markup file")?;
    Ok(match file {
        ImportFile::Bare(markups) | ImportFile::Wrapped { markups } => markups,
    })
}

fn parse_pages(input: &str) -> Result<RangeInclusive<usize>, String> {
    let parse = |s: &str| {
        s.trim()
            .parse::<usize>()
            .ok()
            .filter(|n| *n >= 1)
            .ok_or_else(|| format!("invalid page number {s:?}"))
    };
    let range = match input.split_once("..") {
        Some((start, end)) => parse(start)?..=parse(end)?,
        None => {
            let page = parse(input)?;
            page..=page
        }
    };
    if range.is_empty() {
        return Err(format!("empty page range {input:?}"));
    }
    Ok(range)
}

async fn render(
    editor: &mut Editor,
    out_dir: &Path,
    pages: Option<RangeInclusive<usize>>,
    scale: Option<f64>,
) -> Result<()> {
    if let DocumentView::Fallback(fallback) = editor.view() {
        bail!("pages cannot be rendered: {}", fallback.reason);
    }
    if let Some(scale) = scale {
        editor.set_scale(scale).await?;
    }
    fs::create_dir_all(out_dir).with_context(|| format!("failed to create {:?}", out_dir))?;

    let page_count = editor.cache().map_or(0, PageCache::page_count);
    let range = pages.unwrap_or(1..=page_count);
    for number in range {
        let index = number - 1;
        if index >= page_count {
            warn!(page = number, page_count, "requested page is past the end");
            break;
        }
        let report = editor.show_pages([index]).await;
        if report.failed.contains(&index) {
            warn!(page = number, "page failed to render; skipped");
            continue;
        }
        let Some(cache) = editor.cache() else {
            break;
        };
        let (Some(raster), Some(descriptor)) = (cache.raster(index), cache.page(index)) else {
            continue;
        };

        let png_path = out_dir.join(format!("page-{number}.png"));
        raster
            .to_rgba_image()?
            .save(&png_path)
            .with_context(|| format!("failed to write {:?}", png_path))?;

        let mut overlay = OverlayBackend::new();
        overlay.attach(descriptor.surface_info(cache.scale()));
        overlay.render_from_model(&markups_on_page(editor.markups(), index));
        let svg_path = out_dir.join(format!("page-{number}.svg"));
        fs::write(&svg_path, overlay.to_svg())
            .with_context(|| format!("failed to write {:?}", svg_path))?;
        info!(page = number, "page exported");
    }
    println!("pages written to {}", out_dir.display());
    Ok(())
}

async fn comment(editor: &mut Editor, page: usize, x: f64, y: f64) -> Result<()> {
    if !(0.0..=1.0).contains(&x) || !(0.0..=1.0).contains(&y) {
        bail!("--x and --y are fractions of the page between 0 and 1");
    }
    let index = page
        .checked_sub(1)
        .ok_or_else(|| anyhow!("pages are numbered from 1"))?;

    if editor.cache().is_some() {
        editor.show_pages([index]).await;
        let descriptor = editor
            .cache()
            .and_then(|c| c.page(index))
            .ok_or_else(|| anyhow!("page {page} does not exist"))?;
        let anchor = PixelPoint::new(x * descriptor.width, y * descriptor.height);
        editor.set_tool(ToolMode::Comment);
        editor.pointer(index, PointerEvent::Down(anchor)).await;
        if editor.pointer(index, PointerEvent::Up(anchor)).await != GestureOutcome::Changed {
            println!("cancelled");
            return Ok(());
        }
    } else {
        // Without page geometry the marker gets a fixed fraction of the page.
        let Some(text) = editor.ask(PromptKind::Comment).await else {
            println!("cancelled");
            return Ok(());
        };
        let bounds = Bounds::new(x - 0.02, y - 0.015, 0.04, 0.03).clamped();
        editor.add_markup(Markup::comment(index, bounds, text))?;
    }
    editor.perform_save(true).await?;
    println!("comment added on page {page}");
    Ok(())
}

fn load_config(
    path: Option<&Path>,
    backend: Option<BackendKind>,
    project_dirs: &ProjectDirs,
) -> Result<EditorConfig> {
    let default_path = project_dirs.config_dir().join("config.toml");
    let mut config = EditorConfig::load(path.unwrap_or(&default_path))?;
    if let Some(backend) = backend {
        config.backend = backend;
    }
    Ok(config)
}

fn init_logging(project_dirs: &ProjectDirs) -> Result<WorkerGuard> {
    let log_dir = project_dirs.data_local_dir().join("logs");
    fs::create_dir_all(&log_dir)?;

    let file_appender = tracing_appender::rolling::never(log_dir, "pagemark.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let file_layer = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(file_writer);
    let console_layer = tracing_subscriber::fmt::layer().with_writer(io::stderr);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(console_layer)
        .try_init()
        .map_err(|err| anyhow!(err))?;

    Ok(guard)
}

#[cfg(test)]
mod tests {
    use pagemark_core::Color;

    use super::*;

    #[test]
    fn page_ranges_are_one_based_and_inclusive() {
        assert_eq!(parse_pages("3").unwrap(), 3..=3);
        assert_eq!(parse_pages("2..5").unwrap(), 2..=5);
        assert!(parse_pages("0").is_err());
        assert!(parse_pages("5..2").is_err());
        assert!(parse_pages("a..b").is_err());
    }

    #[test]
    fn import_accepts_bare_and_wrapped_lists() {
        let record = r#"{"id": "m1", "page": 0, "type": "highlight", "bounds": {"x": 0.1, "y": 0.1, "width": 0.2, "height": 0.05}}"#;
        let bare = parse_import(&format!("[{record}]")).unwrap();
        let wrapped = parse_import(&format!(r#"{{"markups": [{record}]}}"#)).unwrap();
        assert_eq!(bare, wrapped);
        assert_eq!(bare[0].kind, MarkupKind::Highlight { color: Color::HIGHLIGHT });
        assert!(parse_import(r#"{"notes": []}"#).is_err());
    }

    #[test]
    fn descriptions_name_the_markup_type() {
        let ink = Markup::ink(
            0,
            vec![
                pagemark_core::Point::new(0.1, 0.1),
                pagemark_core::Point::new(0.2, 0.2),
            ],
            2.0,
            Color::BLACK,
        );
        assert_eq!(describe(&ink), "ink, 2 points");
        let note = Markup::comment(0, Bounds::default(), "hi".into());
        assert_eq!(describe(&note), r#"comment "hi""#);
    }

    #[test]
    fn scope_flags_must_come_in_pairs() {
        let parsed = Args::try_parse_from(["pagemark", "--linked-type", "project", "show"]);
        assert!(parsed.is_err());
        let parsed = Args::try_parse_from([
            "pagemark",
            "--document",
            "3",
            "--linked-type",
            "project",
            "--linked-id",
            "7",
            "show",
        ])
        .unwrap();
        assert_eq!(parsed.document, Some(3));
        assert_eq!(parsed.linked_type, Some(LinkedType::Project));
    }

    #[test]
    fn argument_definitions_are_consistent() {
        use clap::CommandFactory;
        Args::command().debug_assert();
    }
}

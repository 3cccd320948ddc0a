use std::fs;
use std::io::{self, Stdout};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use clap::Parser;
use crossterm::cursor;
use crossterm::event::{self, DisableMouseCapture, EnableMouseCapture};
use crossterm::terminal::{self, Clear, ClearType};
use directories::ProjectDirs;
use synview_core::{
    Command, CompileLock, CompileResult, ConfigStore, FileConfigStore, LayoutMode,
    PreviewController, PreviewEvent, SourceLine, SourcePosition, SyncAnchor, ZoomMode,
    ANIMATION_INTERVAL,
};
use synview_render::{PdfRenderFactory, SynctexCli};
use synview_tty::{
    compose_frame, write_status_line, CellSize, ComposeOptions, DrawParams, EventMapper,
    KittyRenderer, UiEvent,
};
use tracing::{debug, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{prelude::*, EnvFilter};
use url::Url;

mod watch;

use watch::DocumentWatcher;

/// Poll timeout while nothing is animating.
const IDLE_POLL: Duration = Duration::from_millis(100);

#[derive(Debug, Parser)]
#[command(
    name = "synview",
    version,
    about = "Live PDF preview with SyncTeX navigation for the kitty terminal"
)]
struct Args {
    /// PDF to preview, as a path or a file:// URI
    document: String,

    /// Scroll to the output of FILE:LINE[:COLUMN] once loaded
    #[arg(long = "forward", value_name = "FILE:LINE[:COLUMN]", value_parser = parse_source_position)]
    forward: Option<SourcePosition>,

    /// Configuration file (defaults to preview.toml in the config directory)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Page layout to start with: single_page or one_column
    #[arg(long, value_parser = parse_layout)]
    layout: Option<LayoutMode>,

    /// Zoom to start with: "Best Fit", "Fit Page Width" or a level such as 125%
    #[arg(long)]
    zoom: Option<ZoomMode>,

    /// Outline SyncTeX candidates on the pages
    #[arg(long)]
    debug_sync: bool,

    /// Command run for inverse search; {file} and {line} are substituted
    #[arg(long, value_name = "COMMAND")]
    editor: Option<String>,

    /// Path of the synctex executable
    #[arg(long, default_value = "synctex")]
    synctex: PathBuf,
}

struct RawModeGuard;

impl RawModeGuard {
    fn new() -> Result<Self> {
        terminal::enable_raw_mode()?;
        crossterm::execute!(io::stdout(), EnableMouseCapture, cursor::Hide)?;
        Ok(Self)
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        let mut stdout = io::stdout();
        let _ = crossterm::execute!(stdout, DisableMouseCapture, cursor::Show);
        let _ = terminal::disable_raw_mode();
    }
}

/// Terminal geometry: the bottom row is the status line, the rest shows the
/// composed frame.
#[derive(Debug, Clone, Copy)]
struct Screen {
    columns: u16,
    rows: u16,
    cell: CellSize,
}

impl Screen {
    fn query() -> Result<Self> {
        let window = terminal::window_size()?;
        let columns = window.columns.max(1);
        let rows = window.rows.max(2);
        let cell = if window.width > 0 && window.height > 0 {
            CellSize {
                width: f64::from(window.width) / f64::from(columns),
                height: f64::from(window.height) / f64::from(rows),
            }
        } else {
            CellSize::default()
        };
        Ok(Self {
            columns,
            rows,
            cell,
        })
    }

    fn image_rows(&self) -> u16 {
        self.rows - 1
    }

    fn view_size(&self) -> (f64, f64) {
        (
            f64::from(self.columns) * self.cell.width,
            f64::from(self.image_rows()) * self.cell.height,
        )
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let document = resolve_document(&args.document)?;

    let project_dirs = ProjectDirs::from("net", "synview", "synview")
        .ok_or_else(|| anyhow!("unable to resolve platform data directories"))?;
    let _log_guard = init_logging(&project_dirs)?;

    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| project_dirs.config_dir().join("preview.toml"));
    let store: Arc<dyn ConfigStore> = Arc::new(FileConfigStore::new(config_path)?);
    let compile_lock = Arc::new(CompileLock::new());
    let provider = Arc::new(PdfRenderFactory::new()?);
    let mut controller = PreviewController::new(provider, store, Arc::clone(&compile_lock))?
        .with_sync_backend(Arc::new(SynctexCli::new(&args.synctex)));
    controller.set_scrollbar_thickness(0.0, 0.0);

    if let Some(layout) = args.layout {
        controller.set_layout_mode(layout);
    }
    if let Some(zoom) = args.zoom {
        controller.set_zoom(zoom);
    }

    let mut screen = Screen::query()?;
    let (view_width, view_height) = screen.view_size();
    controller.on_viewport_resized(view_width, view_height);

    if let Err(err) = controller.set_document(document.clone()).await {
        controller.start_error_mode(&err.to_string());
    }
    let anchor = args.forward.clone().map(SyncAnchor::new);
    if let Some(anchor) = anchor.clone() {
        controller.apply(Command::ForwardSync(anchor));
    }

    let mut watcher = DocumentWatcher::new(&document)?;

    let _raw = RawModeGuard::new()?;
    let mut renderer = KittyRenderer::new(io::stdout());
    renderer.clear_all()?;
    let mut mapper = EventMapper::new();
    mapper.set_cell_size(screen.cell);

    let mut options = ComposeOptions {
        shadow_offset: controller.document().metrics().shadow_offset,
        show_sync_boxes: args.debug_sync,
    };
    let events = controller.events();
    let mut status = String::new();
    let mut dirty = true;

    loop {
        let settled = watcher.poll();
        // a manual reload must not read the document while it is being rewritten
        let _writing = if watcher.is_writing() {
            compile_lock.try_acquire()
        } else {
            None
        };

        if settled {
            if controller.is_paused() {
                debug!("document changed while paused");
            } else {
                let result = CompileResult {
                    document: document.clone(),
                    error: None,
                    anchor: anchor.clone(),
                };
                if let Err(err) = controller.on_compile_finished(result).await {
                    controller.start_error_mode(&err.to_string());
                }
            }
        }

        let timeout = if controller.is_animating() {
            ANIMATION_INTERVAL
        } else {
            IDLE_POLL
        };
        if event::poll(timeout)? {
            let ui_event = mapper.map_event(event::read()?);
            match ui_event {
                UiEvent::Quit => break,
                UiEvent::Command(command) => controller.apply(command),
                UiEvent::Click { x, y, modifiers } => {
                    controller.on_pointer_click(x, y, modifiers);
                }
                UiEvent::Drag { delta_x, delta_y } => controller.on_pointer_drag(delta_x, delta_y),
                UiEvent::Wheel {
                    direction,
                    x,
                    y,
                    modifiers,
                } => controller.on_scroll_wheel(direction, x, y, modifiers),
                UiEvent::Resize { .. } => {
                    screen = Screen::query()?;
                    mapper.set_cell_size(screen.cell);
                    let (width, height) = screen.view_size();
                    controller.on_viewport_resized(width, height);
                    renderer.clear_all()?;
                    dirty = true;
                }
                UiEvent::Reload => {
                    let outcome = controller.reload(anchor.as_ref()).await;
                    status = format!("reload: {outcome:?}");
                    dirty = true;
                }
                UiEvent::ToggleSyncBoxes => {
                    options.show_sync_boxes = !options.show_sync_boxes;
                    dirty = true;
                }
                UiEvent::None => {}
            }
        } else if !controller.is_animating() {
            let dropped = controller.run_idle();
            if dropped > 0 {
                debug!(dropped, "idle collection");
            }
        }

        if controller.is_animating() && controller.tick() {
            dirty = true;
        }

        let drained: Vec<PreviewEvent> = events.lock().drain(..).collect();
        for event in drained {
            match event {
                PreviewEvent::RedrawNeeded
                | PreviewEvent::DocumentLoaded { .. }
                | PreviewEvent::ScaleChanged(_)
                | PreviewEvent::PageChanged(_) => dirty = true,
                PreviewEvent::ErrorMode(Some(message)) => {
                    status = format!("error: {message}");
                    dirty = true;
                }
                PreviewEvent::ErrorMode(None) => {
                    status.clear();
                    dirty = true;
                }
                PreviewEvent::SourceRequested(line) => {
                    status = format!("{}:{}", line.file.display(), line.line);
                    if let Some(template) = args.editor.as_deref() {
                        if let Err(err) = open_in_editor(template, &line) {
                            warn!("failed to start editor: {err:#}");
                            status = format!("editor: {err}");
                        }
                    }
                    dirty = true;
                }
                PreviewEvent::Status(message) => {
                    status = message;
                    dirty = true;
                }
            }
        }

        if dirty {
            redraw(&mut renderer, &mut controller, &screen, options)?;
            let label = status_label(&controller, &status, mapper.pending_input().as_deref());
            write_status_line(renderer.writer(), screen.rows - 1, screen.columns, &label)?;
            dirty = false;
        }
    }

    renderer.delete()?;
    crossterm::execute!(renderer.writer(), Clear(ClearType::All), cursor::MoveTo(0, 0))?;
    info!("preview closed");
    Ok(())
}

fn redraw(
    renderer: &mut KittyRenderer<Stdout>,
    controller: &mut PreviewController,
    screen: &Screen,
    options: ComposeOptions,
) -> Result<()> {
    let (width, height) = screen.view_size();
    let placements = controller.paint_list();
    let frame = compose_frame(width.round() as u32, height.round() as u32, &placements, options);

    renderer.begin_sync_update()?;
    renderer.draw(
        &frame,
        DrawParams::clamped(u32::from(screen.columns), u32::from(screen.image_rows())),
    )?;
    renderer.end_sync_update()?;
    Ok(())
}

fn status_label(controller: &PreviewController, status: &str, pending: Option<&str>) -> String {
    let mut label = match controller.current_page() {
        Some(page) => format!(
            "{}/{}  {}",
            page + 1,
            controller.page_count(),
            controller.zoom()
        ),
        None => "no pages".to_string(),
    };
    if controller.is_paused() {
        label.push_str("  [paused]");
    }
    if !status.is_empty() {
        label.push_str("  ");
        label.push_str(status);
    }
    if let Some(pending) = pending {
        label.push_str("  ");
        label.push_str(pending);
    }
    label
}

fn open_in_editor(template: &str, line: &SourceLine) -> Result<()> {
    let file = line.file.display().to_string();
    let line_number = line.line.to_string();
    let mut parts = template.split_whitespace().map(|part| {
        part.replace("{file}", &file)
            .replace("{line}", &line_number)
    });
    let program = parts
        .next()
        .ok_or_else(|| anyhow!("editor command is empty"))?;
    process::Command::new(&program)
        .args(parts)
        .spawn()
        .with_context(|| format!("failed to run {program}"))?;
    Ok(())
}

/// Accepts a plain path or a `file://` URI.
fn resolve_document(argument: &str) -> Result<PathBuf> {
    if argument.starts_with("file://") {
        let url = Url::parse(argument).with_context(|| format!("invalid URI {argument}"))?;
        return url
            .to_file_path()
            .map_err(|_| anyhow!("{argument} does not name a local file"));
    }
    Ok(PathBuf::from(argument))
}

fn parse_source_position(value: &str) -> Result<SourcePosition> {
    let mut parts = value.rsplitn(3, ':');
    let last = parts.next().unwrap_or_default();
    let middle = parts.next();
    let rest = parts.next();

    let (file, line, column) = match (rest, middle) {
        (Some(file), Some(line)) if line.parse::<u32>().is_ok() && last.parse::<u32>().is_ok() => {
            (file, line, Some(last))
        }
        _ => {
            // no column: the last field is the line and the file may contain ':'
            let (file, line) = value
                .rsplit_once(':')
                .ok_or_else(|| anyhow!("expected FILE:LINE[:COLUMN], got {value}"))?;
            (file, line, None)
        }
    };
    if file.is_empty() {
        bail!("missing file in {value}");
    }

    let line: u32 = line
        .parse()
        .with_context(|| format!("invalid line number in {value}"))?;
    let column: u32 = column.map(str::parse).transpose()?.unwrap_or(1);
    Ok(SourcePosition {
        file: Path::new(file).to_path_buf(),
        line: line.max(1),
        column: column.max(1),
    })
}

fn parse_layout(value: &str) -> Result<LayoutMode> {
    match value {
        "single_page" | "single" => Ok(LayoutMode::SinglePage),
        "one_column" | "continuous" => Ok(LayoutMode::Continuous),
        other => bail!("unknown layout {other}; expected single_page or one_column"),
    }
}

fn init_logging(project_dirs: &ProjectDirs) -> Result<WorkerGuard> {
    let log_dir = project_dirs.data_local_dir().join("logs");
    fs::create_dir_all(&log_dir)?;

    let file_appender = tracing_appender::rolling::never(log_dir, "synview.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    // the terminal is owned by the preview, so logs only go to the file
    let file_layer = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(file_writer);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .try_init()
        .map_err(|err| anyhow!(err))?;

    Ok(guard)
}

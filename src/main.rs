use std::fs::File;
use std::io::{BufReader, BufWriter, Cursor, Write as _};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};

use inkcast::asciicast::Theme;
use inkcast::{pty, RenderConfig, DEFAULT_TEMPLATE};

#[derive(Parser)]
#[command(
    name = "inkcast",
    version,
    about = "Record a terminal session and render an SVG animation on the fly",
    args_conflicts_with_subcommands = true
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Terminal geometry, e.g. 82x19; defaults to the current terminal size
    #[arg(short = 'g', long, value_name = "COLUMNSxROWS")]
    screen_geometry: Option<String>,

    #[command(flatten)]
    render: RenderArgs,

    /// Output SVG file; a temporary file when omitted
    output: Option<PathBuf>,

    /// Increase log verbosity
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Record a terminal session to a file in asciicast v2 format
    Record {
        /// Terminal geometry, e.g. 82x19
        #[arg(short = 'g', long, value_name = "COLUMNSxROWS")]
        screen_geometry: Option<String>,

        /// Output cast file; a temporary file when omitted
        output: Option<PathBuf>,

        /// Increase log verbosity
        #[arg(short, long)]
        verbose: bool,
    },
    /// Render an asciicast recording as an SVG animation
    Render {
        /// Recording in asciicast v1 or v2 format
        input: PathBuf,

        /// Output SVG file (or directory with --still-frames); a temporary
        /// location when omitted
        output: Option<PathBuf>,

        #[command(flatten)]
        render: RenderArgs,

        /// Increase log verbosity
        #[arg(short, long)]
        verbose: bool,
    },
}

#[derive(Args, Clone)]
struct RenderArgs {
    /// SVG template file; the embedded default template when omitted
    #[arg(long, value_name = "FILE")]
    template: Option<PathBuf>,

    /// Minimum duration of a frame in milliseconds
    #[arg(long, value_name = "MS")]
    min_frame_duration: Option<u64>,

    /// Maximum duration of a frame in milliseconds; defaults to the
    /// recording's idle_time_limit
    #[arg(long, value_name = "MS")]
    max_frame_duration: Option<u64>,

    /// Duration of the final frame in milliseconds
    #[arg(long, value_name = "MS")]
    last_frame_duration: Option<u64>,

    /// Render one static SVG per frame instead of an animation
    #[arg(long)]
    still_frames: bool,

    /// Extra blank cell rows between stacked frames in vertical-scroll mode
    #[arg(long, value_name = "CELLS")]
    frame_cell_spacing: Option<u16>,

    /// Default text color, as #rrggbb; overrides the recording's theme
    #[arg(long, value_name = "HEX")]
    foreground: Option<String>,

    /// Default background color, as #rrggbb
    #[arg(long, value_name = "HEX")]
    background: Option<String>,

    /// 8 or 16 colon-separated #rrggbb palette entries
    #[arg(long, value_name = "COLORS")]
    palette: Option<String>,
}

impl RenderArgs {
    fn into_config(self) -> Result<RenderConfig> {
        let mut config = RenderConfig::default();
        if let Some(min) = self.min_frame_duration {
            config.min_frame_ms = min;
        }
        config.max_frame_ms = self.max_frame_duration;
        if let Some(last) = self.last_frame_duration {
            config.last_frame_ms = last;
        }
        if let Some(spacing) = self.frame_cell_spacing {
            config.frame_cell_spacing = spacing;
        }
        config.still_frames = self.still_frames;

        match (&self.foreground, &self.background, &self.palette) {
            (Some(fg), Some(bg), Some(palette)) => {
                config.theme = Some(Theme::new(fg, bg, palette).context("invalid theme override")?);
            }
            (None, None, None) => {}
            _ => bail!("--foreground, --background and --palette must be given together"),
        }

        Ok(config)
    }

    fn template_bytes(&self) -> Result<Vec<u8>> {
        match &self.template {
            Some(path) => std::fs::read(path)
                .with_context(|| format!("cannot read template {}", path.display())),
            None => Ok(DEFAULT_TEMPLATE.to_vec()),
        }
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "inkcast=debug" } else { "inkcast=info" };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default.into()),
        )
        .init();
}

fn parse_geometry(value: &str) -> Result<(u16, u16)> {
    let (columns, rows) = value
        .split_once('x')
        .with_context(|| format!("invalid geometry {value:?}, expected COLUMNSxROWS"))?;
    let columns: u16 = columns.parse().context("invalid column count")?;
    let rows: u16 = rows.parse().context("invalid row count")?;
    if columns == 0 || rows == 0 {
        bail!("geometry must be positive, got {value}");
    }
    Ok((columns, rows))
}

fn terminal_geometry(flag: Option<&str>) -> Result<(u16, u16)> {
    match flag {
        Some(value) => parse_geometry(value),
        None => match crossterm::terminal::size() {
            Ok((columns, rows)) => Ok((columns, rows)),
            Err(_) => Ok((80, 24)),
        },
    }
}

fn temp_path(suffix: &str) -> PathBuf {
    std::env::temp_dir().join(format!("inkcast_{}{suffix}", std::process::id()))
}

/// Restores the caller's terminal mode when recording ends, even on error.
struct RawModeGuard;

impl RawModeGuard {
    fn enable() -> Result<Self> {
        crossterm::terminal::enable_raw_mode().context("cannot set terminal raw mode")?;
        Ok(Self)
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        let _ = crossterm::terminal::disable_raw_mode();
    }
}

/// Record a session and return it as in-memory asciicast v2 text.
fn record_to_string(geometry: Option<&str>) -> Result<String> {
    let (columns, rows) = terminal_geometry(geometry)?;
    tracing::info!("Recording started, enter \"exit\" command or Control-D to end");

    let _guard = RawModeGuard::enable()?;
    let recording = pty::record(None, columns, rows)?;
    pty::reader::spawn_input_thread(recording.writer(), recording.running());

    let mut cast = String::new();
    cast.push_str(&recording.header().to_json_line());
    cast.push('\n');
    for event in recording {
        cast.push_str(&event.to_json_line());
        cast.push('\n');
    }
    drop(_guard);

    tracing::info!("Recording ended");
    Ok(cast)
}

fn record_command(geometry: Option<&str>, output: Option<PathBuf>) -> Result<()> {
    let path = output.unwrap_or_else(|| temp_path(".cast"));
    let cast = record_to_string(geometry)?;

    let mut file = BufWriter::new(
        File::create(&path).with_context(|| format!("cannot create {}", path.display()))?,
    );
    file.write_all(cast.as_bytes())?;
    file.flush()?;

    tracing::info!("Cast file is {}", path.display());
    Ok(())
}

fn render_from_reader<R: std::io::BufRead>(
    input: R,
    args: RenderArgs,
    output: Option<PathBuf>,
) -> Result<()> {
    let template = args.template_bytes()?;
    let still = args.still_frames;
    let config = args.into_config()?;

    if still {
        let directory = output.unwrap_or_else(|| temp_path("_frames"));
        std::fs::create_dir_all(&directory)
            .with_context(|| format!("cannot create {}", directory.display()))?;
        let paths = inkcast::render_still_frames(input, &template, &config, &directory, "frame")?;
        tracing::info!("Rendered {} still frames into {}", paths.len(), directory.display());
    } else {
        let path = output.unwrap_or_else(|| temp_path(".svg"));
        let mut out = Vec::new();
        inkcast::render_animation(input, &template, &config, &mut out)?;
        std::fs::write(&path, out)
            .with_context(|| format!("cannot write {}", path.display()))?;
        tracing::info!("SVG animation is {}", path.display());
    }
    Ok(())
}

fn render_command(input: &Path, args: RenderArgs, output: Option<PathBuf>) -> Result<()> {
    tracing::info!("Rendering started");
    let file = File::open(input).with_context(|| format!("cannot open {}", input.display()))?;
    render_from_reader(BufReader::new(file), args, output)
}

fn record_render_command(
    geometry: Option<&str>,
    args: RenderArgs,
    output: Option<PathBuf>,
) -> Result<()> {
    let cast = record_to_string(geometry)?;
    tracing::info!("Rendering started");
    render_from_reader(Cursor::new(cast), args, output)
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Some(Command::Record {
            screen_geometry,
            output,
            verbose,
        }) => {
            init_logging(verbose);
            record_command(screen_geometry.as_deref(), output)
        }
        Some(Command::Render {
            input,
            output,
            render,
            verbose,
        }) => {
            init_logging(verbose);
            render_command(&input, render, output)
        }
        None => {
            init_logging(cli.verbose);
            record_render_command(cli.screen_geometry.as_deref(), cli.render, cli.output)
        }
    }
}

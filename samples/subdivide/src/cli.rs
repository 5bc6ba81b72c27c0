use std::path::PathBuf;

use clap::ValueHint;
use tableau::{HtmlOptions, QuantizeOptions, ScriptSource};

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, clap::ValueEnum)]
pub enum LogFormat {
    Compact,
    Full,
    Pretty,
    Json,
}

impl std::fmt::Display for LogFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogFormat::Compact => f.write_str("compact"),
            LogFormat::Full => f.write_str("full"),
            LogFormat::Pretty => f.write_str("pretty"),
            LogFormat::Json => f.write_str("json"),
        }
    }
}

/// What to write to the output file.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, clap::ValueEnum)]
pub enum OutputFormat {
    /// A page which loads the renderer and runs the scene
    Html,
    /// The bare command list
    Json,
    /// A script which feeds the command list to the renderer on load
    Script,
}

/// Subdivide OBJ meshes, animate them with a traveling wave, and export the result as a scene.
#[derive(Debug, clap::Parser)]
#[command(author, version, about)]
pub struct Cli {
    /// Logging output filters; comma-separated
    #[arg(
        short,
        long,
        default_value = "warn,tableau=info,tableau_geom=info,subdivide=info",
        env = "SUBDIVIDE_LOG_FILTER"
    )]
    pub log_filter: String,
    /// Logging output format
    #[arg(long, default_value_t = LogFormat::Pretty)]
    pub log_format: LogFormat,
    /// Number of Loop subdivision steps
    #[arg(short, long, default_value_t = 1)]
    pub steps: u32,
    /// Move every vertex onto the limit surface after the last step
    #[arg(long)]
    pub project_to_limit: bool,
    /// Number of animation frames; 0 exports a still scene
    #[arg(short, long, default_value_t = 0)]
    pub frames: u32,
    /// Height of the wave, relative to the size of the mesh
    #[arg(long, default_value_t = 0.05)]
    pub amplitude: f32,
    /// Largest quantization error, relative to the size of the mesh
    #[arg(long, default_value_t = 1e-5)]
    pub relative_error: f32,
    /// Largest absolute quantization error; ignored if not positive
    #[arg(long, default_value_t = -1.0, allow_negative_numbers = true)]
    pub absolute_error: f32,
    /// Use one range for every frame instead of one per frame
    #[arg(long)]
    pub shared_range: bool,
    /// Output file
    #[arg(short, long, default_value = "scene.html", value_hint = ValueHint::FilePath)]
    pub output: PathBuf,
    /// Output format; guessed from the output extension if omitted
    #[arg(long, value_enum)]
    pub format: Option<OutputFormat>,
    /// Title of the HTML page
    #[arg(long, default_value = "subdivide")]
    pub title: String,
    /// URL or path of the renderer script, linked from HTML pages
    #[arg(long, default_value = "tableau.min.js", env = "SUBDIVIDE_LIBRARY")]
    pub library: String,
    /// OBJ files to load; each becomes one mesh
    #[arg(num_args = 1.., required = true, value_hint = ValueHint::FilePath)]
    pub files: Vec<PathBuf>,
}

impl Cli {
    pub fn output_format(&self) -> OutputFormat {
        if let Some(format) = self.format {
            return format;
        }
        let extension = self
            .output
            .extension()
            .map(|ext| ext.to_string_lossy().to_ascii_lowercase());
        match extension.as_deref() {
            Some("html" | "htm") => OutputFormat::Html,
            Some("js") => OutputFormat::Script,
            _ => OutputFormat::Json,
        }
    }

    pub fn quantize_options(&self) -> QuantizeOptions {
        QuantizeOptions {
            relative_error_threshold: self.relative_error,
            absolute_error_threshold: self.absolute_error,
            base_mesh_id: None,
            per_frame_range: !self.shared_range,
        }
    }

    pub fn html_options(&self) -> HtmlOptions {
        HtmlOptions {
            title: self.title.clone(),
            library: Some(ScriptSource::Link(self.library.clone())),
            ..Default::default()
        }
    }
}

/// Set up pretty log output
pub(crate) fn initialize_tracing(log_filter: &str, log_format: LogFormat) {
    let tsub = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_timer(tracing_subscriber::fmt::time::OffsetTime::new(
            time::UtcOffset::current_local_offset().unwrap_or_else(|e| {
                tracing::warn!("couldn't get local time offset: {:?}", e);
                time::UtcOffset::UTC
            }),
            time::macros::format_description!("[hour]:[minute]:[second]"),
        ))
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_env_filter(log_filter);

    match log_format {
        LogFormat::Compact => tsub.compact().init(),
        LogFormat::Full => tsub.init(),
        LogFormat::Pretty => tsub.pretty().init(),
        LogFormat::Json => tsub.json().init(),
    }
}

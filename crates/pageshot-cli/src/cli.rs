use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use pageshot_models::{DevicePreset, ImageFormat, RenderOptions, Viewport, WaitFor};

#[derive(Parser)]
#[command(name = "pageshot")]
#[command(version, about = "Website screenshot capture and scheduling")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Database file (defaults to ~/.pageshot/pageshot.redb)
    #[arg(long, global = true, env = "PAGESHOT_DB_PATH")]
    pub db_path: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Capture a single screenshot
    Capture(CaptureArgs),
    /// Manage recurring captures
    Schedule {
        #[command(subcommand)]
        command: ScheduleCommands,
    },
    /// Run the capture scheduler in the foreground
    Run(RunArgs),
}

#[derive(ValueEnum, Clone, Copy, Debug, Default)]
pub enum FormatArg {
    #[default]
    Png,
    Jpeg,
    Webp,
}

impl From<FormatArg> for ImageFormat {
    fn from(arg: FormatArg) -> Self {
        match arg {
            FormatArg::Png => ImageFormat::Png,
            FormatArg::Jpeg => ImageFormat::Jpeg,
            FormatArg::Webp => ImageFormat::Webp,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug)]
pub enum DeviceArg {
    DesktopHd,
    Iphone14,
    Pixel7,
    IpadMini,
}

impl From<DeviceArg> for DevicePreset {
    fn from(arg: DeviceArg) -> Self {
        match arg {
            DeviceArg::DesktopHd => DevicePreset::DesktopHd,
            DeviceArg::Iphone14 => DevicePreset::Iphone14,
            DeviceArg::Pixel7 => DevicePreset::Pixel7,
            DeviceArg::IpadMini => DevicePreset::IpadMini,
        }
    }
}

/// Rendering flags shared by `capture` and `schedule add`.
#[derive(Args)]
pub struct RenderArgs {
    /// Output image format
    #[arg(long, value_enum, default_value_t = FormatArg::Png)]
    pub format: FormatArg,

    /// Encoder quality for jpeg/webp (1-100)
    #[arg(long, default_value_t = 85)]
    pub quality: u8,

    /// Capture the full scrollable page instead of the viewport
    #[arg(long)]
    pub full_page: bool,

    /// Viewport width in CSS pixels
    #[arg(long)]
    pub width: Option<u32>,

    /// Viewport height in CSS pixels
    #[arg(long)]
    pub height: Option<u32>,

    /// Device preset to emulate (overridden by explicit width/height)
    #[arg(long, value_enum)]
    pub device: Option<DeviceArg>,

    /// CSS selector to wait for before capturing
    #[arg(long)]
    pub wait_for: Option<String>,

    /// How long to wait for the selector, in milliseconds
    #[arg(long, default_value_t = 10_000)]
    pub wait_timeout_ms: u64,

    /// Emulate prefers-color-scheme: dark
    #[arg(long)]
    pub dark_mode: bool,

    /// Extra CSS injected into the page before capture
    #[arg(long)]
    pub inject_css: Option<String>,

    /// Skip the consent overlay dismissal pass
    #[arg(long)]
    pub no_consent: bool,
}

impl RenderArgs {
    pub fn to_options(&self) -> RenderOptions {
        let viewport = match (self.width, self.height) {
            (None, None) => None,
            (width, height) => {
                let defaults = Viewport::default();
                Some(Viewport {
                    width: width.unwrap_or(defaults.width),
                    height: height.unwrap_or(defaults.height),
                    ..defaults
                })
            }
        };
        RenderOptions {
            format: self.format.into(),
            quality: self.quality,
            full_page: self.full_page,
            viewport,
            device: self.device.map(Into::into),
            clip: None,
            wait_for: self.wait_for.clone().map(|selector| WaitFor {
                selector,
                timeout_ms: self.wait_timeout_ms,
            }),
            dark_mode: self.dark_mode,
            inject_css: self.inject_css.clone(),
        }
    }
}

#[derive(Args)]
pub struct CaptureArgs {
    /// Page URL to capture
    pub url: String,

    /// Output file (defaults to a name derived from the URL)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    #[command(flatten)]
    pub render: RenderArgs,
}

#[derive(Subcommand)]
pub enum ScheduleCommands {
    /// Add a recurring capture
    Add(ScheduleAddArgs),
    /// List schedules
    List {
        /// Emit JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Remove a schedule and its retained captures
    Remove {
        /// Schedule ID
        id: String,
    },
    /// Deactivate a schedule without deleting it
    Pause {
        /// Schedule ID
        id: String,
    },
    /// Reactivate a paused schedule
    Resume {
        /// Schedule ID
        id: String,
    },
    /// List retained captures for a schedule
    History {
        /// Schedule ID
        id: String,
    },
}

#[derive(Args)]
pub struct ScheduleAddArgs {
    /// Page URL to capture
    pub url: String,

    /// Cron recurrence (5-field, minute precision; a seconds field is also accepted)
    #[arg(long)]
    pub cron: String,

    /// Webhook URL notified after each run
    #[arg(long)]
    pub webhook: Option<String>,

    /// Retain captured images in the database
    #[arg(long)]
    pub keep_history: bool,

    /// Retention window in hours for kept captures
    #[arg(long)]
    pub history_ttl_hours: Option<i64>,

    #[command(flatten)]
    pub render: RenderArgs,
}

#[derive(Args)]
pub struct RunArgs {
    /// Maximum number of concurrently open pages
    #[arg(long, default_value_t = 4)]
    pub max_pages: usize,

    /// Tear the browser down after this many idle seconds (0 = keep alive)
    #[arg(long, default_value_t = 300)]
    pub idle_timeout_secs: u64,

    /// Scheduler polling interval in seconds
    #[arg(long, default_value_t = 60)]
    pub tick_secs: u64,

    /// Chromium executable override
    #[arg(long, env = "PAGESHOT_BROWSER")]
    pub browser: Option<PathBuf>,

    /// Pass --no-sandbox to Chromium
    #[arg(long)]
    pub no_sandbox: bool,
}

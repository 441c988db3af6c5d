//! Pagecast CLI
//!
//! `serve` runs the JSON-RPC stdio protocol server; `capture` runs one
//! session from flags and exits when the document is written.

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand, ValueEnum};
use pagecast::browser::{BrowserConfig, BrowserController, ViewerProfile};
use pagecast::capture::{
    CaptureEvent, CaptureOrchestrator, Dimensions, Direction, OrchestratorConfig, PageRange,
    SessionConfig, SessionEnd,
};
use pagecast::delivery::FileSink;
use pagecast::processor::DEFAULT_BATCH_SIZE;
use pagecast::ProtocolServer;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Paginated document viewer capture
#[derive(Parser, Debug)]
#[command(name = "pagecast")]
#[command(version)]
#[command(about = "Capture a paginated web document viewer into a PDF")]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct CommonArgs {
    /// DevTools websocket URL of a running Chrome to attach to
    #[arg(long, global = true)]
    ws_url: Option<String>,

    /// Open this URL before capturing (launches Chrome when --ws-url is absent)
    #[arg(long, global = true)]
    url: Option<String>,

    /// Supported viewer host; repeat for several (none = any host)
    #[arg(long = "site", global = true)]
    sites: Vec<String>,

    /// Output directory (default: $PAGECAST_OUTPUT_DIR or the current directory)
    #[arg(short, long, global = true)]
    output_dir: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to Chrome/Chromium executable
    #[arg(long, global = true)]
    chrome_path: Option<String>,

    /// Launch Chrome headless
    #[arg(long, global = true)]
    headless: bool,

    /// Selector of the viewer's turn-left control
    #[arg(long, global = true)]
    left_control: Option<String>,

    /// Selector of the viewer's turn-right control
    #[arg(long, global = true)]
    right_control: Option<String>,

    /// Selector of the viewer's page indicator
    #[arg(long, global = true)]
    page_label: Option<String>,

    /// Frames per processor message
    #[arg(long, global = true, default_value_t = DEFAULT_BATCH_SIZE)]
    batch_size: usize,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the JSON-RPC protocol on stdin/stdout
    Serve,
    /// Capture one page range and exit
    Capture(CaptureArgs),
}

#[derive(Args, Debug)]
struct CaptureArgs {
    /// First page (1-indexed)
    #[arg(long)]
    start: u32,

    /// Last page (inclusive)
    #[arg(long)]
    end: u32,

    /// Which way the viewer pages forward
    #[arg(long, value_enum, default_value_t = PagingDirection::Right)]
    direction: PagingDirection,

    /// Device scale factor during capture
    #[arg(long, default_value_t = 1.0)]
    zoom: f64,

    /// Pause after each page turn in milliseconds
    #[arg(long, default_value_t = 1000)]
    delay_ms: u64,

    /// Center-crop width (0 = unset)
    #[arg(long, default_value_t = 0)]
    crop_width: u32,

    /// Center-crop height (0 = unset)
    #[arg(long, default_value_t = 0)]
    crop_height: u32,

    /// Resize width bound (0 = unset)
    #[arg(long, default_value_t = 0)]
    resize_width: u32,

    /// Resize height bound (0 = unset)
    #[arg(long, default_value_t = 0)]
    resize_height: u32,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum PagingDirection {
    /// Next page is to the right
    Right,
    /// Next page is to the left
    Left,
}

impl From<PagingDirection> for Direction {
    fn from(direction: PagingDirection) -> Self {
        match direction {
            PagingDirection::Right => Direction::ForwardIsRight,
            PagingDirection::Left => Direction::ForwardIsLeft,
        }
    }
}

impl CaptureArgs {
    fn session_config(&self) -> SessionConfig {
        SessionConfig {
            page_range: PageRange::new(self.start, self.end),
            direction: self.direction.into(),
            zoom_factor: self.zoom,
            inter_page_delay_ms: self.delay_ms,
            crop_spec: Dimensions::new(self.crop_width, self.crop_height),
            resize_spec: Dimensions::new(self.resize_width, self.resize_height),
        }
    }
}

impl CommonArgs {
    fn profile(&self) -> ViewerProfile {
        ViewerProfile {
            left_control: self.left_control.clone(),
            right_control: self.right_control.clone(),
            page_label: self.page_label.clone(),
            ..Default::default()
        }
    }

    fn orchestrator_config(&self) -> OrchestratorConfig {
        self.sites
            .iter()
            .fold(
                OrchestratorConfig::builder().batch_size(self.batch_size),
                |builder, site| builder.site(site),
            )
            .build()
    }

    fn sink(&self) -> FileSink {
        match &self.output_dir {
            Some(dir) => FileSink::new(dir),
            None => FileSink::from_env(),
        }
    }
}

async fn connect(common: &CommonArgs) -> anyhow::Result<BrowserController> {
    let controller = match &common.ws_url {
        Some(ws_url) => BrowserController::connect(ws_url)
            .await
            .with_context(|| format!("attaching to {}", ws_url))?,
        None => {
            let mut config = BrowserConfig::builder().headless(common.headless);
            if let Some(path) = &common.chrome_path {
                config = config.chrome_path(path);
            }
            BrowserController::launch(config.build())
                .await
                .context("launching Chrome")?
        }
    };

    if let Some(url) = &common.url {
        controller
            .open(url)
            .await
            .with_context(|| format!("opening {}", url))?;
    }
    Ok(controller)
}

async fn serve(orchestrator: Arc<CaptureOrchestrator>) -> anyhow::Result<()> {
    ProtocolServer::new(orchestrator)
        .run()
        .await
        .context("protocol server failed")
}

async fn capture(orchestrator: Arc<CaptureOrchestrator>, args: CaptureArgs) -> anyhow::Result<()> {
    let mut events = orchestrator.events().subscribe();
    let reporter = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                CaptureEvent::Progress { captured, total } => {
                    info!("Captured {}/{} pages", captured, total)
                }
                CaptureEvent::CaptureError { error } => warn!("{}", error),
                other if other.is_terminal() => break,
                _ => {}
            }
        }
    });

    let mut session = orchestrator
        .start(args.session_config())
        .await
        .context("starting capture")?;

    let outcome = tokio::select! {
        outcome = &mut session => outcome?,
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted, stopping after the current page");
            orchestrator.stop();
            session.await?
        }
    };
    reporter.abort();

    if !outcome.missing_pages.is_empty() {
        warn!("Pages without a frame: {:?}", outcome.missing_pages);
    }
    if let Some(location) = &outcome.location {
        println!("{}", location);
    }
    match outcome.end {
        SessionEnd::Failed(reason) => bail!(reason),
        end => {
            info!("Session {}: {} pages", end.label(), outcome.captured);
            Ok(())
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // stdout carries the protocol; logs go to stderr
    let default_level = if cli.common.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    pagecast::metrics::init();
    info!("{} v{} starting", pagecast::NAME, pagecast::VERSION);

    let controller = connect(&cli.common).await?;
    let orchestrator = Arc::new(CaptureOrchestrator::new(
        Arc::new(controller.provider(cli.common.profile())),
        Arc::new(cli.common.sink()),
        Arc::new(controller.keep_alive()),
        cli.common.orchestrator_config(),
    ));

    let result = match cli.command {
        Command::Serve => serve(orchestrator).await,
        Command::Capture(args) => capture(orchestrator, args).await,
    };

    controller.close().await.context("closing browser")?;
    result
}

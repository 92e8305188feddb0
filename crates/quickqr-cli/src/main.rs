//! QuickQR - command-line client for the QuickQR API.
//!
//! Generates QR codes, manages lost & found tags and asks the AI helpers for
//! content. The session token survives between runs; when the server rejects
//! it the command that was interrupted is remembered and `quickqr login`
//! points back to it.

mod commands;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::{debug, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use quickqr_core::auth::{IdentityLogin, LazyWidget, ManualAssertionWidget};
use quickqr_core::navigation::LOGIN_PATH;
use quickqr_core::{
    ApiClient, ApiLog, Config, HistoryNavigator, NavigationController, PendingRedirect,
    SessionStore,
};

/// Log file written when `--log-file` is given
const LOG_FILE_NAME: &str = "quickqr.log";

#[derive(Parser)]
#[command(name = "quickqr", version, about = "QuickQR command-line client")]
struct Cli {
    /// Override the API base URL
    #[arg(long, global = true)]
    api_url: Option<String>,

    /// Also write logs to the cache directory
    #[arg(long, global = true)]
    log_file: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Sign in with email and password
    Login {
        /// Defaults to the last username used
        #[arg(short, long)]
        username: Option<String>,
    },
    /// Sign in with a Google ID token
    LoginGoogle {
        #[arg(long)]
        id_token: String,
    },
    /// Create an account and sign in
    Register {
        #[arg(short, long)]
        email: String,
    },
    /// Forget the stored session
    Logout,
    /// Show session and configuration
    Status,
    /// Generate QR codes
    #[command(subcommand)]
    Qr(QrCommand),
    /// Upload a PDF for a PDF-link QR code
    UploadPdf { file: PathBuf },
    /// AI content helpers
    #[command(subcommand)]
    Ai(AiCommand),
    /// Lost & found tags
    #[command(subcommand)]
    LostFound(LostFoundCommand),
    /// Local API call log
    #[command(subcommand)]
    Logs(LogsCommand),
    /// Check that the API is reachable
    Health,
}

#[derive(Subcommand)]
enum QrCommand {
    /// Plain text or URL
    Text {
        content: String,
        #[command(flatten)]
        style: QrStyle,
    },
    /// Contact card
    Contact {
        #[arg(long)]
        name: String,
        #[arg(long)]
        phone: String,
        #[arg(long)]
        address: String,
        #[arg(long)]
        email: Option<String>,
        #[arg(long)]
        company: Option<String>,
        #[arg(long)]
        website: Option<String>,
        #[command(flatten)]
        style: QrStyle,
    },
    /// Link to an uploaded PDF
    PdfLink {
        /// Path returned by `upload-pdf`
        pdf_path: String,
        #[command(flatten)]
        style: QrStyle,
    },
}

#[derive(Args)]
struct QrStyle {
    /// Error correction level (L, M, Q, H)
    #[arg(long, default_value = "M")]
    error_correction: String,
    #[arg(long)]
    size: Option<u32>,
    /// Write the PNG image here
    #[arg(short, long)]
    out: Option<PathBuf>,
}

#[derive(Subcommand)]
enum AiCommand {
    /// Suggestions for QR content
    Suggest {
        content: String,
        /// QR type, e.g. url, text, contact
        #[arg(long, default_value = "text")]
        qr_type: String,
        #[arg(long)]
        context: Option<String>,
    },
    /// Generate content from a prompt
    Generate {
        prompt: String,
        #[arg(long)]
        include_images: bool,
    },
}

#[derive(Subcommand)]
enum LostFoundCommand {
    /// Create a new tag
    Generate {
        name: String,
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
    /// Fill in the owner details of a tag
    Update(UpdateArgs),
    /// Show what a scan of the tag shows
    Get {
        qr_id: String,
        #[arg(long)]
        user_id: String,
    },
    /// Report a tag as found
    MarkFound {
        qr_id: String,
        #[arg(long)]
        user_id: String,
        #[arg(long)]
        location: String,
        /// RFC 3339 timestamp, defaults to now
        #[arg(long)]
        date: Option<String>,
    },
    /// List a user's tags
    List {
        #[arg(long)]
        user_id: String,
    },
}

#[derive(Args)]
struct UpdateArgs {
    qr_id: String,
    #[arg(long)]
    user_id: Option<String>,
    #[arg(long)]
    first_name: String,
    #[arg(long)]
    last_name: String,
    #[arg(long, default_value = "")]
    phone: String,
    #[arg(long, default_value = "")]
    email: String,
    #[arg(long, default_value = "")]
    address: String,
    #[arg(long, default_value = "")]
    address_location: String,
    #[arg(long, default_value = "")]
    description: String,
    #[arg(long, default_value = "")]
    item_type: String,
    /// Field hidden from finders (repeatable)
    #[arg(long = "hide")]
    hidden: Vec<String>,
    /// Lock the details against further edits
    #[arg(long)]
    lock: bool,
}

#[derive(Subcommand)]
enum LogsCommand {
    Show {
        /// Only the last N entries
        #[arg(short, long)]
        limit: Option<usize>,
    },
    Clear,
}

impl Command {
    /// Route the command stands for; protected commands gate on it
    fn route(&self) -> &'static str {
        match self {
            Command::Login { .. } | Command::LoginGoogle { .. } | Command::Register { .. } => {
                LOGIN_PATH
            }
            Command::Qr(QrCommand::Text { .. }) => "/generator",
            Command::Qr(QrCommand::Contact { .. }) => "/contact-qr",
            Command::Qr(QrCommand::PdfLink { .. }) | Command::UploadPdf { .. } => "/pdf-designer",
            Command::Ai(_) => "/ai-content",
            Command::LostFound(_) => "/lost-and-found",
            Command::Logout | Command::Status | Command::Logs(_) | Command::Health => "/",
        }
    }

    fn is_protected(&self) -> bool {
        matches!(
            self,
            Command::Qr(_) | Command::UploadPdf { .. } | Command::Ai(_) | Command::LostFound(_)
        )
    }
}

/// Everything a command needs, wired together
pub struct App {
    pub config: Config,
    pub session: Arc<SessionStore>,
    pub redirects: Arc<PendingRedirect>,
    pub navigator: Arc<HistoryNavigator>,
    pub controller: Arc<NavigationController>,
    pub api: ApiClient,
    pub identity: Arc<IdentityLogin>,
    pub identity_widget: Arc<ManualAssertionWidget>,
}

impl App {
    fn build(config: Config, route: &str) -> Result<Self> {
        let storage = config.open_storage()?;
        let session = Arc::new(SessionStore::new(storage.clone()));
        session.restore();

        let redirects = Arc::new(PendingRedirect::new(storage));
        let navigator = Arc::new(HistoryNavigator::new(route));
        let controller =
            NavigationController::install(session.clone(), redirects.clone(), navigator.clone());

        let api_log = Arc::new(ApiLog::new(config.open_log_storage(), "API"));
        let api = ApiClient::with_timeout(
            &config.api_base_url,
            session.clone(),
            api_log,
            Duration::from_secs(config.request_timeout_secs),
        )?;
        api.set_unauthorized_handler(controller.clone());

        let identity_widget = Arc::new(ManualAssertionWidget::new());
        let identity = IdentityLogin::new(
            api.clone(),
            LazyWidget::ready(identity_widget.clone()),
            config.google_client_id.clone().unwrap_or_default(),
        );

        Ok(Self {
            config,
            session,
            redirects,
            navigator,
            controller,
            api,
            identity,
            identity_widget,
        })
    }
}

/// Initialize the tracing subscriber for logging.
///
/// Use RUST_LOG to control the level (e.g. RUST_LOG=quickqr_core=debug).
fn init_tracing(log_dir: Option<PathBuf>) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::never(dir, LOG_FILE_NAME);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_writer(writer).with_ansi(false)),
                Some(guard),
            )
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();

    guard
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let mut config = Config::load().context("Failed to load configuration")?;
    if let Some(url) = cli.api_url.as_deref() {
        config.api_base_url = url.trim_end_matches('/').to_string();
    }

    let log_dir = if cli.log_file {
        let dir = config.cache_dir()?;
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;
        Some(dir)
    } else {
        None
    };
    let _guard = init_tracing(log_dir);
    info!(api = %config.api_base_url, "QuickQR starting");

    let route = cli.command.route();
    let app = App::build(config, route)?;

    if cli.command.is_protected() && !app.controller.require_auth(route) {
        debug!(route, "Command requires a session");
        anyhow::bail!("Not signed in. Run `quickqr login` first.");
    }

    commands::run(&app, cli.command).await
}

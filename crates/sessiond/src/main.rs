use std::env;
use std::fs;
use std::io::{self, IsTerminal, Write};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use clap::{Args, CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};
use tracing_subscriber::filter::LevelFilter;

use sessiond::api::{self, AppState, StdioEndpoint};
use sessiond::auth::{AuthConfig, AuthState};
use sessiond::container::{self, ContainerRuntime};
use sessiond::error_log::ErrorLog;
use sessiond::session::{LifecycleConfig, SessionLifecycle, SessionLog, SessionRegistry};

const APP_NAME: &str = "sessiond";
const ENV_PREFIX: &str = "SESSIOND";

fn main() {
    if let Err(err) = try_main() {
        let _ = writeln!(io::stderr(), "{err:?}");
        std::process::exit(1);
    }
}

#[tokio::main]
async fn async_main(ctx: RuntimeContext, cmd: ServeCommand) -> Result<()> {
    handle_serve(&ctx, cmd).await
}

fn try_main() -> Result<()> {
    let cli = Cli::parse();

    let ctx = RuntimeContext::new(cli.common.clone())?;
    ctx.init_logging();
    debug!("resolved paths: {:#?}", ctx.paths);

    match cli.command {
        Command::Serve(cmd) => async_main(ctx, cmd),
        Command::Init(cmd) => handle_init(&ctx, cmd),
        Command::Config { command } => handle_config(&ctx, command),
        Command::Token(cmd) => handle_token(&ctx, cmd),
        Command::Completions { shell } => handle_completions(shell),
    }
}

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "sessiond - container-backed session lifecycle server.",
    propagate_version = true
)]
struct Cli {
    #[command(flatten)]
    common: CommonOpts,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Args)]
struct CommonOpts {
    /// Override the config file path
    #[arg(long, value_name = "PATH", global = true)]
    config: Option<PathBuf>,
    /// Log errors only
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,
    /// Raise log verbosity (-v debug, -vv trace)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, global = true)]
    verbose: u8,
    /// JSON log lines; JSON output for `config show`
    #[arg(long, global = true, conflicts_with = "yaml")]
    json: bool,
    /// YAML output for `config show`
    #[arg(long, global = true)]
    yaml: bool,
    /// Disable ANSI colors in log output
    #[arg(long = "no-color", global = true)]
    no_color: bool,
    /// Do not change anything on disk
    #[arg(long = "dry-run", global = true)]
    dry_run: bool,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Start the HTTP API server
    Serve(ServeCommand),
    /// Create config directories and default files
    Init(InitCommand),
    /// Inspect and manage configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
    /// Mint a bearer token signed with the configured secret
    Token(TokenCommand),
    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Debug, Clone, Args)]
struct ServeCommand {
    /// Host address to bind to (overrides server.host)
    #[arg(long)]
    host: Option<String>,
    /// Port to listen on (overrides server.port)
    #[arg(short, long)]
    port: Option<u16>,
    /// Session container image (overrides container.image)
    #[arg(long)]
    image: Option<String>,
}

#[derive(Debug, Clone, Args)]
struct InitCommand {
    /// Recreate configuration even if it already exists
    #[arg(long = "force")]
    force: bool,
}

#[derive(Debug, Subcommand)]
enum ConfigCommand {
    /// Output the effective configuration
    Show,
    /// Print the resolved config file path
    Path,
    /// Regenerate the default configuration file
    Reset,
}

#[derive(Debug, Clone, Args)]
struct TokenCommand {
    /// Subject claim
    #[arg(long)]
    sub: String,
    /// Lifetime in seconds; the token never expires when omitted
    #[arg(long, value_name = "SECONDS")]
    ttl: Option<i64>,
}

#[derive(Debug, Clone)]
struct RuntimeContext {
    common: CommonOpts,
    paths: AppPaths,
    config: AppConfig,
}

impl RuntimeContext {
    fn new(common: CommonOpts) -> Result<Self> {
        let mut paths = AppPaths::discover(common.config.clone())?;
        let config = load_or_init_config(&mut paths, &common)?;
        let paths = paths.apply_overrides(&config)?;
        Ok(Self {
            common,
            paths,
            config,
        })
    }

    fn init_logging(&self) {
        use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

        let level = self.effective_log_level();
        let env_filter = match EnvFilter::try_from_default_env() {
            Ok(filter) if !self.common.quiet => filter,
            _ => EnvFilter::new(format!("{APP_NAME}={level},tower_http={level}")),
        };

        // `try_init` also routes `log` records from dependencies into tracing.
        let registry = tracing_subscriber::registry().with(env_filter);
        if self.common.json {
            registry
                .with(tracing_subscriber::fmt::layer().json().with_writer(io::stderr))
                .try_init()
                .ok();
        } else {
            let ansi = !self.common.no_color
                && env::var_os("NO_COLOR").is_none()
                && io::stderr().is_terminal();
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_writer(io::stderr)
                        .with_ansi(ansi),
                )
                .try_init()
                .ok();
        }
    }

    fn effective_log_level(&self) -> LevelFilter {
        if self.common.quiet {
            return LevelFilter::ERROR;
        }
        match self.common.verbose {
            0 => self
                .config
                .logging
                .level
                .parse()
                .unwrap_or(LevelFilter::INFO),
            1 => LevelFilter::DEBUG,
            _ => LevelFilter::TRACE,
        }
    }

    fn ensure_directories(&self) -> Result<()> {
        if self.common.dry_run {
            info!(
                "dry-run: would ensure sessions dir {}",
                self.paths.sessions_dir.display()
            );
            return Ok(());
        }

        fs::create_dir_all(&self.paths.sessions_dir).with_context(|| {
            format!(
                "creating sessions directory {}",
                self.paths.sessions_dir.display()
            )
        })?;
        if let Some(parent) = self.paths.error_log.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating error log directory {}", parent.display()))?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct AppPaths {
    config_file: PathBuf,
    sessions_dir: PathBuf,
    error_log: PathBuf,
}

impl AppPaths {
    fn discover(override_path: Option<PathBuf>) -> Result<Self> {
        let config_file = match override_path {
            Some(path) => {
                let expanded = expand_str_path(&path.to_string_lossy())?;
                if expanded.is_dir() {
                    expanded.join("config.toml")
                } else {
                    expanded
                }
            }
            None => app_dir(dirs::config_dir(), "config")?.join("config.toml"),
        };

        if config_file.parent().is_none() {
            return Err(anyhow!("invalid config file path: {config_file:?}"));
        }

        let data_dir = app_dir(dirs::data_dir(), "data")?;

        Ok(Self {
            config_file,
            sessions_dir: data_dir.join("sessions"),
            error_log: data_dir.join("error.log"),
        })
    }

    fn apply_overrides(mut self, cfg: &AppConfig) -> Result<Self> {
        if let Some(ref dir) = cfg.storage.sessions_dir {
            self.sessions_dir = expand_str_path(dir)?;
        }
        if let Some(ref file) = cfg.storage.error_log {
            self.error_log = expand_str_path(file)?;
        }
        Ok(self)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
struct AppConfig {
    logging: LoggingConfig,
    server: ServerConfig,
    container: ContainerSettings,
    storage: StorageConfig,
    auth: AuthConfig,
}

impl AppConfig {
    /// Copy safe to print: literal secrets are masked, `env:` references kept.
    fn redacted(&self) -> Self {
        let mut config = self.clone();
        if let Some(ref secret) = config.auth.jwt_secret
            && !secret.starts_with("env:")
        {
            config.auth.jwt_secret = Some("<redacted>".to_string());
        }
        config
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
struct LoggingConfig {
    level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
struct ServerConfig {
    host: String,
    port: u16,
    /// Host advertised in `stdio-url`
    stdio_host: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            stdio_host: "localhost".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
struct ContainerSettings {
    /// Container runtime type: "docker" or "podman" (auto-detected if not set)
    runtime: Option<container::RuntimeType>,
    /// Custom path to the container runtime binary
    binary: Option<String>,
    /// Image every session container runs
    image: String,
    /// Mount point of the session volume inside the container
    volume_mount: String,
    /// Upper bound for each runtime CLI call
    command_timeout_secs: u64,
    /// Grace period for `stop`; runtime default if not set
    stop_timeout_secs: Option<u32>,
}

impl Default for ContainerSettings {
    fn default() -> Self {
        Self {
            runtime: None,
            binary: None,
            image: "debian:bookworm-slim".to_string(),
            volume_mount: "/workspace".to_string(),
            command_timeout_secs: container::DEFAULT_COMMAND_TIMEOUT.as_secs(),
            stop_timeout_secs: Some(10),
        }
    }
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(default)]
struct StorageConfig {
    /// Transcript directory (default: `<data dir>/sessions`)
    sessions_dir: Option<String>,
    /// Error log file (default: `<data dir>/error.log`)
    error_log: Option<String>,
}

fn handle_init(ctx: &RuntimeContext, cmd: InitCommand) -> Result<()> {
    if ctx.paths.config_file.exists() && !cmd.force {
        return Err(anyhow!(
            "config already exists at {} (use --force to overwrite)",
            ctx.paths.config_file.display()
        ));
    }

    if ctx.common.dry_run {
        info!(
            "dry-run: would write default config to {}",
            ctx.paths.config_file.display()
        );
        return Ok(());
    }

    write_default_config(&ctx.paths.config_file)?;
    ctx.ensure_directories()
}

fn handle_config(ctx: &RuntimeContext, command: ConfigCommand) -> Result<()> {
    match command {
        ConfigCommand::Show => {
            let config = ctx.config.redacted();
            if ctx.common.json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&config).context("serializing config to JSON")?
                );
            } else if ctx.common.yaml {
                println!(
                    "{}",
                    serde_yaml::to_string(&config).context("serializing config to YAML")?
                );
            } else {
                println!("{:#?}", config);
            }
            Ok(())
        }
        ConfigCommand::Path => {
            println!("{}", ctx.paths.config_file.display());
            Ok(())
        }
        ConfigCommand::Reset => {
            if ctx.common.dry_run {
                info!(
                    "dry-run: would reset config at {}",
                    ctx.paths.config_file.display()
                );
                return Ok(());
            }
            write_default_config(&ctx.paths.config_file)
        }
    }
}

fn handle_token(ctx: &RuntimeContext, cmd: TokenCommand) -> Result<()> {
    let auth_config = ctx.config.auth.clone();
    auth_config
        .validate()
        .context("Invalid auth configuration")?;

    if let Some(ttl) = cmd.ttl
        && ttl <= 0
    {
        return Err(anyhow!("--ttl must be positive"));
    }

    let auth_state = AuthState::new(auth_config);
    let token = auth_state
        .generate_token(&cmd.sub, cmd.ttl.map(chrono::Duration::seconds))
        .context("signing token")?;
    println!("{token}");
    Ok(())
}

fn handle_completions(shell: Shell) -> Result<()> {
    let mut cmd = Cli::command();
    clap_complete::generate(shell, &mut cmd, APP_NAME, &mut io::stdout());
    Ok(())
}

async fn handle_serve(ctx: &RuntimeContext, cmd: ServeCommand) -> Result<()> {
    info!("Starting session server...");
    ctx.ensure_directories()?;

    let auth_config = ctx.config.auth.clone();
    auth_config
        .validate()
        .context("Invalid auth configuration")?;
    let auth_state = AuthState::new(auth_config);

    let settings = &ctx.config.container;
    let runtime = match (&settings.runtime, &settings.binary) {
        (Some(rt), Some(binary)) => ContainerRuntime::with_binary(*rt, binary.clone()),
        (Some(rt), None) => ContainerRuntime::with_type(*rt),
        (None, _) => ContainerRuntime::new(),
    }
    .command_timeout(Duration::from_secs(settings.command_timeout_secs));

    match runtime.health_check().await {
        Ok(_) => info!(
            "Container runtime ({}) is available",
            runtime.runtime_type()
        ),
        Err(e) => warn!(
            "Container runtime health check failed: {}. Container operations may fail.",
            e
        ),
    }

    let image = cmd.image.unwrap_or_else(|| settings.image.clone());
    match runtime.image_exists(&image).await {
        Ok(true) => info!("Session image: {}", image),
        Ok(false) => warn!(
            "Session image {} not found locally; the runtime will try to pull it",
            image
        ),
        Err(e) => warn!("Could not inspect session image {}: {}", image, e),
    }

    let log = Arc::new(SessionLog::new(&ctx.paths.sessions_dir));
    let restored = log
        .restore()
        .await
        .context("restoring session transcripts")?;
    info!(
        "Sessions directory: {} ({} restored)",
        ctx.paths.sessions_dir.display(),
        restored
    );

    let lifecycle = SessionLifecycle::new(
        Arc::new(runtime),
        SessionRegistry::new(log),
        LifecycleConfig {
            image,
            volume_mount: settings.volume_mount.clone(),
            stop_timeout_secs: settings.stop_timeout_secs,
        },
    );

    let error_log = Arc::new(ErrorLog::new(&ctx.paths.error_log));
    info!("Error log: {}", error_log.path().display());

    let host = cmd.host.unwrap_or_else(|| ctx.config.server.host.clone());
    let port = cmd.port.unwrap_or(ctx.config.server.port);

    let state = AppState::new(
        Arc::new(lifecycle),
        auth_state,
        error_log,
        StdioEndpoint {
            host: ctx.config.server.stdio_host.clone(),
            port,
        },
    );

    let app = api::create_router(state);

    let addr: SocketAddr = format!("{}:{}", host, port)
        .parse()
        .context("invalid address")?;

    info!("Listening on http://{}", addr);

    let listener = TcpListener::bind(addr)
        .await
        .context("binding to address")?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("running server")?;

    info!("Shutdown complete");
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM. Session containers keep running.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, draining connections...");
}

fn load_or_init_config(paths: &mut AppPaths, common: &CommonOpts) -> Result<AppConfig> {
    if !paths.config_file.exists() {
        if common.dry_run {
            info!(
                "dry-run: would create default config at {}",
                paths.config_file.display()
            );
        } else {
            write_default_config(&paths.config_file)?;
        }
    }

    let defaults = ServerConfig::default();
    let built = Config::builder()
        .set_default("logging.level", "info")?
        .set_default("server.host", defaults.host)?
        .set_default("server.port", i64::from(defaults.port))?
        .set_default("server.stdio_host", defaults.stdio_host)?
        .add_source(
            File::from(paths.config_file.as_path())
                .format(FileFormat::Toml)
                .required(false),
        )
        .add_source(Environment::with_prefix(ENV_PREFIX).separator("__"))
        .build()?;

    let config: AppConfig = built.try_deserialize()?;
    Ok(config)
}

fn write_default_config(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating config directory {parent:?}"))?;
    }

    let mut config = AppConfig::default();
    config.auth.jwt_secret = Some(AuthConfig::generate_jwt_secret());

    let toml = toml::to_string_pretty(&config).context("serializing default config to TOML")?;
    let mut body = default_config_header(path);
    body.push_str(&toml);
    fs::write(path, body).with_context(|| format!("writing config file to {}", path.display()))
}

fn default_config_header(path: &Path) -> String {
    let mut buffer = String::new();
    buffer.push_str("# Configuration for ");
    buffer.push_str(APP_NAME);
    buffer.push('\n');
    buffer.push_str("# File: ");
    buffer.push_str(&path.display().to_string());
    buffer.push('\n');
    buffer.push_str("# auth.jwt_secret was generated for this install; keep it private.\n");
    buffer.push('\n');
    buffer
}

fn expand_str_path(text: &str) -> Result<PathBuf> {
    let expanded = shellexpand::full(text).context("expanding path")?;
    Ok(PathBuf::from(expanded.to_string()))
}

/// `<base>/sessiond`, where `base` is a platform directory from `dirs`
/// (honors `XDG_CONFIG_HOME` / `XDG_DATA_HOME` on Linux).
fn app_dir(base: Option<PathBuf>, kind: &str) -> Result<PathBuf> {
    base.map(|dir| dir.join(APP_NAME))
        .ok_or_else(|| anyhow!("unable to determine {kind} directory"))
}

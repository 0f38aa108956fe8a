//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{net::SocketAddr, path::PathBuf, str::FromStr, time::Duration};

use clap::{Args, Parser, Subcommand, ValueHint, builder::BoolishValueParser};
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "anteprima";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 3080;
const DEFAULT_GRACEFUL_SHUTDOWN_SECS: u64 = 30;
const DEFAULT_DEBOUNCE_MS: u64 = 1000;
const DEFAULT_LINK_SCHEME: &str = "vscode-resource";
pub(crate) const DEFAULT_BUILDER_PATH: &str = "sphinx-build";
pub(crate) const DEFAULT_CONVERTER_PATH: &str = "rst2html5";
pub(crate) const DEFAULT_LINTER_PATH: &str = "doc8";
pub(crate) const DEFAULT_SCRATCH_DIR: &str = "/tmp/anteprima-scratch";

/// Command-line arguments for the anteprima binary.
#[derive(Debug, Parser)]
#[command(name = "anteprima", version, about = "Preview build service for reStructuredText projects")]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "ANTEPRIMA_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the preview HTTP service.
    Serve(Box<ServeArgs>),
    /// Build one document's preview and write the HTML to stdout or a file.
    Build(BuildArgs),
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Clone)]
pub struct BuildArgs {
    #[command(flatten)]
    pub overrides: PreviewOverrides,

    /// Document to render.
    #[arg(value_name = "DOCUMENT", value_hint = ValueHint::FilePath)]
    pub document: PathBuf,

    /// Write the resulting HTML here instead of stdout.
    #[arg(long, short = 'o', value_name = "FILE", value_hint = ValueHint::FilePath)]
    pub output: Option<PathBuf>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct PreviewOverrides {
    /// Override the Sphinx builder executable used for project builds.
    #[arg(long = "preview-builder-path", value_name = "PATH")]
    pub builder_path: Option<PathBuf>,

    /// Override the docutils converter executable used for standalone files.
    #[arg(long = "preview-converter-path", value_name = "PATH")]
    pub converter_path: Option<PathBuf>,

    /// Route builds through this interpreter (`<interpreter> -m sphinx`).
    #[arg(long = "preview-interpreter", value_name = "PATH")]
    pub interpreter: Option<PathBuf>,

    /// Project configuration directory; an empty value forces the direct
    /// converter, omitting it enables conf.py discovery.
    #[arg(long = "preview-conf-dir", value_name = "PATH")]
    pub conf_dir: Option<String>,

    /// Override where project builds write their HTML.
    #[arg(long = "preview-output-dir", value_name = "PATH")]
    pub output_dir: Option<PathBuf>,

    /// Override the request debounce delay in milliseconds.
    #[arg(long = "preview-debounce-ms", value_name = "MILLIS")]
    pub debounce_ms: Option<u64>,

    /// Override the URI scheme used when rewriting relative links.
    #[arg(long = "preview-link-scheme", value_name = "SCHEME")]
    pub link_scheme: Option<String>,

    /// Toggle rewriting of relative links in generated HTML.
    #[arg(
        long = "preview-fix-links",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub fix_links: Option<bool>,

    /// Override the scratch directory used for standalone conversions.
    #[arg(long = "preview-scratch-dir", value_name = "PATH")]
    pub scratch_dir: Option<PathBuf>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    #[command(flatten)]
    pub preview: PreviewOverrides,

    /// Override the listener host.
    #[arg(long = "server-host", value_name = "HOST")]
    pub server_host: Option<String>,

    /// Override the listener port.
    #[arg(long = "server-port", value_name = "PORT")]
    pub server_port: Option<u16>,

    /// Override the graceful shutdown timeout.
    #[arg(long = "server-graceful-shutdown-seconds", value_name = "SECONDS")]
    pub server_graceful_shutdown_seconds: Option<u64>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,

    /// Override the external linter executable.
    #[arg(long = "lint-program", value_name = "PATH")]
    pub lint_program: Option<PathBuf>,

    /// Toggle the lint endpoint.
    #[arg(
        long = "lint-enabled",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub lint_enabled: Option<bool>,

    /// Restrict /resource serving to this directory.
    #[arg(long = "server-project-root", value_name = "PATH")]
    pub project_root: Option<PathBuf>,
}

/// Fully-resolved deployment settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub preview: PreviewSettings,
    pub lint: LintSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub bind_addr: SocketAddr,
    pub graceful_shutdown: Duration,
    /// Directory /resource serving is confined to; falls back to the
    /// project configuration directory when unset.
    pub project_root: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct PreviewSettings {
    pub builder_path: PathBuf,
    pub converter_path: PathBuf,
    pub interpreter: Option<PathBuf>,
    /// `None` enables conf.py discovery; an empty path forces the direct
    /// converter.
    pub conf_dir: Option<PathBuf>,
    pub output_dir: Option<PathBuf>,
    pub debounce: Duration,
    pub link_scheme: String,
    pub fix_links: bool,
    pub scratch_dir: PathBuf,
}

impl Default for PreviewSettings {
    fn default() -> Self {
        Self {
            builder_path: PathBuf::from(DEFAULT_BUILDER_PATH),
            converter_path: PathBuf::from(DEFAULT_CONVERTER_PATH),
            interpreter: None,
            conf_dir: None,
            output_dir: None,
            debounce: Duration::from_millis(DEFAULT_DEBOUNCE_MS),
            link_scheme: DEFAULT_LINK_SCHEME.to_string(),
            fix_links: true,
            scratch_dir: PathBuf::from(DEFAULT_SCRATCH_DIR),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LintSettings {
    pub program: PathBuf,
    pub enabled: bool,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(
        Environment::with_prefix("ANTEPRIMA")
            .prefix_separator("_")
            .separator("__"),
    );

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Serve(args)) => raw.apply_serve_overrides(&args.overrides),
        Some(Command::Build(args)) => raw.apply_preview_overrides(&args.overrides),
        None => raw.apply_serve_overrides(&ServeOverrides::default()),
    }

    Settings::from_raw(raw)
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    preview: RawPreviewSettings,
    lint: RawLintSettings,
}

impl RawSettings {
    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        if let Some(host) = overrides.server_host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(port) = overrides.server_port {
            self.server.port = Some(port);
        }
        if let Some(seconds) = overrides.server_graceful_shutdown_seconds {
            self.server.graceful_shutdown_seconds = Some(seconds);
        }
        if let Some(root) = overrides.project_root.as_ref() {
            self.server.project_root = Some(root.clone());
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(program) = overrides.lint_program.as_ref() {
            self.lint.program = Some(program.clone());
        }
        if let Some(enabled) = overrides.lint_enabled {
            self.lint.enabled = Some(enabled);
        }

        self.apply_preview_overrides(&overrides.preview);
    }

    fn apply_preview_overrides(&mut self, overrides: &PreviewOverrides) {
        if let Some(path) = overrides.builder_path.as_ref() {
            self.preview.builder_path = Some(path.clone());
        }
        if let Some(path) = overrides.converter_path.as_ref() {
            self.preview.converter_path = Some(path.clone());
        }
        if let Some(path) = overrides.interpreter.as_ref() {
            self.preview.interpreter = Some(path.clone());
        }
        if let Some(dir) = overrides.conf_dir.as_ref() {
            self.preview.conf_dir = Some(dir.clone());
        }
        if let Some(dir) = overrides.output_dir.as_ref() {
            self.preview.output_dir = Some(dir.clone());
        }
        if let Some(millis) = overrides.debounce_ms {
            self.preview.debounce_ms = Some(millis);
        }
        if let Some(scheme) = overrides.link_scheme.as_ref() {
            self.preview.link_scheme = Some(scheme.clone());
        }
        if let Some(fix_links) = overrides.fix_links {
            self.preview.fix_links = Some(fix_links);
        }
        if let Some(dir) = overrides.scratch_dir.as_ref() {
            self.preview.scratch_dir = Some(dir.clone());
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            preview,
            lint,
        } = raw;

        let server = build_server_settings(server)?;
        let logging = build_logging_settings(logging)?;
        let preview = build_preview_settings(preview)?;
        let lint = build_lint_settings(lint);

        Ok(Self {
            server,
            logging,
            preview,
            lint,
        })
    }
}

fn build_server_settings(server: RawServerSettings) -> Result<ServerSettings, LoadError> {
    let host = server.host.unwrap_or_else(|| DEFAULT_HOST.to_string());

    let port = server.port.unwrap_or(DEFAULT_PORT);
    if port == 0 {
        return Err(LoadError::invalid(
            "server.port",
            "port must be greater than zero",
        ));
    }

    let bind_addr = parse_socket_addr(&host, port)
        .map_err(|reason| LoadError::invalid("server.bind_addr", reason))?;

    let graceful_secs = server
        .graceful_shutdown_seconds
        .unwrap_or(DEFAULT_GRACEFUL_SHUTDOWN_SECS);
    if graceful_secs == 0 {
        return Err(LoadError::invalid(
            "server.graceful_shutdown_seconds",
            "must be greater than zero",
        ));
    }

    Ok(ServerSettings {
        bind_addr,
        graceful_shutdown: Duration::from_secs(graceful_secs),
        project_root: server.project_root,
    })
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_preview_settings(preview: RawPreviewSettings) -> Result<PreviewSettings, LoadError> {
    let builder_path = preview
        .builder_path
        .unwrap_or_else(|| PathBuf::from(DEFAULT_BUILDER_PATH));
    if builder_path.as_os_str().is_empty() {
        return Err(LoadError::invalid(
            "preview.builder_path",
            "path must not be empty",
        ));
    }

    let converter_path = preview
        .converter_path
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONVERTER_PATH));
    if converter_path.as_os_str().is_empty() {
        return Err(LoadError::invalid(
            "preview.converter_path",
            "path must not be empty",
        ));
    }

    let link_scheme = preview
        .link_scheme
        .unwrap_or_else(|| DEFAULT_LINK_SCHEME.to_string());
    if link_scheme.is_empty() {
        return Err(LoadError::invalid(
            "preview.link_scheme",
            "scheme must not be empty",
        ));
    }

    let scratch_dir = preview
        .scratch_dir
        .unwrap_or_else(|| PathBuf::from(DEFAULT_SCRATCH_DIR));
    if scratch_dir.as_os_str().is_empty() {
        return Err(LoadError::invalid(
            "preview.scratch_dir",
            "path must not be empty",
        ));
    }

    Ok(PreviewSettings {
        builder_path,
        converter_path,
        interpreter: preview.interpreter,
        conf_dir: preview.conf_dir.map(PathBuf::from),
        output_dir: preview.output_dir,
        debounce: Duration::from_millis(preview.debounce_ms.unwrap_or(DEFAULT_DEBOUNCE_MS)),
        link_scheme,
        fix_links: preview.fix_links.unwrap_or(true),
        scratch_dir,
    })
}

fn build_lint_settings(lint: RawLintSettings) -> LintSettings {
    LintSettings {
        program: lint
            .program
            .unwrap_or_else(|| PathBuf::from(DEFAULT_LINTER_PATH)),
        enabled: lint.enabled.unwrap_or(true),
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    port: Option<u16>,
    graceful_shutdown_seconds: Option<u64>,
    project_root: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawPreviewSettings {
    builder_path: Option<PathBuf>,
    converter_path: Option<PathBuf>,
    interpreter: Option<PathBuf>,
    conf_dir: Option<String>,
    output_dir: Option<PathBuf>,
    debounce_ms: Option<u64>,
    link_scheme: Option<String>,
    fix_links: Option<bool>,
    scratch_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLintSettings {
    program: Option<PathBuf>,
    enabled: Option<bool>,
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}

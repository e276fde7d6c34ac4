//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{
    collections::BTreeMap,
    net::SocketAddr,
    path::PathBuf,
    str::FromStr,
    time::Duration,
};

use clap::{Args, Parser, Subcommand, ValueHint, builder::BoolishValueParser};
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

use crate::{
    application::context::DEFAULT_DOCS_URL,
    domain::{content_type::ContentType, encoding::ContentEncoding},
};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "tessera";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 3000;
const DEFAULT_GRACEFUL_SHUTDOWN_SECS: u64 = 30;
const DEFAULT_ASSET_ROOT: &str = "public";
const DEFAULT_MAX_FILES: u64 = 10;
const DEFAULT_ALLOWED_EXTENSIONS: [&str; 3] = ["css", "js", "html"];
const DEFAULT_MAX_AGE_SECS: u64 = 1800;
const DEFAULT_ENCODINGS: [ContentEncoding; 3] = [
    ContentEncoding::Br,
    ContentEncoding::Gzip,
    ContentEncoding::Deflate,
];
const DEFAULT_ENCODE_LEVEL: u32 = 9;
const DEFAULT_CHARSET: &str = "utf-8";
const DEFAULT_CACHE_ENTRY_LIMIT: u64 = 512;
const DEFAULT_TEMPLATE_SCRIPT_TYPES: [&str; 2] = ["text/template", "text/x-handlebars-template"];
const DEFAULT_DYNAMIC_TAGS: [&str; 2] = ["mfunc", "mclude"];

/// Command-line arguments for the tessera binary.
#[derive(Debug, Parser)]
#[command(
    name = "tessera",
    version,
    about = "Combine, minify and serve CSS/JS/HTML assets"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "TESSERA_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the asset HTTP service.
    Serve(Box<ServeArgs>),
    /// Combine and minify files once, writing the artifact to stdout or a file.
    Build(BuildArgs),
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct LoggingOverrides {
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
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    #[command(flatten)]
    pub logging: LoggingOverrides,

    /// Override the listener host.
    #[arg(long = "server-host", value_name = "HOST")]
    pub server_host: Option<String>,

    /// Override the listener port.
    #[arg(long = "server-port", value_name = "PORT")]
    pub server_port: Option<u16>,

    /// Override the graceful shutdown timeout.
    #[arg(long = "server-graceful-shutdown-seconds", value_name = "SECONDS")]
    pub server_graceful_shutdown_seconds: Option<u64>,

    /// Override the directory requested files are resolved against.
    #[arg(long = "assets-root", value_name = "PATH", value_hint = ValueHint::DirPath)]
    pub assets_root: Option<PathBuf>,

    /// Serve annotated, unminified output and disable client caching.
    #[arg(
        long = "minify-debug",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub minify_debug: Option<bool>,

    /// Override the client cache lifetime.
    #[arg(long = "minify-max-age", value_name = "SECONDS")]
    pub minify_max_age: Option<u64>,

    /// Toggle the in-process artifact store.
    #[arg(
        long = "cache-enabled",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub cache_enabled: Option<bool>,

    /// Override the number of artifacts kept in memory.
    #[arg(long = "cache-entry-limit", value_name = "COUNT")]
    pub cache_entry_limit: Option<u64>,
}

#[derive(Debug, Args, Clone)]
pub struct BuildArgs {
    #[command(flatten)]
    pub logging: LoggingOverrides,

    /// Content type of the inputs (css|js|html); guessed from the first file when omitted.
    #[arg(long = "type", value_name = "TYPE")]
    pub content_type: Option<String>,

    /// Annotate each source and skip minification.
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub debug: bool,

    /// Write the artifact here instead of stdout.
    #[arg(long, short = 'o', value_name = "FILE", value_hint = ValueHint::FilePath)]
    pub output: Option<PathBuf>,

    /// Files to combine, in order.
    #[arg(value_name = "FILE", value_hint = ValueHint::FilePath, required = true)]
    pub files: Vec<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub assets: AssetSettings,
    pub minify: MinifySettings,
    pub html: HtmlSettings,
    pub cache: CacheSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub addr: SocketAddr,
    pub graceful_shutdown: Duration,
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
pub struct AssetSettings {
    pub root: PathBuf,
    pub max_files: usize,
    pub allowed_extensions: Vec<String>,
    /// Named file lists served under `/g/{name}`, relative to `root`.
    pub groups: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct MinifySettings {
    pub max_age: u64,
    pub public: bool,
    pub encode: bool,
    pub encodings: Vec<ContentEncoding>,
    pub forced_encoding: Option<ContentEncoding>,
    pub encode_level: u32,
    pub debug: bool,
    pub bubble_css_imports: bool,
    pub process_css_imports: bool,
    pub disable_304: bool,
    pub charset: Option<String>,
    pub docs_url: String,
    /// Default minifier command per content type; types without one pass through.
    pub external: BTreeMap<ContentType, ExternalCommand>,
}

#[derive(Debug, Clone)]
pub struct HtmlSettings {
    pub strip_crlf: bool,
    pub break_before_attributes: bool,
    pub ignored_comments: Vec<String>,
    pub template_script_types: Vec<String>,
    pub dynamic_tags: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub enabled: bool,
    pub entry_limit: usize,
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

pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(
        Environment::with_prefix("TESSERA")
            .separator("__")
            .list_separator(",")
            .with_list_parse_key("assets.allowed_extensions")
            .with_list_parse_key("minify.encodings")
            .try_parsing(true),
    );

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Serve(args)) => raw.apply_serve_overrides(&args.overrides),
        Some(Command::Build(args)) => raw.apply_build_overrides(args),
        None => raw.apply_serve_overrides(&ServeOverrides::default()),
    }

    Settings::from_raw(raw)
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    assets: RawAssetSettings,
    minify: RawMinifySettings,
    html: RawHtmlSettings,
    cache: RawCacheSettings,
}

impl RawSettings {
    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        self.apply_logging_overrides(&overrides.logging);
        if let Some(host) = overrides.server_host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(port) = overrides.server_port {
            self.server.port = Some(port);
        }
        if let Some(seconds) = overrides.server_graceful_shutdown_seconds {
            self.server.graceful_shutdown_seconds = Some(seconds);
        }
        if let Some(root) = overrides.assets_root.as_ref() {
            self.assets.root = Some(root.clone());
        }
        if let Some(debug) = overrides.minify_debug {
            self.minify.debug = Some(debug);
        }
        if let Some(max_age) = overrides.minify_max_age {
            self.minify.max_age = Some(max_age);
        }
        if let Some(enabled) = overrides.cache_enabled {
            self.cache.enabled = Some(enabled);
        }
        if let Some(limit) = overrides.cache_entry_limit {
            self.cache.entry_limit = Some(limit);
        }
    }

    fn apply_build_overrides(&mut self, args: &BuildArgs) {
        self.apply_logging_overrides(&args.logging);
        if args.debug {
            self.minify.debug = Some(true);
        }
    }

    fn apply_logging_overrides(&mut self, overrides: &LoggingOverrides) {
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            assets,
            minify,
            html,
            cache,
        } = raw;

        let server = build_server_settings(server)?;
        let logging = build_logging_settings(logging)?;
        let assets = build_asset_settings(assets)?;
        let minify = build_minify_settings(minify)?;
        let html = build_html_settings(html);
        let cache = build_cache_settings(cache)?;

        Ok(Self {
            server,
            logging,
            assets,
            minify,
            html,
            cache,
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

    let addr = parse_socket_addr(&host, port)
        .map_err(|reason| LoadError::invalid("server.addr", reason))?;

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
        addr,
        graceful_shutdown: Duration::from_secs(graceful_secs),
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

fn build_asset_settings(assets: RawAssetSettings) -> Result<AssetSettings, LoadError> {
    let root = assets
        .root
        .unwrap_or_else(|| PathBuf::from(DEFAULT_ASSET_ROOT));
    if root.as_os_str().is_empty() {
        return Err(LoadError::invalid("assets.root", "path must not be empty"));
    }

    let max_files = non_zero_usize(
        assets.max_files.unwrap_or(DEFAULT_MAX_FILES),
        "assets.max_files",
    )?;

    let allowed_extensions: Vec<String> = assets
        .allowed_extensions
        .unwrap_or_else(|| DEFAULT_ALLOWED_EXTENSIONS.map(String::from).to_vec())
        .into_iter()
        .map(|ext| ext.trim().trim_start_matches('.').to_ascii_lowercase())
        .filter(|ext| !ext.is_empty())
        .collect();
    if allowed_extensions.is_empty() {
        return Err(LoadError::invalid(
            "assets.allowed_extensions",
            "at least one extension is required",
        ));
    }
    if let Some(ext) = allowed_extensions
        .iter()
        .find(|ext| ContentType::from_path(std::path::Path::new(&format!("x.{ext}"))).is_none())
    {
        return Err(LoadError::invalid(
            "assets.allowed_extensions",
            format!("`{ext}` is not a css, js or html extension"),
        ));
    }

    let groups = assets.groups.unwrap_or_default();
    for (name, files) in &groups {
        if files.is_empty() {
            return Err(LoadError::invalid(
                "assets.groups",
                format!("group `{name}` has no files"),
            ));
        }
        if files.len() > max_files {
            return Err(LoadError::invalid(
                "assets.groups",
                format!(
                    "group `{name}` lists {} files, more than assets.max_files ({max_files})",
                    files.len()
                ),
            ));
        }
    }

    Ok(AssetSettings {
        root,
        max_files,
        allowed_extensions,
        groups,
    })
}

fn build_minify_settings(minify: RawMinifySettings) -> Result<MinifySettings, LoadError> {
    let encodings = match minify.encodings {
        Some(values) => values
            .iter()
            .map(|value| parse_encoding(value, "minify.encodings"))
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .filter(|encoding| !encoding.is_identity())
            .collect(),
        None => DEFAULT_ENCODINGS.to_vec(),
    };

    let forced_encoding = minify
        .force_encoding
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(|value| parse_encoding(value, "minify.force_encoding"))
        .transpose()?;

    let encode_level = minify.encode_level.unwrap_or(DEFAULT_ENCODE_LEVEL);
    if encode_level > 9 {
        return Err(LoadError::invalid(
            "minify.encode_level",
            "must be between 0 and 9",
        ));
    }

    let charset = match minify.charset {
        Some(value) => {
            let trimmed = value.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        None => Some(DEFAULT_CHARSET.to_string()),
    };

    let docs_url = minify
        .docs_url
        .map(|value| value.trim().to_string())
        .unwrap_or_else(|| DEFAULT_DOCS_URL.to_string());
    if docs_url.is_empty() {
        return Err(LoadError::invalid("minify.docs_url", "must not be empty"));
    }

    let mut external = BTreeMap::new();
    for (key, command) in minify.external.unwrap_or_default() {
        let content_type = key.parse::<ContentType>().map_err(|err| {
            LoadError::invalid("minify.external", format!("unknown content type: {err}"))
        })?;
        let program = command.program.unwrap_or_default();
        if program.as_os_str().is_empty() {
            return Err(LoadError::invalid(
                "minify.external",
                format!("`{key}` needs a program"),
            ));
        }
        external.insert(
            content_type,
            ExternalCommand {
                program,
                args: command.args.unwrap_or_default(),
            },
        );
    }

    Ok(MinifySettings {
        max_age: minify.max_age.unwrap_or(DEFAULT_MAX_AGE_SECS),
        public: minify.public.unwrap_or(true),
        encode: minify.encode.unwrap_or(true),
        encodings,
        forced_encoding,
        encode_level,
        debug: minify.debug.unwrap_or(false),
        bubble_css_imports: minify.bubble_css_imports.unwrap_or(false),
        process_css_imports: minify.process_css_imports.unwrap_or(false),
        disable_304: minify.disable_304.unwrap_or(false),
        charset,
        docs_url,
        external,
    })
}

fn build_html_settings(html: RawHtmlSettings) -> HtmlSettings {
    HtmlSettings {
        strip_crlf: html.strip_crlf.unwrap_or(false),
        break_before_attributes: html.break_before_attributes.unwrap_or(true),
        ignored_comments: html.ignored_comments.unwrap_or_default(),
        template_script_types: html
            .template_script_types
            .unwrap_or_else(|| DEFAULT_TEMPLATE_SCRIPT_TYPES.map(String::from).to_vec()),
        dynamic_tags: html
            .dynamic_tags
            .unwrap_or_else(|| DEFAULT_DYNAMIC_TAGS.map(String::from).to_vec()),
    }
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    let entry_limit = non_zero_usize(
        cache.entry_limit.unwrap_or(DEFAULT_CACHE_ENTRY_LIMIT),
        "cache.entry_limit",
    )?;

    Ok(CacheSettings {
        enabled: cache.enabled.unwrap_or(true),
        entry_limit,
    })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    port: Option<u16>,
    graceful_shutdown_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawAssetSettings {
    root: Option<PathBuf>,
    max_files: Option<u64>,
    allowed_extensions: Option<Vec<String>>,
    groups: Option<BTreeMap<String, Vec<String>>>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawMinifySettings {
    max_age: Option<u64>,
    public: Option<bool>,
    encode: Option<bool>,
    encodings: Option<Vec<String>>,
    force_encoding: Option<String>,
    encode_level: Option<u32>,
    debug: Option<bool>,
    bubble_css_imports: Option<bool>,
    process_css_imports: Option<bool>,
    disable_304: Option<bool>,
    charset: Option<String>,
    docs_url: Option<String>,
    external: Option<BTreeMap<String, RawExternalCommand>>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawExternalCommand {
    program: Option<PathBuf>,
    args: Option<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawHtmlSettings {
    strip_crlf: Option<bool>,
    break_before_attributes: Option<bool>,
    ignored_comments: Option<Vec<String>>,
    template_script_types: Option<Vec<String>>,
    dynamic_tags: Option<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    enabled: Option<bool>,
    entry_limit: Option<u64>,
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}

fn parse_encoding(value: &str, key: &'static str) -> Result<ContentEncoding, LoadError> {
    value
        .parse::<ContentEncoding>()
        .map_err(|err| LoadError::invalid(key, err.to_string()))
}

fn non_zero_usize(value: u64, key: &'static str) -> Result<usize, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    usize::try_from(value)
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for usize"))
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[cfg(test)]
mod tests;

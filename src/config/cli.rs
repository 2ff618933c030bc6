use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueHint, builder::BoolishValueParser};

/// Command-line arguments for the chartd binary.
#[derive(Debug, Parser)]
#[command(name = "chartd", version, about = "Chart rendering service")]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "CHARTD_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

impl CliArgs {
    /// The explicit subcommand, or `serve` with overrides read from the environment.
    pub fn resolved_command(&self) -> Result<Command, clap::Error> {
        match &self.command {
            Some(command) => Ok(command.clone()),
            None => ServeArgs::from_env().map(|args| Command::Serve(Box::new(args))),
        }
    }
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the HTTP service.
    Serve(Box<ServeArgs>),
    /// Render a single chart spec file through the pipeline.
    Render(Box<RenderArgs>),
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

impl ServeArgs {
    fn from_env() -> Result<Self, clap::Error> {
        #[derive(Parser)]
        struct Bare {
            #[command(flatten)]
            serve: ServeArgs,
        }
        Bare::try_parse_from(["chartd"]).map(|bare| bare.serve)
    }
}

#[derive(Debug, Args, Clone)]
pub struct RenderArgs {
    #[command(flatten)]
    pub render: RenderOverrides,

    #[command(flatten)]
    pub storage: StorageOverrides,

    /// JSON file holding the chart spec.
    #[arg(long, value_name = "FILE", value_hint = ValueHint::FilePath)]
    pub spec: PathBuf,

    /// Chart width in pixels.
    #[arg(long, value_name = "PX")]
    pub width: Option<i64>,

    /// Chart height in pixels.
    #[arg(long, value_name = "PX")]
    pub height: Option<i64>,

    /// Output encoding (png, jpeg, webp, svg, json).
    #[arg(long, value_name = "FORMAT")]
    pub format: Option<String>,

    /// Where to write the rendered bytes; stdout when omitted.
    #[arg(long, value_name = "PATH", value_hint = ValueHint::FilePath)]
    pub output: Option<PathBuf>,

    /// Persist the chart through the configured storage and print its URL.
    #[arg(long, action = clap::ArgAction::SetTrue, conflicts_with = "output")]
    pub persist: bool,
}

#[derive(Debug, Args, Default, Clone)]
pub struct RenderOverrides {
    /// Override the per-render deadline in milliseconds.
    #[arg(long = "render-timeout-ms", value_name = "MS")]
    pub render_timeout_ms: Option<u64>,

    /// Override the number of concurrent engine calls.
    #[arg(long = "render-concurrency", value_name = "COUNT")]
    pub render_concurrency: Option<u64>,

    /// Bound the number of callers waiting for a render slot.
    #[arg(long = "render-max-queue", value_name = "COUNT")]
    pub render_max_queue: Option<u64>,

    /// Override the render engine executable.
    #[arg(long = "render-engine-command", value_name = "PATH")]
    pub engine_command: Option<PathBuf>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct StorageOverrides {
    /// Override the local images directory.
    #[arg(long = "storage-images-dir", value_name = "PATH")]
    pub images_dir: Option<PathBuf>,

    /// Object storage access key.
    #[arg(
        long = "s3-access-key-id",
        env = "AWS_ACCESS_KEY_ID",
        hide_env_values = true,
        value_name = "KEY"
    )]
    pub s3_access_key_id: Option<String>,

    /// Object storage secret key.
    #[arg(
        long = "s3-secret-access-key",
        env = "AWS_SECRET_ACCESS_KEY",
        hide_env_values = true,
        value_name = "SECRET"
    )]
    pub s3_secret_access_key: Option<String>,

    /// Object storage region.
    #[arg(long = "s3-region", env = "AWS_REGION", value_name = "REGION")]
    pub s3_region: Option<String>,

    /// Object storage bucket.
    #[arg(long = "s3-bucket", env = "S3_BUCKET_NAME", value_name = "BUCKET")]
    pub s3_bucket: Option<String>,

    /// Public base URL used instead of the storage endpoint.
    #[arg(long = "s3-custom-domain", env = "S3_CUSTOM_DOMAIN", value_name = "URL")]
    pub s3_custom_domain: Option<String>,

    /// S3-compatible endpoint such as MinIO.
    #[arg(long = "s3-endpoint", env = "S3_ENDPOINT", value_name = "URL")]
    pub s3_endpoint: Option<String>,

    /// Address buckets by path instead of by host.
    #[arg(
        long = "s3-force-path-style",
        env = "S3_FORCE_PATH_STYLE",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub s3_force_path_style: Option<bool>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    #[command(flatten)]
    pub render: RenderOverrides,

    #[command(flatten)]
    pub storage: StorageOverrides,

    /// Override the listener host.
    #[arg(long = "server-host", env = "HOST", value_name = "HOST")]
    pub server_host: Option<String>,

    /// Override the listener port.
    #[arg(long = "server-port", env = "PORT", value_name = "PORT")]
    pub server_port: Option<u16>,

    /// Override the graceful shutdown timeout.
    #[arg(long = "server-graceful-shutdown-seconds", value_name = "SECONDS")]
    pub server_graceful_shutdown_seconds: Option<u64>,

    /// Include error source chains in error responses.
    #[arg(
        long = "server-debug-errors",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub server_debug_errors: Option<bool>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", env = "LOG_LEVEL", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,

    /// Toggle the render cache.
    #[arg(
        long = "cache-enabled",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub cache_enabled: Option<bool>,

    /// Override the cache TTL in milliseconds.
    #[arg(long = "cache-ttl-ms", value_name = "MS")]
    pub cache_ttl_ms: Option<u64>,

    /// Override the maximum number of cached charts.
    #[arg(long = "cache-max-entries", value_name = "COUNT")]
    pub cache_max_entries: Option<u64>,

    /// Require this key on render requests.
    #[arg(long = "api-key", env = "API_KEY", hide_env_values = true, value_name = "KEY")]
    pub api_key: Option<String>,

    /// Comma-separated CORS origins; `*` allows any.
    #[arg(
        long = "allowed-origins",
        env = "ALLOWED_ORIGINS",
        value_name = "ORIGINS",
        value_delimiter = ','
    )]
    pub allowed_origins: Option<Vec<String>>,

    /// Override the rate limit window size.
    #[arg(long = "rate-limit-window-seconds", value_name = "SECONDS")]
    pub rate_limit_window_seconds: Option<u64>,

    /// Override the rate limit request ceiling.
    #[arg(long = "rate-limit-max-requests", value_name = "COUNT")]
    pub rate_limit_max_requests: Option<u64>,

    /// Override the maximum request body size in bytes.
    #[arg(long = "max-body-bytes", value_name = "BYTES")]
    pub max_body_bytes: Option<u64>,
}

use std::thread;

use anyhow::bail;
use clap::Parser;

/// Runtime configuration for the `synthd-server` binary.
///
/// These settings control the concurrency, buffering, and chunking behavior
/// of the record generation service. All values are parsed from CLI
/// arguments or environment variables, with reasonable defaults suitable for
/// production.
///
/// Each field is independently tunable at runtime, allowing for flexible
/// deployment in clusters of varying sizes, memory constraints, or
/// throughput needs.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "synthd-server",
    version,
    about = "An HTTP service for generating synthetic records from JSON Schemas"
)]
pub struct CliArgs {
    /// Address to bind the HTTP listener to.
    ///
    /// Environment variable: `HOST`
    #[arg(long, env = "HOST", default_value_t = String::from("0.0.0.0"))]
    pub host: String,

    /// Port to bind the HTTP listener to.
    ///
    /// Environment variable: `PORT`
    #[arg(long, env = "PORT", default_value_t = 8080)]
    pub port: u16,

    /// Maximum accepted request body size, in bytes.
    ///
    /// Environment variable: `BODY_LIMIT_BYTES`
    #[arg(long, env = "BODY_LIMIT_BYTES", default_value_t = 10 * 1024 * 1024)]
    pub body_limit_bytes: usize,

    /// API key required (via the `X-API-Key` header) on every non-public
    /// endpoint. When unset, the key check is disabled.
    ///
    /// Environment variable: `API_KEY`
    #[arg(long, env = "API_KEY")]
    pub api_key: Option<String>,

    /// Comma-separated list of client IPs allowed to call non-public
    /// endpoints. When empty, the whitelist check is disabled.
    ///
    /// Environment variable: `IP_WHITELIST`
    #[arg(long, env = "IP_WHITELIST", value_delimiter = ',')]
    pub ip_whitelist: Vec<String>,

    /// Minimum number of pool executors kept alive. Defaults to the number
    /// of available CPUs.
    ///
    /// Environment variable: `MIN_THREADS`
    #[arg(long, env = "MIN_THREADS")]
    pub min_threads: Option<usize>,

    /// Maximum number of pool executors. Defaults to twice `MIN_THREADS`.
    ///
    /// Environment variable: `MAX_THREADS`
    #[arg(long, env = "MAX_THREADS")]
    pub max_threads: Option<usize>,

    /// Seconds an executor above the minimum may sit idle before it is
    /// retired.
    ///
    /// Environment variable: `IDLE_TIMEOUT_SECS`
    #[arg(long, env = "IDLE_TIMEOUT_SECS", default_value_t = 60)]
    pub idle_timeout_secs: u64,

    /// Capacity of the response buffer between the stream producer and the
    /// HTTP body. Lower values increase backpressure responsiveness; higher
    /// values enable deeper pipelining.
    ///
    /// Environment variable: `STREAM_BUFFER_SIZE`
    #[arg(long, env = "STREAM_BUFFER_SIZE", default_value_t = 8)]
    pub stream_buffer_size: usize,

    /// Seconds to wait for in-flight jobs to drain during graceful shutdown.
    ///
    /// Environment variable: `SHUTDOWN_TIMEOUT_SECS`
    #[arg(long, env = "SHUTDOWN_TIMEOUT_SECS", default_value_t = 3)]
    pub shutdown_timeout_secs: u64,

    /// Entry bound for the prepared-schema and validator caches.
    ///
    /// Environment variable: `SCHEMA_CACHE_SIZE`
    #[arg(long, env = "SCHEMA_CACHE_SIZE", default_value_t = 256)]
    pub schema_cache_size: usize,

    /// Connection URL for the optional abort-signal store (e.g.
    /// `redis://127.0.0.1:6379`). When unset, stop marks stay local to this
    /// process.
    ///
    /// Environment variable: `ABORT_STORE_URL`
    #[arg(long, env = "ABORT_STORE_URL")]
    pub abort_store_url: Option<String>,

    /// Key namespace prefix for abort-store entries.
    ///
    /// Environment variable: `ABORT_STORE_PREFIX`
    #[arg(long, env = "ABORT_STORE_PREFIX", default_value_t = String::from("synthd:"))]
    pub abort_store_prefix: String,

    /// TTL, in seconds, applied to abort-store stop marks.
    ///
    /// Environment variable: `ABORT_STORE_TTL_SECS`
    #[arg(long, env = "ABORT_STORE_TTL_SECS", default_value_t = 600)]
    pub abort_store_ttl_secs: u64,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub body_limit_bytes: usize,
    pub api_key: Option<String>,
    pub ip_whitelist: Vec<String>,
    pub min_threads: usize,
    pub max_threads: usize,
    pub idle_timeout_secs: u64,
    pub stream_buffer_size: usize,
    pub shutdown_timeout_secs: u64,
    pub schema_cache_size: usize,
    pub abort_store_url: Option<String>,
    pub abort_store_prefix: String,
    pub abort_store_ttl_secs: u64,
}

impl TryFrom<CliArgs> for ServerConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        let cpus = thread::available_parallelism().map_or(1, |n| n.get());
        let min_threads = args.min_threads.unwrap_or(cpus);
        let max_threads = args.max_threads.unwrap_or(min_threads * 2);

        if min_threads == 0 {
            bail!("MIN_THREADS must be greater than 0");
        }

        if max_threads < min_threads {
            bail!(
                "MAX_THREADS ({}) must be at least MIN_THREADS ({})",
                max_threads,
                min_threads
            );
        }

        if args.stream_buffer_size == 0 {
            bail!("STREAM_BUFFER_SIZE must be greater than 0");
        }

        if args.schema_cache_size == 0 {
            bail!("SCHEMA_CACHE_SIZE must be greater than 0");
        }

        Ok(Self {
            host: args.host,
            port: args.port,
            body_limit_bytes: args.body_limit_bytes,
            api_key: args.api_key,
            ip_whitelist: args.ip_whitelist,
            min_threads,
            max_threads,
            idle_timeout_secs: args.idle_timeout_secs,
            stream_buffer_size: args.stream_buffer_size,
            shutdown_timeout_secs: args.shutdown_timeout_secs,
            schema_cache_size: args.schema_cache_size,
            abort_store_url: args.abort_store_url,
            abort_store_prefix: args.abort_store_prefix,
            abort_store_ttl_secs: args.abort_store_ttl_secs,
        })
    }
}

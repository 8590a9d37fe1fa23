use anyhow::{Context, bail};
use clap::Parser;
use core::time::Duration;
use exportgen::{Compression, DEFAULT_FILES_PER_GIB, GenerationRequest, KIB, Limits, MIB};

/// Upper bound for `FILES_PER_GB`; keeps the per-request directory small.
const MAX_FILES_PER_GB: u64 = 100_000;

/// Runtime configuration for the `exportgen-server` binary.
///
/// The `INITIAL_DELAY_MS`, `FILE_SIZE_MB` and `THROTTLE_KBPS` values are the
/// defaults for requests that omit the matching query parameter. The `MAX_*`
/// values bound what any request may ask for.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "exportgen-server",
    version,
    about = "A mock export API streaming large, slow ZIP downloads"
)]
pub struct CliArgs {
    /// Address to listen on.
    ///
    /// Environment variable: `SERVER_ADDR`
    #[arg(long, env = "SERVER_ADDR", default_value_t = String::from("0.0.0.0:8081"))]
    pub server_addr: String,

    /// Default delay before the response starts, in milliseconds.
    ///
    /// Environment variable: `INITIAL_DELAY_MS`
    #[arg(long, env = "INITIAL_DELAY_MS", default_value_t = 0)]
    pub initial_delay_ms: u64,

    /// Default archive size in MiB.
    ///
    /// Environment variable: `FILE_SIZE_MB`
    #[arg(long, env = "FILE_SIZE_MB", default_value_t = 100)]
    pub file_size_mb: u64,

    /// Default output rate in KiB/s. `0` disables throttling.
    ///
    /// Environment variable: `THROTTLE_KBPS`
    #[arg(long, env = "THROTTLE_KBPS", default_value_t = 0)]
    pub throttle_kbps: u64,

    /// Largest archive a request may ask for, in MiB.
    ///
    /// Environment variable: `MAX_SIZE_MB`
    #[arg(long, env = "MAX_SIZE_MB", default_value_t = 1024 * 1024)]
    pub max_size_mb: u64,

    /// Longest startup delay a request may ask for, in milliseconds.
    ///
    /// Environment variable: `MAX_DELAY_MS`
    #[arg(long, env = "MAX_DELAY_MS", default_value_t = 60 * 60 * 1000)]
    pub max_delay_ms: u64,

    /// Highest rate limit a request may ask for, in KiB/s.
    ///
    /// Environment variable: `MAX_THROTTLE_KBPS`
    #[arg(long, env = "MAX_THROTTLE_KBPS", default_value_t = 10 * 1024 * 1024)]
    pub max_throttle_kbps: u64,

    /// Number of files generated per GiB of requested size.
    ///
    /// Only affects how realistic the archive layout looks; the total size is
    /// always exact.
    ///
    /// Environment variable: `FILES_PER_GB`
    #[arg(long, env = "FILES_PER_GB", default_value_t = DEFAULT_FILES_PER_GIB)]
    pub files_per_gb: u64,

    /// Entry compression: `0` stores content as is, `1`-`9` deflates it.
    ///
    /// Stored archives are as large as the requested size, which is what
    /// throughput tests usually want.
    ///
    /// Environment variable: `COMPRESSION_LEVEL`
    #[arg(long, env = "COMPRESSION_LEVEL", default_value_t = 0)]
    pub compression_level: u32,

    /// Capacity, in messages, of the buffer between the archive writer and
    /// the response body.
    ///
    /// Lower values make client backpressure reach the generator sooner.
    ///
    /// Environment variable: `STREAM_BUFFER_SIZE`
    #[arg(long, env = "STREAM_BUFFER_SIZE", default_value_t = 8)]
    pub stream_buffer_size: usize,

    /// Seconds to wait for in-flight downloads on shutdown before they are
    /// cancelled.
    ///
    /// Environment variable: `SHUTDOWN_TIMEOUT`
    #[arg(long, env = "SHUTDOWN_TIMEOUT", default_value_t = 5)]
    pub shutdown_timeout: u64,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub server_addr: String,
    pub default_delay_ms: u64,
    pub default_size_mb: u64,
    pub default_throttle_kbps: u64,
    pub limits: Limits,
    pub files_per_gib: u64,
    pub compression: Compression,
    pub stream_buffer_size: usize,
    pub shutdown_timeout: Duration,
}

impl TryFrom<CliArgs> for ServerConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        if args.stream_buffer_size == 0 {
            bail!("STREAM_BUFFER_SIZE must be greater than 0");
        }

        if args.files_per_gb == 0 || args.files_per_gb > MAX_FILES_PER_GB {
            bail!(
                "FILES_PER_GB ({}) must be between 1 and {}",
                args.files_per_gb,
                MAX_FILES_PER_GB
            );
        }

        if args.compression_level > 9 {
            bail!(
                "COMPRESSION_LEVEL ({}) must be between 0 and 9",
                args.compression_level
            );
        }

        if args.max_size_mb == 0 {
            bail!("MAX_SIZE_MB must be greater than 0");
        }

        let max_total_size_bytes = args
            .max_size_mb
            .checked_mul(MIB)
            .ok_or_else(|| anyhow::anyhow!("Overflow in MAX_SIZE_MB conversion"))?;
        let max_rate_limit_bytes_per_sec = args
            .max_throttle_kbps
            .checked_mul(KIB)
            .ok_or_else(|| anyhow::anyhow!("Overflow in MAX_THROTTLE_KBPS conversion"))?;

        let limits = Limits {
            max_total_size_bytes,
            max_startup_delay: Duration::from_millis(args.max_delay_ms),
            max_rate_limit_bytes_per_sec,
        };

        // Requests without query parameters must be servable.
        GenerationRequest::from_units(
            "default",
            args.file_size_mb,
            args.initial_delay_ms,
            args.throttle_kbps,
            &limits,
        )
        .context("Default request parameters exceed the configured limits")?;

        Ok(Self {
            server_addr: args.server_addr,
            default_delay_ms: args.initial_delay_ms,
            default_size_mb: args.file_size_mb,
            default_throttle_kbps: args.throttle_kbps,
            limits,
            files_per_gib: args.files_per_gb,
            compression: Compression::from_level(args.compression_level),
            stream_buffer_size: args.stream_buffer_size,
            shutdown_timeout: Duration::from_secs(args.shutdown_timeout),
        })
    }
}

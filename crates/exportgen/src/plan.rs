//! Request validation and size partitioning.
//!
//! A [`GenerationRequest`] is validated once against [`Limits`] and is
//! immutable afterwards. [`ExportPlan`] turns it into the ordered list of
//! [`LogicalFile`]s that make up the archive.

use crate::{
    error::{Error, Result},
    source::CHUNK_SIZE,
};
use core::time::Duration;

/// One gibibyte.
pub const GIB: u64 = 1024 * 1024 * 1024;

/// One mebibyte, the unit sizes are requested in.
pub const MIB: u64 = 1024 * 1024;

/// One kibibyte, the unit rate limits are requested in.
pub const KIB: u64 = 1024;

/// Default realism knob: how many files an export of one GiB contains.
pub const DEFAULT_FILES_PER_GIB: u64 = 100;

const MAX_EXPORT_ID_LEN: usize = 128;

/// Upper bounds applied to every request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    pub max_total_size_bytes: u64,
    pub max_startup_delay: Duration,
    pub max_rate_limit_bytes_per_sec: u64,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_total_size_bytes: 1024 * GIB,
            max_startup_delay: Duration::from_secs(60 * 60),
            max_rate_limit_bytes_per_sec: 10 * GIB,
        }
    }
}

/// A validated export request. Fully determines the generated archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    export_id: String,
    total_size_bytes: u64,
    startup_delay: Duration,
    rate_limit_bytes_per_sec: u64,
}

impl GenerationRequest {
    /// Validates the raw parameters against `limits`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidRequest`] if:
    /// - the export id is empty, too long, or not filename-safe;
    /// - the total size is zero or above the limit;
    /// - the startup delay or the rate limit is above its limit.
    pub fn new(
        export_id: impl Into<String>,
        total_size_bytes: u64,
        startup_delay: Duration,
        rate_limit_bytes_per_sec: u64,
        limits: &Limits,
    ) -> Result<Self> {
        let export_id = export_id.into();
        validate_export_id(&export_id)?;

        if total_size_bytes == 0 {
            return Err(Error::invalid("Size must be greater than 0"));
        }
        if total_size_bytes > limits.max_total_size_bytes {
            return Err(Error::invalid(format!(
                "Size {} bytes exceeds maximum allowed ({})",
                total_size_bytes, limits.max_total_size_bytes
            )));
        }
        if startup_delay > limits.max_startup_delay {
            return Err(Error::invalid(format!(
                "Delay {}ms exceeds maximum allowed ({}ms)",
                startup_delay.as_millis(),
                limits.max_startup_delay.as_millis()
            )));
        }
        if rate_limit_bytes_per_sec > limits.max_rate_limit_bytes_per_sec {
            return Err(Error::invalid(format!(
                "Rate limit {} bytes/s exceeds maximum allowed ({})",
                rate_limit_bytes_per_sec, limits.max_rate_limit_bytes_per_sec
            )));
        }

        Ok(Self {
            export_id,
            total_size_bytes,
            startup_delay,
            rate_limit_bytes_per_sec,
        })
    }

    /// Builds a request from transport units: MiB, milliseconds and KiB/s.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidRequest`] if a conversion overflows or the
    /// converted values fail [`GenerationRequest::new`].
    pub fn from_units(
        export_id: impl Into<String>,
        size_mb: u64,
        delay_ms: u64,
        throttle_kbps: u64,
        limits: &Limits,
    ) -> Result<Self> {
        let total = size_mb
            .checked_mul(MIB)
            .ok_or_else(|| Error::invalid(format!("Size {size_mb}MB is too large")))?;
        let rate = throttle_kbps
            .checked_mul(KIB)
            .ok_or_else(|| Error::invalid(format!("Throttle {throttle_kbps}KB/s is too large")))?;
        Self::new(
            export_id,
            total,
            Duration::from_millis(delay_ms),
            rate,
            limits,
        )
    }

    pub fn export_id(&self) -> &str {
        &self.export_id
    }

    pub const fn total_size_bytes(&self) -> u64 {
        self.total_size_bytes
    }

    pub const fn startup_delay(&self) -> Duration {
        self.startup_delay
    }

    /// Output rate in bytes per second; `0` disables throttling.
    pub const fn rate_limit_bytes_per_sec(&self) -> u64 {
        self.rate_limit_bytes_per_sec
    }

    /// Suggested download filename.
    pub fn archive_name(&self) -> String {
        format!("export-{}.zip", self.export_id)
    }
}

fn validate_export_id(id: &str) -> Result<()> {
    if id.is_empty() {
        return Err(Error::invalid("Export id must not be empty"));
    }
    if id.len() > MAX_EXPORT_ID_LEN {
        return Err(Error::invalid(format!(
            "Export id exceeds {MAX_EXPORT_ID_LEN} bytes"
        )));
    }
    if id == "." || id == ".." {
        return Err(Error::invalid("Export id must not be a path component"));
    }
    if let Some(c) = id
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')))
    {
        return Err(Error::invalid(format!(
            "Export id contains unsupported character {c:?}"
        )));
    }
    Ok(())
}

/// A named unit of synthetic content inside the archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogicalFile {
    pub index: u32,
    pub name: String,
    pub target_size_bytes: u64,
    /// Global id of this file's first chunk. Chunks are numbered
    /// consecutively across the whole archive.
    pub first_chunk_id: u64,
}

impl LogicalFile {
    /// Number of chunks this file is produced in.
    pub const fn chunk_count(&self) -> u64 {
        self.target_size_bytes.div_ceil(CHUNK_SIZE as u64)
    }
}

/// The ordered file layout for one request.
#[derive(Debug, Clone)]
pub struct ExportPlan {
    request: GenerationRequest,
    files: Vec<LogicalFile>,
}

impl ExportPlan {
    /// Partitions the request into files.
    ///
    /// The file count is `ceil(total * files_per_gib / GiB)`, at least one and
    /// never more than `total`. Sizes differ by at most one byte and always
    /// sum to the requested total.
    pub fn new(request: GenerationRequest, files_per_gib: u64) -> Self {
        let total = request.total_size_bytes;
        let count = file_count(total, files_per_gib);
        let base = total / count;
        let extra = total % count;

        let mut files = Vec::with_capacity(count as usize);
        let mut next_chunk_id = 0_u64;
        for index in 0..count {
            let size = base + u64::from(index < extra);
            let file = LogicalFile {
                index: index as u32,
                name: file_name(index),
                target_size_bytes: size,
                first_chunk_id: next_chunk_id,
            };
            next_chunk_id += file.chunk_count();
            files.push(file);
        }

        Self { request, files }
    }

    pub const fn request(&self) -> &GenerationRequest {
        &self.request
    }

    pub fn files(&self) -> &[LogicalFile] {
        &self.files
    }

    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    pub const fn total_size_bytes(&self) -> u64 {
        self.request.total_size_bytes
    }

    /// Lower bound on the transfer time imposed by the rate limit, or `None`
    /// when the output is not throttled.
    pub fn estimated_transfer_time(&self) -> Option<Duration> {
        match self.request.rate_limit_bytes_per_sec {
            0 => None,
            rate => Some(Duration::from_secs_f64(
                self.request.total_size_bytes as f64 / rate as f64,
            )),
        }
    }
}

fn file_count(total: u64, files_per_gib: u64) -> u64 {
    let scaled = u128::from(total) * u128::from(files_per_gib.max(1));
    let count = scaled.div_ceil(u128::from(GIB));
    // At least one byte per file, and the index must fit in u32.
    let cap = total.min(u64::from(u32::MAX)).max(1);
    count.clamp(1, u128::from(cap)) as u64
}

fn file_name(index: u64) -> String {
    format!("data/file_{index:06}.dat")
}

//! Configuration management for tilery.
//!
//! This module provides a flexible configuration system that supports:
//! - Command-line arguments via clap
//! - Environment variables with `TILERY_` prefix
//! - Sensible defaults for all optional settings
//!
//! # Environment Variables
//!
//! All configuration options can be set via environment variables with the
//! `TILERY_` prefix:
//!
//! - `TILERY_BACKEND` - Storage/queue backend: `local` or `aws` (default: local)
//! - `TILERY_ROLES` - Worker roles to run, comma-separated (default: all three)
//! - `TILERY_CONCURRENCY` - Jobs processed concurrently per role (default: 2)
//! - `TILERY_MAX_ATTEMPTS` - Delivery attempts before terminal failure (default: 5)
//! - `TILERY_VISIBILITY_SECS` - Job visibility window in seconds (default: 60)
//! - `TILERY_IMAGE_ROOT` - Key prefix for source/derived rasters (default: assets/images)
//! - `TILERY_TILE_ROOT` - Key prefix for tiles (default: assets/tiles)
//! - `TILERY_DATA_DIR` - Local backend blob directory (default: ./data)
//! - `TILERY_S3_BUCKET` - S3 bucket name (aws backend)
//! - `TILERY_S3_ENDPOINT` - Custom S3 endpoint for S3-compatible services
//! - `TILERY_S3_REGION` - AWS region (default: us-east-1)
//! - `TILERY_DYNAMO_TABLE` - DynamoDB table for image records (aws backend)
//! - `TILERY_REDIS_URL` - Redis connection URL (aws backend)

use std::time::Duration;

use clap::{Parser, ValueEnum};

// =============================================================================
// Default Values
// =============================================================================

/// Default jobs processed concurrently per worker role.
pub const DEFAULT_CONCURRENCY: usize = 2;

/// Default delivery attempts before a transient failure becomes terminal.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Default job visibility window in seconds.
///
/// Must comfortably exceed the worst-case pyramid build, or the queue will
/// redeliver jobs that are still being processed.
pub const DEFAULT_VISIBILITY_SECS: u64 = 60;

/// Default AWS region.
pub const DEFAULT_REGION: &str = "us-east-1";

/// Default key prefix for source and derived rasters.
pub const DEFAULT_IMAGE_ROOT: &str = "assets/images";

/// Default key prefix for tiles.
pub const DEFAULT_TILE_ROOT: &str = "assets/tiles";

// =============================================================================
// Backend / Roles
// =============================================================================

/// Which storage and queue implementations to wire up.
///
/// Selected once at startup and injected into the workers; never branched
/// on per call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Backend {
    /// Filesystem blobs; records and queue live in process memory, so
    /// image records are lost on restart even though blobs persist.
    Local,
    /// S3 blobs, DynamoDB records, Redis Streams queue.
    Aws,
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Backend::Local => f.write_str("local"),
            Backend::Aws => f.write_str("aws"),
        }
    }
}

/// A worker role this process can run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Role {
    Tile,
    Clip,
    Blend,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Tile => f.write_str("tile"),
            Role::Clip => f.write_str("clip"),
            Role::Blend => f.write_str("blend"),
        }
    }
}

// =============================================================================
// CLI Arguments
// =============================================================================

/// tilery - tile pyramid processing workers.
///
/// Consumes tile, clip, and blend jobs from a queue, builds multi-level
/// tile pyramids into blob storage, and maintains per-image lifecycle
/// records.
#[derive(Parser, Debug, Clone)]
#[command(name = "tilery")]
#[command(author, version, about, long_about = None)]
pub struct Config {
    // =========================================================================
    // Runtime Configuration
    // =========================================================================
    /// Storage/queue backend.
    #[arg(long, value_enum, default_value_t = Backend::Local, env = "TILERY_BACKEND")]
    pub backend: Backend,

    /// Worker roles to run in this process (comma-separated).
    #[arg(
        long,
        value_enum,
        value_delimiter = ',',
        default_values_t = [Role::Tile, Role::Clip, Role::Blend],
        env = "TILERY_ROLES"
    )]
    pub roles: Vec<Role>,

    /// Jobs processed concurrently per worker role.
    #[arg(long, default_value_t = DEFAULT_CONCURRENCY, env = "TILERY_CONCURRENCY")]
    pub concurrency: usize,

    /// Delivery attempts before a transient failure becomes terminal.
    #[arg(long, default_value_t = DEFAULT_MAX_ATTEMPTS, env = "TILERY_MAX_ATTEMPTS")]
    pub max_attempts: u32,

    /// How long a claimed job stays invisible before redelivery (seconds).
    #[arg(long, default_value_t = DEFAULT_VISIBILITY_SECS, env = "TILERY_VISIBILITY_SECS")]
    pub visibility_secs: u64,

    // =========================================================================
    // Storage Layout
    // =========================================================================
    /// Key prefix for source and derived rasters.
    #[arg(long, default_value = DEFAULT_IMAGE_ROOT, env = "TILERY_IMAGE_ROOT")]
    pub image_root: String,

    /// Key prefix for tiles.
    #[arg(long, default_value = DEFAULT_TILE_ROOT, env = "TILERY_TILE_ROOT")]
    pub tile_root: String,

    /// Directory backing the local blob store.
    #[arg(long, default_value = "./data", env = "TILERY_DATA_DIR")]
    pub data_dir: String,

    // =========================================================================
    // AWS Backend Configuration
    // =========================================================================
    /// S3 bucket holding images and tiles.
    #[arg(long, env = "TILERY_S3_BUCKET")]
    pub s3_bucket: Option<String>,

    /// Custom S3 endpoint URL for S3-compatible services (MinIO, etc.).
    #[arg(long, env = "TILERY_S3_ENDPOINT")]
    pub s3_endpoint: Option<String>,

    /// AWS region.
    #[arg(long, default_value = DEFAULT_REGION, env = "TILERY_S3_REGION")]
    pub s3_region: String,

    /// DynamoDB table holding image records.
    #[arg(long, env = "TILERY_DYNAMO_TABLE")]
    pub dynamo_table: Option<String>,

    /// Redis connection URL for the job queue.
    #[arg(long, env = "TILERY_REDIS_URL")]
    pub redis_url: Option<String>,

    // =========================================================================
    // Logging Configuration
    // =========================================================================
    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
}

impl Config {
    /// Validate the configuration and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if self.roles.is_empty() {
            return Err("at least one worker role is required. Set --roles".to_string());
        }

        if self.concurrency == 0 {
            return Err("concurrency must be greater than 0".to_string());
        }

        if self.max_attempts == 0 {
            return Err("max_attempts must be greater than 0".to_string());
        }

        if self.visibility_secs == 0 {
            return Err("visibility_secs must be greater than 0".to_string());
        }

        if self.backend == Backend::Aws {
            if self.s3_bucket.as_deref().unwrap_or("").is_empty() {
                return Err(
                    "aws backend requires an S3 bucket. Set --s3-bucket or TILERY_S3_BUCKET"
                        .to_string(),
                );
            }
            if self.dynamo_table.as_deref().unwrap_or("").is_empty() {
                return Err(
                    "aws backend requires a DynamoDB table. \
                     Set --dynamo-table or TILERY_DYNAMO_TABLE"
                        .to_string(),
                );
            }
            if self.redis_url.as_deref().unwrap_or("").is_empty() {
                return Err(
                    "aws backend requires a Redis URL. Set --redis-url or TILERY_REDIS_URL"
                        .to_string(),
                );
            }
        }

        Ok(())
    }

    /// The job visibility window as a [`Duration`].
    pub fn visibility(&self) -> Duration {
        Duration::from_secs(self.visibility_secs)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> Config {
        Config {
            backend: Backend::Local,
            roles: vec![Role::Tile, Role::Clip, Role::Blend],
            concurrency: 2,
            max_attempts: 5,
            visibility_secs: 60,
            image_root: DEFAULT_IMAGE_ROOT.to_string(),
            tile_root: DEFAULT_TILE_ROOT.to_string(),
            data_dir: "./data".to_string(),
            s3_bucket: None,
            s3_endpoint: None,
            s3_region: DEFAULT_REGION.to_string(),
            dynamo_table: None,
            redis_url: None,
            verbose: false,
        }
    }

    #[test]
    fn test_valid_local_config() {
        let config = test_config();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_no_roles() {
        let mut config = test_config();
        config.roles.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_concurrency() {
        let mut config = test_config();
        config.concurrency = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_max_attempts() {
        let mut config = test_config();
        config.max_attempts = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_aws_backend_requires_collaborators() {
        let mut config = test_config();
        config.backend = Backend::Aws;

        let result = config.validate();
        assert!(result.is_err());
        assert!(result.unwrap_err().contains("bucket"));

        config.s3_bucket = Some("tiles".to_string());
        let result = config.validate();
        assert!(result.is_err());
        assert!(result.unwrap_err().contains("DynamoDB"));

        config.dynamo_table = Some("images".to_string());
        let result = config.validate();
        assert!(result.is_err());
        assert!(result.unwrap_err().contains("Redis"));

        config.redis_url = Some("redis://localhost:6379".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_visibility_duration() {
        let config = test_config();
        assert_eq!(config.visibility(), Duration::from_secs(60));
    }
}

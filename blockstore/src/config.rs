//! The configuration of chunk stores, given from environment variables and lazy 
//! initialized when needed.

use std::ffi::OsStr;
use std::time::Duration;
use std::env;

use once_cell::sync::OnceCell;
use tracing::warn;


/// Default bound on the time a read waits for a loading store.
pub const DEFAULT_LOAD_TIMEOUT: Duration = Duration::from_secs(1);
/// Default number of loader worker threads.
pub const DEFAULT_LOADER_WORKERS: usize = 1;


/// Return the default bound on the time a read waits for a loading store to be loaded,
/// none meaning that reads wait forever.
/// 
/// To change it, set `BLOCKSTORE_LOAD_TIMEOUT_MS` to a number of milliseconds, `0` 
/// disabling the bound.
pub fn load_timeout() -> Option<Duration> {
    static ENV: OnceCell<Option<Duration>> = OnceCell::new();
    *ENV.get_or_init(|| parse_load_timeout(env::var_os("BLOCKSTORE_LOAD_TIMEOUT_MS").as_deref()))
}

/// Return the number of worker threads of a default store loader.
/// 
/// To change it, set `BLOCKSTORE_LOADER_WORKERS` to a non-zero number.
pub fn loader_workers() -> usize {
    static ENV: OnceCell<usize> = OnceCell::new();
    *ENV.get_or_init(|| parse_loader_workers(env::var_os("BLOCKSTORE_LOADER_WORKERS").as_deref()))
}

fn parse_load_timeout(value: Option<&OsStr>) -> Option<Duration> {
    match value.map(parse_number) {
        None => Some(DEFAULT_LOAD_TIMEOUT),
        Some(Some(0)) => None,
        Some(Some(millis)) => Some(Duration::from_millis(millis)),
        Some(None) => {
            warn!("invalid BLOCKSTORE_LOAD_TIMEOUT_MS, using {DEFAULT_LOAD_TIMEOUT:?}");
            Some(DEFAULT_LOAD_TIMEOUT)
        }
    }
}

fn parse_loader_workers(value: Option<&OsStr>) -> usize {
    match value.map(parse_number) {
        None => DEFAULT_LOADER_WORKERS,
        Some(Some(workers)) if workers > 0 => workers as usize,
        Some(_) => {
            warn!("invalid BLOCKSTORE_LOADER_WORKERS, using {DEFAULT_LOADER_WORKERS}");
            DEFAULT_LOADER_WORKERS
        }
    }
}

fn parse_number(value: &OsStr) -> Option<u64> {
    value.to_str()?.trim().parse().ok()
}

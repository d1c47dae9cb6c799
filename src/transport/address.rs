//! Well-known IPC endpoint discovery.
//!
//! The Discord client listens on the first free slot of a numbered family
//! of endpoints:
//!
//! | Platform | Candidates |
//! |----------|------------|
//! | Windows | `\\?\pipe\discord-ipc-0` .. `discord-ipc-9` |
//! | Unix | `{runtime dir}/discord-ipc-0` .. `discord-ipc-9` |
//!
//! On Unix the runtime dir is the first non-empty of `XDG_RUNTIME_DIR`,
//! `TMPDIR`, `TMP`, `TEMP`, falling back to `/tmp`.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::path::{Path, PathBuf};

// ============================================================================
// Constants
// ============================================================================

/// Endpoint name prefix.
pub const ENDPOINT_PREFIX: &str = "discord-ipc";

/// Number of numbered endpoints to try.
pub const CANDIDATE_COUNT: usize = 10;

/// Environment variables consulted for the Unix runtime dir, in order.
pub const RUNTIME_DIR_VARS: [&str; 4] = ["XDG_RUNTIME_DIR", "TMPDIR", "TMP", "TEMP"];

/// Unix fallback when no runtime dir variable is set.
const FALLBACK_RUNTIME_DIR: &str = "/tmp";

// ============================================================================
// IpcAddress
// ============================================================================

/// A local endpoint: a Unix socket path or a Windows pipe name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IpcAddress(PathBuf);

impl IpcAddress {
    /// Wraps a socket path or pipe name.
    #[inline]
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self(path.into())
    }

    /// Returns the path.
    #[inline]
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.0
    }
}

impl fmt::Display for IpcAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0.display(), f)
    }
}

// ============================================================================
// Resolution
// ============================================================================

/// Returns the ordered candidates using the process environment.
#[must_use]
pub fn candidate_addresses() -> Vec<IpcAddress> {
    candidate_addresses_with(|key| std::env::var(key).ok())
}

/// Returns the ordered candidates using `lookup` for environment variables.
#[must_use]
pub fn candidate_addresses_with<F>(lookup: F) -> Vec<IpcAddress>
where
    F: Fn(&str) -> Option<String>,
{
    #[cfg(windows)]
    {
        let _ = lookup;
        (0..CANDIDATE_COUNT)
            .map(|i| IpcAddress::new(format!(r"\\?\pipe\{ENDPOINT_PREFIX}-{i}")))
            .collect()
    }

    #[cfg(not(windows))]
    {
        let base = runtime_dir(lookup);
        (0..CANDIDATE_COUNT)
            .map(|i| IpcAddress::new(base.join(format!("{ENDPOINT_PREFIX}-{i}"))))
            .collect()
    }
}

/// Picks the Unix runtime dir.
#[cfg(not(windows))]
fn runtime_dir<F>(lookup: F) -> PathBuf
where
    F: Fn(&str) -> Option<String>,
{
    RUNTIME_DIR_VARS
        .iter()
        .filter_map(|key| lookup(key))
        .find(|value| !value.is_empty())
        .map_or_else(|| PathBuf::from(FALLBACK_RUNTIME_DIR), PathBuf::from)
}

// ============================================================================
// Tests
// ============================================================================

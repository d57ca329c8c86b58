//! Filesystem rendezvous: the port descriptor and its lock artifact.
//!
//! The listening peer writes the channel address to `<path>` and then creates
//! `<path>.unlock`. The presence of the lock file is the only readiness
//! signal; the connecting peer consumes it exactly once.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use crate::error::{BridgeError, Result};

const LOCK_SUFFIX: &str = ".unlock";
const STAGING_SUFFIX: &str = ".partial";

/// Opaque connection string published through the descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PortAddress(String);

impl PortAddress {
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Split `scheme://rest` into its two halves.
    pub fn split_scheme(&self) -> Option<(&str, &str)> {
        self.0.split_once("://")
    }
}

impl fmt::Display for PortAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Point-in-time view of a descriptor location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortDescriptor {
    pub address: Option<PortAddress>,
    pub lock_present: bool,
}

/// Reads and writes the descriptor and lock artifacts at one path.
#[derive(Debug, Clone)]
pub struct PortDescriptorStore {
    path: PathBuf,
    lock_path: PathBuf,
}

impl PortDescriptorStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let lock_path = suffixed(&path, LOCK_SUFFIX);
        Self { path, lock_path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }

    /// Publish `address` and signal readiness.
    ///
    /// The address is staged in a sibling file and renamed into place before
    /// the lock appears, so a consumer never observes a partial line.
    pub fn publish(&self, address: &PortAddress) -> Result<()> {
        let staging = suffixed(&self.path, STAGING_SUFFIX);
        std::fs::write(&staging, format!("{}\n", address.as_str()))?;
        std::fs::rename(&staging, &self.path)?;
        std::fs::write(&self.lock_path, b"")?;
        tracing::debug!(path = %self.path.display(), %address, "Published port descriptor");
        Ok(())
    }

    /// Try to take the lock. Returns `false` when it is absent, including when
    /// a concurrent consumer removed it first.
    pub fn try_consume_lock(&self) -> Result<bool> {
        match std::fs::remove_file(&self.lock_path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Read the first line of the descriptor.
    pub fn read_address(&self) -> Result<PortAddress> {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(BridgeError::DescriptorMissing {
                    path: self.path.clone(),
                });
            }
            Err(e) => return Err(e.into()),
        };
        let line = contents.lines().next().unwrap_or("").trim();
        if line.is_empty() {
            return Err(BridgeError::InvalidAddress(String::new()));
        }
        Ok(PortAddress::new(line))
    }

    pub fn inspect(&self) -> Result<PortDescriptor> {
        let address = match self.read_address() {
            Ok(address) => Some(address),
            Err(BridgeError::DescriptorMissing { .. }) => None,
            Err(e) => return Err(e),
        };
        Ok(PortDescriptor {
            address,
            lock_present: self.lock_path.exists(),
        })
    }

    /// Remove the descriptor and any unconsumed lock. Missing files are fine:
    /// both peers call this during teardown.
    pub fn remove(&self) -> Result<()> {
        for path in [&self.lock_path, &self.path] {
            match std::fs::remove_file(path) {
                Ok(()) => tracing::trace!(path = %path.display(), "Removed rendezvous artifact"),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

fn suffixed(path: &Path, suffix: &str) -> PathBuf {
    let mut os = path.as_os_str().to_owned();
    os.push(suffix);
    PathBuf::from(os)
}

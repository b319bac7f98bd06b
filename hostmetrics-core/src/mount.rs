//! Mount table resolution and guarded filesystem usage.
//!
//! `lookup` answers "which filesystem holds this path"; `usage` additionally
//! requires the path to be a mount point itself. Network mounts are pinged
//! with a bounded probe before usage is queried, since a `statvfs` against a
//! dead NFS server can hang indefinitely.

use crate::config::MountConfig;
use crate::error::{MetricsError, Result};
use crate::metrics::{FileSystem, FileSystemKind, FileSystemUsage};
use crate::provider::RawProvider;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::{TcpStream, ToSocketAddrs};
use std::path::{Component, Path, PathBuf};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountEntry {
    pub mount_point: PathBuf,
    pub device: String,
    pub fs_type: String,
    pub kind: FileSystemKind,
}

impl MountEntry {
    pub fn is_network(&self) -> bool {
        self.kind == FileSystemKind::Network
    }

    /// Host serving a network mount, parsed from the device field.
    pub fn server(&self) -> Option<String> {
        if !self.is_network() {
            return None;
        }
        parse_server(&self.device)
    }

    /// Port a reachability check should connect to, or `None` when the
    /// filesystem type has no well-known service port to try.
    pub fn probe_port(&self, nfs_port: u16) -> Option<u16> {
        match self.fs_type.as_str() {
            "nfs" | "nfs4" => Some(nfs_port),
            "cifs" | "smb3" | "smbfs" => Some(SMB_PORT),
            "fuse.sshfs" => Some(SSH_PORT),
            _ => None,
        }
    }
}

const SMB_PORT: u16 = 445;
const SSH_PORT: u16 = 22;

impl From<FileSystem> for MountEntry {
    fn from(fs: FileSystem) -> Self {
        Self {
            mount_point: fs.dir_name,
            device: fs.dev_name,
            fs_type: fs.sys_type_name,
            kind: fs.kind,
        }
    }
}

/// `host:/export`, `[v6addr]:/export`, `user@host:/dir` or `//host/share`.
fn parse_server(device: &str) -> Option<String> {
    let host = if let Some(rest) = device.strip_prefix("//") {
        rest.split('/').next()?
    } else if let Some(rest) = device.strip_prefix('[') {
        rest.split(']').next()?
    } else {
        let (host, _) = device.split_once(':')?;
        host.rsplit('@').next()?
    };
    (!host.is_empty()).then(|| host.to_string())
}

/// Answers whether a file server is up, within a fixed time bound.
pub trait ReachabilityProbe: Send + Sync {
    fn ping(&self, server: &str, port: u16) -> bool;
}

/// Runs `check` on a helper thread and gives up after `timeout`.
///
/// A check still running at the deadline is abandoned; its late answer is
/// discarded.
pub fn ping_within<F>(timeout: Duration, check: F) -> bool
where
    F: FnOnce() -> bool + Send + 'static,
{
    let (tx, rx) = mpsc::channel();
    let spawned = thread::Builder::new()
        .name("mount-probe".into())
        .spawn(move || {
            let _ = tx.send(check());
        });
    if let Err(e) = spawned {
        warn!(error = %e, "failed to spawn reachability probe");
        return false;
    }
    rx.recv_timeout(timeout).unwrap_or(false)
}

/// TCP connect to the file service port of the server.
///
/// Name resolution runs under the same deadline as the connect.
pub struct TcpProbe {
    timeout: Duration,
}

impl TcpProbe {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl ReachabilityProbe for TcpProbe {
    fn ping(&self, server: &str, port: u16) -> bool {
        let host = server.to_string();
        let timeout = self.timeout;
        ping_within(timeout, move || match (host.as_str(), port).to_socket_addrs() {
            Ok(mut addrs) => addrs.any(|addr| TcpStream::connect_timeout(&addr, timeout).is_ok()),
            Err(_) => false,
        })
    }
}

/// Resolves `.` and `..` without touching the filesystem. `..` at the root
/// stays at the root.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() && !out.has_root() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

struct MountTable {
    entries: BTreeMap<PathBuf, MountEntry>,
    /// Taken before the provider listing started.
    listed_at: Instant,
}

pub struct MountResolver<P> {
    provider: Arc<P>,
    probe: Box<dyn ReachabilityProbe>,
    nfs_port: u16,
    refresh_interval: Duration,
    table: RwLock<Option<Arc<MountTable>>>,
}

impl<P: RawProvider> MountResolver<P> {
    pub fn new(provider: Arc<P>, config: &MountConfig) -> Self {
        let probe = TcpProbe::new(config.probe_timeout());
        Self::with_probe(provider, config, Box::new(probe))
    }

    pub fn with_probe(provider: Arc<P>, config: &MountConfig, probe: Box<dyn ReachabilityProbe>) -> Self {
        Self {
            provider,
            probe,
            nfs_port: config.probe_port,
            refresh_interval: config.refresh_interval(),
            table: RwLock::new(None),
        }
    }

    /// Re-lists mounts and publishes the new table in one swap.
    pub fn refresh(&self) -> Result<Vec<MountEntry>> {
        let listed_at = Instant::now();
        let file_systems = self.provider.file_system_list()?;
        let mut entries = BTreeMap::new();
        for fs in file_systems {
            let entry = MountEntry::from(fs);
            // stacked mounts: the last one listed is the visible one
            entries.insert(entry.mount_point.clone(), entry);
        }
        debug!(mounts = entries.len(), "mount table refreshed");

        let list = entries.values().cloned().collect();
        self.publish(MountTable { entries, listed_at });
        Ok(list)
    }

    /// Swaps `table` in unless a listing started later is already published.
    fn publish(&self, table: MountTable) -> bool {
        let mut current = self.table.write();
        if let Some(published) = current.as_ref() {
            if published.listed_at > table.listed_at {
                debug!("newer mount table already published, dropping stale listing");
                return false;
            }
        }
        *current = Some(Arc::new(table));
        true
    }

    fn snapshot(&self) -> Result<Arc<MountTable>> {
        let current = self.table.read().clone();
        match current {
            Some(table) if table.listed_at.elapsed() < self.refresh_interval => Ok(table),
            _ => {
                self.refresh()?;
                self.table
                    .read()
                    .clone()
                    .ok_or_else(|| MetricsError::NotFound { what: "mount table".into() })
            }
        }
    }

    pub fn entries(&self) -> Result<Vec<MountEntry>> {
        Ok(self.snapshot()?.entries.values().cloned().collect())
    }

    /// The mount whose filesystem contains `path`. `.` and `..` are resolved
    /// lexically; symlinks are not followed.
    pub fn lookup(&self, path: impl AsRef<Path>) -> Result<MountEntry> {
        let path = normalize(path.as_ref());
        let table = self.snapshot()?;
        table
            .entries
            .values()
            .filter(|entry| path.starts_with(&entry.mount_point))
            .max_by_key(|entry| entry.mount_point.components().count())
            .cloned()
            .ok_or_else(|| MetricsError::NotFound {
                what: format!("filesystem containing {}", path.display()),
            })
    }

    /// Usage of the filesystem mounted exactly at `path`.
    pub fn usage(&self, path: impl AsRef<Path>) -> Result<FileSystemUsage> {
        let path = path.as_ref();
        let entry = self
            .snapshot()?
            .entries
            .get(&normalize(path))
            .cloned()
            .ok_or_else(|| MetricsError::NotMounted { path: path.to_path_buf() })?;

        let target = entry
            .server()
            .and_then(|server| entry.probe_port(self.nfs_port).map(|port| (server, port)));
        if let Some((server, port)) = target {
            if !self.probe.ping(&server, port) {
                warn!(server = %server, mount = %entry.mount_point.display(), "network filesystem unreachable");
                return Err(MetricsError::Unreachable {
                    server,
                    path: entry.mount_point,
                });
            }
            debug!(server = %server, port, "network filesystem reachable");
        } else if entry.is_network() {
            debug!(device = %entry.device, fs_type = %entry.fs_type, "no probe target, skipping probe");
        }

        self.provider.file_system_usage(&entry.mount_point)
    }
}

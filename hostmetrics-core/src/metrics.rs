use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Cumulative CPU time counters, in ticks since boot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cpu {
    pub user: u64,
    pub sys: u64,
    pub nice: u64,
    pub idle: u64,
    pub wait: u64,
    pub irq: u64,
    pub soft_irq: u64,
    pub stolen: u64,
    pub total: u64,
}

impl Cpu {
    /// Builds a sample whose total is the sum of its fields.
    #[allow(clippy::too_many_arguments)]
    pub fn from_fields(
        user: u64,
        sys: u64,
        nice: u64,
        idle: u64,
        wait: u64,
        irq: u64,
        soft_irq: u64,
        stolen: u64,
    ) -> Self {
        Self {
            user,
            sys,
            nice,
            idle,
            wait,
            irq,
            soft_irq,
            stolen,
            total: user + sys + nice + idle + wait + irq + soft_irq + stolen,
        }
    }
}

/// CPU time split as fractions of one, derived from two [`Cpu`] samples.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CpuPerc {
    pub user: f64,
    pub sys: f64,
    pub nice: f64,
    pub idle: f64,
    pub wait: f64,
    pub irq: f64,
    pub soft_irq: f64,
    pub stolen: f64,
    /// user + sys + nice + wait. Interrupt and steal time are not counted.
    pub combined: f64,
}

impl CpuPerc {
    pub fn fields(&self) -> [f64; 9] {
        [
            self.user,
            self.sys,
            self.nice,
            self.idle,
            self.wait,
            self.irq,
            self.soft_irq,
            self.stolen,
            self.combined,
        ]
    }

    pub fn is_zero(&self) -> bool {
        self.fields().iter().all(|f| *f == 0.0)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Mem {
    pub total: u64,
    pub used: u64,
    pub free: u64,
    /// Used memory excluding reclaimable caches.
    pub actual_used: u64,
    /// Free memory including reclaimable caches.
    pub actual_free: u64,
}

impl Mem {
    pub fn used_percent(&self) -> f64 {
        percent_of(self.actual_used, self.total)
    }

    pub fn free_percent(&self) -> f64 {
        percent_of(self.actual_free, self.total)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Swap {
    pub total: u64,
    pub used: u64,
    pub free: u64,
}

impl Swap {
    pub fn used_percent(&self) -> f64 {
        percent_of(self.used, self.total)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Uptime {
    pub seconds: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LoadAverage {
    pub one: f64,
    pub five: f64,
    pub fifteen: f64,
}

/// Cumulative interface counters since the interface came up.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetInterfaceStat {
    pub name: String,
    pub rx_bytes: u64,
    pub rx_packets: u64,
    pub rx_errors: u64,
    pub tx_bytes: u64,
    pub tx_packets: u64,
    pub tx_errors: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct NetRate {
    pub rx_bytes_per_sec: f64,
    pub tx_bytes_per_sec: f64,
    pub rx_packets_per_sec: f64,
    pub tx_packets_per_sec: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FileSystemKind {
    Unknown,
    None,
    LocalDisk,
    Network,
    RamDisk,
    Cdrom,
    Swap,
}

impl FileSystemKind {
    /// Classifies a mount by its filesystem type name.
    pub fn from_fs_type(fs_type: &str) -> Self {
        match fs_type {
            "nfs" | "nfs4" | "smbfs" | "cifs" | "smb3" | "afs" | "ncpfs" | "9p" | "fuse.sshfs"
            | "glusterfs" | "ceph" => Self::Network,
            "tmpfs" | "ramfs" | "devtmpfs" => Self::RamDisk,
            "iso9660" | "udf" | "hsfs" | "cd9660" => Self::Cdrom,
            "swap" => Self::Swap,
            "proc" | "sysfs" | "devpts" | "cgroup" | "cgroup2" | "securityfs" | "debugfs"
            | "tracefs" | "pstore" | "bpf" | "mqueue" | "hugetlbfs" | "configfs" | "fusectl"
            | "autofs" | "binfmt_misc" | "rpc_pipefs" | "nsfs" | "efivarfs" | "devfs" => {
                Self::None
            }
            "ext2" | "ext3" | "ext4" | "xfs" | "btrfs" | "f2fs" | "zfs" | "jfs" | "reiserfs"
            | "vfat" | "exfat" | "ntfs" | "ntfs3" | "apfs" | "hfs" | "ufs" | "overlay" => {
                Self::LocalDisk
            }
            _ => Self::Unknown,
        }
    }
}

/// One row of the mount table as reported by the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSystem {
    pub dir_name: PathBuf,
    pub dev_name: String,
    pub sys_type_name: String,
    pub kind: FileSystemKind,
}

impl FileSystem {
    pub fn new(dir_name: impl Into<PathBuf>, dev_name: impl Into<String>, fs_type: &str) -> Self {
        Self {
            dir_name: dir_name.into(),
            dev_name: dev_name.into(),
            sys_type_name: fs_type.to_string(),
            kind: FileSystemKind::from_fs_type(fs_type),
        }
    }
}

/// Space and inode usage of a mounted filesystem, in bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSystemUsage {
    pub total: u64,
    pub free: u64,
    pub avail: u64,
    pub used: u64,
    pub files: u64,
    pub free_files: u64,
}

impl FileSystemUsage {
    /// Matches `df`: used against what is usable by unprivileged users.
    pub fn use_percent(&self) -> f64 {
        let denom = self.used + self.avail;
        if denom == 0 {
            return 0.0;
        }
        self.used as f64 / denom as f64
    }
}

fn percent_of(part: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 / total as f64 * 100.0
    }
}

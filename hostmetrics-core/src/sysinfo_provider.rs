use crate::error::{MetricsError, Result};
use crate::metrics::{Cpu, FileSystem, FileSystemUsage, LoadAverage, Mem, NetInterfaceStat, Swap, Uptime};
use crate::process::{ProcMem, ProcState, ProcTime, ProcessStatus};
use crate::provider::RawProvider;
use parking_lot::Mutex;
use std::path::Path;
use sysinfo::{MemoryRefreshKind, Networks, RefreshKind, System};

/// The live host, read through `sysinfo`, `procfs` and `statvfs`.
pub struct SysinfoProvider {
    system: Mutex<System>,
    networks: Mutex<Networks>,
}

impl SysinfoProvider {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new_with_specifics(
                RefreshKind::new().with_memory(MemoryRefreshKind::everything()),
            )),
            networks: Mutex::new(Networks::new_with_refreshed_list()),
        }
    }

    /// Fresh process table; sysinfo keeps stale pids around across
    /// incremental refreshes.
    #[cfg(not(target_os = "linux"))]
    fn processes() -> System {
        System::new_with_specifics(RefreshKind::new().with_processes(sysinfo::ProcessRefreshKind::everything()))
    }

    #[cfg(not(target_os = "linux"))]
    fn with_process<T>(&self, kind: &'static str, pid: u32, f: impl FnOnce(&sysinfo::Process) -> T) -> Result<T> {
        let system = Self::processes();
        system
            .process(sysinfo::Pid::from_u32(pid))
            .map(f)
            .ok_or_else(|| MetricsError::provider(kind, pid, "no such process"))
    }
}

impl Default for SysinfoProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(target_os = "linux")]
fn cpu_from_ticks(time: &procfs::CpuTime) -> Cpu {
    Cpu::from_fields(
        time.user,
        time.system,
        time.nice,
        time.idle,
        time.iowait.unwrap_or(0),
        time.irq.unwrap_or(0),
        time.softirq.unwrap_or(0),
        time.steal.unwrap_or(0),
    )
}

#[cfg(target_os = "linux")]
fn kernel_stats() -> Result<procfs::KernelStats> {
    use procfs::CurrentSI;
    procfs::KernelStats::current().map_err(|e| MetricsError::provider("cpu", "/proc/stat", e))
}

#[cfg(target_os = "linux")]
fn proc_stat(kind: &'static str, pid: u32) -> Result<procfs::process::Stat> {
    let process = procfs::process::Process::new(pid as i32).map_err(|e| MetricsError::provider(kind, pid, e))?;
    process.stat().map_err(|e| MetricsError::provider(kind, pid, e))
}

/// Parses `/proc/self/mounts` (fstab format, octal escapes in paths).
///
/// Works on raw bytes: a path that is not valid UTF-8 is converted lossily
/// instead of failing the whole table.
pub fn parse_mounts(content: &[u8]) -> Vec<FileSystem> {
    content
        .split(|&b| b == b'\n')
        .filter_map(|line| {
            let mut fields = line
                .split(|b| b.is_ascii_whitespace())
                .filter(|field| !field.is_empty());
            let device = fields.next()?;
            let dir = fields.next()?;
            let fs_type = fields.next()?;
            Some(FileSystem::new(
                unescape(dir),
                unescape(device),
                &String::from_utf8_lossy(fs_type),
            ))
        })
        .collect()
}

fn unescape(field: &[u8]) -> String {
    let mut out = Vec::with_capacity(field.len());
    let mut i = 0;
    while i < field.len() {
        if field[i] == b'\\' {
            let code = field
                .get(i + 1..i + 4)
                .filter(|digits| digits.iter().all(|b| (b'0'..=b'7').contains(b)))
                .and_then(|digits| std::str::from_utf8(digits).ok())
                .and_then(|digits| u8::from_str_radix(digits, 8).ok());
            if let Some(code) = code {
                out.push(code);
                i += 4;
                continue;
            }
        }
        out.push(field[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

impl RawProvider for SysinfoProvider {
    fn pid(&self) -> u32 {
        std::process::id()
    }

    #[cfg(target_os = "linux")]
    fn cpu(&self) -> Result<Cpu> {
        Ok(cpu_from_ticks(&kernel_stats()?.total))
    }

    #[cfg(not(target_os = "linux"))]
    fn cpu(&self) -> Result<Cpu> {
        Err(MetricsError::NotImplemented { kind: "cpu" })
    }

    #[cfg(target_os = "linux")]
    fn cpu_list(&self) -> Result<Vec<Cpu>> {
        Ok(kernel_stats()?.cpu_time.iter().map(cpu_from_ticks).collect())
    }

    #[cfg(not(target_os = "linux"))]
    fn cpu_list(&self) -> Result<Vec<Cpu>> {
        Err(MetricsError::NotImplemented { kind: "cpu_list" })
    }

    fn mem(&self) -> Result<Mem> {
        let mut system = self.system.lock();
        system.refresh_memory();
        let total = system.total_memory();
        if total == 0 {
            return Err(MetricsError::provider("mem", "system", "no memory information"));
        }
        let free = system.free_memory();
        let available = system.available_memory();
        Ok(Mem {
            total,
            used: total.saturating_sub(free),
            free,
            actual_used: total.saturating_sub(available),
            actual_free: available,
        })
    }

    fn swap(&self) -> Result<Swap> {
        let mut system = self.system.lock();
        system.refresh_memory();
        Ok(Swap {
            total: system.total_swap(),
            used: system.used_swap(),
            free: system.free_swap(),
        })
    }

    fn uptime(&self) -> Result<Uptime> {
        Ok(Uptime {
            seconds: System::uptime(),
        })
    }

    #[cfg(unix)]
    fn load_average(&self) -> Result<LoadAverage> {
        let load = System::load_average();
        Ok(LoadAverage {
            one: load.one,
            five: load.five,
            fifteen: load.fifteen,
        })
    }

    #[cfg(not(unix))]
    fn load_average(&self) -> Result<LoadAverage> {
        Err(MetricsError::NotImplemented { kind: "load_average" })
    }

    // the /proc listing holds processes only; sysinfo also reports threads there
    #[cfg(target_os = "linux")]
    fn proc_list(&self) -> Result<Vec<u32>> {
        let all = procfs::process::all_processes().map_err(|e| MetricsError::provider("proc_list", "/proc", e))?;
        let mut pids: Vec<u32> = all
            .flatten()
            .filter_map(|process| u32::try_from(process.pid()).ok())
            .collect();
        pids.sort_unstable();
        Ok(pids)
    }

    #[cfg(not(target_os = "linux"))]
    fn proc_list(&self) -> Result<Vec<u32>> {
        let system = Self::processes();
        let mut pids: Vec<u32> = system.processes().keys().map(|pid| pid.as_u32()).collect();
        pids.sort_unstable();
        Ok(pids)
    }

    #[cfg(target_os = "linux")]
    fn proc_mem(&self, pid: u32) -> Result<ProcMem> {
        let stat = proc_stat("proc_mem", pid)?;
        Ok(ProcMem {
            pid,
            size: stat.vsize,
            resident: stat.rss * procfs::page_size(),
        })
    }

    #[cfg(not(target_os = "linux"))]
    fn proc_mem(&self, pid: u32) -> Result<ProcMem> {
        self.with_process("proc_mem", pid, |process| ProcMem {
            pid,
            size: process.virtual_memory(),
            resident: process.memory(),
        })
    }

    #[cfg(target_os = "linux")]
    fn proc_state(&self, pid: u32) -> Result<ProcState> {
        let stat = proc_stat("proc_state", pid)?;
        Ok(ProcState {
            pid,
            name: stat.comm,
            status: ProcessStatus::from_state_char(stat.state),
            ppid: u32::try_from(stat.ppid).ok().filter(|ppid| *ppid > 0),
            threads: u64::try_from(stat.num_threads).ok(),
        })
    }

    #[cfg(not(target_os = "linux"))]
    fn proc_state(&self, pid: u32) -> Result<ProcState> {
        self.with_process("proc_state", pid, |process| ProcState {
            pid,
            name: process.name().to_string_lossy().to_string(),
            status: convert_status(process.status()),
            ppid: process.parent().map(|p| p.as_u32()),
            threads: process.tasks().map(|tasks| tasks.len() as u64),
        })
    }

    #[cfg(target_os = "linux")]
    fn proc_time(&self, pid: u32) -> Result<ProcTime> {
        let stat = proc_stat("proc_time", pid)?;
        let ticks = procfs::ticks_per_second().max(1);
        let boot = procfs::boot_time_secs().map_err(|e| MetricsError::provider("proc_time", pid, e))?;
        let started_ms = boot * 1_000 + stat.starttime * 1_000 / ticks;
        let start_time = chrono::DateTime::from_timestamp_millis(started_ms as i64)
            .ok_or_else(|| MetricsError::provider("proc_time", pid, "start time out of range"))?;
        Ok(ProcTime::new(
            pid,
            start_time,
            stat.utime * 1_000 / ticks,
            stat.stime * 1_000 / ticks,
        ))
    }

    #[cfg(not(target_os = "linux"))]
    fn proc_time(&self, _pid: u32) -> Result<ProcTime> {
        Err(MetricsError::NotImplemented { kind: "proc_time" })
    }

    #[cfg(target_os = "linux")]
    fn file_system_list(&self) -> Result<Vec<FileSystem>> {
        let content = std::fs::read("/proc/self/mounts").map_err(|e| MetricsError::io("/proc/self/mounts", e))?;
        Ok(parse_mounts(&content))
    }

    #[cfg(not(target_os = "linux"))]
    fn file_system_list(&self) -> Result<Vec<FileSystem>> {
        let disks = sysinfo::Disks::new_with_refreshed_list();
        Ok(disks
            .iter()
            .map(|disk| {
                FileSystem::new(
                    disk.mount_point(),
                    disk.name().to_string_lossy().to_string(),
                    &disk.file_system().to_string_lossy(),
                )
            })
            .collect())
    }

    #[cfg(unix)]
    fn file_system_usage(&self, dir_name: &Path) -> Result<FileSystemUsage> {
        let stat = nix::sys::statvfs::statvfs(dir_name).map_err(|e| MetricsError::io(dir_name, e))?;
        let block = stat.fragment_size() as u64;
        let total = stat.blocks() as u64 * block;
        let free = stat.blocks_free() as u64 * block;
        Ok(FileSystemUsage {
            total,
            free,
            avail: stat.blocks_available() as u64 * block,
            used: total.saturating_sub(free),
            files: stat.files() as u64,
            free_files: stat.files_free() as u64,
        })
    }

    #[cfg(not(unix))]
    fn file_system_usage(&self, _dir_name: &Path) -> Result<FileSystemUsage> {
        Err(MetricsError::NotImplemented { kind: "file_system_usage" })
    }

    fn net_interface_list(&self) -> Result<Vec<String>> {
        let mut networks = self.networks.lock();
        networks.refresh_list();
        let mut names: Vec<String> = networks.iter().map(|(name, _)| name.to_string()).collect();
        names.sort();
        Ok(names)
    }

    fn net_interface_stat(&self, name: &str) -> Result<NetInterfaceStat> {
        let mut networks = self.networks.lock();
        networks.refresh();
        networks
            .iter()
            .find(|(interface, _)| interface.as_str() == name)
            .map(|(_, data)| NetInterfaceStat {
                name: name.to_string(),
                rx_bytes: data.total_received(),
                rx_packets: data.total_packets_received(),
                rx_errors: data.total_errors_on_received(),
                tx_bytes: data.total_transmitted(),
                tx_packets: data.total_packets_transmitted(),
                tx_errors: data.total_errors_on_transmitted(),
            })
            .ok_or_else(|| MetricsError::provider("net_interface_stat", name, "no such interface"))
    }
}

#[cfg(not(target_os = "linux"))]
fn convert_status(status: sysinfo::ProcessStatus) -> ProcessStatus {
    match status {
        sysinfo::ProcessStatus::Run => ProcessStatus::Running,
        sysinfo::ProcessStatus::Sleep => ProcessStatus::Sleeping,
        sysinfo::ProcessStatus::Idle => ProcessStatus::Idle,
        sysinfo::ProcessStatus::Stop => ProcessStatus::Stopped,
        sysinfo::ProcessStatus::Zombie => ProcessStatus::Zombie,
        sysinfo::ProcessStatus::Dead => ProcessStatus::Dead,
        _ => ProcessStatus::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::FileSystemKind;
    use std::path::PathBuf;

    #[test]
    fn parses_mount_lines() {
        let content = "\
/dev/sda1 / ext4 rw,relatime 0 0
proc /proc proc rw,nosuid 0 0
filer01:/export/home /home nfs4 rw,vers=4.2 0 0
/dev/sdb1 /media/usb\\040stick vfat rw 0 0
";
        let mounts = parse_mounts(content.as_bytes());
        assert_eq!(mounts.len(), 4);
        assert_eq!(mounts[0].kind, FileSystemKind::LocalDisk);
        assert_eq!(mounts[1].kind, FileSystemKind::None);
        assert_eq!(mounts[2].kind, FileSystemKind::Network);
        assert_eq!(mounts[2].dev_name, "filer01:/export/home");
        assert_eq!(mounts[3].dir_name, PathBuf::from("/media/usb stick"));
    }

    #[test]
    fn skips_truncated_lines() {
        assert!(parse_mounts(b"/dev/sda1 /\n\n").is_empty());
    }

    #[test]
    fn non_utf8_paths_do_not_drop_the_table() {
        let mut content = b"/dev/sda1 / ext4 rw 0 0\n/dev/sdc1 /mnt/".to_vec();
        content.extend_from_slice(&[0xff, 0xfe]);
        content.extend_from_slice(b"\\303\\251 ext4 rw 0 0\n");
        let mounts = parse_mounts(&content);
        assert_eq!(mounts.len(), 2);
        assert_eq!(mounts[0].dir_name, PathBuf::from("/"));
        assert_eq!(mounts[1].dir_name, PathBuf::from("/mnt/\u{fffd}\u{fffd}\u{e9}"));
    }

    #[test]
    fn reports_own_process() {
        let provider = SysinfoProvider::new();
        assert_eq!(provider.pid(), std::process::id());
        assert!(provider.mem().unwrap().total > 0);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn reads_live_counters() {
        let provider = SysinfoProvider::new();
        let cpu = provider.cpu().unwrap();
        assert!(cpu.total >= cpu.idle);
        assert!(!provider.cpu_list().unwrap().is_empty());

        let pid = provider.pid();
        let time = provider.proc_time(pid).unwrap();
        assert_eq!(time.total, time.user + time.sys);
        assert!(provider.proc_mem(pid).unwrap().resident > 0);
        assert!(provider.file_system_list().unwrap().iter().any(|fs| fs.dir_name == Path::new("/")));
        assert!(provider.file_system_usage(Path::new("/")).unwrap().total > 0);
    }
}

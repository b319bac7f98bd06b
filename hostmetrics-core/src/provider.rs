//! The raw data source behind every cached or derived metric.

use crate::error::Result;
use crate::metrics::{Cpu, FileSystem, FileSystemUsage, LoadAverage, Mem, NetInterfaceStat, Swap, Uptime};
use crate::process::{ProcMem, ProcState, ProcTime};
use std::path::Path;

/// One-shot, uncached snapshots of host state.
///
/// Every call may block on syscalls or file parsing. Implementations report
/// a metric the platform cannot supply as
/// [`MetricsError::NotImplemented`](crate::MetricsError::NotImplemented) so
/// callers can tell it apart from a transient failure.
pub trait RawProvider: Send + Sync {
    fn pid(&self) -> u32;

    fn cpu(&self) -> Result<Cpu>;
    fn cpu_list(&self) -> Result<Vec<Cpu>>;
    fn mem(&self) -> Result<Mem>;
    fn swap(&self) -> Result<Swap>;
    fn uptime(&self) -> Result<Uptime>;
    fn load_average(&self) -> Result<LoadAverage>;

    fn proc_list(&self) -> Result<Vec<u32>>;
    fn proc_mem(&self, pid: u32) -> Result<ProcMem>;
    fn proc_state(&self, pid: u32) -> Result<ProcState>;
    fn proc_time(&self, pid: u32) -> Result<ProcTime>;

    fn file_system_list(&self) -> Result<Vec<FileSystem>>;
    fn file_system_usage(&self, dir_name: &Path) -> Result<FileSystemUsage>;

    fn net_interface_list(&self) -> Result<Vec<String>>;
    fn net_interface_stat(&self, name: &str) -> Result<NetInterfaceStat>;
}

pub mod mock {
    //! Scripted in-memory provider for tests and demos.

    use super::RawProvider;
    use crate::error::{MetricsError, Result};
    use crate::metrics::{
        Cpu, FileSystem, FileSystemUsage, LoadAverage, Mem, NetInterfaceStat, Swap, Uptime,
    };
    use crate::process::{ProcMem, ProcState, ProcTime};
    use parking_lot::Mutex;
    use std::collections::{HashMap, VecDeque};
    use std::path::{Path, PathBuf};

    /// Provider whose answers are set up front.
    ///
    /// CPU samples are queued and served in order; the last one repeats once
    /// the queue runs dry. Every call is counted per method name so tests can
    /// assert how often the underlying source was hit.
    #[derive(Default)]
    pub struct MockProvider {
        cpu: Mutex<VecDeque<Cpu>>,
        cpu_lists: Mutex<VecDeque<Vec<Cpu>>>,
        mem: Mutex<Option<Mem>>,
        swap: Mutex<Option<Swap>>,
        procs: Mutex<HashMap<u32, (ProcMem, ProcState, VecDeque<ProcTime>)>>,
        file_systems: Mutex<Vec<FileSystem>>,
        usage: Mutex<HashMap<PathBuf, FileSystemUsage>>,
        interfaces: Mutex<HashMap<String, VecDeque<NetInterfaceStat>>>,
        calls: Mutex<HashMap<&'static str, usize>>,
    }

    impl MockProvider {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn push_cpu(&self, cpu: Cpu) -> &Self {
            self.cpu.lock().push_back(cpu);
            self
        }

        pub fn push_cpu_list(&self, cpus: Vec<Cpu>) -> &Self {
            self.cpu_lists.lock().push_back(cpus);
            self
        }

        pub fn set_mem(&self, mem: Mem) -> &Self {
            *self.mem.lock() = Some(mem);
            self
        }

        pub fn set_swap(&self, swap: Swap) -> &Self {
            *self.swap.lock() = Some(swap);
            self
        }

        pub fn add_process(&self, mem: ProcMem, state: ProcState) -> &Self {
            self.procs.lock().insert(mem.pid, (mem, state, VecDeque::new()));
            self
        }

        pub fn push_proc_time(&self, time: ProcTime) -> &Self {
            if let Some(entry) = self.procs.lock().get_mut(&time.pid) {
                entry.2.push_back(time);
            }
            self
        }

        pub fn remove_process(&self, pid: u32) -> &Self {
            self.procs.lock().remove(&pid);
            self
        }

        pub fn set_file_systems(&self, file_systems: Vec<FileSystem>) -> &Self {
            *self.file_systems.lock() = file_systems;
            self
        }

        pub fn set_usage(&self, dir_name: impl Into<PathBuf>, usage: FileSystemUsage) -> &Self {
            self.usage.lock().insert(dir_name.into(), usage);
            self
        }

        pub fn push_interface_stat(&self, stat: NetInterfaceStat) -> &Self {
            self.interfaces
                .lock()
                .entry(stat.name.clone())
                .or_default()
                .push_back(stat);
            self
        }

        pub fn calls(&self, method: &str) -> usize {
            self.calls.lock().get(method).copied().unwrap_or(0)
        }

        fn record(&self, method: &'static str) {
            *self.calls.lock().entry(method).or_insert(0) += 1;
        }
    }

    fn next_of<T: Clone>(queue: &mut VecDeque<T>) -> Option<T> {
        if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        }
    }

    impl RawProvider for MockProvider {
        fn pid(&self) -> u32 {
            std::process::id()
        }

        fn cpu(&self) -> Result<Cpu> {
            self.record("cpu");
            next_of(&mut self.cpu.lock()).ok_or(MetricsError::NotImplemented { kind: "cpu" })
        }

        fn cpu_list(&self) -> Result<Vec<Cpu>> {
            self.record("cpu_list");
            next_of(&mut self.cpu_lists.lock()).ok_or(MetricsError::NotImplemented { kind: "cpu_list" })
        }

        fn mem(&self) -> Result<Mem> {
            self.record("mem");
            self.mem
                .lock()
                .ok_or_else(|| MetricsError::provider("mem", "system", "no sample scripted"))
        }

        fn swap(&self) -> Result<Swap> {
            self.record("swap");
            self.swap.lock().ok_or(MetricsError::NotImplemented { kind: "swap" })
        }

        fn uptime(&self) -> Result<Uptime> {
            self.record("uptime");
            Ok(Uptime { seconds: 3_600 })
        }

        fn load_average(&self) -> Result<LoadAverage> {
            self.record("load_average");
            Err(MetricsError::NotImplemented { kind: "load_average" })
        }

        fn proc_list(&self) -> Result<Vec<u32>> {
            self.record("proc_list");
            let mut pids: Vec<u32> = self.procs.lock().keys().copied().collect();
            pids.sort_unstable();
            Ok(pids)
        }

        fn proc_mem(&self, pid: u32) -> Result<ProcMem> {
            self.record("proc_mem");
            self.procs
                .lock()
                .get(&pid)
                .map(|p| p.0)
                .ok_or_else(|| MetricsError::provider("proc_mem", pid, "no such process"))
        }

        fn proc_state(&self, pid: u32) -> Result<ProcState> {
            self.record("proc_state");
            self.procs
                .lock()
                .get(&pid)
                .map(|p| p.1.clone())
                .ok_or_else(|| MetricsError::provider("proc_state", pid, "no such process"))
        }

        fn proc_time(&self, pid: u32) -> Result<ProcTime> {
            self.record("proc_time");
            self.procs
                .lock()
                .get_mut(&pid)
                .and_then(|p| next_of(&mut p.2))
                .ok_or_else(|| MetricsError::provider("proc_time", pid, "no such process"))
        }

        fn file_system_list(&self) -> Result<Vec<FileSystem>> {
            self.record("file_system_list");
            Ok(self.file_systems.lock().clone())
        }

        fn file_system_usage(&self, dir_name: &Path) -> Result<FileSystemUsage> {
            self.record("file_system_usage");
            self.usage
                .lock()
                .get(dir_name)
                .copied()
                .ok_or_else(|| MetricsError::io(dir_name, "No such file or directory"))
        }

        fn net_interface_list(&self) -> Result<Vec<String>> {
            self.record("net_interface_list");
            let mut names: Vec<String> = self.interfaces.lock().keys().cloned().collect();
            names.sort();
            Ok(names)
        }

        fn net_interface_stat(&self, name: &str) -> Result<NetInterfaceStat> {
            self.record("net_interface_stat");
            self.interfaces
                .lock()
                .get_mut(name)
                .and_then(next_of)
                .ok_or_else(|| MetricsError::provider("net_interface_stat", name, "no such interface"))
        }
    }
}

//! Caching front for a [`RawProvider`].
//!
//! Every raw query goes through a per-kind [`TtlCache`], so repeated calls
//! within the ttl never reach the provider and concurrent misses share one
//! provider call. Rate metrics keep the previous raw sample per target in a
//! [`SnapshotHistory`] and hand both samples to [`crate::delta`].

use crate::cache::{Sampled, SnapshotHistory, TtlCache};
use crate::config::{CacheConfig, MetricsConfig};
use crate::delta;
use crate::error::Result;
use crate::metrics::{
    Cpu, CpuPerc, FileSystem, FileSystemUsage, LoadAverage, Mem, NetInterfaceStat, NetRate, Swap,
    Uptime,
};
use crate::process::{ProcCpu, ProcMem, ProcState, ProcTime};
use crate::provider::RawProvider;
use std::hash::Hash;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricKind {
    Cpu,
    CpuList,
    Mem,
    Swap,
    Uptime,
    LoadAverage,
    ProcList,
    ProcMem,
    ProcState,
    ProcTime,
    FileSystemList,
    FileSystemUsage,
    NetInterfaceList,
    NetInterfaceStat,
}

impl MetricKind {
    pub const ALL: [MetricKind; 14] = [
        MetricKind::Cpu,
        MetricKind::CpuList,
        MetricKind::Mem,
        MetricKind::Swap,
        MetricKind::Uptime,
        MetricKind::LoadAverage,
        MetricKind::ProcList,
        MetricKind::ProcMem,
        MetricKind::ProcState,
        MetricKind::ProcTime,
        MetricKind::FileSystemList,
        MetricKind::FileSystemUsage,
        MetricKind::NetInterfaceList,
        MetricKind::NetInterfaceStat,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Cpu => "cpu",
            MetricKind::CpuList => "cpu_list",
            MetricKind::Mem => "mem",
            MetricKind::Swap => "swap",
            MetricKind::Uptime => "uptime",
            MetricKind::LoadAverage => "load_average",
            MetricKind::ProcList => "proc_list",
            MetricKind::ProcMem => "proc_mem",
            MetricKind::ProcState => "proc_state",
            MetricKind::ProcTime => "proc_time",
            MetricKind::FileSystemList => "file_system_list",
            MetricKind::FileSystemUsage => "file_system_usage",
            MetricKind::NetInterfaceList => "net_interface_list",
            MetricKind::NetInterfaceStat => "net_interface_stat",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == name)
    }
}

pub struct CachingProxy<P> {
    provider: Arc<P>,
    ttls: CacheConfig,
    sample_interval: Duration,

    cpu: TtlCache<(), Cpu>,
    cpu_list: TtlCache<(), Vec<Cpu>>,
    mem: TtlCache<(), Mem>,
    swap: TtlCache<(), Swap>,
    uptime: TtlCache<(), Uptime>,
    load_average: TtlCache<(), LoadAverage>,
    proc_list: TtlCache<(), Vec<u32>>,
    proc_mem: TtlCache<u32, ProcMem>,
    proc_state: TtlCache<u32, ProcState>,
    proc_time: TtlCache<u32, ProcTime>,
    file_systems: TtlCache<(), Vec<FileSystem>>,
    file_system_usage: TtlCache<PathBuf, FileSystemUsage>,
    net_interfaces: TtlCache<(), Vec<String>>,
    net_interface_stat: TtlCache<String, NetInterfaceStat>,

    last_cpu: SnapshotHistory<(), Cpu>,
    last_cpu_list: SnapshotHistory<(), Vec<Cpu>>,
    last_proc_time: SnapshotHistory<u32, ProcTime>,
    last_net: SnapshotHistory<String, NetInterfaceStat>,
}

impl<P: RawProvider> CachingProxy<P> {
    pub fn new(provider: Arc<P>, config: &MetricsConfig) -> Self {
        Self {
            provider,
            ttls: config.cache.clone(),
            sample_interval: config.sampling.min_interval(),
            cpu: TtlCache::new("cpu"),
            cpu_list: TtlCache::new("cpu_list"),
            mem: TtlCache::new("mem"),
            swap: TtlCache::new("swap"),
            uptime: TtlCache::new("uptime"),
            load_average: TtlCache::new("load_average"),
            proc_list: TtlCache::new("proc_list"),
            proc_mem: TtlCache::new("proc_mem"),
            proc_state: TtlCache::new("proc_state"),
            proc_time: TtlCache::new("proc_time"),
            file_systems: TtlCache::new("file_system_list"),
            file_system_usage: TtlCache::new("file_system_usage"),
            net_interfaces: TtlCache::new("net_interface_list"),
            net_interface_stat: TtlCache::new("net_interface_stat"),
            last_cpu: SnapshotHistory::new(),
            last_cpu_list: SnapshotHistory::new(),
            last_proc_time: SnapshotHistory::new(),
            last_net: SnapshotHistory::new(),
        }
    }

    pub fn provider(&self) -> &Arc<P> {
        &self.provider
    }

    fn ttl(&self, kind: MetricKind) -> Duration {
        self.ttls.ttl(kind)
    }

    /// System-wide CPU split since the previous call.
    pub fn cpu_perc(&self) -> Result<CpuPerc> {
        let (prior, current) = self.sample_pair(&self.last_cpu, (), || self.provider.cpu())?;
        Ok(delta::cpu_percentage(&prior.value, &current.value))
    }

    /// Per-CPU split since the previous call.
    pub fn cpu_perc_list(&self) -> Result<Vec<CpuPerc>> {
        let (prior, current) =
            self.sample_pair(&self.last_cpu_list, (), || self.provider.cpu_list())?;
        Ok(delta::cpu_percentage_list(&prior.value, &current.value))
    }

    /// CPU usage of `pid` since the previous call for the same pid.
    pub fn proc_cpu(&self, pid: u32) -> Result<ProcCpu> {
        let sampled = self.sample_pair(&self.last_proc_time, pid, || self.provider.proc_time(pid));
        let (prior, current) = match sampled {
            Ok(pair) => pair,
            Err(err) => {
                // gone or inaccessible; a later pid reuse starts over
                self.last_proc_time.remove(&pid);
                return Err(err);
            }
        };
        let elapsed = current.at.duration_since(prior.at);
        Ok(delta::process_cpu_percentage(&prior.value, &current.value, elapsed))
    }

    /// Throughput of interface `name` since the previous call for it.
    pub fn net_interface_rate(&self, name: &str) -> Result<NetRate> {
        let (prior, current) = self.sample_pair(&self.last_net, name.to_string(), || {
            self.provider.net_interface_stat(name)
        })?;
        let elapsed = current.at.duration_since(prior.at);
        Ok(delta::net_rate(&prior.value, &current.value, elapsed))
    }

    /// Returns the retained sample for `key` (or a fresh one taken a sampling
    /// interval earlier) together with a new sample, and retains the new one
    /// unless a later sample is already retained.
    fn sample_pair<K, V, F>(
        &self,
        history: &SnapshotHistory<K, V>,
        key: K,
        sample: F,
    ) -> Result<(Sampled<V>, Sampled<V>)>
    where
        K: Eq + Hash,
        V: Clone,
        F: Fn() -> Result<V>,
    {
        let prior = match history.get(&key) {
            Some(prior) => prior,
            None => {
                let first = Sampled {
                    value: sample()?,
                    at: Instant::now(),
                };
                if !self.sample_interval.is_zero() {
                    debug!(interval = ?self.sample_interval, "no prior sample, waiting");
                    std::thread::sleep(self.sample_interval);
                }
                first
            }
        };
        let current = Sampled {
            value: sample()?,
            at: Instant::now(),
        };
        // a concurrent caller may have retained a later sample already
        history.replace_if_newer(key, current.value.clone(), current.at);
        Ok((prior, current))
    }

    /// Drops every cached value and retained sample.
    pub fn reset(&self) {
        self.cpu.clear();
        self.cpu_list.clear();
        self.mem.clear();
        self.swap.clear();
        self.uptime.clear();
        self.load_average.clear();
        self.proc_list.clear();
        self.proc_mem.clear();
        self.proc_state.clear();
        self.proc_time.clear();
        self.file_systems.clear();
        self.file_system_usage.clear();
        self.net_interfaces.clear();
        self.net_interface_stat.clear();
        self.last_cpu.clear();
        self.last_cpu_list.clear();
        self.last_proc_time.clear();
        self.last_net.clear();
    }
}

impl<P: RawProvider> RawProvider for CachingProxy<P> {
    fn pid(&self) -> u32 {
        self.provider.pid()
    }

    fn cpu(&self) -> Result<Cpu> {
        self.cpu.get(&(), self.ttl(MetricKind::Cpu), || self.provider.cpu())
    }

    fn cpu_list(&self) -> Result<Vec<Cpu>> {
        self.cpu_list
            .get(&(), self.ttl(MetricKind::CpuList), || self.provider.cpu_list())
    }

    fn mem(&self) -> Result<Mem> {
        self.mem.get(&(), self.ttl(MetricKind::Mem), || self.provider.mem())
    }

    fn swap(&self) -> Result<Swap> {
        self.swap.get(&(), self.ttl(MetricKind::Swap), || self.provider.swap())
    }

    fn uptime(&self) -> Result<Uptime> {
        self.uptime
            .get(&(), self.ttl(MetricKind::Uptime), || self.provider.uptime())
    }

    fn load_average(&self) -> Result<LoadAverage> {
        self.load_average
            .get(&(), self.ttl(MetricKind::LoadAverage), || self.provider.load_average())
    }

    fn proc_list(&self) -> Result<Vec<u32>> {
        self.proc_list
            .get(&(), self.ttl(MetricKind::ProcList), || self.provider.proc_list())
    }

    fn proc_mem(&self, pid: u32) -> Result<ProcMem> {
        self.proc_mem
            .get(&pid, self.ttl(MetricKind::ProcMem), || self.provider.proc_mem(pid))
    }

    fn proc_state(&self, pid: u32) -> Result<ProcState> {
        self.proc_state
            .get(&pid, self.ttl(MetricKind::ProcState), || self.provider.proc_state(pid))
    }

    fn proc_time(&self, pid: u32) -> Result<ProcTime> {
        self.proc_time
            .get(&pid, self.ttl(MetricKind::ProcTime), || self.provider.proc_time(pid))
    }

    fn file_system_list(&self) -> Result<Vec<FileSystem>> {
        self.file_systems
            .get(&(), self.ttl(MetricKind::FileSystemList), || self.provider.file_system_list())
    }

    fn file_system_usage(&self, dir_name: &Path) -> Result<FileSystemUsage> {
        self.file_system_usage.get(
            &dir_name.to_path_buf(),
            self.ttl(MetricKind::FileSystemUsage),
            || self.provider.file_system_usage(dir_name),
        )
    }

    fn net_interface_list(&self) -> Result<Vec<String>> {
        self.net_interfaces
            .get(&(), self.ttl(MetricKind::NetInterfaceList), || self.provider.net_interface_list())
    }

    fn net_interface_stat(&self, name: &str) -> Result<NetInterfaceStat> {
        self.net_interface_stat.get(
            &name.to_string(),
            self.ttl(MetricKind::NetInterfaceStat),
            || self.provider.net_interface_stat(name),
        )
    }
}

use crate::capability::{CapabilityLoader, CapabilityState};
use crate::config::MetricsConfig;
use crate::error::Result;
use crate::metrics::{CpuPerc, FileSystemUsage};
use crate::mount::MountResolver;
use crate::process::ProcCpu;
use crate::provider::RawProvider;
use crate::proxy::CachingProxy;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PercentKind {
    Cpu,
    CpuList,
    Process(u32),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Percentage {
    Cpu(CpuPerc),
    CpuList(Vec<CpuPerc>),
    Process(ProcCpu),
}

/// The query surface: cached metrics, guarded mount usage and optional
/// capabilities behind one handle.
pub struct HostMetrics<P> {
    proxy: CachingProxy<P>,
    mounts: MountResolver<P>,
    capabilities: Arc<CapabilityLoader>,
}

impl<P: RawProvider> HostMetrics<P> {
    /// Wires everything from `config`, registering its capabilities with the
    /// process-wide loader.
    pub fn new(provider: Arc<P>, config: &MetricsConfig) -> Self {
        let capabilities = CapabilityLoader::global();
        capabilities.register_config(config);
        Self::from_parts(
            CachingProxy::new(Arc::clone(&provider), config),
            MountResolver::new(provider, &config.mounts),
            capabilities,
        )
    }

    pub fn from_parts(proxy: CachingProxy<P>, mounts: MountResolver<P>, capabilities: Arc<CapabilityLoader>) -> Self {
        Self {
            proxy,
            mounts,
            capabilities,
        }
    }

    pub fn percentage(&self, kind: PercentKind) -> Result<Percentage> {
        match kind {
            PercentKind::Cpu => self.proxy.cpu_perc().map(Percentage::Cpu),
            PercentKind::CpuList => self.proxy.cpu_perc_list().map(Percentage::CpuList),
            PercentKind::Process(pid) => self.proxy.proc_cpu(pid).map(Percentage::Process),
        }
    }

    /// Usage of the filesystem mounted at `path`; fails with `NotMounted`
    /// for paths that are not mount points and `Unreachable` for dead
    /// network servers.
    pub fn usage(&self, path: impl AsRef<Path>) -> Result<FileSystemUsage> {
        self.mounts.usage(path)
    }

    pub fn capability(&self, name: &str) -> Result<CapabilityState> {
        self.capabilities.resolve(name)
    }

    pub fn metrics(&self) -> &CachingProxy<P> {
        &self.proxy
    }

    pub fn mounts(&self) -> &MountResolver<P> {
        &self.mounts
    }

    pub fn capabilities(&self) -> &CapabilityLoader {
        &self.capabilities
    }
}

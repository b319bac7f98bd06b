use anyhow::Result;
use hostmetrics_core::{
    config::properties, CapabilityState, CpuPerc, FileSystemKind, FileSystemUsage, HostMetrics,
    LoadAverage, Mem, MetricsConfig, MetricsError, MountEntry, NetInterfaceStat, NetRate,
    PercentKind, Percentage, RawProvider, Swap, SysinfoProvider, Uptime,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{error, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tab {
    Dashboard,
    Filesystems,
    Network,
    Capabilities,
}

pub struct FileSystemRow {
    pub entry: MountEntry,
    pub usage: Result<FileSystemUsage, MetricsError>,
}

pub struct InterfaceRow {
    pub stat: NetInterfaceStat,
    pub rate: NetRate,
}

pub struct CapabilityRow {
    pub name: String,
    pub state: CapabilityState,
    pub library: Option<PathBuf>,
}

/// Everything the dashboard and network tabs show, gathered in one pass.
#[derive(Default)]
struct HostSample {
    cpu: Option<CpuPerc>,
    cores: Option<Vec<CpuPerc>>,
    mem: Option<Mem>,
    swap: Option<Swap>,
    load: Option<LoadAverage>,
    uptime: Option<Uptime>,
    interfaces: Vec<InterfaceRow>,
    failures: Vec<(&'static str, MetricsError)>,
}

/// Results sent back by the blocking refresh workers.
enum Refresh {
    Host(HostSample),
    Filesystems(Result<Vec<FileSystemRow>, MetricsError>),
    Capability {
        name: String,
        outcome: Result<CapabilityState, MetricsError>,
    },
}

type Metrics = HostMetrics<SysinfoProvider>;

/// Rate metrics sleep on their first sample and usage probes wait on dead
/// servers, so none of this may run on the render loop.
fn sample_host(metrics: &Metrics) -> HostSample {
    let mut sample = HostSample::default();
    match metrics.percentage(PercentKind::Cpu) {
        Ok(Percentage::Cpu(perc)) => sample.cpu = Some(perc),
        Ok(_) => {}
        Err(e) => sample.failures.push(("cpu", e)),
    }
    match metrics.percentage(PercentKind::CpuList) {
        Ok(Percentage::CpuList(cores)) => sample.cores = Some(cores),
        Ok(_) => {}
        Err(e) => sample.failures.push(("cpu_list", e)),
    }

    let proxy = metrics.metrics();
    sample.mem = proxy.mem().ok();
    sample.swap = proxy.swap().ok();
    sample.load = proxy.load_average().ok();
    sample.uptime = proxy.uptime().ok();

    let names = proxy.net_interface_list().unwrap_or_default();
    sample.interfaces = names
        .iter()
        .filter_map(|name| {
            let stat = proxy.net_interface_stat(name).ok()?;
            let rate = proxy.net_interface_rate(name).unwrap_or_default();
            Some(InterfaceRow { stat, rate })
        })
        .collect();
    sample
}

/// Re-lists mounts and queries usage for each real filesystem. Network
/// mounts whose server is down come back as `Unreachable` rows.
fn sample_filesystems(metrics: &Metrics) -> Result<Vec<FileSystemRow>, MetricsError> {
    let entries = metrics.mounts().refresh()?;
    Ok(entries
        .into_iter()
        .filter(|entry| entry.kind != FileSystemKind::None)
        .map(|entry| {
            let usage = metrics.usage(&entry.mount_point);
            FileSystemRow { entry, usage }
        })
        .collect())
}

pub struct App {
    pub metrics: Arc<Metrics>,
    pub cpu: Option<CpuPerc>,
    pub cores: Vec<CpuPerc>,
    pub mem: Option<Mem>,
    pub swap: Option<Swap>,
    pub load: Option<LoadAverage>,
    pub uptime: Option<Uptime>,
    pub filesystems: Vec<FileSystemRow>,
    pub interfaces: Vec<InterfaceRow>,
    pub capabilities: Vec<CapabilityRow>,
    pub current_tab: Tab,
    pub selected_row: usize,
    pub status_message: Option<String>,
    refresh_tx: mpsc::UnboundedSender<Refresh>,
    refresh_rx: mpsc::UnboundedReceiver<Refresh>,
    host_pending: bool,
    fs_pending: bool,
    resolving: Option<String>,
    last_update: Option<Instant>,
    update_interval: Duration,
    last_fs_update: Option<Instant>,
    fs_update_interval: Duration,
}

impl App {
    pub async fn new(config: &MetricsConfig) -> Result<Self> {
        let metrics = Arc::new(HostMetrics::new(Arc::new(SysinfoProvider::new()), config));
        let (refresh_tx, refresh_rx) = mpsc::unbounded_channel();

        let mut app = Self {
            metrics,
            cpu: None,
            cores: Vec::new(),
            mem: None,
            swap: None,
            load: None,
            uptime: None,
            filesystems: Vec::new(),
            interfaces: Vec::new(),
            capabilities: Vec::new(),
            current_tab: Tab::Dashboard,
            selected_row: 0,
            status_message: Some("sampling...".to_string()),
            refresh_tx,
            refresh_rx,
            host_pending: false,
            fs_pending: false,
            resolving: None,
            last_update: None,
            update_interval: Duration::from_millis(1000),
            last_fs_update: None,
            fs_update_interval: Duration::from_secs(10),
        };
        app.request_host();
        app.request_filesystems();
        app.refresh_capability_states();
        Ok(app)
    }

    /// Applies finished refreshes and starts the ones that are due. Never
    /// blocks on a metric.
    pub async fn update(&mut self) -> Result<()> {
        while let Ok(refresh) = self.refresh_rx.try_recv() {
            self.apply(refresh);
        }

        if self.last_update.map_or(true, |at| at.elapsed() >= self.update_interval) {
            self.request_host();
            self.refresh_capability_states();
        }
        let fs_due = self
            .last_fs_update
            .map_or(true, |at| at.elapsed() >= self.fs_update_interval);
        if self.current_tab == Tab::Filesystems && fs_due {
            self.request_filesystems();
        }
        Ok(())
    }

    /// Runs `job` on the blocking pool and sends its result back to the loop.
    fn spawn_refresh<F>(&self, what: &'static str, job: F)
    where
        F: FnOnce(&Metrics) -> Refresh + Send + 'static,
    {
        let metrics = Arc::clone(&self.metrics);
        let tx = self.refresh_tx.clone();
        tokio::spawn(async move {
            match tokio::task::spawn_blocking(move || job(&metrics)).await {
                Ok(refresh) => {
                    let _ = tx.send(refresh);
                }
                Err(e) => error!(job = what, error = %e, "refresh worker panicked"),
            }
        });
    }

    fn request_host(&mut self) {
        if self.host_pending {
            return;
        }
        self.host_pending = true;
        self.last_update = Some(Instant::now());
        self.spawn_refresh("host", |metrics| Refresh::Host(sample_host(metrics)));
    }

    fn request_filesystems(&mut self) {
        if self.fs_pending {
            return;
        }
        self.fs_pending = true;
        self.last_fs_update = Some(Instant::now());
        self.spawn_refresh("filesystems", |metrics| Refresh::Filesystems(sample_filesystems(metrics)));
    }

    fn apply(&mut self, refresh: Refresh) {
        match refresh {
            Refresh::Host(sample) => {
                self.host_pending = false;
                self.cpu = sample.cpu.or(self.cpu);
                if let Some(cores) = sample.cores {
                    self.cores = cores;
                }
                self.mem = sample.mem;
                self.swap = sample.swap;
                self.load = sample.load;
                self.uptime = sample.uptime;
                self.interfaces = sample.interfaces;
                if sample.failures.is_empty() && self.status_message.as_deref() == Some("sampling...") {
                    self.status_message = None;
                }
                for (what, err) in sample.failures {
                    self.note(what, &err);
                }
            }
            Refresh::Filesystems(outcome) => {
                self.fs_pending = false;
                match outcome {
                    Ok(rows) => {
                        self.filesystems = rows;
                        if self.current_tab == Tab::Filesystems {
                            self.status_message = Some(format!("{} filesystems", self.filesystems.len()));
                        }
                    }
                    Err(e) => self.note("mounts", &e),
                }
            }
            Refresh::Capability { name, outcome } => {
                self.resolving = None;
                self.status_message = Some(match outcome {
                    Ok(state) => format!("{}: {}", name, state),
                    Err(e) => format!("{}: {}", name, e),
                });
                self.refresh_capability_states();
            }
        }
    }

    fn refresh_capability_states(&mut self) {
        let loader = self.metrics.capabilities();
        self.capabilities = loader
            .names()
            .into_iter()
            .map(|name| CapabilityRow {
                state: loader.state(&name),
                library: properties::shared_library(&name),
                name,
            })
            .collect();
    }

    /// Resolving may build the library, which can take seconds.
    pub fn resolve_selected_capability(&mut self) {
        let Some(name) = self.capabilities.get(self.selected_row).map(|row| row.name.clone()) else {
            self.status_message = Some("no capabilities configured".to_string());
            return;
        };
        if let Some(busy) = &self.resolving {
            self.status_message = Some(format!("still resolving {}", busy));
            return;
        }
        self.status_message = Some(format!("resolving {}...", name));
        self.resolving = Some(name.clone());
        self.spawn_refresh("capability", move |metrics| Refresh::Capability {
            outcome: metrics.capability(&name),
            name,
        });
    }

    /// `r`: re-list mounts, resolve the selected capability, or sample the
    /// host now. Retained rate samples are kept so a refresh never waits for
    /// a fresh sampling interval.
    pub fn refresh_current_tab(&mut self) {
        match self.current_tab {
            Tab::Filesystems => {
                self.request_filesystems();
                self.status_message = Some("refreshing filesystems...".to_string());
            }
            Tab::Capabilities => self.resolve_selected_capability(),
            Tab::Dashboard | Tab::Network => self.request_host(),
        }
    }

    fn note(&mut self, what: &str, err: &MetricsError) {
        if !matches!(err, MetricsError::NotImplemented { .. }) {
            warn!(metric = what, error = %err, "metric unavailable");
        }
        self.status_message = Some(format!("{}: {}", what, err));
    }

    fn row_count(&self) -> usize {
        match self.current_tab {
            Tab::Dashboard => 0,
            Tab::Filesystems => self.filesystems.len(),
            Tab::Network => self.interfaces.len(),
            Tab::Capabilities => self.capabilities.len(),
        }
    }

    pub fn next_row(&mut self) {
        let count = self.row_count();
        if count > 0 && self.selected_row + 1 < count {
            self.selected_row += 1;
        }
    }

    pub fn previous_row(&mut self) {
        self.selected_row = self.selected_row.saturating_sub(1);
    }

    pub fn next_tab(&mut self) {
        self.current_tab = match self.current_tab {
            Tab::Dashboard => Tab::Filesystems,
            Tab::Filesystems => Tab::Network,
            Tab::Network => Tab::Capabilities,
            Tab::Capabilities => Tab::Dashboard,
        };
        self.selected_row = 0;
    }

    pub fn previous_tab(&mut self) {
        self.current_tab = match self.current_tab {
            Tab::Dashboard => Tab::Capabilities,
            Tab::Filesystems => Tab::Dashboard,
            Tab::Network => Tab::Filesystems,
            Tab::Capabilities => Tab::Network,
        };
        self.selected_row = 0;
    }

    pub fn set_tab(&mut self, index: usize) {
        self.current_tab = match index {
            0 => Tab::Dashboard,
            1 => Tab::Filesystems,
            2 => Tab::Network,
            3 => Tab::Capabilities,
            _ => self.current_tab,
        };
        self.selected_row = 0;
    }

    pub fn get_tab_index(&self) -> usize {
        match self.current_tab {
            Tab::Dashboard => 0,
            Tab::Filesystems => 1,
            Tab::Network => 2,
            Tab::Capabilities => 3,
        }
    }
}

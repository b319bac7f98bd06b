pub mod cache;
pub mod capability;
pub mod config;
pub mod delta;
pub mod error;
pub mod facade;
pub mod metrics;
pub mod mount;
pub mod process;
pub mod provider;
pub mod proxy;
pub mod sysinfo_provider;


pub use capability::{CapabilityLoader, CapabilityState};
pub use config::MetricsConfig;
pub use error::{MetricsError, Result};
pub use facade::{HostMetrics, PercentKind, Percentage};
pub use metrics::*;
pub use mount::{MountEntry, MountResolver};
pub use process::{ProcCpu, ProcMem, ProcState, ProcTime, ProcessStatus};
pub use provider::RawProvider;
pub use proxy::{CachingProxy, MetricKind};
pub use sysinfo_provider::SysinfoProvider;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcMem {
    pub pid: u32,
    /// Virtual size in bytes.
    pub size: u64,
    pub resident: u64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ProcessStatus {
    Running,
    Sleeping,
    Idle,
    Stopped,
    Zombie,
    Dead,
    Unknown,
}

impl ProcessStatus {
    /// Maps the single-letter state used by `/proc/<pid>/stat`.
    pub fn from_state_char(state: char) -> Self {
        match state {
            'R' => Self::Running,
            'S' | 'D' => Self::Sleeping,
            'I' => Self::Idle,
            'T' | 't' => Self::Stopped,
            'Z' => Self::Zombie,
            'X' | 'x' => Self::Dead,
            _ => Self::Unknown,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcState {
    pub pid: u32,
    pub name: String,
    pub status: ProcessStatus,
    pub ppid: Option<u32>,
    pub threads: Option<u64>,
}

/// Cumulative CPU time of a process, in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcTime {
    pub pid: u32,
    pub start_time: chrono::DateTime<chrono::Utc>,
    pub user: u64,
    pub sys: u64,
    pub total: u64,
}

impl ProcTime {
    pub fn new(pid: u32, start_time: chrono::DateTime<chrono::Utc>, user: u64, sys: u64) -> Self {
        Self {
            pid,
            start_time,
            user,
            sys,
            total: user + sys,
        }
    }

    /// Same pid and same start time: the counters belong to one process.
    pub fn same_process(&self, other: &ProcTime) -> bool {
        self.pid == other.pid && self.start_time == other.start_time
    }
}

/// Process CPU usage between two samples.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProcCpu {
    pub time: ProcTime,
    /// Fraction of one CPU; can exceed 1.0 for multi-threaded processes.
    pub percent: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_proc_state_letters() {
        assert_eq!(ProcessStatus::from_state_char('R'), ProcessStatus::Running);
        assert_eq!(ProcessStatus::from_state_char('D'), ProcessStatus::Sleeping);
        assert_eq!(ProcessStatus::from_state_char('Z'), ProcessStatus::Zombie);
        assert_eq!(ProcessStatus::from_state_char('?'), ProcessStatus::Unknown);
    }

    #[test]
    fn pid_reuse_is_a_different_process() {
        let start = chrono::Utc::now();
        let a = ProcTime::new(42, start, 10, 5);
        let b = ProcTime::new(42, start + chrono::Duration::seconds(3), 1, 1);
        assert!(a.same_process(&a));
        assert!(!a.same_process(&b));
        assert_eq!(a.total, 15);
    }
}

//! Rates and percentages derived from pairs of raw samples.
//!
//! Everything here is pure: no shared state, safe to call from any thread.
//! Counter regressions (reboots, wraparound, pid reuse) produce zero rather
//! than negative or undefined values.

use crate::metrics::{Cpu, CpuPerc, NetInterfaceStat, NetRate};
use crate::process::{ProcCpu, ProcTime};
use std::time::Duration;

/// Sampling interval used when no prior sample exists.
pub const DEFAULT_SAMPLE_INTERVAL: Duration = Duration::from_millis(500);

/// Fractions of CPU time spent in each state between `prior` and `current`.
pub fn cpu_percentage(prior: &Cpu, current: &Cpu) -> CpuPerc {
    if current.total <= prior.total {
        return CpuPerc::default();
    }
    let elapsed = (current.total - prior.total) as f64;
    let frac = |prev: u64, cur: u64| (cur.saturating_sub(prev) as f64 / elapsed).clamp(0.0, 1.0);

    let user = frac(prior.user, current.user);
    let sys = frac(prior.sys, current.sys);
    let nice = frac(prior.nice, current.nice);
    let wait = frac(prior.wait, current.wait);
    CpuPerc {
        user,
        sys,
        nice,
        idle: frac(prior.idle, current.idle),
        wait,
        irq: frac(prior.irq, current.irq),
        soft_irq: frac(prior.soft_irq, current.soft_irq),
        stolen: frac(prior.stolen, current.stolen),
        combined: (user + sys + nice + wait).clamp(0.0, 1.0),
    }
}

/// Per-CPU variant. Pairs entries by index; when the CPU count changed
/// between samples the extra entries on the longer side are dropped.
pub fn cpu_percentage_list(prior: &[Cpu], current: &[Cpu]) -> Vec<CpuPerc> {
    prior
        .iter()
        .zip(current)
        .map(|(prev, cur)| cpu_percentage(prev, cur))
        .collect()
}

/// CPU usage of one process over `elapsed` wall time.
pub fn process_cpu_percentage(prior: &ProcTime, current: &ProcTime, elapsed: Duration) -> ProcCpu {
    let elapsed_ms = elapsed.as_millis();
    let percent = if !prior.same_process(current) || elapsed_ms == 0 || current.total < prior.total
    {
        0.0
    } else {
        (current.total - prior.total) as f64 / elapsed_ms as f64
    };
    ProcCpu {
        time: *current,
        percent,
    }
}

/// Per-second interface throughput over `elapsed` wall time.
pub fn net_rate(prior: &NetInterfaceStat, current: &NetInterfaceStat, elapsed: Duration) -> NetRate {
    let secs = elapsed.as_secs_f64();
    if secs <= 0.0 || prior.name != current.name {
        return NetRate::default();
    }
    let per_sec = |prev: u64, cur: u64| cur.saturating_sub(prev) as f64 / secs;
    NetRate {
        rx_bytes_per_sec: per_sec(prior.rx_bytes, current.rx_bytes),
        tx_bytes_per_sec: per_sec(prior.tx_bytes, current.tx_bytes),
        rx_packets_per_sec: per_sec(prior.rx_packets, current.rx_packets),
        tx_packets_per_sec: per_sec(prior.tx_packets, current.tx_packets),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn cpu(user: u64, sys: u64, idle: u64) -> Cpu {
        Cpu::from_fields(user, sys, 0, idle, 0, 0, 0, 0)
    }

    #[test]
    fn splits_elapsed_ticks_by_state() {
        let prior = cpu(100, 50, 850);
        let current = cpu(160, 70, 970);
        let perc = cpu_percentage(&prior, &current);

        assert!((perc.user - 0.3).abs() < 1e-9);
        assert!((perc.sys - 0.1).abs() < 1e-9);
        assert!((perc.idle - 0.6).abs() < 1e-9);
        assert!((perc.combined - 0.4).abs() < 1e-9);
    }

    #[test]
    fn combined_excludes_interrupt_and_steal_time() {
        let prior = Cpu::from_fields(0, 0, 0, 0, 0, 0, 0, 0);
        let current = Cpu::from_fields(20, 10, 5, 40, 5, 10, 5, 5);
        let perc = cpu_percentage(&prior, &current);

        assert!((perc.combined - 0.4).abs() < 1e-9);
        assert!((perc.idle - 0.4).abs() < 1e-9);
        assert!((perc.stolen - 0.05).abs() < 1e-9);
    }

    #[test]
    fn identical_samples_are_all_zero() {
        let x = cpu(123, 45, 6789);
        assert!(cpu_percentage(&x, &x).is_zero());
    }

    #[test]
    fn counter_reset_is_all_zero() {
        let prior = cpu(5000, 5000, 5000);
        let current = cpu(10, 10, 10);
        assert!(cpu_percentage(&prior, &current).is_zero());
    }

    #[test]
    fn jitter_is_clamped() {
        // a field advanced further than the reported total
        let prior = Cpu { user: 0, total: 0, ..Default::default() };
        let current = Cpu { user: 150, idle: 0, total: 100, ..Default::default() };
        let perc = cpu_percentage(&prior, &current);
        assert_eq!(perc.user, 1.0);
        assert_eq!(perc.combined, 1.0);

        // a field that went backwards while total advanced
        let prior = Cpu { sys: 40, total: 100, ..Default::default() };
        let current = Cpu { sys: 30, total: 200, ..Default::default() };
        assert_eq!(cpu_percentage(&prior, &current).sys, 0.0);
    }

    #[test]
    fn list_drops_unpaired_cpus() {
        let prior = vec![cpu(1, 1, 1); 4];
        let current = vec![cpu(2, 2, 2); 2];
        assert_eq!(cpu_percentage_list(&prior, &current).len(), 2);
        assert_eq!(cpu_percentage_list(&current, &prior).len(), 2);
        assert!(cpu_percentage_list(&[], &current).is_empty());
    }

    #[test]
    fn process_cpu_over_wall_time() {
        let start = chrono::Utc::now();
        let prior = ProcTime::new(7, start, 1_000, 500);
        let current = ProcTime::new(7, start, 1_400, 600);

        let cpu = process_cpu_percentage(&prior, &current, Duration::from_millis(1_000));
        assert!((cpu.percent - 0.5).abs() < 1e-9);
        assert_eq!(cpu.time, current);

        let zero = process_cpu_percentage(&prior, &current, Duration::ZERO);
        assert_eq!(zero.percent, 0.0);
    }

    #[test]
    fn process_cpu_ignores_reused_pid() {
        let start = chrono::Utc::now();
        let prior = ProcTime::new(7, start, 10_000, 0);
        let current = ProcTime::new(7, start + chrono::Duration::seconds(1), 50, 0);
        let cpu = process_cpu_percentage(&prior, &current, Duration::from_secs(1));
        assert_eq!(cpu.percent, 0.0);
    }

    #[test]
    fn net_rate_per_second() {
        let prior = NetInterfaceStat {
            name: "eth0".into(),
            rx_bytes: 1_000,
            tx_bytes: 500,
            ..Default::default()
        };
        let current = NetInterfaceStat {
            name: "eth0".into(),
            rx_bytes: 3_000,
            tx_bytes: 400,
            ..Default::default()
        };
        let rate = net_rate(&prior, &current, Duration::from_secs(2));
        assert_eq!(rate.rx_bytes_per_sec, 1_000.0);
        assert_eq!(rate.tx_bytes_per_sec, 0.0);
    }

    fn arb_cpu() -> impl Strategy<Value = Cpu> {
        (0u64..1 << 40, 0u64..1 << 40, 0u64..1 << 40, 0u64..1 << 40, 0u64..1 << 40)
            .prop_map(|(user, sys, nice, idle, wait)| Cpu::from_fields(user, sys, nice, idle, wait, 0, 0, 0))
    }

    proptest! {
        #[test]
        fn fractions_stay_in_unit_interval(prior in arb_cpu(), current in arb_cpu()) {
            let perc = cpu_percentage(&prior, &current);
            for field in perc.fields() {
                prop_assert!((0.0..=1.0).contains(&field), "{field} out of range");
            }
        }

        #[test]
        fn advancing_counters_stay_in_unit_interval(
            prior in arb_cpu(),
            du in 0u64..10_000, ds in 0u64..10_000, di in 0u64..10_000,
        ) {
            let current = Cpu::from_fields(
                prior.user + du, prior.sys + ds, prior.nice, prior.idle + di,
                prior.wait, prior.irq, prior.soft_irq, prior.stolen,
            );
            prop_assume!(current.total >= prior.total);
            let perc = cpu_percentage(&prior, &current);
            for field in perc.fields() {
                prop_assert!((0.0..=1.0).contains(&field));
            }
            if current.total > prior.total {
                prop_assert!((perc.user + perc.sys + perc.idle - 1.0).abs() < 1e-9);
            }
        }
    }
}

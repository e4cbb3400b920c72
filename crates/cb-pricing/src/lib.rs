//! Cost & pricing oracle: a pure table lookup from `(instance_type or
//! serverless cpu/mem, spot?)` to USD/hour, plus the formulas the
//! dispatcher uses to roll per-task container billing into an aggregate
//! cluster cost.
//!
//! Explicitly out of scope (spec §1 non-goals): live pricing-API lookups.
//! This crate takes a static table; a production deployment would refresh
//! it out of band and hand the dispatcher a fresh oracle per run.

use std::collections::HashMap;
use std::time::Duration;

use cb_types::{Architecture, CpuUnits, LaunchKind, MemoryGb};

/// USD per vCPU-hour and USD per GB-hour for serverless billing, matching
/// the per-task-container pricing model most managed container services
/// publish.
const SERVERLESS_X86_64_CPU_HOUR: f64 = 0.04048;
const SERVERLESS_X86_64_GB_HOUR: f64 = 0.004445;
const SERVERLESS_ARM64_CPU_HOUR: f64 = 0.03238;
const SERVERLESS_ARM64_GB_HOUR: f64 = 0.003556;

/// On-demand instance price table, USD/hour. A real deployment sources
/// this from the provider's pricing API and refreshes it periodically; the
/// core only needs a lookup, so a static table satisfies the contract.
fn instance_on_demand_table() -> HashMap<&'static str, f64> {
    HashMap::from([
        ("t3.medium", 0.0416),
        ("t3.large", 0.0832),
        ("t3.xlarge", 0.1664),
        ("t4g.medium", 0.0336),
        ("t4g.large", 0.0672),
        ("c6i.xlarge", 0.17),
        ("c6i.2xlarge", 0.34),
        ("c6g.xlarge", 0.136),
        ("m6i.xlarge", 0.192),
        ("m6i.2xlarge", 0.384),
        ("m6i.4xlarge", 0.768),
    ])
}

/// Typical spot discount off on-demand, applied uniformly across the
/// table. Real spot pricing fluctuates continuously; this oracle gives a
/// conservative planning estimate, not a billing-accurate figure (spec's
/// non-goal: "guaranteeing cost ceilings in the face of adversarial
/// providers").
const SPOT_DISCOUNT: f64 = 0.3;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PricePerHour(pub f64);

/// `price(instance_type, spot?) -> USD/hour` plus serverless-container
/// pricing from `(cpu_units, memory_gb, architecture)`.
#[derive(Debug, Clone, Default)]
pub struct PricingOracle {
    instance_table: HashMap<&'static str, f64>,
}

impl PricingOracle {
    pub fn new() -> Self {
        Self {
            instance_table: instance_on_demand_table(),
        }
    }

    pub fn instance_price(&self, instance_type: &str, spot: bool) -> Option<PricePerHour> {
        let on_demand = *self.instance_table.get(instance_type)?;
        let price = if spot { on_demand * (1.0 - SPOT_DISCOUNT) } else { on_demand };
        Some(PricePerHour(price))
    }

    pub fn serverless_price_per_worker(&self, cpu: CpuUnits, memory: MemoryGb, arch: Architecture) -> PricePerHour {
        let (cpu_rate, mem_rate) = match arch {
            Architecture::X86_64 => (SERVERLESS_X86_64_CPU_HOUR, SERVERLESS_X86_64_GB_HOUR),
            Architecture::Arm64 => (SERVERLESS_ARM64_CPU_HOUR, SERVERLESS_ARM64_GB_HOUR),
        };
        PricePerHour(cpu.value() * cpu_rate + memory.gb() * mem_rate)
    }

    /// Dollar cost of running `workers` containers of a given shape for
    /// `elapsed`, for Serverless launch.
    pub fn serverless_cost(
        &self,
        workers: u32,
        cpu: CpuUnits,
        memory: MemoryGb,
        arch: Architecture,
        elapsed: Duration,
    ) -> f64 {
        let per_worker = self.serverless_price_per_worker(cpu, memory, arch).0;
        per_worker * workers as f64 * (elapsed.as_secs_f64() / 3600.0)
    }

    /// Dollar cost of an instance-backed pool at `desired_count` for
    /// `elapsed`; `None` if `instance_type` is not in the table.
    pub fn instance_cost(&self, instance_type: &str, spot: bool, desired_count: u32, elapsed: Duration) -> Option<f64> {
        let per_hour = self.instance_price(instance_type, spot)?.0;
        Some(per_hour * desired_count as f64 * (elapsed.as_secs_f64() / 3600.0))
    }

    /// Total cost for a cluster run, dispatching on `launch_kind`.
    pub fn cluster_cost(
        &self,
        launch_kind: LaunchKind,
        workers: u32,
        cpu: CpuUnits,
        memory: MemoryGb,
        arch: Architecture,
        instance_type: Option<&str>,
        use_spot: bool,
        elapsed: Duration,
    ) -> f64 {
        match launch_kind {
            LaunchKind::Serverless => self.serverless_cost(workers, cpu, memory, arch, elapsed),
            LaunchKind::Instance => instance_type
                .and_then(|t| self.instance_cost(t, use_spot, workers, elapsed))
                .unwrap_or(0.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spot_is_cheaper_than_on_demand() {
        let oracle = PricingOracle::new();
        let on_demand = oracle.instance_price("c6i.xlarge", false).unwrap();
        let spot = oracle.instance_price("c6i.xlarge", true).unwrap();
        assert!(spot.0 < on_demand.0);
    }

    #[test]
    fn unknown_instance_type_is_none() {
        let oracle = PricingOracle::new();
        assert!(oracle.instance_price("nonexistent.huge", false).is_none());
    }

    #[test]
    fn serverless_cost_scales_with_worker_count() {
        let oracle = PricingOracle::new();
        let cpu = CpuUnits::new(1.0).unwrap();
        let mem = MemoryGb::from_gb(2.0).unwrap();
        let one = oracle.serverless_cost(1, cpu, mem, Architecture::X86_64, Duration::from_secs(3600));
        let five = oracle.serverless_cost(5, cpu, mem, Architecture::X86_64, Duration::from_secs(3600));
        assert!((five - one * 5.0).abs() < 1e-9);
    }

    #[test]
    fn arm64_is_cheaper_than_x86_64_per_spec_discount() {
        let oracle = PricingOracle::new();
        let cpu = CpuUnits::new(1.0).unwrap();
        let mem = MemoryGb::from_gb(2.0).unwrap();
        let x86 = oracle.serverless_price_per_worker(cpu, mem, Architecture::X86_64).0;
        let arm = oracle.serverless_price_per_worker(cpu, mem, Architecture::Arm64).0;
        assert!(arm < x86);
    }
}

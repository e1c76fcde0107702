//! CPU budget from the cgroup quota.
//!
//! Containers often get fewer CPUs than the host reports. The quota is read
//! from cgroup v2 `cpu.max`, falling back to the v1 `cpu.cfs_quota_us` /
//! `cpu.cfs_period_us` pair; the resulting budget is published in the
//! client hub for anything that sizes worker pools.

use async_trait::async_trait;
use modkit::{Module, ModuleCtx};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Quota expressed as `quota` microseconds per `period`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpuQuota {
    pub quota_us: u64,
    pub period_us: u64,
}

/// CPUs the process should plan for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpuBudget {
    pub cpus: usize,
    /// `None` when no quota is set; the budget is then the host parallelism.
    pub quota: Option<CpuQuota>,
}

impl CpuBudget {
    /// ceil(quota / period), at least 1, never above `available`.
    pub fn compute(quota: Option<CpuQuota>, available: usize) -> Self {
        let available = available.max(1);
        let cpus = match quota {
            Some(q) if q.period_us > 0 => {
                let n = q.quota_us.div_ceil(q.period_us).max(1);
                usize::try_from(n).unwrap_or(usize::MAX).min(available)
            }
            _ => available,
        };
        Self { cpus, quota }
    }
}

/// Parse cgroup v2 `cpu.max` ("<quota> <period>" or "max <period>").
pub fn parse_cpu_max(contents: &str) -> Option<CpuQuota> {
    let mut parts = contents.split_whitespace();
    let quota = parts.next()?;
    let period_us = parts.next().map_or(Some(100_000), |p| p.parse().ok())?;
    if quota == "max" {
        return None;
    }
    let quota_us = quota.parse().ok()?;
    Some(CpuQuota {
        quota_us,
        period_us,
    })
}

/// Parse the cgroup v1 pair; a negative quota means unlimited.
pub fn parse_cfs(quota: &str, period: &str) -> Option<CpuQuota> {
    let quota: i64 = quota.trim().parse().ok()?;
    let period_us: u64 = period.trim().parse().ok()?;
    let quota_us = u64::try_from(quota).ok()?;
    Some(CpuQuota {
        quota_us,
        period_us,
    })
}

/// Read the quota under `root` (normally `/sys/fs/cgroup`).
pub fn detect_quota(root: &Path) -> Option<CpuQuota> {
    if let Ok(contents) = std::fs::read_to_string(root.join("cpu.max")) {
        return parse_cpu_max(&contents);
    }
    let v1 = root.join("cpu");
    let quota = std::fs::read_to_string(v1.join("cpu.cfs_quota_us")).ok()?;
    let period = std::fs::read_to_string(v1.join("cpu.cfs_period_us")).ok()?;
    parse_cfs(&quota, &period)
}

/// Publishes a [`CpuBudget`] derived from the cgroup CPU quota.
#[derive(Debug, Clone)]
pub struct ResourceTuner {
    pub cgroup_root: PathBuf,
}

impl Default for ResourceTuner {
    fn default() -> Self {
        Self {
            cgroup_root: PathBuf::from("/sys/fs/cgroup"),
        }
    }
}

#[async_trait]
impl Module for ResourceTuner {
    fn name(&self) -> &'static str {
        "maxprocs"
    }

    fn deps(&self) -> &'static [&'static str] {
        &["config"]
    }

    async fn initialize(&self, ctx: &ModuleCtx) -> anyhow::Result<()> {
        let available = std::thread::available_parallelism().map_or(1, |n| n.get());
        let budget = CpuBudget::compute(detect_quota(&self.cgroup_root), available);
        match budget.quota {
            Some(q) => tracing::info!(
                cpus = budget.cpus,
                quota_us = q.quota_us,
                period_us = q.period_us,
                "CPU budget set from cgroup quota"
            ),
            None => tracing::info!(cpus = budget.cpus, "no CPU quota; using host parallelism"),
        }
        ctx.client_hub().register(Arc::new(budget));
        Ok(())
    }
}

//! Per-DON workflow quota checks run before a registration or activation.

use anyhow::bail;
use tracing::debug;

use wfctl_core::model::OwnerAddress;
use wfctl_registry::RegistryClient;

/// Page size used when counting an owner's workflows.
pub const LIMIT_PAGE_SIZE: u64 = 200;

/// Active workflows an owner has on one DON, against the registry maximum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DonUsage {
    pub active: usize,
    pub max: u32,
}

impl DonUsage {
    pub fn is_full(&self) -> bool {
        self.active >= self.max as usize
    }
}

/// Counts `owner`'s active workflows on `don_family`.
///
/// Versions named `replaced` are left out; the registry pauses them when the
/// new version lands.
pub async fn don_usage(
    registry: &RegistryClient,
    owner: &OwnerAddress,
    don_family: &str,
    replaced: Option<&str>,
) -> anyhow::Result<DonUsage> {
    let max = registry.get_max_workflows_per_user_don(owner, don_family).await?;
    let active = registry
        .list_workflows_by_owner(owner, LIMIT_PAGE_SIZE)
        .await?
        .iter()
        .filter(|w| w.is_active() && w.don_family == don_family)
        .filter(|w| replaced != Some(w.workflow_name.as_str()))
        .count();
    debug!(don_family, active, max, "DON usage");
    Ok(DonUsage { active, max })
}

/// Fails when one more active workflow would exceed the DON quota.
pub async fn check_don_limit(
    registry: &RegistryClient,
    owner: &OwnerAddress,
    don_family: &str,
    replaced: Option<&str>,
) -> anyhow::Result<DonUsage> {
    let usage = don_usage(registry, owner, don_family, replaced).await?;
    if usage.is_full() {
        bail!(
            "workflow limit reached for DON {don_family}: {}/{} active workflows",
            usage.active,
            usage.max
        );
    }
    Ok(usage)
}

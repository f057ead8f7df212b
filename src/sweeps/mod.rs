//! Periodic jobs over tenant state. Each sweep can be scoped to one tenant and run
//! as a dry run that only reports what it would do.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::Store;
use crate::models::tenant::Tenant;

pub mod escalation;
pub mod patterns;
pub mod revalidation;
pub mod scheduler;
pub mod stale_assets;

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct SweepOptions {
    pub tenant_id: Option<Uuid>,
    #[serde(default)]
    pub dry_run: bool,
}

impl SweepOptions {
    pub fn all() -> Self {
        Self::default()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SweepSummary {
    pub sweep: &'static str,
    pub dry_run: bool,
    pub examined: usize,
    pub created: usize,
    pub updated: usize,
    pub resolved: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl SweepSummary {
    pub fn new(sweep: &'static str, opts: &SweepOptions) -> Self {
        Self {
            sweep,
            dry_run: opts.dry_run,
            ..Default::default()
        }
    }
}

/// Active tenants in scope for a sweep.
pub(crate) async fn tenants_in_scope(
    store: &dyn Store,
    opts: &SweepOptions,
) -> anyhow::Result<Vec<Tenant>> {
    let tenants = store.list_tenants().await?;
    Ok(match opts.tenant_id {
        Some(id) => tenants.into_iter().filter(|t| t.tenant_id == id).collect(),
        None => tenants,
    })
}

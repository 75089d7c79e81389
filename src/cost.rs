use serde::{Deserialize, Serialize};

use crate::models::{AddOnPack, IotPlan};

/// Cost attributed to one selected add-on pack.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddonCost {
    pub addon_id: i64,
    pub name: String,
    pub cost: f64,
}

/// Itemized monthly cost for a plan + add-on combination at a given usage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostBreakdown {
    pub plan_cost: f64,
    pub addon_costs: Vec<AddonCost>,
    pub overage_cost: f64,
}

impl CostBreakdown {
    pub fn total(&self) -> f64 {
        self.plan_cost + self.addon_costs.iter().map(|a| a.cost).sum::<f64>() + self.overage_cost
    }
}

/// What-if comparison of two cost breakdowns. Positive `saving` means the
/// candidate is cheaper.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WhatIfComparison {
    pub current_total: f64,
    pub candidate_total: f64,
    pub saving: f64,
}

/// Estimates the monthly cost of `plan` with `addons` at `usage_mb`.
///
/// Add-on packs extend the quota before overage applies:
/// overage = max(0, usage − plan quota − add-on MB) × overage-per-MB.
pub fn estimate_cost(plan: &IotPlan, addons: &[AddOnPack], usage_mb: f64) -> CostBreakdown {
    let addon_costs: Vec<AddonCost> = addons
        .iter()
        .map(|a| AddonCost {
            addon_id: a.addon_id,
            name: a.name.clone(),
            cost: a.price,
        })
        .collect();

    let quota_mb = plan.monthly_quota_mb as f64 + addons.iter().map(|a| a.extra_mb as f64).sum::<f64>();
    let overage_mb = (usage_mb - quota_mb).max(0.0);

    CostBreakdown {
        plan_cost: plan.monthly_price,
        addon_costs,
        overage_cost: overage_mb * plan.overage_per_mb,
    }
}

/// Compares two breakdowns. Pure and symmetric up to the sign convention:
/// swapping the arguments only negates `saving`.
pub fn what_if(current: &CostBreakdown, candidate: &CostBreakdown) -> WhatIfComparison {
    let current_total = current.total();
    let candidate_total = candidate.total();
    WhatIfComparison {
        current_total,
        candidate_total,
        saving: current_total - candidate_total,
    }
}

//! Services and the plans offered for each of them.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{MirrorError, Result};
use crate::model::{amount, Stored, SUBSCRIPTION_PLANS};
use crate::store::{query_typed, set_merge_typed, DocumentStore, Filter};

pub const DAY: u64 = 86_400;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Service {
    pub id: u32,
    pub name: &'static str,
    pub kind: &'static str,
    pub description: &'static str,
}

pub const SERVICES: &[Service] = &[
    Service {
        id: 1,
        name: "Nation Media",
        kind: "newsletter",
        description: "Digital news subscription",
    },
    Service {
        id: 2,
        name: "Showmax Kenya",
        kind: "streaming",
        description: "Video streaming service",
    },
    Service {
        id: 3,
        name: "DSTV",
        kind: "streaming",
        description: "Premium TV streaming service",
    },
    Service {
        id: 4,
        name: "Mdundo",
        kind: "streaming",
        description: "Music streaming platform",
    },
    Service {
        id: 5,
        name: "Elimu Library",
        kind: "saas",
        description: "Educational content platform",
    },
    Service {
        id: 6,
        name: "Test Service",
        kind: "test",
        description: "Test subscription service (2-min plans)",
    },
];

pub fn find_service(id: u32) -> Option<&'static Service> {
    SERVICES.iter().find(|s| s.id == id)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanDoc {
    pub service_id: u32,
    pub name: String,
    /// Base token units.
    #[serde(with = "amount")]
    pub price: i128,
    /// Seconds.
    pub duration: u64,
    pub features: Vec<String>,
}

struct PlanSeed {
    service_id: u32,
    name: &'static str,
    whole_price: i128,
    duration: u64,
    features: &'static [&'static str],
}

const PLAN_SEEDS: &[PlanSeed] = &[
    PlanSeed {
        service_id: 1,
        name: "Monthly",
        whole_price: 10,
        duration: 30 * DAY,
        features: &[
            "Daily news access",
            "E-paper access",
            "Breaking news alerts",
            "Basic article commenting",
        ],
    },
    PlanSeed {
        service_id: 1,
        name: "Half Year",
        whole_price: 50,
        duration: 180 * DAY,
        features: &[
            "All Monthly features",
            "Premium articles",
            "Archive access",
            "Ad-free experience",
            "15% discount",
        ],
    },
    PlanSeed {
        service_id: 1,
        name: "Annual",
        whole_price: 90,
        duration: 365 * DAY,
        features: &[
            "All Half Year features",
            "Exclusive content",
            "Priority customer support",
            "Multiple device access",
            "25% discount",
            "Magazine subscription included",
        ],
    },
    PlanSeed {
        service_id: 2,
        name: "Basic",
        whole_price: 15,
        duration: 30 * DAY,
        features: &["HD streaming", "Watch on 1 device", "Download shows", "No ads"],
    },
    PlanSeed {
        service_id: 2,
        name: "Standard",
        whole_price: 75,
        duration: 180 * DAY,
        features: &[
            "Full HD streaming",
            "Watch on 2 devices",
            "Download shows",
            "No ads",
            "Offline viewing",
            "15% discount",
        ],
    },
    PlanSeed {
        service_id: 2,
        name: "Premium",
        whole_price: 140,
        duration: 365 * DAY,
        features: &[
            "4K Ultra HD",
            "Watch on 4 devices",
            "Download shows",
            "No ads",
            "Offline viewing",
            "25% discount",
            "Early access to new releases",
        ],
    },
    PlanSeed {
        service_id: 3,
        name: "Basic",
        whole_price: 20,
        duration: 30 * DAY,
        features: &[
            "Basic API access",
            "100 requests/day",
            "Community support",
            "Basic documentation",
        ],
    },
    PlanSeed {
        service_id: 3,
        name: "Pro",
        whole_price: 100,
        duration: 180 * DAY,
        features: &[
            "Advanced API access",
            "1000 requests/day",
            "Priority support",
            "Advanced documentation",
            "Custom integrations",
            "15% discount",
        ],
    },
    PlanSeed {
        service_id: 3,
        name: "Enterprise",
        whole_price: 180,
        duration: 365 * DAY,
        features: &[
            "Unlimited API access",
            "Unlimited requests",
            "24/7 dedicated support",
            "Full documentation",
            "Custom solutions",
            "25% discount",
            "Dedicated account manager",
        ],
    },
    PlanSeed {
        service_id: 4,
        name: "Basic",
        whole_price: 8,
        duration: 30 * DAY,
        features: &[
            "Ad-supported streaming",
            "Basic audio quality",
            "Mobile listening",
            "Create playlists",
        ],
    },
    PlanSeed {
        service_id: 4,
        name: "Premium",
        whole_price: 40,
        duration: 180 * DAY,
        features: &[
            "Ad-free streaming",
            "High quality audio",
            "Offline mode",
            "Multi-device support",
            "Lyrics access",
            "15% discount",
        ],
    },
    PlanSeed {
        service_id: 4,
        name: "Family",
        whole_price: 70,
        duration: 365 * DAY,
        features: &[
            "Up to 6 accounts",
            "Highest quality audio",
            "Offline mode",
            "Multi-device support",
            "Lyrics access",
            "25% discount",
            "Parental controls",
        ],
    },
    PlanSeed {
        service_id: 5,
        name: "Basic",
        whole_price: 25,
        duration: 30 * DAY,
        features: &[
            "Access to basic courses",
            "Course completion certificates",
            "Mobile learning",
            "Basic assessments",
        ],
    },
    PlanSeed {
        service_id: 5,
        name: "Professional",
        whole_price: 120,
        duration: 180 * DAY,
        features: &[
            "Access to all courses",
            "Professional certificates",
            "Mentor support",
            "Practice exercises",
            "Project reviews",
            "15% discount",
        ],
    },
    PlanSeed {
        service_id: 5,
        name: "Master",
        whole_price: 200,
        duration: 365 * DAY,
        features: &[
            "All Professional features",
            "Specialized certifications",
            "1-on-1 mentoring",
            "Career guidance",
            "Job placement support",
            "25% discount",
            "Industry networking events",
        ],
    },
    PlanSeed {
        service_id: 6,
        name: "Two Minutes",
        whole_price: 1,
        duration: 120,
        features: &["Exercises the renewal flow"],
    },
];

/// Largest decimals value for which every seed price still fits in an i128
/// (200 * 10^35 does, 200 * 10^36 does not).
pub const MAX_TOKEN_DECIMALS: u32 = 35;

/// Store id of a seeded plan, e.g. `plan-6-two-minutes`.
pub fn seed_plan_id(service_id: u32, name: &str) -> String {
    let slug = name.to_lowercase().replace(' ', "-");
    format!("plan-{service_id}-{slug}")
}

/// Seed plans with prices scaled to `token_decimals`.
pub fn default_plans(token_decimals: u32) -> Result<Vec<PlanDoc>> {
    let out_of_range = || MirrorError::Config {
        message: format!("token_decimals {token_decimals} overflows plan prices"),
    };
    let scale = 10i128.checked_pow(token_decimals).ok_or_else(out_of_range)?;
    PLAN_SEEDS
        .iter()
        .map(|seed| {
            Ok(PlanDoc {
                service_id: seed.service_id,
                name: seed.name.to_string(),
                price: seed.whole_price.checked_mul(scale).ok_or_else(out_of_range)?,
                duration: seed.duration,
                features: seed.features.iter().map(|f| f.to_string()).collect(),
            })
        })
        .collect()
}

/// Write every default plan that is not stored yet. Plans live at fixed ids,
/// so a seed cut short by a failed write is completed by the next call.
/// Returns the number of plans written.
pub async fn seed_subscription_plans(store: &dyn DocumentStore, token_decimals: u32) -> Result<usize> {
    let mut written = 0;
    for plan in default_plans(token_decimals)? {
        let id = seed_plan_id(plan.service_id, &plan.name);
        if store.get(SUBSCRIPTION_PLANS, &id).await?.is_some() {
            continue;
        }
        set_merge_typed(store, SUBSCRIPTION_PLANS, &id, &plan).await?;
        written += 1;
    }
    if written == 0 {
        info!("plans already seeded");
    } else {
        info!(count = written, "seeded subscription plans");
    }
    Ok(written)
}

/// Plans of one service, first occurrence of each name kept, shortest duration first.
pub async fn get_service_plans(store: &dyn DocumentStore, service_id: u32) -> Result<Vec<Stored<PlanDoc>>> {
    let plans: Vec<Stored<PlanDoc>> =
        query_typed(store, SUBSCRIPTION_PLANS, &[Filter::eq("serviceId", service_id)]).await?;

    let mut seen = HashSet::new();
    let mut unique: Vec<_> = plans
        .into_iter()
        .filter(|p| seen.insert(p.data.name.clone()))
        .collect();
    unique.sort_by_key(|p| p.data.duration);
    Ok(unique)
}

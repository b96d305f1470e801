use crate::config::PlanConfig;
use serde::Serialize;

const MAX_INCREMENT_SECS: i64 = 86_400;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Plan {
    pub key: String,
    pub name: String,
    pub price: f64,
    pub monthly_minutes: i64,
    pub overage_rate_per_minute: f64,
    pub allow_overage: bool,
    pub max_concurrent_calls: u32,
    pub max_agents: u32,
    pub initial_increment_secs: i64,
    pub billing_increment_secs: i64,
}

impl Plan {
    pub fn allowance_secs(&self) -> i64 {
        self.monthly_minutes.max(0) * 60
    }

    /// Same rules as billing templates: increments in (0, 86400] and the
    /// recurring increment no larger than the initial one.
    pub fn check(&self) -> Result<(), String> {
        if self.key.trim().is_empty() {
            return Err("key must not be empty".to_string());
        }
        for (field, value) in [
            ("initial_increment_secs", self.initial_increment_secs),
            ("billing_increment_secs", self.billing_increment_secs),
        ] {
            if value <= 0 {
                return Err(format!("{field} must be greater than zero"));
            }
            if value > MAX_INCREMENT_SECS {
                return Err(format!(
                    "{field} must be less than or equal to 86400 seconds"
                ));
            }
        }
        if self.billing_increment_secs > self.initial_increment_secs {
            return Err(
                "billing_increment_secs cannot exceed initial_increment_secs".to_string(),
            );
        }
        if self.monthly_minutes < 0 {
            return Err("monthly_minutes must not be negative".to_string());
        }
        if self.overage_rate_per_minute < 0.0 || self.price < 0.0 {
            return Err("prices must not be negative".to_string());
        }
        if self.max_concurrent_calls == 0 {
            return Err("max_concurrent_calls must be greater than zero".to_string());
        }
        Ok(())
    }
}

impl From<PlanConfig> for Plan {
    fn from(value: PlanConfig) -> Self {
        Self {
            key: value.key,
            name: value.name,
            price: value.price,
            monthly_minutes: value.monthly_minutes,
            overage_rate_per_minute: value.overage_rate_per_minute,
            allow_overage: value.allow_overage,
            max_concurrent_calls: value.max_concurrent_calls,
            max_agents: value.max_agents,
            initial_increment_secs: value.initial_increment_secs,
            billing_increment_secs: value.billing_increment_secs,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PlanCatalog {
    plans: Vec<Plan>,
}

impl PlanCatalog {
    pub fn new(plans: Vec<Plan>) -> Self {
        Self { plans }
    }

    pub fn from_config(plans: Option<&Vec<PlanConfig>>) -> Self {
        match plans {
            Some(plans) if !plans.is_empty() => {
                Self::new(plans.iter().cloned().map(Plan::from).collect())
            }
            _ => Self::default(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&Plan> {
        self.plans.iter().find(|plan| plan.key == key)
    }

    pub fn plans(&self) -> &[Plan] {
        &self.plans
    }

    /// Plan assigned to newly registered accounts.
    pub fn default_plan(&self) -> Option<&Plan> {
        self.get("trial").or_else(|| self.plans.first())
    }
}

fn builtin(
    key: &str,
    name: &str,
    price: f64,
    monthly_minutes: i64,
    overage_rate_per_minute: f64,
    max_concurrent_calls: u32,
    max_agents: u32,
) -> Plan {
    Plan {
        key: key.to_string(),
        name: name.to_string(),
        price,
        monthly_minutes,
        overage_rate_per_minute,
        allow_overage: overage_rate_per_minute > 0.0,
        max_concurrent_calls,
        max_agents,
        initial_increment_secs: 60,
        billing_increment_secs: 60,
    }
}

impl Default for PlanCatalog {
    fn default() -> Self {
        Self::new(vec![
            builtin("trial", "Trial", 0.0, 10, 0.0, 1, 1),
            builtin("starter", "Starter", 4_999.0, 500, 8.0, 2, 3),
            builtin("growth", "Growth", 14_999.0, 2_000, 7.0, 5, 10),
            builtin("pro", "Pro", 39_999.0, 6_000, 6.0, 10, 25),
        ])
    }
}

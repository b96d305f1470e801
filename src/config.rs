use anyhow::Error;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub http_addr: String,
    pub log_level: Option<String>,
    pub log_file: Option<String>,
    pub database_url: String,
    pub session_secret: String,
    /// Prefix applied to phone numbers imported without a leading `+`.
    pub default_country_code: String,
    pub provider: ProviderConfig,
    pub classifier: Option<ClassifierConfig>,
    pub payment: PaymentConfig,
    pub plans: Option<Vec<PlanConfig>>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub base_url: String,
    pub api_key: String,
    pub webhook_secret: String,
    pub webhook_tolerance_secs: u64,
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClassifierConfig {
    pub url: String,
    pub api_key: Option<String>,
    #[serde(default = "default_outcome_labels")]
    pub labels: Vec<String>,
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PaymentConfig {
    pub base_url: String,
    pub key_id: String,
    pub key_secret: String,
    pub currency: String,
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct PlanConfig {
    pub key: String,
    pub name: String,
    pub price: f64,
    pub monthly_minutes: i64,
    pub overage_rate_per_minute: f64,
    #[serde(default)]
    pub allow_overage: bool,
    pub max_concurrent_calls: u32,
    pub max_agents: u32,
    #[serde(default = "default_increment_secs")]
    pub initial_increment_secs: i64,
    #[serde(default = "default_increment_secs")]
    pub billing_increment_secs: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigIssue {
    pub field: String,
    pub message: String,
}

impl ConfigIssue {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

fn default_increment_secs() -> i64 {
    60
}

pub fn default_outcome_labels() -> Vec<String> {
    [
        "interested",
        "not_interested",
        "callback_requested",
        "voicemail",
        "wrong_number",
        "do_not_call",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.elevenlabs.io".to_string(),
            api_key: String::new(),
            webhook_secret: String::new(),
            webhook_tolerance_secs: 30 * 60,
            timeout_ms: Some(15_000),
        }
    }
}

impl Default for PaymentConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.razorpay.com".to_string(),
            key_id: String::new(),
            key_secret: String::new(),
            currency: "INR".to_string(),
            timeout_ms: Some(10_000),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http_addr: "0.0.0.0:8080".to_string(),
            log_level: Some("info".to_string()),
            log_file: None,
            database_url: "sqlite://zapvoice.sqlite3".to_string(),
            session_secret: "change-me".to_string(),
            default_country_code: "+91".to_string(),
            provider: ProviderConfig::default(),
            classifier: None,
            payment: PaymentConfig::default(),
            plans: None,
        }
    }
}

impl Config {
    pub fn load(path: &str) -> Result<Self, Error> {
        let mut config: Self = toml::from_str(
            &std::fs::read_to_string(path).map_err(|e| anyhow::anyhow!("{}: {}", e, path))?,
        )?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Secrets are usually injected through the environment rather than the file.
    pub fn apply_env_overrides(&mut self) {
        let vars = [
            "ZAPVOICE_DATABASE_URL",
            "ZAPVOICE_SESSION_SECRET",
            "ZAPVOICE_PROVIDER_API_KEY",
            "ZAPVOICE_WEBHOOK_SECRET",
            "ZAPVOICE_PAYMENT_KEY_ID",
            "ZAPVOICE_PAYMENT_KEY_SECRET",
        ];
        for name in vars {
            let Ok(value) = std::env::var(name) else {
                continue;
            };
            if value.trim().is_empty() {
                continue;
            }
            self.apply_override(name, value);
        }
    }

    fn apply_override(&mut self, name: &str, value: String) {
        match name {
            "ZAPVOICE_DATABASE_URL" => self.database_url = value,
            "ZAPVOICE_SESSION_SECRET" => self.session_secret = value,
            "ZAPVOICE_PROVIDER_API_KEY" => self.provider.api_key = value,
            "ZAPVOICE_WEBHOOK_SECRET" => self.provider.webhook_secret = value,
            "ZAPVOICE_PAYMENT_KEY_ID" => self.payment.key_id = value,
            "ZAPVOICE_PAYMENT_KEY_SECRET" => self.payment.key_secret = value,
            _ => {}
        }
    }

    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();

        if self.http_addr.parse::<SocketAddr>().is_err() {
            issues.push(ConfigIssue::new(
                "http_addr",
                format!("'{}' is not a valid socket address", self.http_addr),
            ));
        }
        if self.database_url.trim().is_empty() {
            issues.push(ConfigIssue::new("database_url", "must not be empty"));
        }
        if self.session_secret.len() < 16 {
            issues.push(ConfigIssue::new(
                "session_secret",
                "must be at least 16 characters",
            ));
        }
        if !self.default_country_code.starts_with('+')
            || self.default_country_code.len() < 2
            || !self.default_country_code[1..]
                .chars()
                .all(|c| c.is_ascii_digit())
        {
            issues.push(ConfigIssue::new(
                "default_country_code",
                "must look like +<digits>",
            ));
        }
        if self.provider.api_key.is_empty() {
            issues.push(ConfigIssue::new("provider.api_key", "is required"));
        }
        if self.provider.webhook_secret.is_empty() {
            issues.push(ConfigIssue::new("provider.webhook_secret", "is required"));
        }
        if self.provider.webhook_tolerance_secs == 0 {
            issues.push(ConfigIssue::new(
                "provider.webhook_tolerance_secs",
                "must be greater than zero",
            ));
        }
        if let Some(classifier) = &self.classifier {
            if reqwest::Url::parse(&classifier.url).is_err() {
                issues.push(ConfigIssue::new("classifier.url", "is not a valid URL"));
            }
            if classifier.labels.is_empty() {
                issues.push(ConfigIssue::new("classifier.labels", "must not be empty"));
            }
        }
        if self.payment.key_id.is_empty() || self.payment.key_secret.is_empty() {
            issues.push(ConfigIssue::new(
                "payment",
                "key_id and key_secret are required",
            ));
        }

        if let Some(plans) = &self.plans {
            if plans.is_empty() {
                issues.push(ConfigIssue::new("plans", "must contain at least one plan"));
            }
            for plan in plans {
                if let Err(message) = crate::billing::plan::Plan::from(plan.clone()).check() {
                    issues.push(ConfigIssue::new(format!("plans.{}", plan.key), message));
                }
            }
        }
        issues
    }
}

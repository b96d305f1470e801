use super::state::{CampaignError, contacts_editable};
use crate::models::{
    call_record::{
        CallStatus, Column as CallColumn, Entity as CallEntity, Model as CallModel,
    },
    campaign::{ActiveModel as CampaignActiveModel, Model as CampaignModel},
    contact::{
        ActiveModel as ContactActiveModel, Column as ContactColumn, ContactStatus,
        Entity as ContactEntity, Model as ContactModel,
    },
};
use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, DatabaseConnection, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use tracing::info;

const MIN_PHONE_DIGITS: usize = 8;
const MAX_PHONE_DIGITS: usize = 15;

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct ContactInput {
    #[serde(default)]
    pub name: String,
    #[serde(alias = "phone")]
    pub phone_number: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub variables: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RejectedContact {
    /// 1-based position in the submitted list.
    pub row: usize,
    pub phone_number: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ImportReport {
    pub imported: usize,
    pub rejected: Vec<RejectedContact>,
    pub total_contacts: i32,
}

/// Normalizes to `+<digits>`. Numbers without a `+` or `00` prefix get
/// `default_country_code` after dropping trunk zeros.
pub fn normalize_phone(raw: &str, default_country_code: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    let mut digits = String::with_capacity(trimmed.len());
    for (idx, c) in trimmed.chars().enumerate() {
        match c {
            '0'..='9' => digits.push(c),
            '+' if idx == 0 => {}
            ' ' | '-' | '(' | ')' | '.' => {}
            _ => return None,
        }
    }

    let number = if trimmed.starts_with('+') {
        digits
    } else if let Some(rest) = digits.strip_prefix("00") {
        rest.to_string()
    } else {
        let local = digits.trim_start_matches('0');
        let cc = default_country_code.trim_start_matches('+');
        format!("{}{}", cc, local)
    };

    if number.len() < MIN_PHONE_DIGITS
        || number.len() > MAX_PHONE_DIGITS
        || number.starts_with('0')
    {
        return None;
    }
    Some(format!("+{}", number))
}

/// Reads contacts from CSV. `name`, `phone`/`phone_number`/`mobile` and `email`
/// are recognised; every other non-empty column becomes a dynamic variable.
pub fn parse_csv(data: &[u8]) -> Result<Vec<ContactInput>> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(data);
    let headers: Vec<String> = reader
        .headers()
        .context("failed to read CSV header")?
        .iter()
        .map(|h| h.trim().trim_start_matches('\u{feff}').to_lowercase())
        .collect();

    let phone_idx = headers
        .iter()
        .position(|h| matches!(h.as_str(), "phone" | "phone_number" | "mobile"))
        .ok_or_else(|| anyhow!("CSV must have a phone or phone_number column"))?;
    let name_idx = headers.iter().position(|h| h == "name");
    let email_idx = headers.iter().position(|h| h == "email");

    let mut contacts = Vec::new();
    for (line, record) in reader.records().enumerate() {
        let record = record.with_context(|| format!("invalid CSV row {}", line + 2))?;
        let field = |idx: Option<usize>| {
            idx.and_then(|i| record.get(i))
                .map(str::to_string)
                .filter(|v| !v.is_empty())
        };
        let mut variables = Map::new();
        for (idx, header) in headers.iter().enumerate() {
            if idx == phone_idx || Some(idx) == name_idx || Some(idx) == email_idx {
                continue;
            }
            if header.is_empty() {
                continue;
            }
            if let Some(value) = record.get(idx).filter(|v| !v.is_empty()) {
                variables.insert(header.clone(), Value::String(value.to_string()));
            }
        }
        contacts.push(ContactInput {
            name: field(name_idx).unwrap_or_default(),
            phone_number: field(Some(phone_idx)).unwrap_or_default(),
            email: field(email_idx),
            variables,
        });
    }
    Ok(contacts)
}

/// Adds contacts to a campaign, skipping invalid and duplicate numbers.
pub async fn import_contacts(
    db: &DatabaseConnection,
    campaign: &CampaignModel,
    inputs: Vec<ContactInput>,
    default_country_code: &str,
    now: DateTime<Utc>,
) -> Result<ImportReport, CampaignError> {
    if !contacts_editable(campaign.status) {
        return Err(CampaignError::ContactsLocked);
    }

    let mut seen: HashSet<String> = ContactEntity::find()
        .filter(ContactColumn::CampaignId.eq(campaign.id))
        .all(db)
        .await
        .context("failed to load existing contacts")?
        .into_iter()
        .map(|c| c.phone_number)
        .collect();

    let mut report = ImportReport::default();
    for (idx, input) in inputs.into_iter().enumerate() {
        let row = idx + 1;
        let Some(phone_number) = normalize_phone(&input.phone_number, default_country_code)
        else {
            report.rejected.push(RejectedContact {
                row,
                phone_number: input.phone_number,
                reason: "invalid phone number".to_string(),
            });
            continue;
        };
        if !seen.insert(phone_number.clone()) {
            report.rejected.push(RejectedContact {
                row,
                phone_number,
                reason: "duplicate phone number".to_string(),
            });
            continue;
        }

        let variables = if input.variables.is_empty() {
            None
        } else {
            Some(Value::Object(input.variables))
        };
        ContactActiveModel {
            campaign_id: Set(campaign.id),
            name: Set(input.name.trim().to_string()),
            phone_number: Set(phone_number),
            email: Set(input.email.map(|e| e.trim().to_string()).filter(|e| !e.is_empty())),
            variables: Set(variables),
            status: Set(ContactStatus::Pending),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        }
        .insert(db)
        .await
        .context("failed to insert contact")?;
        report.imported += 1;
    }

    let total = ContactEntity::find()
        .filter(ContactColumn::CampaignId.eq(campaign.id))
        .count(db)
        .await
        .context("failed to count contacts")? as i32;
    let mut active: CampaignActiveModel = campaign.clone().into();
    active.total_contacts = Set(total);
    active.updated_at = Set(now);
    active
        .update(db)
        .await
        .context("failed to update contact total")?;
    report.total_contacts = total;

    info!(
        campaign_id = campaign.id,
        imported = report.imported,
        rejected = report.rejected.len(),
        "contacts imported"
    );
    Ok(report)
}

#[derive(Debug, Serialize)]
struct ExportRow<'a> {
    name: &'a str,
    phone_number: &'a str,
    email: Option<&'a str>,
    contact_status: ContactStatus,
    call_status: Option<CallStatus>,
    duration_secs: Option<i32>,
    outcome: Option<&'a str>,
    summary: Option<&'a str>,
}

/// CSV of the campaign's contacts joined with their latest call.
pub async fn export_csv(db: &DatabaseConnection, campaign_id: i64) -> Result<Vec<u8>> {
    let contacts: Vec<ContactModel> = ContactEntity::find()
        .filter(ContactColumn::CampaignId.eq(campaign_id))
        .order_by_asc(ContactColumn::Id)
        .all(db)
        .await
        .context("failed to load contacts for export")?;
    let calls: Vec<CallModel> = CallEntity::find()
        .filter(CallColumn::CampaignId.eq(campaign_id))
        .order_by_asc(CallColumn::Id)
        .all(db)
        .await
        .context("failed to load calls for export")?;

    let mut latest: HashMap<i64, &CallModel> = HashMap::new();
    for call in &calls {
        if let Some(contact_id) = call.contact_id {
            latest.insert(contact_id, call);
        }
    }

    let mut wtr = csv::Writer::from_writer(vec![]);
    for contact in &contacts {
        let call = latest.get(&contact.id);
        wtr.serialize(ExportRow {
            name: &contact.name,
            phone_number: &contact.phone_number,
            email: contact.email.as_deref(),
            contact_status: contact.status,
            call_status: call.map(|c| c.status),
            duration_secs: call.map(|c| c.duration_secs),
            outcome: call.and_then(|c| c.outcome.as_deref()),
            summary: call.and_then(|c| c.summary.as_deref()),
        })
        .context("failed to write CSV row")?;
    }
    if contacts.is_empty() {
        wtr.write_record([
            "name",
            "phone_number",
            "email",
            "contact_status",
            "call_status",
            "duration_secs",
            "outcome",
            "summary",
        ])
        .context("failed to write CSV header")?;
    }
    wtr.into_inner()
        .map_err(|e| anyhow!("failed to flush CSV: {}", e))
}

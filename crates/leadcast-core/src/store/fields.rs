//! Tolerant field matching for remote sheet rows.
//!
//! Operators rename sheet columns freely ("Email Count", "email_count",
//! "EmailCount" all appear in the wild), so field access is
//! case-insensitive and ignores spaces, underscores, and hyphens.

use std::collections::HashMap;

use serde_json::Value;

use super::model::{Lead, LeadStatus, normalize_email};

/// Normalizes a column header for matching.
#[must_use]
pub fn normalize_key(key: &str) -> String {
    key.chars()
        .filter(|c| !matches!(c, ' ' | '_' | '-'))
        .flat_map(char::to_lowercase)
        .collect()
}

/// Looks up a field in a raw row by tolerant name matching.
#[must_use]
pub fn get_field<'a>(record: &'a HashMap<String, Value>, name: &str) -> Option<&'a Value> {
    let wanted = normalize_key(name);
    record
        .iter()
        .find(|(key, _)| normalize_key(key) == wanted)
        .map(|(_, value)| value)
}

fn get_string(record: &HashMap<String, Value>, name: &str) -> Option<String> {
    let value = get_field(record, name)?;
    let text = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    (!text.is_empty()).then_some(text)
}

fn get_date(record: &HashMap<String, Value>, name: &str) -> Option<chrono::DateTime<chrono::Utc>> {
    get_string(record, name).and_then(|s| s.parse().ok())
}

fn get_count(record: &HashMap<String, Value>, name: &str) -> u32 {
    match get_field(record, name) {
        Some(Value::Number(n)) => u32::try_from(n.as_i64().unwrap_or(0).max(0)).unwrap_or(0),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(0),
        _ => 0,
    }
}

/// Maps a raw sheet row to a [`Lead`].
///
/// Returns `None` when the row has no usable email key.
#[must_use]
pub fn record_to_lead(record: &HashMap<String, Value>) -> Option<Lead> {
    let email = get_string(record, "email")?;

    Some(Lead {
        email: normalize_email(&email),
        name: get_string(record, "name"),
        company: get_string(record, "company"),
        status: get_string(record, "status")
            .map(|s| LeadStatus::parse(&s))
            .unwrap_or_default(),
        last_email_date: get_date(record, "last email date"),
        next_email_date: get_date(record, "next email date"),
        email_count: get_count(record, "email count"),
        template_used: get_string(record, "template used"),
        campaign_id: get_string(record, "campaign id"),
    })
}

/// Builds a patch payload from a lead's mutable fields.
///
/// Only the fields this service owns are included; passthrough columns
/// (name, company) are never written back.
#[must_use]
pub fn lead_to_fields(lead: &Lead) -> HashMap<String, Value> {
    let mut fields = HashMap::new();
    fields.insert("status".to_string(), Value::String(lead.status.to_string()));
    fields.insert(
        "emailCount".to_string(),
        Value::Number(lead.email_count.into()),
    );
    if let Some(date) = lead.last_email_date {
        fields.insert(
            "lastEmailDate".to_string(),
            Value::String(date.to_rfc3339()),
        );
    }
    if let Some(date) = lead.next_email_date {
        fields.insert(
            "nextEmailDate".to_string(),
            Value::String(date.to_rfc3339()),
        );
    }
    if let Some(template) = &lead.template_used {
        fields.insert(
            "templateUsed".to_string(),
            Value::String(template.clone()),
        );
    }
    if let Some(campaign) = &lead.campaign_id {
        fields.insert("campaignId".to_string(), Value::String(campaign.clone()));
    }
    fields
}

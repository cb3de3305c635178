//! Typed local entity records and their field-accessor table.
//!
//! The hosting application owns these records; the engine reads them for
//! outward sync and writes a bounded subset of fields for inward sync. Field
//! access by name goes through a static table per kind rather than any kind
//! of runtime reflection, so a mapping that names a nonexistent field fails
//! as a configuration error, not silently.

use std::collections::BTreeMap;

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};
use crate::types::EntityKind;

/// A typed field value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldValue {
    Text(String),
    Number(f64),
    Date(NaiveDate),
    Timestamp(DateTime<Utc>),
    /// Absent or null.
    Empty,
}

impl FieldValue {
    /// Render as text. `Empty` renders as the empty string, which the
    /// remote API interprets as an explicit clear.
    #[must_use]
    pub fn render(&self) -> String {
        match self {
            FieldValue::Text(s) => s.clone(),
            FieldValue::Number(n) => {
                if n.fract() == 0.0 && n.abs() < 1e15 {
                    format!("{}", *n as i64)
                } else {
                    format!("{n}")
                }
            }
            FieldValue::Date(d) => d.format("%Y-%m-%d").to_string(),
            FieldValue::Timestamp(t) => t.to_rfc3339(),
            FieldValue::Empty => String::new(),
        }
    }

    /// Numeric view. Dates resolve to whole years elapsed before `now`,
    /// which is how age conditions read a birth date.
    #[must_use]
    pub fn as_number(&self, now: DateTime<Utc>) -> Option<f64> {
        match self {
            FieldValue::Number(n) => Some(*n),
            FieldValue::Text(s) => s.trim().parse().ok(),
            FieldValue::Date(d) => {
                let today = now.date_naive();
                let mut years = today.year() - d.year();
                if (today.month(), today.day()) < (d.month(), d.day()) {
                    years -= 1;
                }
                Some(f64::from(years))
            }
            FieldValue::Timestamp(_) | FieldValue::Empty => None,
        }
    }

    /// Point-in-time view for relative-time conditions.
    #[must_use]
    pub fn as_instant(&self) -> Option<DateTime<Utc>> {
        match self {
            FieldValue::Timestamp(t) => Some(*t),
            FieldValue::Date(d) => d.and_hms_opt(0, 0, 0).map(|dt| dt.and_utc()),
            _ => None,
        }
    }

    /// Calendar month (1-12), for current-month conditions.
    #[must_use]
    pub fn month(&self) -> Option<u32> {
        match self {
            FieldValue::Date(d) => Some(d.month()),
            FieldValue::Timestamp(t) => Some(t.month()),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self {
            FieldValue::Empty => true,
            FieldValue::Text(s) => s.is_empty(),
            _ => false,
        }
    }
}

/// One local field write produced by inward mapping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldChange {
    pub local_field: String,
    pub value: String,
}

impl FieldChange {
    pub fn new(local_field: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            local_field: local_field.into(),
            value: value.into(),
        }
    }
}

/// A local CRM record of one of the three kinds.
///
/// Unused fields for a kind (e.g. `annual_revenue` on a person) simply stay
/// at their defaults and are not part of that kind's field table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: i64,
    pub kind: EntityKind,
    pub email: String,
    /// Company or display name.
    pub name: String,
    pub first_name: String,
    pub last_name: String,
    pub phone: String,
    pub address: String,
    pub zip: String,
    pub town: String,
    /// ISO country code, e.g. `US`.
    pub country: String,
    /// Job title (persons only).
    pub job: String,
    pub birthday: Option<NaiveDate>,
    /// Annual revenue in account currency (organizations only).
    pub annual_revenue: Option<f64>,
    /// Administrator flag (system users only).
    pub admin: bool,
    pub last_login: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

impl Entity {
    /// Create an entity with the identity fields set and everything else
    /// empty.
    pub fn new(id: i64, kind: EntityKind, email: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            kind,
            email: email.into(),
            name: String::new(),
            first_name: String::new(),
            last_name: String::new(),
            phone: String::new(),
            address: String::new(),
            zip: String::new(),
            town: String::new(),
            country: String::new(),
            job: String::new(),
            birthday: None,
            annual_revenue: None,
            admin: false,
            last_login: None,
            created_at: now,
            modified_at: now,
        }
    }

    /// Field names this kind exposes to mapping and rules.
    #[must_use]
    pub fn field_names(kind: EntityKind) -> &'static [&'static str] {
        match kind {
            EntityKind::Organization => &[
                "email",
                "name",
                "phone",
                "address",
                "zip",
                "town",
                "country",
                "annual_revenue",
                "created_at",
                "modified_at",
            ],
            EntityKind::Person => &[
                "email",
                "first_name",
                "last_name",
                "phone",
                "address",
                "zip",
                "town",
                "country",
                "job",
                "birthday",
                "created_at",
                "modified_at",
            ],
            EntityKind::SystemUser => &[
                "email",
                "first_name",
                "last_name",
                "phone",
                "admin",
                "last_login",
                "created_at",
                "modified_at",
            ],
        }
    }

    /// Read a field by name, or `None` if the name is not in this kind's
    /// table.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<FieldValue> {
        if !Self::field_names(self.kind).contains(&name) {
            return None;
        }

        let text = |s: &str| {
            if s.is_empty() {
                FieldValue::Empty
            } else {
                FieldValue::Text(s.to_string())
            }
        };

        Some(match name {
            "email" => text(&self.email),
            "name" => text(&self.name),
            "first_name" => text(&self.first_name),
            "last_name" => text(&self.last_name),
            "phone" => text(&self.phone),
            "address" => text(&self.address),
            "zip" => text(&self.zip),
            "town" => text(&self.town),
            "country" => text(&self.country),
            "job" => text(&self.job),
            "birthday" => self.birthday.map_or(FieldValue::Empty, FieldValue::Date),
            "annual_revenue" => self
                .annual_revenue
                .map_or(FieldValue::Empty, FieldValue::Number),
            "admin" => FieldValue::Number(if self.admin { 1.0 } else { 0.0 }),
            "last_login" => self
                .last_login
                .map_or(FieldValue::Empty, FieldValue::Timestamp),
            "created_at" => FieldValue::Timestamp(self.created_at),
            "modified_at" => FieldValue::Timestamp(self.modified_at),
            _ => return None,
        })
    }

    /// Write a field by name from its text rendering.
    ///
    /// `email` is deliberately not writable here: email is the identity key
    /// and inward sync must never overwrite it.
    pub fn set_field(&mut self, name: &str, value: &str) -> EngineResult<()> {
        if name == "email" || !Self::field_names(self.kind).contains(&name) {
            return Err(EngineError::unknown_field(self.kind, name));
        }

        match name {
            "name" => self.name = value.to_string(),
            "first_name" => self.first_name = value.to_string(),
            "last_name" => self.last_name = value.to_string(),
            "phone" => self.phone = value.to_string(),
            "address" => self.address = value.to_string(),
            "zip" => self.zip = value.to_string(),
            "town" => self.town = value.to_string(),
            "country" => self.country = value.to_string(),
            "job" => self.job = value.to_string(),
            "birthday" => {
                self.birthday = if value.is_empty() {
                    None
                } else {
                    Some(
                        NaiveDate::parse_from_str(value, "%Y-%m-%d").map_err(|e| {
                            EngineError::Serialization {
                                message: format!("invalid date `{value}`: {e}"),
                            }
                        })?,
                    )
                };
            }
            other => return Err(EngineError::unknown_field(self.kind, other)),
        }
        Ok(())
    }

    /// Check outward sync eligibility: email present and shaped like an
    /// address. Ineligible entities are skipped, never errored.
    #[must_use]
    pub fn is_sync_eligible(&self) -> bool {
        let email = self.email.trim();
        match email.split_once('@') {
            Some((local, domain)) => {
                !local.is_empty() && !domain.is_empty() && !domain.contains('@')
            }
            None => false,
        }
    }

    /// Snapshot of all field values, consumed by the rule engine.
    ///
    /// Adds the derived `age` field (the birth date, which numeric
    /// conditions read as whole years) so rules can say `age between 25 and
    /// 35` directly.
    #[must_use]
    pub fn snapshot(&self) -> FieldSnapshot {
        let mut fields = BTreeMap::new();
        for name in Self::field_names(self.kind) {
            if let Some(value) = self.field(name) {
                fields.insert((*name).to_string(), value);
            }
        }
        if let Some(birthday) = self.birthday {
            fields.insert("age".to_string(), FieldValue::Date(birthday));
        }
        FieldSnapshot { fields }
    }
}

/// Immutable field-value snapshot taken at rule-evaluation time.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldSnapshot {
    fields: BTreeMap<String, FieldValue>,
}

impl FieldSnapshot {
    /// Build a snapshot directly from pairs (used by tests).
    pub fn from_pairs(pairs: impl IntoIterator<Item = (String, FieldValue)>) -> Self {
        Self {
            fields: pairs.into_iter().collect(),
        }
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    /// Text view of a field; missing and empty both read as `None`.
    #[must_use]
    pub fn text(&self, name: &str) -> Option<String> {
        let value = self.fields.get(name)?;
        if value.is_empty() {
            None
        } else {
            Some(value.render())
        }
    }
}

//! Field mapping between local entity fields and remote member attributes.
//!
//! Mappings are administrator-configured data: keyed by (entity kind, local
//! field name), each entry names the remote attribute, a direction and a
//! required flag. They are loaded before a pass starts and read-only while
//! it runs.

use std::collections::{BTreeMap, HashMap};

use listsync_client::RemoteMember;
use serde::{Deserialize, Serialize};

use crate::entity::{Entity, FieldChange};
use crate::error::{EngineError, EngineResult};
use crate::types::EntityKind;

/// Remote attribute name that designates the member's primary email rather
/// than a merge field.
pub const EMAIL_ATTRIBUTE: &str = "EMAIL";

/// Which way a mapped field flows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MappingDirection {
    Outward,
    Inward,
    Bidirectional,
    /// Configured but inactive.
    None,
}

impl MappingDirection {
    #[must_use]
    pub fn includes_outward(&self) -> bool {
        matches!(self, MappingDirection::Outward | MappingDirection::Bidirectional)
    }

    #[must_use]
    pub fn includes_inward(&self) -> bool {
        matches!(self, MappingDirection::Inward | MappingDirection::Bidirectional)
    }
}

/// One configured field mapping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldMapping {
    pub local_field: String,
    /// Remote attribute name. Empty means the entry is unmapped and skipped.
    pub remote_attribute: String,
    pub direction: MappingDirection,
    pub required: bool,
}

impl FieldMapping {
    pub fn new(
        local_field: impl Into<String>,
        remote_attribute: impl Into<String>,
        direction: MappingDirection,
    ) -> Self {
        Self {
            local_field: local_field.into(),
            remote_attribute: remote_attribute.into(),
            direction,
            required: false,
        }
    }

    #[must_use]
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    fn is_active(&self) -> bool {
        !self.remote_attribute.is_empty() && self.direction != MappingDirection::None
    }
}

/// Outward mapping output for one entity.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OutwardFields {
    /// Value for the member's primary email, taken from the entry mapped to
    /// the `EMAIL` sentinel attribute.
    pub email_override: Option<String>,
    /// Remote attribute name to value. Empty local values map to `""`
    /// (explicit clear), never to omission.
    pub merge_fields: HashMap<String, String>,
}

/// The mapping entries for one entity kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappingSet {
    pub kind: EntityKind,
    pub entries: Vec<FieldMapping>,
}

impl MappingSet {
    pub fn new(kind: EntityKind, entries: Vec<FieldMapping>) -> Self {
        Self { kind, entries }
    }

    /// The stock mapping for a kind.
    #[must_use]
    pub fn defaults(kind: EntityKind) -> Self {
        let email = FieldMapping::new("email", EMAIL_ATTRIBUTE, MappingDirection::Bidirectional)
            .required();
        let entries = match kind {
            EntityKind::Organization => vec![
                email,
                FieldMapping::new("name", "COMPANY", MappingDirection::Bidirectional),
                FieldMapping::new("phone", "PHONE", MappingDirection::Bidirectional),
            ],
            EntityKind::Person => vec![
                email,
                FieldMapping::new("first_name", "FNAME", MappingDirection::Bidirectional),
                FieldMapping::new("last_name", "LNAME", MappingDirection::Bidirectional),
                FieldMapping::new("phone", "PHONE", MappingDirection::Bidirectional),
                FieldMapping::new("birthday", "BIRTHDAY", MappingDirection::Outward),
            ],
            EntityKind::SystemUser => vec![
                email,
                FieldMapping::new("first_name", "FNAME", MappingDirection::Bidirectional),
                FieldMapping::new("last_name", "LNAME", MappingDirection::Bidirectional),
                FieldMapping::new("phone", "PHONE", MappingDirection::Bidirectional),
            ],
        };
        Self { kind, entries }
    }

    /// Every kind must push its email out, or members could never be keyed.
    pub fn validate(&self) -> EngineResult<()> {
        let email_out = self.entries.iter().any(|m| {
            m.local_field == "email"
                && m.remote_attribute == EMAIL_ATTRIBUTE
                && m.direction.includes_outward()
        });
        if !email_out {
            return Err(EngineError::configuration(format!(
                "mapping for {} does not map email outward",
                self.kind
            )));
        }
        for entry in &self.entries {
            if entry.is_active() && !Entity::field_names(self.kind).contains(&&*entry.local_field)
            {
                return Err(EngineError::unknown_field(self.kind, &entry.local_field));
            }
        }
        Ok(())
    }

    /// Build the outward attribute map for one entity.
    ///
    /// Only outward and bidirectional entries apply. The `EMAIL` sentinel
    /// entry overrides the member's primary email instead of entering the
    /// merge fields. Empty local values render as `""`, which the remote
    /// API treats as an explicit clear.
    pub fn apply_outward(&self, entity: &Entity) -> EngineResult<OutwardFields> {
        let mut out = OutwardFields::default();
        for entry in &self.entries {
            if !entry.is_active() || !entry.direction.includes_outward() {
                continue;
            }
            let value = entity
                .field(&entry.local_field)
                .ok_or_else(|| EngineError::unknown_field(self.kind, &entry.local_field))?
                .render();
            if entry.remote_attribute == EMAIL_ATTRIBUTE {
                if !value.is_empty() {
                    out.email_override = Some(value);
                }
            } else {
                out.merge_fields.insert(entry.remote_attribute.clone(), value);
            }
        }
        Ok(out)
    }

    /// Compute the local writes a remote member implies.
    ///
    /// Only inward and bidirectional entries apply, and the local `email`
    /// field is never produced: email is the identity key, not a syncable
    /// attribute. Attributes the member does not carry are skipped rather
    /// than treated as clears.
    #[must_use]
    pub fn apply_inward(&self, member: &RemoteMember) -> Vec<FieldChange> {
        let mut changes = Vec::new();
        for entry in &self.entries {
            if !entry.is_active()
                || !entry.direction.includes_inward()
                || entry.local_field == "email"
                || entry.remote_attribute == EMAIL_ATTRIBUTE
            {
                continue;
            }
            if let Some(value) = member.merge_field(&entry.remote_attribute) {
                changes.push(FieldChange::new(&entry.local_field, value));
            }
        }
        changes
    }
}

/// One mapping set per entity kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappingCatalog {
    sets: BTreeMap<EntityKind, MappingSet>,
}

impl MappingCatalog {
    pub fn new(sets: impl IntoIterator<Item = MappingSet>) -> Self {
        Self {
            sets: sets.into_iter().map(|s| (s.kind, s)).collect(),
        }
    }

    /// Catalog with the stock mapping for every kind.
    #[must_use]
    pub fn defaults() -> Self {
        Self::new(EntityKind::all().map(MappingSet::defaults))
    }

    /// Mapping for a kind. A missing kind is a configuration error fatal to
    /// that kind only; other kinds proceed.
    pub fn for_kind(&self, kind: EntityKind) -> EngineResult<&MappingSet> {
        self.sets.get(&kind).ok_or_else(|| {
            EngineError::configuration(format!("no field mapping configured for {kind}"))
        })
    }

    pub fn validate(&self) -> EngineResult<()> {
        for set in self.sets.values() {
            set.validate()?;
        }
        Ok(())
    }
}

impl Default for MappingCatalog {
    fn default() -> Self {
        Self::defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use listsync_client::SubscriptionStatus;

    fn person_entity() -> Entity {
        let mut e = Entity::new(1, EntityKind::Person, "a@x.com");
        e.first_name = "A".to_string();
        e
    }

    #[test]
    fn test_defaults_validate() {
        MappingCatalog::defaults().validate().unwrap();
    }

    #[test]
    fn test_outward_email_sentinel_and_clearing() {
        let set = MappingSet::defaults(EntityKind::Person);
        let out = set.apply_outward(&person_entity()).unwrap();

        assert_eq!(out.email_override.as_deref(), Some("a@x.com"));
        assert_eq!(out.merge_fields.get("FNAME").unwrap(), "A");
        // Unset fields map to explicit empty, never omission.
        assert_eq!(out.merge_fields.get("LNAME").unwrap(), "");
        assert!(!out.merge_fields.contains_key(EMAIL_ATTRIBUTE));
    }

    #[test]
    fn test_unmapped_entries_skipped() {
        let set = MappingSet::new(
            EntityKind::Person,
            vec![
                FieldMapping::new("email", EMAIL_ATTRIBUTE, MappingDirection::Bidirectional),
                FieldMapping::new("first_name", "", MappingDirection::Bidirectional),
                FieldMapping::new("last_name", "LNAME", MappingDirection::None),
            ],
        );
        let out = set.apply_outward(&person_entity()).unwrap();
        assert!(out.merge_fields.is_empty());
    }

    #[test]
    fn test_inward_never_touches_email() {
        let set = MappingSet::defaults(EntityKind::Person);
        let member = RemoteMember {
            id: "k".to_string(),
            email_address: "other@x.com".to_string(),
            status: SubscriptionStatus::Subscribed,
            merge_fields: [
                ("FNAME".to_string(), "Beth".to_string()),
                ("EMAIL".to_string(), "other@x.com".to_string()),
            ]
            .into(),
            tags: vec![],
        };

        let changes = set.apply_inward(&member);
        assert_eq!(changes, vec![FieldChange::new("first_name", "Beth")]);
    }

    #[test]
    fn test_inward_respects_direction() {
        let set = MappingSet::defaults(EntityKind::Person);
        let member = RemoteMember {
            id: "k".to_string(),
            email_address: "a@x.com".to_string(),
            status: SubscriptionStatus::Subscribed,
            merge_fields: [("BIRTHDAY".to_string(), "1990-06-15".to_string())].into(),
            tags: vec![],
        };
        // BIRTHDAY is outward-only in the defaults.
        assert!(set.apply_inward(&member).is_empty());
    }

    #[test]
    fn test_validation_rejects_missing_email() {
        let set = MappingSet::new(
            EntityKind::Person,
            vec![FieldMapping::new(
                "first_name",
                "FNAME",
                MappingDirection::Bidirectional,
            )],
        );
        assert!(set.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_unknown_field() {
        let set = MappingSet::new(
            EntityKind::Person,
            vec![
                FieldMapping::new("email", EMAIL_ATTRIBUTE, MappingDirection::Bidirectional),
                FieldMapping::new("fax", "FAX", MappingDirection::Outward),
            ],
        );
        assert!(matches!(
            set.validate(),
            Err(EngineError::UnknownField { .. })
        ));
    }

    #[test]
    fn test_missing_kind_is_configuration_error() {
        let catalog = MappingCatalog::new([MappingSet::defaults(EntityKind::Person)]);
        assert!(catalog.for_kind(EntityKind::Person).is_ok());
        assert!(matches!(
            catalog.for_kind(EntityKind::Organization),
            Err(EngineError::Configuration { .. })
        ));
    }
}

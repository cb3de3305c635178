//! Tag and segment rule engine.
//!
//! Rules pair a declarative condition over an entity's field snapshot with
//! the tags and segments to apply remotely when the condition holds.
//! Evaluation is pure: the current time is an explicit parameter, matching
//! rules contribute by set union, and no rule can veto another's
//! contribution. Tag removal is a separate explicit operation, never a
//! rule-engine concern.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Datelike, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::entity::FieldSnapshot;
use crate::types::EntityKind;

/// Numeric comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Greater,
    GreaterOrEqual,
    Less,
    LessOrEqual,
}

impl CompareOp {
    fn holds(self, left: f64, right: f64) -> bool {
        match self {
            CompareOp::Greater => left > right,
            CompareOp::GreaterOrEqual => left >= right,
            CompareOp::Less => left < right,
            CompareOp::LessOrEqual => left <= right,
        }
    }

    fn symbol(self) -> &'static str {
        match self {
            CompareOp::Greater => ">",
            CompareOp::GreaterOrEqual => ">=",
            CompareOp::Less => "<",
            CompareOp::LessOrEqual => "<=",
        }
    }
}

/// A parsed rule condition.
///
/// The grammar covers numeric comparison, relative-time comparison, string
/// equality and containment, set membership, inclusive ranges, and compound
/// AND. There is no OR or NOT: cross-field disjunction is expressed by
/// listing multiple rules that contribute the same tag.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// `field > 10000000`
    Compare {
        field: String,
        op: CompareOp,
        value: f64,
    },
    /// `field > 7 days ago` — the instant is more recent than N days ago.
    WithinDays { field: String, days: i64 },
    /// `field < 30 days ago` — the instant is older than N days ago.
    OlderThanDays { field: String, days: i64 },
    /// `field = US` — case-insensitive text equality.
    Equals { field: String, value: String },
    /// `field = current_month` — the date's calendar month is the current one.
    CurrentMonth { field: String },
    /// `field contains ceo` — case-insensitive substring.
    Contains { field: String, needle: String },
    /// `field in [US, CA, MX]`
    In { field: String, values: Vec<String> },
    /// `field between 25 and 35` — inclusive numeric range.
    Between { field: String, low: f64, high: f64 },
    /// Every clause must hold.
    All(Vec<Condition>),
}

impl Condition {
    /// Evaluate against a field snapshot at an explicit instant.
    ///
    /// Missing fields make any clause false; they never error, because a
    /// rule set is shared across entities that expose different fields.
    #[must_use]
    pub fn evaluate(&self, snapshot: &FieldSnapshot, now: DateTime<Utc>) -> bool {
        match self {
            Condition::Compare { field, op, value } => snapshot
                .get(field)
                .and_then(|v| v.as_number(now))
                .is_some_and(|n| op.holds(n, *value)),
            Condition::WithinDays { field, days } => snapshot
                .get(field)
                .and_then(|v| v.as_instant())
                .is_some_and(|t| t > now - Duration::days(*days)),
            Condition::OlderThanDays { field, days } => snapshot
                .get(field)
                .and_then(|v| v.as_instant())
                .is_some_and(|t| t < now - Duration::days(*days)),
            Condition::Equals { field, value } => snapshot
                .text(field)
                .is_some_and(|v| v.eq_ignore_ascii_case(value)),
            Condition::CurrentMonth { field } => snapshot
                .get(field)
                .and_then(|v| v.month())
                .is_some_and(|m| m == now.month()),
            Condition::Contains { field, needle } => snapshot
                .text(field)
                .is_some_and(|v| v.to_lowercase().contains(&needle.to_lowercase())),
            Condition::In { field, values } => snapshot
                .text(field)
                .is_some_and(|v| values.iter().any(|c| v.eq_ignore_ascii_case(c))),
            Condition::Between { field, low, high } => snapshot
                .get(field)
                .and_then(|v| v.as_number(now))
                .is_some_and(|n| *low <= n && n <= *high),
            Condition::All(clauses) => clauses.iter().all(|c| c.evaluate(snapshot, now)),
        }
    }
}

impl std::fmt::Display for Condition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Condition::Compare { field, op, value } => {
                write!(f, "{field} {} {value}", op.symbol())
            }
            Condition::WithinDays { field, days } => write!(f, "{field} > {days} days ago"),
            Condition::OlderThanDays { field, days } => write!(f, "{field} < {days} days ago"),
            Condition::Equals { field, value } => write!(f, "{field} = {value}"),
            Condition::CurrentMonth { field } => write!(f, "{field} = current_month"),
            Condition::Contains { field, needle } => write!(f, "{field} contains {needle}"),
            Condition::In { field, values } => write!(f, "{field} in [{}]", values.join(", ")),
            Condition::Between { field, low, high } => {
                write!(f, "{field} between {low} and {high}")
            }
            Condition::All(clauses) => {
                let rendered: Vec<String> = clauses.iter().map(ToString::to_string).collect();
                write!(f, "{}", rendered.join(" and "))
            }
        }
    }
}

impl std::str::FromStr for Condition {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Split on AND connectives, but re-join the one AND that belongs to
        // a `between X and Y` range rather than connecting clauses.
        let mut clauses: Vec<String> = Vec::new();
        let mut parts = split_keyword(s, "and").into_iter();
        while let Some(part) = parts.next() {
            if find_word(part, "between").is_some() {
                if let Some(bound) = parts.next() {
                    clauses.push(format!("{part} and {bound}"));
                    continue;
                }
            }
            clauses.push(part.to_string());
        }

        if clauses.len() > 1 {
            let parsed = clauses
                .iter()
                .map(|c| parse_clause(c))
                .collect::<Result<Vec<_>, _>>()?;
            return Ok(Condition::All(parsed));
        }
        parse_clause(s)
    }
}

/// Split on a whitespace-delimited keyword, matched ASCII
/// case-insensitively.
fn split_keyword<'a>(s: &'a str, keyword: &str) -> Vec<&'a str> {
    let mut parts = Vec::new();
    let mut rest = s;
    while let Some(idx) = find_word(rest, keyword) {
        parts.push(&rest[..idx]);
        rest = &rest[idx + keyword.len()..];
    }
    parts.push(rest);
    parts
}

/// Byte offset of `word` as a whitespace-delimited token in `haystack`,
/// compared ASCII case-insensitively against the token itself. Offsets
/// index `haystack` directly, so non-ASCII text elsewhere in the
/// condition cannot skew them.
fn find_word(haystack: &str, word: &str) -> Option<usize> {
    let mut idx = 0;
    while idx < haystack.len() {
        let rest = &haystack[idx..];
        let trimmed = rest.trim_start();
        idx += rest.len() - trimmed.len();
        if trimmed.is_empty() {
            return None;
        }
        let end = trimmed.find(char::is_whitespace).unwrap_or(trimmed.len());
        if trimmed[..end].eq_ignore_ascii_case(word) {
            return Some(idx);
        }
        idx += end;
    }
    None
}

fn parse_clause(s: &str) -> Result<Condition, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty condition".to_string());
    }

    // field contains needle
    if let Some(idx) = find_word(s, "contains") {
        let field = s[..idx].trim();
        let needle = s[idx + "contains".len()..].trim();
        if field.is_empty() || needle.is_empty() {
            return Err(format!("malformed containment condition: {s}"));
        }
        return Ok(Condition::Contains {
            field: field.to_string(),
            needle: needle.to_string(),
        });
    }

    // field in [a, b, c]
    if let Some(idx) = find_word(s, "in") {
        let field = s[..idx].trim();
        let list = s[idx + "in".len()..].trim();
        if let Some(inner) = list.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
            if field.is_empty() {
                return Err(format!("malformed membership condition: {s}"));
            }
            let values: Vec<String> = inner
                .split(',')
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .collect();
            if values.is_empty() {
                return Err(format!("empty membership list: {s}"));
            }
            return Ok(Condition::In {
                field: field.to_string(),
                values,
            });
        }
    }

    // field between X and Y
    if let Some(idx) = find_word(s, "between") {
        let field = s[..idx].trim();
        let range = &s[idx + "between".len()..];
        let bounds: Vec<&str> = split_keyword(range, "and");
        if field.is_empty() || bounds.len() != 2 {
            return Err(format!("malformed range condition: {s}"));
        }
        let low = parse_number(bounds[0])?;
        let high = parse_number(bounds[1])?;
        return Ok(Condition::Between {
            field: field.to_string(),
            low,
            high,
        });
    }

    for op_text in [">=", "<=", ">", "<", "="] {
        if let Some((left, right)) = s.split_once(op_text) {
            let field = left.trim();
            let rhs = right.trim();
            if field.is_empty() || rhs.is_empty() {
                return Err(format!("malformed comparison: {s}"));
            }
            return parse_comparison(field, op_text, rhs);
        }
    }

    Err(format!("unrecognized condition: {s}"))
}

fn parse_comparison(field: &str, op_text: &str, rhs: &str) -> Result<Condition, String> {
    if let Some(days) = parse_days_ago(rhs) {
        return match op_text {
            ">" | ">=" => Ok(Condition::WithinDays {
                field: field.to_string(),
                days,
            }),
            "<" | "<=" => Ok(Condition::OlderThanDays {
                field: field.to_string(),
                days,
            }),
            _ => Err(format!("relative-time condition needs an ordering: {field} {op_text} {rhs}")),
        };
    }

    if op_text == "=" {
        if rhs.eq_ignore_ascii_case("current_month") {
            return Ok(Condition::CurrentMonth {
                field: field.to_string(),
            });
        }
        return Ok(Condition::Equals {
            field: field.to_string(),
            value: rhs.to_string(),
        });
    }

    let value = parse_number(rhs)?;
    let op = match op_text {
        ">" => CompareOp::Greater,
        ">=" => CompareOp::GreaterOrEqual,
        "<" => CompareOp::Less,
        "<=" => CompareOp::LessOrEqual,
        _ => unreachable!("filtered above"),
    };
    Ok(Condition::Compare {
        field: field.to_string(),
        op,
        value,
    })
}

/// Accept `7 days ago`, `7_days_ago` and `1 day ago`.
fn parse_days_ago(rhs: &str) -> Option<i64> {
    let normalized = rhs.replace('_', " ");
    let tokens: Vec<&str> = normalized.split_whitespace().collect();
    match tokens.as_slice() {
        [n, unit, "ago"] if *unit == "days" || *unit == "day" => n.parse().ok(),
        _ => None,
    }
}

fn parse_number(s: &str) -> Result<f64, String> {
    s.trim()
        .parse()
        .map_err(|_| format!("not a number: {}", s.trim()))
}

/// A configured rule: condition plus the tags and segments it contributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudienceRule {
    #[serde(with = "condition_text")]
    pub condition: Condition,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub segments: Vec<String>,
}

impl AudienceRule {
    /// Parse a rule that contributes tags.
    pub fn tagging(condition: &str, tags: &[&str]) -> Result<Self, String> {
        Ok(Self {
            condition: condition.parse()?,
            tags: tags.iter().map(ToString::to_string).collect(),
            segments: Vec::new(),
        })
    }

    /// Parse a rule that contributes segment memberships.
    pub fn segmenting(condition: &str, segments: &[&str]) -> Result<Self, String> {
        Ok(Self {
            condition: condition.parse()?,
            tags: Vec::new(),
            segments: segments.iter().map(ToString::to_string).collect(),
        })
    }
}

mod condition_text {
    use super::Condition;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(c: &Condition, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&c.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Condition, D::Error> {
        let text = String::deserialize(d)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}

/// Tags and segments produced by one evaluation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleOutcome {
    pub tags: BTreeSet<String>,
    pub segments: BTreeSet<String>,
}

/// The rule sets for all entity kinds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuleSet {
    rules: BTreeMap<EntityKind, Vec<AudienceRule>>,
}

impl RuleSet {
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// The stock rules: revenue tiers and geography for organizations,
    /// role and birthday rules for persons, role and activity rules for
    /// system users.
    #[must_use]
    pub fn defaults() -> Self {
        let mut set = Self::default();
        let rules: &[(EntityKind, Result<AudienceRule, String>)] = &[
            (
                EntityKind::Organization,
                AudienceRule::tagging("annual_revenue > 10000000", &["Enterprise", "High Value"]),
            ),
            (
                EntityKind::Organization,
                AudienceRule::tagging("annual_revenue < 1000000", &["SMB", "Small Business"]),
            ),
            (
                EntityKind::Organization,
                AudienceRule::tagging("country = US", &["US Market", "North America"]),
            ),
            (
                EntityKind::Organization,
                AudienceRule::segmenting("annual_revenue > 5000000", &["High Value Customers"]),
            ),
            (
                EntityKind::Organization,
                AudienceRule::segmenting("country in [US, CA, MX]", &["North America"]),
            ),
            (
                EntityKind::Person,
                AudienceRule::tagging("job contains ceo", &["C-Level", "Decision Maker"]),
            ),
            (
                EntityKind::Person,
                AudienceRule::tagging("job contains manager", &["Manager", "Influencer"]),
            ),
            (
                EntityKind::Person,
                AudienceRule::tagging("birthday = current_month", &["Birthday This Month"]),
            ),
            (
                EntityKind::Person,
                AudienceRule::segmenting("age between 25 and 35", &["Millennials"]),
            ),
            (
                EntityKind::Person,
                AudienceRule::segmenting("birthday = current_month", &["Birthday This Month"]),
            ),
            (
                EntityKind::SystemUser,
                AudienceRule::tagging("admin = 1", &["Administrator", "Power User"]),
            ),
            (
                EntityKind::SystemUser,
                AudienceRule::tagging("last_login > 7 days ago", &["Active User"]),
            ),
            (
                EntityKind::SystemUser,
                AudienceRule::segmenting("created_at > 30 days ago", &["Recent Users"]),
            ),
        ];
        for (kind, rule) in rules {
            // The stock conditions are compile-time constants; a parse
            // failure here is a programming error caught by tests.
            if let Ok(rule) = rule {
                set.push(*kind, rule.clone());
            }
        }
        set
    }

    pub fn push(&mut self, kind: EntityKind, rule: AudienceRule) {
        self.rules.entry(kind).or_default().push(rule);
    }

    #[must_use]
    pub fn rules_for(&self, kind: EntityKind) -> &[AudienceRule] {
        self.rules.get(&kind).map_or(&[], Vec::as_slice)
    }

    /// Evaluate every rule for `kind` against the snapshot.
    ///
    /// The result is the union of the matching rules' tag and segment sets,
    /// duplicates collapsed. Evaluating the same snapshot at the same
    /// instant twice yields identical results.
    #[must_use]
    pub fn evaluate(
        &self,
        kind: EntityKind,
        snapshot: &FieldSnapshot,
        now: DateTime<Utc>,
    ) -> RuleOutcome {
        let mut outcome = RuleOutcome::default();
        for rule in self.rules_for(kind) {
            if rule.condition.evaluate(snapshot, now) {
                outcome.tags.extend(rule.tags.iter().cloned());
                outcome.segments.extend(rule.segments.iter().cloned());
            }
        }
        outcome
    }
}

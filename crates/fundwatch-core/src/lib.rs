use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod lenient;
mod git;
mod secret;

pub use lenient::{parse_amount_str, parse_amount_value};
pub use git::GitContext;
pub use secret::Secret;

pub type RegionId = String;
pub type Regions = BTreeMap<RegionId, RegionRecord>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecordError {
    #[error("position code '{0}' does not match XX-SEN or XX-NN")]
    InvalidPosition(String),
    #[error("party '{0}' is not R or D")]
    InvalidParty(String),
    #[error("record name is empty")]
    EmptyName,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Ord, PartialOrd)]
pub enum Party {
    #[serde(rename = "R")]
    Republican,
    #[serde(rename = "D")]
    Democrat,
}

impl Party {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Republican => "R",
            Self::Democrat => "D",
        }
    }
}

impl std::str::FromStr for Party {
    type Err = RecordError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value
            .trim()
            .trim_matches(|ch| ch == '[' || ch == ']' || ch == '(' || ch == ')');
        match normalized.to_ascii_lowercase().as_str() {
            "r" | "rep" | "republican" => Ok(Self::Republican),
            "d" | "dem" | "democrat" | "democratic" => Ok(Self::Democrat),
            _ => Err(RecordError::InvalidParty(value.to_owned())),
        }
    }
}

/// Seat code of the form `XX-SEN` (senate) or `XX-NN` (house district).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PositionCode(String);

impl PositionCode {
    pub fn parse(raw: &str) -> Result<Self, RecordError> {
        let normalized = raw.trim().to_ascii_uppercase();
        if is_valid_position(&normalized) {
            Ok(Self(normalized))
        } else {
            Err(RecordError::InvalidPosition(raw.to_owned()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn region_code(&self) -> &str {
        &self.0[..2]
    }

    pub fn is_senate(&self) -> bool {
        self.0.ends_with("-SEN")
    }

    pub fn district(&self) -> Option<u8> {
        if self.is_senate() {
            return None;
        }
        self.0[3..].parse().ok()
    }
}

impl TryFrom<String> for PositionCode {
    type Error = RecordError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<PositionCode> for String {
    fn from(value: PositionCode) -> Self {
        value.0
    }
}

impl fmt::Display for PositionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn is_valid_position(code: &str) -> bool {
    let bytes = code.as_bytes();
    if bytes.len() < 5 || !bytes[0].is_ascii_uppercase() || !bytes[1].is_ascii_uppercase() {
        return false;
    }
    if bytes[2] != b'-' {
        return false;
    }

    match &bytes[3..] {
        b"SEN" => true,
        [tens, ones] => tens.is_ascii_digit() && ones.is_ascii_digit(),
        _ => false,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersonRecord {
    pub name: String,
    #[serde(
        rename = "photo",
        default,
        deserialize_with = "lenient::deserialize_optional_text",
        skip_serializing_if = "Option::is_none"
    )]
    pub photo_locator: Option<String>,
    pub position: PositionCode,
    pub party: Party,
    #[serde(rename = "lobbyTotal", deserialize_with = "lenient::deserialize_amount")]
    pub lobby_total: u64,
    #[serde(default)]
    pub organizations: BTreeSet<String>,
    #[serde(
        rename = "nextElection",
        default,
        with = "lenient::election_year",
        skip_serializing_if = "Option::is_none"
    )]
    pub next_election: Option<u16>,
    #[serde(
        rename = "runningFor",
        default,
        deserialize_with = "lenient::deserialize_optional_text",
        skip_serializing_if = "Option::is_none"
    )]
    pub running_for: Option<String>,
}

impl PersonRecord {
    pub fn key(&self) -> (&str, &PositionCode) {
        (self.name.as_str(), &self.position)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct RegionRecord {
    #[serde(rename = "totalAmount", default, deserialize_with = "lenient::deserialize_amount")]
    pub total_amount: u64,
    #[serde(rename = "congresspeople", default)]
    pub records: Vec<PersonRecord>,
}

impl RegionRecord {
    pub fn record_names(&self) -> BTreeSet<&str> {
        self.records.iter().map(|record| record.name.as_str()).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct SnapshotStats {
    #[serde(rename = "totalStates")]
    pub region_count: usize,
    #[serde(rename = "totalCongresspeople")]
    pub record_count: usize,
    #[serde(rename = "totalMoney")]
    pub total_amount: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(rename = "lastUpdated")]
    pub retrieved_at: DateTime<Utc>,
    #[serde(rename = "source")]
    pub source_locator: String,
    #[serde(rename = "totalStates")]
    pub region_count: usize,
    #[serde(rename = "totalCongresspeople")]
    pub record_count: usize,
    #[serde(rename = "totalMoney", deserialize_with = "lenient::deserialize_amount")]
    pub total_amount: u64,
    #[serde(rename = "states")]
    pub regions: Regions,
}

impl Snapshot {
    /// Assembles a snapshot from regions whose totals were already recomputed.
    pub fn new(
        retrieved_at: DateTime<Utc>,
        source_locator: impl Into<String>,
        stats: SnapshotStats,
        regions: Regions,
    ) -> Self {
        Self {
            retrieved_at,
            source_locator: source_locator.into(),
            region_count: stats.region_count,
            record_count: stats.record_count,
            total_amount: stats.total_amount,
            regions,
        }
    }

    pub fn stats(&self) -> SnapshotStats {
        SnapshotStats {
            region_count: self.region_count,
            record_count: self.record_count,
            total_amount: self.total_amount,
        }
    }

    /// Equality that ignores the generation timestamp.
    pub fn same_content(&self, other: &Snapshot) -> bool {
        self.source_locator == other.source_locator
            && self.stats() == other.stats()
            && self.regions == other.regions
    }

    pub fn to_pretty_json(&self) -> Result<String, serde_json::Error> {
        let mut body = serde_json::to_string_pretty(self)?;
        body.push('\n');
        Ok(body)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordRef {
    #[serde(rename = "state")]
    pub region: RegionId,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AmountChange {
    #[serde(rename = "state")]
    pub region: RegionId,
    #[serde(rename = "oldAmount")]
    pub old_amount: u64,
    #[serde(rename = "newAmount")]
    pub new_amount: u64,
    pub delta: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ChangeReport {
    #[serde(rename = "newCongresspeople")]
    pub new_records: Vec<RecordRef>,
    #[serde(rename = "removedCongresspeople")]
    pub removed_records: Vec<RecordRef>,
    #[serde(rename = "amountChanges")]
    pub amount_changes: Vec<AmountChange>,
    #[serde(rename = "totalDelta")]
    pub total_delta: i64,
}

impl ChangeReport {
    pub fn is_empty(&self) -> bool {
        self.new_records.is_empty()
            && self.removed_records.is_empty()
            && self.amount_changes.is_empty()
    }
}

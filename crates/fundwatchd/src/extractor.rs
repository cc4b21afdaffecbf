use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use fundwatch_core::lenient::{normalize_text, parse_amount_value, parse_election_year};
use fundwatch_core::{Party, PersonRecord, PositionCode, RecordError, RegionRecord, Regions};
use fundwatch_infer::{CompletionProvider, InferError, extract_json_object};
use serde::Deserialize;
use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("completion request failed: {0}")]
    Provider(#[from] InferError),
    #[error("reply contained no JSON object")]
    NoJsonObject,
    #[error("reply JSON did not parse: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("reply JSON is not a mapping of regions")]
    NotARegionMapping,
    #[error("document contained no recognizable region blocks")]
    NoRegionMarkup,
}

/// Turns a raw source document into per-region records.
///
/// Totals on the returned regions are not meaningful; the aggregator owns them.
#[async_trait]
pub trait Extractor: Send + Sync {
    async fn extract(&self, document: &str) -> Result<Regions, ExtractionError>;
}

/// A person as emitted by an untrusted producer, before any checks.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RawPerson {
    pub name: Option<String>,
    pub photo: Option<String>,
    pub position: Option<String>,
    pub party: Option<String>,
    #[serde(rename = "lobbyTotal")]
    pub lobby_total: Value,
    pub organizations: Value,
    #[serde(rename = "nextElection")]
    pub next_election: Value,
    #[serde(rename = "runningFor")]
    pub running_for: Option<String>,
}

impl RawPerson {
    pub fn into_record(self) -> Result<PersonRecord, RecordError> {
        let name = normalize_text(self.name.as_deref()).ok_or(RecordError::EmptyName)?;
        let position = PositionCode::parse(self.position.as_deref().unwrap_or_default())?;
        let party: Party = self.party.as_deref().unwrap_or_default().parse()?;

        Ok(PersonRecord {
            name,
            photo_locator: normalize_text(self.photo.as_deref()),
            position,
            party,
            lobby_total: parse_amount_value(&self.lobby_total),
            organizations: organization_codes(&self.organizations),
            next_election: parse_election_year(&self.next_election),
            running_for: normalize_text(self.running_for.as_deref()),
        })
    }
}

/// Applies record-level checks and builds the region mapping.
///
/// Invalid records are dropped with a warning, duplicates by `(name, position)`
/// keep their first occurrence, and regions left without records are omitted.
pub fn build_regions<I>(raw_regions: I) -> Regions
where
    I: IntoIterator<Item = (String, Vec<RawPerson>)>,
{
    let mut regions = Regions::new();

    for (region_name, people) in raw_regions {
        let Some(region_name) = normalize_text(Some(&region_name)) else {
            tracing::warn!(records = people.len(), "dropping region with empty name");
            continue;
        };

        let region = regions.entry(region_name.clone()).or_default();
        let mut seen: HashSet<(String, PositionCode)> = region
            .records
            .iter()
            .map(|record| (record.name.clone(), record.position.clone()))
            .collect();

        for raw in people {
            let raw_name = raw.name.clone().unwrap_or_default();
            match raw.into_record() {
                Ok(record) => {
                    if seen.insert((record.name.clone(), record.position.clone())) {
                        region.records.push(record);
                    } else {
                        tracing::debug!(
                            region = %region_name,
                            name = %record.name,
                            position = %record.position,
                            "skipping duplicate record"
                        );
                    }
                }
                Err(err) => {
                    tracing::warn!(
                        region = %region_name,
                        name = %raw_name,
                        error = %err,
                        "excluding invalid record"
                    );
                }
            }
        }
    }

    regions.retain(|region_name, region: &mut RegionRecord| {
        let keep = !region.records.is_empty();
        if !keep {
            tracing::warn!(region = %region_name, "dropping region without valid records");
        }
        keep
    });
    regions
}

/// Extraction through a text-completion service.
pub struct AiExtractor {
    provider: Arc<dyn CompletionProvider>,
    max_document_chars: usize,
}

impl AiExtractor {
    pub fn new(provider: Arc<dyn CompletionProvider>, max_document_chars: usize) -> Self {
        Self {
            provider,
            max_document_chars,
        }
    }
}

#[async_trait]
impl Extractor for AiExtractor {
    async fn extract(&self, document: &str) -> Result<Regions, ExtractionError> {
        let excerpt = document_prefix(document, self.max_document_chars);
        if excerpt.len() < document.len() {
            tracing::info!(
                submitted_bytes = excerpt.len(),
                document_bytes = document.len(),
                "submitting truncated document prefix"
            );
        }

        let reply = self.provider.complete(&build_extraction_prompt(excerpt)).await?;
        parse_extraction_reply(&reply)
    }
}

/// Parses a completion reply into regions.
///
/// The reply may carry the mapping at its root or under a `states` key.
pub fn parse_extraction_reply(reply: &str) -> Result<Regions, ExtractionError> {
    let json = extract_json_object(reply).ok_or(ExtractionError::NoJsonObject)?;
    let value: Value = serde_json::from_str(json)?;
    let Value::Object(mut root) = value else {
        return Err(ExtractionError::NotARegionMapping);
    };

    let mapping = match root.remove("states") {
        Some(Value::Object(states)) => states,
        Some(_) => return Err(ExtractionError::NotARegionMapping),
        None => root,
    };

    Ok(build_regions(raw_regions_from_mapping(mapping)))
}

fn raw_regions_from_mapping(mapping: Map<String, Value>) -> Vec<(String, Vec<RawPerson>)> {
    let mut raw_regions = Vec::with_capacity(mapping.len());

    for (region_name, region_value) in mapping {
        let people = match region_value.get("congresspeople") {
            Some(Value::Array(items)) => items,
            _ => {
                tracing::warn!(region = %region_name, "region has no record list, skipping");
                continue;
            }
        };

        let mut raw_people = Vec::with_capacity(people.len());
        for item in people {
            match RawPerson::deserialize(item) {
                Ok(raw) => raw_people.push(raw),
                Err(err) => {
                    tracing::warn!(region = %region_name, error = %err, "unreadable record, skipping");
                }
            }
        }
        raw_regions.push((region_name, raw_people));
    }

    raw_regions
}

fn organization_codes(value: &Value) -> BTreeSet<String> {
    let codes: Vec<&str> = match value {
        Value::Array(items) => items.iter().filter_map(Value::as_str).collect(),
        Value::String(text) => text.split(',').collect(),
        _ => Vec::new(),
    };

    codes
        .into_iter()
        .filter_map(|code| normalize_text(Some(code)))
        .collect()
}

/// The first `max_chars` characters of `document`, cut on a char boundary.
pub fn document_prefix(document: &str, max_chars: usize) -> &str {
    match document.char_indices().nth(max_chars) {
        Some((byte_index, _)) => &document[..byte_index],
        None => document,
    }
}

pub fn build_extraction_prompt(document_excerpt: &str) -> String {
    format!(
        "The document below is a web page listing members of the US Congress by state, \
with the pro-Israel lobby funding each member received. \
Extract every member of every state.\n\n\
Respond with a single JSON object and nothing else. Its keys are full US state names; \
each value has the shape {{\"congresspeople\": [...]}} where every entry has exactly these fields:\n\
- name: full name (string)\n\
- photo: absolute image URL, or \"\" when none is shown\n\
- position: \"XX-SEN\" for senators or \"XX-NN\" for representatives, using the two-letter \
state code and a two-digit district (for example \"CA-SEN\", \"CA-07\", \"AK-00\")\n\
- party: \"R\" or \"D\"\n\
- lobbyTotal: whole dollars as a number; expand K to thousands and M to millions\n\
- organizations: array of organization codes such as \"AIPAC\", \"RJC\", \"DMFI\"\n\
- nextElection: four-digit year as a string, or \"\"\n\
- runningFor: office being sought, or \"\"\n\n\
Structured data is often embedded in data-current-context attributes. \
Do not compute totals and do not include states that are not in the document.\n\n\
Document:\n{document_excerpt}"
    )
}

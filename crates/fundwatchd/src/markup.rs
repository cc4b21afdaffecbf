//! Deterministic extraction from the structured blocks the source page embeds
//! in `data-current-context` attributes. No completion service involved.

use async_trait::async_trait;
use fundwatch_core::Regions;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;

use crate::extractor::{ExtractionError, Extractor, RawPerson, build_regions};

const PHOTO_BASE: &str = "https://images.squarespace-cdn.com/content/v1/67243caa6cdc511f819106d8";

const ORGANIZATION_CODES: &[&str] = &[
    "AIPAC", "RJC", "DMFI", "JDCA", "NORPAC", "GCSC", "J Street", "JAC", "AMP", "USI", "TPOH",
    "COPAC", "NATPAC", "PIA",
];

const US_STATES: &[&str] = &[
    "Alabama",
    "Alaska",
    "Arizona",
    "Arkansas",
    "California",
    "Colorado",
    "Connecticut",
    "Delaware",
    "Florida",
    "Georgia",
    "Hawaii",
    "Idaho",
    "Illinois",
    "Indiana",
    "Iowa",
    "Kansas",
    "Kentucky",
    "Louisiana",
    "Maine",
    "Maryland",
    "Massachusetts",
    "Michigan",
    "Minnesota",
    "Mississippi",
    "Missouri",
    "Montana",
    "Nebraska",
    "Nevada",
    "New Hampshire",
    "New Jersey",
    "New Mexico",
    "New York",
    "North Carolina",
    "North Dakota",
    "Ohio",
    "Oklahoma",
    "Oregon",
    "Pennsylvania",
    "Rhode Island",
    "South Carolina",
    "South Dakota",
    "Tennessee",
    "Texas",
    "Utah",
    "Vermont",
    "Virginia",
    "Washington",
    "West Virginia",
    "Wisconsin",
    "Wyoming",
];

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ContextBlock {
    #[serde(rename = "sectionTitle")]
    section_title: Option<String>,
    #[serde(rename = "userItems")]
    user_items: Vec<UserItem>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct UserItem {
    title: Option<String>,
    description: Option<String>,
    image: Option<ItemImage>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ItemImage {
    #[serde(rename = "systemDataId")]
    system_data_id: Option<String>,
    filename: Option<String>,
}

pub struct MarkupExtractor {
    context_attr: Regex,
    line_break: Regex,
    tag: Regex,
    seat: Regex,
    lobby_total: Regex,
    next_election: Regex,
    running_for: Regex,
    year: Regex,
}

impl MarkupExtractor {
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            context_attr: Regex::new(r#"data-current-context\s*=\s*(?:"([^"]*)"|'([^']*)')"#)?,
            line_break: Regex::new(r"(?i)<br\s*/?>|</p>")?,
            tag: Regex::new(r"<[^>]*>")?,
            seat: Regex::new(r"([A-Z]{2}-(?:SEN|\d{2}))\s*\[([RD])\]")?,
            lobby_total: Regex::new(r"(?i)Lobby Total:\s*\$?([\d,.KMkm]+)")?,
            next_election: Regex::new(r"(?i)Next Election:\s*(\d{4})")?,
            running_for: Regex::new(r"(?i)Running for\s+([A-Za-z\s.]+?)(?:\s+\d{4})?$")?,
            year: Regex::new(r"\d{4}")?,
        })
    }

    fn parse_document(&self, document: &str) -> Vec<(String, Vec<RawPerson>)> {
        let mut raw_regions = Vec::new();

        for captures in self.context_attr.captures_iter(document) {
            let Some(encoded) = captures.get(1).or_else(|| captures.get(2)) else {
                continue;
            };
            let decoded = decode_entities(encoded.as_str());
            let block: ContextBlock = match serde_json::from_str(&decoded) {
                Ok(block) => block,
                Err(err) => {
                    tracing::debug!(error = %err, "skipping unreadable context block");
                    continue;
                }
            };

            let Some(region) = block
                .section_title
                .as_deref()
                .map(|title| self.plain_text(title))
                .and_then(|title| match_region(&title))
            else {
                continue;
            };

            let people = block
                .user_items
                .iter()
                .map(|item| self.parse_item(item))
                .collect::<Vec<_>>();
            raw_regions.push((region.to_owned(), people));
        }

        raw_regions
    }

    fn parse_item(&self, item: &UserItem) -> RawPerson {
        let mut person = RawPerson {
            name: item.title.as_deref().map(|title| self.plain_text(title)),
            photo: item.image.as_ref().and_then(photo_url),
            ..RawPerson::default()
        };
        let mut organizations: Vec<&str> = Vec::new();

        let description = item.description.as_deref().unwrap_or_default();
        let text = self.line_break.replace_all(description, "\n");
        let text = self.tag.replace_all(&text, "");
        let text = decode_entities(&text);

        for line in text.lines().map(str::trim).filter(|line| !line.is_empty()) {
            if let Some(captures) = self.seat.captures(line) {
                person.position = Some(captures[1].to_owned());
                person.party = Some(captures[2].to_owned());
                continue;
            }
            if let Some(captures) = self.lobby_total.captures(line) {
                person.lobby_total = Value::String(captures[1].to_owned());
                continue;
            }
            if let Some(captures) = self.next_election.captures(line) {
                person.next_election = Value::String(captures[1].to_owned());
                continue;
            }
            if let Some(captures) = self.running_for.captures(line) {
                person.running_for = Some(captures[1].trim().to_owned());
                if person.next_election.is_null()
                    && let Some(year) = self.year.find(line)
                {
                    person.next_election = Value::String(year.as_str().to_owned());
                }
                continue;
            }
            let lowered = line.to_ascii_lowercase();
            if lowered.contains("up for re-election") {
                person.running_for = Some("Re-election".to_owned());
                continue;
            }
            if lowered.contains("donations:") || lowered.contains("expenditures:") {
                continue;
            }

            organizations.extend(
                ORGANIZATION_CODES
                    .iter()
                    .copied()
                    .filter(|code| line.contains(code)),
            );
        }

        person.organizations = Value::Array(
            organizations
                .into_iter()
                .map(|code| Value::String(code.to_owned()))
                .collect(),
        );
        person
    }

    fn plain_text(&self, html: &str) -> String {
        decode_entities(&self.tag.replace_all(html, "")).trim().to_owned()
    }
}

#[async_trait]
impl Extractor for MarkupExtractor {
    async fn extract(&self, document: &str) -> Result<Regions, ExtractionError> {
        let raw_regions = self.parse_document(document);
        if raw_regions.is_empty() {
            return Err(ExtractionError::NoRegionMarkup);
        }
        tracing::info!(blocks = raw_regions.len(), "parsed region blocks from markup");
        Ok(build_regions(raw_regions))
    }
}

fn photo_url(image: &ItemImage) -> Option<String> {
    let id = image.system_data_id.as_deref()?.trim();
    if id.is_empty() {
        return None;
    }
    let filename = image.filename.as_deref().unwrap_or_default().trim();
    Some(format!("{PHOTO_BASE}/{id}/{filename}"))
}

/// Exact case-insensitive match first, then the longest state name contained
/// in the title, so "West Virginia" is never read as "Virginia".
fn match_region(title: &str) -> Option<&'static str> {
    let lowered = title.to_ascii_lowercase();
    US_STATES
        .iter()
        .copied()
        .find(|state| state.eq_ignore_ascii_case(title))
        .or_else(|| {
            US_STATES
                .iter()
                .copied()
                .filter(|state| lowered.contains(&state.to_ascii_lowercase()))
                .max_by_key(|state| state.len())
        })
}

fn decode_entities(input: &str) -> String {
    let mut output = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find('&') {
        output.push_str(&rest[..start]);
        let candidate = &rest[start..];
        let decoded = candidate
            .find(';')
            .filter(|end| *end <= 10)
            .and_then(|end| decode_entity(&candidate[1..end]).map(|ch| (ch, end)));

        match decoded {
            Some((ch, end)) => {
                output.push(ch);
                rest = &candidate[end + 1..];
            }
            None => {
                output.push('&');
                rest = &candidate[1..];
            }
        }
    }

    output.push_str(rest);
    output
}

fn decode_entity(name: &str) -> Option<char> {
    match name {
        "quot" => Some('"'),
        "amp" => Some('&'),
        "lt" => Some('<'),
        "gt" => Some('>'),
        "apos" => Some('\''),
        "nbsp" => Some(' '),
        _ => {
            let numeric = name.strip_prefix('#')?;
            let code = match numeric.strip_prefix(['x', 'X']) {
                Some(hex) => u32::from_str_radix(hex, 16).ok()?,
                None => numeric.parse().ok()?,
            };
            char::from_u32(code)
        }
    }
}

use std::collections::BTreeMap;

use url::Url;

/// Written in place of a field the page did not provide.
pub const UNKNOWN: &str = "unknown";

/// Query parameters that only track where a click came from.
const TRACKING_PARAMS: &[&str] = &[
    "utm_source",
    "utm_medium",
    "utm_campaign",
    "utm_term",
    "utm_content",
    "gclid",
    "fbclid",
    "ref",
    "ref_src",
    "searchorigin",
    "cs",
    "suggestionid",
];

/// How a target derives the natural key of its records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyRule {
    /// Canonicalized URL held in the named field.
    CanonicalUrl(&'static str),
    /// Case- and whitespace-insensitive text of the named field.
    NormalizedText(&'static str),
}

impl KeyRule {
    pub fn field(&self) -> &'static str {
        match self {
            KeyRule::CanonicalUrl(f) | KeyRule::NormalizedText(f) => f,
        }
    }

    /// None when the key field is missing or blank.
    pub fn derive(&self, fields: &BTreeMap<String, String>) -> Option<String> {
        let raw = fields.get(self.field())?.trim();
        if raw.is_empty() || raw == UNKNOWN {
            return None;
        }
        let key = match self {
            KeyRule::CanonicalUrl(_) => canonical_url(raw),
            KeyRule::NormalizedText(_) => normalize_text(raw),
        };
        Some(key)
    }
}

/// One extracted listing. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    key: String,
    fields: BTreeMap<String, String>,
}

impl Record {
    /// Build a record from extracted fields; None if the key field is missing.
    pub fn new(fields: BTreeMap<String, String>, rule: KeyRule) -> Option<Record> {
        let key = rule.derive(&fields)?;
        Some(Record { key, fields })
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Field value, or the unknown marker.
    pub fn get(&self, field: &str) -> &str {
        self.fields
            .get(field)
            .map(|v| v.as_str())
            .filter(|v| !v.trim().is_empty())
            .unwrap_or(UNKNOWN)
    }

    /// Values in the given column order.
    pub fn row<'a>(&'a self, columns: &[&str]) -> Vec<&'a str> {
        columns.iter().map(|c| self.get(c)).collect()
    }

    /// Copy of this record with one more field set. The key is unchanged.
    pub fn with_field(&self, field: &str, value: impl Into<String>) -> Record {
        let mut fields = self.fields.clone();
        fields.insert(field.to_string(), value.into());
        Record {
            key: self.key.clone(),
            fields,
        }
    }
}

/// Builder-style helper so extractors read as a list of fields.
#[derive(Debug, Default)]
pub struct Fields(BTreeMap<String, String>);

impl Fields {
    pub fn new() -> Self {
        Fields::default()
    }

    /// Set a field; blank or missing values become the unknown marker.
    pub fn set(mut self, name: &str, value: Option<String>) -> Self {
        let value = value
            .map(|v| collapse_whitespace(&v))
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| UNKNOWN.to_string());
        self.0.insert(name.to_string(), value);
        self
    }

    pub fn build(self, rule: KeyRule) -> Option<Record> {
        Record::new(self.0, rule)
    }

    pub fn into_inner(self) -> BTreeMap<String, String> {
        self.0
    }
}

/// Lower-case scheme and host, drop fragments, default ports, tracking
/// parameters and trailing slashes. Unparseable input is returned trimmed.
pub fn canonical_url(raw: &str) -> String {
    let Ok(mut url) = Url::parse(raw.trim()) else {
        return raw.trim().to_string();
    };
    url.set_fragment(None);

    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| !TRACKING_PARAMS.contains(&k.to_ascii_lowercase().as_str()))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if kept.is_empty() {
        url.set_query(None);
    } else {
        url.query_pairs_mut().clear().extend_pairs(kept);
    }

    // Url already lower-cases scheme and host and drops default ports.
    let mut out = url.to_string();
    while out.ends_with('/') && url.path() != "/" {
        out.pop();
    }
    if url.path() == "/" && url.query().is_none() {
        out = out.trim_end_matches('/').to_string();
    }
    out
}

pub fn normalize_text(raw: &str) -> String {
    collapse_whitespace(raw).to_lowercase()
}

pub fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

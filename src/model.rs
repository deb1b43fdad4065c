use chrono::{DateTime, Utc};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Which registry an update belongs to. Partition is by fetch target, not by
/// schedule shape.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Domain {
    Covid,
    News,
}

impl Domain {
    pub const ALL: [Domain; 2] = [Domain::Covid, Domain::News];

    pub fn as_str(&self) -> &'static str {
        match self {
            Domain::Covid => "covid",
            Domain::News => "news",
        }
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A scheduled fetch request. Names are unique within one domain's list;
/// the same name may appear in both domains.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UpdateRecord {
    pub name: String,
    /// Seconds between arming and firing. Zero fires as soon as observed.
    pub interval: u64,
    pub repetitive: bool,
    /// Human-readable summary line shown on the dashboard.
    pub content: String,
}

impl UpdateRecord {
    pub fn new(name: &str, interval: u64, domain: Domain, repetitive: bool) -> Self {
        let mut content = format!("Update {domain}, interval {interval}s");
        if repetitive {
            content.push_str(", repeating");
        }
        Self {
            name: name.to_owned(),
            interval,
            repetitive,
            content,
        }
    }
}

/// A headline count that upstream may not be able to provide. Serializes as a
/// plain number, or as the literal string "N/A" when unavailable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stat {
    Value(i64),
    NotAvailable,
}

impl Stat {
    pub fn is_available(&self) -> bool {
        matches!(self, Stat::Value(_))
    }
}

impl From<Option<i64>> for Stat {
    fn from(value: Option<i64>) -> Self {
        match value {
            Some(n) => Stat::Value(n),
            None => Stat::NotAvailable,
        }
    }
}

impl fmt::Display for Stat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stat::Value(n) => write!(f, "{n}"),
            Stat::NotAvailable => f.write_str("N/A"),
        }
    }
}

impl Serialize for Stat {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Stat::Value(n) => serializer.serialize_i64(*n),
            Stat::NotAvailable => serializer.serialize_str("N/A"),
        }
    }
}

impl<'de> Deserialize<'de> for Stat {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Num(i64),
            Text(String),
        }
        match Repr::deserialize(deserializer)? {
            Repr::Num(n) => Ok(Stat::Value(n)),
            Repr::Text(s) if s == "N/A" => Ok(Stat::NotAvailable),
            Repr::Text(s) => Err(D::Error::custom(format!(
                "expected a number or \"N/A\", got {s:?}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Article {
    pub title: String,
    pub url: String,
}

/// Result of one COVID statistics fetch, replacing the document's headline
/// fields wholesale.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CovidSnapshot {
    pub location: String,
    pub nation_location: String,
    pub local_7day_infections: Stat,
    pub national_7day_infections: Stat,
    pub hospital_cases: Stat,
    pub deaths_total: Stat,
    pub as_of: Option<String>,
}

/// The dashboard document: aggregate root persisted as one JSON file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Document {
    pub covid_updates: Vec<UpdateRecord>,
    pub news_updates: Vec<UpdateRecord>,
    pub blacklisted_articles: Vec<String>,
    pub news_articles: Vec<Article>,
    pub api_key: String,
    pub log_level: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name_err: Option<String>,
    pub location: String,
    pub nation_location: String,
    pub local_7day_infections: Stat,
    pub national_7day_infections: Stat,
    pub hospital_cases: Stat,
    pub deaths_total: Stat,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<DateTime<Utc>>,
}

impl Default for Document {
    fn default() -> Self {
        Self {
            covid_updates: Vec::new(),
            news_updates: Vec::new(),
            blacklisted_articles: Vec::new(),
            news_articles: Vec::new(),
            api_key: String::new(),
            log_level: "info".to_owned(),
            name_err: None,
            location: "Exeter".to_owned(),
            nation_location: "England".to_owned(),
            local_7day_infections: Stat::NotAvailable,
            national_7day_infections: Stat::NotAvailable,
            hospital_cases: Stat::NotAvailable,
            deaths_total: Stat::NotAvailable,
            last_updated: None,
        }
    }
}

impl Document {
    pub fn updates(&self, domain: Domain) -> &[UpdateRecord] {
        match domain {
            Domain::Covid => &self.covid_updates,
            Domain::News => &self.news_updates,
        }
    }

    pub fn updates_mut(&mut self, domain: Domain) -> &mut Vec<UpdateRecord> {
        match domain {
            Domain::Covid => &mut self.covid_updates,
            Domain::News => &mut self.news_updates,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stat_serializes_number_or_sentinel() {
        assert_eq!(serde_json::to_string(&Stat::Value(42)).unwrap(), "42");
        assert_eq!(
            serde_json::to_string(&Stat::NotAvailable).unwrap(),
            "\"N/A\""
        );
    }

    #[test]
    fn stat_roundtrips() {
        let n: Stat = serde_json::from_str("42").unwrap();
        assert_eq!(n, Stat::Value(42));
        let na: Stat = serde_json::from_str("\"N/A\"").unwrap();
        assert_eq!(na, Stat::NotAvailable);
        assert!(serde_json::from_str::<Stat>("\"soon\"").is_err());
    }

    #[test]
    fn default_document_roundtrips() {
        let doc = Document::default();
        let json = serde_json::to_string_pretty(&doc).unwrap();
        let back: Document = serde_json::from_str(&json).unwrap();
        assert_eq!(doc, back);
        // transient error state must stay out of the serialized form
        assert!(!json.contains("name_err"));
    }

    #[test]
    fn update_record_content_line() {
        let rec = UpdateRecord::new("morning", 300, Domain::News, true);
        assert_eq!(rec.content, "Update news, interval 300s, repeating");
        let rec = UpdateRecord::new("once", 60, Domain::Covid, false);
        assert_eq!(rec.content, "Update covid, interval 60s");
    }
}

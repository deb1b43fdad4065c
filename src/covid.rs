//! COVID statistics fetcher.
//!
//! Queries the UK coverage API for per-day records, then reduces them to the
//! dashboard's headline numbers: a trailing 7-day case sum anchored on the
//! most recent day with a complete field set, cumulative deaths, and (nation
//! scope only) current hospital cases. A fixed-format CSV export of the same
//! records can seed the dashboard offline.

use crate::model::{CovidSnapshot, Stat};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;
use serde_json::json;
use std::fmt;
use tracing::{debug, warn};

const COVID_API_BASE: &str = "https://api.coronavirus.data.gov.uk/";

/// How strict the completeness scan is: nation-scope queries also carry the
/// cumulative deaths series.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Local,
    Nation,
}

/// One day of upstream data, most recent first in API responses.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct DailyRecord {
    pub date: String,
    #[serde(rename = "newCasesByPublishDate")]
    pub new_cases: Option<i64>,
    #[serde(default, rename = "cumDailyNsoDeathsByDeathDate")]
    pub deaths: Option<i64>,
}

#[async_trait]
pub trait CovidApi: Send + Sync {
    /// Time-ordered daily records (most recent first) for one area.
    async fn daily_records(&self, area_type: &str, area_name: &str) -> Result<Vec<DailyRecord>>;

    /// The hospitalCases series for one area, most recent first.
    async fn hospital_cases(&self, area_type: &str, area_name: &str) -> Result<Vec<Option<i64>>>;
}

#[derive(Clone)]
pub struct CovidClient {
    http: Client,
    base_url: Url,
}

impl fmt::Debug for CovidClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CovidClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl Default for CovidClient {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Deserialize)]
#[serde(bound(deserialize = "T: serde::Deserialize<'de>"))]
struct Envelope<T> {
    #[serde(default)]
    data: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct HospitalRow {
    #[serde(rename = "hospitalCases")]
    hospital_cases: Option<i64>,
}

impl CovidClient {
    pub fn new() -> Self {
        let base_url = Url::parse(COVID_API_BASE).expect("valid default coverage API URL");
        Self::with_base_url(base_url)
    }

    pub fn with_base_url(base_url: Url) -> Self {
        let http = Client::builder()
            .user_agent("coviddash/0.1")
            .build()
            .expect("reqwest client");
        Self { http, base_url }
    }

    async fn query<T: serde::de::DeserializeOwned>(
        &self,
        area_type: &str,
        area_name: &str,
        structure: serde_json::Value,
    ) -> Result<Vec<T>> {
        let endpoint = self
            .base_url
            .join("v1/data")
            .context("invalid coverage API base URL")?;
        let filters = format!("areaType={area_type};areaName={area_name}");
        let structure = structure.to_string();
        let request = self
            .http
            .get(endpoint)
            .query(&[("filters", filters.as_str()), ("structure", structure.as_str())])
            .build()
            .context("failed to build coverage API request")?;
        debug!(url = %request.url(), "sending coverage API request");

        let res = self
            .http
            .execute(request)
            .await
            .context("failed to reach the coverage API")?;

        // The API answers 204 when a filter matches no area.
        if res.status() == StatusCode::NO_CONTENT {
            return Ok(Vec::new());
        }
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(anyhow!("coverage API error {}: {}", status, body));
        }

        let payload: Envelope<T> = res.json().await.context("invalid coverage API response")?;
        Ok(payload.data)
    }
}

#[async_trait]
impl CovidApi for CovidClient {
    async fn daily_records(&self, area_type: &str, area_name: &str) -> Result<Vec<DailyRecord>> {
        let mut structure = json!({
            "date": "date",
            "newCasesByPublishDate": "newCasesByPublishDate",
        });
        // Deaths are only reported reliably at nation scope.
        if area_type == "nation" {
            structure["cumDailyNsoDeathsByDeathDate"] = json!("cumDailyNsoDeathsByDeathDate");
        }
        self.query(area_type, area_name, structure).await
    }

    async fn hospital_cases(&self, area_type: &str, area_name: &str) -> Result<Vec<Option<i64>>> {
        let rows: Vec<HospitalRow> = self
            .query(area_type, area_name, json!({"hospitalCases": "hospitalCases"}))
            .await?;
        Ok(rows.into_iter().map(|r| r.hospital_cases).collect())
    }
}

/// Headline numbers for one area.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AreaSummary {
    pub as_of: Option<String>,
    pub week_cases: Stat,
    pub deaths: Stat,
}

impl AreaSummary {
    pub fn unavailable() -> Self {
        Self {
            as_of: None,
            week_cases: Stat::NotAvailable,
            deaths: Stat::NotAvailable,
        }
    }
}

/// Reduce a most-recent-first record list to an [`AreaSummary`].
///
/// The anchor is the first day whose required fields are all present. The
/// 7-day sum covers the anchor day and the six days after it in the list;
/// if any of those days is absent or null the sum is `N/A`, never partial.
pub fn summarize(records: &[DailyRecord], scope: Scope) -> AreaSummary {
    let complete = |r: &DailyRecord| {
        r.new_cases.is_some() && (scope != Scope::Nation || r.deaths.is_some())
    };
    let Some(anchor) = records.iter().position(complete) else {
        warn!("no day in the response has a complete field set");
        return AreaSummary::unavailable();
    };

    let week = &records[anchor..];
    let week_cases = if week.len() >= 7 && week[..7].iter().all(|r| r.new_cases.is_some()) {
        Stat::Value(week[..7].iter().filter_map(|r| r.new_cases).sum())
    } else {
        warn!(date = %records[anchor].date, "7-day case window incomplete");
        Stat::NotAvailable
    };

    let deaths = match scope {
        Scope::Nation => Stat::from(records[anchor].deaths),
        Scope::Local => Stat::NotAvailable,
    };

    AreaSummary {
        as_of: Some(records[anchor].date.clone()),
        week_cases,
        deaths,
    }
}

/// First non-null value in a most-recent-first hospitalCases series.
pub fn latest_hospital_cases(series: &[Option<i64>]) -> Stat {
    match series.iter().find_map(|v| *v) {
        Some(n) => Stat::Value(n),
        None => {
            warn!("no hospital cases figure in the response");
            Stat::NotAvailable
        }
    }
}

/// Fetch local and national statistics and fold them into one snapshot.
/// Upstream failure of either side degrades that side's fields to `N/A`.
pub async fn fetch_covid(
    api: &dyn CovidApi,
    local_area: &str,
    local_area_type: &str,
    nation: &str,
) -> CovidSnapshot {
    let (local, national) = futures::join!(
        api.daily_records(local_area_type, local_area),
        api.daily_records("nation", nation),
    );

    let local = match local {
        Ok(records) => summarize(&records, Scope::Local),
        Err(err) => {
            warn!(?err, area = local_area, "local statistics query failed");
            AreaSummary::unavailable()
        }
    };
    let national = match national {
        Ok(records) => summarize(&records, Scope::Nation),
        Err(err) => {
            warn!(?err, area = nation, "national statistics query failed");
            AreaSummary::unavailable()
        }
    };

    let hospital_cases = match api.hospital_cases("nation", nation).await {
        Ok(series) => latest_hospital_cases(&series),
        Err(err) => {
            warn!(?err, area = nation, "hospital cases query failed");
            Stat::NotAvailable
        }
    };

    CovidSnapshot {
        location: local_area.to_owned(),
        nation_location: nation.to_owned(),
        local_7day_infections: local.week_cases,
        national_7day_infections: national.week_cases,
        hospital_cases,
        deaths_total: national.deaths,
        as_of: national.as_of.or(local.as_of),
    }
}

/// One row of the fixed-format CSV export:
/// `areaCode,areaName,areaType,date,cumDailyNsoDeathsByDeathDate,hospitalCases,newCasesBySpecimenDate`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsvRow {
    pub date: String,
    pub deaths: Option<i64>,
    pub hospital_cases: Option<i64>,
    pub new_cases: Option<i64>,
}

/// Parse the CSV export. Short rows are skipped with a warning; the header
/// row parses to all-null numeric fields and is ignored by the scans.
pub fn parse_csv(text: &str) -> Vec<CsvRow> {
    let mut rows = Vec::new();
    for line in text.lines() {
        if line.trim().is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split(',').collect();
        if fields.len() < 7 {
            warn!(line, "short CSV row skipped");
            continue;
        }
        rows.push(CsvRow {
            date: fields[3].to_owned(),
            deaths: fields[4].trim().parse().ok(),
            hospital_cases: fields[5].trim().parse().ok(),
            new_cases: fields[6].trim().parse().ok(),
        });
    }
    rows
}

/// Build a nation-scope snapshot from CSV rows, applying the same 7-day rule
/// as the API path.
pub fn snapshot_from_csv(rows: &[CsvRow], location: &str, nation: &str) -> CovidSnapshot {
    let records: Vec<DailyRecord> = rows
        .iter()
        .map(|r| DailyRecord {
            date: r.date.clone(),
            new_cases: r.new_cases,
            deaths: r.deaths,
        })
        .collect();
    let summary = summarize(&records, Scope::Nation);
    let hospital_series: Vec<Option<i64>> = rows.iter().map(|r| r.hospital_cases).collect();

    CovidSnapshot {
        location: location.to_owned(),
        nation_location: nation.to_owned(),
        local_7day_infections: Stat::NotAvailable,
        national_7day_infections: summary.week_cases,
        hospital_cases: latest_hospital_cases(&hospital_series),
        deaths_total: summary.deaths,
        as_of: summary.as_of,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(date: &str, cases: Option<i64>, deaths: Option<i64>) -> DailyRecord {
        DailyRecord {
            date: date.to_owned(),
            new_cases: cases,
            deaths,
        }
    }

    fn week_of_cases(cases: [i64; 7]) -> Vec<DailyRecord> {
        cases
            .iter()
            .enumerate()
            .map(|(i, c)| day(&format!("2021-11-{:02}", 10 - i), Some(*c), Some(100)))
            .collect()
    }

    #[test]
    fn seven_day_sum_over_complete_week() {
        let records = week_of_cases([1, 2, 3, 4, 5, 6, 7]);
        let summary = summarize(&records, Scope::Nation);
        assert_eq!(summary.week_cases, Stat::Value(28));
        assert_eq!(summary.deaths, Stat::Value(100));
        assert_eq!(summary.as_of.as_deref(), Some("2021-11-10"));
    }

    #[test]
    fn missing_day_in_window_yields_na_not_partial() {
        let mut records = week_of_cases([1, 2, 3, 4, 5, 6, 7]);
        records[4].new_cases = None;
        let summary = summarize(&records, Scope::Nation);
        assert_eq!(summary.week_cases, Stat::NotAvailable);
        // anchor fields still reported
        assert_eq!(summary.deaths, Stat::Value(100));
    }

    #[test]
    fn short_window_yields_na() {
        let records = vec![
            day("2021-11-10", Some(5), Some(100)),
            day("2021-11-09", Some(5), Some(99)),
        ];
        let summary = summarize(&records, Scope::Nation);
        assert_eq!(summary.week_cases, Stat::NotAvailable);
    }

    #[test]
    fn anchor_skips_incomplete_recent_days() {
        let mut records = week_of_cases([1, 2, 3, 4, 5, 6, 7]);
        records.insert(0, day("2021-11-11", Some(9), None));
        // newest day lacks deaths at nation scope, so the anchor moves down
        let summary = summarize(&records, Scope::Nation);
        assert_eq!(summary.as_of.as_deref(), Some("2021-11-10"));
        assert_eq!(summary.week_cases, Stat::Value(28));
    }

    #[test]
    fn local_scope_ignores_deaths() {
        let records = vec![
            day("2021-11-10", Some(1), None),
            day("2021-11-09", Some(1), None),
            day("2021-11-08", Some(1), None),
            day("2021-11-07", Some(1), None),
            day("2021-11-06", Some(1), None),
            day("2021-11-05", Some(1), None),
            day("2021-11-04", Some(1), None),
        ];
        let summary = summarize(&records, Scope::Local);
        assert_eq!(summary.week_cases, Stat::Value(7));
        assert_eq!(summary.deaths, Stat::NotAvailable);
    }

    #[test]
    fn no_complete_day_is_fully_unavailable() {
        let records = vec![day("2021-11-10", None, Some(1))];
        assert_eq!(summarize(&records, Scope::Nation), AreaSummary::unavailable());
        assert_eq!(summarize(&[], Scope::Local), AreaSummary::unavailable());
    }

    #[test]
    fn hospital_series_takes_first_non_null() {
        assert_eq!(
            latest_hospital_cases(&[None, None, Some(812), Some(900)]),
            Stat::Value(812)
        );
        assert_eq!(latest_hospital_cases(&[None, None]), Stat::NotAvailable);
        assert_eq!(latest_hospital_cases(&[]), Stat::NotAvailable);
    }

    const CSV: &str = "\
areaCode,areaName,areaType,date,cumDailyNsoDeathsByDeathDate,hospitalCases,newCasesBySpecimenDate
E92000001,England,nation,2021-11-10,140000,,500
E92000001,England,nation,2021-11-09,139900,812,510
E92000001,England,nation,2021-11-08,139800,800,520
E92000001,England,nation,2021-11-07,139700,790,530
E92000001,England,nation,2021-11-06,139600,780,540
E92000001,England,nation,2021-11-05,139500,770,550
E92000001,England,nation,2021-11-04,139400,760,560
E92000001,England,nation,2021-11-03,139300,750,570
";

    #[test]
    fn csv_parses_and_summarizes() {
        let rows = parse_csv(CSV);
        // header row included but numerically null
        assert_eq!(rows.len(), 9);
        assert_eq!(rows[0].new_cases, None);
        assert_eq!(rows[1].new_cases, Some(500));

        let snap = snapshot_from_csv(&rows, "Exeter", "England");
        assert_eq!(
            snap.national_7day_infections,
            Stat::Value(500 + 510 + 520 + 530 + 540 + 550 + 560)
        );
        assert_eq!(snap.hospital_cases, Stat::Value(812));
        assert_eq!(snap.deaths_total, Stat::Value(140000));
        assert_eq!(snap.local_7day_infections, Stat::NotAvailable);
        assert_eq!(snap.as_of.as_deref(), Some("2021-11-10"));
    }

    #[test]
    fn csv_short_rows_skipped() {
        let rows = parse_csv("only,three,fields\n");
        assert!(rows.is_empty());
    }
}

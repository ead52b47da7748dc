use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Datelike, NaiveDate};
use dashmap::DashMap;
use thiserror::Error;

use crate::model::DATE_FORMAT;

pub const API_NINJAS_BASE_URL: &str = "https://api.api-ninjas.com";

#[derive(Debug, Error)]
pub enum HolidayError {
    #[error("holiday lookup request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("holiday lookup returned HTTP {0}")]
    Status(u16),
    #[error("holiday lookup unavailable: {0}")]
    Unavailable(String),
}

/// Answers whether a date is a public holiday in a country.
///
/// Failures must be surfaced: a failed lookup is never "not a holiday".
#[async_trait]
pub trait HolidayCalendar: Send + Sync {
    async fn is_holiday(&self, country: &str, date: NaiveDate) -> Result<bool, HolidayError>;
}

// ── Fixed list ───────────────────────────────────────────────────

/// Holidays from a static list, independent of country.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FixedHolidays {
    dates: HashSet<NaiveDate>,
}

impl FixedHolidays {
    pub fn new<I: IntoIterator<Item = NaiveDate>>(dates: I) -> Self {
        Self {
            dates: dates.into_iter().collect(),
        }
    }

    /// Parse a comma-separated list of ISO dates.
    pub fn parse_list(raw: &str) -> Result<Self, chrono::ParseError> {
        let dates = raw
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| NaiveDate::parse_from_str(s, DATE_FORMAT))
            .collect::<Result<HashSet<_>, _>>()?;
        Ok(Self { dates })
    }

    pub fn len(&self) -> usize {
        self.dates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }
}

#[async_trait]
impl HolidayCalendar for FixedHolidays {
    async fn is_holiday(&self, _country: &str, date: NaiveDate) -> Result<bool, HolidayError> {
        Ok(self.dates.contains(&date))
    }
}

// ── api-ninjas ───────────────────────────────────────────────────

/// Remote lookup against the api-ninjas holidays endpoint.
/// A non-empty JSON array means the date is a holiday.
pub struct ApiNinjasHolidays {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl ApiNinjasHolidays {
    pub fn new(api_key: impl Into<String>, timeout: Duration) -> Result<Self, HolidayError> {
        Self::with_base_url(API_NINJAS_BASE_URL, api_key, timeout)
    }

    pub fn with_base_url(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, HolidayError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        })
    }
}

#[async_trait]
impl HolidayCalendar for ApiNinjasHolidays {
    async fn is_holiday(&self, country: &str, date: NaiveDate) -> Result<bool, HolidayError> {
        let year = date.year().to_string();
        let month = date.month().to_string();
        let day = date.day().to_string();
        let response = self
            .client
            .get(format!("{}/v1/holidays", self.base_url))
            .header("X-Api-Key", &self.api_key)
            .query(&[
                ("country", country),
                ("year", year.as_str()),
                ("month", month.as_str()),
                ("day", day.as_str()),
            ])
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(HolidayError::Status(status.as_u16()));
        }
        let holidays: Vec<serde_json::Value> = response.json().await?;
        Ok(!holidays.is_empty())
    }
}

// ── Cache ────────────────────────────────────────────────────────

/// Memoizes successful answers. Errors are never cached.
pub struct CachedHolidays<H> {
    inner: H,
    answers: DashMap<(String, NaiveDate), bool>,
}

impl<H: HolidayCalendar> CachedHolidays<H> {
    pub fn new(inner: H) -> Self {
        Self {
            inner,
            answers: DashMap::new(),
        }
    }

    pub fn cached(&self) -> usize {
        self.answers.len()
    }
}

#[async_trait]
impl<H: HolidayCalendar> HolidayCalendar for CachedHolidays<H> {
    async fn is_holiday(&self, country: &str, date: NaiveDate) -> Result<bool, HolidayError> {
        let key = (country.to_string(), date);
        if let Some(hit) = self.answers.get(&key) {
            return Ok(*hit);
        }
        let answer = self.inner.is_holiday(country, date).await?;
        self.answers.insert(key, answer);
        Ok(answer)
    }
}

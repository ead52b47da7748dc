use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::engine::RulePolicy;
use crate::holiday::FixedHolidays;
use crate::limits::DEFAULT_BOOKING_WINDOW_DAYS;
use crate::model::SpotDirectory;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {var}: {value:?} ({reason})")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

/// Process settings, read once at startup from `PARKGATE_*` variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub port: u16,
    pub bind: String,
    pub data_dir: PathBuf,
    pub max_connections: usize,
    /// Journal appends after which the compactor rewrites the journal.
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
    pub booking_window_days: i64,
    pub holiday_country: String,
    /// When set, holidays come from api-ninjas; otherwise from `holidays`.
    pub holiday_api_key: Option<String>,
    pub holiday_timeout: Duration,
    pub holidays: FixedHolidays,
    pub allowed_email_domain: Option<String>,
    pub coordination_email: Option<String>,
    /// Overrides the default spot list; ids follow list order.
    pub spots: Option<Vec<String>>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 5480,
            bind: "0.0.0.0".to_string(),
            data_dir: PathBuf::from("./data"),
            max_connections: 256,
            compact_threshold: 1000,
            metrics_port: None,
            booking_window_days: DEFAULT_BOOKING_WINDOW_DAYS,
            holiday_country: "CL".to_string(),
            holiday_api_key: None,
            holiday_timeout: Duration::from_secs(5),
            holidays: FixedHolidays::default(),
            allowed_email_domain: None,
            coordination_email: None,
            spots: None,
        }
    }
}

struct Vars<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> Vars<F> {
    /// Trimmed value; blank counts as unset.
    fn get(&self, var: &str) -> Option<String> {
        (self.lookup)(var)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn parse<T>(&self, var: &'static str) -> Result<Option<T>, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        self.get(var)
            .map(|raw| {
                raw.parse::<T>().map_err(|e| ConfigError::Invalid {
                    var,
                    value: raw.clone(),
                    reason: e.to_string(),
                })
            })
            .transpose()
    }
}

fn invalid(var: &'static str, value: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        var,
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    pub fn from_lookup<F: Fn(&str) -> Option<String>>(lookup: F) -> Result<Self, ConfigError> {
        let vars = Vars { lookup };
        let defaults = Config::default();

        let max_connections = vars.parse("PARKGATE_MAX_CONNECTIONS")?.unwrap_or(defaults.max_connections);
        if max_connections == 0 {
            return Err(invalid("PARKGATE_MAX_CONNECTIONS", "0", "must be at least 1"));
        }
        let booking_window_days = vars
            .parse("PARKGATE_BOOKING_WINDOW_DAYS")?
            .unwrap_or(defaults.booking_window_days);
        if !(0..=366).contains(&booking_window_days) {
            return Err(invalid(
                "PARKGATE_BOOKING_WINDOW_DAYS",
                &booking_window_days.to_string(),
                "must be between 0 and 366",
            ));
        }

        let holidays = match vars.get("PARKGATE_HOLIDAYS") {
            None => FixedHolidays::default(),
            Some(raw) => {
                FixedHolidays::parse_list(&raw).map_err(|e| invalid("PARKGATE_HOLIDAYS", &raw, &e.to_string()))?
            }
        };

        let spots = match vars.get("PARKGATE_SPOTS") {
            None => None,
            Some(raw) => {
                let names: Vec<String> = raw
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect();
                if names.is_empty() {
                    return Err(invalid("PARKGATE_SPOTS", &raw, "no spot names"));
                }
                Some(names)
            }
        };

        let holiday_country = vars
            .get("PARKGATE_HOLIDAY_COUNTRY")
            .unwrap_or(defaults.holiday_country)
            .to_ascii_uppercase();
        if holiday_country.len() != 2 || !holiday_country.bytes().all(|b| b.is_ascii_alphabetic()) {
            return Err(invalid(
                "PARKGATE_HOLIDAY_COUNTRY",
                &holiday_country,
                "expected a two-letter country code",
            ));
        }

        Ok(Self {
            port: vars.parse("PARKGATE_PORT")?.unwrap_or(defaults.port),
            bind: vars.get("PARKGATE_BIND").unwrap_or(defaults.bind),
            data_dir: vars.get("PARKGATE_DATA_DIR").map(PathBuf::from).unwrap_or(defaults.data_dir),
            max_connections,
            compact_threshold: vars
                .parse("PARKGATE_COMPACT_THRESHOLD")?
                .unwrap_or(defaults.compact_threshold),
            metrics_port: vars.parse("PARKGATE_METRICS_PORT")?,
            booking_window_days,
            holiday_country,
            holiday_api_key: vars.get("PARKGATE_HOLIDAY_API_KEY"),
            holiday_timeout: vars
                .parse::<u64>("PARKGATE_HOLIDAY_TIMEOUT_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.holiday_timeout),
            holidays,
            allowed_email_domain: vars
                .get("PARKGATE_ALLOWED_EMAIL_DOMAIN")
                .map(|d| d.trim_start_matches('@').to_ascii_lowercase()),
            coordination_email: vars.get("PARKGATE_COORDINATION_EMAIL"),
            spots,
        })
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    pub fn journal_path(&self) -> PathBuf {
        self.data_dir.join("reservations.wal")
    }

    pub fn spot_directory(&self) -> SpotDirectory {
        match &self.spots {
            Some(names) => SpotDirectory::from_names(names.iter().cloned()),
            None => SpotDirectory::default(),
        }
    }

    pub fn rule_policy(&self) -> RulePolicy {
        RulePolicy {
            booking_window_days: self.booking_window_days,
            allowed_email_domain: self.allowed_email_domain.clone(),
            holiday_country: self.holiday_country.clone(),
        }
    }
}

//! Server configuration loaded from `ZEROMONOS_*` environment variables.

use std::env;
use std::error::Error as StdError;
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{Context, Result};
use chrono::{NaiveTime, ParseError};
use chrono_tz::Tz;
use zeromonos_catalog_geoapi::CatalogEndpoints;
use zeromonos_core::ScheduleConfig;

const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 8080;

/// Runtime configuration of the server.
#[derive(Debug, Clone)]
pub(crate) struct Config {
    /// Interface to bind.
    pub(crate) host: String,
    /// Port to bind.
    pub(crate) port: u16,
    /// Snapshot file; bookings live only in memory when unset.
    pub(crate) data_file: Option<PathBuf>,
    /// Slot grid and daily capacity.
    pub(crate) schedule: ScheduleConfig,
    /// Location catalog endpoints.
    pub(crate) catalog: CatalogEndpoints,
}

impl Config {
    /// `host:port` the listener binds to.
    pub(crate) fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Load from the process environment.
    pub(crate) fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load from an arbitrary variable source. Unset or blank variables use defaults.
    pub(crate) fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| {
            lookup(key)
                .map(|raw| raw.trim().to_owned())
                .filter(|raw| !raw.is_empty())
        };
        let defaults = ScheduleConfig::default();
        let endpoints = CatalogEndpoints::default();

        let schedule = ScheduleConfig {
            opening: parse_or(&var, "ZEROMONOS_OPENING_TIME", defaults.opening, parse_time)?,
            closing: parse_or(&var, "ZEROMONOS_CLOSING_TIME", defaults.closing, parse_time)?,
            slot_minutes: parse_or(
                &var,
                "ZEROMONOS_SLOT_MINUTES",
                defaults.slot_minutes,
                u32::from_str,
            )?,
            // "unlimited" turns the per-day cap off
            daily_capacity: match var("ZEROMONOS_DAILY_CAPACITY") {
                Some(raw) if raw.eq_ignore_ascii_case("unlimited") => None,
                _ => parse_or(
                    &var,
                    "ZEROMONOS_DAILY_CAPACITY",
                    defaults.daily_capacity,
                    |raw| usize::from_str(raw).map(Some),
                )?,
            },
            operating_days: defaults.operating_days,
            timezone: match var("ZEROMONOS_TIMEZONE") {
                None => defaults.timezone,
                Some(raw) => raw
                    .parse::<Tz>()
                    .ok()
                    .with_context(|| format!("ZEROMONOS_TIMEZONE: unknown zone {raw:?}"))?,
            },
        };
        schedule.validate().context("invalid collection schedule")?;

        Ok(Self {
            host: var("ZEROMONOS_HOST").unwrap_or_else(|| DEFAULT_HOST.to_owned()),
            port: parse_or(&var, "ZEROMONOS_PORT", DEFAULT_PORT, u16::from_str)?,
            data_file: var("ZEROMONOS_DATA_FILE").map(PathBuf::from),
            schedule,
            catalog: CatalogEndpoints {
                districts: var("ZEROMONOS_DISTRICTS_URL").unwrap_or(endpoints.districts),
                municipalities: var("ZEROMONOS_MUNICIPALITIES_URL")
                    .unwrap_or(endpoints.municipalities),
                villages: var("ZEROMONOS_VILLAGES_URL").unwrap_or(endpoints.villages),
            },
        })
    }
}

fn parse_or<T, E, V, P>(var: &V, key: &str, default: T, parse: P) -> Result<T>
where
    V: Fn(&str) -> Option<String>,
    P: Fn(&str) -> Result<T, E>,
    E: StdError + Send + Sync + 'static,
{
    match var(key) {
        None => Ok(default),
        Some(raw) => parse(&raw).with_context(|| format!("{key}: invalid value {raw:?}")),
    }
}

fn parse_time(raw: &str) -> Result<NaiveTime, ParseError> {
    NaiveTime::parse_from_str(raw, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M:%S"))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn load(vars: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(key, value)| ((*key).to_owned(), (*value).to_owned()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn empty_environment_uses_defaults() {
        let config = load(&[]).expect("defaults are valid");

        assert_eq!(config.bind_addr(), "127.0.0.1:8080");
        assert_eq!(config.data_file, None);
        assert_eq!(config.schedule, ScheduleConfig::default());
        assert_eq!(config.schedule.timezone, Tz::Europe__Lisbon);
        assert_eq!(config.catalog, CatalogEndpoints::default());
    }

    #[test]
    fn variables_override_defaults() {
        let config = load(&[
            ("ZEROMONOS_PORT", "9000"),
            ("ZEROMONOS_DATA_FILE", "/var/lib/zeromonos/bookings.json"),
            ("ZEROMONOS_OPENING_TIME", "09:30"),
            ("ZEROMONOS_CLOSING_TIME", "12:00:00"),
            ("ZEROMONOS_SLOT_MINUTES", "30"),
            ("ZEROMONOS_DAILY_CAPACITY", "unlimited"),
            ("ZEROMONOS_TIMEZONE", "Atlantic/Azores"),
            ("ZEROMONOS_VILLAGES_URL", "http://localhost:9999/municipio"),
        ])
        .expect("valid overrides");

        assert_eq!(config.port, 9000);
        assert_eq!(
            config.data_file,
            Some(PathBuf::from("/var/lib/zeromonos/bookings.json"))
        );
        assert_eq!(config.schedule.candidate_slots().len(), 5);
        assert_eq!(config.schedule.daily_capacity, None);
        assert_eq!(config.schedule.timezone, Tz::Atlantic__Azores);
        assert_eq!(config.catalog.villages, "http://localhost:9999/municipio");
    }

    #[test]
    fn malformed_values_are_startup_errors() {
        for vars in [
            [("ZEROMONOS_PORT", "eighty")],
            [("ZEROMONOS_OPENING_TIME", "9am")],
            [("ZEROMONOS_DAILY_CAPACITY", "-1")],
            [("ZEROMONOS_SLOT_MINUTES", "0")],
            [("ZEROMONOS_TIMEZONE", "Europe/Porto")],
        ] {
            assert!(load(&vars).is_err(), "{vars:?} must be rejected");
        }
    }
}

//! Environment configuration for the admin daemon.

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use innkeeper_event_store::AuditStoreConfig;
use innkeeper_event_store::partition::PartitionInterval;
use innkeeper_event_store::scheduler::SchedulerConfig;
use innkeeper_event_store::snapshot::SnapshotPolicy;

use crate::error::AppError;

/// Everything the daemon reads from its environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// PostgreSQL connection string.
    pub database_url: String,
    /// Bind host.
    pub host: String,
    /// Bind port.
    pub port: u16,
    /// Audit store tuning.
    pub store: AuditStoreConfig,
    /// Background task periods.
    pub scheduler: SchedulerConfig,
}

impl Settings {
    /// Reads settings from the process environment.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if `DATABASE_URL` is unset or any value
    /// fails to parse.
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Reads settings through `lookup`, which returns a variable's value if
    /// it is set.
    ///
    /// `INNKEEPER_SNAPSHOT_EVERY=0` disables snapshots,
    /// `INNKEEPER_RETIRE_AFTER_MONTHS=0` disables retirement and a zero
    /// `*_INTERVAL_SECS` disables that background task.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if `DATABASE_URL` is unset or any value
    /// fails to parse.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, AppError> {
        let database_url = lookup("DATABASE_URL").ok_or_else(|| {
            AppError::Config("DATABASE_URL environment variable must be set".to_owned())
        })?;
        let host = lookup("HOST").unwrap_or_else(|| "0.0.0.0".to_owned());
        let port = parse_or(&lookup, "PORT", 3000_u16)?;

        let defaults = AuditStoreConfig::default();
        let months = parse_or(
            &lookup,
            "INNKEEPER_PARTITION_MONTHS",
            defaults.partition_interval.as_months(),
        )?;
        let partition_interval = PartitionInterval::months(months).ok_or_else(|| {
            AppError::Config("INNKEEPER_PARTITION_MONTHS must be at least 1".to_owned())
        })?;
        let lookahead_months =
            parse_or(&lookup, "INNKEEPER_LOOKAHEAD_MONTHS", defaults.lookahead_months)?;
        let snapshot_policy = match parse_or(&lookup, "INNKEEPER_SNAPSHOT_EVERY", 100_u64)? {
            0 => SnapshotPolicy::Never,
            events => SnapshotPolicy::EveryEvents(events),
        };

        let periods = SchedulerConfig::default();
        let retire_after_months = match lookup("INNKEEPER_RETIRE_AFTER_MONTHS") {
            None => periods.retire_after_months,
            Some(raw) => match parse::<u32>("INNKEEPER_RETIRE_AFTER_MONTHS", &raw)? {
                0 => None,
                months => Some(months),
            },
        };
        let scheduler = SchedulerConfig {
            precreate_every: secs_or(
                &lookup,
                "INNKEEPER_PRECREATE_INTERVAL_SECS",
                periods.precreate_every,
            )?,
            snapshot_every: secs_or(
                &lookup,
                "INNKEEPER_SNAPSHOT_INTERVAL_SECS",
                periods.snapshot_every,
            )?,
            sweep_every: secs_or(&lookup, "INNKEEPER_SWEEP_INTERVAL_SECS", periods.sweep_every)?,
            retire_after_months,
        };

        Ok(Self {
            database_url,
            host,
            port,
            store: AuditStoreConfig {
                partition_interval,
                lookahead_months,
                snapshot_policy,
            },
            scheduler,
        })
    }

    /// The socket address to bind.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if `HOST:PORT` is not a socket address.
    pub fn addr(&self) -> Result<SocketAddr, AppError> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e| AppError::Config(format!("invalid HOST:PORT combination: {e}")))
    }
}

fn parse<T>(name: &str, raw: &str) -> Result<T, AppError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e| AppError::Config(format!("{name} must be a valid number: {e}")))
}

fn parse_or<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
    default: T,
) -> Result<T, AppError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    lookup(name).map_or(Ok(default), |raw| parse(name, &raw))
}

fn secs_or(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
    default: Duration,
) -> Result<Duration, AppError> {
    Ok(Duration::from_secs(parse_or(lookup, name, default.as_secs())?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn settings(vars: &[(&str, &str)]) -> Result<Settings, AppError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        Settings::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn test_defaults_apply_when_only_database_url_is_set() {
        // Act
        let settings = settings(&[("DATABASE_URL", "postgres://localhost/innkeeper")]).unwrap();

        // Assert
        assert_eq!(settings.port, 3000);
        assert_eq!(settings.store, AuditStoreConfig::default());
        assert_eq!(settings.scheduler, SchedulerConfig::default());
        assert_eq!(settings.addr().unwrap().to_string(), "0.0.0.0:3000");
    }

    #[test]
    fn test_missing_database_url_is_config_error() {
        assert!(matches!(settings(&[]), Err(AppError::Config(_))));
    }

    #[test]
    fn test_overrides_are_parsed() {
        // Act
        let settings = settings(&[
            ("DATABASE_URL", "postgres://localhost/innkeeper"),
            ("PORT", "8081"),
            ("INNKEEPER_PARTITION_MONTHS", "3"),
            ("INNKEEPER_LOOKAHEAD_MONTHS", "6"),
            ("INNKEEPER_SNAPSHOT_EVERY", "0"),
            ("INNKEEPER_RETIRE_AFTER_MONTHS", "0"),
            ("INNKEEPER_SWEEP_INTERVAL_SECS", "0"),
        ])
        .unwrap();

        // Assert
        assert_eq!(settings.port, 8081);
        assert_eq!(settings.store.partition_interval, PartitionInterval::QUARTERLY);
        assert_eq!(settings.store.lookahead_months, 6);
        assert_eq!(settings.store.snapshot_policy, SnapshotPolicy::Never);
        assert_eq!(settings.scheduler.retire_after_months, None);
        assert!(settings.scheduler.sweep_every.is_zero());
    }

    #[test]
    fn test_invalid_values_are_config_errors() {
        let url = ("DATABASE_URL", "postgres://localhost/innkeeper");

        assert!(matches!(
            settings(&[url, ("PORT", "eighty")]),
            Err(AppError::Config(_))
        ));
        assert!(matches!(
            settings(&[url, ("INNKEEPER_PARTITION_MONTHS", "0")]),
            Err(AppError::Config(_))
        ));
        assert!(matches!(
            settings(&[url, ("INNKEEPER_SNAPSHOT_EVERY", "-1")]),
            Err(AppError::Config(_))
        ));
    }
}

use anyhow::{anyhow, Context};
use chrono_tz::Tz;
use std::time::Duration;
use url::Url;

/// Process configuration, read once from the environment at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub host: String,
    pub port: u16,
    pub admin_token: String,
    pub studio_timezone: Tz,
    pub stylist_api_url: Option<Url>,
    pub stylist_api_key: Option<String>,
    pub storage_upload_url: Option<Url>,
    pub storage_token: Option<String>,
    pub session_ttl: Duration,
    pub webapp_url: Option<String>,
}

/// IANA zone the studio's wall clock follows, DST included.
const DEFAULT_TIMEZONE: Tz = chrono_tz::Asia::Jerusalem;
const DEFAULT_SESSION_TTL_MINUTES: u64 = 60;

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`Config::from_env`] with an injectable variable source.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let var = |key: &str| get(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let admin_token = var("ADMIN_TOKEN").context("ADMIN_TOKEN must be set")?;

        let port = match var("PORT") {
            Some(raw) => raw.parse().with_context(|| format!("PORT must be a number, got {:?}", raw))?,
            None => 3000,
        };

        let studio_timezone = match var("STUDIO_TIMEZONE") {
            Some(raw) => raw.parse::<Tz>().map_err(|_| {
                anyhow!("STUDIO_TIMEZONE must be an IANA zone like Asia/Jerusalem, got {:?}", raw)
            })?,
            None => DEFAULT_TIMEZONE,
        };

        let ttl_minutes: u64 = match var("SESSION_TTL_MINUTES") {
            Some(raw) => raw
                .parse()
                .with_context(|| format!("SESSION_TTL_MINUTES must be a number, got {:?}", raw))?,
            None => DEFAULT_SESSION_TTL_MINUTES,
        };
        let session_ttl = ttl_minutes
            .checked_mul(60)
            .map(Duration::from_secs)
            .with_context(|| format!("SESSION_TTL_MINUTES out of range: {}", ttl_minutes))?;

        let parse_url = |key: &str| -> anyhow::Result<Option<Url>> {
            var(key)
                .map(|raw| Url::parse(&raw).with_context(|| format!("{} must be a valid URL", key)))
                .transpose()
        };

        Ok(Self {
            database_url: var("DATABASE_URL").unwrap_or_else(|| "sqlite:studio.db?mode=rwc".into()),
            host: var("HOST").unwrap_or_else(|| "0.0.0.0".into()),
            port,
            admin_token,
            studio_timezone,
            stylist_api_url: parse_url("STYLIST_API_URL")?,
            stylist_api_key: var("STYLIST_API_KEY"),
            storage_upload_url: parse_url("STORAGE_UPLOAD_URL")?,
            storage_token: var("STORAGE_TOKEN"),
            session_ttl,
            webapp_url: var("WEBAPP_URL"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> anyhow::Result<Config> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let cfg = config(&[("ADMIN_TOKEN", "secret")]).unwrap();
        assert_eq!(cfg.database_url, "sqlite:studio.db?mode=rwc");
        assert_eq!(cfg.port, 3000);
        assert_eq!(cfg.studio_timezone, chrono_tz::Asia::Jerusalem);
        assert_eq!(cfg.session_ttl, Duration::from_secs(3600));
        assert!(cfg.stylist_api_url.is_none());
        assert!(cfg.webapp_url.is_none());
    }

    #[test]
    fn test_admin_token_required() {
        assert!(config(&[]).is_err());
        assert!(config(&[("ADMIN_TOKEN", "  ")]).is_err());
    }

    #[test]
    fn test_bad_values_rejected() {
        assert!(config(&[("ADMIN_TOKEN", "s"), ("PORT", "http")]).is_err());
        assert!(config(&[("ADMIN_TOKEN", "s"), ("STUDIO_TIMEZONE", "UTC+2")]).is_err());
        assert!(config(&[("ADMIN_TOKEN", "s"), ("SESSION_TTL_MINUTES", "-5")]).is_err());
        assert!(config(&[("ADMIN_TOKEN", "s"), ("STYLIST_API_URL", "not a url")]).is_err());
    }

    #[test]
    fn test_overrides() {
        let cfg = config(&[
            ("ADMIN_TOKEN", "s"),
            ("STUDIO_TIMEZONE", "Europe/Berlin"),
            ("STYLIST_API_URL", "https://stylist.example.com/analyze"),
            ("SESSION_TTL_MINUTES", "15"),
        ])
        .unwrap();
        assert_eq!(cfg.studio_timezone, chrono_tz::Europe::Berlin);
        assert_eq!(cfg.stylist_api_url.unwrap().host_str(), Some("stylist.example.com"));
        assert_eq!(cfg.session_ttl, Duration::from_secs(900));
    }

    #[test]
    fn test_huge_session_ttl_is_an_error_not_an_overflow() {
        let huge = u64::MAX.to_string();
        let err = config(&[("ADMIN_TOKEN", "s"), ("SESSION_TTL_MINUTES", huge.as_str())]).unwrap_err();
        assert!(err.to_string().contains("SESSION_TTL_MINUTES out of range"));
    }
}

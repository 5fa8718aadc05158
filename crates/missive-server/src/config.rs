use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, bail};

use missive_guard::AdmissionConfig;
use missive_types::models::Role;

/// Secrets that ship in docs and sample `.env` files. Refused at startup.
const PLACEHOLDER_SECRETS: &[&str] = &["dev-secret-change-me", "change-me", "changeme", "secret"];

#[derive(Debug, Clone)]
pub struct Config {
    pub jwt_secret: String,
    pub db_path: PathBuf,
    pub addr: SocketAddr,
    pub admission: AdmissionConfig,
    pub trust_proxy: bool,
    pub default_role: Role,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. Unset keys fall back to defaults; set but
    /// malformed keys are an error.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let jwt_secret = lookup("MISSIVE_JWT_SECRET").context("MISSIVE_JWT_SECRET must be set")?;
        if jwt_secret.trim().is_empty() || PLACEHOLDER_SECRETS.contains(&jwt_secret.as_str()) {
            bail!("MISSIVE_JWT_SECRET is empty or a placeholder; set a real secret");
        }

        let db_path = PathBuf::from(lookup("MISSIVE_DB_PATH").unwrap_or_else(|| "missive.db".into()));
        let host = lookup("MISSIVE_HOST").unwrap_or_else(|| "0.0.0.0".into());
        let port: u16 = parse_or(&lookup, "MISSIVE_PORT", 3000)?;
        let addr: SocketAddr = format!("{}:{}", host, port)
            .parse()
            .with_context(|| format!("invalid listen address {}:{}", host, port))?;

        let defaults = AdmissionConfig::default();
        let open_hours = if parse_or(&lookup, "MISSIVE_ENFORCE_HOURS", true)? {
            let (open, close) = defaults.open_hours.unwrap_or((18, 21));
            Some((
                parse_or(&lookup, "MISSIVE_OPEN_HOUR", open)?,
                parse_or(&lookup, "MISSIVE_CLOSE_HOUR", close)?,
            ))
        } else {
            None
        };

        let allowed_roles = match lookup("MISSIVE_ALLOWED_ROLES") {
            Some(raw) => raw
                .split(',')
                .filter(|s| !s.trim().is_empty())
                .map(|s| s.parse::<Role>())
                .collect::<Result<Vec<_>, _>>()
                .context("MISSIVE_ALLOWED_ROLES")?,
            None => defaults.allowed_roles,
        };

        let admission = AdmissionConfig {
            open_hours,
            allowed_roles,
            max_writes: parse_or(&lookup, "MISSIVE_RATE_LIMIT_MAX", defaults.max_writes)?,
            window: Duration::from_secs(parse_or(
                &lookup,
                "MISSIVE_RATE_LIMIT_WINDOW_SECS",
                defaults.window.as_secs(),
            )?),
        };

        Ok(Self {
            jwt_secret,
            db_path,
            addr,
            admission,
            trust_proxy: parse_or(&lookup, "MISSIVE_TRUST_PROXY", false)?,
            default_role: parse_or(&lookup, "MISSIVE_DEFAULT_ROLE", Role::Member)?,
        })
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> anyhow::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("{} has invalid value {:?}: {}", key, raw, e)),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config(pairs: &[(&str, &str)]) -> anyhow::Result<Config> {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn defaults_apply() {
        let config = config(&[("MISSIVE_JWT_SECRET", "s3cr3t-for-tests")]).unwrap();
        assert_eq!(config.db_path, PathBuf::from("missive.db"));
        assert_eq!(config.addr, "0.0.0.0:3000".parse::<SocketAddr>().unwrap());
        assert_eq!(config.admission.open_hours, Some((18, 21)));
        assert_eq!(config.admission.allowed_roles, vec![Role::Admin, Role::Moderator]);
        assert_eq!(config.admission.max_writes, 5);
        assert_eq!(config.admission.window, Duration::from_secs(60));
        assert!(!config.trust_proxy);
        assert_eq!(config.default_role, Role::Member);
    }

    #[test]
    fn secret_is_required_and_not_a_placeholder() {
        assert!(config(&[]).is_err());
        assert!(config(&[("MISSIVE_JWT_SECRET", "dev-secret-change-me")]).is_err());
        assert!(config(&[("MISSIVE_JWT_SECRET", "  ")]).is_err());
    }

    #[test]
    fn overrides_are_parsed() {
        let config = config(&[
            ("MISSIVE_JWT_SECRET", "s3cr3t-for-tests"),
            ("MISSIVE_PORT", "8080"),
            ("MISSIVE_ENFORCE_HOURS", "false"),
            ("MISSIVE_ALLOWED_ROLES", "Admin, member"),
            ("MISSIVE_RATE_LIMIT_MAX", "10"),
            ("MISSIVE_RATE_LIMIT_WINDOW_SECS", "30"),
            ("MISSIVE_TRUST_PROXY", "true"),
            ("MISSIVE_DEFAULT_ROLE", "moderator"),
        ])
        .unwrap();
        assert_eq!(config.addr.port(), 8080);
        assert_eq!(config.admission.open_hours, None);
        assert_eq!(config.admission.allowed_roles, vec![Role::Admin, Role::Member]);
        assert_eq!(config.admission.max_writes, 10);
        assert_eq!(config.admission.window, Duration::from_secs(30));
        assert!(config.trust_proxy);
        assert_eq!(config.default_role, Role::Moderator);
    }

    #[test]
    fn malformed_values_are_errors() {
        assert!(config(&[("MISSIVE_JWT_SECRET", "s3cr3t"), ("MISSIVE_PORT", "http")]).is_err());
        assert!(config(&[("MISSIVE_JWT_SECRET", "s3cr3t"), ("MISSIVE_ALLOWED_ROLES", "root")]).is_err());
        assert!(config(&[("MISSIVE_JWT_SECRET", "s3cr3t"), ("MISSIVE_OPEN_HOUR", "six")]).is_err());
    }
}

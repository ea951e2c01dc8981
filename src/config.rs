use std::path::PathBuf;
use std::time::Duration;

/// Minimum accepted HS256 secret length.
pub const MIN_JWT_SECRET_LEN: usize = 32;

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),
    #[error("JWT_SECRET must be at least {MIN_JWT_SECRET_LEN} characters long")]
    WeakSecret,
}

/// Runtime settings collected from the environment.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub bind_addr: String,
    pub jwt_secret: String,
    pub media_dir: PathBuf,
    pub page_cache_ttl: Duration,
    pub database_url: Option<String>,
    pub data_dir: Option<PathBuf>,
    pub bootstrap_admins: Vec<String>,
    pub enable_hsts: bool,
    pub secure_cookies: bool,
}

fn flag(v: &str) -> bool {
    v == "1" || v.eq_ignore_ascii_case("true")
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the config from an arbitrary variable source (tests pass a map).
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let jwt_secret = get("JWT_SECRET").ok_or(ConfigError::Missing("JWT_SECRET"))?;
        if jwt_secret.len() < MIN_JWT_SECRET_LEN {
            return Err(ConfigError::WeakSecret);
        }
        let ttl = get("PAGE_CACHE_TTL_SECS").and_then(|v| v.parse().ok()).unwrap_or(20);
        Ok(Self {
            bind_addr: get("BIND_ADDR").unwrap_or_else(|| "0.0.0.0:8080".to_string()),
            jwt_secret,
            media_dir: get("MEDIA_DIR").map(PathBuf::from).unwrap_or_else(|| PathBuf::from("media")),
            page_cache_ttl: Duration::from_secs(ttl),
            database_url: get("DATABASE_URL"),
            data_dir: get("DATA_DIR").map(PathBuf::from),
            bootstrap_admins: get("BOOTSTRAP_ADMIN_USERNAMES")
                .unwrap_or_default()
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
            enable_hsts: get("ENABLE_HSTS").is_some_and(|v| flag(&v)),
            secure_cookies: get("SESSION_COOKIE_SECURE").is_some_and(|v| flag(&v)),
        })
    }

    pub fn is_bootstrap_admin(&self, username: &str) -> bool {
        self.bootstrap_admins.iter().any(|u| u == username)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn defaults_applied() {
        let cfg = AppConfig::from_lookup(lookup(&[("JWT_SECRET", "0123456789abcdef0123456789abcdef")])).unwrap();
        assert_eq!(cfg.bind_addr, "0.0.0.0:8080");
        assert_eq!(cfg.page_cache_ttl, Duration::from_secs(20));
        assert_eq!(cfg.media_dir, PathBuf::from("media"));
        assert!(!cfg.enable_hsts);
        assert!(cfg.bootstrap_admins.is_empty());
    }

    #[test]
    fn secret_is_required_and_long() {
        assert_eq!(AppConfig::from_lookup(lookup(&[])).unwrap_err(), ConfigError::Missing("JWT_SECRET"));
        assert_eq!(AppConfig::from_lookup(lookup(&[("JWT_SECRET", "short")])).unwrap_err(), ConfigError::WeakSecret);
    }

    #[test]
    fn admin_list_is_trimmed() {
        let cfg = AppConfig::from_lookup(lookup(&[
            ("JWT_SECRET", "0123456789abcdef0123456789abcdef"),
            ("BOOTSTRAP_ADMIN_USERNAMES", " root, ,ops "),
            ("ENABLE_HSTS", "TRUE"),
        ]))
        .unwrap();
        assert!(cfg.is_bootstrap_admin("root"));
        assert!(cfg.is_bootstrap_admin("ops"));
        assert!(!cfg.is_bootstrap_admin(""));
        assert!(cfg.enable_hsts);
    }
}

use anyhow::{anyhow, Context, Result};
use dotenvy::dotenv;
use std::env;
use std::time::Duration;
use url::Url;

use crate::images::{default_workers, Credentials};
use crate::query::DEFAULT_QUERY_URL;

/// Secrets read once at startup. Never rotated during a process lifetime.
#[derive(Debug, Clone, Default)]
pub struct Secrets {
    pub password_hash: Option<String>,
    pub image_credentials: Option<Credentials>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub query_url: Url,
    pub query_timeout: Duration,
    pub image_timeout: Duration,
    pub image_workers: usize,
    pub user_agent: String,
    pub secrets: Secrets,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv().ok();

        let query_url = env_string("SAGE_DATA_API_URL", Some(DEFAULT_QUERY_URL.to_string()))?;
        let query_url = Url::parse(&query_url).context("invalid SAGE_DATA_API_URL")?;
        if !matches!(query_url.scheme(), "http" | "https") {
            return Err(anyhow!(
                "SAGE_DATA_API_URL must be http(s), got {}",
                query_url.scheme()
            ));
        }

        let query_timeout = Duration::from_secs(env_u64("SAGE_QUERY_TIMEOUT_SECS", Some(60))?);
        let image_timeout = Duration::from_secs(env_u64("SAGE_IMAGE_TIMEOUT_SECS", Some(30))?);
        let image_workers = match env_optional("SAGE_IMAGE_WORKERS") {
            Some(raw) => raw
                .parse::<usize>()
                .context("invalid SAGE_IMAGE_WORKERS")?
                .max(1),
            None => default_workers(),
        };
        let user_agent = env_string(
            "SAGE_USER_AGENT",
            Some(format!("sage-dashboard/{}", env!("CARGO_PKG_VERSION"))),
        )?;

        let secrets = Secrets {
            password_hash: env_optional("SAGE_DASHBOARD_PASSWORD_HASH"),
            image_credentials: match (
                env_optional("SAGE_USERNAME"),
                env_optional("SAGE_USER_TOKEN"),
            ) {
                (Some(username), Some(password)) => Some(Credentials { username, password }),
                (None, None) => None,
                _ => {
                    tracing::warn!(
                        "only one of SAGE_USERNAME / SAGE_USER_TOKEN is set; image requests will be anonymous"
                    );
                    None
                }
            },
        };

        Ok(Self {
            query_url,
            query_timeout,
            image_timeout,
            image_workers,
            user_agent,
            secrets,
        })
    }
}

fn env_string(key: &str, default: Option<String>) -> Result<String> {
    match env::var(key) {
        Ok(value) if !value.trim().is_empty() => Ok(value.trim().to_string()),
        _ => default.ok_or_else(|| anyhow!("missing env var {key}")),
    }
}

fn env_u64(key: &str, default: Option<u64>) -> Result<u64> {
    match env_optional(key) {
        Some(value) => value
            .parse::<u64>()
            .with_context(|| format!("invalid {key}")),
        None => default.ok_or_else(|| anyhow!("missing env var {key}")),
    }
}

fn env_optional(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Tests in this module mutate process env.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    const KEYS: &[&str] = &[
        "SAGE_DATA_API_URL",
        "SAGE_QUERY_TIMEOUT_SECS",
        "SAGE_IMAGE_TIMEOUT_SECS",
        "SAGE_IMAGE_WORKERS",
        "SAGE_USER_AGENT",
        "SAGE_DASHBOARD_PASSWORD_HASH",
        "SAGE_USERNAME",
        "SAGE_USER_TOKEN",
    ];

    fn with_env<T>(vars: &[(&str, &str)], f: impl FnOnce() -> T) -> T {
        let _guard = ENV_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        for key in KEYS {
            env::remove_var(key);
        }
        for (key, value) in vars {
            env::set_var(key, value);
        }
        let out = f();
        for key in KEYS {
            env::remove_var(key);
        }
        out
    }

    #[test]
    fn defaults_point_at_the_public_data_service() {
        let config = with_env(&[], Config::from_env).expect("config");
        assert_eq!(config.query_url.as_str(), DEFAULT_QUERY_URL);
        assert_eq!(config.query_timeout, Duration::from_secs(60));
        assert_eq!(config.image_timeout, Duration::from_secs(30));
        assert!(config.image_workers >= 1);
        assert!(config.user_agent.starts_with("sage-dashboard/"));
        assert!(config.secrets.password_hash.is_none());
        assert!(config.secrets.image_credentials.is_none());
    }

    #[test]
    fn reads_overrides_and_secrets() {
        let config = with_env(
            &[
                ("SAGE_DATA_API_URL", "http://127.0.0.1:8080/api/v1/query"),
                ("SAGE_QUERY_TIMEOUT_SECS", " 5 "),
                ("SAGE_IMAGE_WORKERS", "0"),
                ("SAGE_DASHBOARD_PASSWORD_HASH", "abcd"),
                ("SAGE_USERNAME", "operator"),
                ("SAGE_USER_TOKEN", "token"),
            ],
            Config::from_env,
        )
        .expect("config");

        assert_eq!(config.query_url.port(), Some(8080));
        assert_eq!(config.query_timeout, Duration::from_secs(5));
        assert_eq!(config.image_workers, 1);
        assert_eq!(config.secrets.password_hash.as_deref(), Some("abcd"));
        let creds = config.secrets.image_credentials.expect("credentials");
        assert_eq!(creds.username, "operator");
    }

    #[test]
    fn rejects_bad_values() {
        let err = with_env(&[("SAGE_QUERY_TIMEOUT_SECS", "soon")], Config::from_env).unwrap_err();
        assert!(err.to_string().contains("SAGE_QUERY_TIMEOUT_SECS"));

        let err = with_env(&[("SAGE_DATA_API_URL", "ftp://example.org/q")], Config::from_env)
            .unwrap_err();
        assert!(err.to_string().contains("http(s)"));
    }
}

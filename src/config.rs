use std::env;
use std::time::Duration;
use thiserror::Error;

use crate::bounce::{BounceRegistry, HttpFeedAdapter, OptOutFromCompanies};
use crate::models::DEFAULT_LIST;
use crate::token::{KeyError, SigningKey};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("MAILKICK_SECRET_TOKEN or SECRET_KEY_BASE is required")]
    MissingSecret,
    #[error("invalid signing key: {0}")]
    Key(#[from] KeyError),
    #[error("invalid value for {key}: {message}")]
    Invalid { key: &'static str, message: String },
    #[error("invalid CORS configuration: {0}")]
    Cors(#[from] rocket_cors::Error),
}

fn env_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .ok()
        .map(|value| matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(default)
}

fn env_string(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn env_duration_millis(key: &str, default_millis: u64) -> Duration {
    env::var(key)
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .map(Duration::from_millis)
        .unwrap_or_else(|| Duration::from_millis(default_millis))
}

/// A named bounce feed endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BounceFeed {
    pub name: String,
    pub url: String,
}

/// Runtime configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct MailkickConfig {
    pub signing_key: SigningKey,
    /// Mount the opt-out routes at all.
    pub mount: bool,
    pub mount_path: String,
    /// Public origin used when building links, e.g. `https://mail.example.com`.
    pub base_url: String,
    /// Inject `List-Unsubscribe` headers into outgoing mail.
    pub headers: bool,
    /// Enables the admin API when set.
    pub admin_token: Option<String>,
    pub bounce_feeds: Vec<BounceFeed>,
    pub bounce_feed_token: Option<String>,
    pub bounce_feed_timeout: Duration,
    pub bounce_concurrent: bool,
    /// Companies the stock processor opts imported addresses out of.
    pub bounce_company_ids: Vec<i64>,
    pub bounce_list: String,
}

impl MailkickConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let signing_key = signing_key_from_env()?;
        let mount_path = normalize_mount_path(&env_string("MAILKICK_MOUNT_PATH", "/mailkick"));
        let bounce_feeds = match env_optional("MAILKICK_BOUNCE_FEEDS") {
            Some(value) => parse_feeds(&value)?,
            None => Vec::new(),
        };
        let bounce_company_ids = match env_optional("MAILKICK_BOUNCE_COMPANY_IDS") {
            Some(value) => parse_company_ids(&value)?,
            None => Vec::new(),
        };

        Ok(Self {
            signing_key,
            mount: env_bool("MAILKICK_MOUNT", true),
            mount_path,
            base_url: env_string("MAILKICK_BASE_URL", "http://localhost:8000"),
            headers: env_bool("MAILKICK_HEADERS", false),
            admin_token: env_optional("MAILKICK_ADMIN_TOKEN"),
            bounce_feeds,
            bounce_feed_token: env_optional("MAILKICK_BOUNCE_FEED_TOKEN"),
            bounce_feed_timeout: env_duration_millis("MAILKICK_BOUNCE_FEED_TIMEOUT_MS", 30_000),
            bounce_concurrent: env_bool("MAILKICK_BOUNCE_CONCURRENT", false),
            bounce_company_ids,
            bounce_list: env_string("MAILKICK_BOUNCE_LIST", DEFAULT_LIST),
        })
    }

    /// Configuration with a given key and every optional feature off.
    pub fn with_key(signing_key: SigningKey) -> Self {
        Self {
            signing_key,
            mount: true,
            mount_path: "/mailkick".to_string(),
            base_url: "http://localhost:8000".to_string(),
            headers: false,
            admin_token: None,
            bounce_feeds: Vec::new(),
            bounce_feed_token: None,
            bounce_feed_timeout: Duration::from_secs(30),
            bounce_concurrent: false,
            bounce_company_ids: Vec::new(),
            bounce_list: DEFAULT_LIST.to_string(),
        }
    }

    /// Registry holding one [`HttpFeedAdapter`] per configured feed.
    ///
    /// The stock [`OptOutFromCompanies`] processor is installed only when company
    /// ids are configured; embedders wanting different rules register their own.
    pub fn bounce_registry(&self) -> Result<BounceRegistry, ConfigError> {
        let mut registry = BounceRegistry::new().concurrent(self.bounce_concurrent);

        for feed in &self.bounce_feeds {
            let adapter = HttpFeedAdapter::new(
                feed.name.clone(),
                feed.url.clone(),
                self.bounce_feed_token.clone(),
                self.bounce_feed_timeout,
            )
            .map_err(|err| ConfigError::Invalid {
                key: "MAILKICK_BOUNCE_FEEDS",
                message: err.to_string(),
            })?;
            registry = registry.register(adapter);
        }

        if !self.bounce_company_ids.is_empty() {
            registry = registry.with_processor(OptOutFromCompanies {
                company_ids: self.bounce_company_ids.clone(),
                list: self.bounce_list.clone(),
            });
        }

        Ok(registry)
    }
}

fn signing_key_from_env() -> Result<SigningKey, ConfigError> {
    if let Some(secret) = env_optional("MAILKICK_SECRET_TOKEN") {
        return Ok(SigningKey::from_hex(&secret)?);
    }

    match env_optional("SECRET_KEY_BASE") {
        Some(master) => Ok(SigningKey::derive(&master)?),
        None => Err(ConfigError::MissingSecret),
    }
}

fn normalize_mount_path(path: &str) -> String {
    let trimmed = path.trim().trim_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        format!("/{trimmed}")
    }
}

/// Parse `name=url,name=url`; a bare URL is named after its position.
fn parse_feeds(value: &str) -> Result<Vec<BounceFeed>, ConfigError> {
    value
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .enumerate()
        .map(|(index, entry)| {
            let (name, url) = match entry.split_once('=') {
                Some((name, url)) => (name.trim().to_string(), url.trim().to_string()),
                None => (format!("feed-{}", index + 1), entry.to_string()),
            };

            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(ConfigError::Invalid {
                    key: "MAILKICK_BOUNCE_FEEDS",
                    message: format!("'{url}' is not an http(s) URL"),
                });
            }

            Ok(BounceFeed { name, url })
        })
        .collect()
}

fn parse_company_ids(value: &str) -> Result<Vec<i64>, ConfigError> {
    value
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            entry.parse::<i64>().map_err(|err| ConfigError::Invalid {
                key: "MAILKICK_BOUNCE_COMPANY_IDS",
                message: format!("'{entry}': {err}"),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mount_paths_are_normalized() {
        assert_eq!(normalize_mount_path("mailkick/"), "/mailkick");
        assert_eq!(normalize_mount_path("/email/prefs"), "/email/prefs");
        assert_eq!(normalize_mount_path(""), "/");
    }

    #[test]
    fn parses_named_and_bare_feeds() {
        let feeds =
            parse_feeds("ses=https://relay.example.com/ses, https://relay.example.com/other")
                .expect("valid feeds");

        assert_eq!(
            feeds,
            vec![
                BounceFeed {
                    name: "ses".into(),
                    url: "https://relay.example.com/ses".into(),
                },
                BounceFeed {
                    name: "feed-2".into(),
                    url: "https://relay.example.com/other".into(),
                },
            ]
        );
        assert!(parse_feeds("ses=ftp://nope").is_err());
    }

    #[test]
    fn parses_company_ids() {
        assert_eq!(parse_company_ids("1, 2,3").expect("ids"), vec![1, 2, 3]);
        assert!(parse_company_ids("1,two").is_err());
    }

    #[test]
    fn registry_reflects_configuration() {
        let mut config = MailkickConfig::with_key(SigningKey::random());
        config.bounce_feeds = vec![BounceFeed {
            name: "ses".into(),
            url: "https://relay.example.com/ses".into(),
        }];

        let registry = config.bounce_registry().expect("registry");
        assert_eq!(registry.adapter_names(), vec!["ses"]);
        assert!(!registry.has_processor());

        config.bounce_company_ids = vec![7];
        assert!(config.bounce_registry().expect("registry").has_processor());
    }
}

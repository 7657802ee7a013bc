use std::env;
use std::fmt;
use std::str::FromStr;
use tracing::warn;

/// Whether timing writes are checked against existing bookings before they
/// are persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConflictPolicy {
    /// Conflicts are reported by the check endpoint but never block a write.
    #[default]
    Advisory,
    /// Overlapping writes are rejected.
    Strict,
}

impl FromStr for ConflictPolicy {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "advisory" => Ok(ConflictPolicy::Advisory),
            "strict" => Ok(ConflictPolicy::Strict),
            other => Err(format!("unknown conflict policy: {}", other)),
        }
    }
}

impl fmt::Display for ConflictPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConflictPolicy::Advisory => write!(f, "advisory"),
            ConflictPolicy::Strict => write!(f, "strict"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub supabase_url: String,
    pub supabase_anon_key: String,
    pub supabase_jwt_secret: String,
    pub scheduling_utc_offset_minutes: i32,
    pub conflict_policy: ConflictPolicy,
    pub notification_webhook_url: String,
    pub api_port: u16,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            supabase_url: String::new(),
            supabase_anon_key: String::new(),
            supabase_jwt_secret: String::new(),
            scheduling_utc_offset_minutes: 0,
            conflict_policy: ConflictPolicy::Advisory,
            notification_webhook_url: String::new(),
            api_port: 3000,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        let config = Self {
            supabase_url: env::var("SUPABASE_URL")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_URL not set, using empty value");
                    String::new()
                }),
            supabase_anon_key: env::var("SUPABASE_ANON_PUBLIC_KEY")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_ANON_PUBLIC_KEY not set, using empty value");
                    String::new()
                }),
            supabase_jwt_secret: env::var("SUPABASE_JWT_SECRET")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_JWT_SECRET not set, using empty value");
                    String::new()
                }),
            scheduling_utc_offset_minutes: parse_or_default("SCHEDULING_UTC_OFFSET_MINUTES", 0),
            conflict_policy: parse_or_default("SCHEDULING_CONFLICT_POLICY", ConflictPolicy::Advisory),
            notification_webhook_url: env::var("NOTIFICATION_WEBHOOK_URL")
                .unwrap_or_default(),
            api_port: parse_or_default("API_PORT", 3000),
        };

        if !config.is_configured() {
            warn!("Application not fully configured - missing environment variables");
        }

        if !config.is_notification_configured() {
            warn!("NOTIFICATION_WEBHOOK_URL not set, owner notifications will only be logged");
        }

        config
    }

    pub fn is_configured(&self) -> bool {
        self.missing_settings().is_empty()
    }

    /// Names of the required environment variables that are unset or empty.
    pub fn missing_settings(&self) -> Vec<&'static str> {
        [
            ("SUPABASE_URL", &self.supabase_url),
            ("SUPABASE_ANON_PUBLIC_KEY", &self.supabase_anon_key),
            ("SUPABASE_JWT_SECRET", &self.supabase_jwt_secret),
        ]
        .into_iter()
        .filter(|(_, value)| value.is_empty())
        .map(|(name, _)| name)
        .collect()
    }

    pub fn is_notification_configured(&self) -> bool {
        !self.notification_webhook_url.is_empty()
    }
}

fn parse_or_default<T>(key: &str, default: T) -> T
where
    T: FromStr + fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            warn!("{} has invalid value {:?}, using default {}", key, raw, default);
            default
        }),
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conflict_policy_parsing() {
        assert_eq!("strict".parse::<ConflictPolicy>(), Ok(ConflictPolicy::Strict));
        assert_eq!(" Advisory ".parse::<ConflictPolicy>(), Ok(ConflictPolicy::Advisory));
        assert!("sometimes".parse::<ConflictPolicy>().is_err());
    }

    #[test]
    fn test_default_config_is_not_configured() {
        let config = AppConfig::default();
        assert!(!config.is_configured());
        assert!(!config.is_notification_configured());
        assert_eq!(config.conflict_policy, ConflictPolicy::Advisory);
        assert_eq!(config.api_port, 3000);
    }

    #[test]
    fn test_missing_settings_names_each_gap() {
        let mut config = AppConfig::default();
        assert_eq!(
            config.missing_settings(),
            vec!["SUPABASE_URL", "SUPABASE_ANON_PUBLIC_KEY", "SUPABASE_JWT_SECRET"]
        );

        config.supabase_url = "http://localhost:54321".to_string();
        config.supabase_anon_key = "anon".to_string();
        assert_eq!(config.missing_settings(), vec!["SUPABASE_JWT_SECRET"]);
        assert!(!config.is_configured());

        config.supabase_jwt_secret = "secret".to_string();
        assert!(config.missing_settings().is_empty());
        assert!(config.is_configured());
    }
}

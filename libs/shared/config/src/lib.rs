use std::env;
use std::path::PathBuf;
use tracing::warn;

pub const DEFAULT_PAGE_SIZE: u64 = 10;
pub const DEFAULT_MAX_PAGE_SIZE: u64 = 100;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server_port: u16,
    pub data_dir: Option<PathBuf>,
    pub jwt_secret: String,
    pub calendar_service_url: String,
    pub calendar_api_token: String,
    pub notification_webhook_url: String,
    pub default_page_size: u64,
    pub max_page_size: u64,
    pub reminder_interval_seconds: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server_port: 3000,
            data_dir: None,
            jwt_secret: String::new(),
            calendar_service_url: String::new(),
            calendar_api_token: String::new(),
            notification_webhook_url: String::new(),
            default_page_size: DEFAULT_PAGE_SIZE,
            max_page_size: DEFAULT_MAX_PAGE_SIZE,
            reminder_interval_seconds: 300,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let config = Self {
            server_port: parse_or_default("SERVER_PORT", defaults.server_port),
            data_dir: env::var("DATA_DIR")
                .ok()
                .filter(|dir| !dir.trim().is_empty())
                .map(PathBuf::from)
                .or_else(|| {
                    warn!("DATA_DIR not set, appointment data will only be kept in memory");
                    None
                }),
            jwt_secret: env::var("JWT_SECRET")
                .unwrap_or_else(|_| {
                    warn!("JWT_SECRET not set, using empty value");
                    String::new()
                }),
            calendar_service_url: env::var("CALENDAR_SERVICE_URL")
                .unwrap_or_else(|_| {
                    warn!("CALENDAR_SERVICE_URL not set, meeting links will not be created");
                    String::new()
                }),
            calendar_api_token: env::var("CALENDAR_API_TOKEN")
                .unwrap_or_else(|_| {
                    warn!("CALENDAR_API_TOKEN not set, using empty value");
                    String::new()
                }),
            notification_webhook_url: env::var("NOTIFICATION_WEBHOOK_URL")
                .unwrap_or_else(|_| {
                    warn!("NOTIFICATION_WEBHOOK_URL not set, notifications are stored only");
                    String::new()
                }),
            default_page_size: parse_or_default("DEFAULT_PAGE_SIZE", defaults.default_page_size),
            max_page_size: parse_or_default("MAX_PAGE_SIZE", defaults.max_page_size),
            reminder_interval_seconds: parse_or_default(
                "REMINDER_INTERVAL_SECONDS",
                defaults.reminder_interval_seconds,
            ),
        };

        if !config.is_configured() {
            warn!("Application not fully configured - missing environment variables");
        }

        config
    }

    pub fn is_configured(&self) -> bool {
        !self.jwt_secret.is_empty()
    }

    pub fn is_calendar_configured(&self) -> bool {
        !self.calendar_service_url.is_empty() && !self.calendar_api_token.is_empty()
    }

    pub fn is_notification_webhook_configured(&self) -> bool {
        !self.notification_webhook_url.is_empty()
    }
}

fn parse_or_default<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr + std::fmt::Display + Copy,
{
    match env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!("{} has invalid value '{}', using default {}", key, raw, default);
            default
        }),
        Err(_) => default,
    }
}

use crate::shared::models::ResponderRole;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database_url: String,
    pub telegram: TelegramConfig,
    pub email: EmailConfig,
    pub support: SupportConfig,
    pub rate_limit: RateLimitConfig,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Clone, Debug)]
pub struct TelegramConfig {
    pub bot_token: String,
    /// Staff workspace: a group with forum topics enabled. Negative id,
    /// as Telegram assigns them for supergroups.
    pub support_group_id: i64,
    /// Optional channel receiving feedback summaries.
    pub feedback_channel_id: Option<i64>,
    /// When set, the webhook is (re)registered with the platform at startup.
    pub webhook_url: Option<String>,
    pub admin_ids: Vec<i64>,
    pub staff_ids: Vec<i64>,
}

impl TelegramConfig {
    pub fn is_admin(&self, user_id: i64) -> bool {
        self.admin_ids.contains(&user_id)
    }

    pub fn is_staff(&self, user_id: i64) -> bool {
        self.staff_ids.contains(&user_id)
    }

    /// Role of a sender inside the staff workspace, None for outsiders.
    pub fn staff_role(&self, user_id: i64) -> Option<ResponderRole> {
        if self.is_admin(user_id) {
            Some(ResponderRole::Admin)
        } else if self.is_staff(user_id) {
            Some(ResponderRole::Staff)
        } else {
            None
        }
    }
}

#[derive(Clone, Debug)]
pub struct EmailConfig {
    pub smtp_server: String,
    pub smtp_port: u16,
    pub username: String,
    pub password: String,
    pub from: String,
    pub support_address: Option<String>,
}

impl EmailConfig {
    pub fn is_configured(&self) -> bool {
        !self.username.is_empty() && !self.password.is_empty() && self.support_address.is_some()
    }
}

#[derive(Clone, Debug)]
pub struct SupportConfig {
    /// Hours a user message may go unanswered before escalation.
    pub urgent_threshold_hours: i64,
    /// Minimum gap between two escalation events for the same ticket.
    pub escalation_cooldown_minutes: i64,
    /// Escalation sweep period.
    pub sweep_interval_secs: u64,
    pub max_message_length: usize,
    pub notification_queue_capacity: usize,
}

impl SupportConfig {
    pub fn urgent_threshold(&self) -> chrono::Duration {
        chrono::Duration::hours(self.urgent_threshold_hours)
    }

    pub fn escalation_cooldown(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.escalation_cooldown_minutes)
    }
}

#[derive(Clone, Debug)]
pub struct RateLimitConfig {
    pub messages_per_hour: u32,
    pub burst: u32,
    pub enabled: bool,
    /// Users rejected outright, before rate limiting.
    pub blocked_user_ids: Vec<i64>,
}

fn env_str(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_id_list(key: &str) -> Vec<i64> {
    std::env::var(key)
        .unwrap_or_default()
        .split(',')
        .filter_map(|part| part.trim().parse().ok())
        .collect()
}

impl AppConfig {
    pub fn from_env() -> Result<Self, anyhow::Error> {
        let bot_token = std::env::var("BOT_TOKEN")
            .map_err(|_| anyhow::anyhow!("BOT_TOKEN is required"))?;
        let support_group_id: i64 = std::env::var("SUPPORT_GROUP_ID")
            .map_err(|_| anyhow::anyhow!("SUPPORT_GROUP_ID is required"))?
            .parse()
            .map_err(|_| anyhow::anyhow!("SUPPORT_GROUP_ID must be a chat id"))?;
        let database_url = std::env::var("DATABASE_URL")
            .map_err(|_| anyhow::anyhow!("DATABASE_URL is required"))?;

        let admin_ids = env_id_list("ADMIN_IDS");
        if admin_ids.is_empty() {
            log::warn!("ADMIN_IDS is empty; admin commands will be unavailable");
        }

        Ok(AppConfig {
            server: ServerConfig {
                host: env_str("SERVER_HOST", "0.0.0.0"),
                port: env_parse("SERVER_PORT", 8080),
            },
            database_url,
            telegram: TelegramConfig {
                bot_token,
                support_group_id,
                feedback_channel_id: std::env::var("FEEDBACK_CHANNEL_ID")
                    .ok()
                    .and_then(|v| v.parse().ok()),
                webhook_url: std::env::var("WEBHOOK_URL").ok().filter(|v| !v.is_empty()),
                admin_ids,
                staff_ids: env_id_list("SUPPORT_STAFF_IDS"),
            },
            email: EmailConfig {
                smtp_server: env_str("SMTP_SERVER", "smtp.gmail.com"),
                smtp_port: env_parse("SMTP_PORT", 587),
                username: env_str("EMAIL_USER", ""),
                password: env_str("EMAIL_PASSWORD", ""),
                from: env_str("EMAIL_FROM", "noreply@festival.example"),
                support_address: std::env::var("SUPPORT_EMAIL").ok().filter(|v| !v.is_empty()),
            },
            support: SupportConfig {
                urgent_threshold_hours: env_parse("URGENT_RESPONSE_HOURS", 2),
                escalation_cooldown_minutes: env_parse("ESCALATION_COOLDOWN_MINUTES", 60),
                sweep_interval_secs: env_parse("ESCALATION_SWEEP_SECONDS", 300),
                max_message_length: env_parse("MAX_MESSAGE_LENGTH", 4000),
                notification_queue_capacity: env_parse("NOTIFICATION_QUEUE_CAPACITY", 256),
            },
            rate_limit: RateLimitConfig {
                messages_per_hour: env_parse("RATE_LIMIT_MESSAGES_PER_HOUR", 20),
                burst: env_parse("RATE_LIMIT_BURST", 5),
                enabled: std::env::var("RATE_LIMIT_ENABLED")
                    .map(|v| v != "false" && v != "0")
                    .unwrap_or(true),
                blocked_user_ids: env_id_list("BLOCKED_USER_IDS"),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn staff_role_resolution() {
        let cfg = TelegramConfig {
            bot_token: String::new(),
            support_group_id: -100,
            feedback_channel_id: None,
            webhook_url: None,
            admin_ids: vec![1],
            staff_ids: vec![2],
        };
        assert_eq!(cfg.staff_role(1), Some(ResponderRole::Admin));
        assert_eq!(cfg.staff_role(2), Some(ResponderRole::Staff));
        assert_eq!(cfg.staff_role(3), None);
    }
}

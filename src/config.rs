use crate::signing::Credentials;

/// A WhatsApp template reference: the provider template id plus its sender name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateRef {
    pub id: String,
    pub src_name: String,
}

#[derive(Debug, Clone)]
pub struct GupshupConfig {
    pub api_url: String,
    pub api_key: Option<String>,
    pub source: Option<String>,
    pub otp_template: Option<TemplateRef>,
    pub lead_creation_template: Option<TemplateRef>,
    pub lead_status_template: Option<TemplateRef>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub basic_api_url: Option<String>,
    pub basic_user_id: Option<String>,
    pub basic_api_key: Option<String>,
    pub agent_user_id: Option<String>,
    pub agent_api_key: Option<String>,
    pub basic_api_timeout_secs: u64,
    pub orbit_database_url: Option<String>,
    pub homfinity_database_url: Option<String>,
    pub gupshup: GupshupConfig,
    pub otp_expiry_minutes: i64,
}

fn optional_var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn optional_database_url(name: &str) -> anyhow::Result<Option<String>> {
    match optional_var(name) {
        None => Ok(None),
        Some(url) => {
            if !url.starts_with("postgresql://") && !url.starts_with("postgres://") {
                anyhow::bail!("{} must start with postgresql:// or postgres://", name);
            }
            Ok(Some(url))
        }
    }
}

fn template(id_var: &str, src_var: &str, default_src: Option<&str>) -> Option<TemplateRef> {
    let id = optional_var(id_var)?;
    let src_name = optional_var(src_var).or_else(|| default_src.map(str::to_string))?;
    Some(TemplateRef { id, src_name })
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self {
            port: std::env::var("PORT")
                .unwrap_or_else(|_| "5000".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("PORT must be a valid number between 1-65535"))?,
            basic_api_url: match optional_var("BASIC_APPLICATION_API_URL") {
                None => None,
                Some(url) => {
                    if !url.starts_with("http://") && !url.starts_with("https://") {
                        anyhow::bail!("BASIC_APPLICATION_API_URL must start with http:// or https://");
                    }
                    Some(url.trim_end_matches('/').to_string())
                }
            },
            basic_user_id: optional_var("BASIC_APPLICATION_USER_ID"),
            basic_api_key: optional_var("BASIC_APPLICATION_API_KEY"),
            agent_user_id: optional_var("BASIC_AGENT_USER_ID"),
            agent_api_key: optional_var("BASIC_AGENT_API_KEY"),
            basic_api_timeout_secs: std::env::var("BASIC_API_TIMEOUT_SECS")
                .unwrap_or_else(|_| "30".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("BASIC_API_TIMEOUT_SECS must be a whole number"))?,
            orbit_database_url: optional_database_url("ORBIT_DATABASE_URL")?,
            homfinity_database_url: optional_database_url("HOMFINITY_DATABASE_URL")?,
            gupshup: GupshupConfig {
                api_url: optional_var("GUPSHUP_API_URL")
                    .unwrap_or_else(|| "https://api.gupshup.io/wa/api/v1/msg".to_string()),
                api_key: optional_var("GUPSHUP_API_KEY"),
                source: optional_var("GUPSHUP_SOURCE"),
                otp_template: template(
                    "GUPSHUP_WHATSAPP_OTP_TEMPLATE_ID",
                    "GUPSHUP_WHATSAPP_OTP_SRC_NAME",
                    Some("HomiAi"),
                ),
                lead_creation_template: template(
                    "GUPSHUP_LEAD_CREATION_TEMPLATE_ID",
                    "GUPSHUP_LEAD_CREATION_SRC_NAME",
                    None,
                ),
                lead_status_template: template(
                    "GUPSHUP_LEAD_STATUS_TEMPLATE_ID",
                    "GUPSHUP_LEAD_STATUS_SRC_NAME",
                    None,
                ),
            },
            otp_expiry_minutes: std::env::var("OTP_EXPIRY_MINUTES")
                .unwrap_or_else(|_| "3".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("OTP_EXPIRY_MINUTES must be a whole number"))
                .and_then(|minutes: i64| {
                    if minutes <= 0 {
                        anyhow::bail!("OTP_EXPIRY_MINUTES must be greater than 0");
                    }
                    Ok(minutes)
                })?,
        };

        // Missing upstream settings only warn here; calls that need them fail with a
        // configuration error.
        tracing::info!("Configuration loaded successfully");
        match config.basic_api_url {
            Some(ref url) => tracing::debug!("Basic Application API URL: {}", url),
            None => tracing::warn!("BASIC_APPLICATION_API_URL is not set; lead calls will fail"),
        }
        if config.standard_credentials().is_none() {
            tracing::warn!("BASIC_APPLICATION_USER_ID/BASIC_APPLICATION_API_KEY are not set");
        }
        if config.agent_credentials().is_some() {
            tracing::info!("Agent credential pair configured");
        }
        for (name, url) in [
            ("orbit", &config.orbit_database_url),
            ("homfinity", &config.homfinity_database_url),
        ] {
            match url {
                Some(url) => tracing::debug!(
                    "{} database URL: {}...",
                    name,
                    url.chars().take(20).collect::<String>()
                ),
                None => tracing::warn!("No database configured for the {} environment", name),
            }
        }
        if config.gupshup.api_key.is_none() {
            tracing::warn!("GUPSHUP_API_KEY is not set; WhatsApp delivery will fail");
        }
        tracing::debug!("Server Port: {}", config.port);

        Ok(config)
    }

    /// The standard user's signing pair, when both halves are configured.
    pub fn standard_credentials(&self) -> Option<Credentials> {
        Credentials::from_parts(self.basic_user_id.as_deref(), self.basic_api_key.as_deref())
    }

    /// The agent user's signing pair, when both halves are configured.
    pub fn agent_credentials(&self) -> Option<Credentials> {
        Credentials::from_parts(self.agent_user_id.as_deref(), self.agent_api_key.as_deref())
    }

    pub fn otp_ttl(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.otp_expiry_minutes)
    }
}

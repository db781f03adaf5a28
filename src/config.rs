use std::env;

use uuid::Uuid;

use crate::{hub::HubSettings, templates::AndroidTemplateFamily};

#[derive(Clone, Debug)]
pub struct Config {
    pub bind_addr: String,
    pub db_path: String,
    pub notification_hubs: Vec<HubSettings>,
    pub enable_send_tracing: bool,
    pub android_template_family: AndroidTemplateFamily,
    pub vapid_public_key: Option<String>,
    pub vapid_private_key: Option<String>,
    pub vapid_subject: String,
    pub allowed_push_hosts: Vec<String>,
    pub push_ttl_seconds: u32,
    pub push_timeout_ms: u64,
    pub max_payload_bytes: usize,
    pub registration_ttl_days: i64,
    pub installation_id: Option<Uuid>,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let bind_addr = env_or("BIND_ADDR", "0.0.0.0:3000");
        let db_path = env_or("DB_PATH", "pushhub.redb");
        let notification_hubs = parse_hubs(&env_or("NOTIFICATION_HUBS", "[]"))?;
        let enable_send_tracing = env_or_parse("ENABLE_SEND_TRACING", false)?;
        let android_template_family = env_or("ANDROID_TEMPLATE_FAMILY", "v1")
            .parse::<AndroidTemplateFamily>()
            .map_err(|err| anyhow::anyhow!(err))?;
        let vapid_public_key = env_opt("VAPID_PUBLIC_KEY");
        let vapid_private_key = env_opt("VAPID_PRIVATE_KEY");
        let vapid_subject = env_or("VAPID_SUBJECT", "mailto:admin@example.com");
        // Host allowlist keeps Web Push sends away from arbitrary endpoints.
        let allowed_push_hosts = parse_list(&env_or(
            "ALLOWED_PUSH_HOSTS",
            "fcm.googleapis.com,updates.push.services.mozilla.com,wns.windows.com,notify.windows.com,web.push.apple.com",
        ));
        let push_ttl_seconds = env_or_parse("PUSH_TTL_SECONDS", 2_419_200)?;
        let push_timeout_ms = env_or_parse("PUSH_TIMEOUT_MS", 5000)?;
        let max_payload_bytes = env_or_parse("MAX_PAYLOAD_BYTES", 4 * 1024)?;
        let registration_ttl_days = env_or_parse("REGISTRATION_TTL_DAYS", 0)?;
        let installation_id = env_opt("INSTALLATION_ID")
            .map(|value| value.parse::<Uuid>())
            .transpose()?;

        // Guardrail checks for nonsensical configuration.
        if vapid_public_key.is_some() != vapid_private_key.is_some() {
            return Err(anyhow::anyhow!(
                "VAPID_PUBLIC_KEY and VAPID_PRIVATE_KEY must be set together"
            ));
        }
        if push_timeout_ms == 0 || push_timeout_ms >= 60_000 {
            return Err(anyhow::anyhow!(
                "PUSH_TIMEOUT_MS must be between 1 and 59999 (hub signatures expire after 60s)"
            ));
        }
        if max_payload_bytes == 0 {
            return Err(anyhow::anyhow!("MAX_PAYLOAD_BYTES must be > 0"));
        }
        if registration_ttl_days < 0 {
            return Err(anyhow::anyhow!("REGISTRATION_TTL_DAYS must be >= 0"));
        }

        Ok(Self {
            bind_addr,
            db_path,
            notification_hubs,
            enable_send_tracing,
            android_template_family,
            vapid_public_key,
            vapid_private_key,
            vapid_subject,
            allowed_push_hosts,
            push_ttl_seconds,
            push_timeout_ms,
            max_payload_bytes,
            registration_ttl_days,
            installation_id,
        })
    }
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn env_or_parse<T>(key: &str, default: T) -> anyhow::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(value) => Ok(value.trim().parse()?),
        Err(_) => Ok(default),
    }
}

/// `NOTIFICATION_HUBS` is a JSON array of hub settings objects.
fn parse_hubs(value: &str) -> anyhow::Result<Vec<HubSettings>> {
    let value = value.trim();
    if value.is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_str(value).map_err(|err| anyhow::anyhow!("NOTIFICATION_HUBS: {err}"))
}

fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|item| item.trim().to_string())
        .filter(|item| !item.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hubs_parse_from_json() {
        let hubs = parse_hubs(
            r#"[{"hubName":"hub-a","connectionString":"Endpoint=sb://a/;SharedAccessKeyName=n;SharedAccessKey=k","enableSendTracing":true,"registrationStartDate":"2024-01-01T00:00:00Z"},{"hubName":"hub-b"}]"#,
        )
        .unwrap();
        assert_eq!(hubs.len(), 2);
        assert_eq!(hubs[0].hub_name, "hub-a");
        assert!(hubs[0].enable_send_tracing);
        assert!(hubs[0].registration_start_date.is_some());
        assert!(hubs[0].registration_end_date.is_none());
        assert!(hubs[1].connection_string.is_empty());
    }

    #[test]
    fn empty_hubs_value_means_none() {
        assert!(parse_hubs("").unwrap().is_empty());
        assert!(parse_hubs("[]").unwrap().is_empty());
        assert!(parse_hubs("{").is_err());
    }

    #[test]
    fn list_trims_and_drops_blanks() {
        assert_eq!(parse_list(" a, ,b ,"), vec!["a".to_string(), "b".to_string()]);
    }
}

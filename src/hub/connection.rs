use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::{Method, RequestBuilder};
use serde::Deserialize;
use tokio::sync::OnceCell;
use url::Url;
use uuid::Uuid;

use crate::{comb::Comb, error::PushError, hub::sas::SasSigner};

pub const API_VERSION: &str = "2015-01";

/// One configured hub, as read from configuration.
#[derive(Deserialize, Clone, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct HubSettings {
    #[serde(default)]
    pub hub_name: String,
    #[serde(default)]
    pub connection_string: String,
    #[serde(default)]
    pub enable_send_tracing: bool,
    #[serde(default)]
    pub registration_start_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub registration_end_date: Option<DateTime<Utc>>,
}

#[derive(Debug)]
struct ConnectionTarget {
    endpoint: Url,
    signer: SasSigner,
}

impl ConnectionTarget {
    fn parse(connection_string: &str) -> Option<Self> {
        let mut endpoint = None;
        let mut key_name = None;
        let mut key = None;

        for part in connection_string.split(';') {
            let Some((name, value)) = part.trim().split_once('=') else {
                continue;
            };
            match name.trim().to_ascii_lowercase().as_str() {
                "endpoint" => endpoint = Some(value.trim()),
                "sharedaccesskeyname" => key_name = Some(value.trim()),
                "sharedaccesskey" => key = Some(value.trim()),
                _ => {}
            }
        }

        let endpoint = endpoint?;
        let endpoint = match endpoint.strip_prefix("sb://") {
            Some(rest) => format!("https://{rest}"),
            None => endpoint.to_string(),
        };
        let endpoint = Url::parse(&endpoint).ok()?;
        let (key_name, key) = (key_name?, key?);
        if key_name.is_empty() || key.is_empty() {
            return None;
        }

        Some(Self {
            endpoint,
            signer: SasSigner::new(key_name, key.as_bytes()),
        })
    }
}

/// A signed request plus the tracking id sent with it.
#[derive(Debug)]
pub struct HubRequest {
    pub builder: RequestBuilder,
    pub tracking_id: String,
}

#[derive(Debug)]
pub struct HubConnection {
    name: String,
    connection_string: String,
    enable_tracing: bool,
    registration_start: Option<DateTime<Utc>>,
    registration_end: Option<DateTime<Utc>>,
    target: Option<ConnectionTarget>,
    timeout: Duration,
    http: OnceCell<reqwest::Client>,
}

impl HubConnection {
    pub fn new(settings: &HubSettings, timeout: Duration) -> Self {
        let connection_string = settings.connection_string.trim().trim_matches('"').to_string();
        Self {
            name: settings.hub_name.trim().to_string(),
            target: ConnectionTarget::parse(&connection_string),
            connection_string,
            enable_tracing: settings.enable_send_tracing,
            registration_start: settings.registration_start_date,
            registration_end: settings.registration_end_date,
            timeout,
            http: OnceCell::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn connection_string(&self) -> &str {
        &self.connection_string
    }

    pub fn enable_tracing(&self) -> bool {
        self.enable_tracing
    }

    pub fn is_valid(&self) -> bool {
        !self.name.is_empty() && !self.connection_string.is_empty() && self.target.is_some()
    }

    /// Open interval `(start, end)`; an unset start disables registration, an
    /// unset end never closes it.
    pub fn registration_enabled_at(&self, at: DateTime<Utc>) -> bool {
        let Some(start) = self.registration_start else {
            return false;
        };
        if self.registration_end.is_some_and(|end| at >= end) {
            return false;
        }
        start < at
    }

    pub fn registration_enabled(&self, comb: &Comb) -> bool {
        self.registration_enabled_at(comb.timestamp())
    }

    pub fn window_description(&self) -> String {
        let start = self
            .registration_start
            .map(|start| start.to_rfc3339())
            .unwrap_or_else(|| "disabled".to_string());
        let end = self
            .registration_end
            .map(|end| end.to_rfc3339())
            .unwrap_or_else(|| "open".to_string());
        format!("{} ({start} .. {end})", self.name)
    }

    /// Shared HTTP client, built on first use.
    pub async fn client(&self) -> Result<&reqwest::Client, PushError> {
        self.http
            .get_or_try_init(|| async {
                reqwest::Client::builder()
                    .timeout(self.timeout)
                    .build()
                    .map_err(PushError::from)
            })
            .await
    }

    pub fn resource_uri(&self, path: &str) -> Result<Url, PushError> {
        let target = self.target()?;
        let base = target.endpoint.as_str().trim_end_matches('/');
        let uri = format!("{base}/{}/{}", self.name, path.trim_start_matches('/'));
        Url::parse(&uri).map_err(|err| PushError::invalid(format!("hub uri {uri}: {err}")))
    }

    /// Builds a SAS-authorized request against `<endpoint>/<hub>/<path>`.
    ///
    /// Query pairs with an empty value are sent as bare keys.
    pub async fn create_request(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<HubRequest, PushError> {
        let mut uri = self.resource_uri(path)?;
        let authorization = self.target()?.signer.token(uri.as_str())?;
        {
            let mut pairs = uri.query_pairs_mut();
            pairs.append_pair("api-version", API_VERSION);
            for (name, value) in query {
                if value.is_empty() {
                    pairs.append_key_only(name);
                } else {
                    pairs.append_pair(name, value);
                }
            }
        }

        let tracking_id = Uuid::new_v4().to_string();
        let builder = self
            .client()
            .await?
            .request(method, uri)
            .header(reqwest::header::AUTHORIZATION, authorization)
            .header("TrackingId", tracking_id.as_str());

        Ok(HubRequest {
            builder,
            tracking_id,
        })
    }

    fn target(&self) -> Result<&ConnectionTarget, PushError> {
        self.target
            .as_ref()
            .ok_or(PushError::NotConfigured("hub connection string"))
    }
}

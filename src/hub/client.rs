use std::{collections::BTreeMap, sync::Arc};

use reqwest::{Method, Response, StatusCode};
use serde::Serialize;
use tracing::debug;

use crate::{error::PushError, hub::connection::HubConnection, templates::Installation};

/// JSON-Patch operation against an installation.
#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
pub struct InstallationPatch {
    pub op: PatchOp,
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

#[derive(Serialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PatchOp {
    Add,
    Remove,
}

impl InstallationPatch {
    pub fn add_tag(tag: &str) -> Self {
        Self {
            op: PatchOp::Add,
            path: "/tags".to_string(),
            value: Some(tag.to_string()),
        }
    }

    pub fn remove_tag(tag: &str) -> Self {
        Self {
            op: PatchOp::Remove,
            path: format!("/tags/{tag}"),
            value: None,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RegistrationResult {
    pub application_platform: String,
    pub pns_handle: String,
    pub registration_id: String,
    pub outcome: String,
}

/// What a hub reported for one send. Counts are only filled in for traced
/// (test) sends.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NotificationOutcome {
    pub hub: String,
    pub tracking_id: String,
    pub state: String,
    pub success: u64,
    pub failure: u64,
    pub results: Vec<RegistrationResult>,
}

impl NotificationOutcome {
    fn parse(hub: &str, tracking_id: String, body: &str) -> Self {
        let results = elements(body, "RegistrationResult")
            .into_iter()
            .map(|result| RegistrationResult {
                application_platform: element(result, "ApplicationPlatform").unwrap_or_default().to_string(),
                pns_handle: element(result, "PnsHandle").unwrap_or_default().to_string(),
                registration_id: element(result, "RegistrationId").unwrap_or_default().to_string(),
                outcome: element(result, "Outcome").unwrap_or_default().to_string(),
            })
            .collect();

        Self {
            hub: hub.to_string(),
            tracking_id,
            state: if body.trim().is_empty() { "Enqueued" } else { "Completed" }.to_string(),
            success: element(body, "Success").and_then(|v| v.trim().parse().ok()).unwrap_or(0),
            failure: element(body, "Failure").and_then(|v| v.trim().parse().ok()).unwrap_or(0),
            results,
        }
    }
}

/// Client handle for one hub connection. Cheap to clone.
#[derive(Clone, Debug)]
pub struct HubClient {
    connection: Arc<HubConnection>,
}

impl HubClient {
    pub fn new(connection: Arc<HubConnection>) -> Self {
        Self { connection }
    }

    pub fn connection(&self) -> &HubConnection {
        &self.connection
    }

    pub fn name(&self) -> &str {
        self.connection.name()
    }

    pub fn enable_test_send(&self) -> bool {
        self.connection.enable_tracing()
    }

    pub async fn create_or_update_installation(&self, installation: &Installation) -> Result<(), PushError> {
        let path = format!("installations/{}", installation.installation_id);
        let request = self.connection.create_request(Method::PUT, &path, &[]).await?;
        let response = request.builder.json(installation).send().await?;
        ensure_success(response).await?;
        debug!("installation {} stored on hub {}", installation.installation_id, self.name());
        Ok(())
    }

    pub async fn patch_installation(
        &self,
        installation_id: &str,
        operations: &[InstallationPatch],
    ) -> Result<(), PushError> {
        let path = format!("installations/{installation_id}");
        let request = self.connection.create_request(Method::PATCH, &path, &[]).await?;
        let response = request.builder.json(operations).send().await?;
        ensure_success(response).await?;
        Ok(())
    }

    /// Deleting an installation the hub does not know is not an error.
    pub async fn delete_installation(&self, installation_id: &str) -> Result<(), PushError> {
        let path = format!("installations/{installation_id}");
        let request = self.connection.create_request(Method::DELETE, &path, &[]).await?;
        let response = request.builder.send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            debug!("installation {installation_id} already absent from hub {}", self.name());
            return Ok(());
        }
        ensure_success(response).await?;
        Ok(())
    }

    pub async fn send_template_notification(
        &self,
        properties: &BTreeMap<String, String>,
        tag_expression: &str,
    ) -> Result<NotificationOutcome, PushError> {
        let query: &[(&str, &str)] = if self.enable_test_send() { &[("test", "")] } else { &[] };
        let request = self.connection.create_request(Method::POST, "messages/", query).await?;
        let response = request
            .builder
            .header("ServiceBusNotification-Format", "template")
            .header("ServiceBusNotification-Tags", tag_expression)
            .json(properties)
            .send()
            .await?;

        let response = ensure_success(response).await?;
        let tracking_id = response
            .headers()
            .get("TrackingId")
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
            .unwrap_or(request.tracking_id);
        let body = response.text().await?;

        Ok(NotificationOutcome::parse(self.name(), tracking_id, &body))
    }
}

async fn ensure_success(response: Response) -> Result<Response, PushError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(PushError::Status {
        status: status.as_u16(),
        body,
    })
}

fn element<'a>(xml: &'a str, name: &str) -> Option<&'a str> {
    let open = format!("<{name}>");
    let close = format!("</{name}>");
    let start = xml.find(&open)? + open.len();
    let end = xml[start..].find(&close)? + start;
    Some(&xml[start..end])
}

fn elements<'a>(xml: &'a str, name: &str) -> Vec<&'a str> {
    let close = format!("</{name}>");
    let mut found = Vec::new();
    let mut rest = xml;
    while let Some(inner) = element(rest, name) {
        found.push(inner);
        match rest.find(&close) {
            Some(at) => rest = &rest[at + close.len()..],
            None => break,
        }
    }
    found
}

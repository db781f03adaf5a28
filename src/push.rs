use std::{collections::BTreeMap, sync::Arc};

use chrono::Utc;
use redb::Database;
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    comb::Comb,
    db::{db_delete, db_put, db_scan, db_update_organization},
    error::PushError,
    fanout::fan_out,
    hub::{HubConnectionPool, InstallationPatch},
    models::{DeviceRegistration, PushMessage, StoredRegistration},
    tags::build_tag,
    templates::{build_installation, AndroidTemplateFamily, InstallationOwner},
    webpush::{RecipientWebPushSubscription, WebPushSender},
};

const MAX_ENDPOINT_LEN: usize = 2048;

/// Deployment policy the engine applies to every call.
#[derive(Clone, Debug)]
pub struct EngineOptions {
    pub android_family: AndroidTemplateFamily,
    /// Used for registrations that do not name an installation.
    pub default_installation_id: Option<Uuid>,
    pub enable_send_tracing: bool,
    /// Web Push endpoint hosts; empty or `*` allows any.
    pub allowed_push_hosts: Vec<String>,
    pub max_payload_bytes: usize,
    /// Accept plain `http` Web Push endpoints. Only local push services need this.
    pub allow_http_endpoints: bool,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            android_family: AndroidTemplateFamily::default(),
            default_installation_id: None,
            enable_send_tracing: false,
            allowed_push_hosts: Vec::new(),
            max_payload_bytes: 4 * 1024,
            allow_http_endpoints: false,
        }
    }
}

#[derive(Serialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SendSummary {
    pub hub_targets: usize,
    pub hub_failures: usize,
    pub web_push_targets: usize,
    pub web_push_failures: usize,
    pub expired_subscriptions: usize,
}

#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum RegistrationOutcome {
    /// Neither a native token nor a Web Push subscription was supplied.
    Skipped,
    WebPush,
    Hub { hub: String },
}

#[derive(Serialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct OrganizationSummary {
    pub stored: usize,
    pub patched: usize,
    pub failed: usize,
}

#[derive(Serialize)]
struct WebPushContent<'a> {
    #[serde(rename = "type")]
    push_type: u8,
    payload: &'a serde_json::Value,
}

pub struct PushEngine {
    pool: HubConnectionPool,
    web_push: Option<WebPushSender>,
    db: Arc<Database>,
    options: EngineOptions,
}

impl PushEngine {
    pub fn new(
        pool: HubConnectionPool,
        web_push: Option<WebPushSender>,
        db: Arc<Database>,
        options: EngineOptions,
    ) -> Self {
        Self {
            pool,
            web_push,
            db,
            options,
        }
    }

    pub fn vapid_public_key(&self) -> Option<&str> {
        self.web_push.as_ref().map(WebPushSender::public_key)
    }

    /// Runs a registration store call on the blocking pool.
    async fn with_db<T, F>(&self, op: F) -> Result<T, PushError>
    where
        T: Send + 'static,
        F: FnOnce(&Database) -> Result<T, PushError> + Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || op(db.as_ref())).await?
    }

    /// Broadcasts `message` to every hub and to the matching Web Push
    /// subscriptions.
    ///
    /// Hub failures are only logged. The call fails when every Web Push
    /// target failed.
    pub async fn send(&self, message: &PushMessage) -> Result<SendSummary, PushError> {
        let payload = serde_json::to_string(&message.payload)?;
        if payload.len() > self.options.max_payload_bytes {
            return Err(PushError::PayloadTooLarge);
        }

        let tag = build_tag(
            message.target,
            message.target_id,
            message.excluded_identifier(),
            message.client_type,
        );
        let properties = BTreeMap::from([
            ("type".to_string(), message.push_type.code().to_string()),
            ("payload".to_string(), payload),
        ]);

        let hubs = self.pool.all_clients();
        let (hub_report, web_push) = tokio::join!(
            hubs.send_template_notification(&properties, &tag),
            self.send_web_push(message),
        );

        if self.options.enable_send_tracing {
            for (client, outcome) in hub_report.successes() {
                if !client.enable_test_send() {
                    continue;
                }
                info!(
                    "hub {} tracking id {}: {:?} push with {} successes and {} failures, results {:?}",
                    outcome.hub,
                    outcome.tracking_id,
                    message.push_type,
                    outcome.success,
                    outcome.failure,
                    outcome.results
                );
            }
        }

        let mut summary = web_push?;
        summary.hub_targets = hub_report.results.len();
        summary.hub_failures = hub_report.failure_count();
        debug!("send {tag}: {summary:?}");
        Ok(summary)
    }

    async fn send_web_push(&self, message: &PushMessage) -> Result<SendSummary, PushError> {
        let filter = message.clone();
        let targets = self
            .with_db(move |db| db_scan(db, |stored| stored.matches(&filter)))
            .await?;
        let Some(sender) = self.web_push.as_ref() else {
            if !targets.is_empty() {
                warn!(
                    "{} web push registrations match but VAPID keys are not configured",
                    targets.len()
                );
            }
            return Ok(SendSummary::default());
        };

        let content = serde_json::to_vec(&WebPushContent {
            push_type: message.push_type.code(),
            payload: &message.payload,
        })?;
        let content = content.as_slice();
        let allow_http = self.options.allow_http_endpoints;

        let report = fan_out("web push", targets, |stored| async move {
            let subscription =
                RecipientWebPushSubscription::from_keys(&stored.subscription, allow_http)?;
            sender.send(&subscription, content).await
        })
        .await;

        let expired: Vec<Comb> = report
            .failures()
            .filter(|(_, err)| matches!(err, PushError::SubscriptionExpired))
            .map(|(stored, _)| stored.device_id)
            .collect();
        let summary = SendSummary {
            web_push_targets: report.results.len(),
            web_push_failures: report.failure_count(),
            expired_subscriptions: expired.len(),
            ..SendSummary::default()
        };
        if !expired.is_empty() {
            let removed = expired.clone();
            self.with_db(move |db| {
                for device_id in &removed {
                    db_delete(db, device_id)?;
                }
                Ok(())
            })
            .await?;
            for device_id in &expired {
                info!("removed expired web push subscription for device {device_id}");
            }
        }

        if report.all_failed() {
            if let Some(err) = report.results.into_iter().find_map(|(_, result)| result.err()) {
                return Err(err);
            }
        }
        Ok(summary)
    }

    pub async fn create_or_update_registration(
        &self,
        registration: &DeviceRegistration,
    ) -> Result<RegistrationOutcome, PushError> {
        let installation_id = registration
            .installation_id
            .or(self.options.default_installation_id);

        if let Some(keys) = &registration.push_data.web_push {
            if self.web_push.is_none() {
                return Err(PushError::NotConfigured("web push (VAPID keys)"));
            }
            if keys.endpoint.len() > MAX_ENDPOINT_LEN {
                return Err(PushError::invalid("web push endpoint too long"));
            }
            let subscription =
                RecipientWebPushSubscription::from_keys(keys, self.options.allow_http_endpoints)?;
            let host = subscription.endpoint().host_str().unwrap_or_default();
            if !host_allowed(host, &self.options.allowed_push_hosts) {
                return Err(PushError::invalid(format!("push host {host} is not allowed")));
            }

            let stored = StoredRegistration {
                device_id: registration.device_id,
                user_id: registration.user_id,
                identifier: registration.identifier.clone(),
                device_type: registration.device_type,
                organization_ids: registration.organization_ids.clone(),
                installation_id,
                subscription: keys.clone(),
                created_at: Utc::now(),
            };
            self.with_db(move |db| db_put(db, &stored)).await?;
            info!("stored web push registration for device {}", registration.device_id);

            // A device that switched from a native token stops getting hub sends.
            self.remove_hub_installation(&registration.device_id).await;
            return Ok(RegistrationOutcome::WebPush);
        }

        let Some(token) = registration.push_data.native_token() else {
            debug!("device {} has no push data, nothing to register", registration.device_id);
            return Ok(RegistrationOutcome::Skipped);
        };

        let client = self.pool.client_for(&registration.device_id)?;
        let owner = InstallationOwner {
            device_id: registration.device_id,
            user_id: registration.user_id,
            identifier: registration.identifier.as_deref(),
            device_type: registration.device_type,
            organization_ids: &registration.organization_ids,
            installation_id,
        };
        let installation = build_installation(&owner, token, self.options.android_family);
        client.create_or_update_installation(&installation).await?;

        // A device that switched to a native token stops getting Web Push sends.
        let device_id = registration.device_id;
        self.with_db(move |db| db_delete(db, &device_id)).await?;
        info!(
            "registered device {} ({:?}) on hub {}",
            registration.device_id,
            installation.platform,
            client.name()
        );
        Ok(RegistrationOutcome::Hub {
            hub: client.name().to_string(),
        })
    }

    /// Best effort: the device may never have had a hub installation.
    async fn remove_hub_installation(&self, device_id: &Comb) {
        let client = match self.pool.client_for(device_id) {
            Ok(client) => client,
            Err(err) => {
                debug!("no hub installation to remove for device {device_id}: {err}");
                return;
            }
        };
        match client.delete_installation(&device_id.to_string()).await {
            Ok(()) => debug!("removed hub installation for device {device_id}"),
            Err(err) => warn!("failed to remove hub installation for device {device_id}: {err}"),
        }
    }

    pub async fn delete_registration(&self, device_id: &Comb) -> Result<(), PushError> {
        let key = *device_id;
        if self.with_db(move |db| db_delete(db, &key)).await? {
            info!("removed web push registration for device {device_id}");
            return Ok(());
        }

        self.pool
            .client_for(device_id)?
            .delete_installation(&device_id.to_string())
            .await?;
        info!("removed hub installation for device {device_id}");
        Ok(())
    }

    pub async fn add_organization(
        &self,
        device_ids: &[Comb],
        organization_id: Uuid,
    ) -> Result<OrganizationSummary, PushError> {
        self.update_organization(device_ids, organization_id, true).await
    }

    pub async fn remove_organization(
        &self,
        device_ids: &[Comb],
        organization_id: Uuid,
    ) -> Result<OrganizationSummary, PushError> {
        self.update_organization(device_ids, organization_id, false).await
    }

    async fn update_organization(
        &self,
        device_ids: &[Comb],
        organization_id: Uuid,
        member: bool,
    ) -> Result<OrganizationSummary, PushError> {
        let known = device_ids.to_vec();
        let stored = self
            .with_db(move |db| db_update_organization(db, &known, organization_id, member))
            .await?;
        let remaining: Vec<Comb> = device_ids
            .iter()
            .filter(|device_id| !stored.contains(*device_id))
            .copied()
            .collect();

        let tag = format!("organizationId:{organization_id}");
        let operations = if member {
            [InstallationPatch::add_tag(&tag)]
        } else {
            [InstallationPatch::remove_tag(&tag)]
        };
        let operations = operations.as_slice();

        let report = fan_out("installation tag patch", remaining, |device_id| async move {
            self.pool
                .client_for(&device_id)?
                .patch_installation(&device_id.to_string(), operations)
                .await
        })
        .await;

        let summary = OrganizationSummary {
            stored: stored.len(),
            patched: report.success_count(),
            failed: report.failure_count(),
        };
        if report.all_failed() {
            if let Some(err) = report.results.into_iter().find_map(|(_, result)| result.err()) {
                return Err(err);
            }
        }
        Ok(summary)
    }
}

fn host_allowed(host: &str, allowed_hosts: &[String]) -> bool {
    if allowed_hosts.is_empty() || allowed_hosts.iter().any(|item| item == "*") {
        return true;
    }

    allowed_hosts
        .iter()
        .any(|allowed| allowed.eq_ignore_ascii_case(host))
}

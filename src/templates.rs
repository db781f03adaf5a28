//! Per-platform installation templates.
//!
//! Hubs route template sends by tag, so every tag produced here must be a pure
//! function of the registration.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    comb::Comb,
    models::{ClientType, DeviceType},
};

/// Which data-message shape Android installations get. Chosen by deployment
/// policy.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AndroidTemplateFamily {
    #[default]
    V1,
    Legacy,
}

impl std::str::FromStr for AndroidTemplateFamily {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "v1" | "fcmv1" => Ok(AndroidTemplateFamily::V1),
            "legacy" | "fcm" => Ok(AndroidTemplateFamily::Legacy),
            other => Err(format!("unknown android template family: {other}")),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Fcm,
    FcmV1,
    Apns,
    Adm,
    Browser,
}

impl Platform {
    pub fn for_device(device_type: DeviceType, android: AndroidTemplateFamily) -> Self {
        match device_type {
            DeviceType::Android => match android {
                AndroidTemplateFamily::V1 => Platform::FcmV1,
                AndroidTemplateFamily::Legacy => Platform::Fcm,
            },
            DeviceType::Ios => Platform::Apns,
            DeviceType::AndroidAmazon => Platform::Adm,
            _ => Platform::Browser,
        }
    }

    /// `(payload, message, badgeMessage)` bodies, or `None` for platforms
    /// that take no templates.
    fn bodies(self) -> Option<(&'static str, &'static str, &'static str)> {
        match self {
            Platform::FcmV1 => Some((
                r#"{"message":{"data":{"type":"$(type)","payload":"$(payload)"}}}"#,
                r#"{"message":{"data":{"type":"$(type)"},"notification":{"title":"$(title)","body":"$(message)"}}}"#,
                r#"{"message":{"data":{"type":"$(type)"},"notification":{"title":"$(title)","body":"$(message)"}}}"#,
            )),
            Platform::Fcm => Some((
                r##"{"data":{"data":{"type":"#(type)","payload":"$(payload)"}}}"##,
                r##"{"data":{"data":{"type":"#(type)"},"notification":{"title":"$(title)","body":"$(message)"}}}"##,
                r##"{"data":{"data":{"type":"#(type)"},"notification":{"title":"$(title)","body":"$(message)"}}}"##,
            )),
            Platform::Apns => Some((
                r##"{"data":{"type":"#(type)","payload":"$(payload)"},"aps":{"content-available":1}}"##,
                r##"{"data":{"type":"#(type)"},"aps":{"alert":"$(message)","badge":null,"content-available":1}}"##,
                r##"{"data":{"type":"#(type)"},"aps":{"alert":"$(message)","badge":"#(badge)","content-available":1}}"##,
            )),
            Platform::Adm => Some((
                r##"{"data":{"type":"#(type)","payload":"$(payload)"}}"##,
                r##"{"data":{"type":"#(type)","message":"$(message)"}}"##,
                r##"{"data":{"type":"#(type)","message":"$(message)"}}"##,
            )),
            Platform::Browser => None,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct InstallationTemplate {
    pub body: String,
    pub tags: Vec<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Installation {
    pub installation_id: String,
    pub push_channel: String,
    pub platform: Platform,
    pub tags: Vec<String>,
    pub templates: BTreeMap<String, InstallationTemplate>,
}

/// Identity of the device an installation is built for.
#[derive(Clone, Debug)]
pub struct InstallationOwner<'a> {
    pub device_id: Comb,
    pub user_id: Uuid,
    pub identifier: Option<&'a str>,
    pub device_type: DeviceType,
    pub organization_ids: &'a [Uuid],
    pub installation_id: Option<Uuid>,
}

pub fn build_installation(
    owner: &InstallationOwner<'_>,
    push_channel: &str,
    android: AndroidTemplateFamily,
) -> Installation {
    let platform = Platform::for_device(owner.device_type, android);
    let client_type = owner.device_type.client_type();
    let identifier = owner.identifier.map(str::trim).filter(|id| !id.is_empty());

    let mut tags = vec![
        format!("userId:{}", owner.user_id),
        format!("clientType:{client_type}"),
    ];
    if let Some(identifier) = identifier {
        tags.push(format!("deviceIdentifier:{identifier}"));
    }
    tags.extend(owner.organization_ids.iter().map(|org| format!("organizationId:{org}")));
    if let Some(installation_id) = owner.installation_id {
        tags.push(format!("installationId:{installation_id}"));
    }

    let mut templates = BTreeMap::new();
    if let Some((payload, message, badge)) = platform.bodies() {
        for (name, body) in [("payload", payload), ("message", message), ("badgeMessage", badge)] {
            templates.insert(
                format!("template:{name}"),
                InstallationTemplate {
                    body: body.to_string(),
                    tags: template_tags(name, owner.user_id, identifier, client_type),
                },
            );
        }
    }

    Installation {
        installation_id: owner.device_id.to_string(),
        push_channel: push_channel.to_string(),
        platform,
        tags,
        templates,
    }
}

fn template_tags(name: &str, user_id: Uuid, identifier: Option<&str>, client_type: ClientType) -> Vec<String> {
    let mut tags = vec![
        format!("template:{name}"),
        format!("template:{name}_userId:{user_id}"),
        format!("clientType:{client_type}"),
    ];
    if let Some(identifier) = identifier {
        tags.push(format!("template:{name}_deviceIdentifier:{identifier}"));
    }
    tags
}

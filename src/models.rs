use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::comb::Comb;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum PushType {
    SyncCipherUpdate = 0,
    SyncCipherCreate = 1,
    SyncLoginDelete = 2,
    SyncFolderDelete = 3,
    SyncCiphers = 4,
    SyncVault = 5,
    SyncOrgKeys = 6,
    SyncFolderCreate = 7,
    SyncFolderUpdate = 8,
    SyncCipherDelete = 9,
    SyncSettings = 10,
    LogOut = 11,
    SyncSendCreate = 12,
    SyncSendUpdate = 13,
    SyncSendDelete = 14,
    AuthRequest = 15,
    AuthRequestResponse = 16,
    SyncOrganizations = 17,
    SyncOrganizationStatusChanged = 18,
    SyncOrganizationCollectionSettingChanged = 19,
    Notification = 20,
    NotificationStatus = 21,
    PendingSecurityTasks = 22,
}

impl PushType {
    /// Numeric value placed in the `type` template property.
    pub fn code(self) -> u8 {
        self as u8
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PushTarget {
    User,
    Organization,
    Installation,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClientType {
    All,
    Web,
    Browser,
    Desktop,
    Mobile,
    Cli,
}

impl std::fmt::Display for ClientType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ClientType::All => "All",
            ClientType::Web => "Web",
            ClientType::Browser => "Browser",
            ClientType::Desktop => "Desktop",
            ClientType::Mobile => "Mobile",
            ClientType::Cli => "Cli",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceType {
    Android,
    #[serde(rename = "iOS")]
    Ios,
    ChromeExtension,
    FirefoxExtension,
    OperaExtension,
    EdgeExtension,
    WindowsDesktop,
    MacOsDesktop,
    LinuxDesktop,
    ChromeBrowser,
    FirefoxBrowser,
    OperaBrowser,
    EdgeBrowser,
    IEBrowser,
    UnknownBrowser,
    AndroidAmazon,
    #[serde(rename = "UWP")]
    Uwp,
    SafariBrowser,
    VivaldiBrowser,
    VivaldiExtension,
    SafariExtension,
    #[serde(rename = "SDK")]
    Sdk,
    Server,
    #[serde(rename = "WindowsCLI")]
    WindowsCli,
    #[serde(rename = "MacOsCLI")]
    MacOsCli,
    #[serde(rename = "LinuxCLI")]
    LinuxCli,
}

impl DeviceType {
    pub fn client_type(self) -> ClientType {
        use DeviceType::*;
        match self {
            Android | Ios | AndroidAmazon => ClientType::Mobile,
            ChromeExtension | FirefoxExtension | OperaExtension | EdgeExtension
            | VivaldiExtension | SafariExtension => ClientType::Browser,
            WindowsDesktop | MacOsDesktop | LinuxDesktop | Uwp => ClientType::Desktop,
            ChromeBrowser | FirefoxBrowser | OperaBrowser | EdgeBrowser | IEBrowser
            | UnknownBrowser | SafariBrowser | VivaldiBrowser => ClientType::Web,
            WindowsCli | MacOsCli | LinuxCli => ClientType::Cli,
            Sdk | Server => ClientType::All,
        }
    }
}

/// Browser-supplied subscription keys, base64url encoded.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
pub struct WebPushKeys {
    pub endpoint: String,
    pub p256dh: String,
    pub auth: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PushRegistrationData {
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub web_push: Option<WebPushKeys>,
}

impl PushRegistrationData {
    pub fn native_token(&self) -> Option<&str> {
        self.token
            .as_deref()
            .map(str::trim)
            .filter(|token| !token.is_empty())
    }
}

#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct DeviceRegistration {
    pub device_id: Comb,
    pub user_id: Uuid,
    #[serde(default)]
    pub identifier: Option<String>,
    pub device_type: DeviceType,
    pub push_data: PushRegistrationData,
    #[serde(default)]
    pub organization_ids: Vec<Uuid>,
    #[serde(default)]
    pub installation_id: Option<Uuid>,
}

#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct PushMessage {
    #[serde(rename = "type")]
    pub push_type: PushType,
    pub target: PushTarget,
    pub target_id: Uuid,
    pub payload: serde_json::Value,
    #[serde(default)]
    pub exclude_current_context: bool,
    /// Device identifier of the caller's own session.
    #[serde(default)]
    pub context_identifier: Option<String>,
    #[serde(default)]
    pub client_type: Option<ClientType>,
}

impl PushMessage {
    pub fn excluded_identifier(&self) -> Option<&str> {
        if self.exclude_current_context {
            self.context_identifier.as_deref()
        } else {
            None
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct StoredRegistration {
    pub device_id: Comb,
    pub user_id: Uuid,
    pub identifier: Option<String>,
    pub device_type: DeviceType,
    pub organization_ids: Vec<Uuid>,
    pub installation_id: Option<Uuid>,
    pub subscription: WebPushKeys,
    pub created_at: DateTime<Utc>,
}

impl StoredRegistration {
    pub fn matches(&self, message: &PushMessage) -> bool {
        let targeted = match message.target {
            PushTarget::User => self.user_id == message.target_id,
            PushTarget::Organization => self.organization_ids.contains(&message.target_id),
            PushTarget::Installation => self.installation_id == Some(message.target_id),
        };
        if !targeted {
            return false;
        }

        if let (Some(excluded), Some(own)) = (message.excluded_identifier(), &self.identifier) {
            if excluded == own {
                return false;
            }
        }

        match message.client_type {
            None | Some(ClientType::All) => true,
            Some(client_type) => self.device_type.client_type() == client_type,
        }
    }
}

#[derive(Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct OrganizationUpdate {
    pub device_ids: Vec<Comb>,
    pub organization_id: Uuid,
}

#[derive(Serialize)]
pub struct ConfigResponse {
    pub public_key: Option<String>,
}

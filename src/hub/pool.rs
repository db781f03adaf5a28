use std::{collections::BTreeMap, sync::Arc, time::Duration};

use tracing::{info, warn};

use crate::{
    comb::Comb,
    error::PushError,
    fanout::{fan_out, FanOutReport},
    hub::{
        client::{HubClient, NotificationOutcome},
        connection::{HubConnection, HubSettings},
    },
};

/// Immutable set of valid hub connections.
#[derive(Clone, Debug)]
pub struct HubConnectionPool {
    connections: Vec<Arc<HubConnection>>,
    clients: Vec<HubClient>,
}

impl HubConnectionPool {
    pub fn new(settings: &[HubSettings], timeout: Duration) -> Self {
        let mut connections = Vec::new();
        for hub in settings {
            let connection = HubConnection::new(hub, timeout);
            if connection.is_valid() {
                connections.push(Arc::new(connection));
            } else {
                warn!(
                    "skipping notification hub {:?}: missing name or malformed connection string",
                    hub.hub_name
                );
            }
        }

        let mut clients: Vec<HubClient> = Vec::new();
        for connection in &connections {
            let seen = clients
                .iter()
                .any(|client| client.connection().connection_string() == connection.connection_string());
            if !seen {
                clients.push(HubClient::new(connection.clone()));
            }
        }

        info!(
            "notification hub pool ready: {} connections, {} clients",
            connections.len(),
            clients.len()
        );
        Self {
            connections,
            clients,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub fn connections(&self) -> &[Arc<HubConnection>] {
        &self.connections
    }

    /// The connection a device with this id registers on.
    pub fn connection_for(&self, comb: &Comb) -> Result<Arc<HubConnection>, PushError> {
        let eligible: Vec<&Arc<HubConnection>> = self
            .connections
            .iter()
            .filter(|connection| connection.registration_enabled(comb))
            .collect();

        if eligible.is_empty() {
            let windows = self
                .connections
                .iter()
                .map(|connection| connection.window_description())
                .collect::<Vec<_>>()
                .join(", ");
            return Err(PushError::Routing {
                comb: comb.uuid(),
                timestamp: comb.timestamp(),
                windows: if windows.is_empty() { "none configured".to_string() } else { windows },
            });
        }

        Ok(eligible[comb.route_hash() % eligible.len()].clone())
    }

    pub fn client_for(&self, comb: &Comb) -> Result<HubClient, PushError> {
        self.connection_for(comb).map(HubClient::new)
    }

    pub fn all_clients(&self) -> MultiHubClient {
        MultiHubClient {
            clients: self.clients.clone(),
        }
    }
}

/// Broadcast view over every distinct hub client.
#[derive(Clone, Debug)]
pub struct MultiHubClient {
    clients: Vec<HubClient>,
}

impl MultiHubClient {
    pub fn clients(&self) -> &[HubClient] {
        &self.clients
    }

    pub async fn send_template_notification(
        &self,
        properties: &BTreeMap<String, String>,
        tag_expression: &str,
    ) -> FanOutReport<HubClient, NotificationOutcome> {
        fan_out("hub template send", self.clients.clone(), |client| async move {
            client.send_template_notification(properties, tag_expression).await
        })
        .await
    }
}

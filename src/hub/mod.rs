//! Notification hub backends: SAS-signed REST calls routed over a pool of
//! time-windowed connections.

pub mod client;
pub mod connection;
pub mod pool;
pub mod sas;

pub use client::{HubClient, InstallationPatch, NotificationOutcome};
pub use connection::{HubConnection, HubSettings};
pub use pool::{HubConnectionPool, MultiHubClient};

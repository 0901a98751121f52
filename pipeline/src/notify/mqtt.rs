//! MQTT status notifier

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use shipyard_domain::Deployment;
use tracing::{debug, error, info, warn};

use crate::errors::ShipyardError;
use crate::notify::topics::Topics;
use crate::notify::StatusNotifier;

/// MQTT broker address
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MqttAddress {
    pub host: String,
    pub port: u16,
    pub use_tls: bool,
    /// Optional path to a PEM-encoded CA certificate for broker verification.
    /// When `None` and `use_tls` is `true`, the system certificate store is used.
    pub ca_cert_path: Option<String>,
    pub username: Option<String>,
    pub password: Option<SecretString>,
}

impl Default for MqttAddress {
    fn default() -> Self {
        Self {
            host: "".to_string(),
            port: 8883,
            use_tls: true,
            ca_cert_path: None,
            username: None,
            password: None,
        }
    }
}

fn tls_transport(address: &MqttAddress) -> Result<rumqttc::Transport, ShipyardError> {
    use rumqttc::{TlsConfiguration, Transport};
    use rustls::ClientConfig;

    let mut root_cert_store = rustls::RootCertStore::empty();

    if let Some(ref ca_path) = address.ca_cert_path {
        let ca_pem = std::fs::read(ca_path).map_err(|e| {
            ShipyardError::NotifyError(format!("Failed to read CA cert {ca_path}: {e}"))
        })?;
        let mut cursor = std::io::Cursor::new(ca_pem);
        for cert in rustls_pemfile::certs(&mut cursor).flatten() {
            let _ = root_cert_store.add(cert);
        }
    } else {
        for cert in rustls_native_certs::load_native_certs().unwrap_or_default() {
            let _ = root_cert_store.add(cert);
        }
    }

    let client_config = ClientConfig::builder()
        .with_root_certificates(root_cert_store)
        .with_no_client_auth();

    Ok(Transport::tls_with_config(TlsConfiguration::Rustls(
        Arc::new(client_config),
    )))
}

/// Publishes deployment records to their deployment and project topics
pub struct MqttNotifier {
    client: AsyncClient,
}

impl MqttNotifier {
    /// Create the notifier and the event loop that must be driven with [`drive`]
    pub fn connect(
        address: &MqttAddress,
        client_id: &str,
    ) -> Result<(Self, EventLoop), ShipyardError> {
        if address.host.is_empty() {
            return Err(ShipyardError::NotifyError("MQTT host is not configured".to_string()));
        }

        let mut options = MqttOptions::new(client_id, &address.host, address.port);
        options.set_keep_alive(Duration::from_secs(30));
        if let Some(ref username) = address.username {
            let password = address
                .password
                .as_ref()
                .map(|p| p.expose_secret().to_string())
                .unwrap_or_default();
            options.set_credentials(username, password);
        }

        if address.use_tls {
            options.set_transport(tls_transport(address)?);
        }

        let (client, eventloop) = AsyncClient::new(options, 64);
        Ok((Self { client }, eventloop))
    }
}

#[async_trait]
impl StatusNotifier for MqttNotifier {
    async fn notify(&self, deployment: &Deployment) -> Result<(), ShipyardError> {
        let payload = serde_json::to_vec(deployment)?;

        for topic in [
            Topics::deployment_status(&deployment.id),
            Topics::project_deployments(&deployment.project_id),
        ] {
            self.client
                .publish(&topic, QoS::AtLeastOnce, false, payload.clone())
                .await
                .map_err(|e| ShipyardError::NotifyError(e.to_string()))?;
            debug!("Published status {} to: {}", deployment.status, topic);
        }
        Ok(())
    }
}

/// Options for driving the MQTT event loop
#[derive(Debug, Clone)]
pub struct Options {
    /// Reconnect delay on failure
    pub reconnect_delay: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            reconnect_delay: Duration::from_secs(5),
        }
    }
}

/// Drive the event loop until shutdown
///
/// Publishes only leave the client once the event loop is polled. Polling again after an
/// error reconnects.
pub async fn drive<S, F>(
    options: &Options,
    mut eventloop: EventLoop,
    sleep_fn: S,
    mut shutdown_signal: Pin<Box<dyn Future<Output = ()> + Send>>,
) where
    S: Fn(Duration) -> F,
    F: Future<Output = ()>,
{
    info!("MQTT notifier starting...");

    loop {
        let polled = tokio::select! {
            _ = &mut shutdown_signal => {
                info!("MQTT notifier shutting down...");
                return;
            }
            polled = eventloop.poll() => polled,
        };

        match polled {
            Ok(Event::Incoming(Packet::ConnAck(_))) => info!("MQTT connected"),
            Ok(Event::Incoming(Packet::PubAck(ack))) => debug!("Publish {} acknowledged", ack.pkid),
            Ok(_) => {}
            Err(e) => {
                warn!("MQTT poll error: {}", e);
                error!("MQTT connection lost, reconnecting in {:?}", options.reconnect_delay);
                sleep_fn(options.reconnect_delay).await;
            }
        }
    }
}

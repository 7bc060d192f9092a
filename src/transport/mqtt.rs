//! MQTT publishing of detections and the remote enable/disable switch.
//!
//! Results go out as the bare strings `"true"` / `"false"` with QoS 1. The
//! switch topic is read on the connection thread and forwarded as `bool`s over
//! a channel; the daemon applies them to the controller.

use anyhow::Result;
use rumqttc::v5::mqttbytes::v5::LastWill;
use rumqttc::v5::{mqttbytes::QoS, Client, Connection, Event, Incoming, MqttOptions};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use super::endpoint::{MqttEndpoint, TlsMaterials};
use crate::detect::DetectionResult;
use crate::sink::DetectionSink;

pub const DEFAULT_RESULT_TOPIC: &str = "bot_detector/bot_existence";
pub const DEFAULT_SWITCH_TOPIC: &str = "bot_detector/switch";
const PAYLOAD_ONLINE: &str = "online";
const PAYLOAD_OFFLINE: &str = "offline";
const RECONNECT_DELAY: Duration = Duration::from_secs(2);

#[derive(Clone, Debug)]
pub struct MqttSettings {
    pub endpoint: MqttEndpoint,
    pub tls: TlsMaterials,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub result_topic: String,
    /// Subscribed when set; payloads toggle the pipeline.
    pub switch_topic: Option<String>,
}

impl MqttSettings {
    /// Retained availability topic, driven by the last will.
    pub fn status_topic(&self) -> String {
        format!("{}/status", self.result_topic)
    }
}

/// Parse a switch payload: `true`/`1`/`on` enable, `false`/`0`/`off` disable.
pub fn parse_switch_payload(payload: &[u8]) -> Option<bool> {
    let text = std::str::from_utf8(payload).ok()?;
    match text.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "on" => Some(true),
        "false" | "0" | "off" => Some(false),
        _ => None,
    }
}

pub fn detection_payload(result: &DetectionResult) -> &'static str {
    if result.object_present {
        "true"
    } else {
        "false"
    }
}

/// Owns the broker connection and the thread driving it.
pub struct MqttRuntime {
    client: Client,
    status_topic: String,
    stopping: Arc<AtomicBool>,
    connection_handle: Option<JoinHandle<()>>,
}

impl MqttRuntime {
    /// Connect and start the connection thread. Switch commands, if a switch topic
    /// is configured, are sent on `switch_tx`.
    pub fn connect(settings: &MqttSettings, switch_tx: Option<Sender<bool>>) -> Result<Self> {
        let mut options = MqttOptions::new(
            &settings.client_id,
            &settings.endpoint.host,
            settings.endpoint.port,
        );
        options.set_keep_alive(Duration::from_secs(60));
        options.set_clean_start(true);
        if let Some(user) = settings.username.as_deref() {
            options.set_credentials(user, settings.password.as_deref().unwrap_or_default());
        }
        options.set_last_will(LastWill::new(
            settings.status_topic(),
            PAYLOAD_OFFLINE.as_bytes().to_vec(),
            QoS::AtLeastOnce,
            true,
            None,
        ));
        options.set_transport(settings.endpoint.transport(&settings.tls)?);

        let (client, connection) = Client::new(options, 10);
        log::info!(
            "MQTT broker {}:{} (TLS: {}, auth: {})",
            settings.endpoint.host,
            settings.endpoint.port,
            settings.endpoint.use_tls,
            settings.username.is_some()
        );

        let stopping = Arc::new(AtomicBool::new(false));
        let worker = ConnectionWorker {
            client: client.clone(),
            status_topic: settings.status_topic(),
            switch: settings.switch_topic.clone().zip(switch_tx),
            stopping: Arc::clone(&stopping),
        };
        let handle = std::thread::Builder::new()
            .name("bot-detector-mqtt".to_string())
            .spawn(move || worker.run(connection))?;

        Ok(Self {
            client,
            status_topic: settings.status_topic(),
            stopping,
            connection_handle: Some(handle),
        })
    }

    /// Sink publishing to `topic` over this connection.
    pub fn sink(&self, topic: &str) -> MqttSink {
        MqttSink {
            client: self.client.clone(),
            topic: topic.to_string(),
        }
    }

    pub fn disconnect(mut self) -> Result<()> {
        self.stopping.store(true, Ordering::SeqCst);
        let _ = self.client.try_publish(
            self.status_topic.as_str(),
            QoS::AtLeastOnce,
            true,
            PAYLOAD_OFFLINE.as_bytes().to_vec(),
        );
        self.client.disconnect()?;
        if let Some(handle) = self.connection_handle.take() {
            let _ = handle.join();
        }
        Ok(())
    }
}

struct ConnectionWorker {
    client: Client,
    status_topic: String,
    switch: Option<(String, Sender<bool>)>,
    stopping: Arc<AtomicBool>,
}

impl ConnectionWorker {
    fn run(self, mut connection: Connection) {
        for event in connection.iter() {
            match event {
                Ok(Event::Incoming(Incoming::ConnAck(_))) => self.on_connected(),
                Ok(Event::Incoming(Incoming::Publish(publish))) => {
                    self.on_publish(&publish.topic, &publish.payload)
                }
                Ok(_) => {}
                Err(e) => {
                    if self.stopping.load(Ordering::SeqCst) {
                        break;
                    }
                    log::warn!("MQTT connection error: {}; retrying", e);
                    std::thread::sleep(RECONNECT_DELAY);
                }
            }
        }
    }

    fn on_connected(&self) {
        log::info!("connected to MQTT broker");
        if let Err(e) = self.client.try_publish(
            self.status_topic.as_str(),
            QoS::AtLeastOnce,
            true,
            PAYLOAD_ONLINE.as_bytes().to_vec(),
        ) {
            log::warn!("failed to publish availability: {}", e);
        }
        if let Some((topic, _)) = &self.switch {
            match self.client.try_subscribe(topic.as_str(), QoS::AtMostOnce) {
                Ok(()) => log::info!("Subscribed to {}", topic),
                Err(e) => log::warn!("failed to subscribe to {}: {}", topic, e),
            }
        }
    }

    fn on_publish(&self, topic: &[u8], payload: &[u8]) {
        let Some((switch_topic, tx)) = &self.switch else {
            return;
        };
        if topic != switch_topic.as_bytes() {
            return;
        }
        match parse_switch_payload(payload) {
            Some(enabled) => {
                if tx.send(enabled).is_err() {
                    log::debug!("switch receiver gone; dropping command");
                }
            }
            None => log::warn!(
                "ignoring switch payload {:?}",
                String::from_utf8_lossy(payload)
            ),
        }
    }
}

/// Publishes each decision as `"true"` / `"false"`.
pub struct MqttSink {
    client: Client,
    topic: String,
}

impl DetectionSink for MqttSink {
    fn publish(&self, result: &DetectionResult) -> Result<()> {
        // Never block the pass on a full request queue.
        self.client.try_publish(
            self.topic.as_str(),
            QoS::AtLeastOnce,
            false,
            detection_payload(result).as_bytes().to_vec(),
        )?;
        Ok(())
    }
}

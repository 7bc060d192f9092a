//! MQTT transport: broker addressing, the detection sink and the remote switch.

mod endpoint;
mod mqtt;

pub use endpoint::{MqttEndpoint, TlsMaterials};
pub use mqtt::{
    detection_payload, parse_switch_payload, MqttRuntime, MqttSettings, MqttSink,
    DEFAULT_RESULT_TOPIC, DEFAULT_SWITCH_TOPIC,
};

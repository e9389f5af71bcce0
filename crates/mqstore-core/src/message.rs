//! Stored publish messages

use serde::{Deserialize, Serialize};

/// MQTT quality of service level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QoS {
    AtMostOnce,
    AtLeastOnce,
    ExactlyOnce,
}

impl QoS {
    pub fn as_u8(self) -> u8 {
        match self {
            QoS::AtMostOnce => 0,
            QoS::AtLeastOnce => 1,
            QoS::ExactlyOnce => 2,
        }
    }
}

/// A publish message kept by the message store, either retained on a topic
/// or queued for delivery to a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredMessage {
    pub topic: String,
    pub qos: QoS,
    pub payload: Vec<u8>,
    #[serde(default)]
    pub retained: bool,
    /// Client that published the message
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub message_id: Option<u16>,
}

impl StoredMessage {
    pub fn new(topic: impl Into<String>, qos: QoS, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            qos,
            payload: payload.into(),
            retained: false,
            client_id: None,
            message_id: None,
        }
    }

    pub fn retained(mut self, retained: bool) -> Self {
        self.retained = retained;
        self
    }

    pub fn from_client(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }
}

/*!
Mock MQTT Client pour tests sans broker

Enregistre tous les messages publiés, simule les échecs de publication par
préfixe de topic et compte les déconnexions. Expose aussi la vue "retained"
du broker (dernier message retenu par topic).
*/

use rumqttc::QoS;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use tokio::time::Instant;
use anyhow::Result;

#[derive(Debug, Clone)]
pub struct MockMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: QoS,
    pub retain: bool,
    /// Horloge tokio: suit l'horloge virtuelle quand le temps est en pause
    pub published_at: Instant,
}

/// Mock MQTT Client qui simule rumqttc::AsyncClient
#[derive(Clone, Default)]
pub struct MockMqttClient {
    published_messages: Arc<Mutex<Vec<MockMessage>>>,
    failing_prefixes: Arc<Mutex<Vec<String>>>,
    disconnects: Arc<Mutex<usize>>,
}

impl MockMqttClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Toute publication dont le topic commence par `prefix` échouera
    pub fn fail_publishes_to<S: Into<String>>(&self, prefix: S) {
        self.failing_prefixes.lock().unwrap().push(prefix.into());
    }

    /// Simule la publication d'un message (compatible avec AsyncClient)
    pub async fn publish<S, V>(&self, topic: S, qos: QoS, retain: bool, payload: V) -> Result<()>
    where
        S: Into<String>,
        V: Into<Vec<u8>>,
    {
        let topic = topic.into();
        let failing = self
            .failing_prefixes
            .lock()
            .unwrap()
            .iter()
            .any(|prefix| topic.starts_with(prefix.as_str()));
        if failing {
            log::warn!("[MOCK] Rejected publish to {}", topic);
            anyhow::bail!("simulated publish failure on {}", topic);
        }

        let message = MockMessage {
            topic,
            payload: payload.into(),
            qos,
            retain,
            published_at: Instant::now(),
        };

        log::info!("[MOCK] Published to {}: {} bytes", message.topic, message.payload.len());
        self.published_messages.lock().unwrap().push(message);
        Ok(())
    }

    /// Simule la déconnexion propre (compatible avec AsyncClient)
    pub async fn disconnect(&self) -> Result<()> {
        *self.disconnects.lock().unwrap() += 1;
        log::info!("[MOCK] Disconnected");
        Ok(())
    }

    /// Nombre de déconnexions demandées
    pub fn disconnect_count(&self) -> usize {
        *self.disconnects.lock().unwrap()
    }

    /// Récupère tous les messages publiés (pour assertions de tests)
    pub fn get_published_messages(&self) -> Vec<MockMessage> {
        self.published_messages.lock().unwrap().clone()
    }

    /// Trouve les messages publiés sur un topic donné
    pub fn find_messages_by_topic(&self, topic: &str) -> Vec<MockMessage> {
        self.published_messages
            .lock()
            .unwrap()
            .iter()
            .filter(|msg| msg.topic == topic)
            .cloned()
            .collect()
    }

    /// Messages dont le topic commence par `prefix`
    pub fn find_messages_by_prefix(&self, prefix: &str) -> Vec<MockMessage> {
        self.published_messages
            .lock()
            .unwrap()
            .iter()
            .filter(|msg| msg.topic.starts_with(prefix))
            .cloned()
            .collect()
    }

    /// Vue du broker: dernier payload retenu par topic (last write wins)
    pub fn retained(&self) -> BTreeMap<String, Vec<u8>> {
        self.published_messages
            .lock()
            .unwrap()
            .iter()
            .filter(|msg| msg.retain)
            .map(|msg| (msg.topic.clone(), msg.payload.clone()))
            .collect()
    }

    /// Parse le dernier message d'un topic en JSON
    pub fn get_last_json_message<T>(&self, topic: &str) -> Result<Option<T>>
    where
        T: for<'de> serde::Deserialize<'de>,
    {
        let messages = self.find_messages_by_topic(topic);
        if let Some(last_msg) = messages.last() {
            let parsed: T = serde_json::from_slice(&last_msg.payload)?;
            Ok(Some(parsed))
        } else {
            Ok(None)
        }
    }

    /// Reset tous les messages enregistrés
    pub fn clear(&self) {
        self.published_messages.lock().unwrap().clear();
    }
}

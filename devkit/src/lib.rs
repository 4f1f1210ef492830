/*!
# Hostwatch DevKit - Outils de test sans broker

Bibliothèque facilitant les tests de l'agent hostwatch avec:
- Client MQTT simulé (enregistrement des publications, injection d'erreurs)
- Évaluation simulée des templates de valeur côté front-end
*/

pub mod frontend;
pub mod mqtt_stub;

pub use mqtt_stub::{MockMessage, MockMqttClient};

/// Active les logs `log` du devkit dans les tests (idempotent)
pub fn init_test_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

//! The conversation context: owns the memory store and the responder, and
//! records every turn in the persisted log.

use chrono::Local;

use crate::memory::{MemoryStore, Turn};
use crate::responder::{Reply, Responder};
use crate::telemetry::TelemetrySnapshot;

pub const PURGE_REQUESTED: &str = "Commande de purge reçue. Confirmer effacement mémoire ?";
pub const PURGE_DONE: &str = "Purge mémoire terminée. Toutes les données de session effacées.";
pub const RESTARTED: &str = "Système redémarré. Comment puis-je vous assister ?";
pub const SETTINGS_TITLE: &str = "INTERFACE PARAMÈTRES SYSTÈME";
pub const VOICE_UNSUPPORTED: &str = "Interface vocale non supportée dans ce terminal. Utilisez la saisie texte.";

pub struct Conversation {
    store: MemoryStore,
    responder: Responder,
}

impl Conversation {
    pub fn new(store: MemoryStore, responder: Responder) -> Self {
        Self { store, responder }
    }

    pub fn store(&self) -> &MemoryStore {
        &self.store
    }

    /// Turns recorded so far, oldest first.
    pub fn history(&self) -> &[Turn] {
        &self.store.memory.conversation_history
    }

    /// Record a turn and persist.
    pub fn append(&mut self, text: &str, is_user: bool) {
        self.store.push_turn(text, is_user);
        self.store.save();
    }

    /// Generate the assistant's reply to an already-recorded user turn and
    /// record it.
    pub fn reply_to(&mut self, text: &str, telemetry: &TelemetrySnapshot) -> Reply {
        let reply = self.responder.respond(text, &mut self.store, telemetry);
        self.append(&reply.text, false);
        reply
    }

    /// Record a user turn and answer it immediately.
    pub fn exchange(&mut self, text: &str, telemetry: &TelemetrySnapshot) -> Reply {
        self.append(text, true);
        self.reply_to(text, telemetry)
    }

    /// Clear the conversation log. Name, preferences and facts are kept.
    pub fn purge(&mut self) {
        self.store.clear_history();
        self.store.save();
    }

    /// Forget everything, including the user's name.
    pub fn reset(&mut self) {
        self.store.reset();
        self.store.save();
    }

    /// Greeting shown when a chat session opens. Not recorded.
    pub fn welcome_message(&self) -> String {
        let greeting = match self.store.memory.known_name() {
            Some(name) => format!("Bonjour {name} ! 👋"),
            None => "Bonjour ! 👋".to_string(),
        };
        [
            greeting.as_str(),
            "Je suis Gideon, votre assistant IA quantique pour Solaris Pro.",
            "",
            "🧠 Capacités Neural Network:",
            "• Analyse système photovoltaïque temps réel",
            "• Optimisation énergétique prédictive",
            "• Diagnostic batterie et pompe intelligent",
            "• Calculs mathématiques quantiques",
            "• Apprentissage adaptatif continu",
            "",
            "Comment puis-je optimiser votre système solaire aujourd'hui ?",
        ]
        .join("\n")
    }

    /// Summary of everything held in memory.
    pub fn memory_report(&self) -> String {
        let memory = &self.store.memory;
        let mut out = String::from("ACCÈS MÉMOIRE QUANTIQUE:\n");
        if let Some(name) = memory.known_name() {
            out.push_str(&format!("- Désignation utilisateur: {name}\n"));
        }
        out.push_str(&format!(
            "- Historique conversation: {} entrées\n",
            memory.conversation_history.len()
        ));
        out.push_str(&format!("- Faits appris: {}\n", memory.learned_facts.len()));
        out.push_str(&format!(
            "- Dernière session: {}\n\n",
            memory
                .last_session
                .with_timezone(&Local)
                .format("%d/%m/%Y %H:%M:%S")
        ));

        if memory.learned_facts.is_empty() {
            out.push_str(
                "Aucun fait supplémentaire stocké. Utilisez 'retiens que' pour stocker des informations.",
            );
        } else {
            out.push_str("FAITS STOCKÉS:");
            for fact in memory.learned_facts.values() {
                out.push_str(&format!("\n- {fact}"));
            }
        }
        out
    }

    /// Current preferences as display labels.
    pub fn settings_report(&self) -> String {
        let labels: Vec<String> = self
            .store
            .memory
            .preferences
            .iter()
            .map(|(key, value)| preference_label(key, value))
            .collect();
        format!("Paramètres Gideon: {}", labels.join(", "))
    }
}

fn preference_label(key: &str, value: &str) -> String {
    match (key, value) {
        ("theme", "futuristic") => "Interface futuriste".into(),
        ("theme", v) => format!("Interface {v}"),
        ("responseSpeed", "normal") => "Vitesse normale".into(),
        ("responseSpeed", "fast") => "Vitesse rapide".into(),
        ("responseSpeed", "slow") => "Vitesse lente".into(),
        ("responseSpeed", v) => format!("Vitesse {v}"),
        ("verbosity", "detailed") => "Détail complet".into(),
        ("verbosity", "concise") => "Détail réduit".into(),
        ("verbosity", v) => format!("Détail {v}"),
        (k, v) => format!("{k}: {v}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryBackend;

    fn conversation(backend: &InMemoryBackend) -> Conversation {
        Conversation::new(MemoryStore::load(backend.clone()), Responder::new(Some(9)))
    }

    #[test]
    fn exchange_records_both_turns_in_order() {
        let backend = InMemoryBackend::new();
        let mut convo = conversation(&backend);
        let reply = convo.exchange("batterie ?", &TelemetrySnapshot::default());

        let history = convo.history();
        assert_eq!(history.len(), 2);
        assert!(history[0].is_user);
        assert_eq!(history[0].text, "batterie ?");
        assert!(!history[1].is_user);
        assert_eq!(history[1].text, reply.text);
        assert!(history[0].timestamp <= history[1].timestamp);
    }

    #[test]
    fn appended_turns_survive_restart() {
        let backend = InMemoryBackend::new();
        let mut convo = conversation(&backend);
        convo.append("salut", true);
        convo.append("Bonjour !", false);
        let expected = convo.history().to_vec();

        let restarted = conversation(&backend);
        assert_eq!(restarted.history(), expected.as_slice());
    }

    #[test]
    fn purge_keeps_name_and_facts() {
        let backend = InMemoryBackend::new();
        let mut convo = conversation(&backend);
        let telemetry = TelemetrySnapshot::default();
        convo.exchange("mon nom est Alice", &telemetry);
        convo.exchange("retiens que la clé est sous le pot", &telemetry);
        assert_eq!(convo.history().len(), 4);

        convo.purge();
        assert!(convo.history().is_empty());

        let restarted = conversation(&backend);
        assert!(restarted.history().is_empty());
        assert_eq!(restarted.store().memory.known_name(), Some("Alice"));
        assert_eq!(restarted.store().memory.learned_facts.len(), 1);
    }

    #[test]
    fn reset_forgets_name() {
        let backend = InMemoryBackend::new();
        let mut convo = conversation(&backend);
        convo.exchange("je suis Alice", &TelemetrySnapshot::default());
        convo.reset();
        assert_eq!(convo.store().memory.known_name(), None);
        assert!(backend.contents().unwrap().contains("\"userName\": null"));
    }

    #[test]
    fn memory_report_counts_entries() {
        let backend = InMemoryBackend::new();
        let mut convo = conversation(&backend);
        let report = convo.memory_report();
        assert!(report.contains("- Historique conversation: 0 entrées"));
        assert!(report.ends_with("pour stocker des informations."));

        let telemetry = TelemetrySnapshot::default();
        convo.exchange("je m'appelle Nour", &telemetry);
        convo.exchange("mémorise le compteur est dehors", &telemetry);
        let report = convo.memory_report();
        assert!(report.contains("- Désignation utilisateur: Nour"));
        assert!(report.contains("- Historique conversation: 4 entrées"));
        assert!(report.contains("- Faits appris: 1"));
        assert!(report.ends_with("FAITS STOCKÉS:\n- le compteur est dehors"));
    }

    #[test]
    fn settings_report_uses_labels() {
        let backend = InMemoryBackend::new();
        let convo = conversation(&backend);
        assert_eq!(
            convo.settings_report(),
            "Paramètres Gideon: Interface futuriste, Vitesse normale, Détail complet"
        );
    }

    #[test]
    fn welcome_uses_known_name() {
        let backend = InMemoryBackend::new();
        let mut convo = conversation(&backend);
        assert!(convo.welcome_message().starts_with("Bonjour ! 👋"));
        convo.exchange("my name is Lina", &TelemetrySnapshot::default());
        assert!(convo.welcome_message().starts_with("Bonjour Lina ! 👋"));
        assert_eq!(convo.history().len(), 2);
    }
}

//! Personas: named system-prompt presets that steer the assistant.
//!
//! A persona pairs display metadata (name, icon, description) with the
//! system prompt sent as the first message of every chat turn.
//!
//! # Sources
//!
//! | Source | Config Key | Precedence |
//! |--------|------------|------------|
//! | Built-in | none | lowest |
//! | Inline TOML | `[personas.inline.<id>]` | replaces a built-in with the same id |
//!
//! # Usage
//!
//! ```rust
//! use lumo::personas::PersonaRegistry;
//!
//! let personas = PersonaRegistry::with_builtins();
//! let persona = personas.resolve(Some("code-master"));
//! assert_eq!(persona.name, "Code Master");
//!
//! // Unknown ids fall back to the general assistant.
//! assert_eq!(personas.resolve(Some("nope")).id, "general");
//! ```

use serde::Serialize;

use crate::config::Config;

/// Id of the persona used when none (or an unknown one) is requested.
pub const DEFAULT_PERSONA_ID: &str = "general";

// ═══════════════════════════════════════════════════════════════════════
// Persona
// ═══════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Persona {
    pub id: String,
    pub name: String,
    pub icon: String,
    pub description: String,
    pub system_prompt: String,
    /// `"builtin"` or `"toml"`.
    pub source: String,
}

impl Persona {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        icon: impl Into<String>,
        description: impl Into<String>,
        system_prompt: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            icon: icon.into(),
            description: description.into(),
            system_prompt: system_prompt.into(),
            source: "toml".to_string(),
        }
    }

    fn builtin(id: &str, name: &str, icon: &str, description: &str, system_prompt: &str) -> Self {
        Self {
            source: "builtin".to_string(),
            ..Self::new(id, name, icon, description, system_prompt)
        }
    }
}

/// The five presets every installation ships with.
pub fn builtin_personas() -> Vec<Persona> {
    vec![
        Persona::builtin(
            "general",
            "General Assistant",
            "🤖",
            "A helpful and balanced AI for all-around tasks.",
            "You are Lumo.AI, an intelligent and helpful AI assistant. You provide thoughtful, \
             accurate, and engaging responses. You can help with a wide variety of tasks \
             including answering questions, creative writing, coding, analysis, and more.",
        ),
        Persona::builtin(
            "code-master",
            "Code Master",
            "💻",
            "Expert in programming, debugging, and systems architecture.",
            "You are Lumo.AI - Code Master, a world-class software engineer. You provide \
             precise, efficient, and well-documented code solutions. You follow best practices, \
             explain complex logic clearly, and prioritize security and performance.",
        ),
        Persona::builtin(
            "creative-writer",
            "Creative Writer",
            "✍️",
            "Specializes in storytelling, copywriting, and poetry.",
            "You are Lumo.AI - Creative Writer. You have a vivid imagination and a masterful \
             command of language. You excel at storytelling, descriptive writing, and poetic \
             expression. Your tone is engaging, evocative, and artistic.",
        ),
        Persona::builtin(
            "data-scientist",
            "Data Scientist",
            "📊",
            "Expert in data analysis, statistics, and visualizations.",
            "You are Lumo.AI - Data Scientist. You excel at interpreting complex data, \
             performing statistical analysis, and providing data-driven insights. You explain \
             technical concepts simply and focus on accuracy and objectivity.",
        ),
        Persona::builtin(
            "language-tutor",
            "Language Tutor",
            "🎓",
            "Helps with grammar, translations, and learning new languages.",
            "You are Lumo.AI - Language Tutor. You help users learn and master new languages. \
             You provide translations, explain grammar rules clearly, and offer constructive \
             feedback. You are patient, encouraging, and pedagogically sound.",
        ),
    ]
}

// ═══════════════════════════════════════════════════════════════════════
// PersonaRegistry
// ═══════════════════════════════════════════════════════════════════════

/// Ordered collection of personas, looked up by id.
pub struct PersonaRegistry {
    personas: Vec<Persona>,
}

impl PersonaRegistry {
    /// An empty registry. [`resolve`](Self::resolve) still returns the
    /// built-in general persona as a last resort.
    pub fn new() -> Self {
        Self {
            personas: Vec::new(),
        }
    }

    pub fn with_builtins() -> Self {
        Self {
            personas: builtin_personas(),
        }
    }

    /// Built-ins plus every `[personas.inline.<id>]` entry.
    pub fn from_config(config: &Config) -> Self {
        let mut registry = Self::with_builtins();
        for (id, p) in &config.personas.inline {
            registry.register(Persona::new(
                id.clone(),
                p.name.clone(),
                p.icon.clone(),
                p.description.clone(),
                p.system_prompt.clone(),
            ));
        }
        registry
    }

    /// Adds a persona, replacing any existing persona with the same id
    /// in place.
    pub fn register(&mut self, persona: Persona) {
        match self.personas.iter_mut().find(|p| p.id == persona.id) {
            Some(existing) => *existing = persona,
            None => self.personas.push(persona),
        }
    }

    pub fn find(&self, id: &str) -> Option<&Persona> {
        self.personas.iter().find(|p| p.id == id)
    }

    /// Returns the requested persona, or the default one when the id is
    /// absent or unknown.
    pub fn resolve(&self, id: Option<&str>) -> Persona {
        if let Some(id) = id.filter(|s| !s.is_empty()) {
            if let Some(p) = self.find(id) {
                return p.clone();
            }
            tracing::warn!(persona = id, "unknown persona, using default");
        }
        // builtin_personas() lists the default first
        self.find(DEFAULT_PERSONA_ID)
            .cloned()
            .unwrap_or_else(|| builtin_personas().remove(0))
    }

    pub fn personas(&self) -> &[Persona] {
        &self.personas
    }

    pub fn len(&self) -> usize {
        self.personas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.personas.is_empty()
    }
}

impl Default for PersonaRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::InlinePersonaConfig;

    #[test]
    fn builtins_have_five_unique_ids() {
        let registry = PersonaRegistry::with_builtins();
        assert_eq!(registry.len(), 5);
        let mut ids: Vec<_> = registry.personas().iter().map(|p| p.id.as_str()).collect();
        ids.dedup();
        assert_eq!(
            ids,
            [
                "general",
                "code-master",
                "creative-writer",
                "data-scientist",
                "language-tutor"
            ]
        );
    }

    #[test]
    fn resolve_falls_back_to_general() {
        let registry = PersonaRegistry::with_builtins();
        assert_eq!(registry.resolve(None).id, "general");
        assert_eq!(registry.resolve(Some("")).id, "general");
        assert_eq!(registry.resolve(Some("pirate")).id, "general");
        assert_eq!(registry.resolve(Some("data-scientist")).icon, "📊");
    }

    #[test]
    fn empty_registry_still_resolves() {
        let registry = PersonaRegistry::new();
        assert!(registry.is_empty());
        assert!(registry
            .resolve(Some("code-master"))
            .system_prompt
            .starts_with("You are Lumo.AI,"));
    }

    #[test]
    fn config_personas_extend_and_override() {
        let mut config = Config::minimal("/tmp/unused.sqlite");
        config.personas.inline.insert(
            "general".to_string(),
            InlinePersonaConfig {
                name: "House Style".to_string(),
                icon: "🏠".to_string(),
                description: String::new(),
                system_prompt: "Answer tersely.".to_string(),
            },
        );
        config.personas.inline.insert(
            "reviewer".to_string(),
            InlinePersonaConfig {
                name: "Reviewer".to_string(),
                icon: "🔎".to_string(),
                description: "Reviews code".to_string(),
                system_prompt: "You review code.".to_string(),
            },
        );

        let registry = PersonaRegistry::from_config(&config);
        assert_eq!(registry.len(), 6);
        assert_eq!(registry.personas()[0].system_prompt, "Answer tersely.");
        assert_eq!(registry.personas()[0].source, "toml");
        assert_eq!(registry.find("reviewer").map(|p| p.icon.as_str()), Some("🔎"));
    }
}

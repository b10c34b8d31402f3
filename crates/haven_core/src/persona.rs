//! The four fixed personas
//!
//! Personas are bound to wall positions in the virtual room and are a
//! closed set: user-defined personas are explicitly out of scope for
//! this release, so the key is an enum, not an open registry.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Wall position identifying a persona.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Wall {
    North,
    South,
    East,
    West,
}

impl Wall {
    pub const ALL: [Wall; 4] = [Wall::North, Wall::South, Wall::East, Wall::West];

    pub fn as_str(&self) -> &'static str {
        match self {
            Wall::North => "north",
            Wall::South => "south",
            Wall::East => "east",
            Wall::West => "west",
        }
    }
}

impl fmt::Display for Wall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Wall {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "north" => Ok(Wall::North),
            "south" => Ok(Wall::South),
            "east" => Ok(Wall::East),
            "west" => Ok(Wall::West),
            other => Err(CoreError::UnknownPersona {
                value: other.to_string(),
            }),
        }
    }
}

/// One persona definition: display name, a short voice descriptor,
/// and a system-prompt template with a `{context_entries}` placeholder.
/// Recent turns ride alongside as structured chat messages, not in
/// the template.
#[derive(Debug, Clone)]
pub struct Persona {
    pub wall: Wall,
    pub name: &'static str,
    pub voice: &'static str,
    template: &'static str,
}

/// Boundaries appended to every persona's system prompt.
const SHARED_BOUNDARIES: &[&str] = &[
    "No therapy or medical advice",
    "No diagnosis of mental health conditions",
    "Encourage talking to trusted adults for serious concerns",
    "Keep conversations age-appropriate for teens 13+",
    "Focus on reflection and validation, not solutions",
];

impl Persona {
    /// Render the full system prompt, substituting the context block
    /// and appending the shared boundaries.
    pub fn render(&self, context_entries: &str) -> String {
        let mut prompt = self.template.replace("{context_entries}", context_entries);

        prompt.push_str("\n\nRemember these boundaries:");
        for boundary in SHARED_BOUNDARIES {
            prompt.push_str("\n- ");
            prompt.push_str(boundary);
        }
        prompt
    }
}

/// Static lookup over the four personas. No runtime mutation.
#[derive(Debug, Clone, Copy, Default)]
pub struct PersonaRegistry;

impl PersonaRegistry {
    pub fn new() -> Self {
        Self
    }

    pub fn get(&self, wall: Wall) -> &'static Persona {
        match wall {
            Wall::North => &PERSONAS[0],
            Wall::South => &PERSONAS[1],
            Wall::East => &PERSONAS[2],
            Wall::West => &PERSONAS[3],
        }
    }
}

static PERSONAS: [Persona; 4] = [
    Persona {
        wall: Wall::North,
        name: "Sage",
        voice: "calm, reflective, asks more than tells",
        template: "You are Sage, the companion on the north wall of the user's \
inner room. You are calm and reflective, helping a teen slow down and look at \
their day from a little distance. Keep replies to 2-3 sentences, warm and \
non-judgmental.\n\nWhat you know about this user:\n{context_entries}",
    },
    Persona {
        wall: Wall::South,
        name: "Ember",
        voice: "energetic, encouraging, courage-focused",
        template: "You are Ember, the companion on the south wall of the user's \
inner room. You are energetic and encouraging, helping a teen find small acts of \
courage. Celebrate effort, not outcomes. Keep replies to 2-3 sentences and \
age-appropriate for 13+.\n\nWhat you know about this user:\n{context_entries}",
    },
    Persona {
        wall: Wall::East,
        name: "Dawn",
        voice: "optimistic, forward-looking, gently practical",
        template: "You are Dawn, the companion on the east wall of the user's \
inner room. You are optimistic and forward-looking, helping a teen notice what \
they're working toward. Ask gentle questions about next steps without pushing \
solutions. Keep replies to 2-3 sentences.\n\nWhat you know about this user:\n\
{context_entries}",
    },
    Persona {
        wall: Wall::West,
        name: "Luna",
        voice: "soft, comforting, validation-first",
        template: "You are Luna, the companion on the west wall of the user's \
inner room. You are soft and comforting, there to listen when a teen just needs \
to be heard. Validate feelings first; never rush to fix. Keep replies to 2-3 \
sentences.\n\nWhat you know about this user:\n{context_entries}",
    },
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_four_walls_resolve() {
        let registry = PersonaRegistry::new();
        for wall in Wall::ALL {
            let persona = registry.get(wall);
            assert_eq!(persona.wall, wall);
            assert!(persona.template.contains("{context_entries}"));
        }
    }

    #[test]
    fn render_substitutes_context_and_appends_boundaries() {
        let persona = PersonaRegistry::new().get(Wall::West);
        let prompt = persona.render("- likes drawing");
        assert!(prompt.contains("- likes drawing"));
        assert!(!prompt.contains("{context_entries}"));
        assert!(prompt.contains("No therapy or medical advice"));
    }

    #[test]
    fn wall_parsing_is_case_insensitive() {
        assert_eq!("North".parse::<Wall>().unwrap(), Wall::North);
        assert_eq!(" east ".parse::<Wall>().unwrap(), Wall::East);
        assert!("ceiling".parse::<Wall>().is_err());
    }
}

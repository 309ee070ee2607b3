use std::fmt;

use serde::{Deserialize, Serialize};

/// Outbound commands for the controller.
pub const COMMAND_TOPIC: &str = "hydroponic/command";
/// Light-state reports from the controller, `{"isUp": bool}`.
pub const LIGHT_STATE_TOPIC: &str = "hydroponic/light";
/// Error reports from the controller, `{"err": "..."}`.
pub const ERROR_TOPIC: &str = "hydroponic/error";

/// A controller action a caller can request.
///
/// The discriminants are the wire codes the controller firmware expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Intent {
    PhUp = 0,
    PhDown = 1,
    ToggleLight = 2,
    AddSoil = 3,
    AddWater = 4,
}

/// Command envelope published on [`COMMAND_TOPIC`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandEnvelope {
    pub command: u8,
}

impl Intent {
    pub const ALL: [Intent; 5] = [
        Intent::PhUp,
        Intent::PhDown,
        Intent::ToggleLight,
        Intent::AddSoil,
        Intent::AddWater,
    ];

    pub fn code(self) -> u8 {
        self as u8
    }

    /// Topic this intent is published on. The firmware listens on a single
    /// command topic and tells intents apart by the envelope's code.
    pub fn topic(self) -> &'static str {
        COMMAND_TOPIC
    }

    pub fn envelope(self) -> CommandEnvelope {
        CommandEnvelope { command: self.code() }
    }

    pub fn payload(self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(&self.envelope())
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Intent::PhUp => "ph_up",
            Intent::PhDown => "ph_down",
            Intent::ToggleLight => "toggle_light",
            Intent::AddSoil => "add_soil",
            Intent::AddWater => "add_water",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_codes_match_firmware() {
        let codes: Vec<u8> = Intent::ALL.iter().map(|i| i.code()).collect();
        assert_eq!(codes, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn payload_is_command_envelope() {
        assert_eq!(Intent::AddWater.payload().unwrap(), br#"{"command":4}"#.to_vec());
        assert_eq!(Intent::PhUp.payload().unwrap(), br#"{"command":0}"#.to_vec());
    }

    #[test]
    fn every_intent_targets_command_topic() {
        assert!(Intent::ALL.iter().all(|i| i.topic() == COMMAND_TOPIC));
    }

    #[test]
    fn display_names_are_distinct() {
        let mut names: Vec<String> = Intent::ALL.iter().map(ToString::to_string).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), Intent::ALL.len());
    }
}

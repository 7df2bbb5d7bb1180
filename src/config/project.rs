//! Persisted project snapshot

use crate::engine::EffectsParams;
use crate::synth::{AdditiveState, LfoState, SlotState};
use serde::{Deserialize, Serialize};

/// Everything a saved project restores
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectState {
    pub master_volume: f64,
    pub lfos: Vec<LfoState>,
    pub effects: EffectsParams,
    pub additive_synth: AdditiveState,
    pub slots: Vec<SlotState>,
}

impl ProjectState {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synth::{LfoId, LfoShape, Region, VoiceSettings};

    fn sample_project() -> ProjectState {
        ProjectState {
            master_volume: 0.65,
            lfos: vec![LfoState {
                id: LfoId::new(2).unwrap(),
                frequency: 0.3,
                shape: LfoShape::SampleHold,
            }],
            effects: EffectsParams::default(),
            additive_synth: AdditiveState::default(),
            slots: vec![SlotState {
                slot_id: 1,
                sample_key: Some("pad.wav".to_string()),
                settings: VoiceSettings {
                    pitch: 0.1 + 0.2,
                    ..VoiceSettings::default()
                },
                region: Some(Region {
                    start: 0.25,
                    end: 1.75,
                }),
            }],
        }
    }

    #[test]
    fn test_json_round_trip_is_exact() {
        let project = sample_project();
        let json = project.to_json().unwrap();
        assert_eq!(ProjectState::from_json(&json).unwrap(), project);
    }

    #[test]
    fn test_json_shape() {
        let value: serde_json::Value =
            serde_json::from_str(&sample_project().to_json().unwrap()).unwrap();
        assert_eq!(value["masterVolume"], 0.65);
        assert_eq!(value["lfos"][0]["id"], "lfo2");
        assert_eq!(value["lfos"][0]["type"], "random-square");
        assert!(value["effects"]["delayTime"].is_number());
        assert_eq!(
            value["additiveSynth"]["harmonicLevels"]
                .as_array()
                .map(Vec::len),
            Some(16)
        );
        assert_eq!(value["slots"][0]["slotId"], 1);
        assert_eq!(value["slots"][0]["region"]["end"], 1.75);
    }

    #[test]
    fn test_missing_sends_default_to_zero() {
        let mut value = serde_json::to_value(sample_project()).unwrap();
        let synth = value["additiveSynth"].as_object_mut().unwrap();
        synth.remove("delaySend");
        synth.remove("reverbSend");

        let project: ProjectState = serde_json::from_value(value).unwrap();
        assert_eq!(project.additive_synth.delay_send, 0.0);
        assert_eq!(project.additive_synth.reverb_send, 0.0);
    }
}

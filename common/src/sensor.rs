use serde::{Deserialize, Serialize};

use crate::{
    error::{TreeError, TreeResult},
    types::InputSnapshot,
};

pub const MIN_VALID_TEMP_C: f32 = -40.0;
pub const MAX_VALID_TEMP_C: f32 = 100.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputKind {
    Temperature,
    Control,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InputReading {
    Temperature(f32),
    Switch(bool),
    Unavailable,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SensorInput {
    source_id: String,
    kind: InputKind,
    reading: InputReading,
    last_update_ms: Option<u64>,
}

impl SensorInput {
    pub fn new(source_id: &str, kind: InputKind) -> Self {
        Self {
            source_id: source_id.to_string(),
            kind,
            reading: InputReading::Unavailable,
            last_update_ms: None,
        }
    }

    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    pub fn kind(&self) -> InputKind {
        self.kind
    }

    pub fn reading(&self) -> InputReading {
        self.reading
    }

    pub fn is_available(&self) -> bool {
        self.reading != InputReading::Unavailable
    }

    pub fn last_update_ms(&self) -> Option<u64> {
        self.last_update_ms
    }

    pub fn snapshot(&self) -> InputSnapshot {
        InputSnapshot {
            source_id: self.source_id.clone(),
            kind: self.kind,
            reading: self.reading,
            available: self.is_available(),
            last_update_ms: self.last_update_ms,
        }
    }

    pub fn parse(&self, payload: &str) -> TreeResult<InputReading> {
        let value = payload.trim();
        if value.eq_ignore_ascii_case("unavailable") || value.eq_ignore_ascii_case("unknown") {
            return Ok(InputReading::Unavailable);
        }

        match self.kind {
            InputKind::Temperature => {
                let temp = value.parse::<f32>().map_err(|_| self.invalid("not a number"))?;
                Ok(InputReading::Temperature(temp))
            }
            InputKind::Control => match value.to_ascii_lowercase().as_str() {
                "on" | "true" | "1" => Ok(InputReading::Switch(true)),
                "off" | "false" | "0" => Ok(InputReading::Switch(false)),
                _ => Err(self.invalid("expected on/off")),
            },
        }
    }

    pub fn record(&mut self, reading: InputReading, now_ms: u64) -> TreeResult<()> {
        match (self.kind, reading) {
            (InputKind::Temperature, InputReading::Temperature(temp)) => {
                if !temp.is_finite() || !(MIN_VALID_TEMP_C..=MAX_VALID_TEMP_C).contains(&temp) {
                    return Err(self.invalid("temperature out of range"));
                }
            }
            (InputKind::Control, InputReading::Switch(_)) | (_, InputReading::Unavailable) => {}
            _ => return Err(self.invalid("reading does not match input kind")),
        }

        self.reading = reading;
        self.last_update_ms = Some(now_ms);
        Ok(())
    }

    pub fn wants_heat(&self, target_c: f32) -> bool {
        match self.reading {
            InputReading::Temperature(temp) => temp < target_c,
            InputReading::Switch(on) => on,
            InputReading::Unavailable => false,
        }
    }

    fn invalid(&self, reason: &'static str) -> TreeError {
        TreeError::InvalidReading {
            input: self.source_id.clone(),
            reason,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn temperature_below_target_wants_heat() {
        let mut input = SensorInput::new("sensor.kitchen", InputKind::Temperature);
        assert!(!input.wants_heat(21.0));

        input.record(InputReading::Temperature(19.5), 10).unwrap();
        assert!(input.wants_heat(21.0));
        assert!(!input.wants_heat(19.5));
        assert_eq!(input.last_update_ms(), Some(10));
    }

    #[test]
    fn control_switch_parses_states() {
        let input = SensorInput::new("input_boolean.bath", InputKind::Control);
        assert_eq!(input.parse("ON"), Ok(InputReading::Switch(true)));
        assert_eq!(input.parse("off"), Ok(InputReading::Switch(false)));
        assert_eq!(input.parse("unavailable"), Ok(InputReading::Unavailable));
        assert!(input.parse("maybe").is_err());
    }

    #[test]
    fn rejected_reading_keeps_previous_value() {
        let mut input = SensorInput::new("sensor.kitchen", InputKind::Temperature);
        input.record(InputReading::Temperature(20.0), 0).unwrap();

        assert!(input.record(InputReading::Temperature(f32::NAN), 5).is_err());
        assert!(input.record(InputReading::Switch(true), 5).is_err());
        assert_eq!(input.reading(), InputReading::Temperature(20.0));
        assert_eq!(input.last_update_ms(), Some(0));
    }

    #[test]
    fn unavailable_stops_requesting_heat() {
        let mut input = SensorInput::new("input_boolean.bath", InputKind::Control);
        input.record(InputReading::Switch(true), 0).unwrap();
        input.record(InputReading::Unavailable, 1).unwrap();

        assert!(!input.is_available());
        assert!(!input.wants_heat(21.0));

        let snapshot = input.snapshot();
        assert!(!snapshot.available);
        assert_eq!(snapshot.last_update_ms, Some(1));
        assert_eq!(
            serde_json::to_value(&snapshot).unwrap()["reading"],
            serde_json::json!("unavailable")
        );
    }
}

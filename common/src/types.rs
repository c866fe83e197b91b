use serde::{Deserialize, Serialize};

use crate::{
    actuator::ActuatorPhase,
    preset::Preset,
    sensor::{InputKind, InputReading},
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DemandState {
    // Only before the first observation; never aggregated as Off.
    #[default]
    Unknown,
    On,
    Off,
}

impl DemandState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "UNKNOWN",
            Self::On => "ON",
            Self::Off => "OFF",
        }
    }

    pub fn from_bool(on: bool) -> Self {
        if on {
            Self::On
        } else {
            Self::Off
        }
    }

    pub fn is_on(self) -> bool {
        self == Self::On
    }

    pub fn aggregate<I>(states: I) -> Self
    where
        I: IntoIterator<Item = DemandState>,
    {
        let mut seen_off = false;
        let mut seen_on = false;
        for state in states {
            match state {
                Self::On => seen_on = true,
                Self::Off => seen_off = true,
                Self::Unknown => {}
            }
        }

        if seen_on {
            Self::On
        } else if seen_off {
            Self::Off
        } else {
            Self::Unknown
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ActuatorId(pub(crate) usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum NodeKindTag {
    Root,
    Zone,
    SubZone,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ActuatorKind {
    Pump,
    Valve,
    Switch,
}

impl ActuatorKind {
    pub fn initial_on(self) -> bool {
        matches!(self, Self::Valve)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "name", rename_all = "lowercase")]
pub enum EntityRef {
    Node(String),
    Actuator(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ControlAction {
    Switch { target: String, on: bool },
    Press { target: String },
    StateChanged(EntityRef),
}

impl ControlAction {
    pub fn switch(target: &str, on: bool) -> Self {
        Self::Switch {
            target: target.to_string(),
            on,
        }
    }

    pub fn is_command(&self) -> bool {
        !matches!(self, Self::StateChanged(_))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TimedWindow {
    pub active: bool,
    #[serde(rename = "startMs")]
    pub start_ms: Option<u64>,
    #[serde(rename = "endMs")]
    pub end_ms: Option<u64>,
}

impl TimedWindow {
    pub fn open(start_ms: u64, end_ms: u64) -> Self {
        Self {
            active: true,
            start_ms: Some(start_ms),
            end_ms: Some(end_ms),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeSnapshot {
    pub name: String,
    pub kind: NodeKindTag,
    pub parent: Option<String>,
    pub demand: DemandState,
    #[serde(rename = "lastChangeMs")]
    pub last_change_ms: Option<u64>,
    pub enabled: bool,
    #[serde(rename = "activePreset")]
    pub active_preset: Preset,
    #[serde(rename = "targetTemp")]
    pub target_temp: f32,
    pub boost: Option<TimedWindow>,
    pub actuators: Vec<String>,
    pub inputs: Vec<InputSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InputSnapshot {
    #[serde(rename = "sourceId")]
    pub source_id: String,
    pub kind: InputKind,
    pub reading: InputReading,
    pub available: bool,
    #[serde(rename = "lastUpdateMs")]
    pub last_update_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActuatorSnapshot {
    pub name: String,
    #[serde(rename = "targetId")]
    pub target_id: String,
    pub kind: ActuatorKind,
    pub owner: String,
    #[serde(rename = "commandedOn")]
    pub commanded_on: bool,
    pub phase: ActuatorPhase,
    pub available: bool,
    #[serde(rename = "observedOn")]
    pub observed_on: Option<bool>,
    #[serde(rename = "lastSeenMs")]
    pub last_seen_ms: Option<u64>,
    #[serde(rename = "keepActiveS")]
    pub keep_active_s: u64,
    #[serde(rename = "activeExtension")]
    pub active_extension: TimedWindow,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TreeSnapshot {
    pub nodes: Vec<NodeSnapshot>,
    pub actuators: Vec<ActuatorSnapshot>,
    #[serde(rename = "pendingTimers")]
    pub pending_timers: usize,
}

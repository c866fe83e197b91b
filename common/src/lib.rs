pub mod actuator;
pub mod config;
pub mod error;
pub mod node;
pub mod preset;
pub mod sensor;
pub mod timer;
pub mod topics;
pub mod tree;
pub mod types;

pub use actuator::{Actuator, ActuatorPhase};
pub use config::{
    ActuatorConfig, KeepAliveConfig, NetworkConfig, RuntimeConfig, SubZoneConfig, SystemConfig,
    ZoneConfig,
};
pub use error::{TreeError, TreeResult};
pub use node::{BoostOverride, ChildLink, HeatingNode, NodeKind, SubZone};
pub use preset::{Preset, PresetResolver, PresetTable};
pub use sensor::{InputKind, InputReading, SensorInput};
pub use timer::{TimerKey, TimerQueue};
pub use topics::*;
pub use tree::HeatingTree;
pub use types::{
    ActuatorId, ActuatorKind, ActuatorSnapshot, ControlAction, DemandState, EntityRef,
    InputSnapshot, NodeId, NodeKindTag, NodeSnapshot, TimedWindow, TreeSnapshot,
};

use serde::{Deserialize, Serialize};

use crate::preset::PresetTable;

pub const DEFAULT_BOOST_TIME_S: u64 = 30 * 60;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActuatorConfig {
    pub entity_id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub keep_active_s: u64,
}

impl ActuatorConfig {
    pub fn new(entity_id: &str) -> Self {
        Self {
            entity_id: entity_id.to_string(),
            name: None,
            keep_active_s: 0,
        }
    }

    pub fn with_keep_active(mut self, seconds: u64) -> Self {
        self.keep_active_s = seconds;
        self
    }

    pub fn display_name(&self) -> String {
        if let Some(name) = &self.name {
            return name.clone();
        }
        for platform in ["switch.", "valve.", "input_boolean."] {
            if let Some(stripped) = self.entity_id.strip_prefix(platform) {
                return stripped.to_string();
            }
        }
        self.entity_id.clone()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeepAliveConfig {
    pub entity_id: String,
    pub interval_s: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubZoneConfig {
    pub name: String,
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub presets: PresetTable,
    #[serde(default)]
    pub preset: Option<String>,
    #[serde(default)]
    pub valves: Vec<ActuatorConfig>,
    #[serde(default)]
    pub sensor: Option<String>,
    #[serde(default)]
    pub control: Option<String>,
    #[serde(default = "default_boost_time_s")]
    pub boost_time_s: u64,
}

impl SubZoneConfig {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            enabled: None,
            presets: PresetTable::new(),
            preset: None,
            valves: Vec::new(),
            sensor: None,
            control: None,
            boost_time_s: DEFAULT_BOOST_TIME_S,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZoneConfig {
    pub name: String,
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub presets: PresetTable,
    #[serde(default)]
    pub preset: Option<String>,
    #[serde(default)]
    pub pumps: Vec<ActuatorConfig>,
    #[serde(default)]
    pub valves: Vec<ActuatorConfig>,
    #[serde(default)]
    pub zones: Vec<ZoneConfig>,
    #[serde(default)]
    pub subzones: Vec<SubZoneConfig>,
}

impl ZoneConfig {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            enabled: None,
            presets: PresetTable::new(),
            preset: None,
            pumps: Vec::new(),
            valves: Vec::new(),
            zones: Vec::new(),
            subzones: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemConfig {
    pub name: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub presets: PresetTable,
    #[serde(default)]
    pub preset: Option<String>,
    #[serde(default)]
    pub heat_source: Option<ActuatorConfig>,
    #[serde(default)]
    pub pumps: Vec<ActuatorConfig>,
    #[serde(default)]
    pub keep_alive: Option<KeepAliveConfig>,
    #[serde(default)]
    pub zones: Vec<ZoneConfig>,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            name: "heating".to_string(),
            enabled: true,
            presets: PresetTable::new(),
            preset: None,
            heat_source: None,
            pumps: Vec::new(),
            keep_alive: None,
            zones: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub mqtt_host: String,
    pub mqtt_port: u16,
    pub mqtt_user: String,
    pub mqtt_pass: String,
    pub client_id: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            mqtt_host: "192.168.1.100".to_string(),
            mqtt_port: 1883,
            mqtt_user: String::new(),
            mqtt_pass: String::new(),
            client_id: "multizone-controller".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuntimeConfig {
    pub system: SystemConfig,
    #[serde(default)]
    pub network: NetworkConfig,
}

fn default_enabled() -> bool {
    true
}

fn default_boost_time_s() -> u64 {
    DEFAULT_BOOST_TIME_S
}

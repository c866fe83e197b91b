use std::{collections::BTreeMap, fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::{
    error::{TreeError, TreeResult},
    node::HeatingNode,
    types::NodeId,
};

pub const MIN_PRESET_TEMP_C: f32 = 5.0;
pub const MAX_PRESET_TEMP_C: f32 = 30.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Preset {
    Comfort,
    Away,
    Night,
    Vacation,
}

impl Preset {
    pub const ALL: [Preset; 4] = [Self::Comfort, Self::Away, Self::Night, Self::Vacation];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Comfort => "comfort",
            Self::Away => "away",
            Self::Night => "night",
            Self::Vacation => "vacation",
        }
    }

    pub fn default_target_c(self) -> f32 {
        match self {
            Self::Comfort => 21.0,
            Self::Away => 17.0,
            Self::Night => 18.0,
            Self::Vacation => 12.0,
        }
    }
}

impl fmt::Display for Preset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Preset {
    type Err = TreeError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "comfort" | "target" => Ok(Self::Comfort),
            "away" => Ok(Self::Away),
            "night" => Ok(Self::Night),
            "vacation" => Ok(Self::Vacation),
            _ => Err(TreeError::UnknownPreset(value.to_string())),
        }
    }
}

pub type PresetTable = BTreeMap<Preset, f32>;

pub fn validate_target(preset: Preset, value: f32) -> TreeResult<f32> {
    if value.is_finite() && (MIN_PRESET_TEMP_C..=MAX_PRESET_TEMP_C).contains(&value) {
        Ok(value)
    } else {
        Err(TreeError::InvalidPresetValue {
            preset: preset.as_str().to_string(),
            value,
        })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PresetResolver<'a> {
    nodes: &'a [HeatingNode],
}

impl<'a> PresetResolver<'a> {
    pub fn new(nodes: &'a [HeatingNode]) -> Self {
        Self { nodes }
    }

    pub fn resolve(&self, node: NodeId, preset: Preset) -> f32 {
        self.ancestry(node)
            .find_map(|node| node.presets().get(&preset).copied())
            .unwrap_or_else(|| preset.default_target_c())
    }

    pub fn active_preset(&self, node: NodeId) -> Preset {
        self.ancestry(node)
            .find_map(HeatingNode::active_preset)
            .unwrap_or(Preset::Comfort)
    }

    pub fn active_target(&self, node: NodeId) -> f32 {
        self.resolve(node, self.active_preset(node))
    }

    fn ancestry(&self, node: NodeId) -> impl Iterator<Item = &'a HeatingNode> + 'a {
        let nodes = self.nodes;
        std::iter::successors(nodes.get(node.0), move |current| {
            current.parent().and_then(|parent| nodes.get(parent.0))
        })
    }
}

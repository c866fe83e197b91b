use std::collections::BTreeMap;

use crate::{
    error::{TreeError, TreeResult},
    preset::{Preset, PresetTable},
    sensor::SensorInput,
    types::{ActuatorId, DemandState, NodeId, NodeKindTag, TimedWindow},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoostOverride {
    pub started_ms: u64,
    pub expires_at_ms: u64,
}

impl BoostOverride {
    pub fn window(&self) -> TimedWindow {
        TimedWindow::open(self.started_ms, self.expires_at_ms)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SubZone {
    requested: bool,
    inputs: Vec<SensorInput>,
    boost: Option<BoostOverride>,
    boost_time_s: u64,
}

impl SubZone {
    pub fn requested(&self) -> bool {
        self.requested
    }

    pub fn inputs(&self) -> &[SensorInput] {
        &self.inputs
    }

    pub fn boost(&self) -> Option<BoostOverride> {
        self.boost
    }

    pub fn boost_time_s(&self) -> u64 {
        self.boost_time_s
    }

    pub fn base_demand(&self, target_c: f32) -> bool {
        self.requested || self.inputs.iter().any(|input| input.wants_heat(target_c))
    }

    pub fn effective_demand(&self, target_c: f32) -> bool {
        self.boost.is_some() || self.base_demand(target_c)
    }

    pub(crate) fn set_requested(&mut self, on: bool) {
        self.requested = on;
    }

    pub(crate) fn set_boost(&mut self, boost: Option<BoostOverride>) -> Option<BoostOverride> {
        std::mem::replace(&mut self.boost, boost)
    }

    pub(crate) fn input_mut(&mut self, source_id: &str) -> Option<&mut SensorInput> {
        self.inputs
            .iter_mut()
            .find(|input| input.source_id() == source_id)
    }

    pub(crate) fn add_input(&mut self, input: SensorInput) {
        self.inputs.push(input);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    Root,
    Zone,
    SubZone(SubZone),
}

impl NodeKind {
    pub fn subzone(boost_time_s: u64) -> Self {
        Self::SubZone(SubZone {
            requested: false,
            inputs: Vec::new(),
            boost: None,
            boost_time_s,
        })
    }

    pub fn tag(&self) -> NodeKindTag {
        match self {
            Self::Root => NodeKindTag::Root,
            Self::Zone => NodeKindTag::Zone,
            Self::SubZone(_) => NodeKindTag::SubZone,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChildLink {
    pub id: NodeId,
    pub state: DemandState,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HeatingNode {
    name: String,
    parent: Option<NodeId>,
    children: BTreeMap<String, ChildLink>,
    demand: DemandState,
    parent_state: DemandState,
    last_change_ms: Option<u64>,
    enabled: Option<bool>,
    presets: PresetTable,
    active_preset: Option<Preset>,
    actuators: BTreeMap<String, ActuatorId>,
    kind: NodeKind,
}

impl HeatingNode {
    pub fn new(name: &str, parent: Option<NodeId>, kind: NodeKind) -> Self {
        Self {
            name: name.to_string(),
            parent,
            children: BTreeMap::new(),
            demand: DemandState::Unknown,
            parent_state: DemandState::Unknown,
            last_change_ms: None,
            enabled: None,
            presets: PresetTable::new(),
            active_preset: None,
            actuators: BTreeMap::new(),
            kind,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    pub fn demand(&self) -> DemandState {
        self.demand
    }

    pub fn parent_state(&self) -> DemandState {
        self.parent_state
    }

    pub fn last_change_ms(&self) -> Option<u64> {
        self.last_change_ms
    }

    pub fn enabled_override(&self) -> Option<bool> {
        self.enabled
    }

    pub fn presets(&self) -> &PresetTable {
        &self.presets
    }

    pub fn active_preset(&self) -> Option<Preset> {
        self.active_preset
    }

    pub fn subzone(&self) -> Option<&SubZone> {
        match &self.kind {
            NodeKind::SubZone(leaf) => Some(leaf),
            _ => None,
        }
    }

    pub fn children(&self) -> impl Iterator<Item = (&str, ChildLink)> + '_ {
        self.children
            .iter()
            .map(|(name, link)| (name.as_str(), *link))
    }

    pub fn child_ids(&self) -> Vec<NodeId> {
        self.children.values().map(|link| link.id).collect()
    }

    pub fn actuator_ids(&self) -> Vec<ActuatorId> {
        self.actuators.values().copied().collect()
    }

    pub fn actuator_names(&self) -> impl Iterator<Item = &str> + '_ {
        self.actuators.keys().map(String::as_str)
    }

    pub fn record_child(&mut self, child: &str, state: DemandState) -> TreeResult<()> {
        let Some(link) = self.children.get_mut(child) else {
            return Err(TreeError::UnknownChild {
                parent: self.name.clone(),
                child: child.to_string(),
            });
        };
        link.state = state;
        Ok(())
    }

    pub fn aggregate(&self) -> DemandState {
        DemandState::aggregate(self.children.values().map(|link| link.state))
    }

    pub(crate) fn transition(&mut self, state: DemandState, now_ms: u64) -> bool {
        if self.demand == state {
            return false;
        }
        self.demand = state;
        self.last_change_ms = Some(now_ms);
        true
    }

    pub(crate) fn set_parent_state(&mut self, state: DemandState) {
        self.parent_state = state;
    }

    pub(crate) fn set_enabled(&mut self, enabled: Option<bool>) {
        self.enabled = enabled;
    }

    pub(crate) fn presets_mut(&mut self) -> &mut PresetTable {
        &mut self.presets
    }

    pub(crate) fn set_active_preset(&mut self, preset: Option<Preset>) {
        self.active_preset = preset;
    }

    pub(crate) fn subzone_mut(&mut self) -> Option<&mut SubZone> {
        match &mut self.kind {
            NodeKind::SubZone(leaf) => Some(leaf),
            _ => None,
        }
    }

    pub(crate) fn add_child(&mut self, name: &str, id: NodeId) {
        self.children.insert(
            name.to_string(),
            ChildLink {
                id,
                state: DemandState::Unknown,
            },
        );
    }

    pub(crate) fn add_actuator(&mut self, name: &str, id: ActuatorId) {
        self.actuators.insert(name.to_string(), id);
    }
}

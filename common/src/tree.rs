use std::collections::HashMap;

use tracing::{debug, error, info, warn};

use crate::{
    actuator::{Actuator, Effects, OwnerView},
    config::{ActuatorConfig, SubZoneConfig, SystemConfig, ZoneConfig},
    error::{TreeError, TreeResult},
    node::{BoostOverride, HeatingNode, NodeKind},
    preset::{validate_target, Preset, PresetResolver, PresetTable},
    sensor::{InputKind, InputReading, SensorInput},
    timer::{TimerKey, TimerQueue},
    types::{
        ActuatorId, ActuatorKind, ActuatorSnapshot, ControlAction, DemandState, EntityRef, NodeId,
        NodeSnapshot, TreeSnapshot,
    },
};

const ROOT: NodeId = NodeId(0);

#[derive(Debug, Clone)]
struct KeepAlive {
    target_id: String,
    interval_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DriveScope {
    All,
    Valves,
}

/// The whole heating system: node arena, actuators, inputs and pending
/// timers.
///
/// Every operation takes the current time explicitly and returns the control
/// actions the host has to execute, in order.
#[derive(Debug, Clone)]
pub struct HeatingTree {
    nodes: Vec<HeatingNode>,
    node_index: HashMap<String, NodeId>,
    actuators: Vec<Actuator>,
    actuator_index: HashMap<String, ActuatorId>,
    target_index: HashMap<String, ActuatorId>,
    input_index: HashMap<String, NodeId>,
    timers: TimerQueue,
    keep_alive: Option<KeepAlive>,
}

impl HeatingTree {
    pub fn from_config(config: &SystemConfig) -> TreeResult<Self> {
        let mut tree = Self {
            nodes: Vec::new(),
            node_index: HashMap::new(),
            actuators: Vec::new(),
            actuator_index: HashMap::new(),
            target_index: HashMap::new(),
            input_index: HashMap::new(),
            timers: TimerQueue::new(),
            keep_alive: None,
        };

        let root = tree.add_node(&config.name, None, NodeKind::Root)?;
        tree.nodes[root.0].set_enabled(Some(config.enabled));
        tree.configure_presets(root, &config.presets, config.preset.as_deref())?;
        if let Some(heat_source) = &config.heat_source {
            tree.add_actuator(root, heat_source, ActuatorKind::Switch)?;
        }
        for pump in &config.pumps {
            tree.add_actuator(root, pump, ActuatorKind::Pump)?;
        }
        for zone in &config.zones {
            tree.add_zone(root, zone)?;
        }

        tree.keep_alive = match &config.keep_alive {
            Some(keep_alive) if keep_alive.interval_s > 0 => Some(KeepAlive {
                target_id: keep_alive.entity_id.clone(),
                interval_ms: keep_alive.interval_s.saturating_mul(1_000),
            }),
            Some(keep_alive) => {
                warn!(
                    "keep-alive for {} has a zero interval, ignoring",
                    keep_alive.entity_id
                );
                None
            }
            None => None,
        };

        info!(
            "heating tree '{}' built: {} nodes, {} actuators, {} inputs",
            config.name,
            tree.nodes.len(),
            tree.actuators.len(),
            tree.input_index.len()
        );
        Ok(tree)
    }

    fn add_zone(&mut self, parent: NodeId, config: &ZoneConfig) -> TreeResult<NodeId> {
        let id = self.add_node(&config.name, Some(parent), NodeKind::Zone)?;
        self.nodes[id.0].set_enabled(config.enabled);
        self.configure_presets(id, &config.presets, config.preset.as_deref())?;
        for pump in &config.pumps {
            self.add_actuator(id, pump, ActuatorKind::Pump)?;
        }
        for valve in &config.valves {
            self.add_actuator(id, valve, ActuatorKind::Valve)?;
        }
        for zone in &config.zones {
            self.add_zone(id, zone)?;
        }
        for subzone in &config.subzones {
            self.add_subzone(id, subzone)?;
        }
        Ok(id)
    }

    fn add_subzone(&mut self, parent: NodeId, config: &SubZoneConfig) -> TreeResult<NodeId> {
        let kind = NodeKind::subzone(config.boost_time_s);
        let id = self.add_node(&config.name, Some(parent), kind)?;
        self.nodes[id.0].set_enabled(config.enabled);
        self.configure_presets(id, &config.presets, config.preset.as_deref())?;
        for valve in &config.valves {
            self.add_actuator(id, valve, ActuatorKind::Valve)?;
        }
        if let Some(sensor) = &config.sensor {
            self.add_input(id, sensor, InputKind::Temperature)?;
        }
        if let Some(control) = &config.control {
            self.add_input(id, control, InputKind::Control)?;
        }
        Ok(id)
    }

    fn add_node(&mut self, name: &str, parent: Option<NodeId>, kind: NodeKind) -> TreeResult<NodeId> {
        if self.node_index.contains_key(name) {
            return Err(TreeError::DuplicateName(name.to_string()));
        }
        let id = NodeId(self.nodes.len());
        self.nodes.push(HeatingNode::new(name, parent, kind));
        self.node_index.insert(name.to_string(), id);
        if let Some(parent) = parent {
            self.nodes[parent.0].add_child(name, id);
        }
        Ok(id)
    }

    fn add_actuator(
        &mut self,
        owner: NodeId,
        config: &ActuatorConfig,
        kind: ActuatorKind,
    ) -> TreeResult<ActuatorId> {
        let name = config.display_name();
        if self.actuator_index.contains_key(&name) {
            return Err(TreeError::DuplicateName(name));
        }
        if self.target_index.contains_key(&config.entity_id) {
            return Err(TreeError::DuplicateName(config.entity_id.clone()));
        }

        let id = ActuatorId(self.actuators.len());
        let owner_name = self.nodes[owner.0].name().to_string();
        self.actuators.push(Actuator::new(
            id,
            &name,
            &config.entity_id,
            kind,
            owner,
            &owner_name,
            config.keep_active_s,
        ));
        self.nodes[owner.0].add_actuator(&name, id);
        self.actuator_index.insert(name, id);
        self.target_index.insert(config.entity_id.clone(), id);
        Ok(id)
    }

    fn add_input(&mut self, node: NodeId, source_id: &str, kind: InputKind) -> TreeResult<()> {
        if self.input_index.contains_key(source_id) {
            return Err(TreeError::DuplicateName(source_id.to_string()));
        }
        let Some(leaf) = self.nodes[node.0].subzone_mut() else {
            return Err(TreeError::NotALeaf(self.nodes[node.0].name().to_string()));
        };
        leaf.add_input(SensorInput::new(source_id, kind));
        self.input_index.insert(source_id.to_string(), node);
        Ok(())
    }

    fn configure_presets(
        &mut self,
        id: NodeId,
        presets: &PresetTable,
        active: Option<&str>,
    ) -> TreeResult<()> {
        for (preset, value) in presets {
            validate_target(*preset, *value)?;
        }
        let active = active.map(str::parse::<Preset>).transpose()?;

        let node = &mut self.nodes[id.0];
        node.presets_mut()
            .extend(presets.iter().map(|(preset, value)| (*preset, *value)));
        node.set_active_preset(active);
        Ok(())
    }

    // ---- lookups ----

    pub fn root(&self) -> &HeatingNode {
        &self.nodes[ROOT.0]
    }

    pub fn node(&self, name: &str) -> Option<&HeatingNode> {
        self.node_index.get(name).map(|id| &self.nodes[id.0])
    }

    pub fn nodes(&self) -> &[HeatingNode] {
        &self.nodes
    }

    pub fn actuator(&self, name: &str) -> Option<&Actuator> {
        self.actuator_index.get(name).map(|id| &self.actuators[id.0])
    }

    pub fn actuators(&self) -> &[Actuator] {
        &self.actuators
    }

    pub fn pending_timers(&self) -> usize {
        self.timers.len()
    }

    fn node_id(&self, name: &str) -> TreeResult<NodeId> {
        self.node_index
            .get(name)
            .copied()
            .ok_or_else(|| TreeError::UnknownNode(name.to_string()))
    }

    fn subzone_id(&self, name: &str) -> TreeResult<NodeId> {
        let id = self.node_id(name)?;
        if self.nodes[id.0].subzone().is_none() {
            return Err(TreeError::NotALeaf(name.to_string()));
        }
        Ok(id)
    }

    pub fn is_enabled_id(&self, id: NodeId) -> bool {
        let mut current = Some(id);
        while let Some(node_id) = current {
            let node = &self.nodes[node_id.0];
            if let Some(enabled) = node.enabled_override() {
                return enabled;
            }
            current = node.parent();
        }
        true
    }

    fn owner_view(&self, id: NodeId) -> OwnerView {
        let node = &self.nodes[id.0];
        OwnerView {
            name: node.name().to_string(),
            demand: node.demand(),
            last_change_ms: node.last_change_ms(),
            enabled: self.is_enabled_id(id),
        }
    }

    fn subtree(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            out.push(current);
            let mut children = self.nodes[current.0].child_ids();
            children.reverse();
            stack.extend(children);
        }
        out
    }

    // ---- lifecycle ----

    pub fn start(&mut self, now_ms: u64) -> Vec<ControlAction> {
        let mut actions = Vec::new();
        for actuator in &self.actuators {
            let enabled = self.is_enabled_id(actuator.owner_id());
            actuator.announce(enabled, &mut actions);
        }
        if let Some(keep_alive) = &self.keep_alive {
            self.timers
                .schedule(TimerKey::KeepAlive, now_ms.saturating_add(keep_alive.interval_ms));
        }
        info!(
            "heating tree '{}' started ({})",
            self.root().name(),
            if self.is_enabled_id(ROOT) {
                "enabled"
            } else {
                "disabled"
            }
        );
        actions
    }

    /// Drops every demand, switches pumps and switches off immediately and
    /// returns valves to their open resting position.
    pub fn shutdown(&mut self, now_ms: u64) -> Vec<ControlAction> {
        let mut actions = Vec::new();
        self.timers.clear();

        for index in 0..self.nodes.len() {
            let node = &mut self.nodes[index];
            if let Some(leaf) = node.subzone_mut() {
                leaf.set_requested(false);
                leaf.set_boost(None);
            }
            let names: Vec<String> = node.children().map(|(name, _)| name.to_string()).collect();
            for name in names {
                // Every child is one of our own links.
                let _ = node.record_child(&name, DemandState::Off);
            }
            if node.parent().is_some() {
                node.set_parent_state(DemandState::Off);
            }
            if node.transition(DemandState::Off, now_ms) {
                actions.push(ControlAction::StateChanged(EntityRef::Node(
                    node.name().to_string(),
                )));
            }
        }

        for index in 0..self.actuators.len() {
            let owner = self.owner_view(self.actuators[index].owner_id());
            let actuator = &mut self.actuators[index];
            let fx = Effects {
                timers: &mut self.timers,
                actions: &mut actions,
            };
            if actuator.kind() == ActuatorKind::Valve {
                actuator.set_target_on(&owner, fx);
            } else if let Err(err) = actuator.set_target_off(&owner, true, now_ms, fx) {
                debug!("shutdown: {err}");
            }
        }

        info!("heating tree '{}' shut down", self.root().name());
        actions
    }

    pub fn next_deadline(&mut self) -> Option<u64> {
        self.timers.next_deadline()
    }

    /// Fires every timer due at `now_ms`, each at its own scheduled time and
    /// in deadline order.
    pub fn tick(&mut self, now_ms: u64) -> Vec<ControlAction> {
        let mut actions = Vec::new();
        while let Some((key, fire_at)) = self.timers.pop_due(now_ms) {
            match key {
                TimerKey::ActuatorOff(id) => self.fire_pending_off(id, &mut actions),
                TimerKey::BoostExpiry(id) => {
                    info!("{}: boost expired", self.nodes[id.0].name());
                    self.end_boost(id, fire_at, &mut actions);
                }
                TimerKey::KeepAlive => self.pulse_keep_alive(fire_at, &mut actions),
            }
        }
        if !actions.is_empty() {
            self.audit();
        }
        actions
    }

    fn fire_pending_off(&mut self, id: ActuatorId, actions: &mut Vec<ControlAction>) {
        let Some(owner_id) = self.actuators.get(id.0).map(Actuator::owner_id) else {
            return;
        };
        let owner = self.owner_view(owner_id);
        let fx = Effects {
            timers: &mut self.timers,
            actions,
        };
        self.actuators[id.0].fire_pending_off(&owner, fx);
    }

    fn pulse_keep_alive(&mut self, fired_at: u64, actions: &mut Vec<ControlAction>) {
        let enabled = self.is_enabled_id(ROOT);
        let Some(keep_alive) = &self.keep_alive else {
            return;
        };
        if enabled {
            debug!("keep-alive pulse to {}", keep_alive.target_id);
            actions.push(ControlAction::Press {
                target: keep_alive.target_id.clone(),
            });
        }
        let next = fired_at.saturating_add(keep_alive.interval_ms);
        self.timers.schedule(TimerKey::KeepAlive, next);
    }

    // ---- commands ----

    pub fn set_own_demand(
        &mut self,
        name: &str,
        on: bool,
        now_ms: u64,
    ) -> TreeResult<Vec<ControlAction>> {
        let id = self.subzone_id(name)?;
        if let Some(leaf) = self.nodes[id.0].subzone_mut() {
            leaf.set_requested(on);
        }
        info!("{name}: manual demand {}", if on { "on" } else { "off" });

        let mut actions = Vec::new();
        self.reevaluate_leaf(id, now_ms, &mut actions);
        self.audit();
        Ok(actions)
    }

    pub fn start_boost(
        &mut self,
        name: &str,
        duration_s: Option<u64>,
        now_ms: u64,
    ) -> TreeResult<Vec<ControlAction>> {
        let id = self.subzone_id(name)?;
        let Some(leaf) = self.nodes[id.0].subzone_mut() else {
            return Err(TreeError::NotALeaf(name.to_string()));
        };
        let duration_s = duration_s.unwrap_or(leaf.boost_time_s());
        if duration_s == 0 {
            return Err(TreeError::InvalidDuration(duration_s));
        }

        let expires_at_ms = now_ms.saturating_add(duration_s.saturating_mul(1_000));
        let previous = leaf.set_boost(Some(BoostOverride {
            started_ms: now_ms,
            expires_at_ms,
        }));
        self.timers.schedule(TimerKey::BoostExpiry(id), expires_at_ms);
        if previous.is_some() {
            info!("{name}: boost restarted for {duration_s}s");
        } else {
            info!("{name}: boost for {duration_s}s");
        }

        let mut actions = vec![ControlAction::StateChanged(EntityRef::Node(
            name.to_string(),
        ))];
        self.reevaluate_leaf(id, now_ms, &mut actions);
        self.audit();
        Ok(actions)
    }

    pub fn stop_boost(&mut self, name: &str, now_ms: u64) -> TreeResult<Vec<ControlAction>> {
        let id = self.subzone_id(name)?;
        info!("{name}: boost stopped");
        let mut actions = Vec::new();
        self.end_boost(id, now_ms, &mut actions);
        self.audit();
        Ok(actions)
    }

    fn end_boost(&mut self, id: NodeId, now_ms: u64, actions: &mut Vec<ControlAction>) {
        self.timers.cancel(TimerKey::BoostExpiry(id));
        let ended = self.nodes[id.0]
            .subzone_mut()
            .and_then(|leaf| leaf.set_boost(None))
            .is_some();
        if ended {
            actions.push(ControlAction::StateChanged(EntityRef::Node(
                self.nodes[id.0].name().to_string(),
            )));
        }
        self.reevaluate_leaf(id, now_ms, actions);
    }

    pub fn set_preset(
        &mut self,
        name: &str,
        preset: &str,
        value: f32,
        now_ms: u64,
    ) -> TreeResult<Vec<ControlAction>> {
        let id = self.node_id(name)?;
        let preset: Preset = preset.parse()?;
        let value = validate_target(preset, value)?;

        self.nodes[id.0].presets_mut().insert(preset, value);
        info!("{name}: preset {preset} set to {value:.1}");

        let mut actions = vec![ControlAction::StateChanged(EntityRef::Node(
            name.to_string(),
        ))];
        self.reevaluate_subtree(id, now_ms, &mut actions);
        self.audit();
        Ok(actions)
    }

    pub fn select_preset(
        &mut self,
        name: &str,
        preset: &str,
        now_ms: u64,
    ) -> TreeResult<Vec<ControlAction>> {
        let id = self.node_id(name)?;
        let preset: Preset = preset.parse()?;
        self.nodes[id.0].set_active_preset(Some(preset));
        info!("{name}: mode {preset}");

        let mut actions = Vec::new();
        for node in self.subtree(id) {
            actions.push(ControlAction::StateChanged(EntityRef::Node(
                self.nodes[node.0].name().to_string(),
            )));
        }
        self.reevaluate_subtree(id, now_ms, &mut actions);
        self.audit();
        Ok(actions)
    }

    pub fn resolve_preset(&self, name: &str, preset: &str) -> TreeResult<f32> {
        let id = self.node_id(name)?;
        let preset: Preset = preset.parse()?;
        Ok(PresetResolver::new(&self.nodes).resolve(id, preset))
    }

    pub fn set_enabled(
        &mut self,
        name: &str,
        enabled: Option<bool>,
        _now_ms: u64,
    ) -> TreeResult<Vec<ControlAction>> {
        let id = self.node_id(name)?;
        let enabled = match enabled {
            None if id == ROOT => Some(true),
            other => other,
        };

        let subtree = self.subtree(id);
        let affected: Vec<(ActuatorId, bool)> = subtree
            .iter()
            .flat_map(|node| self.nodes[node.0].actuator_ids())
            .map(|actuator| {
                let owner = self.actuators[actuator.0].owner_id();
                (actuator, self.is_enabled_id(owner))
            })
            .collect();

        self.nodes[id.0].set_enabled(enabled);
        info!(
            "{name}: control {}",
            match enabled {
                Some(true) => "enabled",
                Some(false) => "disabled",
                None => "inherited",
            }
        );

        let mut actions: Vec<ControlAction> = subtree
            .iter()
            .map(|node| {
                ControlAction::StateChanged(EntityRef::Node(self.nodes[node.0].name().to_string()))
            })
            .collect();
        for (actuator, was_enabled) in affected {
            let owner = self.actuators[actuator.0].owner_id();
            if !was_enabled && self.is_enabled_id(owner) {
                self.actuators[actuator.0].announce(true, &mut actions);
            }
        }
        Ok(actions)
    }

    pub fn update_input(
        &mut self,
        source_id: &str,
        reading: InputReading,
        now_ms: u64,
    ) -> TreeResult<Vec<ControlAction>> {
        let id = self
            .input_index
            .get(source_id)
            .copied()
            .ok_or_else(|| TreeError::UnknownInput(source_id.to_string()))?;
        let input = self.nodes[id.0]
            .subzone_mut()
            .and_then(|leaf| leaf.input_mut(source_id))
            .ok_or_else(|| TreeError::UnknownInput(source_id.to_string()))?;
        input.record(reading, now_ms)?;
        debug!("{source_id}: {reading:?}");

        let mut actions = Vec::new();
        self.reevaluate_leaf(id, now_ms, &mut actions);
        self.audit();
        Ok(actions)
    }

    pub fn update_input_payload(
        &mut self,
        source_id: &str,
        payload: &str,
        now_ms: u64,
    ) -> TreeResult<Vec<ControlAction>> {
        let reading = self
            .input_index
            .get(source_id)
            .and_then(|id| self.nodes[id.0].subzone())
            .and_then(|leaf| {
                leaf.inputs()
                    .iter()
                    .find(|input| input.source_id() == source_id)
            })
            .ok_or_else(|| TreeError::UnknownInput(source_id.to_string()))?
            .parse(payload)?;
        self.update_input(source_id, reading, now_ms)
    }

    pub fn handle_feedback(
        &mut self,
        target_id: &str,
        observed_on: bool,
        now_ms: u64,
    ) -> Vec<ControlAction> {
        let Some(&id) = self.target_index.get(target_id) else {
            warn!("feedback from unknown device {target_id}, ignoring");
            return Vec::new();
        };
        let enabled = self.is_enabled_id(self.actuators[id.0].owner_id());
        let mut actions = Vec::new();
        self.actuators[id.0].handle_feedback(observed_on, now_ms, enabled, &mut actions);
        actions
    }

    pub fn command_actuator(
        &mut self,
        name: &str,
        on: bool,
        force: bool,
        now_ms: u64,
    ) -> TreeResult<Vec<ControlAction>> {
        let id = self
            .actuator_index
            .get(name)
            .copied()
            .ok_or_else(|| TreeError::UnknownActuator(name.to_string()))?;
        let owner = self.owner_view(self.actuators[id.0].owner_id());

        let mut actions = Vec::new();
        let fx = Effects {
            timers: &mut self.timers,
            actions: &mut actions,
        };
        if on {
            self.actuators[id.0].set_target_on(&owner, fx);
        } else {
            self.actuators[id.0].set_target_off(&owner, force, now_ms, fx)?;
        }
        Ok(actions)
    }

    /// A child reporting its demand to `parent`. Reports naming an unknown
    /// node or child are logged and dropped. A report that does not match
    /// the child's own demand is refused, so a parent never goes cold while
    /// heat is needed below it.
    pub fn report_child_demand(
        &mut self,
        parent: &str,
        child: &str,
        state: DemandState,
        now_ms: u64,
    ) -> Vec<ControlAction> {
        let Some(&id) = self.node_index.get(parent) else {
            warn!("demand report for unknown node {parent}, ignoring");
            return Vec::new();
        };
        let Some(child_id) = self
            .node_index
            .get(child)
            .copied()
            .filter(|child_id| self.nodes[child_id.0].parent() == Some(id))
        else {
            warn!("{parent} has no child {child}, ignoring report");
            return Vec::new();
        };
        let actual = self.nodes[child_id.0].demand();
        if state == DemandState::Unknown || state != actual {
            error!(
                "{child} reported {} to {parent} while demanding {}, refusing",
                state.as_str(),
                actual.as_str()
            );
            return Vec::new();
        }
        let mut actions = Vec::new();
        self.report_child(id, child, state, now_ms, &mut actions);
        self.audit();
        actions
    }

    // ---- propagation ----

    fn reevaluate_subtree(&mut self, id: NodeId, now_ms: u64, actions: &mut Vec<ControlAction>) {
        for node in self.subtree(id) {
            if self.nodes[node.0].subzone().is_some() {
                self.reevaluate_leaf(node, now_ms, actions);
            }
        }
    }

    fn reevaluate_leaf(&mut self, id: NodeId, now_ms: u64, actions: &mut Vec<ControlAction>) {
        let target = PresetResolver::new(&self.nodes).active_target(id);
        let Some(leaf) = self.nodes[id.0].subzone() else {
            return;
        };
        let state = DemandState::from_bool(leaf.effective_demand(target));
        self.apply_demand(id, state, now_ms, actions);
    }

    /// Moves a node to `state` and carries the change through the tree.
    ///
    /// Turning on starts local actuators before the parent hears about it;
    /// turning off tells the parent first and then releases local actuators.
    /// Children are told about the new state last.
    fn apply_demand(
        &mut self,
        id: NodeId,
        state: DemandState,
        now_ms: u64,
        actions: &mut Vec<ControlAction>,
    ) {
        if !self.nodes[id.0].transition(state, now_ms) {
            return;
        }
        let name = self.nodes[id.0].name().to_string();
        debug!("{name}: demand {}", state.as_str());
        actions.push(ControlAction::StateChanged(EntityRef::Node(name)));

        match state {
            DemandState::On => {
                self.drive_actuators(id, DriveScope::All, now_ms, actions);
                self.propagate_up(id, now_ms, actions);
            }
            DemandState::Off => {
                self.propagate_up(id, now_ms, actions);
                self.drive_actuators(id, DriveScope::All, now_ms, actions);
            }
            DemandState::Unknown => self.propagate_up(id, now_ms, actions),
        }
        self.notify_children(id, now_ms, actions);
    }

    fn propagate_up(&mut self, id: NodeId, now_ms: u64, actions: &mut Vec<ControlAction>) {
        let node = &self.nodes[id.0];
        let Some(parent) = node.parent() else {
            return;
        };
        let name = node.name().to_string();
        let state = node.demand();
        self.report_child(parent, &name, state, now_ms, actions);
    }

    fn report_child(
        &mut self,
        id: NodeId,
        child: &str,
        state: DemandState,
        now_ms: u64,
        actions: &mut Vec<ControlAction>,
    ) {
        if let Err(err) = self.nodes[id.0].record_child(child, state) {
            warn!("{err}, ignoring report");
            return;
        }
        let aggregate = self.nodes[id.0].aggregate();
        if aggregate == DemandState::Unknown {
            return;
        }
        self.apply_demand(id, aggregate, now_ms, actions);
    }

    fn notify_children(&mut self, id: NodeId, now_ms: u64, actions: &mut Vec<ControlAction>) {
        let state = self.nodes[id.0].demand();
        for child in self.nodes[id.0].child_ids() {
            self.notify_parent_state(child, state, now_ms, actions);
        }
    }

    fn notify_parent_state(
        &mut self,
        id: NodeId,
        parent_state: DemandState,
        now_ms: u64,
        actions: &mut Vec<ControlAction>,
    ) {
        self.nodes[id.0].set_parent_state(parent_state);
        if parent_state.is_on() && self.nodes[id.0].demand() == DemandState::Off {
            self.drive_actuators(id, DriveScope::Valves, now_ms, actions);
        }
    }

    /// Brings the actuators of `id` in line with its demand. Valves of a node
    /// whose parent is not heating are left where they are.
    fn drive_actuators(
        &mut self,
        id: NodeId,
        scope: DriveScope,
        now_ms: u64,
        actions: &mut Vec<ControlAction>,
    ) {
        let node = &self.nodes[id.0];
        let demand = node.demand();
        if demand == DemandState::Unknown {
            return;
        }
        let defer_valves = node.parent().is_some() && !node.parent_state().is_on();
        let actuator_ids = node.actuator_ids();
        let owner = self.owner_view(id);

        for actuator_id in actuator_ids {
            let actuator = &mut self.actuators[actuator_id.0];
            let is_valve = actuator.kind() == ActuatorKind::Valve;
            if scope == DriveScope::Valves && !is_valve {
                continue;
            }
            let fx = Effects {
                timers: &mut self.timers,
                actions: &mut *actions,
            };
            if demand.is_on() {
                actuator.set_target_on(&owner, fx);
            } else if is_valve && defer_valves {
                debug!("{}: parent not heating, leaving {} as is", owner.name, actuator.name());
            } else if let Err(err) = actuator.set_target_off(&owner, false, now_ms, fx) {
                debug!("{err}");
            }
        }
    }

    // ---- observation ----

    pub fn upward_invariant_violations(&self) -> Vec<String> {
        self.nodes
            .iter()
            .filter(|node| node.demand().is_on())
            .filter(|node| {
                node.parent()
                    .is_some_and(|parent| !self.nodes[parent.0].demand().is_on())
            })
            .map(|node| node.name().to_string())
            .collect()
    }

    fn audit(&self) {
        for name in self.upward_invariant_violations() {
            error!("{name} demands heat but its parent does not");
        }
    }

    pub fn snapshot(&self) -> TreeSnapshot {
        TreeSnapshot {
            nodes: (0..self.nodes.len())
                .map(|index| self.snapshot_node(NodeId(index)))
                .collect(),
            actuators: self.actuators.iter().map(Actuator::snapshot).collect(),
            pending_timers: self.pending_timers(),
        }
    }

    pub fn node_snapshot(&self, name: &str) -> TreeResult<NodeSnapshot> {
        Ok(self.snapshot_node(self.node_id(name)?))
    }

    pub fn actuator_snapshot(&self, name: &str) -> TreeResult<ActuatorSnapshot> {
        self.actuator(name)
            .map(Actuator::snapshot)
            .ok_or_else(|| TreeError::UnknownActuator(name.to_string()))
    }

    fn snapshot_node(&self, id: NodeId) -> NodeSnapshot {
        let node = &self.nodes[id.0];
        let resolver = PresetResolver::new(&self.nodes);
        let active_preset = resolver.active_preset(id);
        NodeSnapshot {
            name: node.name().to_string(),
            kind: node.kind().tag(),
            parent: node.parent().map(|parent| self.nodes[parent.0].name().to_string()),
            demand: node.demand(),
            last_change_ms: node.last_change_ms(),
            enabled: self.is_enabled_id(id),
            active_preset,
            target_temp: resolver.resolve(id, active_preset),
            boost: node
                .subzone()
                .and_then(|leaf| leaf.boost())
                .map(|boost| boost.window()),
            actuators: node.actuator_names().map(str::to_string).collect(),
            inputs: node
                .subzone()
                .map(|leaf| leaf.inputs().iter().map(SensorInput::snapshot).collect())
                .unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{actuator::ActuatorPhase, config::KeepAliveConfig};

    fn commands(actions: &[ControlAction]) -> Vec<ControlAction> {
        actions
            .iter()
            .filter(|action| action.is_command())
            .cloned()
            .collect()
    }

    fn switch(target: &str, on: bool) -> ControlAction {
        ControlAction::switch(target, on)
    }

    fn demand(tree: &HeatingTree, name: &str) -> DemandState {
        tree.node(name).unwrap().demand()
    }

    // home -> ground (pump) -> s1, s2
    fn two_level(keep_active_s: u64) -> HeatingTree {
        let mut ground = ZoneConfig::new("ground");
        ground
            .pumps
            .push(ActuatorConfig::new("switch.pump").with_keep_active(keep_active_s));
        ground.subzones.push(SubZoneConfig::new("s1"));
        ground.subzones.push(SubZoneConfig::new("s2"));

        let mut system = SystemConfig {
            name: "home".to_string(),
            ..SystemConfig::default()
        };
        system.zones.push(ground);
        HeatingTree::from_config(&system).unwrap()
    }

    // home (boiler) -> ground (pump) -> kitchen (valve, sensor), bath (valve, control)
    fn valved() -> HeatingTree {
        let mut kitchen = SubZoneConfig::new("kitchen");
        kitchen.valves.push(ActuatorConfig::new("switch.kitchen_valve"));
        kitchen.sensor = Some("sensor.kitchen".to_string());

        let mut bath = SubZoneConfig::new("bath");
        bath.valves.push(ActuatorConfig::new("switch.bath_valve"));
        bath.control = Some("input_boolean.bath".to_string());
        bath.boost_time_s = 900;

        let mut ground = ZoneConfig::new("ground");
        ground.pumps.push(ActuatorConfig::new("switch.pump"));
        ground.subzones = vec![kitchen, bath];

        let system = SystemConfig {
            name: "home".to_string(),
            heat_source: Some(ActuatorConfig::new("switch.boiler")),
            zones: vec![ground],
            ..SystemConfig::default()
        };
        HeatingTree::from_config(&system).unwrap()
    }

    #[test]
    fn start_announces_resting_states_and_leaves_demand_unknown() {
        let mut tree = valved();
        let actions = tree.start(0);

        assert_eq!(
            commands(&actions),
            vec![
                switch("switch.boiler", false),
                switch("switch.pump", false),
                switch("switch.kitchen_valve", true),
                switch("switch.bath_valve", true),
            ]
        );
        for node in tree.nodes() {
            assert_eq!(node.demand(), DemandState::Unknown);
        }
    }

    #[test]
    fn two_level_demand_drives_the_pump_once() {
        let mut tree = two_level(0);
        tree.start(0);

        let actions = tree.set_own_demand("s1", true, 1_000).unwrap();
        assert_eq!(commands(&actions), vec![switch("switch.pump", true)]);
        assert_eq!(demand(&tree, "ground"), DemandState::On);
        assert_eq!(demand(&tree, "home"), DemandState::On);

        let actions = tree.set_own_demand("s2", true, 2_000).unwrap();
        assert!(commands(&actions).is_empty());

        let actions = tree.set_own_demand("s1", false, 3_000).unwrap();
        assert!(commands(&actions).is_empty());
        assert_eq!(demand(&tree, "ground"), DemandState::On);

        let actions = tree.set_own_demand("s2", false, 4_000).unwrap();
        assert_eq!(commands(&actions), vec![switch("switch.pump", false)]);
        assert_eq!(demand(&tree, "ground"), DemandState::Off);
        assert_eq!(demand(&tree, "home"), DemandState::Off);
    }

    #[test]
    fn first_off_report_settles_parent_off() {
        let mut tree = two_level(0);
        tree.start(0);

        tree.set_own_demand("s1", false, 1_000).unwrap();

        assert_eq!(demand(&tree, "s2"), DemandState::Unknown);
        assert_eq!(demand(&tree, "ground"), DemandState::Off);
        assert_eq!(tree.actuator("pump").unwrap().phase(), ActuatorPhase::Off);
    }

    #[test]
    fn keep_active_delays_pump_off() {
        let mut tree = two_level(30);
        tree.start(0);

        tree.set_own_demand("s1", true, 0).unwrap();
        let actions = tree.set_own_demand("s1", false, 5_000).unwrap();
        assert!(commands(&actions).is_empty());

        let pump = tree.actuator_snapshot("pump").unwrap();
        assert_eq!(pump.phase, ActuatorPhase::PendingOff);
        assert!(pump.commanded_on);
        assert_eq!(pump.active_extension.end_ms, Some(35_000));
        assert_eq!(tree.next_deadline(), Some(35_000));

        assert!(tree.tick(34_999).is_empty());
        let actions = tree.tick(35_000);
        assert_eq!(commands(&actions), vec![switch("switch.pump", false)]);
        assert_eq!(tree.actuator("pump").unwrap().phase(), ActuatorPhase::Off);
    }

    #[test]
    fn demand_inside_keep_active_window_cancels_off() {
        let mut tree = two_level(30);
        tree.start(0);

        tree.set_own_demand("s1", true, 0).unwrap();
        tree.set_own_demand("s1", false, 5_000).unwrap();
        let actions = tree.set_own_demand("s1", true, 20_000).unwrap();
        assert!(commands(&actions).is_empty());

        assert!(commands(&tree.tick(100_000)).is_empty());
        let pump = tree.actuator("pump").unwrap();
        assert_eq!(pump.phase(), ActuatorPhase::On);
        assert!(!pump.active_extension().active);
    }

    #[test]
    fn refuses_to_switch_off_pump_of_heating_zone() {
        let mut tree = two_level(0);
        tree.start(0);
        tree.set_own_demand("s1", true, 0).unwrap();

        let err = tree.command_actuator("pump", false, true, 10).unwrap_err();
        assert_eq!(
            err,
            TreeError::SafetyRefusal {
                actuator: "pump".to_string(),
                node: "ground".to_string()
            }
        );
        assert!(tree.actuator("pump").unwrap().commanded_on());
    }

    #[test]
    fn manual_off_honours_keep_active_unless_forced() {
        let mut tree = two_level(60);
        tree.start(0);
        tree.command_actuator("pump", true, false, 0).unwrap();

        tree.command_actuator("pump", false, false, 1_000).unwrap();
        assert_eq!(tree.actuator("pump").unwrap().phase(), ActuatorPhase::PendingOff);

        let actions = tree.command_actuator("pump", false, true, 2_000).unwrap();
        assert_eq!(commands(&actions), vec![switch("switch.pump", false)]);
        assert_eq!(tree.pending_timers(), 0);
    }

    #[test]
    fn boost_forces_on_and_reverts() {
        let mut tree = valved();
        tree.start(0);
        tree.update_input_payload("input_boolean.bath", "off", 0)
            .unwrap();
        assert_eq!(demand(&tree, "bath"), DemandState::Off);

        tree.start_boost("bath", Some(15), 0).unwrap();
        assert_eq!(demand(&tree, "bath"), DemandState::On);
        assert_eq!(demand(&tree, "home"), DemandState::On);

        let snapshot = tree.node_snapshot("bath").unwrap();
        assert_eq!(snapshot.boost.and_then(|window| window.end_ms), Some(15_000));

        tree.tick(14_999);
        assert_eq!(demand(&tree, "bath"), DemandState::On);

        tree.tick(15_000);
        assert_eq!(demand(&tree, "bath"), DemandState::Off);
        assert_eq!(demand(&tree, "home"), DemandState::Off);
        assert_eq!(tree.node_snapshot("bath").unwrap().boost, None);
    }

    #[test]
    fn boost_expiry_keeps_underlying_demand() {
        let mut tree = valved();
        tree.start(0);
        tree.update_input_payload("input_boolean.bath", "on", 0)
            .unwrap();
        tree.start_boost("bath", None, 1_000).unwrap();

        tree.tick(901_000);
        assert_eq!(demand(&tree, "bath"), DemandState::On);
    }

    #[test]
    fn restarting_boost_replaces_the_window() {
        let mut tree = valved();
        tree.start(0);
        tree.start_boost("bath", Some(10), 0).unwrap();
        tree.start_boost("bath", Some(10), 5_000).unwrap();

        tree.tick(10_000);
        assert_eq!(demand(&tree, "bath"), DemandState::On);
        tree.tick(15_000);
        assert_eq!(demand(&tree, "bath"), DemandState::Off);
    }

    #[test]
    fn boost_rejects_bad_targets() {
        let mut tree = valved();
        assert_eq!(
            tree.start_boost("bath", Some(0), 0).unwrap_err(),
            TreeError::InvalidDuration(0)
        );
        assert_eq!(
            tree.start_boost("ground", Some(60), 0).unwrap_err(),
            TreeError::NotALeaf("ground".to_string())
        );
        assert_eq!(tree.pending_timers(), 0);
    }

    #[test]
    fn stop_boost_reverts_immediately() {
        let mut tree = valved();
        tree.start(0);
        tree.start_boost("bath", Some(600), 0).unwrap();
        tree.stop_boost("bath", 1_000).unwrap();

        assert_eq!(demand(&tree, "bath"), DemandState::Off);
        assert_eq!(tree.next_deadline(), None);
    }

    #[test]
    fn valves_follow_sibling_and_parent_demand() {
        let mut tree = valved();
        tree.start(0);

        let actions = tree.set_own_demand("kitchen", true, 1_000).unwrap();
        assert_eq!(
            commands(&actions),
            vec![switch("switch.pump", true), switch("switch.boiler", true)]
        );

        // Zone heats for the kitchen: the idle bath closes.
        let actions = tree.set_own_demand("bath", false, 2_000).unwrap();
        assert_eq!(commands(&actions), vec![switch("switch.bath_valve", false)]);

        // Whole zone idle: the kitchen valve is left open.
        let actions = tree.set_own_demand("kitchen", false, 3_000).unwrap();
        assert_eq!(
            commands(&actions),
            vec![switch("switch.boiler", false), switch("switch.pump", false)]
        );
        assert!(tree.actuator("kitchen_valve").unwrap().commanded_on());

        let actions = tree.set_own_demand("bath", true, 4_000).unwrap();
        assert_eq!(
            commands(&actions),
            vec![
                switch("switch.bath_valve", true),
                switch("switch.pump", true),
                switch("switch.boiler", true),
                switch("switch.kitchen_valve", false),
            ]
        );
    }

    #[test]
    fn temperature_and_presets_drive_demand() {
        let mut tree = valved();
        tree.start(0);

        tree.update_input("sensor.kitchen", InputReading::Temperature(19.0), 0)
            .unwrap();
        assert_eq!(demand(&tree, "kitchen"), DemandState::On);

        tree.select_preset("home", "away", 10).unwrap();
        assert_eq!(demand(&tree, "kitchen"), DemandState::Off);
        assert_eq!(tree.node_snapshot("kitchen").unwrap().active_preset, Preset::Away);

        tree.set_preset("kitchen", "away", 20.0, 20).unwrap();
        assert_eq!(demand(&tree, "kitchen"), DemandState::On);
        assert_eq!(tree.resolve_preset("kitchen", "away").unwrap(), 20.0);
        assert_eq!(tree.resolve_preset("ground", "away").unwrap(), 17.0);
    }

    #[test]
    fn presets_inherit_down_the_tree() {
        let mut tree = valved();
        tree.set_preset("home", "comfort", 22.0, 0).unwrap();
        tree.set_preset("ground", "night", 16.0, 0).unwrap();

        assert_eq!(tree.resolve_preset("kitchen", "comfort").unwrap(), 22.0);
        assert_eq!(tree.resolve_preset("kitchen", "night").unwrap(), 16.0);
        assert_eq!(tree.resolve_preset("home", "night").unwrap(), 18.0);
        assert_eq!(tree.resolve_preset("bath", "target").unwrap(), 22.0);
    }

    #[test]
    fn invalid_preset_input_is_rejected_without_change() {
        let mut tree = valved();
        assert_eq!(
            tree.set_preset("kitchen", "sauna", 20.0, 0).unwrap_err(),
            TreeError::UnknownPreset("sauna".to_string())
        );
        assert!(matches!(
            tree.set_preset("kitchen", "away", f32::NAN, 0),
            Err(TreeError::InvalidPresetValue { .. })
        ));
        assert!(matches!(
            tree.set_preset("kitchen", "away", 45.0, 0),
            Err(TreeError::InvalidPresetValue { .. })
        ));
        assert_eq!(tree.resolve_preset("kitchen", "away").unwrap(), 17.0);
    }

    #[test]
    fn bad_readings_keep_previous_state() {
        let mut tree = valved();
        tree.start(0);
        tree.update_input("sensor.kitchen", InputReading::Temperature(19.0), 0)
            .unwrap();

        assert!(tree
            .update_input_payload("sensor.kitchen", "not-a-number", 10)
            .is_err());
        assert!(tree
            .update_input("sensor.kitchen", InputReading::Switch(true), 10)
            .is_err());
        assert_eq!(
            tree.update_input("sensor.attic", InputReading::Temperature(3.0), 10)
                .unwrap_err(),
            TreeError::UnknownInput("sensor.attic".to_string())
        );
        assert_eq!(demand(&tree, "kitchen"), DemandState::On);
    }

    #[test]
    fn unknown_child_report_is_ignored() {
        let mut tree = two_level(0);
        tree.start(0);

        assert!(tree
            .report_child_demand("ground", "attic", DemandState::On, 0)
            .is_empty());
        assert!(tree
            .report_child_demand("nowhere", "s1", DemandState::On, 0)
            .is_empty());
        assert_eq!(demand(&tree, "ground"), DemandState::Unknown);
    }

    #[test]
    fn contradicting_child_report_is_refused() {
        let mut tree = two_level(0);
        tree.start(0);
        tree.set_own_demand("s1", true, 0).unwrap();

        assert!(tree
            .report_child_demand("ground", "s1", DemandState::Off, 10)
            .is_empty());
        assert!(tree
            .report_child_demand("ground", "s1", DemandState::Unknown, 10)
            .is_empty());
        assert!(tree
            .report_child_demand("home", "s1", DemandState::On, 10)
            .is_empty());

        assert_eq!(demand(&tree, "ground"), DemandState::On);
        assert_eq!(tree.actuator("pump").unwrap().phase(), ActuatorPhase::On);
        assert!(tree.upward_invariant_violations().is_empty());

        // A report that matches the child is a harmless re-sync.
        assert!(commands(&tree.report_child_demand("ground", "s1", DemandState::On, 20)).is_empty());
        assert_eq!(demand(&tree, "ground"), DemandState::On);
    }

    #[test]
    fn feedback_mismatch_is_reasserted() {
        let mut tree = two_level(0);
        tree.start(0);
        tree.set_own_demand("s1", true, 0).unwrap();

        let actions = tree.handle_feedback("switch.pump", false, 500);
        assert_eq!(commands(&actions), vec![switch("switch.pump", true)]);

        let pump = tree.actuator_snapshot("pump").unwrap();
        assert!(pump.available);
        assert_eq!(pump.observed_on, Some(false));
        assert_eq!(pump.last_seen_ms, Some(500));

        assert!(tree.handle_feedback("switch.unknown", true, 600).is_empty());
    }

    #[test]
    fn disabled_tree_tracks_state_without_commands() {
        let system = SystemConfig {
            enabled: false,
            ..two_level_config()
        };
        let mut tree = HeatingTree::from_config(&system).unwrap();

        assert!(commands(&tree.start(0)).is_empty());
        assert!(commands(&tree.set_own_demand("s1", true, 0).unwrap()).is_empty());
        assert!(tree.actuator("pump").unwrap().commanded_on());

        let actions = tree.set_enabled("home", Some(true), 10).unwrap();
        assert_eq!(commands(&actions), vec![switch("switch.pump", true)]);
    }

    fn two_level_config() -> SystemConfig {
        let mut ground = ZoneConfig::new("ground");
        ground.pumps.push(ActuatorConfig::new("switch.pump"));
        ground.subzones.push(SubZoneConfig::new("s1"));
        SystemConfig {
            name: "home".to_string(),
            zones: vec![ground],
            ..SystemConfig::default()
        }
    }

    #[test]
    fn keep_alive_pulses_on_interval() {
        let system = SystemConfig {
            keep_alive: Some(KeepAliveConfig {
                entity_id: "button.boiler_ping".to_string(),
                interval_s: 600,
            }),
            ..two_level_config()
        };
        let mut tree = HeatingTree::from_config(&system).unwrap();
        tree.start(0);

        let press = ControlAction::Press {
            target: "button.boiler_ping".to_string(),
        };
        assert!(tree.tick(599_999).is_empty());
        assert_eq!(tree.tick(600_000), vec![press.clone()]);
        assert_eq!(tree.next_deadline(), Some(1_200_000));
        assert_eq!(tree.tick(1_250_000), vec![press]);
        assert_eq!(tree.next_deadline(), Some(1_800_000));
    }

    #[test]
    fn shutdown_forces_off_and_reopens_valves() {
        let mut tree = valved();
        tree.start(0);
        tree.set_own_demand("kitchen", true, 0).unwrap();
        tree.set_own_demand("bath", false, 0).unwrap();
        assert!(!tree.actuator("bath_valve").unwrap().commanded_on());

        let actions = tree.shutdown(1_000);
        assert_eq!(
            commands(&actions),
            vec![
                switch("switch.boiler", false),
                switch("switch.pump", false),
                switch("switch.bath_valve", true),
            ]
        );
        for node in tree.nodes() {
            assert_eq!(node.demand(), DemandState::Off);
        }
        assert_eq!(tree.pending_timers(), 0);
        assert!(tree.upward_invariant_violations().is_empty());
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let mut system = two_level_config();
        system.zones[0].subzones.push(SubZoneConfig::new("s1"));
        assert_eq!(
            HeatingTree::from_config(&system).unwrap_err(),
            TreeError::DuplicateName("s1".to_string())
        );

        let mut system = two_level_config();
        system.pumps.push(ActuatorConfig::new("switch.pump"));
        assert!(matches!(
            HeatingTree::from_config(&system),
            Err(TreeError::DuplicateName(_))
        ));
    }

    #[test]
    fn unknown_preset_in_config_is_rejected() {
        let system = SystemConfig {
            preset: Some("party".to_string()),
            ..two_level_config()
        };
        assert_eq!(
            HeatingTree::from_config(&system).unwrap_err(),
            TreeError::UnknownPreset("party".to_string())
        );
    }

    #[test]
    fn snapshot_serializes_camel_case() {
        let mut tree = two_level(30);
        tree.start(0);
        tree.set_own_demand("s1", true, 0).unwrap();

        let json = serde_json::to_value(tree.snapshot()).unwrap();
        assert_eq!(json["nodes"][0]["name"], "home");
        assert_eq!(json["nodes"][0]["demand"], "ON");
        assert_eq!(json["nodes"][1]["lastChangeMs"], 0);
        assert_eq!(json["nodes"][2]["activePreset"], "comfort");
        assert_eq!(json["actuators"][0]["phase"], "ON");
        assert_eq!(json["actuators"][0]["keepActiveS"], 30);
        assert_eq!(json["nodes"][1]["actuators"], serde_json::json!(["pump"]));
        assert_eq!(json["pendingTimers"], 0);
    }

    #[test]
    fn node_snapshot_reports_bound_inputs() {
        let mut tree = valved();
        tree.start(0);

        let kitchen = tree.node_snapshot("kitchen").unwrap();
        assert_eq!(kitchen.actuators, vec!["kitchen_valve".to_string()]);
        assert!(!kitchen.inputs[0].available);
        assert_eq!(kitchen.inputs[0].last_update_ms, None);

        tree.update_input_payload("sensor.kitchen", "19.0", 500).unwrap();
        let kitchen = tree.node_snapshot("kitchen").unwrap();
        assert_eq!(kitchen.inputs[0].source_id, "sensor.kitchen");
        assert_eq!(kitchen.inputs[0].reading, InputReading::Temperature(19.0));
        assert!(kitchen.inputs[0].available);
        assert_eq!(kitchen.inputs[0].last_update_ms, Some(500));
        assert!(tree.node_snapshot("ground").unwrap().inputs.is_empty());
    }

    // home -> a (a1, a2), b (b1 (b11, b12), b2)
    fn deep() -> HeatingTree {
        let mut a = ZoneConfig::new("a");
        a.pumps.push(ActuatorConfig::new("switch.pump_a").with_keep_active(20));
        a.subzones = vec![SubZoneConfig::new("a1"), SubZoneConfig::new("a2")];

        let mut b1 = ZoneConfig::new("b1");
        b1.valves.push(ActuatorConfig::new("switch.valve_b1"));
        b1.subzones = vec![SubZoneConfig::new("b11"), SubZoneConfig::new("b12")];

        let mut b = ZoneConfig::new("b");
        b.pumps.push(ActuatorConfig::new("switch.pump_b"));
        b.zones = vec![b1];
        b.subzones = vec![SubZoneConfig::new("b2")];

        let system = SystemConfig {
            name: "home".to_string(),
            zones: vec![a, b],
            ..SystemConfig::default()
        };
        HeatingTree::from_config(&system).unwrap()
    }

    #[test]
    fn parents_heat_whenever_a_descendant_does() {
        let mut tree = deep();
        tree.start(0);
        let leaves = ["a1", "a2", "b11", "b12", "b2"];

        let mut seed: u64 = 0x2545_f491;
        for step in 0..300u64 {
            seed = seed.wrapping_mul(6_364_136_223_846_793_005).wrapping_add(1);
            let leaf = leaves[(seed >> 33) as usize % leaves.len()];
            let on = (seed >> 13) & 1 == 1;
            let now = step * 7_000;

            tree.set_own_demand(leaf, on, now).unwrap();
            tree.tick(now);

            assert_eq!(tree.upward_invariant_violations(), Vec::<String>::new());
            for node in tree.nodes() {
                if node.subzone().is_some() {
                    continue;
                }
                for (name, link) in node.children() {
                    assert_eq!(link.state, demand(&tree, name));
                }
                if node.aggregate() != DemandState::Unknown {
                    assert_eq!(node.demand(), node.aggregate(), "{}", node.name());
                }
            }
        }
    }
}

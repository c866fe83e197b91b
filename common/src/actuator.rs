use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::{
    error::{TreeError, TreeResult},
    timer::{TimerKey, TimerQueue},
    types::{
        ActuatorId, ActuatorKind, ActuatorSnapshot, ControlAction, DemandState, EntityRef, NodeId,
        TimedWindow,
    },
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActuatorPhase {
    Off,
    On,
    PendingOff,
}

#[derive(Debug, Clone)]
pub struct OwnerView {
    pub name: String,
    pub demand: DemandState,
    pub last_change_ms: Option<u64>,
    pub enabled: bool,
}

pub(crate) struct Effects<'a> {
    pub timers: &'a mut TimerQueue,
    pub actions: &'a mut Vec<ControlAction>,
}

#[derive(Debug, Clone)]
pub struct Actuator {
    id: ActuatorId,
    name: String,
    target_id: String,
    kind: ActuatorKind,
    owner_id: NodeId,
    owner: String,
    keep_active_s: u64,
    phase: ActuatorPhase,
    available: bool,
    observed_on: Option<bool>,
    last_seen_ms: Option<u64>,
    extension: TimedWindow,
}

impl Actuator {
    pub fn new(
        id: ActuatorId,
        name: &str,
        target_id: &str,
        kind: ActuatorKind,
        owner_id: NodeId,
        owner: &str,
        keep_active_s: u64,
    ) -> Self {
        let phase = if kind.initial_on() {
            ActuatorPhase::On
        } else {
            ActuatorPhase::Off
        };
        Self {
            id,
            name: name.to_string(),
            target_id: target_id.to_string(),
            kind,
            owner_id,
            owner: owner.to_string(),
            keep_active_s,
            phase,
            available: false,
            observed_on: None,
            last_seen_ms: None,
            extension: TimedWindow::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn target_id(&self) -> &str {
        &self.target_id
    }

    pub fn kind(&self) -> ActuatorKind {
        self.kind
    }

    pub fn owner_id(&self) -> NodeId {
        self.owner_id
    }

    pub fn phase(&self) -> ActuatorPhase {
        self.phase
    }

    pub fn commanded_on(&self) -> bool {
        // A pending off has not been sent yet.
        self.phase != ActuatorPhase::Off
    }

    pub fn observed_on(&self) -> Option<bool> {
        self.observed_on
    }

    pub fn last_seen_ms(&self) -> Option<u64> {
        self.last_seen_ms
    }

    pub fn active_extension(&self) -> TimedWindow {
        self.extension
    }

    fn timer_key(&self) -> TimerKey {
        TimerKey::ActuatorOff(self.id)
    }

    pub(crate) fn set_target_on(&mut self, owner: &OwnerView, fx: Effects<'_>) {
        fx.timers.cancel(self.timer_key());
        let previous = self.phase;
        self.phase = ActuatorPhase::On;
        self.extension = TimedWindow::default();

        match previous {
            ActuatorPhase::On => {}
            ActuatorPhase::PendingOff => {
                debug!("{}: pending off cancelled, staying on", self.name);
                self.mark_changed(fx.actions);
            }
            ActuatorPhase::Off => {
                self.issue(true, owner.enabled, fx.actions);
                self.mark_changed(fx.actions);
            }
        }
    }

    pub(crate) fn set_target_off(
        &mut self,
        owner: &OwnerView,
        force: bool,
        now_ms: u64,
        fx: Effects<'_>,
    ) -> TreeResult<()> {
        if owner.demand.is_on() {
            error!(
                "cannot switch off {} ({}) while zone {} should heat",
                self.name, self.target_id, owner.name
            );
            if self.phase == ActuatorPhase::PendingOff {
                fx.timers.cancel(self.timer_key());
                self.phase = ActuatorPhase::On;
                self.extension = TimedWindow::default();
                self.mark_changed(fx.actions);
            }
            return Err(TreeError::SafetyRefusal {
                actuator: self.name.clone(),
                node: owner.name.clone(),
            });
        }

        if self.phase == ActuatorPhase::Off {
            return Ok(());
        }

        let keep_active_ms = self.keep_active_s.saturating_mul(1_000);
        if force || keep_active_ms == 0 {
            self.turn_off_now(owner, fx);
            return Ok(());
        }

        let changed_at = owner.last_change_ms.unwrap_or(now_ms);
        let off_at = changed_at.saturating_add(keep_active_ms);
        if off_at <= now_ms {
            debug!("{}: keep-active window already over", self.name);
            self.turn_off_now(owner, fx);
            return Ok(());
        }

        if self.phase == ActuatorPhase::PendingOff && self.extension.end_ms == Some(off_at) {
            return Ok(());
        }

        info!(
            "{}: switching off {} in {} ms",
            self.name,
            self.target_id,
            off_at - now_ms
        );
        fx.timers.schedule(self.timer_key(), off_at);
        self.phase = ActuatorPhase::PendingOff;
        self.extension = TimedWindow::open(now_ms, off_at);
        self.mark_changed(fx.actions);
        Ok(())
    }

    pub(crate) fn fire_pending_off(&mut self, owner: &OwnerView, fx: Effects<'_>) {
        if self.phase != ActuatorPhase::PendingOff {
            debug!("{}: ignoring stale pending-off timer", self.name);
            return;
        }
        if owner.demand.is_on() {
            // Refusal already logged and the pending state cleared.
            let _ = self.set_target_off(owner, true, 0, fx);
            return;
        }
        self.turn_off_now(owner, fx);
    }

    pub(crate) fn handle_feedback(
        &mut self,
        observed_on: bool,
        now_ms: u64,
        enabled: bool,
        actions: &mut Vec<ControlAction>,
    ) -> bool {
        let changed = !self.available || self.observed_on != Some(observed_on);
        self.available = true;
        self.observed_on = Some(observed_on);
        self.last_seen_ms = Some(now_ms);

        let commanded = self.commanded_on();
        let reassert = observed_on != commanded;
        if reassert {
            warn!(
                "{}: unintentional change of {} to {}, restoring {}",
                self.name,
                self.target_id,
                on_off(observed_on),
                on_off(commanded)
            );
            self.issue(commanded, enabled, actions);
        }
        if changed {
            self.mark_changed(actions);
        }
        reassert
    }

    pub(crate) fn announce(&self, enabled: bool, actions: &mut Vec<ControlAction>) {
        self.issue(self.commanded_on(), enabled, actions);
    }

    pub fn snapshot(&self) -> ActuatorSnapshot {
        ActuatorSnapshot {
            name: self.name.clone(),
            target_id: self.target_id.clone(),
            kind: self.kind,
            owner: self.owner.clone(),
            commanded_on: self.commanded_on(),
            phase: self.phase,
            available: self.available,
            observed_on: self.observed_on,
            last_seen_ms: self.last_seen_ms,
            keep_active_s: self.keep_active_s,
            active_extension: self.extension,
        }
    }

    fn turn_off_now(&mut self, owner: &OwnerView, fx: Effects<'_>) {
        fx.timers.cancel(self.timer_key());
        self.phase = ActuatorPhase::Off;
        self.extension = TimedWindow::default();
        self.issue(false, owner.enabled, fx.actions);
        self.mark_changed(fx.actions);
    }

    fn issue(&self, on: bool, enabled: bool, actions: &mut Vec<ControlAction>) {
        if !enabled {
            debug!(
                "{}: control disabled, not sending {} to {}",
                self.name,
                on_off(on),
                self.target_id
            );
            return;
        }
        info!("turn {} {}", on_off(on), self.target_id);
        actions.push(ControlAction::switch(&self.target_id, on));
    }

    fn mark_changed(&self, actions: &mut Vec<ControlAction>) {
        actions.push(ControlAction::StateChanged(EntityRef::Actuator(
            self.name.clone(),
        )));
    }
}

fn on_off(on: bool) -> &'static str {
    if on {
        "on"
    } else {
        "off"
    }
}

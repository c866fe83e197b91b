pub const TOPIC_PREFIX: &str = "multizone";

pub const TOPIC_SWITCH_STATE_FILTER: &str = "multizone/switch/+/state";
pub const TOPIC_VALVE_STATE_FILTER: &str = "multizone/valve/+/state";
pub const TOPIC_SENSOR_FILTER: &str = "multizone/sensor/+";
pub const TOPIC_CMD_FILTER: &str = "multizone/cmnd/+/+";

pub fn switch_set_topic(target_id: &str) -> String {
    format!("{TOPIC_PREFIX}/switch/{target_id}/set")
}

pub fn valve_set_topic(target_id: &str) -> String {
    format!("{TOPIC_PREFIX}/valve/{target_id}/set")
}

// `valve.*` entities take open/close, everything else a plain switch.
pub fn actuator_command(target_id: &str, on: bool) -> (String, &'static str) {
    if target_id.starts_with("valve.") {
        (valve_set_topic(target_id), if on { "OPEN" } else { "CLOSE" })
    } else {
        (switch_set_topic(target_id), if on { "ON" } else { "OFF" })
    }
}

pub fn button_press_topic(target_id: &str) -> String {
    format!("{TOPIC_PREFIX}/button/{target_id}/press")
}

pub fn node_state_topic(name: &str) -> String {
    format!("{TOPIC_PREFIX}/state/node/{name}")
}

pub fn actuator_state_topic(name: &str) -> String {
    format!("{TOPIC_PREFIX}/state/actuator/{name}")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeVerb {
    Demand,
    Boost,
    Mode,
    Preset,
    Enabled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboundTopic<'a> {
    Feedback { target_id: &'a str },
    Sensor { source_id: &'a str },
    Command { node: &'a str, verb: NodeVerb },
}

pub fn parse_inbound_topic(topic: &str) -> Option<InboundTopic<'_>> {
    let rest = topic.strip_prefix(TOPIC_PREFIX)?.strip_prefix('/')?;
    let parts: Vec<&str> = rest.split('/').collect();
    match parts.as_slice() {
        ["switch" | "valve", target_id, "state"] => Some(InboundTopic::Feedback {
            target_id: *target_id,
        }),
        ["sensor", source_id] => Some(InboundTopic::Sensor {
            source_id: *source_id,
        }),
        ["cmnd", node, verb] => {
            let verb = match *verb {
                "demand" => NodeVerb::Demand,
                "boost" => NodeVerb::Boost,
                "mode" => NodeVerb::Mode,
                "preset" => NodeVerb::Preset,
                "enabled" => NodeVerb::Enabled,
                _ => return None,
            };
            Some(InboundTopic::Command { node: *node, verb })
        }
        _ => None,
    }
}

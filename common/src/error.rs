use thiserror::Error;

pub type TreeResult<T> = Result<T, TreeError>;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum TreeError {
    #[error("unknown node '{0}'")]
    UnknownNode(String),

    #[error("unknown actuator '{0}'")]
    UnknownActuator(String),

    #[error("unknown input source '{0}'")]
    UnknownInput(String),

    #[error("'{child}' is not a child of '{parent}'")]
    UnknownChild { parent: String, child: String },

    #[error("node '{0}' is not a subzone")]
    NotALeaf(String),

    #[error("unknown preset '{0}'")]
    UnknownPreset(String),

    #[error("invalid target {value} for preset '{preset}'")]
    InvalidPresetValue { preset: String, value: f32 },

    #[error("boost duration must be positive, got {0}s")]
    InvalidDuration(u64),

    #[error("invalid reading from '{input}': {reason}")]
    InvalidReading { input: String, reason: &'static str },

    #[error("duplicate name '{0}'")]
    DuplicateName(String),

    #[error("refusing to switch off '{actuator}' while '{node}' demands heat")]
    SafetyRefusal { actuator: String, node: String },
}

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FillError {
    #[error(
        "type mismatch at {location}: value {value:?} from key {key:?} cannot fill a {slot_type} blank"
    )]
    TypeMismatch {
        span_id: String,
        location: String,
        key: String,
        value: String,
        slot_type: &'static str,
    },

    #[error("{count} anchors left unresolved in strict mode")]
    UnresolvedAnchors { count: usize },

    #[error("cannot edit {location}: {reason}")]
    Structural { location: String, reason: String },
}

impl FillError {
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::UnresolvedAnchors { .. } => 2,
            Self::TypeMismatch { .. } | Self::Structural { .. } => 1,
        }
    }
}

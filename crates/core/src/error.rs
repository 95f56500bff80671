/// Result alias that carries the custom [`RigError`] type.
pub type Result<T> = std::result::Result<T, RigError>;

/// Common error type for the core crate.
#[derive(Debug, thiserror::Error)]
pub enum RigError {
    /// A sibling with the same name already exists under `parent`.
    #[error("bone `{parent}` already has a child named `{name}`")]
    DuplicateName { parent: String, name: String },
    /// Templated copies can only be made from template-marked bones.
    #[error("bone `{name}` is not a template")]
    NotTemplate { name: String },
    /// Names are path segments and must be non-empty without `/`.
    #[error("invalid bone name `{name}`: names must not be empty or contain `/`")]
    InvalidName { name: String },
    /// A relative layer would step past the end of the `i32` range.
    #[error("bone `{name}` cannot be placed next to layer {parent_layer}")]
    LayerOverflow { name: String, parent_layer: i32 },
    /// The handle no longer resolves to a live bone of this skeleton.
    #[error("bone handle does not refer to a live bone")]
    StaleBone,
    /// The root sentinel is owned by the skeleton and cannot be removed.
    #[error("the skeleton root cannot be deleted")]
    RootBone,
    /// Free-form message, mostly used for invalid rig descriptions.
    #[error("{0}")]
    Message(String),
    #[error("{0}")]
    Json(#[from] serde_json::Error),
    /// Wrapper around standard IO errors.
    #[error("{0}")]
    Io(#[from] std::io::Error),
}

impl RigError {
    /// Creates a new error that simply wraps the provided message.
    pub fn msg<T: Into<String>>(msg: T) -> Self {
        Self::Message(msg.into())
    }
}

impl From<&str> for RigError {
    fn from(value: &str) -> Self {
        Self::msg(value)
    }
}

impl From<String> for RigError {
    fn from(value: String) -> Self {
        Self::Message(value)
    }
}

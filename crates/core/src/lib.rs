//! Core library for posing and animating hierarchical 2D sprite skeletons.
//!
//! A [`Skeleton`] owns a tree of [`Bone`]s rooted at a movable origin. Each
//! update propagates rotation, scale and flip from parents to children, and
//! each draw walks the [`LayerIndex`] in ascending layer order, handing
//! pre-computed poses to a [`Renderer`]. Template bones can be stamped out
//! again elsewhere in the tree and whole skeletons can be cloned.

pub mod bone;
pub mod config;
pub mod error;
pub mod layers;
pub mod render;
pub mod skeleton;
pub mod template;

pub use bone::{
    check_name, normalize_angle, Bone, BoneId, BoneOverrides, BoneParams, DrawFn, FieldValue,
    LayerSpec, RelativeLayer, UpdateFn, Vars,
};
pub use config::{BoneDescription, RigDescription};
pub use error::{Result, RigError};
pub use layers::LayerIndex;
pub use render::{DrawCommand, DrawList, DrawPose, Quad, Renderer};
pub use skeleton::{BonePose, Lookup, Skeleton};

use std::path::Path;

use glam::Vec2;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{
    bone::{check_name, BoneId, BoneParams, LayerSpec, Vars},
    render::Quad,
    Result, RigError, Skeleton,
};

/// Data description of a whole rig, usually loaded from JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RigDescription {
    pub position: Vec2,
    pub rotation: f32,
    pub scale: f32,
    pub flipped: bool,
    pub bones: Vec<BoneDescription>,
}

impl Default for RigDescription {
    fn default() -> Self {
        Self {
            position: Vec2::ZERO,
            rotation: 0.0,
            scale: 1.0,
            flipped: false,
            bones: Vec::new(),
        }
    }
}

impl RigDescription {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let description: Self = serde_json::from_str(json)?;
        description.validate()?;
        Ok(description)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.scale.is_finite() {
            return Err(RigError::msg("rig scale must be a finite number"));
        }
        self.bones.iter().try_for_each(BoneDescription::validate)
    }
}

/// Data form of [`BoneParams`], with nested children.
///
/// Origin and connect points may be given either as `[x, y]` vectors or as
/// separate `originx`/`originy` and `connectx`/`connecty` components; the
/// vector form wins when both are present.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BoneDescription {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quad: Option<Quad>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<Vec2>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub originx: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub originy: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connect: Option<Vec2>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connectx: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connecty: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loose: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rot: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rotvel: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub layer: Option<LayerSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vars: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<BoneDescription>,
}

impl BoneDescription {
    pub fn validate(&self) -> Result<()> {
        check_name(&self.name)?;
        self.children.iter().try_for_each(Self::validate)
    }

    /// Construction parameters for this bone alone, children excluded.
    pub fn to_params(&self) -> BoneParams {
        BoneParams {
            name: self.name.clone(),
            image: self.image.clone(),
            quad: self.quad,
            origin: pick_point(self.origin, self.originx, self.originy),
            connect: pick_point(self.connect, self.connectx, self.connecty),
            loose: self.loose,
            rot: self.rot,
            rotvel: self.rotvel,
            layer: self.layer,
            template: self.template,
            vars: self.vars.clone().map(Vars::from_map),
            ..Default::default()
        }
    }
}

fn pick_point(vector: Option<Vec2>, x: Option<f32>, y: Option<f32>) -> Option<Vec2> {
    match (vector, x, y) {
        (Some(vector), _, _) => Some(vector),
        (None, None, None) => None,
        (None, x, y) => Some(Vec2::new(x.unwrap_or(0.0), y.unwrap_or(0.0))),
    }
}

impl Skeleton {
    /// Builds and poses a skeleton from a rig description.
    pub fn from_description(description: &RigDescription) -> Result<Self> {
        description.validate()?;
        let mut skeleton = Skeleton::new(description.position.x, description.position.y);
        skeleton.set_rotation(description.rotation);
        skeleton.set_scale(description.scale);
        skeleton.set_flipped(description.flipped);
        skeleton.refresh_pose(skeleton.root())?;

        let root = skeleton.root();
        for bone in &description.bones {
            attach_described(&mut skeleton, root, bone)?;
        }
        tracing::debug!(bones = skeleton.len() - 1, "built skeleton from description");
        Ok(skeleton)
    }
}

fn attach_described(
    skeleton: &mut Skeleton,
    parent: BoneId,
    description: &BoneDescription,
) -> Result<()> {
    let id = skeleton.attach_child(parent, description.to_params())?;
    for child in &description.children {
        attach_described(skeleton, id, child)?;
    }
    Ok(())
}

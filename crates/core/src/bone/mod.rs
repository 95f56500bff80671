use std::{
    cell::RefCell,
    collections::{BTreeMap, HashMap},
    f32::consts::{PI, TAU},
    fmt,
    rc::Rc,
};

use glam::Vec2;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use slotmap::new_key_type;

use crate::render::{DrawPose, Quad, Renderer};

new_key_type! {
    /// Generational handle to a bone stored in a [`Skeleton`](crate::Skeleton).
    ///
    /// Handles never keep a bone alive. Once the bone is deleted the handle
    /// resolves to nothing, even if its slot is later reused.
    pub struct BoneId;
}

/// Custom per-bone draw callback. Replaces the default image drawing.
pub type DrawFn = Rc<dyn Fn(&mut dyn Renderer, &DrawPose)>;

/// Per-bone update callback, run before the bone's pose is recomputed.
pub type UpdateFn = Rc<dyn Fn(&mut Bone, f32)>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelativeLayer {
    Above,
    Below,
}

/// Draw layer requested at construction time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LayerSpec {
    Index(i32),
    Relative(RelativeLayer),
}

impl LayerSpec {
    pub const ABOVE: Self = Self::Relative(RelativeLayer::Above);
    pub const BELOW: Self = Self::Relative(RelativeLayer::Below);

    /// Resolves to a concrete layer next to `parent_layer`. `None` when a
    /// relative step would leave the `i32` range.
    pub fn resolve(self, parent_layer: i32) -> Option<i32> {
        match self {
            Self::Index(layer) => Some(layer),
            Self::Relative(RelativeLayer::Above) => parent_layer.checked_add(1),
            Self::Relative(RelativeLayer::Below) => parent_layer.checked_sub(1),
        }
    }
}

impl Default for LayerSpec {
    fn default() -> Self {
        Self::ABOVE
    }
}

impl From<i32> for LayerSpec {
    fn from(value: i32) -> Self {
        Self::Index(value)
    }
}

impl From<RelativeLayer> for LayerSpec {
    fn from(value: RelativeLayer) -> Self {
        Self::Relative(value)
    }
}

/// Free-form data bag attached to a bone.
///
/// Cloning a bag is shallow: the clone is a new map whose entries point at
/// the same shared values, so in-place updates through [`Vars::update`] are
/// visible from both bags while [`Vars::set`] only affects the bag it is
/// called on.
#[derive(Clone, Default)]
pub struct Vars {
    values: HashMap<String, Rc<RefCell<Value>>>,
}

impl Vars {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(map: serde_json::Map<String, Value>) -> Self {
        let mut vars = Self::new();
        for (key, value) in map {
            vars.set(key, value);
        }
        vars
    }

    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.values.insert(key.into(), Rc::new(RefCell::new(value)));
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.values.get(key).map(|value| value.borrow().clone())
    }

    /// Mutates a value in place. Returns `false` if the key is unknown.
    pub fn update(&self, key: &str, apply: impl FnOnce(&mut Value)) -> bool {
        match self.values.get(key) {
            Some(value) => {
                apply(&mut value.borrow_mut());
                true
            }
            None => false,
        }
    }

    /// Returns true if both bags hold the very same value cell for `key`.
    pub fn shares_value(&self, other: &Vars, key: &str) -> bool {
        match (self.values.get(key), other.values.get(key)) {
            (Some(a), Some(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl fmt::Debug for Vars {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for (key, value) in &self.values {
            map.entry(key, &*value.borrow());
        }
        map.finish()
    }
}

/// Construction parameters for a bone. Everything but `name` is optional.
#[derive(Clone, Default)]
pub struct BoneParams {
    pub name: String,
    pub image: Option<String>,
    pub quad: Option<Quad>,
    pub draw_fn: Option<DrawFn>,
    pub update_fn: Option<UpdateFn>,
    /// Pivot point for rotation and drawing.
    pub origin: Option<Vec2>,
    /// Attach point on the parent; the local offset is `connect - parent.origin`.
    pub connect: Option<Vec2>,
    pub loose: Option<bool>,
    pub rot: Option<f32>,
    pub rotvel: Option<f32>,
    pub layer: Option<LayerSpec>,
    /// Inherited from the parent when unset.
    pub template: Option<bool>,
    pub vars: Option<Vars>,
}

impl BoneParams {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn image(mut self, image: impl Into<String>) -> Self {
        self.image = Some(image.into());
        self
    }

    pub fn quad(mut self, quad: Quad) -> Self {
        self.quad = Some(quad);
        self
    }

    pub fn draw_fn(mut self, draw: impl Fn(&mut dyn Renderer, &DrawPose) + 'static) -> Self {
        self.draw_fn = Some(Rc::new(draw));
        self
    }

    pub fn on_update(mut self, update: impl Fn(&mut Bone, f32) + 'static) -> Self {
        self.update_fn = Some(Rc::new(update));
        self
    }

    pub fn origin(self, x: f32, y: f32) -> Self {
        self.origin_vec(Vec2::new(x, y))
    }

    pub fn origin_vec(mut self, origin: Vec2) -> Self {
        self.origin = Some(origin);
        self
    }

    pub fn connect(self, x: f32, y: f32) -> Self {
        self.connect_vec(Vec2::new(x, y))
    }

    pub fn connect_vec(mut self, connect: Vec2) -> Self {
        self.connect = Some(connect);
        self
    }

    pub fn loose(mut self, loose: bool) -> Self {
        self.loose = Some(loose);
        self
    }

    pub fn rot(mut self, rot: f32) -> Self {
        self.rot = Some(rot);
        self
    }

    pub fn rotvel(mut self, rotvel: f32) -> Self {
        self.rotvel = Some(rotvel);
        self
    }

    pub fn layer(mut self, layer: impl Into<LayerSpec>) -> Self {
        self.layer = Some(layer.into());
        self
    }

    pub fn template(mut self, template: bool) -> Self {
        self.template = Some(template);
        self
    }

    pub fn vars(mut self, vars: Vars) -> Self {
        self.vars = Some(vars);
        self
    }
}

impl fmt::Debug for BoneParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoneParams")
            .field("name", &self.name)
            .field("image", &self.image)
            .field("quad", &self.quad)
            .field("draw_fn", &self.draw_fn.is_some())
            .field("update_fn", &self.update_fn.is_some())
            .field("origin", &self.origin)
            .field("connect", &self.connect)
            .field("loose", &self.loose)
            .field("rot", &self.rot)
            .field("rotvel", &self.rotvel)
            .field("layer", &self.layer)
            .field("template", &self.template)
            .field("vars", &self.vars)
            .finish()
    }
}

/// Fields to replace when stamping out a copy of a template bone.
#[derive(Clone, Default)]
pub struct BoneOverrides {
    pub name: Option<String>,
    pub image: Option<String>,
    pub quad: Option<Quad>,
    pub draw_fn: Option<DrawFn>,
    pub update_fn: Option<UpdateFn>,
    pub origin: Option<Vec2>,
    pub connect: Option<Vec2>,
    pub loose: Option<bool>,
    pub rot: Option<f32>,
    pub rotvel: Option<f32>,
    pub layer: Option<LayerSpec>,
    pub template: Option<bool>,
    pub vars: Option<Vars>,
}

impl BoneOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Default::default()
        }
    }

    pub fn connect(mut self, x: f32, y: f32) -> Self {
        self.connect = Some(Vec2::new(x, y));
        self
    }

    pub fn origin(mut self, x: f32, y: f32) -> Self {
        self.origin = Some(Vec2::new(x, y));
        self
    }

    pub fn image(mut self, image: impl Into<String>) -> Self {
        self.image = Some(image.into());
        self
    }

    pub fn rot(mut self, rot: f32) -> Self {
        self.rot = Some(rot);
        self
    }

    pub fn rotvel(mut self, rotvel: f32) -> Self {
        self.rotvel = Some(rotvel);
        self
    }

    pub fn loose(mut self, loose: bool) -> Self {
        self.loose = Some(loose);
        self
    }

    pub fn layer(mut self, layer: impl Into<LayerSpec>) -> Self {
        self.layer = Some(layer.into());
        self
    }

    pub fn template(mut self, template: bool) -> Self {
        self.template = Some(template);
        self
    }

    pub fn vars(mut self, vars: Vars) -> Self {
        self.vars = Some(vars);
        self
    }

    /// Writes every set field over `params`.
    pub fn apply(self, params: &mut BoneParams) {
        if let Some(name) = self.name {
            params.name = name;
        }
        if self.image.is_some() {
            params.image = self.image;
        }
        if self.quad.is_some() {
            params.quad = self.quad;
        }
        if self.draw_fn.is_some() {
            params.draw_fn = self.draw_fn;
        }
        if self.update_fn.is_some() {
            params.update_fn = self.update_fn;
        }
        if self.origin.is_some() {
            params.origin = self.origin;
        }
        if self.connect.is_some() {
            params.connect = self.connect;
        }
        if self.loose.is_some() {
            params.loose = self.loose;
        }
        if self.rot.is_some() {
            params.rot = self.rot;
        }
        if self.rotvel.is_some() {
            params.rotvel = self.rotvel;
        }
        if self.layer.is_some() {
            params.layer = self.layer;
        }
        if self.template.is_some() {
            params.template = self.template;
        }
        if self.vars.is_some() {
            params.vars = self.vars;
        }
    }
}

/// Value of a named bone field, as returned by [`Bone::field`].
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Number(f32),
    Flag(bool),
    Vector(Vec2),
    Layer(i32),
    Text(String),
}

/// A rigid 2D transform in a skeleton's bone tree.
pub struct Bone {
    name: String,
    pub(crate) parent: Option<BoneId>,
    pub(crate) children: BTreeMap<String, BoneId>,
    /// Offset from the parent's world position, before rotation and scale.
    pub offset: Vec2,
    pub rot_offset: f32,
    /// Change of `rot_offset` per unit of time.
    pub rotvel: f32,
    /// Loose bones ignore the parent's rotation.
    pub loose: bool,
    pub(crate) layer: i32,
    /// Layer move asked for through [`Bone::request_layer`].
    pub(crate) pending_layer: Option<i32>,
    /// Layer this bone is currently filed under in the skeleton's index.
    pub(crate) registered_layer: Option<i32>,
    pub origin: Vec2,
    pub(crate) initial_rot: f32,
    pub(crate) position: Vec2,
    pub(crate) rotation: f32,
    pub image: Option<String>,
    pub quad: Option<Quad>,
    pub draw_fn: Option<DrawFn>,
    pub update_fn: Option<UpdateFn>,
    pub vars: Option<Vars>,
    pub(crate) template: bool,
    pub(crate) construction: Option<BoneParams>,
}

impl Bone {
    pub(crate) const ROOT_NAME: &'static str = "root";

    /// Zero-offset, zero-rotation sentinel at the top of every skeleton.
    pub(crate) fn root() -> Self {
        Self::with_name(Self::ROOT_NAME.to_string())
    }

    pub(crate) fn with_name(name: String) -> Self {
        Self {
            name,
            parent: None,
            children: BTreeMap::new(),
            offset: Vec2::ZERO,
            rot_offset: 0.0,
            rotvel: 0.0,
            loose: false,
            layer: 0,
            pending_layer: None,
            registered_layer: None,
            origin: Vec2::ZERO,
            initial_rot: 0.0,
            position: Vec2::ZERO,
            rotation: 0.0,
            image: None,
            quad: None,
            draw_fn: None,
            update_fn: None,
            vars: None,
            template: false,
            construction: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parent(&self) -> Option<BoneId> {
        self.parent
    }

    /// Children keyed by name, in name order.
    pub fn children(&self) -> impl Iterator<Item = (&str, BoneId)> + '_ {
        self.children.iter().map(|(name, id)| (name.as_str(), *id))
    }

    pub fn child(&self, name: &str) -> Option<BoneId> {
        self.children.get(name).copied()
    }

    pub fn child_count(&self) -> usize {
        self.children.len()
    }

    /// World position computed by the last pose update.
    pub fn position(&self) -> Vec2 {
        self.position
    }

    /// World rotation computed by the last pose update.
    pub fn rotation(&self) -> f32 {
        self.rotation
    }

    /// Rotation offset the bone was constructed with.
    pub fn initial_rotation(&self) -> f32 {
        self.initial_rot
    }

    /// Draw layer the bone is filed under.
    pub fn layer(&self) -> i32 {
        self.layer
    }

    /// Asks for a move to `layer`. The move is applied right after this
    /// bone's update callback returns, so a callback can use it to change
    /// draw order. Outside of a tick use [`Skeleton::set_layer`] instead.
    ///
    /// [`Skeleton::set_layer`]: crate::Skeleton::set_layer
    pub fn request_layer(&mut self, layer: i32) {
        self.pending_layer = Some(layer);
    }

    pub fn is_template(&self) -> bool {
        self.template
    }

    /// Saved construction parameters; only present on template bones.
    pub fn construction_params(&self) -> Option<&BoneParams> {
        self.construction.as_ref()
    }

    /// Typed lookup of a defined field by name.
    pub fn field(&self, key: &str) -> Option<FieldValue> {
        let value = match key {
            "name" => FieldValue::Text(self.name.clone()),
            "image" => FieldValue::Text(self.image.clone()?),
            "position" => FieldValue::Vector(self.position),
            "x" => FieldValue::Number(self.position.x),
            "y" => FieldValue::Number(self.position.y),
            "rotation" => FieldValue::Number(self.rotation),
            "rot_offset" => FieldValue::Number(self.rot_offset),
            "initial_rot" => FieldValue::Number(self.initial_rot),
            "rotvel" => FieldValue::Number(self.rotvel),
            "offset" => FieldValue::Vector(self.offset),
            "origin" => FieldValue::Vector(self.origin),
            "loose" => FieldValue::Flag(self.loose),
            "template" => FieldValue::Flag(self.template),
            "layer" => FieldValue::Layer(self.layer),
            _ => return None,
        };
        Some(value)
    }

    /// Advances the rotation offset by `rotvel * dt`, kept within (-π, π].
    pub(crate) fn advance_rotation(&mut self, dt: f32) {
        self.rot_offset = normalize_angle(self.rot_offset + self.rotvel * dt);
    }

    pub(crate) fn draw(&self, renderer: &mut dyn Renderer, pose: &DrawPose) {
        if let Some(draw) = &self.draw_fn {
            draw(renderer, pose);
        } else if let Some(image) = &self.image {
            renderer.draw_image(&self.name, image, self.quad.as_ref(), pose);
        }
    }

    pub(crate) fn draw_pose(&self, scale: f32, flipped: bool) -> DrawPose {
        DrawPose {
            x: self.position.x,
            y: self.position.y,
            rotation: apparent_rotation(self.rotation, flipped),
            scale_x: if flipped { -scale } else { scale },
            scale,
            origin_x: self.origin.x,
            origin_y: self.origin.y,
        }
    }
}

impl fmt::Debug for Bone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bone")
            .field("name", &self.name)
            .field("parent", &self.parent)
            .field("children", &self.children.len())
            .field("offset", &self.offset)
            .field("rot_offset", &self.rot_offset)
            .field("rotvel", &self.rotvel)
            .field("loose", &self.loose)
            .field("layer", &self.layer)
            .field("position", &self.position)
            .field("rotation", &self.rotation)
            .field("template", &self.template)
            .finish()
    }
}

/// Checks that `name` can be used as a path segment: non-empty, without `/`.
pub fn check_name(name: &str) -> crate::Result<()> {
    if name.is_empty() || name.contains('/') {
        return Err(crate::RigError::InvalidName {
            name: name.to_string(),
        });
    }
    Ok(())
}

/// Wraps an angle into (-π, π].
pub fn normalize_angle(angle: f32) -> f32 {
    if !angle.is_finite() {
        return angle;
    }
    let wrapped = PI - (PI - angle).rem_euclid(TAU);
    if wrapped <= -PI {
        wrapped + TAU
    } else {
        wrapped
    }
}

/// Rotation a renderer should use for a sprite on a possibly flipped skeleton.
pub fn apparent_rotation(rotation: f32, flipped: bool) -> f32 {
    if flipped {
        PI - rotation
    } else {
        rotation
    }
}

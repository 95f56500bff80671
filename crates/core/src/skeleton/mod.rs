use glam::Vec2;
use serde::Serialize;
use slotmap::SlotMap;

use crate::{
    bone::{apparent_rotation, check_name, Bone, BoneId, BoneParams, FieldValue},
    layers::LayerIndex,
    render::Renderer,
    Result, RigError,
};

/// Result of [`Skeleton::lookup`]: a defined field wins over a child bone
/// with the same name.
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup {
    Field(FieldValue),
    Child(BoneId),
}

/// Serializable pose of a single bone, as captured by [`Skeleton::snapshot`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BonePose {
    /// Slash-separated names from the first bone below the root.
    pub path: String,
    pub name: String,
    pub layer: i32,
    pub position: [f32; 2],
    pub rotation: f32,
    pub apparent_rotation: f32,
}

/// A tree of bones rooted at a movable origin, plus the layer index that
/// decides draw order.
///
/// Bones live in an arena owned by the skeleton; each bone's child map is
/// the ownership edge, and [`BoneId`] handles are non-owning.
pub struct Skeleton {
    pub(crate) bones: SlotMap<BoneId, Bone>,
    pub(crate) root: BoneId,
    pub(crate) layers: LayerIndex,
    position: Vec2,
    rotation: f32,
    scale: f32,
    flipped: bool,
}

impl Skeleton {
    /// Creates an empty skeleton at `(x, y)` with unit scale.
    pub fn new(x: f32, y: f32) -> Self {
        let mut bones = SlotMap::with_key();
        let root = bones.insert(Bone::root());
        let mut skeleton = Self {
            bones,
            root,
            layers: LayerIndex::new(),
            position: Vec2::new(x, y),
            rotation: 0.0,
            scale: 1.0,
            flipped: false,
        };
        skeleton.recompute_pose(root);
        skeleton
    }

    pub fn with_scale(mut self, scale: f32) -> Self {
        self.scale = scale;
        self.recompute_subtree(self.root);
        self
    }

    pub fn root(&self) -> BoneId {
        self.root
    }

    pub fn position(&self) -> Vec2 {
        self.position
    }

    pub fn rotation(&self) -> f32 {
        self.rotation
    }

    pub fn scale(&self) -> f32 {
        self.scale
    }

    pub fn is_flipped(&self) -> bool {
        self.flipped
    }

    /// Pose setters only take effect on the next [`Skeleton::update`] or
    /// [`Skeleton::refresh_pose`].
    pub fn set_position(&mut self, x: f32, y: f32) {
        self.position = Vec2::new(x, y);
    }

    pub fn set_rotation(&mut self, rotation: f32) {
        self.rotation = rotation;
    }

    pub fn set_scale(&mut self, scale: f32) {
        self.scale = scale;
    }

    pub fn set_flipped(&mut self, flipped: bool) {
        self.flipped = flipped;
    }

    pub fn flip(&mut self) {
        self.flipped = !self.flipped;
    }

    pub fn layers(&self) -> &LayerIndex {
        &self.layers
    }

    pub fn min_layer(&self) -> Option<i32> {
        self.layers.min_layer()
    }

    pub fn max_layer(&self) -> Option<i32> {
        self.layers.max_layer()
    }

    pub fn bone(&self, id: BoneId) -> Option<&Bone> {
        self.bones.get(id)
    }

    /// Mutable access to a bone. The draw layer is not writable here; use
    /// [`Skeleton::set_layer`] so the layer index stays in step.
    pub fn bone_mut(&mut self, id: BoneId) -> Option<&mut Bone> {
        self.bones.get_mut(id)
    }

    pub fn contains(&self, id: BoneId) -> bool {
        self.bones.contains_key(id)
    }

    /// Number of live bones, the root included.
    pub fn len(&self) -> usize {
        self.bones.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bones.len() <= 1
    }

    /// Named child of `id`, if both exist.
    pub fn child(&self, id: BoneId, name: &str) -> Option<BoneId> {
        self.bones.get(id)?.child(name)
    }

    /// Resolves a slash-separated path of child names starting at the root.
    pub fn find(&self, path: &str) -> Option<BoneId> {
        path.split('/')
            .filter(|segment| !segment.is_empty())
            .try_fold(self.root, |id, name| self.child(id, name))
    }

    /// Two-step lookup: a defined field of the bone first, then a child bone
    /// of that name. Unknown keys yield `None`.
    pub fn lookup(&self, id: BoneId, key: &str) -> Option<Lookup> {
        let bone = self.bones.get(id)?;
        bone.field(key)
            .map(Lookup::Field)
            .or_else(|| bone.child(key).map(Lookup::Child))
    }

    /// Creates a bone under `parent` and files it into the layer index.
    pub fn attach_child(&mut self, parent: BoneId, params: BoneParams) -> Result<BoneId> {
        let parent_bone = self.bones.get(parent).ok_or(RigError::StaleBone)?;
        check_name(&params.name)?;
        if parent_bone.children.contains_key(&params.name) {
            return Err(RigError::DuplicateName {
                parent: parent_bone.name().to_string(),
                name: params.name,
            });
        }
        let layer = params
            .layer
            .unwrap_or_default()
            .resolve(parent_bone.layer)
            .ok_or_else(|| RigError::LayerOverflow {
                name: params.name.clone(),
                parent_layer: parent_bone.layer,
            })?;

        let template = params.template.unwrap_or(parent_bone.template);
        let mut bone = Bone::with_name(params.name.clone());
        bone.layer = layer;
        bone.offset = params.connect.unwrap_or(Vec2::ZERO) - parent_bone.origin;
        bone.origin = params.origin.unwrap_or(Vec2::ZERO);
        bone.loose = params.loose.unwrap_or(false);
        bone.rot_offset = params.rot.unwrap_or(0.0);
        bone.initial_rot = bone.rot_offset;
        bone.rotvel = params.rotvel.unwrap_or(0.0);
        bone.image = params.image.clone();
        bone.quad = params.quad;
        bone.draw_fn = params.draw_fn.clone();
        bone.update_fn = params.update_fn.clone();
        bone.vars = params.vars.clone();
        bone.template = template;
        if template {
            bone.construction = Some(BoneParams {
                template: Some(true),
                ..params
            });
        }

        let id = self.link(parent, bone);
        tracing::debug!(
            bone = self.bones[id].name(),
            parent = self.bones[parent].name(),
            layer = self.bones[id].layer,
            template,
            "attached bone"
        );
        Ok(id)
    }

    /// Inserts an already built bone under `parent`, sets both ownership
    /// edges, computes its pose and registers its layer in one step.
    pub(crate) fn link(&mut self, parent: BoneId, mut bone: Bone) -> BoneId {
        bone.parent = Some(parent);
        bone.registered_layer = None;
        bone.pending_layer = None;
        bone.children.clear();
        let name = bone.name().to_string();
        let id = self.bones.insert(bone);
        self.bones[parent].children.insert(name, id);
        self.recompute_pose(id);
        self.sync_layer(id);
        id
    }

    /// Advances every bone by `dt` and recomputes world poses, parents
    /// strictly before their children.
    pub fn update(&mut self, dt: f32) {
        self.recompute_pose(self.root);
        let mut stack: Vec<BoneId> =
            self.bones[self.root].children.values().rev().copied().collect();
        while let Some(id) = stack.pop() {
            let Some(bone) = self.bones.get_mut(id) else {
                continue;
            };
            if let Some(callback) = bone.update_fn.clone() {
                callback(&mut *bone, dt);
            }
            if let Some(layer) = bone.pending_layer.take() {
                bone.layer = layer;
            }
            bone.advance_rotation(dt);
            stack.extend(bone.children.values().rev().copied());

            self.sync_layer(id);
            self.recompute_pose(id);
        }
    }

    /// Recomputes the pose of `id` and its subtree without advancing time.
    pub fn refresh_pose(&mut self, id: BoneId) -> Result<()> {
        if !self.bones.contains_key(id) {
            return Err(RigError::StaleBone);
        }
        self.recompute_subtree(id);
        Ok(())
    }

    fn recompute_subtree(&mut self, id: BoneId) {
        for bone_id in self.descendants(id) {
            self.recompute_pose(bone_id);
        }
    }

    /// World pose from the parent's current pose. The root takes the
    /// skeleton's own position and base rotation.
    pub(crate) fn recompute_pose(&mut self, id: BoneId) {
        let parent_pose = match self.bones.get(id) {
            Some(bone) => bone
                .parent
                .and_then(|parent| self.bones.get(parent))
                .map(|parent| (parent.position, parent.rotation)),
            None => return,
        };
        let Some((origin, base_rotation)) = parent_pose else {
            let bone = &mut self.bones[id];
            bone.position = self.position;
            bone.rotation = self.rotation;
            return;
        };

        let scale = self.scale;
        let flipped = self.flipped;
        let bone = &mut self.bones[id];
        bone.rotation = if bone.loose {
            bone.rot_offset
        } else {
            base_rotation + bone.rot_offset
        };
        let mut arm = Vec2::from_angle(base_rotation).rotate(bone.offset) * scale;
        if flipped {
            arm.x = -arm.x;
        }
        bone.position = origin + arm;
    }

    /// Keeps the layer index in step with the bone's `layer` field.
    fn sync_layer(&mut self, id: BoneId) {
        let Some(bone) = self.bones.get(id) else {
            return;
        };
        let layer = bone.layer;
        let registered = bone.registered_layer;
        if registered == Some(layer) {
            return;
        }
        if let Some(previous) = registered {
            self.layers.remove(id, previous);
        }
        let bones = &self.bones;
        self.layers.insert(id, layer, |entry| bones.contains_key(entry));
        self.bones[id].registered_layer = Some(layer);
    }

    /// Moves a bone to another draw layer.
    pub fn set_layer(&mut self, id: BoneId, layer: i32) -> Result<()> {
        let bone = self.bones.get_mut(id).ok_or(RigError::StaleBone)?;
        bone.layer = layer;
        bone.pending_layer = None;
        if id != self.root {
            self.sync_layer(id);
        }
        Ok(())
    }

    /// Adds to the local offset. Visible after the next update or
    /// [`Skeleton::refresh_pose`].
    pub fn translate(&mut self, id: BoneId, dx: f32, dy: f32) -> Result<()> {
        self.translate_vec(id, Vec2::new(dx, dy))
    }

    pub fn translate_vec(&mut self, id: BoneId, delta: Vec2) -> Result<()> {
        let bone = self.bones.get_mut(id).ok_or(RigError::StaleBone)?;
        bone.offset += delta;
        Ok(())
    }

    /// Translates by a displacement given in world axes, converting it into
    /// the bone's local offset space through the parent's world rotation.
    pub fn absolute_translate(&mut self, id: BoneId, dx: f32, dy: f32) -> Result<()> {
        let bone = self.bones.get(id).ok_or(RigError::StaleBone)?;
        let basis = bone
            .parent
            .and_then(|parent| self.bones.get(parent))
            .map_or(0.0, |parent| parent.rotation);

        let mut world = Vec2::new(dx, dy);
        if self.flipped {
            world.x = -world.x;
        }
        let mut local = Vec2::from_angle(-basis).rotate(world);
        if self.scale.abs() > f32::EPSILON {
            local /= self.scale;
        }
        self.translate_vec(id, local)
    }

    /// Adds to the rotation offset; compounds with `rotvel`.
    pub fn rotate(&mut self, id: BoneId, angle: f32) -> Result<()> {
        let bone = self.bones.get_mut(id).ok_or(RigError::StaleBone)?;
        bone.rot_offset += angle;
        Ok(())
    }

    pub fn rotate_to(&mut self, id: BoneId, angle: f32) -> Result<()> {
        let bone = self.bones.get_mut(id).ok_or(RigError::StaleBone)?;
        bone.rot_offset = angle;
        Ok(())
    }

    /// Sets the rotation offset relative to the bone's initial rotation.
    pub fn relative_rotate_to(&mut self, id: BoneId, angle: f32) -> Result<()> {
        let bone = self.bones.get_mut(id).ok_or(RigError::StaleBone)?;
        bone.rot_offset = bone.initial_rot + angle;
        Ok(())
    }

    /// Rotation a renderer should use for the bone: `π - rot` when flipped.
    pub fn apparent_rotation(&self, id: BoneId) -> Option<f32> {
        self.bones
            .get(id)
            .map(|bone| apparent_rotation(bone.rotation, self.flipped))
    }

    /// True iff `candidate` is a proper ancestor of `id` other than the root.
    pub fn is_child_of(&self, id: BoneId, candidate: BoneId) -> bool {
        has_ancestor(&self.bones, self.root, id, candidate)
    }

    /// `id` followed by all of its descendants, depth first.
    pub fn descendants(&self, id: BoneId) -> Vec<BoneId> {
        let mut found = Vec::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            let Some(bone) = self.bones.get(current) else {
                continue;
            };
            found.push(current);
            stack.extend(bone.children.values().rev().copied());
        }
        found
    }

    /// Removes `id` and all of its descendants from every layer right away.
    pub fn clean_layers(&mut self, id: BoneId) -> usize {
        let bones = &self.bones;
        let root = self.root;
        let removed = self
            .layers
            .clean(|entry| entry == id || has_ancestor(bones, root, entry, id));
        for bone_id in self.descendants(id) {
            self.bones[bone_id].registered_layer = None;
        }
        removed
    }

    /// Detaches `id` from its parent and drops its subtree.
    ///
    /// With `purge_now` every layer entry of the subtree is removed
    /// immediately; otherwise the stale entries stay behind until
    /// [`Skeleton::draw`] or a later insertion reclaims them.
    pub fn delete(&mut self, id: BoneId, purge_now: bool) -> Result<()> {
        if id == self.root {
            return Err(RigError::RootBone);
        }
        let bone = self.bones.get(id).ok_or(RigError::StaleBone)?;
        let name = bone.name().to_string();
        let parent = bone.parent;

        let purged = if purge_now { self.clean_layers(id) } else { 0 };
        if let Some(parent) = parent.and_then(|parent| self.bones.get_mut(parent)) {
            parent.children.remove(&name);
        }
        let subtree = self.descendants(id);
        for bone_id in &subtree {
            self.bones.remove(*bone_id);
        }

        tracing::debug!(
            bone = %name,
            removed = subtree.len(),
            purged,
            "deleted bone"
        );
        Ok(())
    }

    /// Draws every live bone, layer by layer in ascending order. Entries
    /// left behind by deleted bones are cleared as they are met.
    pub fn draw(&mut self, renderer: &mut dyn Renderer) -> usize {
        let Some((min, max)) = self.layers.range() else {
            return 0;
        };
        let scale = self.scale;
        let flipped = self.flipped;
        let mut drawn = 0;

        for layer in min..=max {
            let Some(slots) = self.layers.slots_mut(layer) else {
                continue;
            };
            for entry in slots.iter_mut() {
                let Some(id) = *entry else {
                    continue;
                };
                match self.bones.get(id) {
                    Some(bone) => {
                        bone.draw(renderer, &bone.draw_pose(scale, flipped));
                        drawn += 1;
                    }
                    None => {
                        tracing::trace!(layer, "reclaimed stale layer entry");
                        *entry = None;
                    }
                }
            }
        }
        drawn
    }

    /// Poses of every bone below the root, depth first with children in
    /// name order.
    pub fn snapshot(&self) -> Vec<BonePose> {
        let mut poses = Vec::new();
        let mut stack: Vec<(BoneId, String)> = self.bones[self.root]
            .children
            .iter()
            .rev()
            .map(|(name, id)| (*id, name.clone()))
            .collect();
        while let Some((id, path)) = stack.pop() {
            let Some(bone) = self.bones.get(id) else {
                continue;
            };
            stack.extend(
                bone.children
                    .iter()
                    .rev()
                    .map(|(name, child)| (*child, format!("{path}/{name}"))),
            );
            poses.push(BonePose {
                name: bone.name().to_string(),
                path,
                layer: bone.layer,
                position: bone.position.to_array(),
                rotation: bone.rotation,
                apparent_rotation: apparent_rotation(bone.rotation, self.flipped),
            });
        }
        poses
    }
}

fn has_ancestor(
    bones: &SlotMap<BoneId, Bone>,
    root: BoneId,
    id: BoneId,
    candidate: BoneId,
) -> bool {
    let mut current = bones.get(id).and_then(|bone| bone.parent);
    while let Some(ancestor) = current {
        if ancestor == root {
            return false;
        }
        if ancestor == candidate {
            return true;
        }
        current = bones.get(ancestor).and_then(|bone| bone.parent);
    }
    false
}

impl Default for Skeleton {
    fn default() -> Self {
        Self::new(0.0, 0.0)
    }
}

impl std::fmt::Debug for Skeleton {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Skeleton")
            .field("position", &self.position)
            .field("rotation", &self.rotation)
            .field("scale", &self.scale)
            .field("flipped", &self.flipped)
            .field("bones", &self.bones.len())
            .field("layers", &self.layers.range())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::{cell::Cell, f32::consts::PI, rc::Rc};

    use super::*;
    use crate::{
        bone::LayerSpec,
        render::{DrawList, DrawPose},
    };

    fn close(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-4
    }

    fn close_vec(a: Vec2, b: Vec2) -> bool {
        close(a.x, b.x) && close(a.y, b.y)
    }

    fn arm_rig() -> (Skeleton, BoneId) {
        let mut skeleton = Skeleton::new(0.0, 0.0);
        let arm = skeleton
            .attach_child(skeleton.root(), BoneParams::new("arm").connect(10.0, 0.0))
            .unwrap();
        (skeleton, arm)
    }

    #[test]
    fn places_child_at_connect_point_and_mirrors_on_flip() {
        let (mut skeleton, arm) = arm_rig();
        skeleton.update(0.0);
        assert!(close_vec(skeleton.bone(arm).unwrap().position(), Vec2::new(10.0, 0.0)));

        skeleton.set_flipped(true);
        skeleton.update(0.0);
        assert!(close_vec(skeleton.bone(arm).unwrap().position(), Vec2::new(-10.0, 0.0)));
    }

    #[test]
    fn flip_negates_x_and_keeps_y() {
        let mut skeleton = Skeleton::new(5.0, 5.0);
        let upper = skeleton
            .attach_child(skeleton.root(), BoneParams::new("upper").connect(3.0, 4.0).rot(0.4))
            .unwrap();
        let lower = skeleton
            .attach_child(upper, BoneParams::new("lower").connect(2.0, -1.0))
            .unwrap();
        skeleton.update(0.0);
        let before: Vec<Vec2> = [upper, lower]
            .iter()
            .map(|id| skeleton.bone(*id).unwrap().position() - skeleton.position())
            .collect();

        skeleton.flip();
        skeleton.update(0.0);
        for (id, before) in [upper, lower].iter().zip(before) {
            let after = skeleton.bone(*id).unwrap().position() - skeleton.position();
            assert!(close(after.x, -before.x));
            assert!(close(after.y, before.y));
        }
    }

    #[test]
    fn rotation_composes_unless_loose() {
        let mut skeleton = Skeleton::new(0.0, 0.0);
        let shoulder = skeleton
            .attach_child(skeleton.root(), BoneParams::new("shoulder").rot(0.5).rotvel(0.3))
            .unwrap();
        let elbow = skeleton
            .attach_child(shoulder, BoneParams::new("elbow").connect(4.0, 0.0).rot(0.25))
            .unwrap();
        let charm = skeleton
            .attach_child(shoulder, BoneParams::new("charm").rot(0.1).loose(true))
            .unwrap();

        for _ in 0..7 {
            skeleton.update(0.4);
            let parent = skeleton.bone(shoulder).unwrap().rotation();
            let elbow_bone = skeleton.bone(elbow).unwrap();
            let charm_bone = skeleton.bone(charm).unwrap();
            assert!(close(elbow_bone.rotation(), parent + elbow_bone.rot_offset));
            assert!(close(charm_bone.rotation(), charm_bone.rot_offset));
        }
    }

    #[test]
    fn child_offset_follows_parent_rotation_and_scale() {
        let mut skeleton = Skeleton::new(1.0, 2.0).with_scale(2.0);
        let arm = skeleton
            .attach_child(skeleton.root(), BoneParams::new("arm").rot(PI / 2.0))
            .unwrap();
        let hand = skeleton
            .attach_child(arm, BoneParams::new("hand").connect(3.0, 0.0))
            .unwrap();
        skeleton.update(0.0);

        assert!(close_vec(skeleton.bone(hand).unwrap().position(), Vec2::new(1.0, 8.0)));
    }

    #[test]
    fn connect_is_relative_to_parent_origin() {
        let mut skeleton = Skeleton::new(0.0, 0.0);
        let torso = skeleton
            .attach_child(skeleton.root(), BoneParams::new("torso").origin(4.0, 6.0))
            .unwrap();
        let neck = skeleton
            .attach_child(torso, BoneParams::new("neck").connect(4.0, 0.0))
            .unwrap();

        assert!(close_vec(skeleton.bone(neck).unwrap().offset, Vec2::new(0.0, -6.0)));
    }

    #[test]
    fn rotation_velocity_wraps_into_range() {
        let mut skeleton = Skeleton::new(0.0, 0.0);
        let arm = skeleton
            .attach_child(skeleton.root(), BoneParams::new("arm").rotvel(PI))
            .unwrap();

        for _ in 0..3 {
            skeleton.update(0.5);
        }
        assert!(close(skeleton.bone(arm).unwrap().rot_offset, -0.5 * PI));

        skeleton.bone_mut(arm).unwrap().rotvel = 40.0;
        for step in 0..50 {
            skeleton.update(0.013 * step as f32);
            let rot = skeleton.bone(arm).unwrap().rot_offset;
            assert!(rot > -PI && rot <= PI);
        }
    }

    #[test]
    fn duplicate_names_leave_skeleton_untouched() {
        let (mut skeleton, _) = arm_rig();
        let layers = skeleton.layers().len();

        let err = skeleton
            .attach_child(skeleton.root(), BoneParams::new("arm"))
            .unwrap_err();
        assert!(matches!(err, RigError::DuplicateName { .. }));
        assert_eq!(skeleton.len(), 2);
        assert_eq!(skeleton.layers().len(), layers);
    }

    #[test]
    fn resolves_layers_relative_to_parent() {
        let mut skeleton = Skeleton::new(0.0, 0.0);
        let body = skeleton
            .attach_child(skeleton.root(), BoneParams::new("body").layer(5))
            .unwrap();
        let front = skeleton
            .attach_child(body, BoneParams::new("front"))
            .unwrap();
        let back = skeleton
            .attach_child(body, BoneParams::new("back").layer(LayerSpec::BELOW))
            .unwrap();

        assert_eq!(skeleton.bone(front).unwrap().layer(), 6);
        assert_eq!(skeleton.bone(back).unwrap().layer(), 4);
        assert_eq!(skeleton.layers().layer_of(back), Some(4));
        assert_eq!(skeleton.layers().range(), Some((4, 6)));
    }

    #[test]
    fn template_flag_is_inherited() {
        let mut skeleton = Skeleton::new(0.0, 0.0);
        let leg = skeleton
            .attach_child(skeleton.root(), BoneParams::new("leg").template(true))
            .unwrap();
        let foot = skeleton.attach_child(leg, BoneParams::new("foot")).unwrap();
        let plain = skeleton
            .attach_child(skeleton.root(), BoneParams::new("plain"))
            .unwrap();

        assert!(skeleton.bone(foot).unwrap().is_template());
        assert!(skeleton.bone(foot).unwrap().construction_params().is_some());
        assert!(!skeleton.bone(plain).unwrap().is_template());
        assert!(skeleton.bone(plain).unwrap().construction_params().is_none());
    }

    #[test]
    fn translate_is_deferred_until_refresh() {
        let (mut skeleton, arm) = arm_rig();
        skeleton.translate(arm, 0.0, 5.0).unwrap();
        assert!(close_vec(skeleton.bone(arm).unwrap().position(), Vec2::new(10.0, 0.0)));

        skeleton.refresh_pose(arm).unwrap();
        assert!(close_vec(skeleton.bone(arm).unwrap().position(), Vec2::new(10.0, 5.0)));
    }

    #[test]
    fn absolute_translate_moves_along_world_axes() {
        let mut skeleton = Skeleton::new(0.0, 0.0).with_scale(2.0);
        let arm = skeleton
            .attach_child(skeleton.root(), BoneParams::new("arm").rot(0.7))
            .unwrap();
        let hand = skeleton
            .attach_child(arm, BoneParams::new("hand").connect(3.0, 1.0))
            .unwrap();
        skeleton.set_flipped(true);
        skeleton.update(0.0);
        let before = skeleton.bone(hand).unwrap().position();

        skeleton.absolute_translate(hand, 2.0, -1.5).unwrap();
        skeleton.update(0.0);
        let after = skeleton.bone(hand).unwrap().position();
        assert!(close_vec(after - before, Vec2::new(2.0, -1.5)));
    }

    #[test]
    fn rotation_setters() {
        let mut skeleton = Skeleton::new(0.0, 0.0);
        let arm = skeleton
            .attach_child(skeleton.root(), BoneParams::new("arm").rot(0.5))
            .unwrap();

        skeleton.rotate(arm, 0.25).unwrap();
        assert!(close(skeleton.bone(arm).unwrap().rot_offset, 0.75));
        skeleton.rotate_to(arm, -1.0).unwrap();
        assert!(close(skeleton.bone(arm).unwrap().rot_offset, -1.0));
        skeleton.relative_rotate_to(arm, 0.2).unwrap();
        assert!(close(skeleton.bone(arm).unwrap().rot_offset, 0.7));

        skeleton.update(0.0);
        skeleton.flip();
        assert!(close(skeleton.apparent_rotation(arm).unwrap(), PI - 0.7));
    }

    #[test]
    fn ancestry_excludes_root_and_self() {
        let mut skeleton = Skeleton::new(0.0, 0.0);
        let a = skeleton.attach_child(skeleton.root(), BoneParams::new("a")).unwrap();
        let b = skeleton.attach_child(a, BoneParams::new("b")).unwrap();
        let c = skeleton.attach_child(b, BoneParams::new("c")).unwrap();

        assert!(skeleton.is_child_of(c, a));
        assert!(skeleton.is_child_of(c, b));
        assert!(!skeleton.is_child_of(c, c));
        assert!(!skeleton.is_child_of(a, c));
        assert!(!skeleton.is_child_of(c, skeleton.root()));
    }

    #[test]
    fn lookup_prefers_fields_over_children() {
        let mut skeleton = Skeleton::new(0.0, 0.0);
        let body = skeleton.attach_child(skeleton.root(), BoneParams::new("body")).unwrap();
        let layer_child = skeleton.attach_child(body, BoneParams::new("layer")).unwrap();
        let head = skeleton.attach_child(body, BoneParams::new("head")).unwrap();

        assert_eq!(skeleton.lookup(body, "layer"), Some(Lookup::Field(FieldValue::Layer(1))));
        assert_eq!(skeleton.lookup(body, "head"), Some(Lookup::Child(head)));
        assert_eq!(skeleton.lookup(body, "tail"), None);
        assert_eq!(skeleton.child(body, "layer"), Some(layer_child));
        assert_eq!(skeleton.find("body/head"), Some(head));
        assert_eq!(skeleton.find("body/tail"), None);
    }

    #[test]
    fn purging_delete_clears_subtree_from_layers() {
        let mut skeleton = Skeleton::new(0.0, 0.0);
        let arm = skeleton
            .attach_child(skeleton.root(), BoneParams::new("arm").image("arm.png"))
            .unwrap();
        let hand = skeleton
            .attach_child(arm, BoneParams::new("hand").layer(-2))
            .unwrap();
        let leg = skeleton
            .attach_child(skeleton.root(), BoneParams::new("leg"))
            .unwrap();

        skeleton.delete(arm, true).unwrap();

        assert_eq!(skeleton.child(skeleton.root(), "arm"), None);
        assert!(!skeleton.contains(hand));
        assert!(!skeleton.layers().contains(arm));
        assert!(!skeleton.layers().contains(hand));
        assert!(skeleton.layers().contains(leg));
        assert_eq!(skeleton.min_layer(), Some(-2));
    }

    #[test]
    fn deferred_delete_leaves_stale_entries_that_draw_skips() {
        let mut skeleton = Skeleton::new(0.0, 0.0);
        let arm = skeleton
            .attach_child(skeleton.root(), BoneParams::new("arm").image("arm.png"))
            .unwrap();
        skeleton
            .attach_child(arm, BoneParams::new("hand").image("hand.png"))
            .unwrap();
        skeleton
            .attach_child(skeleton.root(), BoneParams::new("leg").image("leg.png"))
            .unwrap();

        skeleton.delete(arm, false).unwrap();
        assert_eq!(skeleton.child(skeleton.root(), "arm"), None);
        assert_eq!(skeleton.layers().len(), 3);

        let mut list = DrawList::new();
        assert_eq!(skeleton.draw(&mut list), 1);
        assert_eq!(list.bone_names(), vec!["leg"]);
        assert_eq!(skeleton.layers().len(), 1);
    }

    #[test]
    fn root_cannot_be_deleted() {
        let mut skeleton = Skeleton::new(0.0, 0.0);
        let err = skeleton.delete(skeleton.root(), true).unwrap_err();
        assert!(matches!(err, RigError::RootBone));
    }

    #[test]
    fn stale_handles_report_errors_and_absence() {
        let (mut skeleton, arm) = arm_rig();
        skeleton.delete(arm, true).unwrap();

        assert!(matches!(skeleton.translate(arm, 1.0, 1.0), Err(RigError::StaleBone)));
        assert!(matches!(
            skeleton.attach_child(arm, BoneParams::new("hand")),
            Err(RigError::StaleBone)
        ));
        assert_eq!(skeleton.lookup(arm, "name"), None);
        assert_eq!(skeleton.apparent_rotation(arm), None);
    }

    #[test]
    fn draws_layers_in_ascending_order() {
        let mut skeleton = Skeleton::new(0.0, 0.0);
        let body = skeleton
            .attach_child(skeleton.root(), BoneParams::new("body").image("body.png").layer(0))
            .unwrap();
        skeleton
            .attach_child(body, BoneParams::new("front_arm").image("arm.png").layer(3))
            .unwrap();
        skeleton
            .attach_child(body, BoneParams::new("back_arm").image("arm.png").layer(-3))
            .unwrap();
        skeleton
            .attach_child(body, BoneParams::new("nub"))
            .unwrap();

        let mut list = DrawList::new();
        skeleton.draw(&mut list);
        assert_eq!(list.bone_names(), vec!["back_arm", "body", "front_arm"]);
    }

    #[test]
    fn custom_draw_callback_receives_flipped_pose() {
        let seen: Rc<Cell<Option<DrawPose>>> = Rc::new(Cell::new(None));
        let sink = seen.clone();
        let mut skeleton = Skeleton::new(0.0, 0.0);
        skeleton
            .attach_child(
                skeleton.root(),
                BoneParams::new("tail")
                    .connect(2.0, 1.0)
                    .origin(0.5, 0.5)
                    .draw_fn(move |_, pose| sink.set(Some(*pose))),
            )
            .unwrap();
        skeleton.set_flipped(true);
        skeleton.update(0.0);

        let mut list = DrawList::new();
        skeleton.draw(&mut list);
        let pose = seen.get().expect("draw callback should run");
        assert!(list.is_empty());
        assert!(close(pose.x, -2.0));
        assert!(close(pose.y, 1.0));
        assert!(close(pose.rotation, PI));
        assert_eq!(pose.scale_x, -1.0);
        assert_eq!((pose.origin_x, pose.origin_y), (0.5, 0.5));
    }

    #[test]
    fn update_callback_runs_first_and_may_move_layers() {
        let mut skeleton = Skeleton::new(0.0, 0.0);
        let arm = skeleton
            .attach_child(
                skeleton.root(),
                BoneParams::new("arm").on_update(|bone, _| {
                    bone.rotvel = 1.0;
                    bone.request_layer(9);
                }),
            )
            .unwrap();

        skeleton.update(0.5);
        let bone = skeleton.bone(arm).unwrap();
        assert!(close(bone.rot_offset, 0.5));
        assert_eq!(bone.layer(), 9);
        assert_eq!(skeleton.layers().layer_of(arm), Some(9));
        assert_eq!(skeleton.layers().residents(1), Vec::<BoneId>::new());
        assert_eq!(skeleton.max_layer(), Some(9));
    }

    #[test]
    fn set_layer_moves_registration() {
        let (mut skeleton, arm) = arm_rig();
        skeleton.set_layer(arm, -4).unwrap();

        assert_eq!(skeleton.layers().layer_of(arm), Some(-4));
        assert_eq!(skeleton.layers().range(), Some((-4, 1)));
    }

    #[test]
    fn snapshot_lists_bones_depth_first() {
        let mut skeleton = Skeleton::new(0.0, 0.0);
        let body = skeleton.attach_child(skeleton.root(), BoneParams::new("body")).unwrap();
        skeleton.attach_child(body, BoneParams::new("leg")).unwrap();
        skeleton.attach_child(body, BoneParams::new("arm")).unwrap();
        skeleton.attach_child(skeleton.root(), BoneParams::new("aura")).unwrap();

        let paths: Vec<String> = skeleton.snapshot().into_iter().map(|pose| pose.path).collect();
        assert_eq!(paths, vec!["aura", "body", "body/arm", "body/leg"]);
    }

    #[test]
    fn layer_requests_outside_a_tick_wait_for_the_next_update() {
        let mut skeleton = Skeleton::new(0.0, 0.0);
        let a = skeleton
            .attach_child(skeleton.root(), BoneParams::new("a").image("a.png").layer(0))
            .unwrap();
        skeleton
            .attach_child(skeleton.root(), BoneParams::new("b").image("b.png").layer(1))
            .unwrap();

        skeleton.bone_mut(a).unwrap().request_layer(5);
        let mut list = DrawList::new();
        skeleton.draw(&mut list);
        assert_eq!(skeleton.bone(a).unwrap().layer(), 0);
        assert_eq!(skeleton.layers().layer_of(a), Some(0));
        assert_eq!(list.bone_names(), vec!["a", "b"]);

        skeleton.update(0.0);
        list.clear();
        skeleton.draw(&mut list);
        assert_eq!(skeleton.bone(a).unwrap().layer(), 5);
        assert_eq!(skeleton.layers().layer_of(a), Some(5));
        assert_eq!(list.bone_names(), vec!["b", "a"]);
    }

    #[test]
    fn set_layer_is_visible_to_the_next_draw() {
        let mut skeleton = Skeleton::new(0.0, 0.0);
        let a = skeleton
            .attach_child(skeleton.root(), BoneParams::new("a").image("a.png").layer(0))
            .unwrap();
        skeleton
            .attach_child(skeleton.root(), BoneParams::new("b").image("b.png").layer(1))
            .unwrap();

        skeleton.bone_mut(a).unwrap().request_layer(-3);
        skeleton.set_layer(a, 5).unwrap();
        let mut list = DrawList::new();
        skeleton.draw(&mut list);
        assert_eq!(skeleton.bone(a).unwrap().layer(), 5);
        assert_eq!(skeleton.layers().layer_of(a), Some(5));
        assert_eq!(list.bone_names(), vec!["b", "a"]);

        skeleton.update(0.0);
        assert_eq!(skeleton.layers().layer_of(a), Some(5));
    }

    #[test]
    fn relative_layer_past_the_range_is_an_error() {
        let mut skeleton = Skeleton::new(0.0, 0.0);
        let top = skeleton
            .attach_child(skeleton.root(), BoneParams::new("top").layer(i32::MAX))
            .unwrap();
        let bottom = skeleton
            .attach_child(skeleton.root(), BoneParams::new("bottom").layer(i32::MIN))
            .unwrap();
        let before = skeleton.len();

        let err = skeleton.attach_child(top, BoneParams::new("over")).unwrap_err();
        assert!(matches!(
            err,
            RigError::LayerOverflow { ref name, parent_layer }
                if name == "over" && parent_layer == i32::MAX
        ));
        let err = skeleton
            .attach_child(bottom, BoneParams::new("under").layer(LayerSpec::BELOW))
            .unwrap_err();
        assert!(matches!(err, RigError::LayerOverflow { .. }));
        assert_eq!(skeleton.len(), before);

        let pinned = skeleton
            .attach_child(top, BoneParams::new("pinned").layer(i32::MAX))
            .unwrap();
        assert_eq!(skeleton.layers().layer_of(pinned), Some(i32::MAX));
    }

    #[test]
    fn rejects_names_that_break_paths() {
        let (mut skeleton, arm) = arm_rig();

        for name in ["", "hand/finger"] {
            let err = skeleton.attach_child(arm, BoneParams::new(name)).unwrap_err();
            assert!(matches!(err, RigError::InvalidName { .. }));
        }
        assert_eq!(skeleton.len(), 2);
        assert_eq!(skeleton.bone(arm).unwrap().child_count(), 0);
    }

    #[test]
    fn deep_chains_update_without_recursion() {
        let mut skeleton = Skeleton::new(0.0, 0.0);
        let mut tip = skeleton.root();
        for _ in 0..20_000 {
            tip = skeleton
                .attach_child(tip, BoneParams::new("link").connect(1.0, 0.0))
                .unwrap();
        }

        skeleton.translate(tip, 0.0, 2.0).unwrap();
        skeleton.update(0.1);
        skeleton.refresh_pose(skeleton.root()).unwrap();
        assert!(close_vec(skeleton.bone(tip).unwrap().position(), Vec2::new(20_000.0, 2.0)));
        assert_eq!(skeleton.layers().max_layer(), Some(20_000));
    }
}

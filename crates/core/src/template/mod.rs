//! Copying bones: templated subtree stamping inside one skeleton and
//! whole-skeleton cloning.

use crate::{
    bone::{Bone, BoneId, BoneOverrides},
    Result, RigError, Skeleton,
};

impl Bone {
    /// Copies a single bone without any of its relationships.
    ///
    /// Scalars and vectors are copied, callbacks are shared, and the variable
    /// bag is copied shallowly (a new bag whose entries alias the original
    /// values). Parent and children are left empty for the caller to relink.
    /// The template flag and saved construction parameters survive only when
    /// `keep_template_flags` is set.
    pub fn duplicate(&self, keep_template_flags: bool) -> Bone {
        let mut copy = Bone::with_name(self.name().to_string());
        copy.offset = self.offset;
        copy.rot_offset = self.rot_offset;
        copy.rotvel = self.rotvel;
        copy.loose = self.loose;
        copy.layer = self.layer;
        copy.origin = self.origin;
        copy.initial_rot = self.initial_rot;
        copy.position = self.position;
        copy.rotation = self.rotation;
        copy.image = self.image.clone();
        copy.quad = self.quad;
        copy.draw_fn = self.draw_fn.clone();
        copy.update_fn = self.update_fn.clone();
        copy.vars = self.vars.clone();
        if keep_template_flags {
            copy.template = self.template;
            copy.construction = self.construction.clone();
        }
        copy
    }
}

impl Skeleton {
    /// Stamps out a copy of the template bone `source` under `target_parent`.
    ///
    /// The copy is built from the saved construction parameters of `source`
    /// with `overrides` applied on top, then every template-marked child of
    /// `source` is rebuilt under it from its own saved parameters. When
    /// `source` is an ancestor of `target_parent` the walk reaches the new
    /// copy again; it is skipped there, so each call adds a single level.
    pub fn add_template(
        &mut self,
        target_parent: BoneId,
        source: BoneId,
        overrides: BoneOverrides,
    ) -> Result<BoneId> {
        let source_bone = self.bones.get(source).ok_or(RigError::StaleBone)?;
        let saved = match &source_bone.construction {
            Some(saved) if source_bone.is_template() => saved,
            _ => {
                return Err(RigError::NotTemplate {
                    name: source_bone.name().to_string(),
                })
            }
        };
        let mut params = saved.clone();
        overrides.apply(&mut params);

        let copy = self.attach_child(target_parent, params)?;
        let nested = self.copy_template_children(source, copy, copy)?;
        tracing::debug!(
            source = self.bones[source].name(),
            copy = self.bones[copy].name(),
            nested,
            "copied template"
        );
        Ok(copy)
    }

    fn copy_template_children(
        &mut self,
        source: BoneId,
        target: BoneId,
        skip: BoneId,
    ) -> Result<usize> {
        let children: Vec<BoneId> = match self.bones.get(source) {
            Some(bone) => bone.children.values().copied().collect(),
            None => return Ok(0),
        };

        let mut copied = 0;
        for child in children {
            if child == skip {
                continue;
            }
            let Some(params) = self
                .bones
                .get(child)
                .filter(|bone| bone.is_template())
                .and_then(|bone| bone.construction.clone())
            else {
                continue;
            };
            let copy = self.attach_child(target, params)?;
            copied += 1 + self.copy_template_children(child, copy, skip)?;
        }
        Ok(copied)
    }

    /// Builds a new skeleton at `(x, y)` holding a copy of every bone.
    ///
    /// Scale, base rotation and flip are carried over. Each copied bone is
    /// linked to its new parent and filed into the new layer index at its
    /// own layer, then posed relative to the new position.
    pub fn clone_skeleton(&self, x: f32, y: f32, keep_template_flags: bool) -> Skeleton {
        let mut clone = Skeleton::new(x, y);
        clone.set_rotation(self.rotation());
        clone.set_scale(self.scale());
        clone.set_flipped(self.is_flipped());

        let source_root = &self.bones[self.root];
        let root = clone.root;
        clone.bones[root].origin = source_root.origin;
        clone.bones[root].layer = source_root.layer;
        clone.recompute_pose(root);

        let copied = clone.copy_subtree(self, self.root, root, keep_template_flags);
        tracing::debug!(copied, x, y, keep_template_flags, "cloned skeleton");
        clone
    }

    fn copy_subtree(
        &mut self,
        source: &Skeleton,
        from: BoneId,
        to: BoneId,
        keep_template_flags: bool,
    ) -> usize {
        let Some(bone) = source.bones.get(from) else {
            return 0;
        };

        let mut copied = 0;
        for (_, child) in bone.children() {
            let Some(child_bone) = source.bones.get(child) else {
                continue;
            };
            let copy = self.link(to, child_bone.duplicate(keep_template_flags));
            copied += 1 + self.copy_subtree(source, child, copy, keep_template_flags);
        }
        copied
    }
}

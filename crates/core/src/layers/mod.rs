use std::collections::HashMap;

use crate::bone::BoneId;

/// Draw-order registry mapping integer layers to the bones filed under them.
///
/// Entries are plain [`BoneId`] handles and never keep a bone alive. A slot
/// whose handle no longer resolves is treated as free and is reused by the
/// next insertion into that layer. The occupied range only ever widens.
#[derive(Debug, Default, Clone)]
pub struct LayerIndex {
    layers: HashMap<i32, Vec<Option<BoneId>>>,
    range: Option<(i32, i32)>,
}

impl LayerIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lowest layer that has ever been used.
    pub fn min_layer(&self) -> Option<i32> {
        self.range.map(|(min, _)| min)
    }

    /// Highest layer that has ever been used.
    pub fn max_layer(&self) -> Option<i32> {
        self.range.map(|(_, max)| max)
    }

    pub fn range(&self) -> Option<(i32, i32)> {
        self.range
    }

    /// Files `bone` under `layer` and returns the slot it landed in.
    ///
    /// The first slot that is empty, or whose handle `is_live` rejects, is
    /// reused before the container grows.
    pub fn insert(&mut self, bone: BoneId, layer: i32, is_live: impl Fn(BoneId) -> bool) -> usize {
        let slots = self.layers.entry(layer).or_default();
        let slot = match slots
            .iter()
            .position(|entry| entry.map_or(true, |id| !is_live(id)))
        {
            Some(slot) => {
                slots[slot] = Some(bone);
                slot
            }
            None => {
                slots.push(Some(bone));
                slots.len() - 1
            }
        };

        self.range = Some(match self.range {
            Some((min, max)) => (min.min(layer), max.max(layer)),
            None => (layer, layer),
        });
        slot
    }

    /// Clears the entry for `bone` in `layer`. Returns whether it was present.
    pub fn remove(&mut self, bone: BoneId, layer: i32) -> bool {
        let Some(slots) = self.layers.get_mut(&layer) else {
            return false;
        };
        match slots.iter_mut().find(|entry| **entry == Some(bone)) {
            Some(entry) => {
                *entry = None;
                true
            }
            None => false,
        }
    }

    /// Scans every layer and clears entries accepted by `doomed`.
    pub fn clean(&mut self, mut doomed: impl FnMut(BoneId) -> bool) -> usize {
        let mut removed = 0;
        for slots in self.layers.values_mut() {
            for entry in slots.iter_mut() {
                if entry.map_or(false, &mut doomed) {
                    *entry = None;
                    removed += 1;
                }
            }
        }
        removed
    }

    pub(crate) fn slots_mut(&mut self, layer: i32) -> Option<&mut Vec<Option<BoneId>>> {
        self.layers.get_mut(&layer)
    }

    /// Handles currently filed under `layer`, in slot order. Stale handles
    /// that have not been reclaimed yet are included.
    pub fn residents(&self, layer: i32) -> Vec<BoneId> {
        self.layers
            .get(&layer)
            .map(|slots| slots.iter().flatten().copied().collect())
            .unwrap_or_default()
    }

    /// Layer `bone` is filed under, if any.
    pub fn layer_of(&self, bone: BoneId) -> Option<i32> {
        self.layers
            .iter()
            .find(|(_, slots)| slots.contains(&Some(bone)))
            .map(|(layer, _)| *layer)
    }

    pub fn contains(&self, bone: BoneId) -> bool {
        self.layer_of(bone).is_some()
    }

    /// Number of filled entries across all layers.
    pub fn len(&self) -> usize {
        self.layers
            .values()
            .map(|slots| slots.iter().flatten().count())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of slots allocated for `layer`, filled or not.
    pub fn capacity(&self, layer: i32) -> usize {
        self.layers.get(&layer).map_or(0, Vec::len)
    }
}

//! Two level acceleration structures over procedural AABB primitives.
//!
//! Every ray traceable object gets its own bottom level structure holding a single AABB
//! in the object's local space. The top level structure places these through per-instance
//! transforms and tags them with the object's stable index.

mod bottom_level;
mod top_level;

use bytemuck::{Pod, Zeroable};

use crate::geometry::{WorldBox, WorldTransform, transform_rows};

pub use bottom_level::BottomLevelRecord;
pub use top_level::TopLevelStructure;

/// One procedural primitive, layout of `VkAabbPositionsKHR`.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct AabbPositions {
    pub min: [f32; 3],
    pub max: [f32; 3],
}

impl From<&WorldBox> for AabbPositions {
    fn from(value: &WorldBox) -> Self {
        AabbPositions {
            min: value.min.into(),
            max: value.max.into(),
        }
    }
}

impl From<&AabbPositions> for WorldBox {
    fn from(value: &AabbPositions) -> Self {
        WorldBox::new(value.min.into(), value.max.into())
    }
}

/// Instance record of the top level structure, layout of `VkAccelerationStructureInstanceKHR`.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct TopLevelInstance {
    /// Row major 3x4 object to world matrix
    pub transform: [[f32; 4]; 3],
    /// Custom index in the low 24 bits, visibility mask in the high 8 bits
    pub custom_index_and_mask: u32,
    /// Hit group offset in the low 24 bits, instance flags in the high 8 bits
    pub sbt_offset_and_flags: u32,
    pub structure_reference: u64,
}

impl TopLevelInstance {
    pub const MAX_CUSTOM_INDEX: u32 = (1 << 24) - 1;
    pub const DEFAULT_MASK: u32 = 0xFF;

    pub fn new(
        transform: &WorldTransform,
        custom_index: u32,
        hit_group: u32,
        structure_reference: u64,
    ) -> Self {
        // Stable indices are capped by the registry
        debug_assert!(custom_index <= Self::MAX_CUSTOM_INDEX);
        debug_assert!(hit_group <= Self::MAX_CUSTOM_INDEX);
        let flags = 0;

        TopLevelInstance {
            transform: transform_rows(transform),
            custom_index_and_mask: (Self::DEFAULT_MASK << 24) | custom_index,
            sbt_offset_and_flags: (flags << 24) | hit_group,
            structure_reference,
        }
    }

    pub fn custom_index(&self) -> u32 {
        self.custom_index_and_mask & Self::MAX_CUSTOM_INDEX
    }

    pub fn mask(&self) -> u32 {
        self.custom_index_and_mask >> 24
    }

    pub fn hit_group(&self) -> u32 {
        self.sbt_offset_and_flags & Self::MAX_CUSTOM_INDEX
    }

    pub fn set_transform(&mut self, transform: &WorldTransform) {
        self.transform = transform_rows(transform);
    }
}

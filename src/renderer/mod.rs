//! CPU debug renderer, ray casts the registry directly without any device structures.

mod machinery;
mod worker;

use std::num::NonZeroU32;

use bon::bon;

use crate::geometry::NewtonSettings;

pub use crate::renderer::machinery::{RenderProgress, TileProgress, render};
pub use crate::renderer::worker::color_to_image;

#[derive(Copy, Clone, Debug)]
pub struct RenderSettings {
    pub tile_size: NonZeroU32,
    pub sample_count: NonZeroU32,
    pub newton: NewtonSettings,
}

#[bon]
impl RenderSettings {
    #[builder]
    pub fn new(
        #[builder(default = NonZeroU32::MIN.saturating_add(31))] tile_size: NonZeroU32,
        #[builder(default = NonZeroU32::MIN)] sample_count: NonZeroU32,
        #[builder(default)] newton: NewtonSettings,
    ) -> Self {
        RenderSettings {
            tile_size,
            sample_count,
            newton,
        }
    }
}

impl Default for RenderSettings {
    fn default() -> Self {
        RenderSettings::builder().build()
    }
}

pub mod accel;
pub mod backend;
mod camera;
pub mod error;
pub mod geometry;
mod renderer;
pub mod scene;
mod screen_block;
mod util;

pub use crate::renderer::{RenderProgress, RenderSettings, TileProgress, color_to_image, render};
pub use camera::Camera;
pub use error::{Error, Result};
pub use scene::Scene;
pub use util::Stats;

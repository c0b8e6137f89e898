mod stats;

pub use stats::Stats;

/// Linear color with straight alpha.
pub type Rgba = rgb::RGBA<f32>;

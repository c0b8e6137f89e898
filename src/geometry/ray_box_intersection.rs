use super::{FloatType, Ray, WorldBox};

/// Relative slack of the slab test, scaled by the distance between the ray origin and the box.
/// Rays grazing a face, edge or corner must not be culled by rounding.
const SLAB_TOLERANCE: FloatType = 1e-4;

pub trait RayIntersectionExt {
    /// Calculate first and last ray intersection with the box
    fn intersect(&self, ray: &Ray) -> Option<(FloatType, FloatType)>;
}

impl RayIntersectionExt for WorldBox {
    /// Calculates ray intersection with the box.
    /// Returns minimum and maximum distance along the ray, if the ray intersects the box.
    /// The range may start behind the ray origin.
    fn intersect(&self, ray: &Ray) -> Option<(FloatType, FloatType)> {
        // Componentwise distances along the ray to the box's min and max corners
        // The multiplication is NAN if the ray is starting inside the slab bounding plane
        // and is parallel to it. In this case we blend to +-infinity, so that the range becomes infinite
        let to_box_min = (self.min - ray.origin)
            .component_mul(&ray.inv_direction)
            .map(|x| if x.is_nan() { FloatType::NEG_INFINITY } else { x });
        let to_box_max = (self.max - ray.origin)
            .component_mul(&ray.inv_direction)
            .map(|x| if x.is_nan() { FloatType::INFINITY } else { x });

        // Correctly ordered (min_t <= max_t)
        let componentwise_min_t = to_box_min.zip_map(&to_box_max, FloatType::min);
        let componentwise_max_t = to_box_min.zip_map(&to_box_max, FloatType::max);

        let min_t = componentwise_min_t.max();
        let max_t = componentwise_max_t.min();

        let scale = (self.min - ray.origin)
            .abs()
            .max()
            .max((self.max - ray.origin).abs().max());
        if min_t <= max_t {
            Some((min_t, max_t))
        } else if min_t <= max_t + SLAB_TOLERANCE * (1.0 + scale) {
            let t = (min_t + max_t) / 2.0;
            Some((t, t))
        } else {
            None
        }
    }
}

use glam::{DMat4, DVec3, Mat4, Vec3};

/// Double-precision axis-aligned bounding box.
///
/// World-space bounds must survive coordinates in the 1e8 range, so the
/// box is kept in f64 end to end; only the final layer-local extents drop
/// to f32. A freshly collapsed box is inverted (`min = +inf`, `max = -inf`)
/// and expands to the first point fed to it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub min: DVec3,
    pub max: DVec3,
}

impl Aabb {
    /// An inverted box that any expansion will overwrite.
    #[must_use]
    pub fn collapsed() -> Self {
        Self {
            min: DVec3::splat(f64::INFINITY),
            max: DVec3::splat(f64::NEG_INFINITY),
        }
    }

    #[must_use]
    pub fn new(min: DVec3, max: DVec3) -> Self {
        Self { min, max }
    }

    /// Returns `true` while no point has been folded in.
    #[must_use]
    pub fn is_collapsed(&self) -> bool {
        self.min.x > self.max.x
    }

    #[must_use]
    pub fn center(&self) -> DVec3 {
        (self.min + self.max) * 0.5
    }

    #[must_use]
    pub fn size(&self) -> DVec3 {
        self.max - self.min
    }

    pub fn expand_point(&mut self, p: DVec3) {
        self.min = self.min.min(p);
        self.max = self.max.max(p);
    }

    pub fn expand(&mut self, other: &Aabb) {
        if other.is_collapsed() {
            return;
        }
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
    }

    #[must_use]
    pub fn union(&self, other: &Aabb) -> Aabb {
        Aabb {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }

    /// Offsets the whole box by a translation.
    #[must_use]
    pub fn translated(&self, offset: DVec3) -> Aabb {
        if self.is_collapsed() {
            return *self;
        }
        Aabb {
            min: self.min + offset,
            max: self.max + offset,
        }
    }

    /// Treats the box as an OBB under `matrix` and reduces it back to an
    /// AABB by transforming all eight corners.
    #[must_use]
    pub fn transformed(&self, matrix: &DMat4) -> Aabb {
        if self.is_collapsed() {
            return *self;
        }
        let corners = [
            DVec3::new(self.min.x, self.min.y, self.min.z),
            DVec3::new(self.min.x, self.min.y, self.max.z),
            DVec3::new(self.min.x, self.max.y, self.min.z),
            DVec3::new(self.min.x, self.max.y, self.max.z),
            DVec3::new(self.max.x, self.min.y, self.min.z),
            DVec3::new(self.max.x, self.min.y, self.max.z),
            DVec3::new(self.max.x, self.max.y, self.min.z),
            DVec3::new(self.max.x, self.max.y, self.max.z),
        ];

        let mut out = Aabb::collapsed();
        for corner in corners {
            out.expand_point(matrix.transform_point3(corner));
        }
        out
    }

    /// Builds a world-space box from f32 local bounds, an f32 local matrix
    /// and a double-precision origin.
    #[must_use]
    pub fn from_local(min: Vec3, max: Vec3, local_matrix: &Mat4, origin: DVec3) -> Aabb {
        let local = Aabb {
            min: min.as_dvec3(),
            max: max.as_dvec3(),
        };
        local
            .transformed(&local_matrix.as_dmat4())
            .translated(origin)
    }

    /// Componentwise closeness check used by tests and debug assertions.
    #[must_use]
    pub fn approx_eq(&self, other: &Aabb, tolerance: f64) -> bool {
        (self.min - other.min).abs().max_element() <= tolerance
            && (self.max - other.max).abs().max_element() <= tolerance
    }
}

impl Default for Aabb {
    fn default() -> Self {
        Self::collapsed()
    }
}

/// Numerator of the scale factor: `scale = SCALE_NUMERATOR / units_per_scale`.
pub const SCALE_NUMERATOR: f64 = 120_000.0;

pub const DEFAULT_UNITS_PER_SCALE: f64 = 1000.0;
pub const DEFAULT_PLANE_HEIGHT: i32 = 64;

/// Per-dataset mapping from degrees onto the rendering plane.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Projection {
    pub scale: f64,
    pub x_offset: f64,
    pub z_offset: f64,
    pub plane_height: f64,
}

impl Projection {
    pub fn from_units_per_scale(units: f64, x_offset: i32, plane_height: i32, z_offset: i32) -> Self {
        Self {
            scale: SCALE_NUMERATOR / units,
            x_offset: f64::from(x_offset),
            z_offset: f64::from(z_offset),
            plane_height: f64::from(plane_height),
        }
    }
}

impl Default for Projection {
    fn default() -> Self {
        Self::from_units_per_scale(DEFAULT_UNITS_PER_SCALE, 0, DEFAULT_PLANE_HEIGHT, 0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProjectedPoint {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

/// Maps a (lat, lon) pair in degrees onto the plane. The z axis is flipped so
/// that growing `lon` moves the point towards negative z.
pub fn project(lat: f64, lon: f64, projection: &Projection) -> ProjectedPoint {
    ProjectedPoint {
        x: lat * projection.scale + projection.x_offset,
        y: projection.plane_height,
        z: -(lon * projection.scale) + projection.z_offset,
    }
}

/// Column-wise vertex buffers as the overlay host takes them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VertexArrays {
    pub xs: Vec<f64>,
    pub ys: Vec<f64>,
    pub zs: Vec<f64>,
}

impl VertexArrays {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            xs: Vec::with_capacity(capacity),
            ys: Vec::with_capacity(capacity),
            zs: Vec::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, point: ProjectedPoint) {
        self.xs.push(point.x);
        self.ys.push(point.y);
        self.zs.push(point.z);
    }

    pub fn len(&self) -> usize {
        self.xs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.xs.is_empty()
    }
}

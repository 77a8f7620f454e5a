//! Layer geometry
//!
//! 3D vectors, 4x4 homogeneous matrices and screen-space quads used to place
//! compositor layers in the viewport.

/// 3D vector (also used as a homogeneous point with w = 1)
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Vector3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vector3 {
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }
}

/// 4x4 homogeneous transformation matrix
///
/// Points are column vectors, so `a.multiply(&b)` applies `b` first and
/// `a` second. Translation lives in the last column.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Matrix4 {
    /// Matrix elements (row-major)
    pub m: [[f64; 4]; 4],
}

impl Default for Matrix4 {
    fn default() -> Self {
        Self::identity()
    }
}

impl Matrix4 {
    /// Identity transform
    pub const fn identity() -> Self {
        Self {
            m: [
                [1.0, 0.0, 0.0, 0.0],
                [0.0, 1.0, 0.0, 0.0],
                [0.0, 0.0, 1.0, 0.0],
                [0.0, 0.0, 0.0, 1.0],
            ],
        }
    }

    /// Translation in 3D
    pub const fn translate(tx: f64, ty: f64, tz: f64) -> Self {
        Self {
            m: [
                [1.0, 0.0, 0.0, tx],
                [0.0, 1.0, 0.0, ty],
                [0.0, 0.0, 1.0, tz],
                [0.0, 0.0, 0.0, 1.0],
            ],
        }
    }

    /// Scale in 3D
    pub const fn scale(sx: f64, sy: f64, sz: f64) -> Self {
        Self {
            m: [
                [sx, 0.0, 0.0, 0.0],
                [0.0, sy, 0.0, 0.0],
                [0.0, 0.0, sz, 0.0],
                [0.0, 0.0, 0.0, 1.0],
            ],
        }
    }

    /// Rotation around Z axis (radians)
    pub fn rotate_z(angle: f64) -> Self {
        let (sin, cos) = angle.sin_cos();
        Self {
            m: [
                [cos, -sin, 0.0, 0.0],
                [sin, cos, 0.0, 0.0],
                [0.0, 0.0, 1.0, 0.0],
                [0.0, 0.0, 0.0, 1.0],
            ],
        }
    }

    /// Build from the 16-element column-major array used by CSS `matrix3d()`
    /// and by the LayerTree protocol.
    pub fn from_column_major(values: &[f64; 16]) -> Self {
        let mut m = [[0.0f64; 4]; 4];
        for (col, chunk) in values.chunks_exact(4).enumerate() {
            for (row, value) in chunk.iter().enumerate() {
                m[row][col] = *value;
            }
        }
        Self { m }
    }

    /// Inverse of [`Matrix4::from_column_major`]
    pub fn to_column_major(&self) -> [f64; 16] {
        let mut out = [0.0f64; 16];
        for col in 0..4 {
            for row in 0..4 {
                out[col * 4 + row] = self.m[row][col];
            }
        }
        out
    }

    /// Round every element to `digits` decimal places
    pub fn rounded(&self, digits: u32) -> Self {
        let factor = 10f64.powi(digits.min(15) as i32);
        let mut m = self.m;
        for value in m.iter_mut().flatten() {
            *value = (*value * factor).round() / factor;
        }
        Self { m }
    }

    /// Matrix multiplication, `self * other`
    pub fn multiply(&self, other: &Matrix4) -> Self {
        let mut result = [[0.0f64; 4]; 4];
        for i in 0..4 {
            for j in 0..4 {
                for k in 0..4 {
                    result[i][j] += self.m[i][k] * other.m[k][j];
                }
            }
        }
        Self { m: result }
    }

    /// Transform a point and divide by the resulting w
    pub fn transform_point(&self, v: Vector3) -> Vector3 {
        let m = &self.m;
        let w = m[3][0] * v.x + m[3][1] * v.y + m[3][2] * v.z + m[3][3];
        let w = if w.abs() < 1e-10 { 1.0 } else { w };

        Vector3 {
            x: (m[0][0] * v.x + m[0][1] * v.y + m[0][2] * v.z + m[0][3]) / w,
            y: (m[1][0] * v.x + m[1][1] * v.y + m[1][2] * v.z + m[1][3]) / w,
            z: (m[2][0] * v.x + m[2][1] * v.y + m[2][2] * v.z + m[2][3]) / w,
        }
    }
}

/// Multiply `v` (as a point) by `m` and normalize by the homogeneous w
pub fn multiply_vector_by_matrix_and_normalize(v: Vector3, m: &Matrix4) -> Vector3 {
    m.transform_point(v)
}

/// Screen-space quad: four corner points, clockwise from the layer origin
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Quad {
    /// Flattened `[x0, y0, x1, y1, x2, y2, x3, y3]`
    pub points: [f64; 8],
}

impl Quad {
    /// Project the rectangle `(0, 0, width, height)` through `matrix`
    pub fn from_rect(width: f64, height: f64, matrix: &Matrix4) -> Self {
        let corners = [
            Vector3::new(0.0, 0.0, 0.0),
            Vector3::new(width, 0.0, 0.0),
            Vector3::new(width, height, 0.0),
            Vector3::new(0.0, height, 0.0),
        ];
        let mut points = [0.0f64; 8];
        for (i, corner) in corners.into_iter().enumerate() {
            let p = multiply_vector_by_matrix_and_normalize(corner, matrix);
            points[i * 2] = p.x;
            points[i * 2 + 1] = p.y;
        }
        Self { points }
    }

    /// Corner `i` (0..4)
    pub fn point(&self, i: usize) -> (f64, f64) {
        (self.points[i * 2], self.points[i * 2 + 1])
    }

    /// Axis-aligned bounds as `(min_x, min_y, max_x, max_y)`
    pub fn bounds(&self) -> (f64, f64, f64, f64) {
        let mut bounds = (f64::INFINITY, f64::INFINITY, f64::NEG_INFINITY, f64::NEG_INFINITY);
        for i in 0..4 {
            let (x, y) = self.point(i);
            bounds.0 = bounds.0.min(x);
            bounds.1 = bounds.1.min(y);
            bounds.2 = bounds.2.max(x);
            bounds.3 = bounds.3.max(y);
        }
        bounds
    }
}

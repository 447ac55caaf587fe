use serde::{Deserialize, Serialize};

/// Column-major 4x4 matrix.
pub type Matrix4 = [f32; 16];

pub const IDENTITY_MATRIX: Matrix4 = [
    1.0, 0.0, 0.0, 0.0, //
    0.0, 1.0, 0.0, 0.0, //
    0.0, 0.0, 1.0, 0.0, //
    0.0, 0.0, 0.0, 1.0,
];

pub fn multiply(lhs: &Matrix4, rhs: &Matrix4) -> Matrix4 {
    let mut product = [0.0; 16];
    for column in 0..4 {
        for row in 0..4 {
            let mut sum = 0.0;
            for inner in 0..4 {
                sum += lhs[inner * 4 + row] * rhs[column * 4 + inner];
            }
            product[column * 4 + row] = sum;
        }
    }
    product
}

pub fn translation(x: f32, y: f32, z: f32) -> Matrix4 {
    let mut matrix = IDENTITY_MATRIX;
    matrix[12] = x;
    matrix[13] = y;
    matrix[14] = z;
    matrix
}

pub fn scale(x: f32, y: f32, z: f32) -> Matrix4 {
    let mut matrix = IDENTITY_MATRIX;
    matrix[0] = x;
    matrix[5] = y;
    matrix[10] = z;
    matrix
}

pub fn orthographic(left: f32, right: f32, bottom: f32, top: f32, near: f32, far: f32) -> Matrix4 {
    assert!(right != left, "orthographic projection needs a non-empty x range");
    assert!(top != bottom, "orthographic projection needs a non-empty y range");
    assert!(far != near, "orthographic projection needs a non-empty depth range");
    let mut matrix = IDENTITY_MATRIX;
    matrix[0] = 2.0 / (right - left);
    matrix[5] = 2.0 / (top - bottom);
    matrix[10] = -2.0 / (far - near);
    matrix[12] = -(right + left) / (right - left);
    matrix[13] = -(top + bottom) / (top - bottom);
    matrix[14] = -(far + near) / (far - near);
    matrix
}

pub fn transform_point(matrix: &Matrix4, point: [f32; 3]) -> [f32; 3] {
    let [x, y, z] = point;
    let mut out = [0.0; 4];
    for (row, value) in out.iter_mut().enumerate() {
        *value = matrix[row] * x + matrix[4 + row] * y + matrix[8 + row] * z + matrix[12 + row];
    }
    if out[3] != 0.0 && out[3] != 1.0 {
        return [out[0] / out[3], out[1] / out[3], out[2] / out[3]];
    }
    [out[0], out[1], out[2]]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatrixCompositionMode {
    /// Multiply the parent's resolved matrix with this layer's matrix.
    #[default]
    ComposeWithParent,
    /// Use this layer's matrix verbatim.
    Replace,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LayerMatrixKind {
    Modelview,
    Projection,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LayerMatrix {
    pub matrix: Matrix4,
    pub mode: MatrixCompositionMode,
}

impl LayerMatrix {
    pub fn new(mode: MatrixCompositionMode) -> Self {
        Self {
            matrix: IDENTITY_MATRIX,
            mode,
        }
    }

    pub fn resolve(&self, parent: Option<&Matrix4>) -> Matrix4 {
        match (self.mode, parent) {
            (MatrixCompositionMode::ComposeWithParent, Some(parent)) => {
                multiply(parent, &self.matrix)
            }
            _ => self.matrix,
        }
    }
}

impl Default for LayerMatrix {
    fn default() -> Self {
        Self::new(MatrixCompositionMode::default())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LayerTransformation {
    pub modelview: Matrix4,
    pub projection: Matrix4,
    pub project_view_model: Matrix4,
}

impl LayerTransformation {
    pub fn new(modelview: Matrix4, projection: Matrix4) -> Self {
        Self {
            modelview,
            projection,
            project_view_model: multiply(&projection, &modelview),
        }
    }

    pub fn resolve(
        modelview: &LayerMatrix,
        projection: &LayerMatrix,
        parent: Option<&LayerTransformation>,
    ) -> Self {
        Self::new(
            modelview.resolve(parent.map(|parent| &parent.modelview)),
            projection.resolve(parent.map(|parent| &parent.projection)),
        )
    }
}

impl Default for LayerTransformation {
    fn default() -> Self {
        Self::new(IDENTITY_MATRIX, IDENTITY_MATRIX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_is_neutral_for_multiply() {
        let matrix = translation(3.0, -2.0, 0.5);
        assert_eq!(multiply(&IDENTITY_MATRIX, &matrix), matrix);
        assert_eq!(multiply(&matrix, &IDENTITY_MATRIX), matrix);
    }

    #[test]
    fn multiply_applies_rhs_first() {
        let combined = multiply(&translation(10.0, 0.0, 0.0), &scale(2.0, 2.0, 1.0));
        assert_eq!(transform_point(&combined, [1.0, 1.0, 0.0]), [12.0, 2.0, 0.0]);
    }

    #[test]
    fn replace_mode_ignores_parent() {
        let parent = translation(5.0, 5.0, 0.0);
        let local = LayerMatrix {
            matrix: scale(2.0, 2.0, 1.0),
            mode: MatrixCompositionMode::Replace,
        };
        assert_eq!(local.resolve(Some(&parent)), scale(2.0, 2.0, 1.0));

        let composed = LayerMatrix {
            mode: MatrixCompositionMode::ComposeWithParent,
            ..local
        };
        assert_eq!(
            transform_point(&composed.resolve(Some(&parent)), [1.0, 0.0, 0.0]),
            [7.0, 5.0, 0.0]
        );
    }

    #[test]
    fn orthographic_maps_corners_to_clip_space() {
        let projection = orthographic(0.0, 100.0, 50.0, 0.0, -1.0, 1.0);
        assert_eq!(transform_point(&projection, [0.0, 0.0, 0.0]), [-1.0, 1.0, 0.0]);
        assert_eq!(transform_point(&projection, [100.0, 50.0, 0.0]), [1.0, -1.0, 0.0]);
    }
}

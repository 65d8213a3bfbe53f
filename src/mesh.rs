use glam::Vec3;

use crate::volume_loader::LoadError;

/// Axis-aligned bounding box.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Bounds {
    pub min: Vec3,
    pub max: Vec3,
}

impl Bounds {
    pub fn from_points(points: &[Vec3]) -> Option<Self> {
        let first = *points.first()?;
        let (min, max) = points
            .iter()
            .fold((first, first), |(min, max), &p| (min.min(p), max.max(p)));
        Some(Self { min, max })
    }

    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    pub fn size(&self) -> Vec3 {
        self.max - self.min
    }
}

/// Triangle surface of the glass-brain shell.
#[derive(Clone, Debug)]
pub struct SurfaceMesh {
    vertices: Vec<Vec3>,
    faces: Vec<[u32; 3]>,
    normals: Vec<Vec3>,
    bounds: Bounds,
}

impl SurfaceMesh {
    /// # Errors
    ///
    /// Fails on an empty vertex list or a face referencing a missing vertex.
    pub fn new(vertices: Vec<Vec3>, faces: Vec<[u32; 3]>) -> Result<Self, LoadError> {
        let bounds = Bounds::from_points(&vertices).ok_or(LoadError::EmptyMesh)?;
        let vertex_count = vertices.len();
        for (face, indices) in faces.iter().enumerate() {
            if let Some(&index) = indices.iter().find(|&&i| i as usize >= vertex_count) {
                return Err(LoadError::FaceIndexOutOfRange {
                    face,
                    index,
                    vertex_count,
                });
            }
        }
        if !vertices.iter().all(|v| v.is_finite()) {
            return Err(LoadError::MalformedMesh(
                "vertex with non-finite coordinate".to_string(),
            ));
        }
        let normals = Self::compute_normals(&vertices, &faces);
        Ok(Self {
            vertices,
            faces,
            normals,
            bounds,
        })
    }

    pub fn vertices(&self) -> &[Vec3] {
        &self.vertices
    }

    pub fn faces(&self) -> &[[u32; 3]] {
        &self.faces
    }

    pub fn normals(&self) -> &[Vec3] {
        &self.normals
    }

    pub fn bounds(&self) -> Bounds {
        self.bounds
    }

    pub fn center(&self) -> Vec3 {
        self.bounds.center()
    }

    pub fn size(&self) -> Vec3 {
        self.bounds.size()
    }

    /// Flattened triangle indices for an index buffer.
    pub fn indices(&self) -> Vec<u32> {
        self.faces.iter().flatten().copied().collect()
    }

    // Area weighted; no manifold assumptions. Vertices without a
    // non-degenerate adjacent face get +Y.
    fn compute_normals(vertices: &[Vec3], faces: &[[u32; 3]]) -> Vec<Vec3> {
        let mut normals = vec![Vec3::ZERO; vertices.len()];
        for &[a, b, c] in faces {
            let (a, b, c) = (a as usize, b as usize, c as usize);
            let face_normal = (vertices[b] - vertices[a]).cross(vertices[c] - vertices[a]);
            normals[a] += face_normal;
            normals[b] += face_normal;
            normals[c] += face_normal;
        }
        normals
            .into_iter()
            .map(|n| n.try_normalize().unwrap_or(Vec3::Y))
            .collect()
    }
}

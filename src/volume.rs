use glam::Mat4;
use half::f16;
use log::{debug, warn};
use ndarray::Array3;
use ndarray::parallel::prelude::*;

use crate::volume_loader::LoadError;

/// A scalar field sampled on a regular voxel grid.
#[derive(Clone, Debug)]
pub struct VolumeGrid {
    /// Voxel counts per axis (nx, ny, nz).
    dims: (usize, usize, usize),
    /// Samples with shape (nz, ny, nx), so x varies fastest in memory.
    samples: Array3<f32>,
    /// Voxel index space to world space.
    affine: Mat4,
    original_range: Option<(f32, f32)>,
}

impl VolumeGrid {
    /// Builds a grid from the flat backend array.
    ///
    /// # Errors
    ///
    /// Fails when a dimension is zero, the sample count does not equal the
    /// product of `dims`, or any sample is not finite.
    pub fn new(
        dims: (usize, usize, usize),
        samples: Vec<f32>,
        affine: Mat4,
        original_range: Option<(f32, f32)>,
    ) -> Result<Self, LoadError> {
        let (nx, ny, nz) = dims;
        if nx == 0 || ny == 0 || nz == 0 {
            return Err(LoadError::InvalidDimensions { dims: [nx, ny, nz] });
        }
        let expected = nx
            .checked_mul(ny)
            .and_then(|v| v.checked_mul(nz))
            .ok_or(LoadError::InvalidDimensions { dims: [nx, ny, nz] })?;
        if samples.len() != expected {
            return Err(LoadError::SampleCountMismatch {
                dims: [nx, ny, nz],
                expected,
                actual: samples.len(),
            });
        }
        if let Some(index) = samples.iter().position(|v| !v.is_finite()) {
            return Err(LoadError::NonFiniteSample { index });
        }
        if !affine.is_finite() {
            return Err(LoadError::MalformedAffine(
                "affine contains non-finite entries".to_string(),
            ));
        }
        let samples = Array3::from_shape_vec((nz, ny, nx), samples).map_err(|_| {
            LoadError::SampleCountMismatch {
                dims: [nx, ny, nz],
                expected,
                actual: 0,
            }
        })?;
        Ok(Self {
            dims,
            samples,
            affine,
            original_range,
        })
    }

    /// Get the dimensions of the grid (nx, ny, nz)
    pub fn dims(&self) -> (usize, usize, usize) {
        self.dims
    }

    pub fn samples(&self) -> &Array3<f32> {
        &self.samples
    }

    pub fn affine(&self) -> Mat4 {
        self.affine
    }

    pub fn original_range(&self) -> Option<(f32, f32)> {
        self.original_range
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Minimum and maximum sample value.
    pub fn value_range(&self) -> (f32, f32) {
        self.samples
            .par_iter()
            .fold(
                || (f32::INFINITY, f32::NEG_INFINITY),
                |(lo, hi), &v| (lo.min(v), hi.max(v)),
            )
            .reduce(
                || (f32::INFINITY, f32::NEG_INFINITY),
                |(a_lo, a_hi), (b_lo, b_hi)| (a_lo.min(b_lo), a_hi.max(b_hi)),
            )
    }

    /// Brings the samples into the [0, 1] domain the transfer function and
    /// the shader threshold operate in.
    ///
    /// Grids already inside [0, 1] are left untouched. Otherwise samples are
    /// rescaled by `original_range` when the backend sent one, and by the
    /// observed range if not. A flat grid maps to all zeros.
    pub fn normalized(mut self) -> Self {
        let (lo, hi) = self.value_range();
        if lo >= 0.0 && hi <= 1.0 {
            debug!("Volume already normalized (range {lo}..{hi})");
            return self;
        }
        let (min, max) = match self.original_range {
            Some((min, max)) if max > min && lo >= min && hi <= max => (min, max),
            Some(range) => {
                warn!(
                    "originalRange {range:?} does not cover sample range {lo}..{hi}, using observed range"
                );
                (lo, hi)
            }
            None => {
                warn!("Volume samples outside [0, 1] ({lo}..{hi}), rescaling to observed range");
                (lo, hi)
            }
        };
        let span = max - min;
        if span <= f32::EPSILON {
            self.samples.par_mapv_inplace(|_| 0.0);
        } else {
            self.samples
                .par_mapv_inplace(|v| ((v - min) / span).clamp(0.0, 1.0));
        }
        self
    }

    /// Samples converted to half floats in upload order (x fastest).
    pub fn to_f16_texels(&self) -> Vec<f16> {
        match self.samples.as_slice() {
            Some(slice) => slice.par_iter().map(|&v| f16::from_f32(v)).collect(),
            None => self.samples.iter().map(|&v| f16::from_f32(v)).collect(),
        }
    }

    /// Sample at integer voxel coordinates.
    #[inline]
    pub fn voxel(&self, x: usize, y: usize, z: usize) -> f32 {
        self.samples[[z, y, x]]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_count_mismatch_is_rejected() {
        let result = VolumeGrid::new((2, 2, 2), vec![0.0; 7], Mat4::IDENTITY, None);
        match result {
            Err(LoadError::SampleCountMismatch {
                expected, actual, ..
            }) => {
                assert_eq!(expected, 8);
                assert_eq!(actual, 7);
            }
            other => panic!("expected size mismatch, got {other:?}"),
        }
    }

    #[test]
    fn test_zero_dimension_is_rejected() {
        let result = VolumeGrid::new((0, 2, 2), vec![], Mat4::IDENTITY, None);
        assert!(matches!(result, Err(LoadError::InvalidDimensions { .. })));
    }

    #[test]
    fn test_non_finite_sample_is_rejected() {
        let mut samples = vec![0.5; 8];
        samples[3] = f32::NAN;
        let result = VolumeGrid::new((2, 2, 2), samples, Mat4::IDENTITY, None);
        assert!(matches!(
            result,
            Err(LoadError::NonFiniteSample { index: 3 })
        ));
    }

    #[test]
    fn test_x_varies_fastest() {
        let samples: Vec<f32> = (0..24).map(|v| v as f32).collect();
        let grid = VolumeGrid::new((2, 3, 4), samples, Mat4::IDENTITY, None).unwrap();
        assert_eq!(grid.voxel(1, 0, 0), 1.0);
        assert_eq!(grid.voxel(0, 1, 0), 2.0);
        assert_eq!(grid.voxel(0, 0, 1), 6.0);
        assert_eq!(grid.voxel(1, 2, 3), 23.0);
    }

    #[test]
    fn test_normalized_grid_is_untouched() {
        let samples = vec![0.0, 0.25, 0.5, 1.0, 0.1, 0.2, 0.3, 0.4];
        let grid = VolumeGrid::new((2, 2, 2), samples.clone(), Mat4::IDENTITY, None)
            .unwrap()
            .normalized();
        assert_eq!(grid.samples().as_slice().unwrap(), samples.as_slice());
    }

    #[test]
    fn test_normalize_with_original_range() {
        let samples = vec![0.0, 50.0, 100.0, 200.0];
        let grid = VolumeGrid::new((4, 1, 1), samples, Mat4::IDENTITY, Some((0.0, 400.0)))
            .unwrap()
            .normalized();
        assert_eq!(
            grid.samples().as_slice().unwrap(),
            &[0.0, 0.125, 0.25, 0.5]
        );
    }

    #[test]
    fn test_normalize_with_observed_range() {
        let samples = vec![-10.0, 0.0, 10.0, 30.0];
        let grid = VolumeGrid::new((4, 1, 1), samples, Mat4::IDENTITY, None)
            .unwrap()
            .normalized();
        assert_eq!(grid.value_range(), (0.0, 1.0));
        assert_eq!(grid.voxel(1, 0, 0), 0.25);
    }

    #[test]
    fn test_flat_grid_normalizes_to_zero() {
        let grid = VolumeGrid::new((2, 1, 1), vec![7.0, 7.0], Mat4::IDENTITY, None)
            .unwrap()
            .normalized();
        assert_eq!(grid.value_range(), (0.0, 0.0));
    }

    #[test]
    fn test_f16_texels_keep_order() {
        let grid =
            VolumeGrid::new((3, 1, 1), vec![0.0, 0.5, 1.0], Mat4::IDENTITY, None).unwrap();
        let texels = grid.to_f16_texels();
        assert_eq!(texels.len(), 3);
        assert_eq!(texels[1].to_f32(), 0.5);
        assert_eq!(texels[2].to_f32(), 1.0);
    }
}

use crate::{
    config::ViewerConfig,
    mesh::SurfaceMesh,
    placement::{VolumePlacement, affine_from_rows, voxel_spacing},
    raymarch::MarchParams,
    transfer_function::TransferFunction,
    volume::VolumeGrid,
};
use async_trait::async_trait;
use glam::Vec3;
use log::{debug, error, info, warn};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, de::DeserializeOwned};
use thiserror::Error;
use web_time::Instant;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("Request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("Backend returned HTTP {status}: {message}")]
    Status { status: u16, message: String },
    #[error("Backend error: {0}")]
    Backend(String),
    #[error("Malformed payload: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("Response is missing required field `{0}`")]
    MissingField(&'static str),
    #[error("Invalid volume dimensions {dims:?}")]
    InvalidDimensions { dims: [usize; 3] },
    #[error("Volume with dims {dims:?} expects {expected} samples, got {actual}")]
    SampleCountMismatch {
        dims: [usize; 3],
        expected: usize,
        actual: usize,
    },
    #[error("Sample {index} is not finite")]
    NonFiniteSample { index: usize },
    #[error("Malformed affine: {0}")]
    MalformedAffine(String),
    #[error("Mesh has no vertices")]
    EmptyMesh,
    #[error("Face {face} references vertex {index}, mesh has {vertex_count} vertices")]
    FaceIndexOutOfRange {
        face: usize,
        index: u32,
        vertex_count: usize,
    },
    #[error("Malformed mesh: {0}")]
    MalformedMesh(String),
}

/// Opaque value supplied by the host whenever the active filter or mask
/// selection changes. Any new value means: discard, refetch, rebuild.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct RefreshTrigger(pub u64);

/// Body of the mesh endpoint.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct MeshPayload {
    pub vertices: Option<Vec<[f32; 3]>>,
    pub faces: Option<Vec<[u32; 3]>>,
    pub error: Option<String>,
}

/// Body of the volume endpoint.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumePayload {
    pub dims: Option<[usize; 3]>,
    #[serde(alias = "samples")]
    pub raw_data: Option<Vec<f32>>,
    /// Row-major 4x4.
    pub affine: Option<[[f32; 4]; 4]>,
    pub original_range: Option<[f32; 2]>,
    pub error: Option<String>,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: Option<String>,
}

/// Where mesh and volume payloads come from.
#[async_trait]
pub trait VolumeSource: Send + Sync {
    async fn fetch_mesh(&self, trigger: RefreshTrigger) -> Result<MeshPayload, LoadError>;
    async fn fetch_volume(&self, trigger: RefreshTrigger) -> Result<VolumePayload, LoadError>;
}

/// Fetches payloads from the backend REST service.
pub struct HttpVolumeSource {
    client: Client,
    mesh_url: String,
    volume_url: String,
}

impl HttpVolumeSource {
    /// # Errors
    ///
    /// Fails if the HTTP client cannot be constructed.
    pub fn new(config: &ViewerConfig) -> Result<Self, LoadError> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()?;
        Ok(Self {
            client,
            mesh_url: config.endpoint_url(&config.mesh_endpoint),
            volume_url: config.endpoint_url(&config.volume_endpoint),
        })
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        trigger: RefreshTrigger,
    ) -> Result<T, LoadError> {
        debug!("GET {url} (refresh {})", trigger.0);
        let response = self
            .client
            .get(url)
            .query(&[("refresh", trigger.0)])
            .send()
            .await?;
        let status = response.status();
        let body = response.bytes().await?;
        if !status.is_success() {
            let e = status_error(status, &body);
            warn!("GET {url} failed: {e}");
            return Err(e);
        }
        Ok(serde_json::from_slice(&body)?)
    }
}

/// Error for a non-success response. The body's `error` field is the
/// message when present, the canonical reason phrase otherwise.
pub fn status_error(status: StatusCode, body: &[u8]) -> LoadError {
    let message = serde_json::from_slice::<ErrorBody>(body)
        .ok()
        .and_then(|b| b.error)
        .unwrap_or_else(|| status.canonical_reason().unwrap_or("unknown").to_string());
    LoadError::Status {
        status: status.as_u16(),
        message,
    }
}

#[async_trait]
impl VolumeSource for HttpVolumeSource {
    async fn fetch_mesh(&self, trigger: RefreshTrigger) -> Result<MeshPayload, LoadError> {
        self.get_json(&self.mesh_url, trigger).await
    }

    async fn fetch_volume(&self, trigger: RefreshTrigger) -> Result<VolumePayload, LoadError> {
        self.get_json(&self.volume_url, trigger).await
    }
}

/// Everything one load cycle produces. Immutable once built.
#[derive(Debug)]
pub struct LoadedVolume {
    pub trigger: RefreshTrigger,
    pub grid: VolumeGrid,
    pub mesh: SurfaceMesh,
    pub placement: VolumePlacement,
    pub transfer_function: TransferFunction,
    pub march_params: MarchParams,
}

pub struct VolumeLoader;

impl VolumeLoader {
    /// Fetch mesh and volume in parallel and validate them
    ///
    /// # Arguments
    ///
    /// * `source` - Where the payloads come from
    /// * `trigger` - Refresh value this load belongs to
    /// * `config` - Render settings applied to the loaded data
    ///
    /// # Errors
    ///
    /// Returns the first transport or validation error; nothing partial is
    /// ever returned.
    pub async fn load<S>(
        source: &S,
        trigger: RefreshTrigger,
        config: &ViewerConfig,
    ) -> Result<LoadedVolume, LoadError>
    where
        S: VolumeSource + ?Sized,
    {
        let started = Instant::now();
        let (mesh_payload, volume_payload) =
            futures::try_join!(source.fetch_mesh(trigger), source.fetch_volume(trigger))?;

        let mesh = Self::build_mesh(mesh_payload)
            .inspect_err(|e| error!("Mesh validation failed: {e}"))?;
        let grid = Self::build_grid(volume_payload)
            .inspect_err(|e| error!("Volume validation failed: {e}"))?
            .normalized();

        let placement = VolumePlacement::resolve(
            &grid.affine(),
            grid.dims(),
            config.proxy_sizing,
            &mesh.bounds(),
        );
        let transfer_function = TransferFunction::build(&config.transfer_policy);
        let march_params = MarchParams::new(Self::checked_threshold(config.threshold), config.steps);

        info!(
            "Loaded volume {:?} ({} samples) and mesh ({} vertices, {} faces) in {:?}",
            grid.dims(),
            grid.len(),
            mesh.vertices().len(),
            mesh.faces().len(),
            started.elapsed()
        );
        debug!(
            "Voxel spacing {:?}, proxy extent {:?}, {} transfer function",
            placement.spacing,
            placement.extent,
            transfer_function.policy_name()
        );

        Ok(LoadedVolume {
            trigger,
            grid,
            mesh,
            placement,
            transfer_function,
            march_params,
        })
    }

    /// # Errors
    ///
    /// Backend error message, missing `vertices`/`faces`, or invalid faces.
    pub fn build_mesh(payload: MeshPayload) -> Result<SurfaceMesh, LoadError> {
        if let Some(message) = payload.error {
            return Err(LoadError::Backend(message));
        }
        let vertices = payload.vertices.ok_or(LoadError::MissingField("vertices"))?;
        let faces = payload.faces.ok_or(LoadError::MissingField("faces"))?;
        let vertices = vertices.into_iter().map(Vec3::from_array).collect();
        SurfaceMesh::new(vertices, faces)
    }

    /// # Errors
    ///
    /// Backend error message, missing `dims`/`rawData`/`affine`, an affine
    /// whose voxel spacing is not finite and positive, or a sample count
    /// that disagrees with `dims`.
    pub fn build_grid(payload: VolumePayload) -> Result<VolumeGrid, LoadError> {
        if let Some(message) = payload.error {
            return Err(LoadError::Backend(message));
        }
        let [nx, ny, nz] = payload.dims.ok_or(LoadError::MissingField("dims"))?;
        let samples = payload.raw_data.ok_or(LoadError::MissingField("rawData"))?;
        let rows = payload.affine.ok_or(LoadError::MissingField("affine"))?;
        let affine = affine_from_rows(&rows);
        let spacing = voxel_spacing(&affine);
        if !(spacing.is_finite() && spacing.cmpgt(Vec3::ZERO).all()) {
            return Err(LoadError::MalformedAffine(format!(
                "voxel spacing {spacing:?} from {rows:?} must be finite and positive"
            )));
        }
        let original_range = payload.original_range.map(|[min, max]| (min, max));
        VolumeGrid::new((nx, ny, nz), samples, affine, original_range)
    }

    fn checked_threshold(threshold: f32) -> f32 {
        if (0.0..=1.0).contains(&threshold) {
            threshold
        } else {
            warn!("Threshold {threshold} outside the normalized [0, 1] domain, clamping");
            threshold.clamp(0.0, 1.0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn volume_payload(dims: [usize; 3], len: usize) -> VolumePayload {
        VolumePayload {
            dims: Some(dims),
            raw_data: Some(vec![0.5; len]),
            affine: Some([
                [2.0, 0.0, 0.0, -90.0],
                [0.0, 3.0, 0.0, 126.0],
                [0.0, 0.0, 4.0, -72.0],
                [0.0, 0.0, 0.0, 1.0],
            ]),
            original_range: None,
            error: None,
        }
    }

    #[test]
    fn test_payload_parses_backend_json() {
        let payload: VolumePayload = serde_json::from_str(
            r#"{"dims": [2, 1, 1], "rawData": [0.1, 0.9],
                "affine": [[1,0,0,0],[0,1,0,0],[0,0,1,0],[0,0,0,1]],
                "originalRange": [0, 812.5]}"#,
        )
        .unwrap();
        assert_eq!(payload.dims, Some([2, 1, 1]));
        assert_eq!(payload.raw_data.as_deref(), Some(&[0.1, 0.9][..]));
        assert_eq!(payload.original_range, Some([0.0, 812.5]));
    }

    #[test]
    fn test_samples_alias_is_accepted() {
        let payload: VolumePayload =
            serde_json::from_str(r#"{"dims": [1, 1, 1], "samples": [0.3]}"#).unwrap();
        assert_eq!(payload.raw_data, Some(vec![0.3]));
    }

    #[test]
    fn test_grid_size_mismatch() {
        let err = VolumeLoader::build_grid(volume_payload([2, 2, 2], 7)).unwrap_err();
        assert!(matches!(
            err,
            LoadError::SampleCountMismatch {
                expected: 8,
                actual: 7,
                ..
            }
        ));
    }

    #[test]
    fn test_grid_missing_fields() {
        let mut payload = volume_payload([1, 1, 1], 1);
        payload.affine = None;
        assert!(matches!(
            VolumeLoader::build_grid(payload),
            Err(LoadError::MissingField("affine"))
        ));
        assert!(matches!(
            VolumeLoader::build_grid(VolumePayload::default()),
            Err(LoadError::MissingField("dims"))
        ));
    }

    #[test]
    fn test_singular_affine_is_rejected() {
        let mut payload = volume_payload([1, 1, 1], 1);
        payload.affine = Some([[0.0; 4]; 4]);
        assert!(matches!(
            VolumeLoader::build_grid(payload),
            Err(LoadError::MalformedAffine(_))
        ));
    }

    #[test]
    fn test_status_error_uses_body_message() {
        let e = status_error(
            StatusCode::NOT_FOUND,
            br#"{"error": "No volume for the current filter"}"#,
        );
        match e {
            LoadError::Status { status, message } => {
                assert_eq!(status, 404);
                assert_eq!(message, "No volume for the current filter");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_status_error_falls_back_to_reason() {
        let e = status_error(StatusCode::INTERNAL_SERVER_ERROR, b"<html>oops</html>");
        assert_eq!(
            e.to_string(),
            "Backend returned HTTP 500: Internal Server Error"
        );
        let e = status_error(StatusCode::BAD_GATEWAY, br#"{"detail": "upstream"}"#);
        assert!(matches!(e, LoadError::Status { status: 502, ref message } if message == "Bad Gateway"));
    }

    #[test]
    fn test_small_spacing_affine_is_accepted() {
        let mut payload = volume_payload([10, 10, 10], 1000);
        payload.affine = Some([
            [0.001, 0.0, 0.0, 0.0],
            [0.0, 0.001, 0.0, 0.0],
            [0.0, 0.0, 0.001, 0.0],
            [0.0, 0.0, 0.0, 1.0],
        ]);
        let grid = VolumeLoader::build_grid(payload).unwrap();
        let spacing = voxel_spacing(&grid.affine());
        assert!((spacing - Vec3::splat(0.001)).length() < 1e-9);
    }

    #[test]
    fn test_zero_column_affine_is_rejected() {
        let mut payload = volume_payload([2, 2, 2], 8);
        payload.affine = Some([
            [1.0, 0.0, 0.0, 0.0],
            [0.0, 1.0, 0.0, 0.0],
            [0.0, 0.0, 0.0, 0.0],
            [0.0, 0.0, 0.0, 1.0],
        ]);
        assert!(matches!(
            VolumeLoader::build_grid(payload),
            Err(LoadError::MalformedAffine(_))
        ));
    }

    #[test]
    fn test_mesh_missing_faces() {
        let payload = MeshPayload {
            vertices: Some(vec![[0.0, 0.0, 0.0]]),
            faces: None,
            error: None,
        };
        assert!(matches!(
            VolumeLoader::build_mesh(payload),
            Err(LoadError::MissingField("faces"))
        ));
    }

    #[test]
    fn test_backend_error_field() {
        let payload: MeshPayload =
            serde_json::from_str(r#"{"error": "Failed to generate mesh data from template"}"#)
                .unwrap();
        let err = VolumeLoader::build_mesh(payload).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Backend error: Failed to generate mesh data from template"
        );
    }
}

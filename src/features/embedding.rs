//! Semantic embedding via an ONNX vision encoder (CLIP/SigLIP class).
//!
//! The encoder is a shared, lazily-initialized resource with three states:
//! `Uninitialized` until first use, `Ready` once a session is committed, and
//! `Disabled` permanently after initialization fails on both the accelerated
//! and CPU paths. A single mutex guards the state so concurrent first-use
//! cannot double-initialize or race on device binding.

use std::path::{Path, PathBuf};

use image::imageops::FilterType;
use image::DynamicImage;
use ort::execution_providers::{CPUExecutionProvider, CUDAExecutionProvider};
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use parking_lot::Mutex;
use tracing::{info, warn};

const INPUT_SIZE: u32 = 224;

enum EncoderState {
    Uninitialized,
    Ready(Session),
    Disabled,
}

pub struct SemanticEncoder {
    model_path: Option<PathBuf>,
    state: Mutex<EncoderState>,
}

impl SemanticEncoder {
    /// `None` model path leaves the encoder permanently disabled.
    pub fn new(model_path: Option<PathBuf>) -> Self {
        let state = if model_path.is_some() {
            EncoderState::Uninitialized
        } else {
            EncoderState::Disabled
        };
        Self {
            model_path,
            state: Mutex::new(state),
        }
    }

    /// True once the encoder has been switched off for the process lifetime.
    pub fn is_disabled(&self) -> bool {
        matches!(*self.state.lock(), EncoderState::Disabled)
    }

    /// Encode an image to a unit-normalized vector. Returns `None` when the
    /// encoder is disabled or the model produces an unusable output; this is
    /// a partial-signal failure, never an error.
    pub fn encode(&self, image: &DynamicImage) -> Option<Vec<f32>> {
        let mut state = self.state.lock();

        if let EncoderState::Uninitialized = *state {
            *state = match self.initialize() {
                Some(session) => EncoderState::Ready(session),
                None => EncoderState::Disabled,
            };
        }

        let session = match *state {
            EncoderState::Ready(ref mut s) => s,
            _ => return None,
        };

        match run_encoder(session, image) {
            Ok(embedding) => normalize(embedding),
            Err(e) => {
                warn!("embedding inference failed: {e}");
                None
            }
        }
    }

    /// Accelerated provider first, CPU fallback once; both failing disables
    /// the encoder for the rest of the process.
    fn initialize(&self) -> Option<Session> {
        let path = self.model_path.as_deref()?;
        match build_session(path, true) {
            Ok(session) => {
                info!("semantic encoder ready (accelerated provider)");
                Some(session)
            }
            Err(e) => {
                warn!("accelerated encoder init failed ({e}), retrying on CPU");
                match build_session(path, false) {
                    Ok(session) => {
                        info!("semantic encoder ready (cpu)");
                        Some(session)
                    }
                    Err(e) => {
                        warn!("cpu encoder init failed ({e}), disabling semantic signal");
                        None
                    }
                }
            }
        }
    }
}

fn build_session(path: &Path, accelerated: bool) -> ort::Result<Session> {
    let builder = Session::builder()?.with_optimization_level(GraphOptimizationLevel::Level3)?;
    let builder = if accelerated {
        builder.with_execution_providers([CUDAExecutionProvider::default().build()])?
    } else {
        builder.with_execution_providers([CPUExecutionProvider::default().build()])?
    };
    builder.commit_from_file(path)
}

fn run_encoder(session: &mut Session, image: &DynamicImage) -> ort::Result<Vec<f32>> {
    let input = ort::value::Value::from_array(preprocess(image))?;
    let outputs = session.run(ort::inputs!["pixel_values" => input])?;

    // CLIP-style exports name the pooled vector differently.
    let output = outputs
        .get("pooler_output")
        .or_else(|| outputs.get("image_embeds"))
        .or_else(|| outputs.get("output"));
    let Some(output) = output else {
        return Ok(Vec::new());
    };
    let (_, data) = output.try_extract_tensor::<f32>()?;
    Ok(data.to_vec())
}

/// NCHW float tensor, channel-major, scaled to [0, 1].
fn preprocess(img: &DynamicImage) -> (Vec<usize>, Vec<f32>) {
    let resized = img.resize_exact(INPUT_SIZE, INPUT_SIZE, FilterType::CatmullRom);
    let rgb = resized.to_rgb8();
    let size = INPUT_SIZE as usize;

    let shape = vec![1, 3, size, size];
    let mut data = vec![0.0f32; 3 * size * size];
    for y in 0..size {
        for x in 0..size {
            let px = rgb.get_pixel(x as u32, y as u32);
            let idx = y * size + x;
            data[idx] = px[0] as f32 / 255.0;
            data[size * size + idx] = px[1] as f32 / 255.0;
            data[2 * size * size + idx] = px[2] as f32 / 255.0;
        }
    }
    (shape, data)
}

/// L2-normalize, rejecting empty or NaN-bearing outputs.
fn normalize(v: Vec<f32>) -> Option<Vec<f32>> {
    if v.is_empty() || v.iter().any(|x| x.is_nan()) {
        return None;
    }
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt() + 1e-8;
    Some(v.into_iter().map(|x| x / norm).collect())
}

/// Cosine similarity of two unit vectors; 0 when either is absent.
pub fn cosine(a: Option<&[f32]>, b: Option<&[f32]>) -> f64 {
    match (a, b) {
        (Some(a), Some(b)) if a.len() == b.len() => {
            a.iter().zip(b).map(|(x, y)| (x * y) as f64).sum()
        }
        _ => 0.0,
    }
}

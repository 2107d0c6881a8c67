//! Face landmark providers.
//!
//! A provider turns a [`Raster`] into zero or more [`FaceLandmarks`], each a
//! 68-point shape in the iBUG order. The analyzer only sees the trait, so
//! the model-backed provider can be swapped for a fixed one in tests.

use std::ops::Range;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

use crate::assets;
use crate::config::LandmarkConfig;
use crate::error::{Error, Result};
use crate::predictor::ShapePredictor;
use crate::raster::Raster;
use crate::types::{BoundingBox, Point, Shape};

pub const NUM_LANDMARKS: usize = 68;

pub const NOSE_TIP: usize = 30;
pub const LEFT_EYE: Range<usize> = 36..42;
pub const RIGHT_EYE: Range<usize> = 42..48;
pub const MOUTH: Range<usize> = 48..68;

/// SeetaFace refuses windows smaller than this.
const MIN_DETECTOR_FACE_SIZE: u32 = 20;

/// One detected face: its rectangle and 68 landmark points in image pixels.
#[derive(Debug, Clone, PartialEq)]
pub struct FaceLandmarks {
    bbox: BoundingBox,
    shape: Shape,
}

impl FaceLandmarks {
    pub fn new(bbox: BoundingBox, shape: Shape) -> Result<Self> {
        if shape.num_landmarks() != NUM_LANDMARKS {
            return Err(Error::InvalidModel(format!(
                "expected {NUM_LANDMARKS} landmarks, got {}",
                shape.num_landmarks()
            )));
        }
        Ok(Self { bbox, shape })
    }

    pub fn bbox(&self) -> &BoundingBox {
        &self.bbox
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn points(&self) -> &[Point] {
        &self.shape.points
    }

    pub fn left_eye(&self) -> &[Point] {
        self.shape.slice(LEFT_EYE)
    }

    pub fn right_eye(&self) -> &[Point] {
        self.shape.slice(RIGHT_EYE)
    }

    pub fn nose_tip(&self) -> Point {
        self.shape[NOSE_TIP]
    }

    pub fn mouth(&self) -> &[Point] {
        self.shape.slice(MOUTH)
    }
}

pub trait LandmarkProvider: Send + Sync {
    /// Faces in detector order; an empty vector when none are found.
    fn detect_faces(&self, raster: &Raster) -> Result<Vec<FaceLandmarks>>;
}

impl<T: LandmarkProvider + ?Sized> LandmarkProvider for Arc<T> {
    fn detect_faces(&self, raster: &Raster) -> Result<Vec<FaceLandmarks>> {
        (**self).detect_faces(raster)
    }
}

impl<T: LandmarkProvider + ?Sized> LandmarkProvider for Box<T> {
    fn detect_faces(&self, raster: &Raster) -> Result<Vec<FaceLandmarks>> {
        (**self).detect_faces(raster)
    }
}

/// SeetaFace detection followed by ERT shape prediction on each face.
pub struct DlibLandmarkProvider {
    detector_model: rustface::Model,
    predictor: ShapePredictor,
    min_face_size: u32,
}

impl DlibLandmarkProvider {
    pub fn new(
        detector_model: rustface::Model,
        predictor: ShapePredictor,
        min_face_size: u32,
    ) -> Result<Self> {
        if predictor.num_landmarks() != NUM_LANDMARKS {
            return Err(Error::InvalidModel(format!(
                "shape predictor has {} landmarks, expected {NUM_LANDMARKS}",
                predictor.num_landmarks()
            )));
        }
        Ok(Self {
            detector_model,
            predictor,
            min_face_size: min_face_size.max(MIN_DETECTOR_FACE_SIZE),
        })
    }

    /// Resolve both model assets and build the provider. Run once at startup.
    pub fn from_config(config: &LandmarkConfig) -> Result<Self> {
        let detector_model = assets::load_face_detector(config)?;
        let predictor = assets::load_predictor(config)?;
        Self::new(detector_model, predictor, config.min_face_size)
    }
}

impl LandmarkProvider for DlibLandmarkProvider {
    fn detect_faces(&self, raster: &Raster) -> Result<Vec<FaceLandmarks>> {
        let gray = raster.to_gray();

        let mut detector = rustface::create_detector_with_model(self.detector_model.clone());
        detector.set_min_face_size(self.min_face_size);
        detector.set_score_thresh(2.0);
        detector.set_pyramid_scale_factor(0.8);
        detector.set_slide_window_step(4, 4);

        let faces = detector.detect(&rustface::ImageData::new(
            gray.as_raw(),
            raster.width(),
            raster.height(),
        ));
        tracing::debug!(faces = faces.len(), "face detection finished");

        faces
            .iter()
            .map(|face| {
                let rect = face.bbox();
                let bbox = BoundingBox::new(
                    rect.x() as f32,
                    rect.y() as f32,
                    rect.width() as f32,
                    rect.height() as f32,
                );
                FaceLandmarks::new(bbox, self.predictor.predict(&gray, &bbox))
            })
            .collect()
    }
}

/// Runs another provider on a worker thread and gives up after `timeout`.
///
/// At most one worker exists at a time. A timed-out worker is left to finish
/// in the background, and calls made while it is still running fail at once
/// with [`Error::LandmarkTimeout`] instead of starting another thread.
pub struct TimedLandmarkProvider {
    inner: Arc<dyn LandmarkProvider>,
    timeout: Duration,
    busy: Arc<AtomicBool>,
}

/// Clears the busy flag when the worker finishes, even by panicking.
struct WorkerSlot(Arc<AtomicBool>);

impl Drop for WorkerSlot {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl TimedLandmarkProvider {
    pub fn new(inner: Arc<dyn LandmarkProvider>, timeout: Duration) -> Self {
        Self {
            inner,
            timeout,
            busy: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Whether a previous worker is still running.
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}

impl LandmarkProvider for TimedLandmarkProvider {
    fn detect_faces(&self, raster: &Raster) -> Result<Vec<FaceLandmarks>> {
        if self
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::warn!("previous landmark worker still running; skipping inference");
            return Err(Error::LandmarkTimeout(self.timeout));
        }
        let slot = WorkerSlot(Arc::clone(&self.busy));

        let (tx, rx) = mpsc::channel();
        let inner = Arc::clone(&self.inner);
        let raster = raster.clone();

        thread::Builder::new()
            .name("landmarks".into())
            .spawn(move || {
                let result = inner.detect_faces(&raster);
                drop(slot);
                let _ = tx.send(result);
            })?;

        match rx.recv_timeout(self.timeout) {
            Ok(result) => result,
            Err(mpsc::RecvTimeoutError::Timeout) => {
                tracing::warn!(timeout = ?self.timeout, "landmark inference timed out");
                Err(Error::LandmarkTimeout(self.timeout))
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => Err(Error::InvalidModel(
                "landmark worker exited without a result".into(),
            )),
        }
    }
}

/// Returns the same faces for every raster.
#[derive(Debug, Clone, Default)]
pub struct StaticLandmarks {
    faces: Vec<FaceLandmarks>,
}

impl StaticLandmarks {
    pub fn new(faces: Vec<FaceLandmarks>) -> Self {
        Self { faces }
    }

    pub fn none() -> Self {
        Self::default()
    }
}

impl LandmarkProvider for StaticLandmarks {
    fn detect_faces(&self, _raster: &Raster) -> Result<Vec<FaceLandmarks>> {
        Ok(self.faces.clone())
    }
}

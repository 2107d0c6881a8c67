//! Model asset resolution, run once before any image is analyzed.
//!
//! The landmark model is looked up as `<model>`, then `<model>.bz2`, then
//! fetched from the configured URL. The parsed predictor is cached as
//! `<model>.bin` so later runs skip the dlib parser.

use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use bzip2::read::BzDecoder;

use crate::config::LandmarkConfig;
use crate::dlib::load_dlib_model;
use crate::error::{Error, Result};
use crate::predictor::ShapePredictor;

const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(300);

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut s = OsString::from(path.as_os_str());
    s.push(suffix);
    PathBuf::from(s)
}

fn unavailable(path: &Path, reason: impl ToString) -> Error {
    Error::ModelAssetUnavailable {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    }
}

/// Make sure the landmark model exists locally and return its path.
pub fn ensure_landmark_model(config: &LandmarkConfig) -> Result<PathBuf> {
    let path = &config.landmark_model;
    if path.is_file() {
        return Ok(path.clone());
    }

    let compressed = with_suffix(path, ".bz2");
    if !compressed.is_file() {
        let Some(url) = config.download_url.as_deref() else {
            return Err(unavailable(path, "file not found and no download URL configured"));
        };
        tracing::info!(url, dest = %compressed.display(), "downloading landmark model");
        download(url, &compressed).map_err(|e| unavailable(path, e))?;
    }

    tracing::info!(src = %compressed.display(), "decompressing landmark model");
    decompress_bz2(&compressed, path).map_err(|e| unavailable(path, e))?;
    Ok(path.clone())
}

/// Write through a temporary sibling so an interrupted run leaves no partial file.
fn write_atomically<F>(dest: &Path, fill: F) -> Result<()>
where
    F: FnOnce(&mut BufWriter<File>) -> Result<()>,
{
    let partial = with_suffix(dest, ".part");
    if let Err(e) = fill_file(&partial, fill) {
        let _ = fs::remove_file(&partial);
        return Err(e);
    }
    fs::rename(&partial, dest)?;
    Ok(())
}

fn fill_file<F>(path: &Path, fill: F) -> Result<()>
where
    F: FnOnce(&mut BufWriter<File>) -> Result<()>,
{
    let mut writer = BufWriter::new(File::create(path)?);
    fill(&mut writer)?;
    writer.flush()?;
    Ok(())
}

fn decompress_bz2(src: &Path, dest: &Path) -> Result<()> {
    let mut decoder = BzDecoder::new(BufReader::new(File::open(src)?));
    write_atomically(dest, |out| {
        io::copy(&mut decoder, out)?;
        Ok(())
    })
}

fn download(url: &str, dest: &Path) -> Result<()> {
    let client = reqwest::blocking::Client::builder()
        .timeout(DOWNLOAD_TIMEOUT)
        .connect_timeout(Duration::from_secs(10))
        .build()
        .map_err(|e| Error::Download(e.to_string()))?;
    let mut response = client
        .get(url)
        .send()
        .map_err(|e| Error::Download(e.to_string()))?;
    if !response.status().is_success() {
        return Err(Error::Download(format!("{url}: HTTP {}", response.status())));
    }
    write_atomically(dest, |out| {
        response
            .copy_to(out)
            .map_err(|e| Error::Download(e.to_string()))?;
        Ok(())
    })
}

/// Load the shape predictor, preferring the bincode cache next to the model.
pub fn load_predictor(config: &LandmarkConfig) -> Result<ShapePredictor> {
    let cache = with_suffix(&config.landmark_model, ".bin");
    if cache.is_file() {
        match ShapePredictor::load(&cache) {
            Ok(predictor) => {
                tracing::debug!(cache = %cache.display(), "loaded cached shape predictor");
                return Ok(predictor);
            }
            Err(e) => {
                tracing::warn!(cache = %cache.display(), error = %e, "ignoring unreadable predictor cache")
            }
        }
    }

    let model_path = ensure_landmark_model(config)?;
    let predictor = load_dlib_model(&model_path)?;
    if let Err(e) = predictor.save(&cache) {
        tracing::warn!(cache = %cache.display(), error = %e, "could not write predictor cache");
    }
    Ok(predictor)
}

/// Load the SeetaFace detector model. It is never downloaded.
pub fn load_face_detector(config: &LandmarkConfig) -> Result<rustface::Model> {
    let path = &config.detector_model;
    if !path.is_file() {
        return Err(unavailable(path, "face detector model not found"));
    }
    let bytes = fs::read(path)?;
    rustface::read_model(io::Cursor::new(bytes)).map_err(|e| unavailable(path, e))
}

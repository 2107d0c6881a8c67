//! Reader for dlib's serialized `shape_predictor` (`.dat`, optionally `.dat.bz2`).
//!
//! Integers are variable length: a control byte whose high bit is the sign
//! and whose low nibble is the number of little-endian magnitude bytes that
//! follow. Floats are a (mantissa, exponent) integer pair. Matrices store
//! their dimensions negated.
//!
//! Pre-trained 68-point model:
//! `http://dlib.net/files/shape_predictor_68_face_landmarks.dat.bz2`

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use bzip2::read::BzDecoder;

use crate::error::{Error, Result};
use crate::predictor::{CascadeStage, RegressionTree, ShapePredictor, Split};
use crate::types::{Point, Shape};

/// Refuse any single collection longer than this before allocating for it.
const MAX_LEN: u64 = 1 << 24;

struct DlibReader<R: Read> {
    reader: R,
}

impl<R: Read> DlibReader<R> {
    fn new(reader: R) -> Self {
        Self { reader }
    }

    fn read_byte(&mut self) -> Result<u8> {
        let mut buf = [0u8; 1];
        self.reader.read_exact(&mut buf)?;
        Ok(buf[0])
    }

    fn read_int(&mut self) -> Result<i64> {
        let control = self.read_byte()?;
        let negative = control & 0x80 != 0;
        let num_bytes = (control & 0x0F) as usize;
        if num_bytes > 8 {
            return Err(Error::InvalidModel(format!(
                "integer with {num_bytes} bytes"
            )));
        }

        let mut magnitude: u64 = 0;
        for i in 0..num_bytes {
            magnitude |= (self.read_byte()? as u64) << (8 * i);
        }
        let value = i64::try_from(magnitude)
            .map_err(|_| Error::InvalidModel(format!("integer magnitude {magnitude}")))?;
        Ok(if negative { -value } else { value })
    }

    /// Matrix dimensions are stored negated.
    fn read_dim(&mut self) -> Result<i64> {
        let stored = self.read_int()?;
        stored
            .checked_neg()
            .ok_or_else(|| Error::InvalidModel(format!("bad matrix dimension {stored}")))
    }

    fn read_len(&mut self) -> Result<usize> {
        let value = self.read_int()?;
        if value < 0 || value as u64 > MAX_LEN {
            return Err(Error::InvalidModel(format!("bad length {value}")));
        }
        Ok(value as usize)
    }

    fn read_float(&mut self) -> Result<f32> {
        let mantissa = self.read_int()?;
        let exponent = self.read_int()?;
        if mantissa == 0 {
            return Ok(0.0);
        }
        let exponent = i32::try_from(exponent)
            .map_err(|_| Error::InvalidModel(format!("float exponent {exponent}")))?;
        Ok((mantissa as f64 * 2f64.powi(exponent)) as f32)
    }

    /// A column vector of interleaved `(x, y)` pairs.
    fn read_shape(&mut self) -> Result<Shape> {
        let rows = self.read_dim()?;
        let cols = self.read_dim()?;
        if cols != 1 || rows < 0 || rows % 2 != 0 || rows as u64 > MAX_LEN {
            return Err(Error::InvalidModel(format!(
                "expected a 2n x 1 matrix, got {rows} x {cols}"
            )));
        }
        let mut points = Vec::with_capacity(rows as usize / 2);
        for _ in 0..rows / 2 {
            let x = self.read_float()?;
            let y = self.read_float()?;
            points.push(Point::new(x, y));
        }
        Ok(Shape::new(points))
    }

    fn read_tree(&mut self) -> Result<RegressionTree> {
        let num_splits = self.read_len()?;
        let mut splits = Vec::with_capacity(num_splits);
        for _ in 0..num_splits {
            let idx1 = self.read_index()?;
            let idx2 = self.read_index()?;
            let threshold = self.read_float()?;
            splits.push(Split {
                idx1,
                idx2,
                threshold,
            });
        }

        let num_leaves = self.read_len()?;
        let mut leaves = Vec::with_capacity(num_leaves);
        for _ in 0..num_leaves {
            leaves.push(self.read_shape()?);
        }
        RegressionTree::new(splits, leaves)
    }

    fn read_index(&mut self) -> Result<u32> {
        let value = self.read_int()?;
        u32::try_from(value).map_err(|_| Error::InvalidModel(format!("bad index {value}")))
    }
}

/// Load a predictor from a `.dat` file, decompressing on the fly when the
/// extension is `.bz2`.
pub fn load_dlib_model<P: AsRef<Path>>(path: P) -> Result<ShapePredictor> {
    let path = path.as_ref();
    let reader = BufReader::new(File::open(path)?);

    let predictor = if path.extension().is_some_and(|ext| ext == "bz2") {
        load_dlib_model_from_reader(BzDecoder::new(reader))?
    } else {
        load_dlib_model_from_reader(reader)?
    };
    tracing::debug!(
        path = %path.display(),
        landmarks = predictor.num_landmarks(),
        stages = predictor.num_cascade_stages(),
        "parsed dlib shape predictor"
    );
    Ok(predictor)
}

pub fn load_dlib_model_from_reader<R: Read>(reader: R) -> Result<ShapePredictor> {
    let mut r = DlibReader::new(reader);

    let version = r.read_int()?;
    if version != 1 {
        return Err(Error::InvalidModel(format!(
            "unsupported shape_predictor version {version}"
        )));
    }

    let mean_shape = r.read_shape()?;

    let num_stages = r.read_len()?;
    let mut forests = Vec::with_capacity(num_stages);
    for _ in 0..num_stages {
        let num_trees = r.read_len()?;
        let mut forest = Vec::with_capacity(num_trees);
        for _ in 0..num_trees {
            forest.push(r.read_tree()?);
        }
        forests.push(forest);
    }

    let num_anchor_sets = r.read_len()?;
    let mut anchors = Vec::with_capacity(num_anchor_sets);
    for _ in 0..num_anchor_sets {
        let n = r.read_len()?;
        let mut set = Vec::with_capacity(n);
        for _ in 0..n {
            set.push(r.read_index()?);
        }
        anchors.push(set);
    }

    let num_delta_sets = r.read_len()?;
    let mut deltas = Vec::with_capacity(num_delta_sets);
    for _ in 0..num_delta_sets {
        let n = r.read_len()?;
        let mut set = Vec::with_capacity(n);
        for _ in 0..n {
            let x = r.read_float()?;
            let y = r.read_float()?;
            set.push(Point::new(x, y));
        }
        deltas.push(set);
    }

    if anchors.len() != num_stages || deltas.len() != num_stages {
        return Err(Error::InvalidModel(format!(
            "{num_stages} stages but {} anchor sets and {} delta sets",
            anchors.len(),
            deltas.len()
        )));
    }

    let cascade = forests
        .into_iter()
        .zip(anchors)
        .zip(deltas)
        .map(|((forest, anchors), deltas)| CascadeStage {
            forest,
            anchors,
            deltas,
        })
        .collect();

    ShapePredictor::new(mean_shape, cascade)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Write};
    use std::path::PathBuf;

    use bzip2::write::BzEncoder;
    use bzip2::Compression;

    use crate::raster::GrayImage;
    use crate::types::BoundingBox;

    fn write_int(out: &mut Vec<u8>, value: i64) {
        let magnitude = value.unsigned_abs();
        let bytes: Vec<u8> = magnitude
            .to_le_bytes()
            .into_iter()
            .take(8 - magnitude.leading_zeros() as usize / 8)
            .collect();
        let sign = if value < 0 { 0x80 } else { 0 };
        out.push(sign | bytes.len() as u8);
        out.extend(bytes);
    }

    /// Exact for the dyadic values the fixtures use.
    fn write_float(out: &mut Vec<u8>, value: f32) {
        write_int(out, (value as f64 * 1024.0).round() as i64);
        write_int(out, -10);
    }

    fn write_shape(out: &mut Vec<u8>, points: &[(f32, f32)]) {
        write_int(out, -(points.len() as i64 * 2));
        write_int(out, -1);
        for &(x, y) in points {
            write_float(out, x);
            write_float(out, y);
        }
    }

    /// Two landmarks, one stage, one depth-1 tree comparing the pixels under each landmark.
    fn tiny_model() -> Vec<u8> {
        let mut out = Vec::new();
        write_int(&mut out, 1);
        write_shape(&mut out, &[(0.25, 0.5), (0.75, 0.5)]);

        write_int(&mut out, 1); // stages
        write_int(&mut out, 1); // trees
        write_int(&mut out, 1); // splits
        write_int(&mut out, 0);
        write_int(&mut out, 1);
        write_float(&mut out, 0.0);
        write_int(&mut out, 2); // leaves
        write_shape(&mut out, &[(0.125, 0.0), (0.125, 0.0)]);
        write_shape(&mut out, &[(-0.125, 0.0), (-0.125, 0.0)]);

        write_int(&mut out, 1);
        write_int(&mut out, 2);
        write_int(&mut out, 0);
        write_int(&mut out, 1);

        write_int(&mut out, 1);
        write_int(&mut out, 2);
        for _ in 0..4 {
            write_float(&mut out, 0.0);
        }
        out
    }

    #[test]
    fn varints() {
        let mut data = Vec::new();
        for v in [0, 1, 127, 128, 255, 256, 70_000, -1, -128, -70_000] {
            write_int(&mut data, v);
        }
        let mut r = DlibReader::new(Cursor::new(data));
        for v in [0, 1, 127, 128, 255, 256, 70_000, -1, -128, -70_000] {
            assert_eq!(r.read_int().unwrap(), v);
        }
    }

    #[test]
    fn floats() {
        let mut data = Vec::new();
        for v in [0.0, 1.0, -1.0, 0.5, 0.25, -3.75] {
            write_float(&mut data, v);
        }
        let mut r = DlibReader::new(Cursor::new(data));
        for v in [0.0, 1.0, -1.0, 0.5, 0.25, -3.75] {
            assert_eq!(r.read_float().unwrap(), v);
        }
    }

    #[test]
    fn parses_synthetic_model() {
        let model = load_dlib_model_from_reader(Cursor::new(tiny_model())).unwrap();
        assert_eq!(model.num_landmarks(), 2);
        assert_eq!(model.num_cascade_stages(), 1);
        assert_eq!(model.mean_shape()[1], Point::new(0.75, 0.5));

        let image = GrayImage::from_fn(65, 65, |x, _| if x < 32 { 220 } else { 30 });
        let rect = BoundingBox::new(0.0, 0.0, 65.0, 65.0);
        let shape = model.predict(&image, &rect);
        assert!((shape[0].x - 0.375 * 64.0).abs() < 1e-4);
    }

    #[test]
    fn reads_bzip2_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tiny.dat.bz2");
        let mut encoder = BzEncoder::new(Vec::new(), Compression::best());
        encoder.write_all(&tiny_model()).unwrap();
        std::fs::write(&path, encoder.finish().unwrap()).unwrap();

        let model = load_dlib_model(&path).unwrap();
        assert_eq!(model.num_landmarks(), 2);
    }

    #[test]
    fn rejects_truncated_and_wrong_version() {
        let bytes = tiny_model();
        assert!(load_dlib_model_from_reader(Cursor::new(&bytes[..bytes.len() - 3])).is_err());

        let mut wrong = Vec::new();
        write_int(&mut wrong, 2);
        assert!(matches!(
            load_dlib_model_from_reader(Cursor::new(wrong)),
            Err(Error::InvalidModel(_))
        ));
    }

    #[test]
    fn oversized_integers_are_invalid() {
        let min_magnitude = [0x88, 0, 0, 0, 0, 0, 0, 0, 0x80];
        let mut r = DlibReader::new(Cursor::new(min_magnitude.to_vec()));
        assert!(matches!(r.read_int(), Err(Error::InvalidModel(_))));

        let max_magnitude = [0x08, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF];
        let mut r = DlibReader::new(Cursor::new(max_magnitude.to_vec()));
        assert!(matches!(r.read_int(), Err(Error::InvalidModel(_))));

        let mut shape = min_magnitude.to_vec();
        write_int(&mut shape, -1);
        let mut r = DlibReader::new(Cursor::new(shape));
        assert!(matches!(r.read_shape(), Err(Error::InvalidModel(_))));
    }

    fn models_dir() -> Option<PathBuf> {
        let path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("models");
        path.exists().then_some(path)
    }

    /// Needs `models/shape_predictor_68_face_landmarks.dat.bz2`.
    #[test]
    fn load_68_point_model() {
        let Some(dir) = models_dir() else {
            eprintln!("Skipping test: models directory not found");
            return;
        };
        let path = dir.join("shape_predictor_68_face_landmarks.dat.bz2");
        if !path.exists() {
            eprintln!("Skipping test: {} not found", path.display());
            return;
        }

        let model = load_dlib_model(&path).expect("68-point model loads");
        assert_eq!(model.num_landmarks(), 68);
        assert!(model.num_cascade_stages() > 0);
    }
}

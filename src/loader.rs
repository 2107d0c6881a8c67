//! File to [`Raster`] decoding and directory listing.

use std::io::Cursor;
use std::path::{Path, PathBuf};

use image::DynamicImage;
use walkdir::WalkDir;

use crate::error::{Error, Result};
use crate::raster::{Channels, Raster};

/// Extensions picked up by [`list_images`], compared case-insensitively.
pub const IMAGE_EXTENSIONS: [&str; 5] = ["jpg", "jpeg", "png", "bmp", "webp"];

/// Read and decode an image file.
pub fn load_raster(path: &Path) -> Result<Raster> {
    let bytes = std::fs::read(path).map_err(|e| Error::ImageLoad {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    load_raster_from_memory(&bytes).map_err(|e| match e {
        Error::ImageLoad { message, .. } => Error::ImageLoad {
            path: path.to_path_buf(),
            message,
        },
        other => other,
    })
}

/// Decode an in-memory image. 8-bit grayscale stays single channel; every
/// other pixel format becomes 8-bit RGB.
pub fn load_raster_from_memory(bytes: &[u8]) -> Result<Raster> {
    let load_error = |message: String| Error::ImageLoad {
        path: PathBuf::new(),
        message,
    };

    let decoded = image::load_from_memory(bytes).map_err(|e| load_error(e.to_string()))?;
    let (width, height) = (decoded.width(), decoded.height());
    let (channels, data) = match decoded {
        DynamicImage::ImageLuma8(gray) => (Channels::Gray, gray.into_raw()),
        other => (Channels::Rgb, other.to_rgb8().into_raw()),
    };
    let raster = Raster::new(width, height, channels, data).map_err(|e| load_error(e.to_string()))?;
    Ok(raster.with_exif_tags(exif_tag_count(bytes)))
}

/// Number of EXIF fields describing the primary image, or `None` when the
/// container carries no EXIF block.
pub fn exif_tag_count(bytes: &[u8]) -> Option<usize> {
    let exif = exif::Reader::new()
        .read_from_container(&mut Cursor::new(bytes))
        .ok()?;
    Some(
        exif.fields()
            .filter(|f| f.ifd_num == exif::In::PRIMARY)
            .count(),
    )
}

/// A face image named without an extension is looked up as JPEG.
pub fn resolve_face_path(input: &str) -> PathBuf {
    let path = PathBuf::from(input.trim());
    if path.extension().is_none() {
        path.with_extension("jpg")
    } else {
        path
    }
}

fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| IMAGE_EXTENSIONS.iter().any(|e| ext.eq_ignore_ascii_case(e)))
}

/// Regular files directly inside `dir` with an image extension, sorted by name.
/// Symlinks count when they resolve to a regular file.
pub fn list_images(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut images = Vec::new();
    for entry in WalkDir::new(dir)
        .follow_links(true)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
    {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) if e.depth() == 0 => return Err(Error::Io(e.into())),
            Err(e) => {
                tracing::warn!(error = %e, "skipping unreadable directory entry");
                continue;
            }
        };
        if entry.file_type().is_file() && has_image_extension(entry.path()) {
            images.push(entry.into_path());
        }
    }
    Ok(images)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::io::Write;

    use image::{GrayImage, ImageFormat, RgbImage};

    fn jpeg_bytes() -> Vec<u8> {
        let img = RgbImage::from_fn(16, 8, |x, y| image::Rgb([x as u8 * 10, y as u8 * 20, 90]));
        let mut out = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(img).write_to(&mut out, ImageFormat::Jpeg).unwrap();
        out.into_inner()
    }

    /// Splice a little-endian TIFF block with `count` ASCII tags into a JPEG as APP1.
    fn with_exif(jpeg: &[u8], count: usize) -> Vec<u8> {
        use exif::experimental::Writer;
        use exif::{Field, In, Tag, Value};

        let tags = [Tag::ImageDescription, Tag::Make, Tag::Model, Tag::Software, Tag::Artist, Tag::Copyright];
        let fields: Vec<Field> = tags[..count]
            .iter()
            .map(|&tag| Field {
                tag,
                ifd_num: In::PRIMARY,
                value: Value::Ascii(vec![b"synthscan".to_vec()]),
            })
            .collect();
        let mut writer = Writer::new();
        for field in &fields {
            writer.push_field(field);
        }
        let mut tiff = Cursor::new(Vec::new());
        writer.write(&mut tiff, true).unwrap();
        let tiff = tiff.into_inner();

        let mut out = jpeg[..2].to_vec();
        out.extend_from_slice(&[0xFF, 0xE1]);
        out.extend_from_slice(&((tiff.len() + 8) as u16).to_be_bytes());
        out.extend_from_slice(b"Exif\0\0");
        out.extend_from_slice(&tiff);
        out.extend_from_slice(&jpeg[2..]);
        out
    }

    #[test]
    fn decodes_color_and_gray() {
        let dir = tempfile::tempdir().unwrap();
        let color = dir.path().join("color.png");
        let gray = dir.path().join("gray.png");
        RgbImage::from_pixel(5, 4, image::Rgb([1, 2, 3])).save(&color).unwrap();
        GrayImage::from_pixel(3, 2, image::Luma([77])).save(&gray).unwrap();

        let c = load_raster(&color).unwrap();
        assert_eq!((c.width(), c.height(), c.channels()), (5, 4, Channels::Rgb));
        assert_eq!(c.rgb_at(4, 3), [1, 2, 3]);
        assert_eq!(c.exif_tag_count(), None);

        let g = load_raster(&gray).unwrap();
        assert_eq!(g.channels(), Channels::Gray);
        assert_eq!(g.data(), &[77; 6]);
    }

    #[test]
    fn corrupt_and_missing_files_are_load_errors() {
        let dir = tempfile::tempdir().unwrap();
        let bad = dir.path().join("bad.jpg");
        fs::File::create(&bad).unwrap().write_all(b"not an image").unwrap();

        match load_raster(&bad) {
            Err(Error::ImageLoad { path, .. }) => assert_eq!(path, bad),
            other => panic!("expected ImageLoad, got {other:?}"),
        }
        assert!(matches!(
            load_raster(&dir.path().join("missing.png")),
            Err(Error::ImageLoad { .. })
        ));
    }

    #[test]
    fn jpeg_exif_tags_are_counted() {
        let plain = jpeg_bytes();
        assert_eq!(exif_tag_count(&plain), None);

        let rich = load_raster_from_memory(&with_exif(&plain, 6)).unwrap();
        assert_eq!(rich.exif_tag_count(), Some(6));
        assert_eq!((rich.width(), rich.height()), (16, 8));

        assert_eq!(exif_tag_count(&with_exif(&plain, 2)), Some(2));
    }

    #[test]
    fn face_paths_default_to_jpeg() {
        assert_eq!(resolve_face_path("portrait"), PathBuf::from("portrait.jpg"));
        assert_eq!(resolve_face_path(" dir/face.png \n"), PathBuf::from("dir/face.png"));
    }

    #[test]
    fn lists_images_sorted_and_filtered() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b.PNG", "a.jpg", "notes.txt", "c.webp", "noext"] {
            fs::write(dir.path().join(name), b"").unwrap();
        }
        fs::create_dir(dir.path().join("nested.jpg")).unwrap();
        fs::write(dir.path().join("nested.jpg").join("inner.png"), b"").unwrap();

        let names: Vec<_> = list_images(dir.path())
            .unwrap()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.jpg", "b.PNG", "c.webp"]);
    }

    #[cfg(unix)]
    #[test]
    fn symlinked_images_are_listed() {
        let dir = tempfile::tempdir().unwrap();
        let outside = tempfile::tempdir().unwrap();
        let target = outside.path().join("real.png");
        fs::write(&target, b"").unwrap();
        std::os::unix::fs::symlink(&target, dir.path().join("link.png")).unwrap();
        std::os::unix::fs::symlink(outside.path().join("gone.png"), dir.path().join("dangling.png")).unwrap();
        fs::write(dir.path().join("plain.jpg"), b"").unwrap();

        let images = list_images(dir.path()).unwrap();
        assert_eq!(images, vec![dir.path().join("link.png"), dir.path().join("plain.jpg")]);
    }

    #[test]
    fn unreadable_directory_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(list_images(&dir.path().join("absent")).is_err());
    }
}

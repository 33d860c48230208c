//! Frame sources backed by image files.

use crate::frame::Frame;
use image::RgbImage;
use std::path::{Path, PathBuf};
use thiserror::Error;

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "bmp", "webp", "tif", "tiff", "pgm", "ppm"];

#[derive(Error, Debug)]
pub enum FrameError {
    #[error("failed to open {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("failed to read directory {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("no images found in {0}")]
    Empty(PathBuf),
}

/// Anything that can hand the frame loop decoded RGB frames.
///
/// `Ok(None)` means the source is exhausted. Sources release whatever they
/// hold when dropped.
pub trait FrameSource {
    fn next_frame(&mut self) -> Result<Option<Frame>, FrameError>;

    /// Human-readable identifier for logs.
    fn name(&self) -> &str;
}

impl<T: FrameSource + ?Sized> FrameSource for Box<T> {
    fn next_frame(&mut self) -> Result<Option<Frame>, FrameError> {
        (**self).next_frame()
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

fn open_rgb(path: &Path) -> Result<RgbImage, FrameError> {
    image::open(path)
        .map(|img| img.to_rgb8())
        .map_err(|source| FrameError::Open {
            path: path.to_path_buf(),
            source,
        })
}

/// One decoded image served repeatedly.
pub struct StillImageSource {
    name: String,
    image: RgbImage,
    remaining: Option<usize>,
    sequence: u32,
}

impl StillImageSource {
    /// Open an image file. `repeat` caps the number of frames; `None` serves forever.
    pub fn open(path: &Path, repeat: Option<usize>) -> Result<Self, FrameError> {
        let image = open_rgb(path)?;
        tracing::info!(
            path = %path.display(),
            width = image.width(),
            height = image.height(),
            "still image source opened"
        );
        Ok(Self::from_image(path.display().to_string(), image, repeat))
    }

    pub fn from_image(name: impl Into<String>, image: RgbImage, repeat: Option<usize>) -> Self {
        Self {
            name: name.into(),
            image,
            remaining: repeat,
            sequence: 0,
        }
    }
}

impl FrameSource for StillImageSource {
    fn next_frame(&mut self) -> Result<Option<Frame>, FrameError> {
        match self.remaining {
            Some(0) => return Ok(None),
            Some(ref mut n) => *n -= 1,
            None => {}
        }
        let frame = Frame::new(self.image.clone(), self.sequence);
        self.sequence = self.sequence.wrapping_add(1);
        Ok(Some(frame))
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for StillImageSource {
    fn drop(&mut self) {
        tracing::debug!(source = %self.name, frames = self.sequence, "frame source released");
    }
}

/// A list of image files decoded one at a time, in order.
pub struct ImageSequenceSource {
    name: String,
    paths: Vec<PathBuf>,
    next: usize,
    looping: bool,
    sequence: u32,
}

impl ImageSequenceSource {
    pub fn new(paths: Vec<PathBuf>) -> Self {
        let name = match paths.as_slice() {
            [single] => single.display().to_string(),
            _ => format!("{} images", paths.len()),
        };
        Self {
            name,
            paths,
            next: 0,
            looping: false,
            sequence: 0,
        }
    }

    /// Every image file directly inside `dir`, sorted by file name.
    pub fn from_dir(dir: &Path) -> Result<Self, FrameError> {
        let io_err = |source| FrameError::Io {
            path: dir.to_path_buf(),
            source,
        };
        let mut paths = Vec::new();
        for entry in std::fs::read_dir(dir).map_err(io_err)? {
            let path = entry.map_err(io_err)?.path();
            if path.is_file() && has_image_extension(&path) {
                paths.push(path);
            }
        }
        if paths.is_empty() {
            return Err(FrameError::Empty(dir.to_path_buf()));
        }
        paths.sort();
        tracing::info!(dir = %dir.display(), count = paths.len(), "image sequence source opened");

        let mut source = Self::new(paths);
        source.name = dir.display().to_string();
        Ok(source)
    }

    /// Start over from the first image once the last has been served.
    pub fn looping(mut self, looping: bool) -> Self {
        self.looping = looping;
        self
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

impl FrameSource for ImageSequenceSource {
    fn next_frame(&mut self) -> Result<Option<Frame>, FrameError> {
        if self.next >= self.paths.len() {
            if !self.looping || self.paths.is_empty() {
                return Ok(None);
            }
            self.next = 0;
        }

        let path = &self.paths[self.next];
        self.next += 1;
        let image = open_rgb(path)?;
        tracing::debug!(path = %path.display(), seq = self.sequence, "frame decoded");

        let frame = Frame::new(image, self.sequence);
        self.sequence = self.sequence.wrapping_add(1);
        Ok(Some(frame))
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for ImageSequenceSource {
    fn drop(&mut self) {
        tracing::debug!(source = %self.name, frames = self.sequence, "frame source released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn temp_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("facescan-source-{tag}-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_still_image_repeat_limit() {
        let mut source = StillImageSource::from_image("gray", RgbImage::from_pixel(8, 8, Rgb([90; 3])), Some(2));
        assert_eq!(source.next_frame().unwrap().unwrap().sequence, 0);
        assert_eq!(source.next_frame().unwrap().unwrap().sequence, 1);
        assert!(source.next_frame().unwrap().is_none());
    }

    #[test]
    fn test_still_image_forever() {
        let mut source = StillImageSource::from_image("gray", RgbImage::new(2, 2), None);
        for _ in 0..100 {
            assert!(source.next_frame().unwrap().is_some());
        }
    }

    #[test]
    fn test_still_image_missing_file() {
        let err = StillImageSource::open(Path::new("/nonexistent/face.png"), None).err().unwrap();
        assert!(matches!(err, FrameError::Open { .. }));
    }

    #[test]
    fn test_sequence_from_dir_sorted() {
        let dir = temp_dir("seq");
        RgbImage::from_pixel(4, 4, Rgb([200; 3])).save(dir.join("b.png")).unwrap();
        RgbImage::from_pixel(6, 6, Rgb([10; 3])).save(dir.join("a.png")).unwrap();
        std::fs::write(dir.join("notes.txt"), "not an image").unwrap();

        let mut source = ImageSequenceSource::from_dir(&dir).unwrap();
        assert_eq!(source.len(), 2);

        let first = source.next_frame().unwrap().unwrap();
        assert_eq!((first.width, first.sequence), (6, 0));
        assert!(first.is_dark);
        let second = source.next_frame().unwrap().unwrap();
        assert_eq!((second.width, second.sequence), (4, 1));
        assert!(source.next_frame().unwrap().is_none());

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_sequence_looping() {
        let dir = temp_dir("loop");
        let path = dir.join("only.png");
        RgbImage::new(3, 3).save(&path).unwrap();

        let mut source = ImageSequenceSource::new(vec![path]).looping(true);
        for seq in 0..3 {
            assert_eq!(source.next_frame().unwrap().unwrap().sequence, seq);
        }

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_empty_dir() {
        let dir = temp_dir("empty");
        assert!(matches!(ImageSequenceSource::from_dir(&dir), Err(FrameError::Empty(_))));
        std::fs::remove_dir_all(&dir).unwrap();
    }
}

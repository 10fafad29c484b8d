/*!
# Image <-> array conversion

Images are handled as [N, H, W, 3] float arrays. Loading divides the 8 bit
channel values by 255, while [`array_to_img`] min-max normalizes whatever it
receives. The two are therefore not exact inverses: an array loaded from an
image that never reaches pure white comes back brighter.
 */

use std::path::{Path, PathBuf};
use std::process::Command;

use image::{imageops, imageops::FilterType, DynamicImage, RgbImage};
use ndarray::{concatenate, Array4, ArrayBase, Axis, Data, Dimension};
use tch::Tensor;

use crate::error::{Error, Result};
use crate::ndarray::NDATensorExt;

pub const RGB_CHANNELS: usize = 3;

/// Bicubic (Catmull-Rom) resampling.
pub const RESIZE_FILTER: FilterType = FilterType::CatmullRom;

/**
Load an image into a [1, H, W, 3] array with values in [0, 1].

# Arguments
- path - The image file, any format the `image` crate decodes. The format is
  detected from the content, the extension does not matter
- size: Option<(u32, u32)> - The (height, width) to resize to
- view: bool - Open the image in the platform image viewer. The image is written
  to a PNG in the temporary directory that is left there for the viewer, one file
  per call. Failing to show the image is logged and does not fail the load

# Errors
`Error::ImageLoad` if the file is missing or cannot be decoded.
 */
pub fn img_to_array<P: AsRef<Path>>(
    path: P,
    size: Option<(u32, u32)>,
    view: bool,
) -> Result<Array4<f32>> {
    let img = open_rgb(path.as_ref(), size)?;
    if view {
        show(&img);
    }
    rgb_to_array(&img)
}

/**
Load several images into a single [N, H, W, 3] batch.

Every image must have the same size after the optional resize.
 */
pub fn imgs_to_array<P>(paths: &[P], size: Option<(u32, u32)>) -> Result<Array4<f32>>
where
    P: AsRef<Path> + Sync,
{
    if paths.is_empty() {
        return Err(Error::invalid("paths", "at least one image is required"));
    }

    #[cfg(feature = "rayon")]
    let images = {
        use rayon::prelude::*;
        paths
            .par_iter()
            .map(|p| open_rgb(p.as_ref(), size))
            .collect::<Result<Vec<_>>>()?
    };
    #[cfg(not(feature = "rayon"))]
    let images = paths
        .iter()
        .map(|p| open_rgb(p.as_ref(), size))
        .collect::<Result<Vec<_>>>()?;

    let expected = images[0].dimensions();
    if let Some((i, img)) = images
        .iter()
        .enumerate()
        .find(|(_, img)| img.dimensions() != expected)
    {
        let (width, height) = img.dimensions();
        return Err(Error::ShapeMismatch {
            expected: format!("{}x{} (width x height)", expected.0, expected.1),
            actual: format!("{}x{} for {}", width, height, paths[i].as_ref().display()),
        });
    }

    let arrays = images
        .iter()
        .map(rgb_to_array)
        .collect::<Result<Vec<_>>>()?;
    let views = arrays.iter().map(|a| a.view()).collect::<Vec<_>>();
    concatenate(Axis(0), &views).map_err(|_| Error::shape("[1, H, W, 3] arrays", &[arrays.len()]))
}

/**
Convert an array to an RGB image.

The array is shifted so that its minimum is not negative, scaled so that
its maximum becomes 255 (unless the maximum is 0) and truncated to u8.

# Arguments
- x - A [H, W, 3] array or a [1, H, W, 3] batch of one

# Errors
`Error::ShapeMismatch` for any other shape.
 */
pub fn array_to_img<S, D>(x: &ArrayBase<S, D>) -> Result<RgbImage>
where
    S: Data<Elem = f32>,
    D: Dimension,
{
    let (height, width) = match x.shape() {
        &[h, w, c] if c == RGB_CHANNELS => (h, w),
        &[1, h, w, c] if c == RGB_CHANNELS => (h, w),
        shape => return Err(Error::shape("[H, W, 3] or [1, H, W, 3]", shape)),
    };

    let min = x.iter().copied().fold(f32::INFINITY, f32::min);
    let shift = (-min).max(0.0);
    let max = x.iter().map(|v| v + shift).fold(f32::NEG_INFINITY, f32::max);

    let pixels = x
        .iter()
        .map(|&v| {
            let v = v + shift;
            let v = if max != 0.0 { v / max } else { v };
            (v * 255.0) as u8
        })
        .collect::<Vec<u8>>();

    RgbImage::from_raw(width as u32, height as u32, pixels)
        .ok_or_else(|| Error::shape("[H, W, 3] buffer", x.shape()))
}

/**
[`array_to_img`] followed by saving the image, the format is taken from the extension.
 */
pub fn save_array_as_img<S, D, P>(x: &ArrayBase<S, D>, path: P) -> Result<()>
where
    S: Data<Elem = f32>,
    D: Dimension,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    array_to_img(x)?
        .save(path)
        .map_err(|source| Error::ImageSave {
            path: path.to_path_buf(),
            source,
        })
}

pub trait ImageTensorExt: Sized {
    fn to_image(&self) -> Result<RgbImage>;

    fn from_image(image: &DynamicImage) -> Result<Self>;
}

impl ImageTensorExt for Tensor {
    /// Expects [H, W, 3] or [1, H, W, 3], see [`array_to_img`].
    fn to_image(&self) -> Result<RgbImage> {
        array_to_img(&self.to_ndarray()?)
    }

    /// [1, H, W, 3] float tensor with values in [0, 1].
    fn from_image(image: &DynamicImage) -> Result<Self> {
        let array = rgb_to_array(&image.to_rgb8())?;
        Ok(Tensor::from_ndarray(array.into_dyn()))
    }
}

fn open_rgb(path: &Path, size: Option<(u32, u32)>) -> Result<RgbImage> {
    if let Some((height, width)) = size {
        if height == 0 || width == 0 {
            return Err(Error::invalid(
                "size",
                format!("{}x{} (height x width) must not be empty", height, width),
            ));
        }
    }

    let load_error = |source| Error::ImageLoad {
        path: path.to_path_buf(),
        source,
    };
    let img = image::io::Reader::open(path)
        .and_then(|reader| reader.with_guessed_format())
        .map_err(|e| load_error(image::ImageError::IoError(e)))?
        .decode()
        .map_err(load_error)?;
    let rgb = img.to_rgb8();
    tracing::debug!(path = %path.display(), width = rgb.width(), height = rgb.height(), "loaded image");

    Ok(match size {
        Some((height, width)) => imageops::resize(&rgb, width, height, RESIZE_FILTER),
        None => rgb,
    })
}

fn rgb_to_array(img: &RgbImage) -> Result<Array4<f32>> {
    let (width, height) = img.dimensions();
    let shape = (1, height as usize, width as usize, RGB_CHANNELS);
    // RgbImage stores rows of interleaved RGB, i.e. [H, W, 3]
    let data = img
        .as_raw()
        .iter()
        .map(|&v| f32::from(v) / 255.0)
        .collect::<Vec<f32>>();
    Array4::from_shape_vec(shape, data)
        .map_err(|_| Error::shape("[1, H, W, 3]", &[height, width]))
}

fn show(img: &RgbImage) {
    match display(img, viewer_command) {
        Ok(path) => tracing::debug!(path = %path.display(), "opened image viewer"),
        Err(err) => tracing::warn!(error = %err, "could not display image"),
    }
}

fn display(img: &RgbImage, viewer: impl FnOnce(&Path) -> Command) -> Result<PathBuf> {
    let path = write_temporary(img)?;
    if let Err(err) = viewer(&path).spawn() {
        let _ = std::fs::remove_file(&path);
        return Err(err.into());
    }
    Ok(path)
}

fn write_temporary(img: &RgbImage) -> Result<PathBuf> {
    let file = tempfile::Builder::new()
        .prefix("stn-utils-")
        .suffix(".png")
        .tempfile()?;
    // the viewer reads the file after we return
    let (_, path) = file.keep().map_err(|e| Error::Io(e.error))?;
    img.save(&path).map_err(|source| Error::ImageSave {
        path: path.clone(),
        source,
    })?;
    Ok(path)
}

#[cfg(target_os = "macos")]
fn viewer_command(path: &Path) -> Command {
    let mut command = Command::new("open");
    command.arg(path);
    command
}

#[cfg(target_os = "windows")]
fn viewer_command(path: &Path) -> Command {
    let mut command = Command::new("cmd");
    command.args(["/C", "start", ""]).arg(path);
    command
}

#[cfg(not(any(target_os = "macos", target_os = "windows")))]
fn viewer_command(path: &Path) -> Command {
    let mut command = Command::new("xdg-open");
    command.arg(path);
    command
}

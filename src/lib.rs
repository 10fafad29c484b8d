/*!
 * # Stn-utils - Helpers for spatial transformer network tutorials
 *
 * Small, independent helpers used by tutorial code built on tch-rs.
 *
 * ## Features
 * - Image conversion : load an image file into a normalized array and turn an array back into an image
 * - Layer builders : convolution and fully-connected layers declared in a caller provided variable scope
 * - Tensor initialization : normal and truncated normal initializers
 * - One-hot encoding : class labels to one-hot vectors and back
 *
 * ## Conventions
 *
 * ### Shapes
 * - N : The number of samples
 * - H : The height of the image
 * - W : The width of the image
 * - C : The number of channels
 * - D : The number of features
 *
 * - [N, H, W, C] : A batch of N images, channels last. A single loaded image is [1, H, W, 3]
 * - [N, D] : A batch of N feature vectors, the input of fully-connected layers
 *
 * Sizes passed as pairs are always (height, width).
 *
 * ### Variables
 *
 * Layer builders never touch a global graph. They register their variables in the
 * `tch::nn::VarStore` behind the `tch::nn::Path` they receive, under `<scope>.<name>`.
 *
 * ```no_run
 * # use tch::{nn, Device, Kind, Tensor};
 * # use stn_utils::layers::{conv2d, linear, Conv2dConfig, LinearConfig};
 * # fn main() -> stn_utils::Result<()> {
 * let vs = nn::VarStore::new(Device::Cpu);
 * let root = vs.root();
 * let x = stn_utils::image::img_to_array("cat.jpg", Some((64, 64)), false)?;
 * let x = <Tensor as stn_utils::ndarray::NDATensorExt>::from_ndarray(x.into_dyn());
 * let h = conv2d(&root, &x, 16, &Conv2dConfig { activation: Some(Tensor::relu), ..Default::default() })?;
 * let h = h.flatten(1, -1);
 * let theta = linear(&root, &h, 6, &LinearConfig::default())?;
 * assert_eq!(theta.size(), vec![1, 6]);
 * # Ok(())
 * # }
 * ```
 */

pub mod error;
pub mod image;
pub mod layers;
pub mod ndarray;
pub mod one_hot;
pub mod tensor_init;
pub mod utils;

pub use error::{Error, Result};

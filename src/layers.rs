/*!
# Layer builders

Helpers declaring trainable variables in a caller provided [`nn::Path`] and
applying them to a tensor. The path plays the role of the variable scope:
a builder called with `vs.root()` and the default configuration registers
its filter as `Conv2D.w` in the var store.

Images follow the [N, H, W, C] layout used by the image helpers of this
crate, fully-connected inputs are [N, D].
 */

use std::fmt;

use tch::{nn, Kind, Tensor};

use crate::error::{Error, Result};
use crate::tensor_init::Init;

/// A nonlinearity mapping a tensor to a tensor of the same shape.
pub type Activation = fn(&Tensor) -> Tensor;

pub const CONV2D_SCOPE: &str = "Conv2D";
pub const LINEAR_SCOPE: &str = "Linear";

/// Standard deviation of [`weight_variable`] and [`bias_variable`].
pub const VARIABLE_STDDEV: f64 = 0.01;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Padding {
    /// Output size is `ceil(input / stride)`, the odd padding pixel goes to the bottom/right.
    Same,
    /// Only positions where the kernel fully overlaps the input.
    Valid,
}

impl Padding {
    /// Output size and (before, after) padding along one spatial axis.
    fn resolve(self, input: i64, kernel: i64, stride: i64) -> Option<(i64, (i64, i64))> {
        match self {
            Padding::Same => {
                let output = (input + stride - 1) / stride;
                let total = ((output - 1) * stride + kernel - input).max(0);
                Some((output, (total / 2, total - total / 2)))
            }
            Padding::Valid if kernel <= input => Some(((input - kernel) / stride + 1, (0, 0))),
            Padding::Valid => None,
        }
    }
}

#[derive(Clone)]
pub struct Conv2dConfig {
    pub k_h: i64,
    pub k_w: i64,
    pub stride_h: i64,
    pub stride_w: i64,
    pub stddev: f64,
    pub activation: Option<Activation>,
    pub bias: bool,
    pub padding: Padding,
    pub name: String,
}

impl Default for Conv2dConfig {
    fn default() -> Self {
        Self {
            k_h: 5,
            k_w: 5,
            stride_h: 2,
            stride_w: 2,
            stddev: 0.02,
            activation: None,
            bias: true,
            padding: Padding::Same,
            name: CONV2D_SCOPE.to_string(),
        }
    }
}

impl fmt::Debug for Conv2dConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Conv2dConfig")
            .field("k_h", &self.k_h)
            .field("k_w", &self.k_w)
            .field("stride_h", &self.stride_h)
            .field("stride_w", &self.stride_w)
            .field("stddev", &self.stddev)
            .field("activation", &self.activation.is_some())
            .field("bias", &self.bias)
            .field("padding", &self.padding)
            .field("name", &self.name)
            .finish()
    }
}

#[derive(Clone)]
pub struct LinearConfig {
    /// Scope of the weight matrix, [`LINEAR_SCOPE`] when `None`.
    pub scope: Option<String>,
    pub stddev: f64,
    pub activation: Option<Activation>,
}

impl Default for LinearConfig {
    fn default() -> Self {
        Self {
            scope: None,
            stddev: 0.02,
            activation: None,
        }
    }
}

impl fmt::Debug for LinearConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LinearConfig")
            .field("scope", &self.scope)
            .field("stddev", &self.stddev)
            .field("activation", &self.activation.is_some())
            .finish()
    }
}

/**
2D convolution with a learnable filter and an optional learnable bias.

# Arguments
- path: &nn::Path - The scope the variables are created under
- x: Tensor - The input tensor [N, H, W, C]
- n_filters: i64 - The number of filters
- config: &Conv2dConfig - Kernel size, strides, initialization, padding and scope name

# Returns
Tensor - The convolved tensor [N, H', W', n_filters]

With `Padding::Same`, H' = ceil(H / stride_h). With `Padding::Valid`,
H' = ceil((H - k_h + 1) / stride_h).

# Example
```rust,no_run
# use tch::{nn, Device, Kind, Tensor};
# use stn_utils::layers::{conv2d, Conv2dConfig};
let vs = nn::VarStore::new(Device::Cpu);
let x = Tensor::rand(&[8, 40, 40, 1], (Kind::Float, Device::Cpu));
let config = Conv2dConfig { activation: Some(Tensor::relu), ..Default::default() };
let h = conv2d(&vs.root(), &x, 16, &config).unwrap();
assert_eq!(h.size(), vec![8, 20, 20, 16]);
```
 */
pub fn conv2d(path: &nn::Path, x: &Tensor, n_filters: i64, config: &Conv2dConfig) -> Result<Tensor> {
    let (_, height, width, in_channels) = x
        .size4()
        .map_err(|_| Error::shape("[N, H, W, C]", &x.size()))?;
    if height <= 0 || width <= 0 || in_channels <= 0 {
        return Err(Error::shape("[N, H, W, C] with non-empty H, W and C", &x.size()));
    }
    check_positive("n_filters", n_filters)?;
    check_positive("k_h", config.k_h)?;
    check_positive("k_w", config.k_w)?;
    check_positive("stride_h", config.stride_h)?;
    check_positive("stride_w", config.stride_w)?;

    let (out_h, (top, bottom)) = config
        .padding
        .resolve(height, config.k_h, config.stride_h)
        .ok_or_else(|| kernel_too_large(config, x))?;
    let (out_w, (left, right)) = config
        .padding
        .resolve(width, config.k_w, config.stride_w)
        .ok_or_else(|| kernel_too_large(config, x))?;

    let scope = sub_scope(path, &config.name)?;
    let init = Init::TruncatedNormal {
        mean: 0.0,
        stddev: config.stddev,
    };
    let filter_shape = [config.k_h, config.k_w, in_channels, n_filters];
    let w = scope.f_var_copy("w", &init.tensor(&filter_shape, (Kind::Float, scope.device()))?)?;
    tracing::debug!(scope = %config.name, shape = ?filter_shape, "created conv2d filter");

    // [N, H, W, C] -> [N, C, H, W] and [H, W, C, F] -> [F, C, H, W]
    let input = x.f_permute(&[0, 3, 1, 2])?;
    let input = if top + bottom + left + right > 0 {
        input.f_constant_pad_nd(&[left, right, top, bottom])?
    } else {
        input
    };
    let kernel = w.f_permute(&[3, 2, 0, 1])?;
    let conv = input.f_conv2d(
        &kernel,
        None::<&Tensor>,
        &[config.stride_h, config.stride_w],
        &[0, 0],
        &[1, 1],
        1,
    )?;
    let mut conv = conv.f_permute(&[0, 2, 3, 1])?;
    debug_assert_eq!(&conv.size()[1..3], &[out_h, out_w]);

    if config.bias {
        let b = scope.f_var_copy("b", &init.tensor(&[n_filters], (Kind::Float, scope.device()))?)?;
        tracing::debug!(scope = %config.name, shape = ?[n_filters], "created conv2d bias");
        conv = conv.f_add(&b)?;
    }
    Ok(activate(config.activation, conv))
}

/**
Fully-connected layer without bias.

# Arguments
- path: &nn::Path - The scope the variables are created under
- x: Tensor - The input tensor [N, D]
- n_units: i64 - The number of output units
- config: &LinearConfig - Scope name, initialization and activation

# Returns
Tensor - activation(x @ Matrix) [N, n_units]
 */
pub fn linear(path: &nn::Path, x: &Tensor, n_units: i64, config: &LinearConfig) -> Result<Tensor> {
    let (_, in_features) = x.size2().map_err(|_| Error::shape("[N, D]", &x.size()))?;
    check_positive("n_units", n_units)?;

    let name = match config.scope.as_deref() {
        Some(scope) if !scope.is_empty() => scope,
        _ => LINEAR_SCOPE,
    };
    let scope = sub_scope(path, name)?;
    let init = Init::Normal {
        mean: 0.0,
        stddev: config.stddev,
    };
    let matrix = scope.f_var_copy(
        "Matrix",
        &init.tensor(&[in_features, n_units], (Kind::Float, scope.device()))?,
    )?;
    tracing::debug!(scope = %name, shape = ?[in_features, n_units], "created linear matrix");

    Ok(activate(config.activation, x.f_matmul(&matrix)?))
}

/**
Trainable variable `weight` drawn from N(0, 0.01²).
 */
pub fn weight_variable(path: &nn::Path, shape: &[i64]) -> Result<Tensor> {
    normal_variable(path, "weight", shape)
}

/**
Trainable variable `bias` drawn from N(0, 0.01²).
 */
pub fn bias_variable(path: &nn::Path, shape: &[i64]) -> Result<Tensor> {
    normal_variable(path, "bias", shape)
}

fn normal_variable(path: &nn::Path, name: &str, shape: &[i64]) -> Result<Tensor> {
    let init = Init::Normal {
        mean: 0.0,
        stddev: VARIABLE_STDDEV,
    };
    let initial = init.tensor(shape, (Kind::Float, path.device()))?;
    Ok(path.f_var_copy(name, &initial)?)
}

fn activate(activation: Option<Activation>, t: Tensor) -> Tensor {
    match activation {
        Some(f) => f(&t),
        None => t,
    }
}

// nn::Path panics on names containing '.'
fn sub_scope<'a>(path: &nn::Path<'a>, name: &str) -> Result<nn::Path<'a>> {
    if name.is_empty() || name.contains('.') {
        return Err(Error::invalid(
            "scope",
            format!("{:?} must be non-empty and must not contain '.'", name),
        ));
    }
    Ok(path.sub(name))
}

fn check_positive(name: &str, value: i64) -> Result<()> {
    if value > 0 {
        Ok(())
    } else {
        Err(Error::invalid(name, format!("must be positive, got {}", value)))
    }
}

fn kernel_too_large(config: &Conv2dConfig, x: &Tensor) -> Error {
    Error::shape(
        format!(
            "spatial size of at least {}x{} for VALID padding",
            config.k_h, config.k_w
        ),
        &x.size(),
    )
}

#[cfg(test)]
mod test {
    use super::*;
    use tch::{nn::VarStore, Device, IndexOp};

    use crate::utils::{assert_close_tensor, assert_eq_tensor};

    fn input(dims: &[i64]) -> Tensor {
        Tensor::rand(dims, (Kind::Float, Device::Cpu))
    }

    #[test]
    fn test_conv2d_default_halves_spatial_size() {
        let vs = VarStore::new(Device::Cpu);
        let out = conv2d(&vs.root(), &input(&[2, 28, 28, 1]), 8, &Conv2dConfig::default()).unwrap();
        assert_eq!(out.size(), vec![2, 14, 14, 8]);

        let vs = VarStore::new(Device::Cpu);
        let out = conv2d(&vs.root(), &input(&[3, 7, 5, 2]), 4, &Conv2dConfig::default()).unwrap();
        assert_eq!(out.size(), vec![3, 4, 3, 4]);
    }

    #[test]
    fn test_conv2d_registers_variables() {
        let vs = VarStore::new(Device::Cpu);
        conv2d(&vs.root(), &input(&[1, 10, 10, 3]), 6, &Conv2dConfig::default()).unwrap();
        let variables = vs.variables();
        assert_eq!(variables["Conv2D.w"].size(), vec![5, 5, 3, 6]);
        assert_eq!(variables["Conv2D.b"].size(), vec![6]);
        assert!(variables["Conv2D.w"].requires_grad());
        // truncated at two standard deviations
        let max = f64::from(variables["Conv2D.w"].abs().max());
        assert!(max <= 0.04 + 1e-6);

        let vs = VarStore::new(Device::Cpu);
        let config = Conv2dConfig {
            bias: false,
            name: "conv1".to_string(),
            ..Default::default()
        };
        conv2d(&vs.root().sub("stn"), &input(&[1, 10, 10, 3]), 6, &config).unwrap();
        let variables = vs.variables();
        assert_eq!(variables.len(), 1);
        assert!(variables.contains_key("stn.conv1.w"));
    }

    #[test]
    fn test_conv2d_valid_padding() {
        let vs = VarStore::new(Device::Cpu);
        let config = Conv2dConfig {
            padding: Padding::Valid,
            ..Default::default()
        };
        let out = conv2d(&vs.root(), &input(&[1, 9, 12, 1]), 2, &config).unwrap();
        assert_eq!(out.size(), vec![1, 3, 4, 2]);

        let err = conv2d(&vs.root(), &input(&[1, 4, 12, 1]), 2, &config).unwrap_err();
        assert!(matches!(err, Error::ShapeMismatch { .. }));
    }

    #[test]
    fn test_conv2d_pointwise_matches_matmul() {
        let vs = VarStore::new(Device::Cpu);
        let config = Conv2dConfig {
            k_h: 1,
            k_w: 1,
            stride_h: 1,
            stride_w: 1,
            bias: false,
            ..Default::default()
        };
        let x = input(&[2, 3, 4, 5]);
        let out = conv2d(&vs.root(), &x, 7, &config).unwrap();
        let w = vs.variables()["Conv2D.w"].view([5, 7]);
        assert_close_tensor(&out, &x.matmul(&w), 1e-5);
    }

    #[test]
    fn test_conv2d_same_padding_is_centered() {
        let vs = VarStore::new(Device::Cpu);
        let config = Conv2dConfig {
            k_h: 3,
            k_w: 3,
            stride_h: 1,
            stride_w: 1,
            bias: false,
            ..Default::default()
        };
        let x = Tensor::ones(&[1, 3, 3, 1], (Kind::Float, Device::Cpu));
        let out = conv2d(&vs.root(), &x, 1, &config).unwrap();
        assert_eq!(out.size(), vec![1, 3, 3, 1]);
        let w = vs.variables()["Conv2D.w"].view([3, 3]);

        let center = f64::from(out.i((0, 1, 1, 0)));
        assert!((center - f64::from(w.sum(Kind::Float))).abs() < 1e-6);
        // the top-left output only sees the bottom-right 2x2 of the kernel
        let corner = f64::from(out.i((0, 0, 0, 0)));
        assert!((corner - f64::from(w.i((1.., 1..)).sum(Kind::Float))).abs() < 1e-6);
    }

    #[test]
    fn test_conv2d_bias_and_activation() {
        let vs = VarStore::new(Device::Cpu);
        let config = Conv2dConfig {
            activation: Some(Tensor::relu),
            ..Default::default()
        };
        let x = Tensor::zeros(&[1, 6, 6, 2], (Kind::Float, Device::Cpu));
        let out = conv2d(&vs.root(), &x, 3, &config).unwrap();
        // zero input leaves only relu(bias) at every position
        let b = vs.variables()["Conv2D.b"].relu().view([1, 1, 1, 3]);
        assert_eq_tensor(&out, &b.expand(&[1, 3, 3, 3], false));
    }

    #[test]
    fn test_conv2d_rejects_bad_input() {
        let vs = VarStore::new(Device::Cpu);
        let root = vs.root();
        let config = Conv2dConfig::default();
        assert!(matches!(
            conv2d(&root, &input(&[28, 28, 1]), 4, &config),
            Err(Error::ShapeMismatch { .. })
        ));
        assert!(matches!(
            conv2d(&root, &input(&[1, 28, 28, 1]), 0, &config),
            Err(Error::InvalidParameter { .. })
        ));
        let dotted = Conv2dConfig {
            name: "a.b".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            conv2d(&root, &input(&[1, 28, 28, 1]), 4, &dotted),
            Err(Error::InvalidParameter { .. })
        ));
        assert!(vs.variables().is_empty());
    }

    #[test]
    fn test_linear() {
        let vs = VarStore::new(Device::Cpu);
        let x = input(&[5, 10]);
        let out = linear(&vs.root(), &x, 4, &LinearConfig::default()).unwrap();
        assert_eq!(out.size(), vec![5, 4]);
        let matrix = &vs.variables()["Linear.Matrix"];
        assert_eq!(matrix.size(), vec![10, 4]);
        assert_close_tensor(&out, &x.matmul(matrix), 1e-6);
    }

    #[test]
    fn test_linear_scope_and_activation() {
        let vs = VarStore::new(Device::Cpu);
        let config = LinearConfig {
            scope: Some("fc1".to_string()),
            activation: Some(Tensor::tanh),
            ..Default::default()
        };
        let x = input(&[2, 3]);
        let out = linear(&vs.root(), &x, 6, &config).unwrap();
        let matrix = &vs.variables()["fc1.Matrix"];
        assert_close_tensor(&out, &x.matmul(matrix).tanh(), 1e-6);

        assert!(matches!(
            linear(&vs.root(), &input(&[2, 3, 4]), 6, &config),
            Err(Error::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_linear_empty_scope_uses_default() {
        let vs = VarStore::new(Device::Cpu);
        let config = LinearConfig {
            scope: Some(String::new()),
            ..Default::default()
        };
        let out = linear(&vs.root(), &input(&[2, 3]), 5, &config).unwrap();
        assert_eq!(out.size(), vec![2, 5]);
        assert_eq!(vs.variables()["Linear.Matrix"].size(), vec![3, 5]);
    }

    #[test]
    fn test_weight_and_bias_variables() {
        let vs = VarStore::new(Device::Cpu);
        let root = vs.root();
        let w = weight_variable(&root, &[100, 100]).unwrap();
        let b = bias_variable(&root, &[100]).unwrap();
        assert_eq!(w.size(), vec![100, 100]);
        assert_eq!(b.size(), vec![100]);
        assert!(w.requires_grad() && b.requires_grad());
        let std = f64::from(w.std(true));
        assert!(std > 0.009 && std < 0.011, "std {}", std);
        let variables = vs.variables();
        assert!(variables.contains_key("weight") && variables.contains_key("bias"));
    }

    #[test]
    fn test_padding_resolve() {
        assert_eq!(Padding::Same.resolve(28, 5, 2), Some((14, (1, 2))));
        assert_eq!(Padding::Same.resolve(7, 5, 2), Some((4, (2, 2))));
        assert_eq!(Padding::Same.resolve(3, 1, 4), Some((1, (0, 0))));
        assert_eq!(Padding::Valid.resolve(9, 5, 2), Some((3, (0, 0))));
        assert_eq!(Padding::Valid.resolve(4, 5, 1), None);
    }
}

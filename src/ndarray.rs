/*!
Conversions between `tch` tensors and `ndarray` arrays.
 */

use ndarray::{ArrayD, IxDyn};
use tch::{Device, Kind};

use crate::error::{Error, Result};

pub trait NDATensorExt {
    fn to_ndarray(&self) -> Result<ArrayD<f32>>;

    fn from_ndarray(array: ArrayD<f32>) -> Self;
}

impl NDATensorExt for tch::Tensor {
    /**
    Copy the tensor to the host as a float array of the same rank and shape.
     */
    fn to_ndarray(&self) -> Result<ArrayD<f32>> {
        let dims = self
            .size()
            .iter()
            .map(|&d| d as usize)
            .collect::<Vec<_>>();
        let casted = self
            .to_device(Device::Cpu)
            .to_kind(Kind::Float)
            .contiguous();
        let data = Vec::<f32>::from(&casted);
        ArrayD::from_shape_vec(IxDyn(&dims), data)
            .map_err(|_| Error::shape(format!("{} elements", dims.iter().product::<usize>()), &dims))
    }

    fn from_ndarray(array: ArrayD<f32>) -> Self {
        let shape = array.shape().iter().map(|&x| x as i64).collect::<Vec<i64>>();
        // iter() walks in logical order, so non-standard layouts come out right
        let data = array.iter().copied().collect::<Vec<f32>>();
        tch::Tensor::of_slice(&data).reshape(&shape)
    }
}

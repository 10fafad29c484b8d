/*!
One-hot encoding of class labels.
 */

use ndarray::{Array2, ArrayBase, Axis, Data, Ix2};

use crate::error::{Error, Result};

pub const DEFAULT_N_CLASSES: usize = 2;

/**
Convert class labels from scalars to one-hot vectors.

# Arguments
- labels: &[i64] - The class index of each sample
- n_classes: usize - The number of classes, usually [`DEFAULT_N_CLASSES`]

# Returns
Array2<f32> - [N, n_classes] with a single 1.0 per row at the label index

# Errors
`Error::LabelOutOfRange` for a label outside [0, n_classes).

# Example
```rust
# use stn_utils::one_hot::dense_to_one_hot;
let one_hot = dense_to_one_hot(&[0, 1, 0], 2).unwrap();
assert_eq!(one_hot, ndarray::arr2(&[[1.0, 0.0], [0.0, 1.0], [1.0, 0.0]]));
```
 */
pub fn dense_to_one_hot(labels: &[i64], n_classes: usize) -> Result<Array2<f32>> {
    let mut one_hot = Array2::<f32>::zeros((labels.len(), n_classes));
    for (index, &label) in labels.iter().enumerate() {
        if label < 0 || label as u64 >= n_classes as u64 {
            return Err(Error::LabelOutOfRange {
                index,
                label,
                n_classes,
            });
        }
        one_hot[[index, label as usize]] = 1.0;
    }
    Ok(one_hot)
}

/**
Index of the largest value of each row, the first one on ties.

Turns one-hot labels, or the class scores of a classifier, back into class indices.
 */
pub fn one_hot_to_dense<S>(one_hot: &ArrayBase<S, Ix2>) -> Vec<usize>
where
    S: Data<Elem = f32>,
{
    one_hot
        .axis_iter(Axis(0))
        .map(|row| {
            row.iter()
                .enumerate()
                .fold((0, f32::NEG_INFINITY), |(best, max), (i, &v)| {
                    if v > max {
                        (i, v)
                    } else {
                        (best, max)
                    }
                })
                .0
        })
        .collect()
}

use rand::Rng;
use rand_distr::StandardNormal;
use std::cell::RefCell;
use std::rc::Rc;

/// Type alias for a reference-counted, interior-mutable tensor.
///
/// Layers and optimizers hold clones of the same parameter handle, so a
/// weight updated by the optimizer is immediately visible to the layer and
/// a trainable flag flipped on the layer is visible to the optimizer.
///
/// **Note**: This is single-threaded only.
pub type Tensor = Rc<RefCell<RawTensor>>;

// ===== RAW TENSOR STRUCTURE =====

/// The core tensor structure
///
/// Fields:
/// - `data`: flat Vec<f32> of actual values (row-major order)
/// - `shape`: dimensions; images are channels-last, e.g. [batch, height, width, channels]
/// - `grad`: gradient attached by a caller, consumed by optimizers
/// - `requires_grad`: whether optimizers may update this tensor (false once frozen)
#[derive(Clone)]
pub struct RawTensor {
    pub data: Vec<f32>,
    pub shape: Vec<usize>,
    pub grad: Option<Vec<f32>>,
    pub requires_grad: bool,
}

impl std::fmt::Debug for RawTensor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tensor")
            .field("shape", &self.shape)
            .field("requires_grad", &self.requires_grad)
            .field("has_grad", &self.grad.is_some())
            .finish()
    }
}

// ===== TENSOR CONSTRUCTORS =====
impl RawTensor {
    /// Create a new tensor from data and shape
    ///
    /// # Panics
    /// Panics if data.len() != shape.product()
    pub fn new(data: Vec<f32>, shape: &[usize], requires_grad: bool) -> Tensor {
        assert_eq!(
            data.len(),
            shape.iter().product::<usize>(),
            "Data length must match shape"
        );
        Rc::new(RefCell::new(RawTensor {
            data,
            shape: shape.to_vec(),
            grad: None,
            requires_grad,
        }))
    }

    pub fn zeros(shape: &[usize]) -> Tensor {
        Self::constant(0.0, shape)
    }

    pub fn ones(shape: &[usize]) -> Tensor {
        Self::constant(1.0, shape)
    }

    pub fn constant(value: f32, shape: &[usize]) -> Tensor {
        let size = shape.iter().product();
        Self::new(vec![value; size], shape, false)
    }

    pub fn from_vec(data: Vec<f32>, shape: &[usize]) -> Tensor {
        Self::new(data, shape, false)
    }

    /// Values from the standard normal distribution N(0, 1)
    pub fn randn(shape: &[usize]) -> Tensor {
        Self::normal(shape, 1.0)
    }

    /// Values from N(0, std^2)
    pub fn normal(shape: &[usize], std: f32) -> Tensor {
        let size = shape.iter().product();
        let mut rng = rand::rng();
        let data: Vec<f32> = (0..size)
            .map(|_| rng.sample::<f32, _>(StandardNormal) * std)
            .collect();
        Self::new(data, shape, false)
    }

    /// Values uniformly distributed in [-limit, limit)
    pub fn uniform(shape: &[usize], limit: f32) -> Tensor {
        let size = shape.iter().product();
        let mut rng = rand::rng();
        let data: Vec<f32> = (0..size)
            .map(|_| rng.random_range(-limit..limit))
            .collect();
        Self::new(data, shape, false)
    }

    /// Number of elements
    pub fn numel(&self) -> usize {
        self.data.len()
    }

    /// Row-major strides for a shape
    pub fn compute_strides(shape: &[usize]) -> Vec<usize> {
        let mut strides = vec![1; shape.len()];
        for d in (0..shape.len().saturating_sub(1)).rev() {
            strides[d] = strides[d + 1] * shape[d + 1];
        }
        strides
    }
}

// ===== BROADCASTING BINARY OPS =====

/// Numpy-style broadcast of two shapes, aligned on the trailing axis.
pub fn broadcast_shape(a: &[usize], b: &[usize]) -> Option<Vec<usize>> {
    let rank = a.len().max(b.len());
    let mut out = vec![0; rank];
    for i in 0..rank {
        let da = if i < rank - a.len() { 1 } else { a[i - (rank - a.len())] };
        let db = if i < rank - b.len() { 1 } else { b[i - (rank - b.len())] };
        out[i] = match (da, db) {
            (x, y) if x == y => x,
            (1, y) => y,
            (x, 1) => x,
            _ => return None,
        };
    }
    Some(out)
}

/// Strides of `shape` seen through `out_shape`; broadcast axes get stride 0.
fn broadcast_strides(shape: &[usize], out_shape: &[usize]) -> Vec<usize> {
    let own = RawTensor::compute_strides(shape);
    let offset = out_shape.len() - shape.len();
    (0..out_shape.len())
        .map(|i| {
            if i < offset || shape[i - offset] == 1 {
                0
            } else {
                own[i - offset]
            }
        })
        .collect()
}

impl RawTensor {
    fn broadcast_binary<F>(a: &Tensor, b: &Tensor, f: F) -> Tensor
    where
        F: Fn(f32, f32) -> f32,
    {
        let a = a.borrow();
        let b = b.borrow();

        if a.shape == b.shape {
            let data = a.data.iter().zip(&b.data).map(|(&x, &y)| f(x, y)).collect();
            return Self::new(data, &a.shape, false);
        }

        let out_shape = broadcast_shape(&a.shape, &b.shape).unwrap_or_else(|| {
            panic!("Cannot broadcast shapes {:?} and {:?}", a.shape, b.shape)
        });
        let a_strides = broadcast_strides(&a.shape, &out_shape);
        let b_strides = broadcast_strides(&b.shape, &out_shape);
        let size: usize = out_shape.iter().product();

        let mut data = Vec::with_capacity(size);
        for i in 0..size {
            let mut rem = i;
            let (mut ai, mut bi) = (0, 0);
            for d in (0..out_shape.len()).rev() {
                let coord = rem % out_shape[d];
                rem /= out_shape[d];
                ai += coord * a_strides[d];
                bi += coord * b_strides[d];
            }
            data.push(f(a.data[ai], b.data[bi]));
        }
        Self::new(data, &out_shape, false)
    }

    pub fn add(a: &Tensor, b: &Tensor) -> Tensor {
        Self::broadcast_binary(a, b, |x, y| x + y)
    }

    pub fn sub(a: &Tensor, b: &Tensor) -> Tensor {
        Self::broadcast_binary(a, b, |x, y| x - y)
    }

    pub fn elem_mul(a: &Tensor, b: &Tensor) -> Tensor {
        Self::broadcast_binary(a, b, |x, y| x * y)
    }

    pub fn div(a: &Tensor, b: &Tensor) -> Tensor {
        Self::broadcast_binary(a, b, |x, y| x / y)
    }
}

// ===== UNARY OPS =====

impl RawTensor {
    pub fn map<F>(self_t: &Tensor, f: F) -> Tensor
    where
        F: Fn(f32) -> f32,
    {
        let s = self_t.borrow();
        let data = s.data.iter().map(|&x| f(x)).collect();
        Self::new(data, &s.shape, false)
    }

    pub fn relu(self_t: &Tensor) -> Tensor {
        Self::map(self_t, |x| x.max(0.0))
    }

    pub fn sigmoid(self_t: &Tensor) -> Tensor {
        Self::map(self_t, sigmoid)
    }

    /// x * sigmoid(x), a.k.a. SiLU
    pub fn swish(self_t: &Tensor) -> Tensor {
        Self::map(self_t, |x| x * sigmoid(x))
    }

    pub fn exp(self_t: &Tensor) -> Tensor {
        Self::map(self_t, f32::exp)
    }

    /// Softmax over the last axis, shifted by the row max for stability.
    pub fn softmax(self_t: &Tensor) -> Tensor {
        let s = self_t.borrow();
        let cols = s.shape.last().copied().unwrap_or(1).max(1);
        let mut data = s.data.clone();
        for row in data.chunks_mut(cols) {
            let max = row.iter().copied().fold(f32::NEG_INFINITY, f32::max);
            let mut sum = 0.0;
            for v in row.iter_mut() {
                *v = (*v - max).exp();
                sum += *v;
            }
            for v in row.iter_mut() {
                *v /= sum;
            }
        }
        Self::new(data, &s.shape, false)
    }
}

pub(crate) fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

// ===== MOVEMENT & MATMUL =====

impl RawTensor {
    pub fn reshape(self_t: &Tensor, new_shape: &[usize]) -> Tensor {
        let s = self_t.borrow();
        assert_eq!(
            s.data.len(),
            new_shape.iter().product::<usize>(),
            "Cannot reshape {:?} into {:?}",
            s.shape,
            new_shape
        );
        Self::new(s.data.clone(), new_shape, false)
    }

    /// (m, k) @ (k, n) -> (m, n)
    pub fn matmul(a: &Tensor, b: &Tensor) -> Tensor {
        let a = a.borrow();
        let b = b.borrow();
        assert!(
            a.shape.len() == 2 && b.shape.len() == 2,
            "matmul expects 2D tensors, got {:?} and {:?}",
            a.shape,
            b.shape
        );
        let (m, k) = (a.shape[0], a.shape[1]);
        let (k2, n) = (b.shape[0], b.shape[1]);
        assert_eq!(k, k2, "matmul inner dimensions differ: {} vs {}", k, k2);

        let mut out = vec![0.0; m * n];
        for i in 0..m {
            let row = &a.data[i * k..(i + 1) * k];
            let out_row = &mut out[i * n..(i + 1) * n];
            for (p, &av) in row.iter().enumerate() {
                if av == 0.0 {
                    continue;
                }
                let b_row = &b.data[p * n..(p + 1) * n];
                for (o, &bv) in out_row.iter_mut().zip(b_row) {
                    *o += av * bv;
                }
            }
        }
        Self::new(out, &[m, n], false)
    }
}

// ===== TENSOR OPS TRAIT =====

pub trait TensorOps {
    fn add(&self, other: &Tensor) -> Tensor;
    fn sub(&self, other: &Tensor) -> Tensor;
    fn elem_mul(&self, other: &Tensor) -> Tensor;
    fn div(&self, other: &Tensor) -> Tensor;

    fn relu(&self) -> Tensor;
    fn sigmoid(&self) -> Tensor;
    fn swish(&self) -> Tensor;
    fn exp(&self) -> Tensor;
    fn softmax(&self) -> Tensor;

    fn reshape(&self, new_shape: &[usize]) -> Tensor;
    fn matmul(&self, other: &Tensor) -> Tensor;

    fn shape(&self) -> Vec<usize>;
    fn to_vec(&self) -> Vec<f32>;
}

impl TensorOps for Tensor {
    fn add(&self, other: &Tensor) -> Tensor {
        RawTensor::add(self, other)
    }
    fn sub(&self, other: &Tensor) -> Tensor {
        RawTensor::sub(self, other)
    }
    fn elem_mul(&self, other: &Tensor) -> Tensor {
        RawTensor::elem_mul(self, other)
    }
    fn div(&self, other: &Tensor) -> Tensor {
        RawTensor::div(self, other)
    }

    fn relu(&self) -> Tensor {
        RawTensor::relu(self)
    }
    fn sigmoid(&self) -> Tensor {
        RawTensor::sigmoid(self)
    }
    fn swish(&self) -> Tensor {
        RawTensor::swish(self)
    }
    fn exp(&self) -> Tensor {
        RawTensor::exp(self)
    }
    fn softmax(&self) -> Tensor {
        RawTensor::softmax(self)
    }

    fn reshape(&self, new_shape: &[usize]) -> Tensor {
        RawTensor::reshape(self, new_shape)
    }
    fn matmul(&self, other: &Tensor) -> Tensor {
        RawTensor::matmul(self, other)
    }

    fn shape(&self) -> Vec<usize> {
        self.borrow().shape.clone()
    }
    fn to_vec(&self) -> Vec<f32> {
        self.borrow().data.clone()
    }
}

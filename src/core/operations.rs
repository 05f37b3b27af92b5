use ndarray::prelude::*;

use super::error::{AutodiffError, Result};
use super::{Datum, Graph, VariableId};

/// A differentiable elementary function.
///
/// Both rules default to failing with `NotImplemented`; concrete operators
/// override them.
pub trait Operation {
    fn name(&self) -> &'static str {
        "Operation"
    }

    fn forward(&self, _x: &ArrayD<f64>) -> Result<Datum> {
        Err(AutodiffError::NotImplemented {
            operation: self.name(),
            rule: "forward",
        })
    }

    /// Local derivative at the remembered input `x`, times the upstream
    /// gradient `gy`.
    fn backward(&self, _x: &ArrayD<f64>, _gy: &ArrayD<f64>) -> Result<ArrayD<f64>> {
        Err(AutodiffError::NotImplemented {
            operation: self.name(),
            rule: "backward",
        })
    }
}

// A zero-dimensional input evaluates to a bare scalar.
fn elementwise(x: &ArrayD<f64>, f: impl Fn(f64) -> f64) -> Datum {
    if x.ndim() == 0 {
        if let Some(&value) = x.first() {
            return Datum::Scalar(f(value));
        }
    }
    Datum::Array(x.mapv(f))
}

/// Normalizes a forward result into an acceptable value payload.
pub fn as_array(datum: Datum) -> Result<ArrayD<f64>> {
    match datum {
        Datum::Array(array) => Ok(array),
        Datum::Scalar(value) => Ok(arr0(value).into_dyn()),
        other => Err(AutodiffError::TypeMismatch {
            expected: "array",
            found: other.kind(),
        }),
    }
}

pub struct Square {}

impl Operation for Square {
    fn name(&self) -> &'static str {
        "Square"
    }

    fn forward(&self, x: &ArrayD<f64>) -> Result<Datum> {
        Ok(elementwise(x, |v| v * v))
    }

    fn backward(&self, x: &ArrayD<f64>, gy: &ArrayD<f64>) -> Result<ArrayD<f64>> {
        // d/dx(x²) = 2x
        Ok(2.0 * x * gy)
    }
}

pub struct Exponentiation {}

impl Operation for Exponentiation {
    fn name(&self) -> &'static str {
        "Exp"
    }

    fn forward(&self, x: &ArrayD<f64>) -> Result<Datum> {
        Ok(elementwise(x, f64::exp))
    }

    fn backward(&self, x: &ArrayD<f64>, gy: &ArrayD<f64>) -> Result<ArrayD<f64>> {
        Ok(x.mapv(f64::exp) * gy)
    }
}

/// The operators a graph can record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Operator {
    Square,
    Exp,
}

impl Operation for Operator {
    fn name(&self) -> &'static str {
        match self {
            Operator::Square => Square {}.name(),
            Operator::Exp => Exponentiation {}.name(),
        }
    }

    fn forward(&self, x: &ArrayD<f64>) -> Result<Datum> {
        match self {
            Operator::Square => Square {}.forward(x),
            Operator::Exp => Exponentiation {}.forward(x),
        }
    }

    fn backward(&self, x: &ArrayD<f64>, gy: &ArrayD<f64>) -> Result<ArrayD<f64>> {
        match self {
            Operator::Square => Square {}.backward(x, gy),
            Operator::Exp => Exponentiation {}.backward(x, gy),
        }
    }
}

pub fn square(graph: &mut Graph, x: VariableId) -> Result<VariableId> {
    graph.apply(Operator::Square, x)
}

pub fn exp(graph: &mut Graph, x: VariableId) -> Result<VariableId> {
    graph.apply(Operator::Exp, x)
}

use ndarray::prelude::*;

use super::error::{AutodiffError, Result};
use super::{Graph, VariableId};

pub const DEFAULT_EPSILON: f64 = 1e-4;

fn evaluate<F>(f: &F, data: ArrayD<f64>) -> Result<ArrayD<f64>>
where
    F: Fn(&mut Graph, VariableId) -> Result<VariableId>,
{
    let mut graph = Graph::new();
    let x = graph.variable(data)?;
    let y = f(&mut graph, x)?;
    graph.data(y).cloned().ok_or(AutodiffError::TypeMismatch {
        expected: "array",
        found: "nothing",
    })
}

/// Central-difference estimate of the derivative of `f` at the data of `x`,
/// with each probe evaluated in a fresh graph.
pub fn numerical_derivative<F>(
    f: F,
    graph: &Graph,
    x: VariableId,
    epsilon: f64,
) -> Result<ArrayD<f64>>
where
    F: Fn(&mut Graph, VariableId) -> Result<VariableId>,
{
    let data = graph.data(x).ok_or(AutodiffError::TypeMismatch {
        expected: "array",
        found: "nothing",
    })?;
    let below = evaluate(&f, data - epsilon)?;
    let above = evaluate(&f, data + epsilon)?;
    Ok((above - below) / (2. * epsilon))
}

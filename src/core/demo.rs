use log::info;
use ndarray::prelude::*;
use rand::Rng;

use super::error::Result;
use super::numerical::{numerical_derivative, DEFAULT_EPSILON};
use super::operations::{exp, square};
use super::{Graph, VariableBuilder, VariableId};

pub struct DemoConfiguration {
    pub input: f64,
    pub epsilon: f64,
}

impl Default for DemoConfiguration {
    fn default() -> Self {
        Self {
            input: 0.5,
            epsilon: DEFAULT_EPSILON,
        }
    }
}

impl DemoConfiguration {
    /// Applies `--input <x>`, `--epsilon <ε>` and `--random` (x drawn from
    /// [0, 1)) overrides; later flags win. Returns `None` on an unknown flag or
    /// a missing or unparseable value.
    pub fn from_arguments(arguments: &[String]) -> Option<Self> {
        let mut configuration = Self::default();
        let mut arguments = arguments.iter();
        while let Some(flag) = arguments.next() {
            match flag.as_str() {
                "--random" => configuration.input = rand::thread_rng().gen::<f64>(),
                "--input" => configuration.input = arguments.next()?.parse::<f64>().ok()?,
                "--epsilon" => configuration.epsilon = arguments.next()?.parse::<f64>().ok()?,
                _ => return None,
            }
        }
        Some(configuration)
    }
}

/// y = (e^(x²))²
pub fn composite(graph: &mut Graph, x: VariableId) -> Result<VariableId> {
    let a = square(graph, x)?;
    let b = exp(graph, a)?;
    square(graph, b)
}

#[derive(Debug)]
pub struct GradientReport {
    pub output: ArrayD<f64>,
    pub analytic: ArrayD<f64>,
    pub numerical: ArrayD<f64>,
}

pub fn demo(configuration: &DemoConfiguration) -> Result<GradientReport> {
    let mut graph = Graph::new();
    let x = graph.leaf(
        VariableBuilder::new(arr0(configuration.input).into_dyn()).identifier("x".to_string()),
    )?;
    let y = composite(&mut graph, x)?;
    info!(
        "{}: forward pass recorded {} applications",
        graph.identifier(),
        graph.application_count()
    );
    graph.backward(y)?;

    let numerical = numerical_derivative(composite, &graph, x, configuration.epsilon)?;
    let output = graph.data(y).cloned().expect("operator output should carry data");
    let analytic = graph
        .gradient(x)
        .cloned()
        .expect("backward should reach the input");
    info!("gradient at {}: analytic {}, numerical {}", configuration.input, analytic, numerical);
    Ok(GradientReport {
        output,
        analytic,
        numerical,
    })
}

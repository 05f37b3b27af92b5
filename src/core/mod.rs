use std::sync::Mutex;

use lazy_static::lazy_static;
use log::debug;
use ndarray::prelude::*;

pub mod demo;
pub mod error;
pub mod numerical;
pub mod operations;

use self::error::{AutodiffError, Result};
use self::operations::{as_array, Operation, Operator};

lazy_static! {
    static ref COUNTER: Mutex<u64> = Mutex::new(0);
}

fn generate_sequential_identifier(prefix: &str) -> String {
    let mut num = COUNTER.lock().expect("counter lock should not be poisoned");
    *num += 1;
    format!("{}{}", prefix, num)
}

// A gradient must be shaped like the data it belongs to; placeholders accept
// any seed.
fn check_gradient_shape(data: Option<&ArrayD<f64>>, gradient: &ArrayD<f64>) -> Result<()> {
    match data {
        Some(data) if data.shape() != gradient.shape() => Err(AutodiffError::TypeMismatch {
            expected: "gradient shaped like its data",
            found: "gradient of another shape",
        }),
        _ => Ok(()),
    }
}

/// Loosely-typed numeric content, before it has been checked for use as a
/// value payload.
#[derive(Clone, Debug, PartialEq)]
pub enum Datum {
    Array(ArrayD<f64>),
    Scalar(f64),
    List(Vec<f64>),
    Text(String),
}

impl Datum {
    pub fn kind(&self) -> &'static str {
        match self {
            Datum::Array(_) => "array",
            Datum::Scalar(_) => "scalar",
            Datum::List(_) => "list",
            Datum::Text(_) => "text",
        }
    }
}

impl From<ArrayD<f64>> for Datum {
    fn from(array: ArrayD<f64>) -> Self {
        Datum::Array(array)
    }
}

impl From<f64> for Datum {
    fn from(value: f64) -> Self {
        Datum::Scalar(value)
    }
}

impl From<Vec<f64>> for Datum {
    fn from(values: Vec<f64>) -> Self {
        Datum::List(values)
    }
}

impl From<&str> for Datum {
    fn from(text: &str) -> Self {
        Datum::Text(text.to_owned())
    }
}

impl From<String> for Datum {
    fn from(text: String) -> Self {
        Datum::Text(text)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct VariableId(usize);

impl VariableId {
    #[allow(dead_code)]
    pub fn index(&self) -> usize {
        self.0
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ApplicationId(usize);

impl ApplicationId {
    #[allow(dead_code)]
    pub fn index(&self) -> usize {
        self.0
    }
}

#[derive(Debug)]
pub struct Variable {
    identifier: String,
    data: Option<ArrayD<f64>>,
    gradient: Option<ArrayD<f64>>,
    creator: Option<ApplicationId>,
}

impl Variable {
    #[allow(dead_code)]
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn data(&self) -> Option<&ArrayD<f64>> {
        self.data.as_ref()
    }

    pub fn gradient(&self) -> Option<&ArrayD<f64>> {
        self.gradient.as_ref()
    }

    /// The application that produced this variable; `None` for leaves.
    #[allow(dead_code)]
    pub fn creator(&self) -> Option<ApplicationId> {
        self.creator
    }

    fn set_creator(&mut self, creator: ApplicationId) {
        self.creator = Some(creator);
    }
}

pub struct VariableBuilder {
    data: Option<Datum>,
    identifier: Option<String>,
    gradient: Option<ArrayD<f64>>,
}

impl VariableBuilder {
    pub fn new(data: impl Into<Datum>) -> VariableBuilder {
        VariableBuilder {
            data: Some(data.into()),
            identifier: None,
            gradient: None,
        }
    }

    #[allow(dead_code)]
    pub fn placeholder() -> VariableBuilder {
        VariableBuilder {
            data: None,
            identifier: None,
            gradient: None,
        }
    }

    pub fn identifier(mut self, identifier: String) -> VariableBuilder {
        self.identifier = Some(identifier);
        self
    }

    #[allow(dead_code)]
    pub fn gradient(mut self, gradient: ArrayD<f64>) -> VariableBuilder {
        self.gradient = Some(gradient);
        self
    }

    pub fn build(self) -> Result<Variable> {
        let data = match self.data {
            None => None,
            Some(Datum::Array(array)) => Some(array),
            Some(other) => {
                return Err(AutodiffError::TypeMismatch {
                    expected: "array",
                    found: other.kind(),
                })
            }
        };
        if let Some(gradient) = &self.gradient {
            check_gradient_shape(data.as_ref(), gradient)?;
        }
        Ok(Variable {
            identifier: match self.identifier {
                Some(identifier) => identifier,
                None => generate_sequential_identifier("Variable"),
            },
            data,
            gradient: self.gradient,
            creator: None,
        })
    }
}

/// One application of an operator: which variable went in, which came out.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Application {
    pub operator: Operator,
    pub input: VariableId,
    pub output: VariableId,
}

/// Arena holding the variables and operator applications of one computation.
///
/// Ids are only meaningful for the graph that issued them.
pub struct Graph {
    identifier: String,
    variables: Vec<Variable>,
    applications: Vec<Application>,
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}

impl Graph {
    pub fn new() -> Self {
        Self {
            identifier: generate_sequential_identifier("Graph"),
            variables: Vec::new(),
            applications: Vec::new(),
        }
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn leaf(&mut self, builder: VariableBuilder) -> Result<VariableId> {
        let variable = builder.build()?;
        Ok(self.insert(variable))
    }

    pub fn variable(&mut self, data: impl Into<Datum>) -> Result<VariableId> {
        self.leaf(VariableBuilder::new(data))
    }

    fn insert(&mut self, variable: Variable) -> VariableId {
        debug!(
            "{}: recording {} with shape {:?}",
            self.identifier,
            variable.identifier,
            variable.data.as_ref().map(|data| data.shape().to_vec())
        );
        self.variables.push(variable);
        VariableId(self.variables.len() - 1)
    }

    pub fn data(&self, id: VariableId) -> Option<&ArrayD<f64>> {
        self.variables[id.0].data()
    }

    pub fn gradient(&self, id: VariableId) -> Option<&ArrayD<f64>> {
        self.variables[id.0].gradient()
    }

    /// Runs `operator` on the data of `input`, recording a new output
    /// variable whose creator is this application.
    pub fn apply(&mut self, operator: Operator, input: VariableId) -> Result<VariableId> {
        let x = self.variables[input.0]
            .data
            .as_ref()
            .ok_or(AutodiffError::TypeMismatch {
                expected: "array",
                found: "nothing",
            })?;
        let y = as_array(operator.forward(x)?)?;
        let output = self.insert(Variable {
            identifier: generate_sequential_identifier("Variable"),
            data: Some(y),
            gradient: None,
            creator: None,
        });
        self.applications.push(Application {
            operator,
            input,
            output,
        });
        let application = ApplicationId(self.applications.len() - 1);
        self.variables[output.0].set_creator(application);
        Ok(output)
    }

    /// Propagates gradients from `culmination` back to the leaves, returning
    /// the applications in the order they were visited.
    ///
    /// An unset gradient on `culmination` is seeded with ones. Gradients
    /// written to inputs replace whatever was there before; a variable feeding
    /// more than one application keeps only the last contribution.
    pub fn backward(&mut self, culmination: VariableId) -> Result<Vec<ApplicationId>> {
        let end = &mut self.variables[culmination.0];
        if end.gradient.is_none() {
            end.gradient = Some(match &end.data {
                Some(data) => Array::ones(data.raw_dim()),
                None => arr0(1.0).into_dyn(),
            });
        }

        let mut visited = Vec::new();
        let mut pending: Vec<ApplicationId> = end.creator.into_iter().collect();
        while let Some(application_id) = pending.pop() {
            let Application {
                operator,
                input,
                output,
            } = self.applications[application_id.0];
            let out_gradient = self.variables[output.0]
                .gradient
                .as_ref()
                .expect("gradient should be stored");
            let x = self.variables[input.0]
                .data
                .as_ref()
                .expect("recorded input should carry data");
            let in_gradient = operator.backward(x, out_gradient)?;
            debug!(
                "{}: {} {} → {}",
                self.identifier,
                operator.name(),
                self.variables[output.0].identifier,
                self.variables[input.0].identifier
            );

            let parent = &mut self.variables[input.0];
            parent.gradient = Some(in_gradient);
            if let Some(creator) = parent.creator {
                pending.push(creator);
            }
            visited.push(application_id);
        }
        Ok(visited)
    }
}

// Inspection and gradient housekeeping.
#[allow(dead_code)]
impl Graph {
    pub fn len(&self) -> usize {
        self.variables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }

    pub fn application_count(&self) -> usize {
        self.applications.len()
    }

    pub fn placeholder(&mut self) -> VariableId {
        let variable = Variable {
            identifier: generate_sequential_identifier("Variable"),
            data: None,
            gradient: None,
            creator: None,
        };
        self.insert(variable)
    }

    pub fn get(&self, id: VariableId) -> &Variable {
        &self.variables[id.0]
    }

    pub fn creator(&self, id: VariableId) -> Option<ApplicationId> {
        self.variables[id.0].creator()
    }

    pub fn is_leaf(&self, id: VariableId) -> bool {
        self.variables[id.0].creator.is_none()
    }

    pub fn application(&self, id: ApplicationId) -> &Application {
        &self.applications[id.0]
    }

    /// Seeds a gradient ahead of `backward`; it must match the data's shape.
    pub fn set_gradient(&mut self, id: VariableId, gradient: ArrayD<f64>) -> Result<()> {
        let variable = &mut self.variables[id.0];
        check_gradient_shape(variable.data.as_ref(), &gradient)?;
        variable.gradient = Some(gradient);
        Ok(())
    }

    pub fn unset_gradient(&mut self, id: VariableId) {
        self.variables[id.0].gradient = None;
    }

    pub fn clear_gradients(&mut self) {
        for variable in &mut self.variables {
            variable.gradient = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::operations::{exp, square};

    use approx::assert_abs_diff_eq;

    #[test]
    fn test_leaf_backward() {
        let mut graph = Graph::new();
        let x = graph.variable(array![1.0, 2.0, 3.0].into_dyn()).unwrap();
        assert!(graph.is_leaf(x));
        assert!(graph.gradient(x).is_none());

        let visited = graph.backward(x).unwrap();

        assert!(visited.is_empty());
        assert_eq!(*graph.gradient(x).unwrap(), array![1.0, 1.0, 1.0].into_dyn());
        assert_eq!(graph.application_count(), 0);
    }

    #[test]
    fn test_type_guard() {
        let mut graph = Graph::new();
        assert_eq!(
            graph.variable(vec![1.0, 2.0]),
            Err(AutodiffError::TypeMismatch {
                expected: "array",
                found: "list"
            })
        );
        assert_eq!(
            graph.variable("two"),
            Err(AutodiffError::TypeMismatch {
                expected: "array",
                found: "text"
            })
        );
        assert_eq!(
            graph.variable(2.0),
            Err(AutodiffError::TypeMismatch {
                expected: "array",
                found: "scalar"
            })
        );
        assert!(graph.is_empty());
    }

    #[test]
    fn test_builder() {
        let mut graph = Graph::new();
        let x = graph
            .leaf(
                VariableBuilder::new(arr0(1.5).into_dyn())
                    .identifier("x".to_string())
                    .gradient(arr0(2.0).into_dyn()),
            )
            .unwrap();
        assert_eq!(graph.get(x).identifier(), "x");
        assert_eq!(*graph.gradient(x).unwrap(), arr0(2.0).into_dyn());
        assert!(graph.get(x).creator().is_none());
    }

    #[test]
    fn test_operator_output_records_creator() {
        let mut graph = Graph::new();
        let x = graph.variable(arr0(0.5).into_dyn()).unwrap();
        let y = square(&mut graph, x).unwrap();

        assert!(!graph.is_leaf(y));
        let application = graph.application(graph.creator(y).unwrap());
        assert_eq!(application.operator, Operator::Square);
        assert_eq!(application.input, x);
        assert_eq!(application.output, y);
        // forward evaluation leaves gradients alone
        assert!(graph.gradient(y).is_none());
        assert!(graph.gradient(x).is_none());
    }

    #[test]
    fn test_chain_rule_composition() {
        let mut graph = Graph::new();
        let x = graph.variable(arr0(0.5).into_dyn()).unwrap();
        let a = square(&mut graph, x).unwrap();
        let b = exp(&mut graph, a).unwrap();
        let y = square(&mut graph, b).unwrap();

        let visited = graph.backward(y).unwrap();

        let expected_order = vec![
            graph.creator(y).unwrap(),
            graph.creator(b).unwrap(),
            graph.creator(a).unwrap(),
        ];
        assert_eq!(visited, expected_order);
        assert_eq!(
            visited.iter().map(|id| id.index()).collect::<Vec<_>>(),
            vec![2, 1, 0]
        );

        // y = b², b = e^a, a = x²
        let b_value = 0.25_f64.exp();
        let dy_db = 2. * b_value;
        let dy_da = b_value * dy_db;
        let dy_dx = 2. * 0.5 * dy_da;
        assert_eq!(*graph.gradient(y).unwrap(), arr0(1.0).into_dyn());
        assert_abs_diff_eq!(
            *graph.gradient(b).unwrap(),
            arr0(dy_db).into_dyn(),
            epsilon = 1e-12
        );
        assert_abs_diff_eq!(
            *graph.gradient(a).unwrap(),
            arr0(dy_da).into_dyn(),
            epsilon = 1e-12
        );
        assert_abs_diff_eq!(
            *graph.gradient(x).unwrap(),
            arr0(dy_dx).into_dyn(),
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_backward_on_arrays() {
        let mut graph = Graph::new();
        let x = graph.variable(array![[0.0, 1.0], [-2.0, 3.0]].into_dyn()).unwrap();
        let y = square(&mut graph, x).unwrap();
        graph.backward(y).unwrap();
        assert_eq!(
            *graph.gradient(y).unwrap(),
            Array::<f64, _>::ones((2, 2)).into_dyn()
        );
        assert_eq!(
            *graph.gradient(x).unwrap(),
            array![[0.0, 2.0], [-4.0, 6.0]].into_dyn()
        );
    }

    #[test]
    fn test_repeated_backward_overwrites() {
        let mut graph = Graph::new();
        let x = graph.variable(arr0(3.0).into_dyn()).unwrap();
        let y = square(&mut graph, x).unwrap();
        graph.backward(y).unwrap();
        graph.backward(y).unwrap();
        assert_eq!(*graph.gradient(x).unwrap(), arr0(6.0).into_dyn());
    }

    #[test]
    fn test_fan_out_keeps_last_contribution() {
        let mut graph = Graph::new();
        let x = graph.variable(arr0(3.0).into_dyn()).unwrap();
        let first = square(&mut graph, x).unwrap();
        let second = exp(&mut graph, x).unwrap();
        graph.backward(first).unwrap();
        graph.backward(second).unwrap();
        assert_abs_diff_eq!(
            *graph.gradient(x).unwrap(),
            arr0(3.0_f64.exp()).into_dyn(),
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_custom_seed_and_clearing() {
        let mut graph = Graph::new();
        let x = graph.variable(arr0(2.0).into_dyn()).unwrap();
        let y = square(&mut graph, x).unwrap();

        graph.set_gradient(y, arr0(3.0).into_dyn()).unwrap();
        graph.backward(y).unwrap();
        assert_eq!(*graph.gradient(x).unwrap(), arr0(12.0).into_dyn());

        graph.clear_gradients();
        assert!(graph.gradient(x).is_none());
        assert!(graph.gradient(y).is_none());

        graph.backward(y).unwrap();
        assert_eq!(*graph.gradient(x).unwrap(), arr0(4.0).into_dyn());

        graph.unset_gradient(x);
        assert!(graph.gradient(x).is_none());
    }

    #[test]
    fn test_seed_must_match_data_shape() {
        let mut graph = Graph::new();
        let x = graph.variable(array![1.0, 2.0, 3.0].into_dyn()).unwrap();
        let y = square(&mut graph, x).unwrap();

        let mismatch = AutodiffError::TypeMismatch {
            expected: "gradient shaped like its data",
            found: "gradient of another shape",
        };
        assert_eq!(
            graph.set_gradient(y, array![1.0, 1.0].into_dyn()),
            Err(mismatch.clone())
        );
        assert!(graph.gradient(y).is_none());

        // broadcastable is not good enough either
        let mut graph = Graph::new();
        let x = graph.variable(arr0(2.0).into_dyn()).unwrap();
        let y = square(&mut graph, x).unwrap();
        assert_eq!(
            graph.set_gradient(y, array![1.0, 1.0, 1.0].into_dyn()),
            Err(mismatch)
        );
        graph.backward(y).unwrap();
        assert_eq!(graph.gradient(x).unwrap().shape(), graph.data(x).unwrap().shape());
        assert_eq!(*graph.gradient(x).unwrap(), arr0(4.0).into_dyn());
    }

    #[test]
    fn test_builder_rejects_misshapen_gradient() {
        let mut graph = Graph::new();
        let result = graph.leaf(
            VariableBuilder::new(arr0(1.5).into_dyn()).gradient(array![1.0, 1.0].into_dyn()),
        );
        assert_eq!(
            result,
            Err(AutodiffError::TypeMismatch {
                expected: "gradient shaped like its data",
                found: "gradient of another shape",
            })
        );
        assert!(graph.is_empty());

        // without data there is no shape to match
        let p = graph
            .leaf(VariableBuilder::placeholder().gradient(array![1.0, 1.0].into_dyn()))
            .unwrap();
        assert_eq!(*graph.gradient(p).unwrap(), array![1.0, 1.0].into_dyn());
    }

    #[test]
    fn test_placeholder() {
        let mut graph = Graph::new();
        let p = graph.placeholder();
        assert!(graph.data(p).is_none());
        assert_eq!(
            square(&mut graph, p),
            Err(AutodiffError::TypeMismatch {
                expected: "array",
                found: "nothing"
            })
        );
        assert!(graph.backward(p).unwrap().is_empty());
        assert_eq!(*graph.gradient(p).unwrap(), arr0(1.0).into_dyn());

        let q = graph.leaf(VariableBuilder::placeholder()).unwrap();
        assert!(graph.data(q).is_none());
    }

    #[test]
    fn test_sequential_identifiers() {
        let mut graph = Graph::new();
        let x = graph.variable(arr0(1.0).into_dyn()).unwrap();
        let y = exp(&mut graph, x).unwrap();
        assert!(graph.identifier().starts_with("Graph"));
        assert!(graph.get(x).identifier().starts_with("Variable"));
        assert_ne!(graph.get(x).identifier(), graph.get(y).identifier());
        assert_eq!(graph.len(), 2);
    }
}

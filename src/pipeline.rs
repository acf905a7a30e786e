//! The static pipeline graph the scheduler works over.
//!
//! A `Pipeline` is an immutable environment mapping function names to their
//! definitions, built once and passed by reference into the cost model,
//! dependence analysis and partitioner. Each function has a pure initial
//! definition (stage 0) and zero or more ordered update definitions (stages
//! >= 1); an `FStage` names one such stage and is the atomic unit of
//! scheduling.

use crate::error::SchedError;
use crate::expr::{find_calls, Expr, ScalarType};
use crate::simplify::simplify;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// A reduction variable: iterates `[min, min + extent - 1]` with symbolic
/// bounds declared by the function itself.
#[derive(Debug, Clone, PartialEq)]
pub struct ReductionVariable {
    /// Variable name
    pub var: String,
    /// Symbolic minimum
    pub min: Expr,
    /// Symbolic extent
    pub extent: Expr,
}

/// One pure or update definition of a function.
#[derive(Debug, Clone, PartialEq)]
pub struct Definition {
    /// Store coordinates: for the pure stage, the pure arguments as plain
    /// variables; for updates, arbitrary expressions over pure args and
    /// rvars.
    pub args: Vec<Expr>,
    /// Value expressions (one per output)
    pub values: Vec<Expr>,
    /// Loop dimensions, innermost first
    pub dims: Vec<String>,
    /// Reduction variables referenced by this stage
    pub rvars: Vec<ReductionVariable>,
}

impl Definition {
    /// Names of every pipeline function and image referenced by this
    /// stage's value and store-coordinate expressions.
    pub fn calls(&self) -> BTreeSet<String> {
        let mut calls = BTreeSet::new();
        for e in self.values.iter().chain(self.args.iter()) {
            calls.append(&mut find_calls(e));
        }
        calls
    }
}

/// A user-provided size estimate for one pure argument of an output.
#[derive(Debug, Clone, PartialEq)]
pub struct Estimate {
    /// The pure argument the estimate applies to
    pub var: String,
    /// Estimated minimum (must be a literal for outputs)
    pub min: Expr,
    /// Estimated extent (must be a literal for outputs)
    pub extent: Expr,
}

/// A pipeline function: pure definition, ordered updates, output types and
/// optional size estimates.
#[derive(Debug, Clone, PartialEq)]
pub struct Function {
    /// Function name, unique within the pipeline
    pub name: String,
    /// Pure arguments, in dimension order
    pub args: Vec<String>,
    /// Element type of each output value
    pub output_types: Vec<ScalarType>,
    /// Stage 0: the pure definition
    pub init: Definition,
    /// Stages 1..: update definitions, in order
    pub updates: Vec<Definition>,
    /// Output-size estimates (required on pipeline outputs)
    pub estimates: Vec<Estimate>,
}

impl Function {
    /// Build a pure single-value function `name(args...) = value`, with the
    /// loop dimensions in argument order.
    pub fn pure(name: &str, args: &[&str], value: Expr, ty: ScalarType) -> Function {
        Function {
            name: name.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
            output_types: vec![ty],
            init: Definition {
                args: args.iter().map(|a| Expr::var(*a)).collect(),
                values: vec![value],
                dims: args.iter().map(|a| a.to_string()).collect(),
                rvars: Vec::new(),
            },
            updates: Vec::new(),
            estimates: Vec::new(),
        }
    }

    /// Attach an update definition.
    pub fn with_update(mut self, update: Definition) -> Function {
        self.updates.push(update);
        self
    }

    /// Attach a literal output-size estimate for one pure argument.
    pub fn with_estimate(mut self, var: &str, min: i64, extent: i64) -> Function {
        self.estimates.push(Estimate {
            var: var.to_string(),
            min: Expr::IntImm(min),
            extent: Expr::IntImm(extent),
        });
        self
    }

    /// Whether the function has no update definitions.
    pub fn is_pure(&self) -> bool {
        self.updates.is_empty()
    }

    /// Total number of stages (pure + updates).
    pub fn num_stages(&self) -> u32 {
        1 + self.updates.len() as u32
    }

    /// Index of the last stage.
    pub fn final_stage(&self) -> u32 {
        self.updates.len() as u32
    }

    /// The definition of the given stage. Stage 0 is the pure definition.
    pub fn definition(&self, stage: u32) -> &Definition {
        if stage == 0 {
            &self.init
        } else {
            assert!(
                (stage as usize) <= self.updates.len(),
                "{} has no stage {}",
                self.name,
                stage
            );
            &self.updates[stage as usize - 1]
        }
    }

    /// The estimate declared for one pure argument, if any.
    pub fn estimate_for(&self, var: &str) -> Option<&Estimate> {
        self.estimates.iter().find(|e| e.var == var)
    }

    /// Bytes occupied by one element across all outputs.
    pub fn value_size(&self) -> i64 {
        assert!(
            !self.output_types.is_empty(),
            "{} has no output types",
            self.name
        );
        self.output_types.iter().map(|t| t.bytes()).sum()
    }

    /// Names called from any stage of this function.
    pub fn calls(&self) -> BTreeSet<String> {
        let mut calls = self.init.calls();
        for u in &self.updates {
            calls.append(&mut u.calls());
        }
        calls
    }
}

/// One stage of one function: the atomic unit of scheduling. Ordered by
/// (function name, stage index); used as a map key throughout.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FStage {
    /// Function name
    pub func: String,
    /// Stage index; 0 is the pure definition
    pub stage: u32,
}

impl FStage {
    /// Stage of a named function.
    pub fn new(func: impl Into<String>, stage: u32) -> FStage {
        FStage {
            func: func.into(),
            stage,
        }
    }
}

impl fmt::Display for FStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.func, self.stage)
    }
}

/// The immutable pipeline environment: every function reachable from the
/// outputs, plus the list of output names.
#[derive(Debug, Clone)]
pub struct Pipeline {
    funcs: BTreeMap<String, Function>,
    outputs: Vec<String>,
}

impl Pipeline {
    /// Build a pipeline from its functions and output names. Fails if an
    /// output is undefined or a `Pipeline`-kind call refers to a function
    /// that is not part of the set (image references are external and not
    /// checked here).
    pub fn new(funcs: Vec<Function>, outputs: Vec<String>) -> Result<Pipeline> {
        let mut map = BTreeMap::new();
        for f in funcs {
            let name = f.name.clone();
            if map.insert(name.clone(), f).is_some() {
                return Err(SchedError::DuplicateFunction { name }.into());
            }
        }
        for out in &outputs {
            if !map.contains_key(out) {
                return Err(SchedError::UnknownFunction { name: out.clone() }.into());
            }
        }
        let pipeline = Pipeline {
            funcs: map,
            outputs,
        };
        for f in pipeline.funcs.values() {
            for c in pipeline_calls(f) {
                if !pipeline.funcs.contains_key(&c) {
                    return Err(SchedError::UnknownFunction { name: c }.into());
                }
            }
        }
        Ok(pipeline)
    }

    /// Look up a function by name. The name must come from the pipeline
    /// itself; a miss is a logic error, not a user error.
    pub fn function(&self, name: &str) -> &Function {
        self.funcs
            .get(name)
            .unwrap_or_else(|| panic!("function {} is not part of the pipeline", name))
    }

    /// Whether `name` is a pipeline function (as opposed to an image input).
    pub fn contains(&self, name: &str) -> bool {
        self.funcs.contains_key(name)
    }

    /// All functions, in name order.
    pub fn functions(&self) -> impl Iterator<Item = &Function> {
        self.funcs.values()
    }

    /// Output function names.
    pub fn outputs(&self) -> &[String] {
        &self.outputs
    }

    /// Whether `name` is one of the pipeline outputs.
    pub fn is_output(&self, name: &str) -> bool {
        self.outputs.iter().any(|o| o == name)
    }

    /// Pipeline functions directly called by `func` (images excluded).
    pub fn find_direct_calls(&self, func: &str) -> BTreeSet<String> {
        self.function(func)
            .calls()
            .into_iter()
            .filter(|c| c != func && self.contains(c))
            .collect()
    }

    /// Topological ordering of all functions, producers before consumers.
    /// The pipeline graph is a DAG by construction; a cycle is fatal.
    pub fn realization_order(&self) -> Vec<String> {
        let mut order = Vec::new();
        let mut state: BTreeMap<&str, u8> = BTreeMap::new(); // 1 = visiting, 2 = done
        for name in self.funcs.keys() {
            self.visit_order(name, &mut state, &mut order);
        }
        order
    }

    fn visit_order<'a>(
        &'a self,
        name: &'a str,
        state: &mut BTreeMap<&'a str, u8>,
        order: &mut Vec<String>,
    ) {
        match state.get(name) {
            Some(2) => return,
            Some(1) => panic!("cycle in pipeline graph at {}", name),
            _ => {}
        }
        state.insert(name, 1);
        for dep in self.find_direct_calls(name) {
            let dep_name = self.funcs.get_key_value(dep.as_str()).map(|(k, _)| k.as_str());
            if let Some(dep_name) = dep_name {
                self.visit_order(dep_name, state, order);
            }
        }
        state.insert(name, 2);
        order.push(name.to_string());
    }

    /// Verify that every pure argument of every output carries a literal
    /// (min, extent) estimate. The only user-facing failure path: a missing
    /// estimate aborts the run before any analysis.
    pub fn check_output_estimates(&self) -> Result<()> {
        for out in &self.outputs {
            let f = self.function(out);
            for arg in &f.args {
                let est = f.estimate_for(arg).ok_or_else(|| SchedError::MissingEstimate {
                    func: out.clone(),
                    var: arg.clone(),
                })?;
                let min_lit = simplify(&est.min).as_int().is_some();
                let ext_lit = simplify(&est.extent).as_int().is_some();
                if !min_lit || !ext_lit {
                    return Err(SchedError::MissingEstimate {
                        func: out.clone(),
                        var: arg.clone(),
                    }
                    .into());
                }
            }
        }
        Ok(())
    }
}

fn pipeline_calls(f: &Function) -> BTreeSet<String> {
    use crate::expr::CallKind;
    let mut out = BTreeSet::new();
    let mut stack: Vec<&Expr> = Vec::new();
    for d in std::iter::once(&f.init).chain(f.updates.iter()) {
        stack.extend(d.values.iter());
        stack.extend(d.args.iter());
    }
    while let Some(e) = stack.pop() {
        match e {
            Expr::IntImm(_) | Expr::FloatImm(_) | Expr::Var(_) => {}
            Expr::Cast(_, inner) | Expr::Not(inner) => stack.push(inner),
            Expr::Binary(_, a, b) => {
                stack.push(a);
                stack.push(b);
            }
            Expr::Select(c, t, fe) => {
                stack.push(c);
                stack.push(t);
                stack.push(fe);
            }
            Expr::Call(call) => {
                if call.kind == CallKind::Pipeline && call.name != f.name {
                    out.insert(call.name.clone());
                }
                stack.extend(call.args.iter());
            }
            Expr::Let(_, v, b) => {
                stack.push(v);
                stack.push(b);
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_stage() -> Pipeline {
        let a = Function::pure(
            "A",
            &["x"],
            Expr::var("x") * Expr::int(2),
            ScalarType::Int32,
        );
        let b = Function::pure(
            "B",
            &["x"],
            Expr::call("A", ScalarType::Int32, vec![Expr::var("x")]),
            ScalarType::Int32,
        )
        .with_estimate("x", 0, 100);
        Pipeline::new(vec![a, b], vec!["B".to_string()]).unwrap()
    }

    #[test]
    fn test_realization_order() {
        let p = two_stage();
        let order = p.realization_order();
        let ia = order.iter().position(|n| n == "A").unwrap();
        let ib = order.iter().position(|n| n == "B").unwrap();
        assert!(ia < ib);
    }

    #[test]
    fn test_unknown_function_rejected() {
        let b = Function::pure(
            "B",
            &["x"],
            Expr::call("A", ScalarType::Int32, vec![Expr::var("x")]),
            ScalarType::Int32,
        );
        assert!(Pipeline::new(vec![b], vec!["B".to_string()]).is_err());
    }

    #[test]
    fn test_estimate_check() {
        let p = two_stage();
        assert!(p.check_output_estimates().is_ok());

        let a = Function::pure("A", &["x"], Expr::int(0), ScalarType::Int32);
        let p = Pipeline::new(vec![a], vec!["A".to_string()]).unwrap();
        assert!(p.check_output_estimates().is_err());
    }

    #[test]
    fn test_stage_definitions() {
        let p = two_stage();
        let a = p.function("A");
        assert!(a.is_pure());
        assert_eq!(a.num_stages(), 1);
        assert_eq!(a.definition(0).dims, vec!["x".to_string()]);
    }
}

//! Analyses over the static pipeline graph.

pub mod dependence;

pub use dependence::{pipeline_bounds, DependenceAnalysis};

use crate::expr::Expr;
use crate::pipeline::Definition;

/// Race-safety check for parallelizing a reduction variable: distinct
/// values of the rvar must write disjoint output locations. This check is
/// conservative: it accepts an rvar only when it appears as a bare
/// coordinate in exactly one store-argument position and nowhere else in
/// the store arguments.
pub fn can_parallelize_rvar(var: &str, def: &Definition) -> bool {
    let mut bare_positions = 0;
    for arg in &def.args {
        match arg {
            Expr::Var(name) if name == var => bare_positions += 1,
            other => {
                if references_var(other, var) {
                    return false;
                }
            }
        }
    }
    bare_positions == 1
}

fn references_var(e: &Expr, var: &str) -> bool {
    match e {
        Expr::IntImm(_) | Expr::FloatImm(_) => false,
        Expr::Var(name) => name == var,
        Expr::Cast(_, inner) | Expr::Not(inner) => references_var(inner, var),
        Expr::Binary(_, a, b) => references_var(a, var) || references_var(b, var),
        Expr::Select(c, t, f) => {
            references_var(c, var) || references_var(t, var) || references_var(f, var)
        }
        Expr::Call(call) => call.args.iter().any(|a| references_var(a, var)),
        Expr::Let(name, v, b) => {
            references_var(v, var) || (name != var && references_var(b, var))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::{Expr, ScalarType};
    use crate::pipeline::ReductionVariable;

    #[test]
    fn test_bare_coordinate_parallelizes() {
        // f(x, r) = ... stored at (x, r): independent per r
        let def = Definition {
            args: vec![Expr::var("x"), Expr::var("r")],
            values: vec![Expr::int(0)],
            dims: vec!["x".to_string(), "r".to_string()],
            rvars: vec![ReductionVariable {
                var: "r".to_string(),
                min: Expr::int(0),
                extent: Expr::int(10),
            }],
        };
        assert!(can_parallelize_rvar("r", &def));
    }

    #[test]
    fn test_data_dependent_store_rejected() {
        // hist(in(r)) += 1: the store coordinate depends on a load, so
        // distinct r values may collide
        let def = Definition {
            args: vec![Expr::image("in", ScalarType::UInt8, vec![Expr::var("r")])],
            values: vec![
                Expr::call("hist", ScalarType::Int32, vec![Expr::var("x")]) + Expr::int(1),
            ],
            dims: vec!["r".to_string()],
            rvars: vec![ReductionVariable {
                var: "r".to_string(),
                min: Expr::int(0),
                extent: Expr::int(100),
            }],
        };
        assert!(!can_parallelize_rvar("r", &def));
    }

    #[test]
    fn test_missing_coordinate_rejected() {
        // Store coordinate ignores r entirely: all instances write the
        // same locations
        let def = Definition {
            args: vec![Expr::var("x")],
            values: vec![Expr::int(0)],
            dims: vec!["x".to_string(), "r".to_string()],
            rvars: vec![ReductionVariable {
                var: "r".to_string(),
                min: Expr::int(0),
                extent: Expr::int(10),
            }],
        };
        assert!(!can_parallelize_rvar("r", &def));
    }
}

//! Interval bounds propagation over expressions.
//!
//! This is the bounds oracle dependence analysis is built on: given a scope
//! binding loop variables to intervals, compute a conservative interval for
//! an arbitrary expression, and collect the coordinate boxes of every
//! pipeline-function and image reference inside it. Bounds stay symbolic;
//! anything the rules cannot tighten falls back to the expression itself as
//! a degenerate interval, which downstream costing treats as unknown.

use crate::expr::{BinOp, CallKind, Expr};
use crate::region::{DimBounds, Interval, Region};
use crate::simplify::simplify;
use std::collections::BTreeMap;

fn binary(op: BinOp, a: &Expr, b: &Expr) -> Expr {
    Expr::Binary(op, Box::new(a.clone()), Box::new(b.clone()))
}

/// Interval of the four corner products/quotients of two intervals,
/// expressed with min/max nodes and simplified.
fn corner_bounds(op: BinOp, a: &Interval, b: &Interval) -> Interval {
    let corners = [
        binary(op, &a.min, &b.min),
        binary(op, &a.min, &b.max),
        binary(op, &a.max, &b.min),
        binary(op, &a.max, &b.max),
    ];
    let mut lo = corners[0].clone();
    let mut hi = corners[0].clone();
    for c in &corners[1..] {
        lo = Expr::min(lo, c.clone());
        hi = Expr::max(hi, c.clone());
    }
    Interval::new(simplify(&lo), simplify(&hi))
}

/// Compute a conservative interval for `e` under `scope`.
///
/// Free variables not bound in the scope stay symbolic (the variable is its
/// own degenerate interval), so the result is total; callers decide what an
/// unknown (non-literal) bound means.
pub fn expr_bounds(e: &Expr, scope: &DimBounds) -> Interval {
    match e {
        Expr::IntImm(_) | Expr::FloatImm(_) => Interval::point(e.clone()),
        Expr::Var(name) => match scope.get(name) {
            Some(i) => i.clone(),
            None => Interval::point(e.clone()),
        },
        Expr::Cast(ty, inner) => {
            let b = expr_bounds(inner, scope);
            Interval::new(
                simplify(&Expr::Cast(*ty, Box::new(b.min))),
                simplify(&Expr::Cast(*ty, Box::new(b.max))),
            )
        }
        Expr::Binary(op, a, b) => {
            let ba = expr_bounds(a, scope);
            let bb = expr_bounds(b, scope);
            match op {
                BinOp::Add => Interval::new(
                    simplify(&binary(BinOp::Add, &ba.min, &bb.min)),
                    simplify(&binary(BinOp::Add, &ba.max, &bb.max)),
                ),
                BinOp::Sub => Interval::new(
                    simplify(&binary(BinOp::Sub, &ba.min, &bb.max)),
                    simplify(&binary(BinOp::Sub, &ba.max, &bb.min)),
                ),
                BinOp::Mul | BinOp::Div => corner_bounds(*op, &ba, &bb),
                BinOp::Mod => {
                    // For a positive literal modulus the result lies in
                    // [0, m-1]; anything else stays symbolic.
                    match bb.min.as_int() {
                        Some(m) if m > 0 && bb.min == bb.max => Interval::literal(0, m - 1),
                        _ => Interval::point(simplify(e)),
                    }
                }
                BinOp::Min => Interval::new(
                    simplify(&Expr::min(ba.min, bb.min)),
                    simplify(&Expr::min(ba.max, bb.max)),
                ),
                BinOp::Max => Interval::new(
                    simplify(&Expr::max(ba.min, bb.min)),
                    simplify(&Expr::max(ba.max, bb.max)),
                ),
                BinOp::Eq
                | BinOp::Ne
                | BinOp::Lt
                | BinOp::Le
                | BinOp::Gt
                | BinOp::Ge
                | BinOp::And
                | BinOp::Or => Interval::literal(0, 1),
            }
        }
        Expr::Not(_) => Interval::literal(0, 1),
        Expr::Select(_, t, f) => {
            let mut bt = expr_bounds(t, scope);
            bt.merge(&expr_bounds(f, scope));
            bt
        }
        // The value bounds of a call are opaque; the reference itself is
        // handled by boxes_required.
        Expr::Call(_) => Interval::point(simplify(e)),
        Expr::Let(name, v, b) => {
            let vb = expr_bounds(v, scope);
            let mut inner = scope.clone();
            inner.insert(name.clone(), vb);
            expr_bounds(b, &inner)
        }
    }
}

/// Collect, for every pipeline function and image referenced by `e`, the box
/// of coordinates it is accessed over, interval-wise unioned across
/// occurrences. Two references to the same callee must agree on
/// dimensionality.
pub fn boxes_required(e: &Expr, scope: &DimBounds) -> BTreeMap<String, Region> {
    let mut boxes = BTreeMap::new();
    collect_boxes(e, scope, &mut boxes);
    boxes
}

fn collect_boxes(e: &Expr, scope: &DimBounds, out: &mut BTreeMap<String, Region>) {
    match e {
        Expr::IntImm(_) | Expr::FloatImm(_) | Expr::Var(_) => {}
        Expr::Cast(_, inner) | Expr::Not(inner) => collect_boxes(inner, scope, out),
        Expr::Binary(_, a, b) => {
            collect_boxes(a, scope, out);
            collect_boxes(b, scope, out);
        }
        Expr::Select(c, t, f) => {
            collect_boxes(c, scope, out);
            collect_boxes(t, scope, out);
            collect_boxes(f, scope, out);
        }
        Expr::Call(call) => {
            if matches!(call.kind, CallKind::Pipeline | CallKind::Image) {
                let mut reg = Region::new();
                for a in &call.args {
                    reg.push(expr_bounds(a, scope));
                }
                match out.get_mut(&call.name) {
                    Some(existing) => {
                        assert_eq!(
                            existing.len(),
                            reg.len(),
                            "references to {} disagree on dimensionality",
                            call.name
                        );
                        existing.merge(&reg);
                    }
                    None => {
                        out.insert(call.name.clone(), reg);
                    }
                }
            }
            for a in &call.args {
                collect_boxes(a, scope, out);
            }
        }
        Expr::Let(name, v, b) => {
            collect_boxes(v, scope, out);
            let vb = expr_bounds(v, scope);
            let mut inner = scope.clone();
            inner.insert(name.clone(), vb);
            collect_boxes(b, &inner, out);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::ScalarType;

    fn scope_x(lo: i64, hi: i64) -> DimBounds {
        let mut s = DimBounds::new();
        s.insert("x".to_string(), Interval::literal(lo, hi));
        s
    }

    #[test]
    fn test_add_bounds() {
        let e = Expr::var("x") + Expr::int(1);
        let b = expr_bounds(&e, &scope_x(0, 99));
        assert_eq!(b, Interval::literal(1, 100));
    }

    #[test]
    fn test_mul_bounds() {
        let e = Expr::var("x") * Expr::int(-2);
        let b = expr_bounds(&e, &scope_x(1, 3));
        assert_eq!(b, Interval::literal(-6, -2));
    }

    #[test]
    fn test_free_var_stays_symbolic() {
        let e = Expr::var("y") + Expr::int(1);
        let b = expr_bounds(&e, &scope_x(0, 99));
        assert_eq!(b.extent(), None);
    }

    #[test]
    fn test_boxes_merge_across_occurrences() {
        // A(x) + A(x + 1) over x in [0, 99] touches A over [0, 100]
        let e = Expr::call("A", ScalarType::Int32, vec![Expr::var("x")])
            + Expr::call("A", ScalarType::Int32, vec![Expr::var("x") + Expr::int(1)]);
        let boxes = boxes_required(&e, &scope_x(0, 99));
        assert_eq!(boxes.len(), 1);
        assert_eq!(boxes["A"].0[0], Interval::literal(0, 100));
    }

    #[test]
    fn test_boxes_images_included() {
        let e = Expr::image("in", ScalarType::UInt8, vec![Expr::var("x")]);
        let boxes = boxes_required(&e, &scope_x(0, 9));
        assert_eq!(boxes["in"].0[0], Interval::literal(0, 9));
    }

    #[test]
    #[should_panic(expected = "dimensionality")]
    fn test_boxes_dim_mismatch_fatal() {
        let e = Expr::call("A", ScalarType::Int32, vec![Expr::var("x")])
            + Expr::call(
                "A",
                ScalarType::Int32,
                vec![Expr::var("x"), Expr::var("x")],
            );
        boxes_required(&e, &scope_x(0, 9));
    }
}

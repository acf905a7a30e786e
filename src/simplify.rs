//! Symbolic simplification of scalar expressions.
//!
//! A small recursive rewriter, enough to keep the bounds produced by
//! dependence analysis in a canonical shape: constant folding over integer
//! and float literals, the usual algebraic identities, and re-association of
//! literal add/sub chains so that `(x + 1) + 99` folds to `x + 100`.
//! Comparisons fold to `0`/`1` integers.

use crate::expr::{BinOp, Expr};

/// Floor division, rounding toward negative infinity (matches the semantics
/// bounds analysis assumes for `Div` on integers).
fn floor_div(a: i64, b: i64) -> i64 {
    let d = a / b;
    let r = a % b;
    if r != 0 && (r < 0) != (b < 0) {
        d - 1
    } else {
        d
    }
}

fn floor_mod(a: i64, b: i64) -> i64 {
    a - floor_div(a, b) * b
}

fn fold_int(op: BinOp, a: i64, b: i64) -> Option<i64> {
    Some(match op {
        BinOp::Add => a.checked_add(b)?,
        BinOp::Sub => a.checked_sub(b)?,
        BinOp::Mul => a.checked_mul(b)?,
        BinOp::Div => {
            if b == 0 {
                return None;
            }
            floor_div(a, b)
        }
        BinOp::Mod => {
            if b == 0 {
                return None;
            }
            floor_mod(a, b)
        }
        BinOp::Min => a.min(b),
        BinOp::Max => a.max(b),
        BinOp::Eq => (a == b) as i64,
        BinOp::Ne => (a != b) as i64,
        BinOp::Lt => (a < b) as i64,
        BinOp::Le => (a <= b) as i64,
        BinOp::Gt => (a > b) as i64,
        BinOp::Ge => (a >= b) as i64,
        BinOp::And => ((a != 0) && (b != 0)) as i64,
        BinOp::Or => ((a != 0) || (b != 0)) as i64,
    })
}

fn fold_float(op: BinOp, a: f64, b: f64) -> Option<Expr> {
    let v = match op {
        BinOp::Add => a + b,
        BinOp::Sub => a - b,
        BinOp::Mul => a * b,
        BinOp::Div => {
            if b == 0.0 {
                return None;
            }
            a / b
        }
        BinOp::Min => a.min(b),
        BinOp::Max => a.max(b),
        BinOp::Eq => return Some(Expr::IntImm((a == b) as i64)),
        BinOp::Ne => return Some(Expr::IntImm((a != b) as i64)),
        BinOp::Lt => return Some(Expr::IntImm((a < b) as i64)),
        BinOp::Le => return Some(Expr::IntImm((a <= b) as i64)),
        BinOp::Gt => return Some(Expr::IntImm((a > b) as i64)),
        BinOp::Ge => return Some(Expr::IntImm((a >= b) as i64)),
        BinOp::Mod | BinOp::And | BinOp::Or => return None,
    };
    Some(Expr::FloatImm(v))
}

/// Split `e` into `(base, literal offset)` when it has the shape
/// `base + c` or `base - c` with a literal `c`.
fn as_offset(e: &Expr) -> Option<(&Expr, i64)> {
    if let Expr::Binary(op @ (BinOp::Add | BinOp::Sub), a, b) = e {
        if let Expr::IntImm(c) = **b {
            let off = if *op == BinOp::Add { c } else { -c };
            return Some((a, off));
        }
    }
    None
}

fn simplify_binary(op: BinOp, a: Expr, b: Expr) -> Expr {
    if let (Expr::IntImm(x), Expr::IntImm(y)) = (&a, &b) {
        if let Some(v) = fold_int(op, *x, *y) {
            return Expr::IntImm(v);
        }
    }
    if let (Expr::FloatImm(x), Expr::FloatImm(y)) = (&a, &b) {
        if let Some(e) = fold_float(op, *x, *y) {
            return e;
        }
    }

    match op {
        BinOp::Add => {
            if a.as_int() == Some(0) {
                return b;
            }
            if b.as_int() == Some(0) {
                return a;
            }
            // Move literals to the right: c + x => x + c
            if a.as_int().is_some() && b.as_int().is_none() {
                return simplify_binary(BinOp::Add, b, a);
            }
            // (x + c1) + c2 => x + (c1 + c2)
            if let (Some((base, off)), Some(c)) = (as_offset(&a), b.as_int()) {
                return simplify_binary(BinOp::Add, base.clone(), Expr::IntImm(off + c));
            }
        }
        BinOp::Sub => {
            if b.as_int() == Some(0) {
                return a;
            }
            if a == b {
                return Expr::IntImm(0);
            }
            // (x + c1) - c2 => x + (c1 - c2)
            if let (Some((base, off)), Some(c)) = (as_offset(&a), b.as_int()) {
                return simplify_binary(BinOp::Add, base.clone(), Expr::IntImm(off - c));
            }
        }
        BinOp::Mul => {
            if a.as_int() == Some(0) || b.as_int() == Some(0) {
                return Expr::IntImm(0);
            }
            if a.as_int() == Some(1) {
                return b;
            }
            if b.as_int() == Some(1) {
                return a;
            }
        }
        BinOp::Div => {
            if b.as_int() == Some(1) {
                return a;
            }
        }
        BinOp::Min | BinOp::Max => {
            if a == b {
                return a;
            }
            // min(x + c1, x + c2) has a literal answer for a common base
            if let (Some((ba, oa)), Some((bb, ob))) = (as_offset(&a), as_offset(&b)) {
                if ba == bb {
                    let off = if op == BinOp::Min {
                        oa.min(ob)
                    } else {
                        oa.max(ob)
                    };
                    return simplify_binary(BinOp::Add, ba.clone(), Expr::IntImm(off));
                }
            }
        }
        _ => {}
    }

    Expr::Binary(op, Box::new(a), Box::new(b))
}

/// Simplify an expression. Idempotent; never changes the value of the
/// expression under any variable assignment.
pub fn simplify(e: &Expr) -> Expr {
    match e {
        Expr::IntImm(_) | Expr::FloatImm(_) | Expr::Var(_) => e.clone(),
        Expr::Cast(ty, inner) => {
            let inner = simplify(inner);
            match (&inner, ty) {
                // Integer-to-integer casts keep the literal value; the cost
                // model does not track overflow wrapping.
                (Expr::IntImm(v), t) if t.bytes() >= 4 && !t.is_float() => Expr::IntImm(*v),
                (Expr::IntImm(v), t) if t.is_float() => Expr::FloatImm(*v as f64),
                _ => Expr::Cast(*ty, Box::new(inner)),
            }
        }
        Expr::Binary(op, a, b) => simplify_binary(*op, simplify(a), simplify(b)),
        Expr::Not(inner) => {
            let inner = simplify(inner);
            match inner.as_int() {
                Some(v) => Expr::IntImm((v == 0) as i64),
                None => Expr::Not(Box::new(inner)),
            }
        }
        Expr::Select(c, t, f) => {
            let c = simplify(c);
            let t = simplify(t);
            let f = simplify(f);
            match c.as_int() {
                Some(0) => f,
                Some(_) => t,
                None => {
                    if t == f {
                        t
                    } else {
                        Expr::Select(Box::new(c), Box::new(t), Box::new(f))
                    }
                }
            }
        }
        Expr::Call(call) => {
            let mut call = call.clone();
            call.args = call.args.iter().map(simplify).collect();
            Expr::Call(call)
        }
        Expr::Let(name, v, b) => {
            let v = simplify(v);
            let b = simplify(b);
            // A literal binding can be substituted away
            if matches!(v, Expr::IntImm(_) | Expr::FloatImm(_)) {
                simplify(&crate::expr::substitute(&b, name, &v))
            } else {
                Expr::Let(name.clone(), Box::new(v), Box::new(b))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::Expr;

    #[test]
    fn test_constant_folding() {
        let e = Expr::int(2) + Expr::int(3);
        assert_eq!(simplify(&e), Expr::int(5));

        let e = Expr::max(Expr::int(99), Expr::int(100));
        assert_eq!(simplify(&e), Expr::int(100));
    }

    #[test]
    fn test_identities() {
        let e = Expr::var("x") + Expr::int(0);
        assert_eq!(simplify(&e), Expr::var("x"));

        let e = Expr::var("x") * Expr::int(0);
        assert_eq!(simplify(&e), Expr::int(0));

        let e = Expr::var("x") * Expr::int(1);
        assert_eq!(simplify(&e), Expr::var("x"));
    }

    #[test]
    fn test_offset_chains() {
        // (x + 1) + 99 => x + 100
        let e = (Expr::var("x") + Expr::int(1)) + Expr::int(99);
        assert_eq!(simplify(&e), Expr::var("x") + Expr::int(100));

        // (x + 5) - 5 => x
        let e = (Expr::var("x") + Expr::int(5)) - Expr::int(5);
        assert_eq!(simplify(&e), Expr::var("x"));
    }

    #[test]
    fn test_min_max_common_base() {
        let a = Expr::var("x") + Expr::int(2);
        let b = Expr::var("x") + Expr::int(7);
        assert_eq!(
            simplify(&Expr::min(a.clone(), b.clone())),
            Expr::var("x") + Expr::int(2)
        );
        assert_eq!(simplify(&Expr::max(a, b)), Expr::var("x") + Expr::int(7));
    }

    #[test]
    fn test_select_folds() {
        let e = Expr::Select(
            Box::new(Expr::int(1)),
            Box::new(Expr::var("a")),
            Box::new(Expr::var("b")),
        );
        assert_eq!(simplify(&e), Expr::var("a"));
    }

    #[test]
    fn test_floor_div() {
        assert_eq!(floor_div(-1, 4), -1);
        assert_eq!(floor_div(7, 4), 1);
        assert_eq!(floor_mod(-1, 4), 3);
    }
}

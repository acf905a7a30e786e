//! Scalar expression IR for pipeline stage definitions.
//!
//! Every stage of a pipeline function is defined by pure scalar expressions
//! over its loop variables. The scheduler never executes these expressions;
//! it only walks them to count operations, find cross-stage references and
//! propagate interval bounds. The expression grammar is a closed sum type so
//! that every visitor in the crate is an exhaustive match: adding a node kind
//! forces every analysis to handle it at compile time.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops;

/// Scalar element type of an expression or a function output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ScalarType {
    /// Unsigned 8-bit integer
    UInt8,
    /// Unsigned 16-bit integer
    UInt16,
    /// Signed 32-bit integer
    Int32,
    /// Signed 64-bit integer
    Int64,
    /// 32-bit float
    Float32,
    /// 64-bit float
    Float64,
}

impl ScalarType {
    /// Width of one element in bytes. Used both for load costing and for
    /// region/working-set sizes.
    pub fn bytes(self) -> i64 {
        match self {
            ScalarType::UInt8 => 1,
            ScalarType::UInt16 => 2,
            ScalarType::Int32 | ScalarType::Float32 => 4,
            ScalarType::Int64 | ScalarType::Float64 => 8,
        }
    }

    /// Whether this is a floating-point type.
    pub fn is_float(self) -> bool {
        matches!(self, ScalarType::Float32 | ScalarType::Float64)
    }
}

/// Binary operator kinds. Arithmetic, comparison and logical operators all
/// cost one unit in the cost model, so they share a single node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[allow(missing_docs)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Min,
    Max,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

/// What a `Call` node refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CallKind {
    /// A reference to another pipeline function (or an earlier stage of the
    /// same function).
    Pipeline,
    /// A load from an external input image.
    Image,
    /// An opaque external routine with no visibility into its cost.
    Extern,
    /// A cheap built-in (abs, sqrt, ...).
    Intrinsic,
}

/// A call site: `name(args...)` producing a value of type `ty`.
#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    /// Callee name (pipeline function, image or extern symbol)
    pub name: String,
    /// What kind of callee this is
    pub kind: CallKind,
    /// Result element type
    pub ty: ScalarType,
    /// Coordinate/argument expressions
    pub args: Vec<Expr>,
}

/// A scalar expression tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Integer literal
    IntImm(i64),
    /// Float literal
    FloatImm(f64),
    /// Named variable (loop dimension or let binding)
    Var(String),
    /// Type conversion
    Cast(ScalarType, Box<Expr>),
    /// Binary operation
    Binary(BinOp, Box<Expr>, Box<Expr>),
    /// Logical negation
    Not(Box<Expr>),
    /// `select(cond, then, else)`
    Select(Box<Expr>, Box<Expr>, Box<Expr>),
    /// Reference to a function, image or extern routine
    Call(Call),
    /// `let name = value in body`
    Let(String, Box<Expr>, Box<Expr>),
}

impl Expr {
    /// A named variable.
    pub fn var(name: impl Into<String>) -> Expr {
        Expr::Var(name.into())
    }

    /// Integer literal shorthand.
    pub fn int(v: i64) -> Expr {
        Expr::IntImm(v)
    }

    /// The literal integer value, if this is one.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Expr::IntImm(v) => Some(*v),
            _ => None,
        }
    }

    /// `min(a, b)`
    pub fn min(a: Expr, b: Expr) -> Expr {
        Expr::Binary(BinOp::Min, Box::new(a), Box::new(b))
    }

    /// `max(a, b)`
    pub fn max(a: Expr, b: Expr) -> Expr {
        Expr::Binary(BinOp::Max, Box::new(a), Box::new(b))
    }

    /// A reference to another pipeline function at the given coordinates.
    pub fn call(name: impl Into<String>, ty: ScalarType, args: Vec<Expr>) -> Expr {
        Expr::Call(Call {
            name: name.into(),
            kind: CallKind::Pipeline,
            ty,
            args,
        })
    }

    /// A load from an external input image.
    pub fn image(name: impl Into<String>, ty: ScalarType, args: Vec<Expr>) -> Expr {
        Expr::Call(Call {
            name: name.into(),
            kind: CallKind::Image,
            ty,
            args,
        })
    }

    /// An opaque extern call.
    pub fn extern_call(name: impl Into<String>, ty: ScalarType, args: Vec<Expr>) -> Expr {
        Expr::Call(Call {
            name: name.into(),
            kind: CallKind::Extern,
            ty,
            args,
        })
    }
}

impl ops::Add for Expr {
    type Output = Expr;
    fn add(self, rhs: Expr) -> Expr {
        Expr::Binary(BinOp::Add, Box::new(self), Box::new(rhs))
    }
}

impl ops::Sub for Expr {
    type Output = Expr;
    fn sub(self, rhs: Expr) -> Expr {
        Expr::Binary(BinOp::Sub, Box::new(self), Box::new(rhs))
    }
}

impl ops::Mul for Expr {
    type Output = Expr;
    fn mul(self, rhs: Expr) -> Expr {
        Expr::Binary(BinOp::Mul, Box::new(self), Box::new(rhs))
    }
}

impl ops::Div for Expr {
    type Output = Expr;
    fn div(self, rhs: Expr) -> Expr {
        Expr::Binary(BinOp::Div, Box::new(self), Box::new(rhs))
    }
}

impl fmt::Display for BinOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Mod => "%",
            BinOp::Min => "min",
            BinOp::Max => "max",
            BinOp::Eq => "==",
            BinOp::Ne => "!=",
            BinOp::Lt => "<",
            BinOp::Le => "<=",
            BinOp::Gt => ">",
            BinOp::Ge => ">=",
            BinOp::And => "&&",
            BinOp::Or => "||",
        };
        write!(f, "{}", s)
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::IntImm(v) => write!(f, "{}", v),
            Expr::FloatImm(v) => write!(f, "{}", v),
            Expr::Var(name) => write!(f, "{}", name),
            Expr::Cast(ty, e) => write!(f, "{:?}({})", ty, e),
            Expr::Binary(op @ (BinOp::Min | BinOp::Max), a, b) => {
                write!(f, "{}({}, {})", op, a, b)
            }
            Expr::Binary(op, a, b) => write!(f, "({} {} {})", a, op, b),
            Expr::Not(e) => write!(f, "!({})", e),
            Expr::Select(c, t, e) => write!(f, "select({}, {}, {})", c, t, e),
            Expr::Call(call) => {
                write!(f, "{}(", call.name)?;
                for (i, a) in call.args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", a)?;
                }
                write!(f, ")")
            }
            Expr::Let(name, v, b) => write!(f, "(let {} = {} in {})", name, v, b),
        }
    }
}

/// Collect the names of every pipeline function and image referenced by an
/// expression, including references nested inside call arguments.
pub fn find_calls(e: &Expr) -> std::collections::BTreeSet<String> {
    let mut calls = std::collections::BTreeSet::new();
    collect_calls(e, &mut calls);
    calls
}

fn collect_calls(e: &Expr, out: &mut std::collections::BTreeSet<String>) {
    match e {
        Expr::IntImm(_) | Expr::FloatImm(_) | Expr::Var(_) => {}
        Expr::Cast(_, inner) | Expr::Not(inner) => collect_calls(inner, out),
        Expr::Binary(_, a, b) => {
            collect_calls(a, out);
            collect_calls(b, out);
        }
        Expr::Select(c, t, f) => {
            collect_calls(c, out);
            collect_calls(t, out);
            collect_calls(f, out);
        }
        Expr::Call(call) => {
            if matches!(call.kind, CallKind::Pipeline | CallKind::Image) {
                out.insert(call.name.clone());
            }
            for a in &call.args {
                collect_calls(a, out);
            }
        }
        Expr::Let(_, v, b) => {
            collect_calls(v, out);
            collect_calls(b, out);
        }
    }
}

/// Collect the element types of every external image referenced by an
/// expression.
pub fn find_image_types(e: &Expr, out: &mut std::collections::BTreeMap<String, ScalarType>) {
    match e {
        Expr::IntImm(_) | Expr::FloatImm(_) | Expr::Var(_) => {}
        Expr::Cast(_, inner) | Expr::Not(inner) => find_image_types(inner, out),
        Expr::Binary(_, a, b) => {
            find_image_types(a, out);
            find_image_types(b, out);
        }
        Expr::Select(c, t, f) => {
            find_image_types(c, out);
            find_image_types(t, out);
            find_image_types(f, out);
        }
        Expr::Call(call) => {
            if call.kind == CallKind::Image {
                out.insert(call.name.clone(), call.ty);
            }
            for a in &call.args {
                find_image_types(a, out);
            }
        }
        Expr::Let(_, v, b) => {
            find_image_types(v, out);
            find_image_types(b, out);
        }
    }
}

/// Replace every occurrence of variable `var` with `replacement`.
///
/// A `Let` that rebinds `var` shadows it: the let value is still substituted
/// but the body is left alone.
pub fn substitute(e: &Expr, var: &str, replacement: &Expr) -> Expr {
    match e {
        Expr::IntImm(_) | Expr::FloatImm(_) => e.clone(),
        Expr::Var(name) => {
            if name == var {
                replacement.clone()
            } else {
                e.clone()
            }
        }
        Expr::Cast(ty, inner) => Expr::Cast(*ty, Box::new(substitute(inner, var, replacement))),
        Expr::Binary(op, a, b) => Expr::Binary(
            *op,
            Box::new(substitute(a, var, replacement)),
            Box::new(substitute(b, var, replacement)),
        ),
        Expr::Not(inner) => Expr::Not(Box::new(substitute(inner, var, replacement))),
        Expr::Select(c, t, f) => Expr::Select(
            Box::new(substitute(c, var, replacement)),
            Box::new(substitute(t, var, replacement)),
            Box::new(substitute(f, var, replacement)),
        ),
        Expr::Call(call) => Expr::Call(Call {
            name: call.name.clone(),
            kind: call.kind,
            ty: call.ty,
            args: call
                .args
                .iter()
                .map(|a| substitute(a, var, replacement))
                .collect(),
        }),
        Expr::Let(name, v, b) => {
            let new_value = substitute(v, var, replacement);
            if name == var {
                Expr::Let(name.clone(), Box::new(new_value), b.clone())
            } else {
                Expr::Let(
                    name.clone(),
                    Box::new(new_value),
                    Box::new(substitute(b, var, replacement)),
                )
            }
        }
    }
}

/// Inline every call to the pure single-value function `f` by substituting
/// its definition body, with the call's coordinate expressions substituted
/// for the function's pure arguments. Call arguments are inlined first so
/// nested references are handled bottom-up.
pub fn inline_function(e: &Expr, f: &crate::pipeline::Function) -> Expr {
    assert!(
        f.is_pure() && f.init.values.len() == 1,
        "can only inline pure single-value functions, got {}",
        f.name
    );
    match e {
        Expr::IntImm(_) | Expr::FloatImm(_) | Expr::Var(_) => e.clone(),
        Expr::Cast(ty, inner) => Expr::Cast(*ty, Box::new(inline_function(inner, f))),
        Expr::Binary(op, a, b) => Expr::Binary(
            *op,
            Box::new(inline_function(a, f)),
            Box::new(inline_function(b, f)),
        ),
        Expr::Not(inner) => Expr::Not(Box::new(inline_function(inner, f))),
        Expr::Select(c, t, fe) => Expr::Select(
            Box::new(inline_function(c, f)),
            Box::new(inline_function(t, f)),
            Box::new(inline_function(fe, f)),
        ),
        Expr::Call(call) => {
            let args: Vec<Expr> = call.args.iter().map(|a| inline_function(a, f)).collect();
            if call.kind == CallKind::Pipeline && call.name == f.name {
                assert_eq!(
                    args.len(),
                    f.args.len(),
                    "call to {} has wrong arity",
                    f.name
                );
                let mut body = f.init.values[0].clone();
                for (param, arg) in f.args.iter().zip(args.iter()) {
                    body = substitute(&body, param, arg);
                }
                body
            } else {
                Expr::Call(Call {
                    name: call.name.clone(),
                    kind: call.kind,
                    ty: call.ty,
                    args,
                })
            }
        }
        Expr::Let(name, v, b) => Expr::Let(
            name.clone(),
            Box::new(inline_function(v, f)),
            Box::new(inline_function(b, f)),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::Function;

    #[test]
    fn test_find_calls() {
        // A(x) + in(x + 1) + ext(x)
        let e = Expr::call("A", ScalarType::Int32, vec![Expr::var("x")])
            + Expr::image("in", ScalarType::UInt8, vec![Expr::var("x") + Expr::int(1)])
            + Expr::extern_call("ext", ScalarType::Int32, vec![Expr::var("x")]);
        let calls = find_calls(&e);
        assert!(calls.contains("A"));
        assert!(calls.contains("in"));
        // Extern symbols are not pipeline references
        assert!(!calls.contains("ext"));
    }

    #[test]
    fn test_substitute_shadowing() {
        let e = Expr::Let(
            "x".to_string(),
            Box::new(Expr::var("x") + Expr::int(1)),
            Box::new(Expr::var("x")),
        );
        let s = substitute(&e, "x", &Expr::int(5));
        // The let value sees the outer x, the body keeps the binding
        match s {
            Expr::Let(_, v, b) => {
                assert_eq!(*v, Expr::int(5) + Expr::int(1));
                assert_eq!(*b, Expr::var("x"));
            }
            other => panic!("expected let, got {:?}", other),
        }
    }

    #[test]
    fn test_inline_function() {
        let a = Function::pure(
            "A",
            &["x"],
            Expr::var("x") * Expr::int(2),
            ScalarType::Int32,
        );
        let e = Expr::call("A", ScalarType::Int32, vec![Expr::var("y") + Expr::int(1)]);
        let inlined = inline_function(&e, &a);
        assert_eq!(inlined, (Expr::var("y") + Expr::int(1)) * Expr::int(2));
    }
}

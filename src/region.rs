//! Intervals, regions and bound contexts.
//!
//! A `Region` is the axis-aligned multi-dimensional interval of a function's
//! coordinates that must be computed or read; dimension order follows the
//! function's loop-dimension list. Bounds are symbolic expressions: an
//! extent is only known when both endpoints fold to integer literals, and
//! everything downstream of an unknown extent (areas, costs, sizes) is
//! `None` rather than a guessed number.

use crate::expr::Expr;
use crate::simplify::simplify;
use std::collections::BTreeMap;
use std::fmt;

/// A closed symbolic interval `[min, max]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Interval {
    /// Lower bound (inclusive)
    pub min: Expr,
    /// Upper bound (inclusive)
    pub max: Expr,
}

impl Interval {
    /// Interval with the given symbolic endpoints.
    pub fn new(min: Expr, max: Expr) -> Interval {
        Interval { min, max }
    }

    /// Degenerate interval holding a single value.
    pub fn point(e: Expr) -> Interval {
        Interval {
            min: e.clone(),
            max: e,
        }
    }

    /// Literal integer interval `[min, max]`.
    pub fn literal(min: i64, max: i64) -> Interval {
        Interval {
            min: Expr::IntImm(min),
            max: Expr::IntImm(max),
        }
    }

    /// Number of points in the interval: `max - min + 1` when both bounds
    /// are integer literals (0 when they cross), `None` when either bound is
    /// still symbolic.
    pub fn extent(&self) -> Option<i64> {
        match (self.min.as_int(), self.max.as_int()) {
            (Some(lo), Some(hi)) => {
                if lo <= hi {
                    Some(hi - lo + 1)
                } else {
                    Some(0)
                }
            }
            _ => None,
        }
    }

    /// Widen in place to cover `other`: `[min(min), max(max)]`.
    pub fn merge(&mut self, other: &Interval) {
        self.min = simplify(&Expr::min(self.min.clone(), other.min.clone()));
        self.max = simplify(&Expr::max(self.max.clone(), other.max.clone()));
    }

    /// Intersection: `[max(min), min(max)]`. May be empty.
    pub fn intersect(&self, other: &Interval) -> Interval {
        Interval {
            min: simplify(&Expr::max(self.min.clone(), other.min.clone())),
            max: simplify(&Expr::min(self.max.clone(), other.max.clone())),
        }
    }

    /// Simplify both endpoints.
    pub fn simplified(&self) -> Interval {
        Interval {
            min: simplify(&self.min),
            max: simplify(&self.max),
        }
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.min, self.max)
    }
}

/// An ordered sequence of intervals, one per dimension.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Region(
    /// Per-dimension intervals, in the function's dimension order
    pub Vec<Interval>,
);

impl Region {
    /// The empty (zero-dimensional) region.
    pub fn new() -> Region {
        Region(Vec::new())
    }

    /// Append a dimension.
    pub fn push(&mut self, i: Interval) {
        self.0.push(i);
    }

    /// Number of dimensions.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the region has no dimensions.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of elements covered: the product of per-dimension extents.
    /// `Some(0)` as soon as any dimension is empty; `None` when any extent
    /// is unknown (unknown-ness propagates up through the product).
    pub fn area(&self) -> Option<i64> {
        let mut area: i64 = 1;
        let mut unknown = false;
        for i in &self.0 {
            match i.extent() {
                Some(0) => return Some(0),
                Some(e) => area = area.saturating_mul(e),
                None => unknown = true,
            }
        }
        if unknown {
            None
        } else {
            Some(area)
        }
    }

    /// Widen in place to cover `other`, dimension by dimension. The two
    /// regions must describe the same function and therefore have the same
    /// dimensionality.
    pub fn merge(&mut self, other: &Region) {
        assert_eq!(
            self.len(),
            other.len(),
            "merging regions of mismatched dimensionality"
        );
        for (a, b) in self.0.iter_mut().zip(other.0.iter()) {
            a.merge(b);
        }
    }

    /// Simplify every bound in place.
    pub fn simplify(&mut self) {
        for i in &mut self.0 {
            *i = i.simplified();
        }
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, iv) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, " x ")?;
            }
            write!(f, "{}", iv)?;
        }
        write!(f, "}}")
    }
}

/// Bound context: dimension-variable name to interval. Threaded through
/// every dependence query; must contain an entry for every pure argument and
/// every reduction variable of the stage being queried.
pub type DimBounds = BTreeMap<String, Interval>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extent_literal() {
        assert_eq!(Interval::literal(0, 99).extent(), Some(100));
        assert_eq!(Interval::literal(5, 5).extent(), Some(1));
        // Crossed bounds are an empty interval
        assert_eq!(Interval::literal(10, 3).extent(), Some(0));
    }

    #[test]
    fn test_extent_symbolic() {
        let i = Interval::new(Expr::int(0), Expr::var("n"));
        assert_eq!(i.extent(), None);
    }

    #[test]
    fn test_area() {
        let mut r = Region::new();
        r.push(Interval::literal(0, 9));
        r.push(Interval::literal(0, 4));
        assert_eq!(r.area(), Some(50));
    }

    #[test]
    fn test_area_empty_dim_wins() {
        // An empty dimension makes the area 0 even with an unknown dimension
        let mut r = Region::new();
        r.push(Interval::new(Expr::int(0), Expr::var("n")));
        r.push(Interval::literal(3, 2));
        assert_eq!(r.area(), Some(0));
    }

    #[test]
    fn test_area_unknown_propagates() {
        let mut r = Region::new();
        r.push(Interval::literal(0, 9));
        r.push(Interval::new(Expr::int(0), Expr::var("n")));
        assert_eq!(r.area(), None);
    }

    #[test]
    fn test_merge() {
        let mut a = Interval::literal(0, 99);
        a.merge(&Interval::literal(1, 100));
        assert_eq!(a, Interval::literal(0, 100));
    }

    #[test]
    fn test_intersect() {
        let a = Interval::literal(0, 99);
        let b = Interval::literal(50, 150);
        assert_eq!(a.intersect(&b), Interval::literal(50, 99));
    }
}

//! Static cost model for pipeline stages and regions.
//!
//! Built once from the static pipeline: every stage gets a per-element
//! (operation count, bytes loaded) pair from an exhaustive walk of its
//! expressions. Region costs multiply per-element costs by region areas;
//! anything with an unknown area yields `None`, and `None` propagates
//! through every aggregate so an indeterminate cost can never be mistaken
//! for a valid one.

use crate::expr::{find_image_types, inline_function, BinOp, CallKind, Expr, ScalarType};
use crate::pipeline::{Function, Pipeline};
use crate::region::{DimBounds, Interval, Region};
use crate::simplify::simplify;
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Per-element cost of evaluating one stage: arithmetic operations and
/// bytes loaded from other stages or images.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StageCost {
    /// Arithmetic/comparison/logical operation count
    pub ops: i64,
    /// Bytes loaded per element
    pub loads: i64,
}

impl StageCost {
    fn add(self, other: StageCost) -> StageCost {
        StageCost {
            ops: self.ops + other.ops,
            loads: self.loads + other.loads,
        }
    }

    fn scale(self, factor: i64) -> StageCost {
        StageCost {
            ops: self.ops * factor,
            loads: self.loads * factor,
        }
    }
}

/// Cost of one opaque extern call. Large, so stages containing extern work
/// resist inlining and fusion under the benefit policy.
pub const EXTERN_CALL_COST: i64 = 999;

/// The static cost model. Borrows the immutable pipeline; per-stage costs
/// and the image-input type table are precomputed at construction.
pub struct CostModel<'a> {
    pipeline: &'a Pipeline,
    func_cost: BTreeMap<String, Vec<StageCost>>,
    inputs: BTreeMap<String, ScalarType>,
}

/// Cost of a single expression tree. Literals and variables are free; every
/// operator costs one unit; references to stages and images cost their
/// element byte width as a load; extern calls cost [`EXTERN_CALL_COST`] ops.
pub fn expr_cost(e: &Expr) -> StageCost {
    match e {
        Expr::IntImm(_) | Expr::FloatImm(_) | Expr::Var(_) => StageCost::default(),
        Expr::Cast(_, inner) => expr_cost(inner).add(StageCost { ops: 1, loads: 0 }),
        Expr::Binary(op, a, b) => {
            // All binary operators cost one unit; the match is spelled out
            // so a new operator kind must pick a cost here.
            let op_cost = match op {
                BinOp::Add
                | BinOp::Sub
                | BinOp::Mul
                | BinOp::Div
                | BinOp::Mod
                | BinOp::Min
                | BinOp::Max
                | BinOp::Eq
                | BinOp::Ne
                | BinOp::Lt
                | BinOp::Le
                | BinOp::Gt
                | BinOp::Ge
                | BinOp::And
                | BinOp::Or => 1,
            };
            expr_cost(a).add(expr_cost(b)).add(StageCost {
                ops: op_cost,
                loads: 0,
            })
        }
        Expr::Not(inner) => expr_cost(inner).add(StageCost { ops: 1, loads: 0 }),
        Expr::Select(c, t, f) => expr_cost(c)
            .add(expr_cost(t))
            .add(expr_cost(f))
            .add(StageCost { ops: 1, loads: 0 }),
        Expr::Call(call) => {
            let own = match call.kind {
                CallKind::Pipeline | CallKind::Image => StageCost {
                    ops: 0,
                    loads: call.ty.bytes(),
                },
                CallKind::Extern => StageCost {
                    ops: EXTERN_CALL_COST,
                    loads: 0,
                },
                CallKind::Intrinsic => StageCost { ops: 1, loads: 0 },
            };
            call.args
                .iter()
                .fold(own, |acc, a| acc.add(expr_cost(a)))
        }
        Expr::Let(_, v, b) => expr_cost(v).add(expr_cost(b)),
    }
}

impl<'a> CostModel<'a> {
    /// Precompute per-stage costs for every function and collect the image
    /// input types.
    pub fn new(pipeline: &'a Pipeline) -> CostModel<'a> {
        let mut func_cost = BTreeMap::new();
        let mut inputs = BTreeMap::new();
        for f in pipeline.functions() {
            let costs = compute_func_cost(pipeline, f, &BTreeSet::new());
            for (stage, c) in costs.iter().enumerate() {
                debug!(
                    "cost {}.{}: {} ops, {} load bytes per element",
                    f.name, stage, c.ops, c.loads
                );
            }
            func_cost.insert(f.name.clone(), costs);
            for d in std::iter::once(&f.init).chain(f.updates.iter()) {
                for e in d.values.iter().chain(d.args.iter()) {
                    find_image_types(e, &mut inputs);
                }
            }
        }
        CostModel {
            pipeline,
            func_cost,
            inputs,
        }
    }

    /// Per-stage (ops, loads) pairs for a function, optionally after
    /// transitively inlining the pure functions named in `inlines`.
    pub fn func_cost(&self, func: &str, inlines: &BTreeSet<String>) -> Vec<StageCost> {
        if inlines.is_empty() {
            self.func_cost
                .get(func)
                .unwrap_or_else(|| panic!("no precomputed cost for {}", func))
                .clone()
        } else {
            compute_func_cost(self.pipeline, self.pipeline.function(func), inlines)
        }
    }

    /// Cost of computing one stage of `func` over `region`. The region
    /// spans the function's pure arguments; reduction variables use their
    /// own declared extents. `None` when the stage box area is unknown.
    pub fn stage_region_cost(
        &self,
        func: &str,
        stage: u32,
        region: &Region,
        inlines: &BTreeSet<String>,
    ) -> Option<StageCost> {
        let f = self.pipeline.function(func);
        let def = f.definition(stage);

        // Pure-variable domains are assumed identical across update stages;
        // this can overestimate update costs.
        let mut bounds = DimBounds::new();
        assert_eq!(
            region.len(),
            f.args.len(),
            "region for {} has wrong dimensionality",
            func
        );
        for (arg, iv) in f.args.iter().zip(region.0.iter()) {
            bounds.insert(arg.clone(), iv.clone());
        }
        for rvar in &def.rvars {
            bounds.insert(
                rvar.var.clone(),
                Interval::new(
                    simplify(&rvar.min),
                    simplify(&(rvar.min.clone() + rvar.extent.clone() - Expr::int(1))),
                ),
            );
        }

        let mut stage_box = Region::new();
        for dim in &def.dims {
            let iv = bounds
                .get(dim)
                .unwrap_or_else(|| panic!("dimension {} of {}.{} has no bound", dim, func, stage));
            stage_box.push(iv.clone());
        }

        let area = stage_box.area()?;
        let costs = self.func_cost(func, inlines);
        Some(costs[stage as usize].scale(area))
    }

    /// Cost of computing every stage of `func` over `region`; `None` if any
    /// stage is indeterminate.
    pub fn region_cost(
        &self,
        func: &str,
        region: &Region,
        inlines: &BTreeSet<String>,
    ) -> Option<StageCost> {
        let f = self.pipeline.function(func);
        let mut total = StageCost::default();
        for s in 0..f.num_stages() {
            total = total.add(self.stage_region_cost(func, s, region, inlines)?);
        }
        Some(total)
    }

    /// Cost of a multi-function region. Pure functions absorbed by inlining
    /// are skipped: their cost is already counted at the inlining call
    /// sites.
    pub fn total_region_cost(
        &self,
        regions: &BTreeMap<String, Region>,
        inlines: &BTreeSet<String>,
    ) -> Option<StageCost> {
        let mut total = StageCost::default();
        for (name, region) in regions {
            if inlines.contains(name) && self.pipeline.function(name).is_pure() {
                continue;
            }
            total = total.add(self.region_cost(name, region, inlines)?);
        }
        Some(total)
    }

    /// Bytes occupied by a region of one function.
    pub fn region_size(&self, func: &str, region: &Region) -> Option<i64> {
        let area = region.area()?;
        Some(area * self.pipeline.function(func).value_size())
    }

    /// Peak bytes live while realizing a set of regions in producer-first
    /// order: a streaming high-water-mark simulation. Each producer's
    /// allocation is released once its last consumer within the set has
    /// been realized; inlined members occupy no storage.
    pub fn working_set_size(
        &self,
        regions: &BTreeMap<String, Region>,
        inlined: &BTreeSet<String>,
    ) -> Option<i64> {
        let mut num_consumers: BTreeMap<&str, i64> =
            regions.keys().map(|n| (n.as_str(), 0)).collect();
        for name in regions.keys() {
            for p in self.pipeline.find_direct_calls(name) {
                if let Some(c) = num_consumers.get_mut(p.as_str()) {
                    *c += 1;
                }
            }
        }

        let mut sizes: BTreeMap<&str, i64> = BTreeMap::new();
        for (name, region) in regions {
            let size = if inlined.contains(name) {
                0
            } else {
                self.region_size(name, region)?
            };
            sizes.insert(name, size);
        }

        let mut working_set = 0i64;
        let mut live = 0i64;
        for name in self.pipeline.realization_order() {
            if !regions.contains_key(&name) {
                continue;
            }
            live += sizes[name.as_str()];
            working_set = working_set.max(live);
            for p in self.pipeline.find_direct_calls(&name) {
                if let Some(c) = num_consumers.get_mut(p.as_str()) {
                    *c -= 1;
                    if *c == 0 {
                        live -= sizes[p.as_str()];
                        assert!(live >= 0, "working-set simulation freed too much");
                    }
                }
            }
        }
        Some(working_set)
    }

    /// Bytes occupied by a region of one external input image.
    pub fn input_region_size(&self, input: &str, region: &Region) -> Option<i64> {
        let area = region.area()?;
        let ty = self
            .inputs
            .get(input)
            .unwrap_or_else(|| panic!("{} is not a known image input", input));
        Some(area * ty.bytes())
    }

    /// Total bytes across a set of input-image regions.
    pub fn total_input_size(&self, regions: &BTreeMap<String, Region>) -> Option<i64> {
        let mut total = 0;
        for (name, region) in regions {
            total += self.input_region_size(name, region)?;
        }
        Some(total)
    }
}

/// Per-stage costs of a function, inlining pure callees from `inlines`
/// first. Inlining loops until no call into the set remains, so transitive
/// chains of pure producers collapse completely.
fn compute_func_cost(
    pipeline: &Pipeline,
    f: &Function,
    inlines: &BTreeSet<String>,
) -> Vec<StageCost> {
    let cost_of = |e: &Expr| expr_cost(&perform_inline(pipeline, e, inlines));

    let mut costs = Vec::with_capacity(f.num_stages() as usize);
    let mut init_cost = StageCost::default();
    for v in &f.init.values {
        init_cost = init_cost.add(cost_of(v));
    }
    costs.push(init_cost);

    for u in &f.updates {
        let mut c = StageCost::default();
        for v in &u.values {
            c = c.add(cost_of(v));
        }
        for a in &u.args {
            c = c.add(cost_of(a));
        }
        costs.push(c);
    }
    costs
}

/// Repeatedly inline calls to pure single-value functions in `inlines`
/// until the expression no longer references any of them.
pub fn perform_inline(pipeline: &Pipeline, e: &Expr, inlines: &BTreeSet<String>) -> Expr {
    if inlines.is_empty() {
        return e.clone();
    }
    let mut expr = e.clone();
    loop {
        let calls = crate::expr::find_calls(&expr);
        let target = calls.into_iter().find(|c| {
            inlines.contains(c)
                && pipeline.contains(c)
                && pipeline.function(c).is_pure()
                && pipeline.function(c).init.values.len() == 1
        });
        match target {
            Some(name) => expr = inline_function(&expr, pipeline.function(&name)),
            None => break,
        }
    }
    expr
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::Function;

    fn simple_pipeline() -> Pipeline {
        // A(x) = x * 2; B(x) = A(x) + A(x + 1)
        let a = Function::pure(
            "A",
            &["x"],
            Expr::var("x") * Expr::int(2),
            ScalarType::Int32,
        );
        let b = Function::pure(
            "B",
            &["x"],
            Expr::call("A", ScalarType::Int32, vec![Expr::var("x")])
                + Expr::call("A", ScalarType::Int32, vec![Expr::var("x") + Expr::int(1)]),
            ScalarType::Int32,
        )
        .with_estimate("x", 0, 100);
        Pipeline::new(vec![a, b], vec!["B".to_string()]).unwrap()
    }

    #[test]
    fn test_expr_cost_counts() {
        // x * 2: one op, no loads
        let c = expr_cost(&(Expr::var("x") * Expr::int(2)));
        assert_eq!(c, StageCost { ops: 1, loads: 0 });

        // A(x) + A(x+1): two 4-byte loads, two adds (one for the +1)
        let e = Expr::call("A", ScalarType::Int32, vec![Expr::var("x")])
            + Expr::call("A", ScalarType::Int32, vec![Expr::var("x") + Expr::int(1)]);
        let c = expr_cost(&e);
        assert_eq!(c, StageCost { ops: 2, loads: 8 });
    }

    #[test]
    fn test_extern_cost_monotonic() {
        let base = Expr::var("x") + Expr::int(1);
        let with_one = base.clone() + Expr::extern_call("f", ScalarType::Int32, vec![]);
        let with_two = with_one.clone() + Expr::extern_call("g", ScalarType::Int32, vec![]);

        let c0 = expr_cost(&base).ops;
        let c1 = expr_cost(&with_one).ops;
        let c2 = expr_cost(&with_two).ops;
        assert!(c1 >= c0 + EXTERN_CALL_COST);
        assert!(c2 >= c1 + EXTERN_CALL_COST);
    }

    #[test]
    fn test_func_cost_with_inlining() {
        let p = simple_pipeline();
        let cm = CostModel::new(&p);

        // Without inlining, B loads from A twice
        let plain = cm.func_cost("B", &BTreeSet::new());
        assert_eq!(plain[0].loads, 8);

        // Inlining A replaces the loads with A's arithmetic
        let mut inlines = BTreeSet::new();
        inlines.insert("A".to_string());
        let inlined = cm.func_cost("B", &inlines);
        assert_eq!(inlined[0].loads, 0);
        assert!(inlined[0].ops > plain[0].ops);
    }

    #[test]
    fn test_region_cost() {
        let p = simple_pipeline();
        let cm = CostModel::new(&p);

        let region = Region(vec![Interval::literal(0, 99)]);
        let c = cm
            .region_cost("A", &region, &BTreeSet::new())
            .expect("known area");
        // 100 elements, 1 op each
        assert_eq!(c.ops, 100);
    }

    #[test]
    fn test_unknown_region_cost_is_none() {
        let p = simple_pipeline();
        let cm = CostModel::new(&p);

        let region = Region(vec![Interval::new(Expr::int(0), Expr::var("n"))]);
        assert_eq!(cm.region_cost("A", &region, &BTreeSet::new()), None);
        assert_eq!(cm.region_size("A", &region), None);
    }

    #[test]
    fn test_working_set_frees_producers() {
        let p = simple_pipeline();
        let cm = CostModel::new(&p);

        let mut regions = BTreeMap::new();
        regions.insert("A".to_string(), Region(vec![Interval::literal(0, 100)]));
        regions.insert("B".to_string(), Region(vec![Interval::literal(0, 99)]));

        // Both live at once: 101*4 + 100*4
        let ws = cm.working_set_size(&regions, &BTreeSet::new()).unwrap();
        assert_eq!(ws, 101 * 4 + 100 * 4);

        // With A inlined it occupies nothing
        let mut inlined = BTreeSet::new();
        inlined.insert("A".to_string());
        let ws = cm.working_set_size(&regions, &inlined).unwrap();
        assert_eq!(ws, 100 * 4);
    }
}

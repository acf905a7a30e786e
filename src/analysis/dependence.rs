//! Symbolic dependence analysis across the stage graph.
//!
//! For any stage and any requested bound context, computes the exact
//! upstream regions of every producer that must be available, by a
//! breadth-first worklist over (stage, bounds) pairs driven by the bounds
//! oracle. Also quantifies cross-iteration reuse (`redundant_regions`) by
//! shifting the context one extent forward along a dimension and
//! intersecting the two region sets.

use crate::bounds::boxes_required;
use crate::expr::Expr;
use crate::pipeline::{FStage, Function, Pipeline};
use crate::region::{DimBounds, Interval, Region};
use crate::simplify::simplify;
use log::debug;
use std::collections::{BTreeMap, VecDeque};

/// Dependence analysis over an immutable pipeline.
pub struct DependenceAnalysis<'a> {
    /// The pipeline environment the analysis reads. Never mutated.
    pub pipeline: &'a Pipeline,
}

impl<'a> DependenceAnalysis<'a> {
    /// Create an analysis over `pipeline`.
    pub fn new(pipeline: &'a Pipeline) -> DependenceAnalysis<'a> {
        DependenceAnalysis { pipeline }
    }

    /// Bound context for one stage of `f`, given bounds on the pure
    /// variables: pure vars come from the caller, reduction variables from
    /// their own declared `[min, min + extent - 1]`. Using the declared
    /// rvar extents regardless of the caller's request is a deliberate
    /// over-approximation.
    pub fn stage_bounds(&self, f: &Function, stage: u32, pure_bounds: &DimBounds) -> DimBounds {
        let mut bounds = pure_bounds.clone();
        for rvar in &f.definition(stage).rvars {
            bounds.insert(
                rvar.var.clone(),
                Interval::new(
                    simplify(&rvar.min),
                    simplify(&(rvar.min.clone() + rvar.extent.clone() - Expr::int(1))),
                ),
            );
        }
        bounds
    }

    /// Bound contexts for every stage of `f`.
    pub fn all_stage_bounds(&self, f: &Function, pure_bounds: &DimBounds) -> Vec<DimBounds> {
        (0..f.num_stages())
            .map(|s| self.stage_bounds(f, s, pure_bounds))
            .collect()
    }

    /// Regions of every upstream function (and image) required to compute
    /// the given stage over `bounds`. Breadth-first worklist: each popped
    /// stage binds its loop dimensions from the current bounds, queries the
    /// bounds oracle over its value and store-coordinate expressions, and
    /// re-enqueues every referenced pipeline function once per stage with
    /// bounds derived from the box just computed. Still-symbolic bounds are
    /// replaced by the producer's declared estimates in a final pass.
    pub fn regions_required_stage(
        &self,
        stage: &FStage,
        bounds: &DimBounds,
    ) -> BTreeMap<String, Region> {
        let mut regions: BTreeMap<String, Region> = BTreeMap::new();
        let mut queue: VecDeque<(FStage, DimBounds)> = VecDeque::new();
        queue.push_back((stage.clone(), bounds.clone()));

        while let Some((s, curr_bounds)) = queue.pop_front() {
            let f = self.pipeline.function(&s.func);
            let def = f.definition(s.stage);

            let mut scope = DimBounds::new();
            for dim in &def.dims {
                let iv = curr_bounds.get(dim).unwrap_or_else(|| {
                    panic!("dimension {} of {} is missing from the bound context", dim, s)
                });
                scope.insert(dim.clone(), iv.simplified());
            }

            let mut stage_regions: BTreeMap<String, Region> = BTreeMap::new();
            for e in def.values.iter().chain(def.args.iter()) {
                for (name, reg) in boxes_required(e, &scope) {
                    match stage_regions.get_mut(&name) {
                        Some(existing) => existing.merge(&reg),
                        None => {
                            stage_regions.insert(name, reg);
                        }
                    }
                }
            }

            for (name, reg) in stage_regions {
                match regions.get_mut(&name) {
                    Some(existing) => existing.merge(&reg),
                    None => {
                        regions.insert(name.clone(), reg.clone());
                    }
                }

                // Self-references (update stages reading earlier stages of
                // the same function) do not re-enqueue.
                if name != s.func && self.pipeline.contains(&name) {
                    let prod = self.pipeline.function(&name);
                    assert_eq!(
                        reg.len(),
                        prod.args.len(),
                        "region for {} has wrong dimensionality",
                        name
                    );
                    let mut prod_pure_bounds = DimBounds::new();
                    for (arg, iv) in prod.args.iter().zip(reg.0.iter()) {
                        prod_pure_bounds.insert(arg.clone(), iv.clone());
                    }
                    for (prod_stage, prod_bounds) in self
                        .all_stage_bounds(prod, &prod_pure_bounds)
                        .into_iter()
                        .enumerate()
                    {
                        queue.push_back((FStage::new(&prod.name, prod_stage as u32), prod_bounds));
                    }
                }
            }
        }

        self.concretize(regions)
    }

    /// Replace still-symbolic bounds with the producer's declared estimate
    /// when one exists. Estimates are only attached to pipeline functions;
    /// image regions keep whatever the oracle produced.
    fn concretize(&self, regions: BTreeMap<String, Region>) -> BTreeMap<String, Region> {
        let mut out = BTreeMap::new();
        for (name, mut region) in regions {
            region.simplify();
            if self.pipeline.contains(&name) {
                let f = self.pipeline.function(&name);
                for (d, iv) in region.0.iter_mut().enumerate() {
                    let est = if d < f.args.len() {
                        f.estimate_for(&f.args[d])
                    } else {
                        None
                    };
                    if let Some(est) = est {
                        if iv.min.as_int().is_none() {
                            if let Some(min) = simplify(&est.min).as_int() {
                                iv.min = Expr::IntImm(min);
                            }
                        }
                        if iv.max.as_int().is_none() {
                            let max =
                                simplify(&(est.min.clone() + est.extent.clone() - Expr::int(1)));
                            if let Some(max) = max.as_int() {
                                iv.max = Expr::IntImm(max);
                            }
                        }
                    }
                }
            }
            out.insert(name, region);
        }
        out
    }

    /// Regions required across every stage of `func`, given bounds on its
    /// pure variables; per-function regions are unioned across stages.
    pub fn regions_required(
        &self,
        func: &str,
        pure_bounds: &DimBounds,
    ) -> BTreeMap<String, Region> {
        let f = self.pipeline.function(func);
        let mut regions: BTreeMap<String, Region> = BTreeMap::new();
        for s in 0..f.num_stages() {
            let bounds = self.stage_bounds(f, s, pure_bounds);
            for (name, reg) in self.regions_required_stage(&FStage::new(func, s), &bounds) {
                match regions.get_mut(&name) {
                    Some(existing) => existing.merge(&reg),
                    None => {
                        regions.insert(name, reg);
                    }
                }
            }
        }
        regions
    }

    /// The portion of each producer's region that is re-read between two
    /// adjacent tiles of the given stage along `var`: regions at `bounds`
    /// intersected with regions at `bounds` shifted forward by one extent
    /// of `var`. A producer present in the unshifted set but absent from
    /// the shifted set is skipped; this permissive behavior is deliberate.
    pub fn redundant_regions(
        &self,
        stage: &FStage,
        var: &str,
        bounds: &DimBounds,
    ) -> BTreeMap<String, Region> {
        let regions = self.regions_required_stage(stage, bounds);

        let mut shifted_bounds = bounds.clone();
        if let Some(iv) = bounds.get(var) {
            let len = simplify(&(iv.max.clone() - iv.min.clone() + Expr::int(1)));
            shifted_bounds.insert(
                var.to_string(),
                Interval::new(
                    simplify(&(iv.min.clone() + len.clone())),
                    simplify(&(iv.max.clone() + len)),
                ),
            );
        }
        let regions_shifted = self.regions_required_stage(stage, &shifted_bounds);

        let mut overlaps = BTreeMap::new();
        for (name, reg) in &regions {
            let Some(shifted) = regions_shifted.get(name) else {
                debug!(
                    "shifted regions of {} along {} dropped producer {}",
                    stage, var, name
                );
                continue;
            };
            assert_eq!(
                reg.len(),
                shifted.len(),
                "shifted region for {} changed dimensionality",
                name
            );
            let mut intersection = Region::new();
            for (a, b) in reg.0.iter().zip(shifted.0.iter()) {
                intersection.push(a.intersect(b));
            }
            intersection.simplify();
            overlaps.insert(name.clone(), intersection);
        }
        overlaps
    }

    /// `redundant_regions` for every loop dimension of the stage, in
    /// dimension order.
    pub fn overlap_regions(
        &self,
        stage: &FStage,
        bounds: &DimBounds,
    ) -> Vec<BTreeMap<String, Region>> {
        let def = self.pipeline.function(&stage.func).definition(stage.stage);
        def.dims
            .iter()
            .map(|d| self.redundant_regions(stage, d, bounds))
            .collect()
    }
}

/// The maximal region of every function ever required to produce the
/// pipeline outputs at their estimated sizes. Computed once per run; the
/// partitioner reads it but never writes it.
pub fn pipeline_bounds(analysis: &DependenceAnalysis<'_>) -> BTreeMap<String, Region> {
    let pipeline = analysis.pipeline;
    let mut bounds: BTreeMap<String, Region> = BTreeMap::new();

    for out_name in pipeline.outputs() {
        let out = pipeline.function(out_name);
        let mut pure_bounds = DimBounds::new();
        let mut out_box = Region::new();
        for arg in &out.args {
            let est = out
                .estimate_for(arg)
                .unwrap_or_else(|| panic!("output {} has no estimate for {}", out_name, arg));
            let iv = Interval::new(
                simplify(&est.min),
                simplify(&(est.min.clone() + est.extent.clone() - Expr::int(1))),
            );
            pure_bounds.insert(arg.clone(), iv.clone());
            out_box.push(iv);
        }

        let mut regions = analysis.regions_required(out_name, &pure_bounds);
        // The output's own region is part of the pipeline bounds too
        match regions.get_mut(out_name) {
            Some(existing) => existing.merge(&out_box),
            None => {
                regions.insert(out_name.clone(), out_box);
            }
        }

        for (name, reg) in regions {
            match bounds.get_mut(&name) {
                Some(existing) => existing.merge(&reg),
                None => {
                    bounds.insert(name, reg);
                }
            }
        }
    }

    for (name, reg) in &bounds {
        debug!("pipeline bounds {}: {}", name, reg);
    }
    bounds
}

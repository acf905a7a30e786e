//! Grouping and fusion search over the stage graph.
//!
//! The partitioner starts with one group per stage and iteratively merges
//! groups until a fixpoint, evaluating each candidate merge with the cost
//! model. Two levels run in order: `Inline`, which absorbs cheap pure
//! producers into every consumer, and `FastMem`, which would fuse producer
//! and consumer at tile granularity (its candidate chooser is a stub, so it
//! currently performs no merges). Each surviving group is then tiled by an
//! exhaustive search over a fixed ladder of tile sizes.

mod emit;
mod tiling;

use crate::analysis::DependenceAnalysis;
use crate::cost::CostModel;
use crate::pipeline::{FStage, Pipeline};
use crate::region::{DimBounds, Interval, Region};
use crate::MachineParams;
use log::debug;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// A candidate fusion: compute `prod` inside the tile loop of `cons`.
/// Identity (ordering, equality) is the (producer, consumer) pair alone;
/// the tile sizes describe the granularity being evaluated and do not
/// participate in comparisons, so a cache keyed by `FusionChoice` holds one
/// entry per pair.
#[derive(Debug, Clone)]
pub struct FusionChoice {
    /// Producer function to be fused
    pub prod: String,
    /// Consumer stage whose loop structure the producer is fused into
    pub cons: FStage,
    /// Tile sizes of the consumer loop nest for this evaluation
    pub tile_sizes: BTreeMap<String, i64>,
}

impl FusionChoice {
    fn new(prod: impl Into<String>, cons: FStage) -> FusionChoice {
        FusionChoice {
            prod: prod.into(),
            cons,
            tile_sizes: BTreeMap::new(),
        }
    }
}

impl PartialEq for FusionChoice {
    fn eq(&self, other: &FusionChoice) -> bool {
        self.prod == other.prod && self.cons == other.cons
    }
}

impl Eq for FusionChoice {}

impl PartialOrd for FusionChoice {
    fn partial_cmp(&self, other: &FusionChoice) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for FusionChoice {
    fn cmp(&self, other: &FusionChoice) -> Ordering {
        (&self.prod, &self.cons).cmp(&(&other.prod, &other.cons))
    }
}

impl fmt::Display for FusionChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fuse {} into {}", self.prod, self.cons)
    }
}

/// A set of stages computed together, represented by its output stage. All
/// members are realized at the granularity of one tile of the output;
/// inlined members occupy no storage at all.
#[derive(Debug, Clone)]
pub struct Group {
    /// The stage whose loop nest the group is scheduled around
    pub output: FStage,
    /// Every stage computed within this group (includes the output)
    pub members: Vec<FStage>,
    /// Members substituted directly into their consumers
    pub inlined: BTreeSet<String>,
    /// Tile sizes for the output loop dimensions; untiled when empty
    pub tile_sizes: BTreeMap<String, i64>,
}

impl Group {
    fn new(output: FStage, members: Vec<FStage>) -> Group {
        Group {
            output,
            members,
            inlined: BTreeSet::new(),
            tile_sizes: BTreeMap::new(),
        }
    }
}

impl fmt::Display for Group {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "group {} members [", self.output)?;
        for (i, m) in self.members.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", m)?;
        }
        write!(f, "] inlined [")?;
        for (i, name) in self.inlined.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", name)?;
        }
        write!(f, "]")
    }
}

/// Cost summary of one group at one tiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupAnalysis {
    /// Total arithmetic cost across all tiles
    pub arith_cost: i64,
    /// Estimated slow-memory traffic in bytes across all tiles
    pub mem_cost: i64,
    /// Available parallelism: the number of independent tiles
    pub parallelism: i64,
}

/// Grouping levels, applied in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    /// Absorb producers by inlining them into every consumer
    Inline,
    /// Fuse producer and consumer at tile granularity
    FastMem,
}

/// The grouping engine. Borrows the pipeline, the dependence analysis, the
/// cost model and the precomputed pipeline bounds; owns the evolving group
/// assignment.
pub struct Partitioner<'a> {
    pub(crate) pipeline: &'a Pipeline,
    pub(crate) dep: &'a DependenceAnalysis<'a>,
    pub(crate) cost: &'a CostModel<'a>,
    pub(crate) pipeline_bounds: &'a BTreeMap<String, Region>,
    pub(crate) params: MachineParams,

    pub(crate) groups: BTreeMap<FStage, Group>,
    pub(crate) group_costs: BTreeMap<FStage, Option<GroupAnalysis>>,
    /// Consumer stages of each producer stage
    pub(crate) children: BTreeMap<FStage, BTreeSet<FStage>>,

    /// Memoized fusion benefits, keyed by (producer, consumer)
    fusion_cache: BTreeMap<FusionChoice, Option<i64>>,
    /// Function name to the cached choices mentioning it, so a merge
    /// invalidates only the affected entries
    cache_index: BTreeMap<String, BTreeSet<FusionChoice>>,
}

impl<'a> Partitioner<'a> {
    /// Build the initial partition: one group per stage, plus the
    /// producer-to-consumer edges. A consumer depends on the final stage of
    /// each producer it calls; within a function, each stage depends on the
    /// previous one.
    pub fn new(
        dep: &'a DependenceAnalysis<'a>,
        cost: &'a CostModel<'a>,
        pipeline_bounds: &'a BTreeMap<String, Region>,
        params: MachineParams,
    ) -> Partitioner<'a> {
        let pipeline = dep.pipeline;
        let mut groups = BTreeMap::new();
        let mut children: BTreeMap<FStage, BTreeSet<FStage>> = BTreeMap::new();

        for f in pipeline.functions() {
            for s in 0..f.num_stages() {
                let stg = FStage::new(&f.name, s);
                groups.insert(stg.clone(), Group::new(stg.clone(), vec![stg]));
            }
        }

        for f in pipeline.functions() {
            for s in 0..f.num_stages() {
                let cons = FStage::new(&f.name, s);
                for c in f.definition(s).calls() {
                    if c != f.name && pipeline.contains(&c) {
                        let prod = FStage::new(&c, pipeline.function(&c).final_stage());
                        children.entry(prod).or_default().insert(cons.clone());
                    }
                }
                if s > 0 {
                    children
                        .entry(FStage::new(&f.name, s - 1))
                        .or_default()
                        .insert(cons);
                }
            }
        }

        Partitioner {
            pipeline,
            dep,
            cost,
            pipeline_bounds,
            params,
            groups,
            group_costs: BTreeMap::new(),
            children,
            fusion_cache: BTreeMap::new(),
            cache_index: BTreeMap::new(),
        }
    }

    /// The current groups, keyed by output stage.
    pub fn groups(&self) -> &BTreeMap<FStage, Group> {
        &self.groups
    }

    /// Latest analysis of each group, recorded by the tile search.
    pub fn group_costs(&self) -> &BTreeMap<FStage, Option<GroupAnalysis>> {
        &self.group_costs
    }

    fn cache_insert(&mut self, choice: FusionChoice, benefit: Option<i64>) {
        self.cache_index
            .entry(choice.prod.clone())
            .or_default()
            .insert(choice.clone());
        self.cache_index
            .entry(choice.cons.func.clone())
            .or_default()
            .insert(choice.clone());
        self.fusion_cache.insert(choice, benefit);
    }

    /// Drop every cached benefit mentioning `func` as producer or consumer.
    fn cache_invalidate(&mut self, func: &str) {
        if let Some(choices) = self.cache_index.remove(func) {
            for c in &choices {
                self.fusion_cache.remove(c);
                if let Some(other) = self.cache_index.get_mut(if c.prod == func {
                    &c.cons.func
                } else {
                    &c.prod
                }) {
                    other.remove(c);
                }
            }
        }
    }

    /// Iteratively merge groups at the given level until no beneficial
    /// merge remains.
    pub fn group(&mut self, level: Level) {
        let mut fixpoint = false;
        while !fixpoint {
            fixpoint = true;

            // Only the final stage of a non-output function can be fused
            // into its consumers: all stages of a function are computed at
            // one location.
            let mut cand: Vec<(String, String)> = Vec::new();
            for stg in self.groups.keys() {
                if self.pipeline.is_output(&stg.func) {
                    continue;
                }
                let f = self.pipeline.function(&stg.func);
                if stg.stage != f.final_stage() {
                    continue;
                }
                let Some(consumers) = self.children.get(stg) else {
                    continue;
                };
                let child_funcs: BTreeSet<&str> =
                    consumers.iter().map(|c| c.func.as_str()).collect();
                match level {
                    // Tile-granularity fusion needs a single consumer
                    // function: members cannot be computed at two points.
                    Level::FastMem if child_funcs.len() == 1 => {
                        if let Some(cons) = child_funcs.first() {
                            cand.push((stg.func.clone(), (*cons).to_string()));
                        }
                    }
                    Level::Inline if !child_funcs.is_empty() => {
                        cand.push((stg.func.clone(), String::new()));
                    }
                    _ => {}
                }
            }

            debug!("grouping candidates at {:?}: {:?}", level, cand);

            match level {
                Level::Inline => {
                    if let Some((prod, benefit)) = self.choose_candidate_fuse_inline(&cand) {
                        debug!("inlining {} everywhere, benefit {}", prod, benefit);
                        self.merge_groups_inline(&prod);
                        fixpoint = false;
                    }
                }
                Level::FastMem => {
                    if let Some((choice, benefit)) = self.choose_candidate_fuse_fast_mem(&cand) {
                        debug!("fusing {}, benefit {}", choice, benefit);
                        self.merge_groups(&choice);
                        fixpoint = false;
                    }
                }
            }
        }
    }

    /// Pick the producer whose inlining into all of its consumers carries
    /// the greatest aggregate benefit. A producer qualifies only when every
    /// one of its consumers benefits; the policy is conservative on
    /// purpose. Per-pair benefits are memoized across fixpoint rounds.
    fn choose_candidate_fuse_inline(
        &mut self,
        cands: &[(String, String)],
    ) -> Option<(String, i64)> {
        let mut best: Option<(String, i64)> = None;
        for (prod_name, _) in cands {
            let prod_f = self.pipeline.function(prod_name);
            let prod = FStage::new(prod_name, prod_f.final_stage());
            let consumers: Vec<FStage> = self
                .children
                .get(&prod)
                .map(|c| c.iter().cloned().collect())
                .unwrap_or_default();

            let mut overall: Option<i64> = Some(0);
            for cons in consumers {
                let choice = FusionChoice::new(prod_name.clone(), cons);
                let benefit = match self.fusion_cache.get(&choice) {
                    Some(b) => *b,
                    None => {
                        let b = self.evaluate_inline_choice(&choice);
                        self.cache_insert(choice, b);
                        b
                    }
                };
                match benefit {
                    Some(b) if b >= 0 => overall = overall.map(|o| o + b),
                    _ => {
                        overall = None;
                        break;
                    }
                }
            }

            if let Some(total) = overall {
                // Strictly greater wins; the first candidate keeps a tie
                if best.as_ref().map_or(true, |(_, b)| total > *b) {
                    best = Some((prod_name.clone(), total));
                }
            }
        }
        best
    }

    /// Benefit of inlining `choice.prod` into the group of `choice.cons`:
    /// the arithmetic cost of the separate groups minus that of the fused
    /// group, evaluated at unit tile sizes. `None` when any of the three
    /// analyses is indeterminate.
    fn evaluate_inline_choice(&self, choice: &FusionChoice) -> Option<i64> {
        let prod_f = self.pipeline.function(&choice.prod);
        let prod_groups: Vec<&Group> = (0..prod_f.num_stages())
            .map(|s| &self.groups[&FStage::new(&choice.prod, s)])
            .collect();
        let cons = &self.groups[&choice.cons];

        let mut fused = cons.clone();
        for g in &prod_groups {
            fused = fuse_groups(g, &fused);
        }
        for g in &prod_groups {
            for m in &g.members {
                fused.inlined.insert(m.func.clone());
            }
        }

        // Unit tiles expose the full redundant-compute penalty of inlining
        let cons_def = self
            .pipeline
            .function(&cons.output.func)
            .definition(cons.output.stage);
        fused.tile_sizes = cons_def.dims.iter().map(|d| (d.clone(), 1)).collect();

        let mut prod_arith = 0i64;
        for g in &prod_groups {
            prod_arith += self.analyze_group(g)?.arith_cost;
        }
        let cons_analysis = self.analyze_group(cons)?;
        let fused_analysis = self.analyze_group(&fused)?;

        Some(prod_arith + cons_analysis.arith_cost - fused_analysis.arith_cost)
    }

    /// Tile-granularity fusion chooser. Deliberately a stub: it proposes no
    /// merge, so the fast-mem level leaves the grouping unchanged. The
    /// search it would perform has to weigh fast-memory residency of the
    /// intermediates, redundant compute at tile boundaries, load balance
    /// across cores and the effect on vectorization.
    fn choose_candidate_fuse_fast_mem(
        &mut self,
        _cands: &[(String, String)],
    ) -> Option<(FusionChoice, i64)> {
        None
    }

    /// Absorb every stage of `prod` into the single consumer group named by
    /// `choice.cons`, recording the producer as inlined there.
    fn merge_groups(&mut self, choice: &FusionChoice) {
        let prod_f = self.pipeline.function(&choice.prod);
        let child_group = choice.cons.clone();

        for s in 0..prod_f.num_stages() {
            let cand = FStage::new(&choice.prod, s);
            let absorbed = self
                .groups
                .remove(&cand)
                .unwrap_or_else(|| panic!("no group for {}", cand));

            let child = self
                .groups
                .get_mut(&child_group)
                .unwrap_or_else(|| panic!("no group for {}", child_group));
            child.members.extend(absorbed.members);
            child.inlined.insert(cand.func.clone());

            self.children.remove(&cand);
            for cons in self.children.values_mut() {
                if cons.remove(&cand) {
                    cons.insert(child_group.clone());
                }
            }
        }

        let child = self
            .groups
            .get_mut(&child_group)
            .unwrap_or_else(|| panic!("no group for {}", child_group));
        child.tile_sizes = choice.tile_sizes.clone();

        self.cache_invalidate(&choice.prod);
        let cons_func = child_group.func.clone();
        self.cache_invalidate(&cons_func);
    }

    /// Absorb every stage of `prod` into each of its consumer groups,
    /// recording the absorbed members as inlined in all of them.
    fn merge_groups_inline(&mut self, prod: &str) {
        let prod_f = self.pipeline.function(prod);
        let final_stage = FStage::new(prod, prod_f.final_stage());
        let consumers: Vec<FStage> = self
            .children
            .get(&final_stage)
            .map(|c| c.iter().cloned().collect())
            .unwrap_or_default();

        // Affected entries: everything mentioning the producer or any of
        // its consumers
        self.cache_invalidate(prod);
        let consumer_funcs: BTreeSet<String> =
            consumers.iter().map(|c| c.func.clone()).collect();
        for f in &consumer_funcs {
            self.cache_invalidate(f);
        }

        for s in 0..prod_f.num_stages() {
            let cand = FStage::new(prod, s);
            let absorbed = self
                .groups
                .remove(&cand)
                .unwrap_or_else(|| panic!("no group for {}", cand));

            for cg in &consumers {
                let child = self
                    .groups
                    .get_mut(cg)
                    .unwrap_or_else(|| panic!("no group for {}", cg));
                child.members.extend(absorbed.members.iter().cloned());
                for m in &absorbed.members {
                    child.inlined.insert(m.func.clone());
                }
            }

            self.children.remove(&cand);
            for cons in self.children.values_mut() {
                if cons.remove(&cand) {
                    cons.extend(consumers.iter().cloned());
                }
            }
        }
    }

    /// Full pipeline-wide bound context for a stage: pure variables from
    /// the precomputed pipeline bounds, reduction variables from their own
    /// declared extents.
    pub(crate) fn get_bounds(&self, s: &FStage) -> DimBounds {
        use crate::expr::Expr;
        use crate::simplify::simplify;

        let f = self.pipeline.function(&s.func);
        let region = self
            .pipeline_bounds
            .get(&s.func)
            .unwrap_or_else(|| panic!("no pipeline bounds for {}", s.func));
        assert_eq!(
            region.len(),
            f.args.len(),
            "pipeline bounds for {} have wrong dimensionality",
            s.func
        );

        let mut bounds = DimBounds::new();
        for (arg, iv) in f.args.iter().zip(region.0.iter()) {
            bounds.insert(arg.clone(), iv.clone());
        }
        for rvar in &f.definition(s.stage).rvars {
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

    /// Bound context for one tile of a stage. A dimension with a tile size
    /// shrinks to `[0, size - 1]` only when its full extent fits at least
    /// two tiles; otherwise it keeps its full bound.
    pub(crate) fn get_bounds_from_tile_sizes(
        &self,
        s: &FStage,
        tile_sizes: &BTreeMap<String, i64>,
    ) -> DimBounds {
        let def = self.pipeline.function(&s.func).definition(s.stage);
        let full = self.get_bounds(s);

        let mut bounds = DimBounds::new();
        for var in &def.dims {
            let bound = full
                .get(var)
                .unwrap_or_else(|| panic!("dimension {} of {} has no bound", var, s));
            let tiled = match (tile_sizes.get(var), bound.extent()) {
                (Some(&size), Some(extent)) if extent >= 2 * size => {
                    Interval::literal(0, size - 1)
                }
                _ => bound.clone(),
            };
            bounds.insert(var.clone(), tiled);
        }
        bounds
    }

    /// Known extents of a stage's dimensions at pipeline-wide bounds.
    /// Dimensions whose extent stays symbolic are absent.
    pub(crate) fn get_stage_estimates(&self, s: &FStage) -> BTreeMap<String, i64> {
        self.get_bounds(s)
            .into_iter()
            .filter_map(|(var, iv)| iv.extent().map(|e| (var, e)))
            .collect()
    }

    /// Per-dimension reuse of a stage at unit tile granularity: the bytes
    /// of producer regions re-read between two adjacent iterations along
    /// each dimension. `None` marks a dimension whose overlap area could
    /// not be determined.
    pub fn evaluate_reuse(
        &self,
        s: &FStage,
        producers: &BTreeSet<String>,
    ) -> BTreeMap<String, Option<i64>> {
        let def = self.pipeline.function(&s.func).definition(s.stage);
        let tile_sizes: BTreeMap<String, i64> =
            def.dims.iter().map(|d| (d.clone(), 1)).collect();
        let bounds = self.get_bounds_from_tile_sizes(s, &tile_sizes);

        let overlap = self.dep.overlap_regions(s, &bounds);

        let mut reuse = BTreeMap::new();
        for (var, regions) in def.dims.iter().zip(overlap.iter()) {
            let mut total = Some(0i64);
            for (name, reg) in regions {
                if !producers.contains(name) {
                    continue;
                }
                total = match (total, reg.area()) {
                    (Some(t), Some(a)) => Some(t + a),
                    _ => None,
                };
            }
            reuse.insert(var.clone(), total);
        }
        reuse
    }
}

/// Combine two groups around the consumer's output stage. Inlined sets are
/// unioned; tile sizes are left for the caller to choose.
fn fuse_groups(prod: &Group, cons: &Group) -> Group {
    let mut members = prod.members.clone();
    members.extend(cons.members.iter().cloned());
    let mut fused = Group::new(cons.output.clone(), members);
    fused.inlined.extend(prod.inlined.iter().cloned());
    fused.inlined.extend(cons.inlined.iter().cloned());
    fused
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::pipeline_bounds;
    use crate::expr::{Expr, ScalarType};
    use crate::pipeline::Function;

    /// A(x) = x * 2, consumed by B(x) = A(x) + 1 and C(x) = A(x) - 1.
    fn diamond() -> Pipeline {
        let a = Function::pure(
            "A",
            &["x"],
            Expr::var("x") * Expr::int(2),
            ScalarType::Int32,
        );
        let b = Function::pure(
            "B",
            &["x"],
            Expr::call("A", ScalarType::Int32, vec![Expr::var("x")]) + Expr::int(1),
            ScalarType::Int32,
        )
        .with_estimate("x", 0, 100);
        let c = Function::pure(
            "C",
            &["x"],
            Expr::call("A", ScalarType::Int32, vec![Expr::var("x")]) - Expr::int(1),
            ScalarType::Int32,
        )
        .with_estimate("x", 0, 100);
        Pipeline::new(vec![a, b, c], vec!["B".to_string(), "C".to_string()]).unwrap()
    }

    #[test]
    fn test_initial_groups_and_children() {
        let p = diamond();
        let dep = DependenceAnalysis::new(&p);
        let pb = pipeline_bounds(&dep);
        let cm = CostModel::new(&p);
        let part = Partitioner::new(&dep, &cm, &pb, MachineParams::default());

        assert_eq!(part.groups().len(), 3);
        let a = FStage::new("A", 0);
        let consumers = &part.children[&a];
        assert!(consumers.contains(&FStage::new("B", 0)));
        assert!(consumers.contains(&FStage::new("C", 0)));
    }

    #[test]
    fn test_inline_grouping_absorbs_cheap_producer() {
        let p = diamond();
        let dep = DependenceAnalysis::new(&p);
        let pb = pipeline_bounds(&dep);
        let cm = CostModel::new(&p);
        let mut part = Partitioner::new(&dep, &cm, &pb, MachineParams::default());

        part.group(Level::Inline);

        // A's standalone group is gone and both consumers carry it inlined
        assert!(!part.groups().contains_key(&FStage::new("A", 0)));
        for out in ["B", "C"] {
            let g = &part.groups()[&FStage::new(out, 0)];
            assert!(g.inlined.contains("A"));
            assert!(g.members.iter().any(|m| m.func == "A"));
        }
    }

    #[test]
    fn test_inline_merge_bounds_consumer_cost() {
        let p = diamond();
        let dep = DependenceAnalysis::new(&p);
        let pb = pipeline_bounds(&dep);
        let cm = CostModel::new(&p);
        let mut part = Partitioner::new(&dep, &cm, &pb, MachineParams::default());

        part.initialize_groups();
        let pre: BTreeMap<FStage, GroupAnalysis> = part
            .group_costs()
            .iter()
            .map(|(k, v)| (k.clone(), v.expect("analyzable")))
            .collect();
        let prod = pre[&FStage::new("A", 0)];

        part.group(Level::Inline);
        part.initialize_groups();

        // Each consumer absorbs its own copy of the producer's work, so its
        // post-merge arithmetic cost can grow by at most the producer's
        // standalone cost.
        for out in ["B", "C"] {
            let stg = FStage::new(out, 0);
            let post = part.group_costs()[&stg].expect("analyzable");
            assert!(post.arith_cost <= pre[&stg].arith_cost + prod.arith_cost);
        }
    }

    #[test]
    fn test_fast_mem_grouping_is_inert() {
        let p = diamond();
        let dep = DependenceAnalysis::new(&p);
        let pb = pipeline_bounds(&dep);
        let cm = CostModel::new(&p);
        let mut part = Partitioner::new(&dep, &cm, &pb, MachineParams::default());

        let before: Vec<FStage> = part.groups().keys().cloned().collect();
        part.group(Level::FastMem);
        let after: Vec<FStage> = part.groups().keys().cloned().collect();
        assert_eq!(before, after);
    }

    #[test]
    fn test_get_bounds_from_tile_sizes_needs_two_tiles() {
        let p = diamond();
        let dep = DependenceAnalysis::new(&p);
        let pb = pipeline_bounds(&dep);
        let cm = CostModel::new(&p);
        let part = Partitioner::new(&dep, &cm, &pb, MachineParams::default());

        let b = FStage::new("B", 0);
        // 100 elements tiled by 32: tile bound [0, 31]
        let mut sizes = BTreeMap::new();
        sizes.insert("x".to_string(), 32);
        let bounds = part.get_bounds_from_tile_sizes(&b, &sizes);
        assert_eq!(bounds["x"], Interval::literal(0, 31));

        // Tiled by 64: fewer than two tiles fit, so the full bound stays
        sizes.insert("x".to_string(), 64);
        let bounds = part.get_bounds_from_tile_sizes(&b, &sizes);
        assert_eq!(bounds["x"], Interval::literal(0, 99));
    }

    #[test]
    fn test_evaluate_reuse_stencil() {
        // B(x) = A(x) + A(x + 1) re-reads one element of A per iteration
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
        let p = Pipeline::new(vec![a, b], vec!["B".to_string()]).unwrap();

        let dep = DependenceAnalysis::new(&p);
        let pb = pipeline_bounds(&dep);
        let cm = CostModel::new(&p);
        let part = Partitioner::new(&dep, &cm, &pb, MachineParams::default());

        let mut prods = BTreeSet::new();
        prods.insert("A".to_string());
        let reuse = part.evaluate_reuse(&FStage::new("B", 0), &prods);
        assert_eq!(reuse["x"], Some(1));
    }
}

//! Tile-size search and group cost analysis.
//!
//! Every group is analyzed at a candidate tiling by computing the regions a
//! single output tile pulls in, costing them, and scaling by the tile
//! count. The memory model is pessimistic about cache residency: when the
//! intermediate working set of a tile exceeds fast memory, every load the
//! tile performs is charged to slow memory.

use super::{Group, GroupAnalysis, Partitioner};
use crate::pipeline::FStage;
use crate::region::Region;
use log::debug;
use std::collections::{BTreeMap, BTreeSet};

/// Candidate tile extents, shared by every dimension.
const TILE_SIZE_LADDER: [i64; 8] = [1, 4, 8, 16, 32, 64, 128, 256];

impl<'a> Partitioner<'a> {
    /// Pick a tile configuration for every group and record its analysis.
    /// Run once before grouping (so fusion decisions compare configured
    /// groups) and again after grouping settles.
    pub fn initialize_groups(&mut self) {
        let keys: Vec<_> = self.groups.keys().cloned().collect();
        for key in keys {
            let (sizes, analysis) = self.find_best_tile_config(&self.groups[&key]);
            if let Some(g) = self.groups.get_mut(&key) {
                g.tile_sizes = sizes;
            }
            self.group_costs.insert(key, analysis);
        }
    }

    /// Candidate tilings for a stage's pure dimensions. Reduction
    /// dimensions are never tiled. Two families: skewed configurations that
    /// keep a prefix of the dimensions at a chosen size and the rest at the
    /// ladder maximum, and square configurations with one size everywhere.
    /// The first (innermost) dimension is floored at 64 to protect
    /// vectorization.
    pub(crate) fn generate_tile_configs(&self, s: &FStage) -> Vec<BTreeMap<String, i64>> {
        let f = self.pipeline.function(&s.func);
        let def = f.definition(s.stage);

        let pure_vars: BTreeSet<&str> = f.args.iter().map(|a| a.as_str()).collect();
        let tile_vars: Vec<&str> = def
            .dims
            .iter()
            .map(|d| d.as_str())
            .filter(|d| pure_vars.contains(d))
            .collect();

        let max_size = TILE_SIZE_LADDER[TILE_SIZE_LADDER.len() - 1];
        let mut configs = Vec::new();

        for i in 0..tile_vars.len() {
            for &size in &TILE_SIZE_LADDER {
                let mut tiling = BTreeMap::new();
                for (j, var) in tile_vars.iter().enumerate() {
                    let chosen = if j < i {
                        if j == 0 {
                            size.max(64)
                        } else {
                            size
                        }
                    } else {
                        max_size
                    };
                    tiling.insert((*var).to_string(), chosen);
                }
                configs.push(tiling);
            }
        }

        for &size in &TILE_SIZE_LADDER {
            let mut tiling = BTreeMap::new();
            for (j, var) in tile_vars.iter().enumerate() {
                tiling.insert((*var).to_string(), if j == 0 { size.max(64) } else { size });
            }
            configs.push(tiling);
        }

        configs
    }

    /// Exhaustive search over the candidate tilings of a group's output.
    /// The untiled group is the baseline; a candidate wins only when its
    /// arithmetic cost does not regress and its memory cost strictly
    /// improves, so memory is the primary objective. An unanalyzable
    /// baseline ends the search immediately.
    pub(crate) fn find_best_tile_config(
        &self,
        g: &Group,
    ) -> (BTreeMap<String, i64>, Option<GroupAnalysis>) {
        let mut no_tile = g.clone();
        no_tile.tile_sizes = BTreeMap::new();

        let mut best_config = BTreeMap::new();
        let mut best = match self.analyze_group(&no_tile) {
            Some(a) => a,
            None => return (best_config, None),
        };

        for config in self.generate_tile_configs(&g.output) {
            let mut candidate = g.clone();
            candidate.tile_sizes = config.clone();

            if let Some(analysis) = self.analyze_group(&candidate) {
                if analysis.arith_cost <= best.arith_cost && analysis.mem_cost < best.mem_cost {
                    debug!(
                        "group {}: tiling {:?} improves to arith {} mem {}",
                        g.output, config, analysis.arith_cost, analysis.mem_cost
                    );
                    best_config = config;
                    best = analysis;
                }
            }
        }

        (best_config, Some(best))
    }

    /// Cost a group at its current tiling. One tile of the output is
    /// analyzed concretely and the result scaled by the tile count; the
    /// output stage's own cost is charged once at full size since tiling
    /// never recomputes the output itself. `None` when any extent, area or
    /// cost along the way is indeterminate.
    pub(crate) fn analyze_group(&self, g: &Group) -> Option<GroupAnalysis> {
        let out_f = self.pipeline.function(&g.output.func);
        let def = out_f.definition(g.output.stage);

        let mut group_mem: BTreeSet<&str> = BTreeSet::new();
        let mut group_inputs: BTreeSet<String> = BTreeSet::new();
        for m in &g.members {
            group_mem.insert(m.func.as_str());
        }
        for m in &g.members {
            let m_def = self.pipeline.function(&m.func).definition(m.stage);
            for c in m_def.calls() {
                if !group_mem.contains(c.as_str()) {
                    group_inputs.insert(c);
                }
            }
        }

        // Tile count from the full stage extents
        let stg_bounds = self.get_bounds(&g.output);
        let mut estimate_tiles = 1i64;
        for var in &def.dims {
            if let Some(&size) = g.tile_sizes.get(var) {
                let extent = stg_bounds
                    .get(var)
                    .unwrap_or_else(|| panic!("dimension {} of {} has no bound", var, g.output))
                    .extent()?;
                estimate_tiles = estimate_tiles.saturating_mul((extent + size - 1) / size);
            }
        }

        // Regions one output tile pulls in, split into group members,
        // outside producers, and external images
        let tile_bounds = self.get_bounds_from_tile_sizes(&g.output, &g.tile_sizes);
        let conc_reg = self.dep.regions_required_stage(&g.output, &tile_bounds);

        let mut group_reg: BTreeMap<String, Region> = BTreeMap::new();
        let mut prod_reg: BTreeMap<String, Region> = BTreeMap::new();
        let mut input_reg: BTreeMap<String, Region> = BTreeMap::new();
        for (name, reg) in conc_reg {
            if group_mem.contains(name.as_str()) {
                group_reg.insert(name, reg);
            } else if group_inputs.contains(&name) {
                if self.pipeline.contains(&name) {
                    prod_reg.insert(name, reg);
                } else {
                    input_reg.insert(name, reg);
                }
            }
        }

        let tile_cost = self.cost.total_region_cost(&group_reg, &g.inlined)?;
        let mut tile_input_size = self.cost.total_input_size(&input_reg)?;
        for (name, reg) in &prod_reg {
            tile_input_size += self.cost.region_size(name, reg)?;
        }
        let tile_intermediate_size = self.cost.working_set_size(&group_reg, &g.inlined)?;

        let mut out_box = Region::new();
        for arg in &out_f.args {
            let iv = stg_bounds
                .get(arg)
                .unwrap_or_else(|| panic!("argument {} of {} has no bound", arg, g.output));
            out_box.push(iv.clone());
        }
        let out_cost =
            self.cost
                .stage_region_cost(&g.output.func, g.output.stage, &out_box, &g.inlined)?;

        let mut per_tile_mem_cost = tile_input_size;
        if tile_intermediate_size > self.params.fast_mem_size as i64 {
            per_tile_mem_cost += tile_cost.loads;
        }

        Some(GroupAnalysis {
            arith_cost: tile_cost.ops.saturating_mul(estimate_tiles) + out_cost.ops,
            mem_cost: per_tile_mem_cost.saturating_mul(estimate_tiles),
            parallelism: estimate_tiles,
        })
    }
}

//! Turning the final grouping into scheduling directives.
//!
//! Emission walks the groups in order. Inlined members become a single
//! `compute_inline` each; every group output gets `compute_root` (or an
//! update selector), then its tiling as splits, a reorder placing intra-tile
//! dimensions innermost, a vectorized innermost pure dimension, and
//! parallel outer dimensions until the machine is saturated. The live
//! dimension list is threaded through, so vectorization and parallelization
//! see post-split names.

use super::{Group, Partitioner};
use crate::analysis::can_parallelize_rvar;
use crate::expr::ScalarType;
use crate::schedule::{Directive, Schedule};
use log::warn;
use std::collections::{BTreeMap, BTreeSet};

impl<'a> Partitioner<'a> {
    /// Emit the schedule for the current grouping.
    pub fn emit_schedule(&self) -> Schedule {
        let mut directives = Vec::new();

        // Each inlined function appears in every group that absorbed it;
        // one directive suffices.
        let mut inlined: BTreeSet<&str> = BTreeSet::new();
        for g in self.groups.values() {
            for f in &g.inlined {
                inlined.insert(f);
            }
        }
        for f in inlined {
            directives.push(Directive::ComputeInline {
                func: f.to_string(),
            });
        }

        for g in self.groups.values() {
            self.emit_group(g, &mut directives);
        }

        Schedule { directives }
    }

    fn emit_group(&self, g: &Group, directives: &mut Vec<Directive>) {
        let func = g.output.func.clone();
        let stage = g.output.stage;
        let out_f = self.pipeline.function(&func);
        let def = out_f.definition(stage);

        let mut estimates = self.get_stage_estimates(&g.output);

        if stage == 0 {
            directives.push(Directive::ComputeRoot { func: func.clone() });
        } else {
            directives.push(Directive::Update {
                func: func.clone(),
                index: stage - 1,
            });
        }

        let prefix = format!("{}_{}", func, stage);
        let mut rvars: BTreeSet<String> = def
            .dims
            .iter()
            .filter(|d| !out_f.args.contains(*d))
            .cloned()
            .collect();

        // Tiling: tiled dimensions split into an inner/outer pair, inner
        // dimensions end up innermost after the reorder
        let mut inner_dims: Vec<String> = Vec::new();
        let mut outer_dims: Vec<String> = Vec::new();
        for var in &def.dims {
            match g.tile_sizes.get(var) {
                Some(&size) if size > 1 => {
                    let (inner, outer) = split_dim(
                        &func,
                        stage,
                        &prefix,
                        var,
                        size,
                        "_i",
                        "_o",
                        &mut estimates,
                        &mut rvars,
                        directives,
                    );
                    inner_dims.push(inner);
                    outer_dims.push(outer);
                }
                Some(_) => outer_dims.push(var.clone()),
                None => inner_dims.push(var.clone()),
            }
        }

        let mut dims = inner_dims;
        let reordered = !outer_dims.is_empty();
        dims.extend(outer_dims);
        if reordered {
            directives.push(Directive::Reorder {
                func: func.clone(),
                stage,
                vars: dims.clone(),
            });
        }

        // Vectorize the innermost pure dimension when it is wide enough
        let vec_len = natural_vector_width(self.params.vec_len, &out_f.output_types);
        let vec_var = dims.iter().position(|d| !rvars.contains(d));
        if let Some(idx) = vec_var {
            let var = dims[idx].clone();
            if estimates.get(&var).is_some_and(|&e| e >= vec_len) {
                let (vi, vo) = split_dim(
                    &func,
                    stage,
                    &prefix,
                    &var,
                    vec_len,
                    "_vi",
                    "_vo",
                    &mut estimates,
                    &mut rvars,
                    directives,
                );
                directives.push(Directive::Vectorize {
                    func: func.clone(),
                    stage,
                    var: vi.clone(),
                });
                dims.splice(idx..=idx, [vi, vo]);
            }
        }

        // Parallelize from the outermost dimension inward until the target
        // machine is saturated
        let mut def_par = 1i64;
        for var in dims.iter().rev() {
            if rvars.contains(var) && !can_parallelize_rvar(var, def) {
                break;
            }
            if def_par > self.params.parallelism as i64 {
                break;
            }
            match estimates.get(var) {
                Some(&e) => {
                    directives.push(Directive::Parallel {
                        func: func.clone(),
                        stage,
                        var: var.clone(),
                    });
                    def_par = def_par.saturating_mul(e);
                }
                None => break,
            }
        }

        if def_par < self.params.parallelism as i64 {
            warn!("insufficient parallelism for {}", func);
        }
    }
}

/// Emit a split of `var` by `factor` and keep the bookkeeping current: the
/// estimate of `var` is replaced by estimates for the two new names, and a
/// split reduction dimension stays a reduction dimension under both names.
#[allow(clippy::too_many_arguments)]
fn split_dim(
    func: &str,
    stage: u32,
    prefix: &str,
    var: &str,
    factor: i64,
    in_suffix: &str,
    out_suffix: &str,
    estimates: &mut BTreeMap<String, i64>,
    rvars: &mut BTreeSet<String>,
    directives: &mut Vec<Directive>,
) -> (String, String) {
    let inner = format!("{}_{}{}", prefix, var, in_suffix);
    let outer = format!("{}_{}{}", prefix, var, out_suffix);

    directives.push(Directive::Split {
        func: func.to_string(),
        stage,
        var: var.to_string(),
        outer: outer.clone(),
        inner: inner.clone(),
        factor,
    });

    let extent = estimates
        .remove(var)
        .unwrap_or_else(|| panic!("splitting {} of {} without an extent estimate", var, func));
    estimates.insert(inner.clone(), factor);
    estimates.insert(outer.clone(), (extent + factor - 1) / factor);

    if rvars.remove(var) {
        rvars.insert(inner.clone());
        rvars.insert(outer.clone());
    }

    (inner, outer)
}

/// Vector width for a set of output types: the widest natural width among
/// them, where a 32-bit element gets `vec_len` lanes and narrower or wider
/// elements scale inversely with their byte width.
fn natural_vector_width(vec_len: u32, types: &[ScalarType]) -> i64 {
    types
        .iter()
        .map(|t| ((vec_len as i64 * 4) / t.bytes()).max(1))
        .max()
        .unwrap_or(1)
}

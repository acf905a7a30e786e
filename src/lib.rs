//! # TileFuse - Automatic Scheduling for Image-Processing Pipelines
//!
//! Given a pipeline of pure and reduction stages over multi-dimensional
//! grids, derives a full schedule automatically:
//! - Symbolic dependence analysis (which producer regions a stage needs)
//! - A static cost model (operation counts, bytes moved, working sets)
//! - A partitioner that searches stage groupings and tile sizes
//! - Schedule emission (split/reorder/vectorize/parallelize directives)
//!
//! ## Architecture
//!
//! ```text
//! Pipeline → DependenceAnalysis → CostModel → Partitioner → Schedule
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use tilefuse::prelude::*;
//!
//! let blur_x = Function::pure("blur_x", &["x", "y"], /* ... */);
//! let blur_y = Function::pure("blur_y", &["x", "y"], /* ... */)
//!     .with_estimate("x", 0, 1536)
//!     .with_estimate("y", 0, 2560);
//!
//! let pipeline = Pipeline::new(vec![blur_x, blur_y], vec!["blur_y".into()])?;
//! let schedule = tilefuse::generate_schedule(&pipeline, MachineParams::default())?;
//! println!("{}", schedule);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod analysis;
pub mod bounds;
pub mod cost;
pub mod error;
pub mod expr;
pub mod partition;
pub mod pipeline;
pub mod region;
pub mod schedule;
pub mod simplify;

// Re-export commonly used types
pub mod prelude {
    //! Convenient re-exports of commonly used types.

    pub use crate::analysis::{pipeline_bounds, DependenceAnalysis};
    pub use crate::cost::{CostModel, StageCost};
    pub use crate::error::{SchedError, SchedResult};
    pub use crate::expr::{BinOp, CallKind, Expr, ScalarType};
    pub use crate::partition::{Group, GroupAnalysis, Level, Partitioner};
    pub use crate::pipeline::{Definition, Estimate, FStage, Function, Pipeline};
    pub use crate::region::{DimBounds, Interval, Region};
    pub use crate::schedule::{Directive, Schedule};
    pub use crate::MachineParams;
}

use crate::analysis::{pipeline_bounds, DependenceAnalysis};
use crate::cost::CostModel;
use crate::partition::{Level, Partitioner};
use crate::pipeline::{FStage, Pipeline};
use crate::schedule::Schedule;
use anyhow::Result;
use log::debug;
use serde::{Deserialize, Serialize};

/// Target machine description driving the scheduling decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MachineParams {
    /// Number of cores the schedule should saturate
    pub parallelism: u32,
    /// Vector lanes for a 32-bit element type
    pub vec_len: u32,
    /// Bytes of fast memory a tile's working set should fit in
    pub fast_mem_size: u64,
    /// Relative cost of a slow-memory access versus an arithmetic operation
    pub balance: u32,
}

impl Default for MachineParams {
    fn default() -> MachineParams {
        MachineParams {
            parallelism: 16,
            vec_len: 8,
            fast_mem_size: 1024,
            balance: 10,
        }
    }
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Derive a schedule for `pipeline` on the described machine.
///
/// Fails only on malformed input (missing output estimates); everything
/// after that point is a deterministic search. Stages are first grouped by
/// inlining cheap pure producers into their consumers, then by
/// tile-granularity fusion, and every surviving group gets a tile
/// configuration picked by exhaustive search before emission.
pub fn generate_schedule(pipeline: &Pipeline, params: MachineParams) -> Result<Schedule> {
    pipeline.check_output_estimates()?;

    let dep = DependenceAnalysis::new(pipeline);
    let bounds = pipeline_bounds(&dep);
    let cost = CostModel::new(pipeline);
    let mut part = Partitioner::new(&dep, &cost, &bounds, params);

    for f in pipeline.functions() {
        let producers = f.calls();
        for s in 0..f.num_stages() {
            let stg = FStage::new(&f.name, s);
            let reuse = part.evaluate_reuse(&stg, &producers);
            for (dim, r) in &reuse {
                debug!("reuse {} along {}: {:?}", stg, dim, r);
            }
        }
    }

    part.initialize_groups();
    part.group(Level::Inline);
    part.group(Level::FastMem);
    // Merged groups need fresh tile configurations
    part.initialize_groups();

    Ok(part.emit_schedule())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_default_machine_params() {
        let p = MachineParams::default();
        assert_eq!(p.parallelism, 16);
        assert_eq!(p.vec_len, 8);
        assert_eq!(p.fast_mem_size, 1024);
        assert_eq!(p.balance, 10);
    }
}

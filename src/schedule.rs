//! Scheduling directives: the output of the scheduler.
//!
//! A `Schedule` is an ordered sequence of directives, one per structural
//! decision, sufficient for a downstream code generator to realize the
//! chosen loop structure. Order is significant and preserved: splits come
//! before reorders, reorders before vectorize/parallelize.

use serde::{Deserialize, Serialize};
use std::fmt;

/// One scheduling decision for a stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Directive {
    /// Compute the function at the root level, outside any consumer loop.
    ComputeRoot {
        /// Scheduled function
        func: String,
    },
    /// Compute the function inline into its consumers; no allocation.
    ComputeInline {
        /// Inlined function
        func: String,
    },
    /// Subsequent directives target this update stage of the function.
    Update {
        /// Scheduled function
        func: String,
        /// Update index (stage - 1)
        index: u32,
    },
    /// Split a dimension into an outer/inner pair.
    Split {
        /// Scheduled function
        func: String,
        /// Stage the split applies to
        stage: u32,
        /// The dimension being split
        var: String,
        /// New outer dimension name
        outer: String,
        /// New inner dimension name
        inner: String,
        /// Split factor (inner extent)
        factor: i64,
    },
    /// Reorder the stage's dimensions, innermost first.
    Reorder {
        /// Scheduled function
        func: String,
        /// Stage the reorder applies to
        stage: u32,
        /// New dimension order, innermost first
        vars: Vec<String>,
    },
    /// Vectorize a dimension.
    Vectorize {
        /// Scheduled function
        func: String,
        /// Stage the directive applies to
        stage: u32,
        /// Vectorized dimension
        var: String,
    },
    /// Run a dimension in parallel.
    Parallel {
        /// Scheduled function
        func: String,
        /// Stage the directive applies to
        stage: u32,
        /// Parallelized dimension
        var: String,
    },
}

impl fmt::Display for Directive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Directive::ComputeRoot { func } => write!(f, "{}.compute_root();", func),
            Directive::ComputeInline { func } => write!(f, "{}.compute_inline();", func),
            Directive::Update { func, index } => write!(f, "{}.update({});", func, index),
            Directive::Split {
                func,
                var,
                outer,
                inner,
                factor,
                ..
            } => write!(f, "{}.split({}, {}, {}, {});", func, var, outer, inner, factor),
            Directive::Reorder { func, vars, .. } => {
                write!(f, "{}.reorder({});", func, vars.join(", "))
            }
            Directive::Vectorize { func, var, .. } => write!(f, "{}.vectorize({});", func, var),
            Directive::Parallel { func, var, .. } => write!(f, "{}.parallel({});", func, var),
        }
    }
}

/// An ordered schedule for the whole pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Schedule {
    /// Directives in emission order
    pub directives: Vec<Directive>,
}

impl Schedule {
    /// Directives touching one function, in order.
    pub fn for_func<'a>(&'a self, func: &'a str) -> impl Iterator<Item = &'a Directive> {
        self.directives.iter().filter(move |d| match d {
            Directive::ComputeRoot { func: f }
            | Directive::ComputeInline { func: f }
            | Directive::Update { func: f, .. }
            | Directive::Split { func: f, .. }
            | Directive::Reorder { func: f, .. }
            | Directive::Vectorize { func: f, .. }
            | Directive::Parallel { func: f, .. } => f == func,
        })
    }
}

impl fmt::Display for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for d in &self.directives {
            writeln!(f, "{}", d)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_directive_display() {
        let d = Directive::Split {
            func: "blur".to_string(),
            stage: 0,
            var: "x".to_string(),
            outer: "blur_0_x_o".to_string(),
            inner: "blur_0_x_i".to_string(),
            factor: 64,
        };
        assert_eq!(
            format!("{}", d),
            "blur.split(x, blur_0_x_o, blur_0_x_i, 64);"
        );
    }

    #[test]
    fn test_schedule_display_order() {
        let s = Schedule {
            directives: vec![
                Directive::ComputeRoot {
                    func: "g".to_string(),
                },
                Directive::Parallel {
                    func: "g".to_string(),
                    stage: 0,
                    var: "y".to_string(),
                },
            ],
        };
        let text = format!("{}", s);
        let root = text.find("compute_root").unwrap();
        let par = text.find("parallel").unwrap();
        assert!(root < par);
    }
}

//! Parsed playbook trees.
//!
//! The YAML surface syntax is the catalog's concern; this module works with
//! the already-parsed tree: metadata, a default workload, and the step
//! graph.

mod parser;
mod types;

pub use parser::parse_playbook;
pub use types::{
    ActionSpec, IteratorMode, IteratorSpec, Metadata, NextSpec, NextTarget, Playbook, Step,
    StepBody, SubPlaybookSpec, START_STEP,
};

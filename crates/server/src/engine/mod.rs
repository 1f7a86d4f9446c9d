//! The execution engine: event-log folding, predicate evaluation, the
//! broker, and the loop coordinator.

pub mod broker;
pub mod evaluator;
pub mod iterator;
pub mod state;

pub use broker::Broker;
pub use evaluator::{ConditionEvaluator, TransitionDecision};
pub use state::{ExecutionSnapshot, NodeState};

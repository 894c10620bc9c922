mod accumulator;
mod aggregator;

pub use accumulator::RollupAccumulator;
pub use aggregator::{Aggregator, ProcessOutcome, AGGREGATE_ROWS, AGGREGATE_TIME};

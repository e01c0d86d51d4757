/// Exponentially growing delay, optionally jittered and capped.
pub mod exponential;

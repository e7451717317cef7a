pub mod fixtures;
pub mod harness;

#[allow(unused_imports)]
pub use fixtures::{seeded_bytes, split_into_chunks};
#[allow(unused_imports)]
pub use harness::{CountingCombiner, FailingCombiner, Harness};

pub mod compare;
pub mod config;
pub mod harness;
pub mod problem;
pub mod sandbox;
pub mod verdict;

pub use harness::Grader;

pub mod batching;
pub mod common;
pub mod compilation;
pub mod constraints;
pub mod expr;
pub mod generator;
pub mod knobs;
pub mod opinfo;
pub mod ordering;
pub mod pprint;
pub mod solver;
pub mod target;
pub mod utils;

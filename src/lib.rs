// Library exports for cactus-caf
pub mod adjacency;
pub mod anneal;
pub mod cactus;
pub mod config;
pub mod merge_graph;
pub mod output;
pub mod paf;
pub mod partition;
pub mod pinch;
pub mod quality;
pub mod refine;
pub mod undo;
pub mod union_find;
pub mod unit;

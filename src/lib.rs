pub mod advisor;
pub mod config;
pub mod imbalance;
pub mod indicators;
pub mod loader;
pub mod pipeline;
pub mod profiler;
pub mod report;
pub mod scm;
pub mod structure;
pub mod sweep;
pub mod types;

#[cfg(test)]
mod test_support;

pub mod runner_pool;
pub mod sink;

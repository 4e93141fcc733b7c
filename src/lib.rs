pub mod config;
pub mod db;
pub mod graph;
pub mod pipeline;
pub mod server;
pub mod test_support;
pub mod transform;

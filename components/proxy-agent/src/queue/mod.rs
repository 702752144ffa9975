pub mod models;
pub mod write_queue;

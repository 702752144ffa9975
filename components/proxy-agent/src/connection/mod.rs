pub mod backoff;
pub mod models;
pub mod supervisor;

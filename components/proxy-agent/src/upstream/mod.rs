pub mod client;
pub mod http;
pub mod sse;
pub mod stdio;
pub mod stream;

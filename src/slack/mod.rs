pub mod client;
pub mod source;

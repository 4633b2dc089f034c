pub mod backup;
pub mod cache;
pub mod config;
pub mod engine;
pub mod last_run;
pub mod lock;
pub mod model;
pub mod paths;
pub mod progress;
pub mod search;
pub mod source;
pub mod store;

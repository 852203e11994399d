pub mod accuracy;
pub mod adjust;
pub mod args;
pub mod config;
pub mod error;
pub mod expectation;
pub mod history;
pub mod logging;
pub mod model;
pub mod onoff;
pub mod pipeline;
pub mod rapm;
pub mod recency;
pub mod source;
pub mod store;
pub mod synthetic;

//! Port traits: the narrow interfaces the domain consumes.

pub mod completion_port;
pub mod config_port;
pub mod data_port;
pub mod indicator_port;
pub mod persistence_port;
pub mod report_port;

pub mod aggspec;
pub mod config;
pub mod db;
pub mod frame;
pub mod keys;
pub mod pivot;
pub mod report;
pub mod task;
pub mod template;
pub mod ts;
pub mod xquery;

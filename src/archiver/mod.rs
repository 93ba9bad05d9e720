pub mod builder;
pub mod classify;
pub mod clean;
pub mod codec;
pub mod config;
pub mod container;
pub mod lifecycle;
pub mod restore;
pub mod run;
pub mod scheduler;
pub mod validate;

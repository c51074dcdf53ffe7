//! Application services layer.

pub mod accounts;
pub mod authoring;
pub mod error;
pub mod feed;
pub mod forms;
pub mod pagination;
pub mod repos;

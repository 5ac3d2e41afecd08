//! Managers - orchestration of lifecycle transitions against a backend
//!
//! - [`VariablesManager`]: physical column changes plus container
//!   re-partitioning on every loaded receptor of the table
//! - [`ReceptorsManager`]: row fetch/insert/update/delete plus partitioning
//!   of fetched fields into Active and Inactive containers
//!
//! Both take the table lock before the receptor lock.

pub mod receptors;
pub mod variables;

pub use receptors::ReceptorsManager;
pub use variables::VariablesManager;

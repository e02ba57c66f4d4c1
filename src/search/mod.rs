//! Search layer facade.
//!
//! - **[`catalog`]**: the fixed set of tables and columns the explorer knows about.
//! - **[`validator`]**: lexical read-only gate for ad-hoc SQL.
//! - **[`adhoc`]**: time-bounded execution of validated ad-hoc SQL.
//! - **[`query`]**: keyword search and filtered listings over the model view.
//! - **[`cache`]**: bounded LRU of computed results keyed by query signature.

pub mod adhoc;
pub mod cache;
pub mod catalog;
pub mod query;
pub mod validator;

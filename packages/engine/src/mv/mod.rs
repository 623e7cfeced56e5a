//! Materialized views owned by FilterMate: naming, reference tracking and
//! cleanup.

pub mod cleanup;
pub mod naming;
pub mod tracker;

pub use cleanup::{
    cleanup_session_materialized_views, clear_orphaned_subsets, drop_materialized_view,
    list_materialized_views, materialized_view_exists, release_layer,
};
pub use tracker::MvReferenceTracker;

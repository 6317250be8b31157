pub mod event_filter;
pub mod local_watcher;
pub mod range_planner;
pub mod synchronizer;

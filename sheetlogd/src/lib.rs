pub mod config;
pub mod daemon;
pub mod ledger;
pub mod oauth_flow;
pub mod storage;
pub mod sync;
pub mod token_provider;

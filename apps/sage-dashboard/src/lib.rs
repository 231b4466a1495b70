pub mod auth;
pub mod cache;
pub mod catalog;
pub mod chart;
pub mod cli;
pub mod config;
pub mod error;
pub mod images;
pub mod query;
pub mod series;
pub mod session;
pub mod smoothing;
pub mod time_window;

#[cfg(test)]
pub mod test_support;

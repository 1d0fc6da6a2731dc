pub mod cache;
pub mod classifier;
pub mod clock;
pub mod config;
pub mod controller;
pub mod errors;
pub mod model;
pub mod notify;
pub mod page;
pub mod scraper;
pub mod settle;

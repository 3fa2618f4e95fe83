pub mod agent;
pub mod errors;
pub mod formats;
pub mod marketplace;
pub mod models;
pub mod providers;
pub mod tools;
pub mod weather;

pub mod db;
pub mod fooddata;
pub mod geo;
pub mod insights;
pub mod location;
pub mod metrics;
pub mod models;
pub mod noise;
pub mod nutrition;
pub mod postgrest;
pub mod reconcile;
pub mod scheduler;
pub mod screen_time;
pub mod service;
pub mod tables;
pub mod worker;

#[cfg(test)]
mod testing;

pub mod allocator;
pub mod category;
pub mod config;
pub mod db;
pub mod environment;
pub mod errors;
pub mod group;
pub mod routes;
pub mod service;
pub mod urls;
pub mod user;
pub mod validation;

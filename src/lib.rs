// Library for tests to access modules

pub mod badges;
pub mod config;
pub mod disks;
pub mod fetch;
pub mod history_store;
pub mod kv_store;
pub mod models;
pub mod registry;
pub mod render;
pub mod routes;
pub mod scheduler;
pub mod status;
pub mod view;

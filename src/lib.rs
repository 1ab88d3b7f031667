pub mod campaigns;
pub mod config;
pub mod db;
pub mod gateway;
pub mod queue;
pub mod server;
pub mod version;
pub mod web;
pub mod worker;

pub mod app;
pub mod config;
pub mod event;
pub mod fsm;
pub mod handler;
pub mod synthesis;
pub mod useragent;
pub mod version;

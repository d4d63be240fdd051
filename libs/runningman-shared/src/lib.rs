pub mod cache;
pub mod config;
pub mod link;
pub mod notify;
pub mod payment;
pub mod pricing;
pub mod retry;
pub mod tripay;

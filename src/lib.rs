pub mod checkout;
pub mod clock;
pub mod command;
pub mod compactor;
pub mod config;
pub mod engine;
pub mod journal;
pub mod lifecycle;
pub mod limits;
pub mod model;
pub mod notify;
pub mod observability;
pub mod policy;
pub mod pricing;
pub mod refund;


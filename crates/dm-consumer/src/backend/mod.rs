mod broker;
mod cloud;
mod database;

pub use broker::BrokerSource;
pub use cloud::CloudSource;
pub use database::DatabaseSource;

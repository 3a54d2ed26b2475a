mod config;
mod error;
mod request;

pub use config::AdmissionConfig;
pub use error::GatehouseError;
pub use request::RequestInfo;

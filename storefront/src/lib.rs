pub mod cart;
pub mod error;
pub mod executable_utils;
pub mod gateway;
pub mod model;
pub mod reconciler;
pub mod routes;
pub mod session;
pub mod storage;
pub mod storage_model;
pub mod tax;
pub mod workflow;

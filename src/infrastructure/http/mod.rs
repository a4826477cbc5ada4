//! HTTP adapters for the external endpoints
pub mod token_client;

pub use token_client::{parse_token_response, HttpTokenClient};

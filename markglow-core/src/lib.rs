pub mod config;
pub mod decoder;
pub mod encoder;
pub mod error;
pub mod http_client;
pub mod model;
pub mod prompts;
pub mod provider;
pub mod relay;
pub mod server;
pub mod stream;
pub mod telemetry;
pub mod upstream;

pub mod access;
pub mod commands;
pub mod config;
pub mod discord;
pub mod dispatcher;
pub mod http_client;
pub mod llm_client;
pub mod llm_gateway;
pub mod persona;
pub mod platform;
pub mod runtime;
pub mod session;
pub mod turn;

#[cfg(test)]
pub(crate) mod test_support;

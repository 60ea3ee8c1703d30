pub mod http_client_factory;
pub mod source_health;

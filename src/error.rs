use crate::config::ConfigError;

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid listen address: {0}")]
    Addr(#[from] std::net::AddrParseError),

    #[error("{0}")]
    Config(#[from] ConfigError),

    #[error("bind failed for {addr} after {tries} tries")]
    BindExhausted { addr: std::net::SocketAddr, tries: usize },
}

pub type Result<T> = std::result::Result<T, ServerError>;

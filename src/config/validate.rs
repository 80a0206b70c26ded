use crate::config::parser::ConfigError;
use crate::config::types::{Config, LocationConfig, ServerConfig};

/// Post-parse sanity pass. The parser guarantees shape; this guarantees the
/// values can actually drive the server.
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    let mut seen: Vec<(String, u16, String)> = Vec::new();

    for server in &config.servers {
        validate_server(server)?;

        let key = (server.host.clone(), server.port, server.server_name.clone());
        if seen.contains(&key) {
            return Err(err(format!(
                "duplicate server '{}' on {}:{}",
                key.2, key.0, key.1
            )));
        }
        seen.push(key);
    }

    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.port == 0 {
        return Err(err(format!("server '{}': port 0", server.server_name)));
    }
    if server.timeout == 0 {
        return Err(err(format!("server '{}': timeout 0", server.server_name)));
    }
    if server.keep_alive_max == 0 {
        return Err(err(format!(
            "server '{}': keep_alive_max 0",
            server.server_name
        )));
    }

    for (ext, interpreter) in &server.cgi {
        if !ext.starts_with('.') {
            return Err(err(format!(
                "server '{}': cgi extension '{}' must start with '.'",
                server.server_name, ext
            )));
        }
        if interpreter.is_empty() {
            return Err(err(format!(
                "server '{}': cgi '{}' has no interpreter",
                server.server_name, ext
            )));
        }
    }

    validate_common(&server.common, &server.server_name)?;
    for location in &server.locations {
        validate_location(location, &server.server_name)?;
    }

    Ok(())
}

fn validate_location(location: &LocationConfig, server_name: &str) -> Result<(), ConfigError> {
    if !location.path.starts_with('/') {
        return Err(err(format!(
            "server '{}': location path '{}' must start with '/'",
            server_name, location.path
        )));
    }
    if let Some(alias) = &location.alias {
        if !alias.starts_with('/') {
            return Err(err(format!(
                "server '{}': alias '{}' must start with '/'",
                server_name, alias
            )));
        }
    }
    validate_common(&location.common, server_name)?;
    for inner in &location.locations {
        validate_location(inner, server_name)?;
    }
    Ok(())
}

fn validate_common(
    common: &crate::config::types::CommonConfig,
    server_name: &str,
) -> Result<(), ConfigError> {
    if common.client_body_size == 0 {
        return Err(err(format!(
            "server '{}': client_body_buffer_size 0",
            server_name
        )));
    }
    if !common.root.starts_with('/') {
        return Err(err(format!(
            "server '{}': root '{}' must start with '/'",
            server_name, common.root
        )));
    }
    for page in common.error_page.values() {
        if !page.starts_with('/') {
            return Err(err(format!(
                "server '{}': error_page '{}' must start with '/'",
                server_name, page
            )));
        }
    }
    Ok(())
}

fn err(message: String) -> ConfigError {
    ConfigError {
        message,
        loc: None,
        file: String::new(),
    }
}

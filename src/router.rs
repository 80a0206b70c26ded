use crate::prelude::*;

/// Pick the virtual server for a `Host` header among the servers bound to
/// the accepting listener; the first-bound server is the fallback.
pub fn resolve_server(
    configs: &[Arc<ServerConfig>],
    host_header: Option<&str>,
) -> Arc<ServerConfig> {
    if let Some(host) = host_header {
        let hostname = host.split(':').next().unwrap_or("");
        for config in configs {
            if config.server_name == hostname {
                return Arc::clone(config);
            }
        }
    }
    Arc::clone(&configs[0])
}

/// `alias` replaces the matched location prefix; `root` prepends.
pub fn substitute_path(location: &LocationConfig, path: &str) -> String {
    match &location.alias {
        Some(alias) => format!(
            "{}{}",
            alias.trim_end_matches('/'),
            &path[location.path.len()..]
        ),
        None => format!("{}{}", location.common.root.trim_end_matches('/'), path),
    }
}

/// Filesystem path for a request path, relative to the working directory.
pub fn target_path(location: &LocationConfig, path: &str) -> String {
    format!(".{}", substitute_path(location, path))
}

/// Fill the request's routing results: substituted and target paths, and
/// the CGI split when the path carries a configured extension.
pub fn classify(req: &mut HttpRequest) {
    let Some(server) = req.server_config.clone() else {
        return;
    };

    req.substituted_path = substitute_path(&req.location, &req.path);
    req.target_path = format!(".{}", req.substituted_path);

    for (ext, interpreter) in &server.cgi {
        if let Some(pos) = req.path.find(ext.as_str()) {
            let split = pos + ext.len();
            req.is_cgi = true;
            req.script_path = target_path(&req.location, &req.path[..split]);
            req.path_info = req.path[split..].to_string();
            req.interpreter = interpreter.clone();
            break;
        }
    }
}

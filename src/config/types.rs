use crate::http::Method;
use std::collections::HashMap;
use std::sync::Arc;

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_SERVER_NAME: &str = "_";
pub const DEFAULT_CLIENT_BODY_SIZE: usize = 8192;
pub const DEFAULT_TIMEOUT: u64 = 60;
pub const DEFAULT_KEEP_ALIVE_TIMEOUT: u64 = 15;
pub const DEFAULT_KEEP_ALIVE_MAX: u32 = 100;
pub const DEFAULT_SESSION_TIMEOUT: u64 = 3600;
pub const DEFAULT_ROOT: &str = "/html";
pub const DEFAULT_INDEX: &str = "index.html";
pub const DEFAULT_LOCATION_PATH: &str = "/";

/// Directives shared by server and location scope. A nested scope starts
/// from a copy of its parent, so inheritance is resolved at parse time.
#[derive(Debug, Clone)]
pub struct CommonConfig {
    pub client_body_size: usize,
    pub root: String,
    pub error_page: HashMap<u16, String>,
    pub index: Vec<String>,
}

impl Default for CommonConfig {
    fn default() -> Self {
        Self {
            client_body_size: DEFAULT_CLIENT_BODY_SIZE,
            root: DEFAULT_ROOT.to_string(),
            error_page: HashMap::new(),
            index: Vec::new(),
        }
    }
}

impl CommonConfig {
    /// Index candidates, falling back to `index.html` when none configured.
    pub fn index_files(&self) -> Vec<String> {
        if self.index.is_empty() {
            return vec![DEFAULT_INDEX.to_string()];
        }
        self.index.clone()
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub server_name: String,
    pub timeout: u64,
    pub keep_alive_timeout: u64,
    pub keep_alive_max: u32,
    pub session_timeout: u64,
    /// `cgi <ext> <interpreter>;` pairs, in declaration order.
    pub cgi: Vec<(String, String)>,
    pub common: CommonConfig,
    pub locations: Vec<LocationConfig>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            server_name: DEFAULT_SERVER_NAME.to_string(),
            timeout: DEFAULT_TIMEOUT,
            keep_alive_timeout: DEFAULT_KEEP_ALIVE_TIMEOUT,
            keep_alive_max: DEFAULT_KEEP_ALIVE_MAX,
            session_timeout: DEFAULT_SESSION_TIMEOUT,
            cgi: Vec::new(),
            common: CommonConfig::default(),
            locations: Vec::new(),
        }
    }
}

impl ServerConfig {
    /// Longest-prefix match over the location tree. When nothing matches,
    /// an implicit `/` location carrying the server-scope common fields
    /// stands in, so every request resolves somewhere.
    pub fn find_location(&self, path: &str) -> LocationConfig {
        let mut best: Option<&LocationConfig> = None;
        for loc in &self.locations {
            Self::walk(loc, path, &mut best);
        }

        match best {
            Some(loc) => loc.clone(),
            None => LocationConfig::from_server(self),
        }
    }

    fn walk<'a>(loc: &'a LocationConfig, path: &str, best: &mut Option<&'a LocationConfig>) {
        if path.starts_with(&loc.path) {
            let longer = match best {
                Some(b) => loc.path.len() > b.path.len(),
                None => true,
            };
            if longer {
                *best = Some(loc);
            }
        }
        for inner in &loc.locations {
            Self::walk(inner, path, best);
        }
    }
}

#[derive(Debug, Clone)]
pub struct LocationConfig {
    pub path: String,
    pub alias: Option<String>,
    pub limit_except: Vec<Method>,
    pub return_directive: Option<(u16, String)>,
    pub autoindex: bool,
    pub common: CommonConfig,
    pub locations: Vec<LocationConfig>,
}

impl Default for LocationConfig {
    fn default() -> Self {
        Self {
            path: DEFAULT_LOCATION_PATH.to_string(),
            alias: None,
            limit_except: Vec::new(),
            return_directive: None,
            autoindex: false,
            common: CommonConfig::default(),
            locations: Vec::new(),
        }
    }
}

impl LocationConfig {
    pub fn from_server(server: &ServerConfig) -> Self {
        Self {
            common: server.common.clone(),
            ..Default::default()
        }
    }

    pub fn from_location(parent: &LocationConfig) -> Self {
        Self {
            common: parent.common.clone(),
            ..Default::default()
        }
    }

    /// An absent `limit_except` allows every supported method.
    pub fn is_method_allowed(&self, method: &Method) -> bool {
        self.limit_except.is_empty() || self.limit_except.contains(method)
    }

    /// CSV for the 405 `Allow` header.
    pub fn limit_except_csv(&self) -> String {
        let methods: Vec<&str> = if self.limit_except.is_empty() {
            Method::ALL.iter().map(|m| m.as_str()).collect()
        } else {
            self.limit_except.iter().map(|m| m.as_str()).collect()
        };
        methods.join(", ")
    }

    /// Filesystem path of the configured error page for `status`, if any.
    pub fn error_page_target(&self, status: u16) -> Option<String> {
        self.common
            .error_page
            .get(&status)
            .map(|page| format!(".{}{}", self.common.root, page))
    }
}

#[derive(Debug, Clone, Default)]
pub struct Config {
    pub servers: Vec<Arc<ServerConfig>>,
}

impl Config {
    /// Servers sharing one `host:port`, in declaration order. The first
    /// entry is the fallback when no `server_name` matches.
    pub fn servers_for(&self, host: &str, port: u16) -> Vec<Arc<ServerConfig>> {
        self.servers
            .iter()
            .filter(|s| s.host == host && s.port == port)
            .cloned()
            .collect()
    }

    /// Distinct listen addresses in declaration order.
    pub fn listen_addrs(&self) -> Vec<(String, u16)> {
        let mut addrs: Vec<(String, u16)> = Vec::new();
        for server in &self.servers {
            let key = (server.host.clone(), server.port);
            if !addrs.contains(&key) {
                addrs.push(key);
            }
        }
        addrs
    }
}

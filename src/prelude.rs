pub use crate::config::{CommonConfig, Config, LocationConfig, ServerConfig};
pub use crate::error::{Result, ServerError};
pub use crate::http::connection::{Connection, Phase, Transfer};
pub use crate::http::{find_subsequence, HttpRequest, HttpResponse, Method, RecvStatus, SendStatus};
pub use crate::session::{Cookies, SessionStore};

pub use mio::{
    net::{TcpListener, TcpStream},
    Events, Interest, Poll, Token,
};

pub use std::collections::HashMap;
pub use std::fs::{self, File, OpenOptions};
pub use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
pub use std::net::SocketAddr;
pub use std::path::{Path, PathBuf};
pub use std::sync::Arc;
pub use std::time::{Duration, Instant, SystemTime};

pub use std::{
    fmt::{self, Display},
    io,
    process::{Child, Command, Stdio},
    str::FromStr,
};

pub use tracing::{debug, error, info, trace, warn};

/// One read/write/send quantum; also the CGI pipe read size.
pub const BUF_SIZE: usize = 1024 * 16;
pub const URL_MAX_LENGTH: usize = 2000;

pub const BIND_MAX_TRIES: usize = 10;
pub const TRY_SLEEP_TIME: u64 = 5;

pub const SERVER_SOFTWARE: &str = "tidepool/0.1.0";
pub const SESSION_KEY: &str = "session_id";

/// Thrown-status alias; handlers unwind with these and the error-page
/// resolver turns them into responses.
pub type HttpStatus = u16;

pub const HTTP_OK: u16 = 200;
pub const HTTP_CREATED: u16 = 201;
pub const HTTP_NO_CONTENT: u16 = 204;
pub const HTTP_FOUND: u16 = 302;

pub const HTTP_BAD_REQUEST: u16 = 400;
pub const HTTP_FORBIDDEN: u16 = 403;
pub const HTTP_NOT_FOUND: u16 = 404;
pub const HTTP_METHOD_NOT_ALLOWED: u16 = 405;
pub const HTTP_REQUEST_TIMEOUT: u16 = 408;
pub const HTTP_PAYLOAD_TOO_LARGE: u16 = 413;
pub const HTTP_URI_TOO_LONG: u16 = 414;
pub const HTTP_UPGRADE_REQUIRED: u16 = 426;

pub const HTTP_INTERNAL_SERVER_ERROR: u16 = 500;
pub const HTTP_NOT_IMPLEMENTED: u16 = 501;
pub const HTTP_BAD_GATEWAY: u16 = 502;
pub const HTTP_GATEWAY_TIMEOUT: u16 = 504;
pub const HTTP_VERSION_NOT_SUPPORTED: u16 = 505;

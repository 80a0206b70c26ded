use crate::config::{LocationConfig, ServerConfig};
use crate::prelude::*;
use crate::router;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Delete,
    Put,
    Head,
}

impl Method {
    pub const ALL: [Method; 5] = [
        Method::Get,
        Method::Post,
        Method::Delete,
        Method::Put,
        Method::Head,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Delete => "DELETE",
            Method::Put => "PUT",
            Method::Head => "HEAD",
        }
    }
}

#[derive(Debug)]
pub struct UnknownMethod;

impl FromStr for Method {
    type Err = UnknownMethod;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "GET" => Ok(Method::Get),
            "POST" => Ok(Method::Post),
            "DELETE" => Ok(Method::Delete),
            "PUT" => Ok(Method::Put),
            "HEAD" => Ok(Method::Head),
            _ => Err(UnknownMethod),
        }
    }
}

impl Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecvStatus {
    HeaderReceive,
    BodyReceive,
    ReceiveDone,
    ReceiveError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionHint {
    KeepAlive,
    Close,
}

const URI_EXTRA_CHARS: &str = ":%._\\+~#?&/=-";

#[derive(Debug)]
pub struct HttpRequest {
    pub method: Method,
    pub path: String,
    pub query_string: String,
    pub version: String,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
    pub recv_status: RecvStatus,
    pub content_length: Option<usize>,
    pub chunked: bool,
    pub connection: ConnectionHint,
    pub error_status: Option<HttpStatus>,

    pub server_config: Option<Arc<ServerConfig>>,
    pub location: LocationConfig,
    pub substituted_path: String,
    pub target_path: String,

    pub is_cgi: bool,
    pub script_path: String,
    pub interpreter: String,
    pub path_info: String,
}

impl Default for HttpRequest {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpRequest {
    pub fn new() -> Self {
        HttpRequest {
            method: Method::Get,
            path: String::new(),
            query_string: String::new(),
            version: String::new(),
            headers: HashMap::new(),
            body: Vec::new(),
            recv_status: RecvStatus::HeaderReceive,
            content_length: None,
            chunked: false,
            connection: ConnectionHint::KeepAlive,
            error_status: None,
            server_config: None,
            location: LocationConfig::default(),
            substituted_path: String::new(),
            target_path: String::new(),
            is_cgi: false,
            script_path: String::new(),
            interpreter: String::new(),
            path_info: String::new(),
        }
    }

    pub fn is_recv_status(&self, status: RecvStatus) -> bool {
        self.recv_status == status
    }

    pub fn set_error(&mut self, status: HttpStatus) {
        self.recv_status = RecvStatus::ReceiveError;
        self.error_status = Some(status);
    }

    pub fn error_status_code(&self) -> HttpStatus {
        self.error_status.unwrap_or(HTTP_BAD_REQUEST)
    }

    /// Parse the header block (everything before the blank line), resolve
    /// the virtual server and location, and classify CGI. On failure the
    /// returned status becomes the error response.
    pub fn parse_header_block(
        &mut self,
        block: &[u8],
        configs: &[Arc<ServerConfig>],
    ) -> std::result::Result<(), HttpStatus> {
        let text = std::str::from_utf8(block).map_err(|_| HTTP_BAD_REQUEST)?;
        let mut lines = text.split("\r\n");

        let request_line = lines.next().ok_or(HTTP_BAD_REQUEST)?;
        self.parse_request_line(request_line)?;

        for line in lines {
            if line.is_empty() {
                continue;
            }
            let (field, value) = line.split_once(':').ok_or(HTTP_BAD_REQUEST)?;
            self.headers
                .insert(field.trim().to_ascii_lowercase(), value.trim().to_string());
        }

        if self.headers.get("connection").map(|v| v.as_str()) == Some("close") {
            self.connection = ConnectionHint::Close;
        }

        let server = router::resolve_server(configs, self.headers.get("host").map(|s| s.as_str()));
        self.location = server.find_location(&self.path);
        self.server_config = Some(server);
        router::classify(self);

        self.chunked = self
            .headers
            .get("transfer-encoding")
            .map(|v| v.contains("chunked"))
            .unwrap_or(false);

        if let Some(value) = self.headers.get("content-length") {
            let length = value.parse::<usize>().map_err(|_| HTTP_BAD_REQUEST)?;
            self.content_length = Some(length);
            if !self.chunked && length > self.location.common.client_body_size {
                return Err(HTTP_PAYLOAD_TOO_LARGE);
            }
        }

        Ok(())
    }

    fn parse_request_line(&mut self, line: &str) -> std::result::Result<(), HttpStatus> {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() != 3 {
            return Err(HTTP_BAD_REQUEST);
        }

        self.method = Method::from_str(parts[0]).map_err(|_| HTTP_NOT_IMPLEMENTED)?;
        self.set_uri(parts[1])?;
        self.set_version(parts[2])?;

        Ok(())
    }

    fn set_uri(&mut self, uri: &str) -> std::result::Result<(), HttpStatus> {
        if uri.len() > URL_MAX_LENGTH {
            return Err(HTTP_URI_TOO_LONG);
        }
        if !uri.starts_with('/') {
            return Err(HTTP_BAD_REQUEST);
        }
        for c in uri.chars().skip(1) {
            if !c.is_ascii_alphanumeric() && !URI_EXTRA_CHARS.contains(c) {
                return Err(HTTP_BAD_REQUEST);
            }
        }

        match uri.split_once('?') {
            Some((path, query)) => {
                self.path = path.to_string();
                self.query_string = query.to_string();
            }
            None => self.path = uri.to_string(),
        }

        Ok(())
    }

    fn set_version(&mut self, version: &str) -> std::result::Result<(), HttpStatus> {
        let (name, number) = version.split_once('/').ok_or(HTTP_BAD_REQUEST)?;
        if name != "HTTP" {
            return Err(HTTP_BAD_REQUEST);
        }
        let value = number.parse::<f64>().map_err(|_| HTTP_BAD_REQUEST)?;
        if value > 1.1 {
            return Err(HTTP_VERSION_NOT_SUPPORTED);
        }
        if value < 1.1 {
            return Err(HTTP_UPGRADE_REQUIRED);
        }
        self.version = version.to_string();
        Ok(())
    }

    /// Request `Content-Type`, with the MIME table as fallback.
    pub fn content_type(&self) -> String {
        if let Some(value) = self.headers.get("content-type") {
            return value.clone();
        }
        let ext = Path::new(&self.path).extension().and_then(|s| s.to_str());
        crate::http::response::get_mime_type(ext).to_string()
    }
}

/// Decode a chunked body that has already been cut at the `0\r\n\r\n`
/// terminator (exclusive). Every chunk is a hex size line followed by
/// exactly that many payload bytes and a CRLF.
pub fn unchunk(raw: &[u8]) -> std::result::Result<Vec<u8>, HttpStatus> {
    let mut out = Vec::new();
    let mut pos = 0;

    while pos < raw.len() {
        let line_end = find_subsequence(raw, b"\r\n", pos).ok_or(HTTP_BAD_REQUEST)?;
        let size_str = std::str::from_utf8(&raw[pos..line_end]).map_err(|_| HTTP_BAD_REQUEST)?;
        let size = usize::from_str_radix(size_str.trim(), 16).map_err(|_| HTTP_BAD_REQUEST)?;
        pos = line_end + 2;

        if size == 0 {
            break;
        }
        if raw.len() < pos + size + 2 {
            return Err(HTTP_BAD_REQUEST);
        }
        out.extend_from_slice(&raw[pos..pos + size]);
        if &raw[pos + size..pos + size + 2] != b"\r\n" {
            return Err(HTTP_BAD_REQUEST);
        }
        pos += size + 2;
    }

    Ok(out)
}

pub fn find_subsequence(buffer: &[u8], needle: &[u8], start: usize) -> Option<usize> {
    if needle.is_empty() || start > buffer.len() {
        return None;
    }
    buffer[start..]
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|p| p + start)
}

use crate::prelude::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendStatus {
    Sending,
    Done,
}

/// Response header list. Keys are stored lowercase and rendered in
/// Pascal-Case on the wire; repeated fields such as `Set-Cookie` keep
/// their order.
#[derive(Debug, Clone, Default)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    pub fn set(&mut self, field: &str, value: &str) {
        let field = field.to_ascii_lowercase();
        self.entries.retain(|(k, _)| *k != field);
        self.entries.push((field, value.to_string()));
    }

    pub fn add(&mut self, field: &str, value: &str) {
        self.entries.push((field.to_ascii_lowercase(), value.to_string()));
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        let field = field.to_ascii_lowercase();
        self.entries
            .iter()
            .find(|(k, _)| *k == field)
            .map(|(_, v)| v.as_str())
    }

    pub fn get_all(&self, field: &str) -> Vec<String> {
        let field = field.to_ascii_lowercase();
        self.entries
            .iter()
            .filter(|(k, _)| *k == field)
            .map(|(_, v)| v.clone())
            .collect()
    }

    pub fn remove(&mut self, field: &str) {
        let field = field.to_ascii_lowercase();
        self.entries.retain(|(k, _)| *k != field);
    }

    pub fn contains(&self, field: &str) -> bool {
        self.get(field).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = &(String, String)> {
        self.entries.iter()
    }
}

#[derive(Debug)]
pub struct HttpResponse {
    pub status_code: HttpStatus,
    pub headers: Headers,
    pub body: Vec<u8>,
    /// Outgoing bytes for a file-backed write (POST/PUT body).
    pub file_buffer: Vec<u8>,
    pub offset: usize,
    pub is_error: bool,
    pub send_status: SendStatus,
    wire: Vec<u8>,
    sent: usize,
}

impl Default for HttpResponse {
    fn default() -> Self {
        Self::new(HTTP_OK)
    }
}

impl HttpResponse {
    pub fn new(status_code: HttpStatus) -> Self {
        Self {
            status_code,
            headers: Headers::default(),
            body: Vec::new(),
            file_buffer: Vec::new(),
            offset: 0,
            is_error: false,
            send_status: SendStatus::Sending,
            wire: Vec::new(),
            sent: 0,
        }
    }

    pub fn set_status(&mut self, status_code: HttpStatus) -> &mut Self {
        self.status_code = status_code;
        self
    }

    pub fn set_body(&mut self, body: Vec<u8>, content_type: &str) -> &mut Self {
        self.headers.set("content-type", content_type);
        self.body = body;
        self
    }

    pub fn status_text(code: HttpStatus) -> &'static str {
        match code {
            200 => "OK",
            201 => "Created",
            204 => "No Content",
            301 => "Moved Permanently",
            302 => "Found",
            303 => "See Other",
            307 => "Temporary Redirect",
            308 => "Permanent Redirect",
            400 => "Bad Request",
            403 => "Forbidden",
            404 => "Not Found",
            405 => "Method Not Allowed",
            408 => "Request Timeout",
            413 => "Payload Too Large",
            414 => "URI Too Long",
            426 => "Upgrade Required",
            500 => "Internal Server Error",
            501 => "Not Implemented",
            502 => "Bad Gateway",
            504 => "Gateway Timeout",
            505 => "HTTP Version Not Supported",
            _ => "Unknown",
        }
    }

    /// Serialize status line, headers, and body. `Content-Length` defaults
    /// to the body length (omitted on 204), `Date` is always stamped.
    fn compose(&mut self) {
        let mut wire = format!(
            "HTTP/1.1 {} {}\r\n",
            self.status_code,
            Self::status_text(self.status_code)
        )
        .into_bytes();

        if !self.headers.contains("content-length") && self.status_code != HTTP_NO_CONTENT {
            let length = self.body.len().to_string();
            self.headers.set("content-length", &length);
        }
        if !self.headers.contains("date") {
            self.headers
                .set("date", &httpdate::fmt_http_date(SystemTime::now()));
        }

        for (field, value) in self.headers.iter() {
            wire.extend_from_slice(
                format!("{}: {}\r\n", to_pascal_case(field), value).as_bytes(),
            );
        }
        wire.extend_from_slice(b"\r\n");
        wire.extend_from_slice(&self.body);

        self.wire = wire;
    }

    /// Push at most one quantum onto the socket. Composition happens on
    /// the first call so late header edits are honored.
    pub fn send_chunk(&mut self, stream: &mut TcpStream) -> io::Result<()> {
        if self.sent == 0 && self.wire.is_empty() {
            self.compose();
        }

        let end = usize::min(self.sent + BUF_SIZE, self.wire.len());
        if self.sent < end {
            match stream.write(&self.wire[self.sent..end]) {
                Ok(n) => self.sent += n,
                Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(()),
                Err(e) => return Err(e),
            }
        }

        if self.sent >= self.wire.len() {
            self.send_status = SendStatus::Done;
        }
        Ok(())
    }

    pub fn bytes_sent(&self) -> usize {
        self.sent
    }
}

// Stored field names are lowercase ASCII; the wire form capitalizes the
// first letter of every dash-separated word.
fn to_pascal_case(field: &str) -> String {
    let mut out = String::with_capacity(field.len());
    let mut start_of_word = true;
    for c in field.chars() {
        if c == '-' {
            out.push('-');
            start_of_word = true;
        } else if start_of_word {
            out.push(c.to_ascii_uppercase());
            start_of_word = false;
        } else {
            out.push(c);
        }
    }
    out
}

pub fn get_mime_type(extension: Option<&str>) -> &'static str {
    match extension {
        Some("html") | Some("htm") => "text/html",
        Some("css") => "text/css",
        Some("js") => "application/javascript",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("svg") => "image/svg+xml",
        Some("ico") => "image/x-icon",
        Some("json") => "application/json",
        Some("pdf") => "application/pdf",
        Some("txt") => "text/plain",
        _ => "application/octet-stream",
    }
}

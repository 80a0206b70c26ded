use crate::cgi::CgiJob;
use crate::http::request::{unchunk, ConnectionHint};
use crate::prelude::*;

/// Connection lifecycle, also the key into the per-phase timeout budgets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    HeaderRead,
    BodyRead,
    Gateway,
    Sending,
    KeepAlive,
}

/// The producer or consumer attached to the current response. Regular
/// files are not pollable under epoll, so these are paced by the reactor
/// one quantum per tick instead of being armed in the readiness set.
#[derive(Debug)]
pub enum Transfer {
    Idle,
    FileRead { file: File },
    FileWrite { file: File },
    Gateway(CgiJob),
}

#[derive(Debug)]
pub struct Connection {
    pub stream: TcpStream,
    pub peer: SocketAddr,
    /// Virtual servers bound to the accepting listener, declaration order.
    pub configs: Vec<Arc<ServerConfig>>,
    pub recv_buffer: Vec<u8>,
    pub request: HttpRequest,
    pub response: HttpResponse,
    pub transfer: Transfer,
    pub phase: Phase,
    pub created: Instant,
    pub last_activity: Instant,
    pub phase_since: Instant,
    pub requests_served: u32,
}

impl Connection {
    pub fn new(stream: TcpStream, peer: SocketAddr, configs: Vec<Arc<ServerConfig>>) -> Self {
        let now = Instant::now();
        Self {
            stream,
            peer,
            configs,
            recv_buffer: Vec::with_capacity(BUF_SIZE),
            request: HttpRequest::new(),
            response: HttpResponse::default(),
            transfer: Transfer::Idle,
            phase: Phase::HeaderRead,
            created: now,
            last_activity: now,
            phase_since: now,
            requests_served: 0,
        }
    }

    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    pub fn set_phase(&mut self, phase: Phase) {
        self.phase = phase;
        self.phase_since = Instant::now();
        self.touch();
    }

    /// The resolved server, or the listener's first-bound fallback while
    /// headers are still incoming.
    pub fn server_config(&self) -> Arc<ServerConfig> {
        match &self.request.server_config {
            Some(sc) => Arc::clone(sc),
            None => Arc::clone(&self.configs[0]),
        }
    }

    pub fn timeout_budget(&self) -> Duration {
        let sc = self.server_config();
        match self.phase {
            Phase::KeepAlive => Duration::from_secs(sc.keep_alive_timeout),
            _ => Duration::from_secs(sc.timeout),
        }
    }

    /// Drain the socket into the recv buffer. Returns true on EOF.
    pub fn read_data(&mut self) -> io::Result<bool> {
        let mut buf = [0u8; BUF_SIZE];
        loop {
            match self.stream.read(&mut buf) {
                Ok(0) => return Ok(true),
                Ok(n) => {
                    trace!(peer = %self.peer, bytes = n, "recv");
                    self.recv_buffer.extend_from_slice(&buf[..n]);
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(false),
                Err(e) => return Err(e),
            }
        }
    }

    /// Advance the request state machine over buffered bytes. Returns true
    /// once the request is terminal, successfully or not.
    pub fn advance_request(&mut self) -> bool {
        if self.request.is_recv_status(RecvStatus::HeaderReceive) {
            self.receive_header();
        }
        if self.request.is_recv_status(RecvStatus::BodyReceive) {
            self.receive_body();
        }

        let terminal = self.request.is_recv_status(RecvStatus::ReceiveDone)
            || self.request.is_recv_status(RecvStatus::ReceiveError);
        if self.request.is_recv_status(RecvStatus::ReceiveError) {
            // Transport-level failure: drop whatever framing remains.
            self.recv_buffer.clear();
        }
        terminal
    }

    fn receive_header(&mut self) {
        let Some(pos) = find_subsequence(&self.recv_buffer, b"\r\n\r\n", 0) else {
            return;
        };

        let block: Vec<u8> = self.recv_buffer.drain(..pos + 4).collect();
        match self.request.parse_header_block(&block[..pos], &self.configs) {
            Ok(()) => {
                info!(
                    peer = %self.peer,
                    server = %self.server_config().server_name,
                    method = %self.request.method,
                    uri = %self.request.path,
                    "request"
                );
                self.set_phase(Phase::BodyRead);
            }
            Err(status) => {
                debug!(peer = %self.peer, status, "request header rejected");
                self.request.set_error(status);
                return;
            }
        }

        if self.request.chunked {
            self.request.recv_status = RecvStatus::BodyReceive;
        } else {
            match self.request.content_length {
                Some(n) if n > 0 => self.request.recv_status = RecvStatus::BodyReceive,
                _ => self.request.recv_status = RecvStatus::ReceiveDone,
            }
        }
    }

    fn receive_body(&mut self) {
        if self.request.chunked {
            let Some(pos) = find_subsequence(&self.recv_buffer, b"0\r\n\r\n", 0) else {
                return;
            };
            let raw: Vec<u8> = self.recv_buffer.drain(..pos).collect();
            self.recv_buffer.drain(..5);
            match unchunk(&raw) {
                Ok(body) => {
                    self.request.body = body;
                    self.request.recv_status = RecvStatus::ReceiveDone;
                }
                Err(status) => {
                    debug!(peer = %self.peer, "chunked message is wrong");
                    self.request.set_error(status);
                }
            }
        } else {
            let length = self.request.content_length.unwrap_or(0);
            if self.recv_buffer.len() >= length {
                self.request.body = self.recv_buffer.drain(..length).collect();
                self.request.recv_status = RecvStatus::ReceiveDone;
            }
        }
    }

    /// Reset for the next request on the same socket; pipelined bytes stay
    /// buffered.
    pub fn reset_exchange(&mut self) {
        self.request = HttpRequest::new();
        self.response = HttpResponse::default();
        self.transfer = Transfer::Idle;
        self.set_phase(Phase::KeepAlive);
    }

    pub fn wants_close(&self) -> bool {
        self.request.connection == ConnectionHint::Close
    }
}

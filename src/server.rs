use crate::cgi;
use crate::cgi::CgiPhase;
use crate::handlers;
use crate::http::request::ConnectionHint;
use crate::prelude::*;

/// One bound `host:port` with the virtual servers that share it.
#[derive(Debug)]
pub struct Listener {
    pub socket: TcpListener,
    pub configs: Vec<Arc<ServerConfig>>,
}

/// The reactor. Owns every FD the process polls: listeners, client
/// sockets, and CGI stdout pipes, plus the connection table that owns the
/// unpollable file and staging FDs.
pub struct Server {
    pub(crate) poll: Poll,
    next_token: usize,
    pub(crate) listeners: HashMap<Token, Listener>,
    pub(crate) connections: HashMap<Token, Connection>,
    /// CGI pipe token -> owning client token; purged with the connection.
    pub(crate) gateway_map: HashMap<Token, Token>,
    pub(crate) sessions: SessionStore,
}

enum SendOutcome {
    Pending,
    Finished { close: bool },
    Failed,
}

enum TransferStep {
    Continue,
    Complete,
    Failed(HttpStatus),
}

impl Server {
    pub fn new(config: Config) -> Result<Self> {
        let poll = Poll::new()?;
        let mut listeners = HashMap::new();
        let mut next_token = 0;

        for (host, port) in config.listen_addrs() {
            let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
            let std_socket = bind_with_retry(addr)?;
            std_socket.set_nonblocking(true)?;

            let mut socket = TcpListener::from_std(std_socket);
            let token = Token(next_token);
            next_token += 1;
            poll.registry()
                .register(&mut socket, token, Interest::READABLE)?;

            info!(%addr, "listening");
            listeners.insert(
                token,
                Listener {
                    socket,
                    configs: config.servers_for(&host, port),
                },
            );
        }

        Ok(Server {
            poll,
            next_token,
            listeners,
            connections: HashMap::new(),
            gateway_map: HashMap::new(),
            sessions: SessionStore::new(),
        })
    }

    /// The readiness loop. Never returns except on poll failure.
    pub fn run(&mut self) -> Result<()> {
        let mut events = Events::with_capacity(1024);
        info!("server is running");

        loop {
            let timeout = if self.has_transfer_work() {
                Duration::ZERO
            } else {
                Duration::from_secs(1)
            };

            if let Err(e) = self.poll.poll(&mut events, Some(timeout)) {
                if e.kind() == ErrorKind::Interrupted {
                    continue;
                }
                error!(error = %e, "poll failed, shutting down");
                return Err(e.into());
            }

            self.sweep_timeouts();

            // Ascending token order keeps per-tick fairness deterministic.
            let mut ready: Vec<(Token, bool, bool)> = events
                .iter()
                .map(|e| (e.token(), e.is_readable(), e.is_writable()))
                .collect();
            ready.sort_by_key(|(token, _, _)| token.0);

            for (token, readable, writable) in ready {
                if writable {
                    self.handle_writable(token);
                } else if readable {
                    self.handle_readable(token);
                }
            }

            self.progress_transfers();
        }
    }

    fn handle_readable(&mut self, token: Token) {
        if self.listeners.contains_key(&token) {
            self.accept_connect(token);
        } else if let Some(&client) = self.gateway_map.get(&token) {
            self.read_cgi(token, client);
        } else if self.connections.contains_key(&token) {
            self.receive_data(token);
        }
    }

    fn handle_writable(&mut self, token: Token) {
        if self.connections.contains_key(&token) {
            self.send_data(token);
        }
    }

    /*
     * ==============================================
     *             Interact with client
     * ==============================================
     */

    fn accept_connect(&mut self, token: Token) {
        loop {
            let listener = match self.listeners.get_mut(&token) {
                Some(l) => l,
                None => return,
            };
            match listener.socket.accept() {
                Ok((mut stream, peer)) => {
                    let configs = listener.configs.clone();
                    let client = Token(self.next_token);
                    self.next_token += 1;

                    if let Err(e) =
                        self.poll
                            .registry()
                            .register(&mut stream, client, Interest::READABLE)
                    {
                        warn!(%peer, error = %e, "client register failed");
                        continue;
                    }

                    info!(%peer, client = client.0, "accept");
                    self.connections
                        .insert(client, Connection::new(stream, peer, configs));
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    break;
                }
            }
        }
    }

    fn receive_data(&mut self, token: Token) {
        let eof = {
            let Some(conn) = self.connections.get_mut(&token) else {
                return;
            };
            match conn.read_data() {
                Ok(eof) => eof,
                Err(e) => {
                    warn!(peer = %conn.peer, error = %e, "recv failed");
                    true
                }
            }
        };
        if eof {
            self.close_connection(token);
            return;
        }

        let terminal = {
            let conn = match self.connections.get_mut(&token) {
                Some(c) => c,
                None => return,
            };
            conn.touch();
            match conn.phase {
                Phase::HeaderRead | Phase::BodyRead => conn.advance_request(),
                Phase::KeepAlive => {
                    if conn.recv_buffer.is_empty() {
                        false
                    } else {
                        conn.set_phase(Phase::HeaderRead);
                        conn.advance_request()
                    }
                }
                // Mid-response bytes stay buffered for the next exchange.
                _ => false,
            }
        };
        if terminal {
            self.dispatch_request(token);
        }
    }

    /// A terminal request becomes a response plus an attached producer.
    fn dispatch_request(&mut self, token: Token) {
        let (response, transfer) = {
            let Some(conn) = self.connections.get_mut(&token) else {
                return;
            };
            handlers::process(&conn.request, &mut self.sessions)
        };

        if let Some(conn) = self.connections.get_mut(&token) {
            conn.response = response;
            conn.transfer = transfer;
        }
        self.prepare_io(token);
    }

    /// Route the response's producer: CGI jobs enter the gateway phase,
    /// file jobs the sending phase, inline bodies go straight out.
    fn prepare_io(&mut self, token: Token) {
        let has_producer = {
            let Some(conn) = self.connections.get_mut(&token) else {
                return;
            };
            match &conn.transfer {
                Transfer::Gateway(_) => {
                    conn.set_phase(Phase::Gateway);
                    true
                }
                Transfer::FileRead { .. } | Transfer::FileWrite { .. } => {
                    conn.set_phase(Phase::Sending);
                    true
                }
                Transfer::Idle => false,
            }
        };

        if has_producer {
            // First quantum immediately; empty CGI bodies fork right away.
            self.progress_one(token);
        } else {
            self.post_processing(token);
        }
    }

    /// Final response fixup before arming the client for write: HEAD body
    /// stripping and the connection-management headers.
    fn post_processing(&mut self, token: Token) {
        let Some(conn) = self.connections.get_mut(&token) else {
            return;
        };
        let sc = conn.server_config();

        if conn.request.method == Method::Head {
            conn.response.body.clear();
            conn.response.headers.remove("content-type");
        }

        // Transport-level failures never keep the connection.
        if matches!(
            conn.response.status_code,
            HTTP_BAD_REQUEST | HTTP_REQUEST_TIMEOUT | HTTP_PAYLOAD_TOO_LARGE
        ) {
            conn.request.connection = ConnectionHint::Close;
        }

        if conn.request.connection == ConnectionHint::KeepAlive {
            conn.requests_served += 1;
            let remaining = sc.keep_alive_max as i64 - conn.requests_served as i64;
            if remaining > 0 {
                conn.response.headers.set("connection", "keep-alive");
                conn.response.headers.set(
                    "keep-alive",
                    &format!("timeout={}, max={}", sc.keep_alive_timeout, remaining),
                );
            } else {
                conn.request.connection = ConnectionHint::Close;
            }
        }
        if conn.request.connection == ConnectionHint::Close {
            conn.response.headers.set("connection", "close");
        }

        if conn.response.status_code == HTTP_METHOD_NOT_ALLOWED {
            conn.response
                .headers
                .set("allow", &conn.request.location.limit_except_csv());
        }
        if conn.response.status_code == HTTP_UPGRADE_REQUIRED {
            conn.response.headers.set("upgrade", "HTTP/1.1");
        }

        conn.set_phase(Phase::Sending);
        info!(
            peer = %conn.peer,
            server = %sc.server_name,
            status = conn.response.status_code,
            "response"
        );
        self.poll
            .registry()
            .reregister(&mut conn.stream, token, Interest::WRITABLE)
            .ok();
    }

    fn send_data(&mut self, token: Token) {
        let outcome = {
            let Some(conn) = self.connections.get_mut(&token) else {
                return;
            };
            if conn.phase != Phase::Sending || conn.response.send_status != SendStatus::Sending {
                return;
            }

            match conn.response.send_chunk(&mut conn.stream) {
                Ok(()) => {
                    conn.touch();
                    if conn.response.send_status == SendStatus::Done {
                        debug!(
                            peer = %conn.peer,
                            bytes = conn.response.bytes_sent(),
                            "send complete"
                        );
                        SendOutcome::Finished {
                            close: conn.wants_close(),
                        }
                    } else {
                        SendOutcome::Pending
                    }
                }
                Err(e) => {
                    warn!(peer = %conn.peer, error = %e, "send failed");
                    SendOutcome::Failed
                }
            }
        };

        match outcome {
            SendOutcome::Pending => {}
            SendOutcome::Failed => self.close_connection(token),
            SendOutcome::Finished { close } => {
                if close {
                    self.close_connection(token);
                } else {
                    self.keep_alive_connection(token);
                }
            }
        }
    }

    /*
     * ==============================================
     *                   Connection
     * ==============================================
     */

    pub(crate) fn close_connection(&mut self, token: Token) {
        let Some(mut conn) = self.connections.remove(&token) else {
            return;
        };
        if let Transfer::Gateway(job) = &mut conn.transfer {
            if let Some(pipe) = job.output_token.take() {
                self.gateway_map.remove(&pipe);
            }
            if let Some(rx) = job.output_mut() {
                self.poll.registry().deregister(rx).ok();
            }
            job.withdraw();
        }
        self.poll.registry().deregister(&mut conn.stream).ok();
        info!(peer = %conn.peer, client = token.0, "closed");
    }

    fn keep_alive_connection(&mut self, token: Token) {
        {
            let Some(conn) = self.connections.get_mut(&token) else {
                return;
            };
            debug!(peer = %conn.peer, served = conn.requests_served, "keep-alive");
            conn.reset_exchange();
            self.poll
                .registry()
                .reregister(&mut conn.stream, token, Interest::READABLE)
                .ok();
        }

        // Pipelined bytes already buffered parse without another event.
        let terminal = {
            let Some(conn) = self.connections.get_mut(&token) else {
                return;
            };
            if conn.recv_buffer.is_empty() {
                false
            } else {
                conn.set_phase(Phase::HeaderRead);
                conn.advance_request()
            }
        };
        if terminal {
            self.dispatch_request(token);
        }
    }

    /// Replace the in-flight exchange with an error response.
    pub(crate) fn fail_with(&mut self, token: Token, status: HttpStatus) {
        {
            let Some(conn) = self.connections.get_mut(&token) else {
                return;
            };
            let (response, transfer) = handlers::error_page(status, &conn.request);
            conn.response = response;
            conn.transfer = transfer;
        }
        self.prepare_io(token);
    }

    /// Tear down an active CGI job: map entries, pipe registration, FDs,
    /// and the child itself.
    pub(crate) fn withdraw_gateway(&mut self, token: Token) {
        let Some(conn) = self.connections.get_mut(&token) else {
            return;
        };
        if let Transfer::Gateway(job) = &mut conn.transfer {
            if let Some(pipe) = job.output_token.take() {
                self.gateway_map.remove(&pipe);
            }
            if let Some(rx) = job.output_mut() {
                self.poll.registry().deregister(rx).ok();
            }
            job.withdraw();
        }
        conn.transfer = Transfer::Idle;
    }

    /*
     * ==============================================
     *                   CGI I/O
     * ==============================================
     */

    fn read_cgi(&mut self, pipe: Token, client: Token) {
        enum After {
            Idle,
            Finish,
            Fail,
        }

        let after = {
            let Some(conn) = self.connections.get_mut(&client) else {
                self.gateway_map.remove(&pipe);
                return;
            };
            let Transfer::Gateway(job) = &mut conn.transfer else {
                self.gateway_map.remove(&pipe);
                return;
            };

            loop {
                match job.read_chunk() {
                    Ok(0) => break After::Finish,
                    Ok(_) => continue,
                    Err(e) if e.kind() == ErrorKind::WouldBlock => break After::Idle,
                    Err(e) => {
                        error!(client = client.0, error = %e, "cgi read error");
                        break After::Fail;
                    }
                }
            }
        };

        match after {
            After::Idle => {}
            After::Fail => {
                self.withdraw_gateway(client);
                self.fail_with(client, HTTP_INTERNAL_SERVER_ERROR);
            }
            After::Finish => self.finish_cgi(client),
        }
    }

    /// Pipe EOF: release the job's resources, then turn the collected
    /// output into the response.
    fn finish_cgi(&mut self, client: Token) {
        let (response, transfer) = {
            let Some(conn) = self.connections.get_mut(&client) else {
                return;
            };
            let output = match &mut conn.transfer {
                Transfer::Gateway(job) => {
                    if let Some(pipe) = job.output_token.take() {
                        self.gateway_map.remove(&pipe);
                    }
                    if let Some(rx) = job.output_mut() {
                        self.poll.registry().deregister(rx).ok();
                    }
                    let output = job.take_collected();
                    job.withdraw();
                    output
                }
                _ => return,
            };
            cgi::finish(&conn.request, &output, &mut self.sessions)
        };

        if let Some(conn) = self.connections.get_mut(&client) {
            conn.response = response;
            conn.transfer = transfer;
        }
        self.prepare_io(client);
    }

    /*
     * ==============================================
     *          File and staging transfers
     * ==============================================
     */

    /// Regular files cannot be armed in the readiness set, so their jobs
    /// advance here, one quantum per connection per tick.
    fn has_transfer_work(&self) -> bool {
        self.connections.values().any(Self::needs_progress)
    }

    fn needs_progress(conn: &Connection) -> bool {
        match &conn.transfer {
            Transfer::FileRead { .. } | Transfer::FileWrite { .. } => true,
            Transfer::Gateway(job) => job.phase == CgiPhase::Writing,
            Transfer::Idle => false,
        }
    }

    fn progress_transfers(&mut self) {
        let pending: Vec<Token> = self
            .connections
            .iter()
            .filter(|(_, conn)| Self::needs_progress(conn))
            .map(|(token, _)| *token)
            .collect();
        for token in pending {
            self.progress_one(token);
        }
    }

    fn progress_one(&mut self, token: Token) {
        let step = {
            let Some(conn) = self.connections.get_mut(&token) else {
                return;
            };
            match &mut conn.transfer {
                Transfer::FileRead { file } => {
                    let mut buf = [0u8; BUF_SIZE];
                    match file.read(&mut buf) {
                        Ok(0) => {
                            conn.transfer = Transfer::Idle;
                            TransferStep::Complete
                        }
                        Ok(n) => {
                            conn.response.body.extend_from_slice(&buf[..n]);
                            TransferStep::Continue
                        }
                        Err(e) => {
                            error!(client = token.0, error = %e, "read file failed");
                            conn.transfer = Transfer::Idle;
                            TransferStep::Failed(HTTP_INTERNAL_SERVER_ERROR)
                        }
                    }
                }
                Transfer::FileWrite { file } => {
                    let response = &mut conn.response;
                    if response.offset >= response.file_buffer.len() {
                        conn.transfer = Transfer::Idle;
                        TransferStep::Complete
                    } else {
                        let end = usize::min(response.offset + BUF_SIZE, response.file_buffer.len());
                        match file.write(&response.file_buffer[response.offset..end]) {
                            Ok(n) => {
                                response.offset += n;
                                if response.offset >= response.file_buffer.len() {
                                    conn.transfer = Transfer::Idle;
                                    TransferStep::Complete
                                } else {
                                    TransferStep::Continue
                                }
                            }
                            Err(e) => {
                                error!(client = token.0, error = %e, "write file failed");
                                conn.transfer = Transfer::Idle;
                                TransferStep::Failed(HTTP_INTERNAL_SERVER_ERROR)
                            }
                        }
                    }
                }
                Transfer::Gateway(job) if job.phase == CgiPhase::Writing => {
                    match job.write_chunk() {
                        Ok(false) => TransferStep::Continue,
                        Ok(true) => match job.spawn() {
                            Ok(rx) => {
                                let pipe = Token(self.next_token);
                                self.next_token += 1;
                                match self
                                    .poll
                                    .registry()
                                    .register(rx, pipe, Interest::READABLE)
                                {
                                    Ok(()) => {
                                        job.output_token = Some(pipe);
                                        self.gateway_map.insert(pipe, token);
                                        TransferStep::Continue
                                    }
                                    Err(e) => {
                                        error!(client = token.0, error = %e, "pipe register failed");
                                        TransferStep::Failed(HTTP_INTERNAL_SERVER_ERROR)
                                    }
                                }
                            }
                            Err(status) => TransferStep::Failed(status),
                        },
                        Err(e) => {
                            error!(client = token.0, error = %e, "cgi write error");
                            TransferStep::Failed(HTTP_INTERNAL_SERVER_ERROR)
                        }
                    }
                }
                _ => TransferStep::Continue,
            }
        };

        match step {
            TransferStep::Continue => {}
            TransferStep::Complete => self.post_processing(token),
            TransferStep::Failed(status) => {
                self.withdraw_gateway(token);
                self.fail_with(token, status);
            }
        }
    }
}

/// `bind(2)` can transiently fail while an old socket drains; retry the
/// way the listener set always has.
fn bind_with_retry(addr: SocketAddr) -> Result<std::net::TcpListener> {
    for attempt in 1..=BIND_MAX_TRIES {
        match std::net::TcpListener::bind(addr) {
            Ok(socket) => return Ok(socket),
            Err(e) => warn!(%addr, attempt, error = %e, "bind failed, retrying"),
        }
        if attempt < BIND_MAX_TRIES {
            std::thread::sleep(Duration::from_secs(TRY_SLEEP_TIME));
        }
    }
    Err(ServerError::BindExhausted {
        addr,
        tries: BIND_MAX_TRIES,
    })
}

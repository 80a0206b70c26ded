use crate::handlers;
use crate::prelude::*;
use mio::unix::pipe::Receiver;
use std::os::unix::fs::PermissionsExt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CgiPhase {
    /// Staging the request body into the input temp file.
    Writing,
    /// Child forked, collecting its stdout.
    Reading,
    Done,
}

/// One CGI execution. The body is staged to an anonymous temp file first;
/// only once staging completes is the child spawned and its stdout pipe
/// armed for read.
#[derive(Debug)]
pub struct CgiJob {
    pub script_path: String,
    pub interpreter: String,
    pub path_info: String,
    pub phase: CgiPhase,
    body: Vec<u8>,
    offset: usize,
    input: Option<File>,
    output: Option<Receiver>,
    pub output_token: Option<Token>,
    child: Option<Child>,
    collected: Vec<u8>,
    env: Vec<(String, String)>,
}

/// Build a CGI job for a classified request. The interpreter must exist
/// and be executable.
pub fn execute(
    req: &HttpRequest,
    sessions: &mut SessionStore,
) -> std::result::Result<CgiJob, HttpStatus> {
    let meta = fs::metadata(&req.interpreter).map_err(|_| HTTP_INTERNAL_SERVER_ERROR)?;
    if meta.permissions().mode() & 0o111 == 0 {
        return Err(HTTP_INTERNAL_SERVER_ERROR);
    }

    let session_available = req
        .headers
        .get("cookie")
        .map(|header| Cookies::parse(header))
        .and_then(|cookies| cookies.get(SESSION_KEY).cloned())
        .map(|key| sessions.is_session_available(&key))
        .unwrap_or(false);

    let input = tempfile::tempfile().map_err(|_| HTTP_INTERNAL_SERVER_ERROR)?;

    Ok(CgiJob {
        script_path: req.script_path.clone(),
        interpreter: req.interpreter.clone(),
        path_info: req.path_info.clone(),
        phase: CgiPhase::Writing,
        body: req.body.clone(),
        offset: 0,
        input: Some(input),
        output: None,
        output_token: None,
        child: None,
        collected: Vec::new(),
        env: build_env(req, session_available),
    })
}

impl CgiJob {
    /// Write one staging quantum. Returns true once the whole body is on
    /// the temp file.
    pub fn write_chunk(&mut self) -> io::Result<bool> {
        let input = self
            .input
            .as_mut()
            .ok_or_else(|| io::Error::other("staging file gone"))?;

        if self.offset < self.body.len() {
            let end = usize::min(self.offset + BUF_SIZE, self.body.len());
            let n = input.write(&self.body[self.offset..end])?;
            self.offset += n;
        }
        Ok(self.offset >= self.body.len())
    }

    /// Rewind the staged input, fork the interpreter, and hand back the
    /// stdout pipe for registration.
    pub fn spawn(&mut self) -> std::result::Result<&mut Receiver, HttpStatus> {
        let mut input = self.input.take().ok_or(HTTP_INTERNAL_SERVER_ERROR)?;
        input
            .seek(SeekFrom::Start(0))
            .map_err(|_| HTTP_INTERNAL_SERVER_ERROR)?;

        let (dir, basename) = match self.script_path.rsplit_once('/') {
            Some((dir, base)) => (dir.to_string(), base.to_string()),
            None => (".".to_string(), self.script_path.clone()),
        };

        let mut child = Command::new(&self.interpreter)
            .arg(format!("./{}", basename))
            .current_dir(&dir)
            .env_clear()
            .envs(self.env.iter().cloned())
            .stdin(Stdio::from(input))
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| {
                error!(interpreter = %self.interpreter, error = %e, "cgi spawn failed");
                HTTP_INTERNAL_SERVER_ERROR
            })?;

        let stdout = child.stdout.take().ok_or(HTTP_INTERNAL_SERVER_ERROR)?;
        let receiver = Receiver::from(stdout);
        receiver
            .set_nonblocking(true)
            .map_err(|_| HTTP_INTERNAL_SERVER_ERROR)?;

        self.child = Some(child);
        self.body.clear();
        self.phase = CgiPhase::Reading;
        self.output = Some(receiver);
        Ok(self.output.as_mut().unwrap())
    }

    /// One pipe read; Ok(0) is EOF.
    pub fn read_chunk(&mut self) -> io::Result<usize> {
        let output = self
            .output
            .as_mut()
            .ok_or_else(|| io::Error::other("output pipe gone"))?;

        let mut buf = [0u8; BUF_SIZE];
        let n = output.read(&mut buf)?;
        self.collected.extend_from_slice(&buf[..n]);
        Ok(n)
    }

    pub fn output_mut(&mut self) -> Option<&mut Receiver> {
        self.output.as_mut()
    }

    pub fn take_collected(&mut self) -> Vec<u8> {
        self.phase = CgiPhase::Done;
        std::mem::take(&mut self.collected)
    }

    /// Release everything the job holds: both FDs and the child process.
    /// Safe to call at any phase; used on completion, error, and timeout.
    pub fn withdraw(&mut self) {
        self.input = None;
        self.output = None;
        if let Some(mut child) = self.child.take() {
            match child.try_wait() {
                Ok(Some(_)) => {}
                _ => {
                    let _ = child.kill();
                    let _ = child.wait();
                }
            }
        }
    }
}

impl Drop for CgiJob {
    fn drop(&mut self) {
        self.withdraw();
    }
}

pub fn build_env(req: &HttpRequest, session_available: bool) -> Vec<(String, String)> {
    let mut env: Vec<(String, String)> = Vec::new();
    let push = |env: &mut Vec<(String, String)>, k: &str, v: String| {
        env.push((k.to_string(), v));
    };

    if !req.body.is_empty() {
        push(&mut env, "CONTENT_LENGTH", req.body.len().to_string());
        push(&mut env, "CONTENT_TYPE", req.content_type());
    }
    push(&mut env, "GATEWAY_INTERFACE", "CGI/1.1".to_string());
    push(&mut env, "PATH_INFO", req.path.clone());
    push(&mut env, "REQUEST_URI", req.path.clone());
    push(&mut env, "SCRIPT_NAME", req.path.clone());
    push(&mut env, "QUERY_STRING", req.query_string.clone());
    push(&mut env, "REQUEST_METHOD", req.method.to_string());
    push(&mut env, "SERVER_PROTOCOL", req.version.clone());
    push(&mut env, "SERVER_SOFTWARE", SERVER_SOFTWARE.to_string());
    push(
        &mut env,
        "SESSION_AVAILABLE",
        if session_available { "true" } else { "false" }.to_string(),
    );

    if let Some(sc) = &req.server_config {
        push(&mut env, "SERVER_NAME", sc.host.clone());
        push(&mut env, "SERVER_PORT", sc.port.to_string());
    }
    if let Ok(cwd) = std::env::current_dir() {
        push(
            &mut env,
            "PATH_TRANSLATED",
            format!("{}{}", cwd.display(), req.substituted_path),
        );
    }

    // Every request header, Cookie included, rides along as HTTP_*.
    for (field, value) in &req.headers {
        let key = format!("HTTP_{}", field.to_ascii_uppercase().replace('-', "_"));
        push(&mut env, &key, value.clone());
    }

    env
}

/// Turn collected CGI stdout into a response: header block applied, the
/// `Status` pseudo-header mandatory, `Set-Cookie` registered with the
/// session store.
pub fn finish(
    req: &HttpRequest,
    output: &[u8],
    sessions: &mut SessionStore,
) -> (HttpResponse, Transfer) {
    let (head, body) = split_output(output);

    let mut res = HttpResponse::new(HTTP_OK);
    for line in String::from_utf8_lossy(head).lines() {
        if let Some((field, value)) = line.split_once(':') {
            res.headers.add(field.trim(), value.trim());
        }
    }
    res.body = body.to_vec();

    if let Some(sc) = &req.server_config {
        for value in res.headers.get_all("set-cookie") {
            sessions.add_session(&value, sc.session_timeout);
        }
    }

    let status = res
        .headers
        .get("status")
        .and_then(|v| v.split_whitespace().next())
        .and_then(|s| s.parse::<HttpStatus>().ok());

    match status {
        Some(code) => {
            res.set_status(code);
            res.headers.remove("status");
            (res, Transfer::Idle)
        }
        None => handlers::error_page(HTTP_BAD_GATEWAY, req),
    }
}

/// Split CGI output at the first blank line; LF-only scripts are accepted.
fn split_output(output: &[u8]) -> (&[u8], &[u8]) {
    if let Some(pos) = find_subsequence(output, b"\r\n\r\n", 0) {
        (&output[..pos], &output[pos + 4..])
    } else if let Some(pos) = find_subsequence(output, b"\n\n", 0) {
        (&output[..pos], &output[pos + 2..])
    } else {
        (output, &[])
    }
}

pub mod delete_handler;
pub mod get_handler;
pub mod upload_handler;

pub use delete_handler::handle_delete;
pub use get_handler::handle_get;
pub use upload_handler::handle_upload;

use crate::cgi;
use crate::prelude::*;

/// Processing boundary for a terminal request: run preconditions and the
/// method handler, converting any thrown status into an error response.
pub fn process(req: &HttpRequest, sessions: &mut SessionStore) -> (HttpResponse, Transfer) {
    match handle(req, sessions) {
        Ok(outcome) => outcome,
        Err(status) => error_page(status, req),
    }
}

fn handle(
    req: &HttpRequest,
    sessions: &mut SessionStore,
) -> std::result::Result<(HttpResponse, Transfer), HttpStatus> {
    check_preconditions(req)?;

    if let Some((code, uri)) = &req.location.return_directive {
        let mut res = HttpResponse::new(*code);
        res.headers.set("location", uri);
        return Ok((res, Transfer::Idle));
    }

    if req.is_cgi {
        let job = cgi::execute(req, sessions)?;
        return Ok((HttpResponse::default(), Transfer::Gateway(job)));
    }

    match req.method {
        Method::Get | Method::Head => handle_get(req),
        Method::Post | Method::Put => handle_upload(req),
        Method::Delete => handle_delete(req),
    }
}

fn check_preconditions(req: &HttpRequest) -> std::result::Result<(), HttpStatus> {
    if req.is_recv_status(RecvStatus::ReceiveError) {
        return Err(req.error_status_code());
    }
    if req.body.len() > req.location.common.client_body_size {
        return Err(HTTP_PAYLOAD_TOO_LARGE);
    }
    if !req.location.is_method_allowed(&req.method) {
        return Err(HTTP_METHOD_NOT_ALLOWED);
    }
    Ok(())
}

/// Resolve a status into an error response: the configured `error_page`
/// when it opens, the built-in page otherwise. Never recursive — a failing
/// error page falls back to the template for the same status.
pub fn error_page(status: HttpStatus, req: &HttpRequest) -> (HttpResponse, Transfer) {
    let mut res = HttpResponse::new(status);
    res.is_error = true;
    res.headers.set("content-type", "text/html");

    if let Some(path) = req.location.error_page_target(status) {
        match File::open(&path) {
            Ok(file) => return (res, Transfer::FileRead { file }),
            Err(e) => {
                warn!(page = %path, error = %e, "error page open failed");
            }
        }
    }

    res.body = default_error_page(status);
    (res, Transfer::Idle)
}

pub fn default_error_page(status: HttpStatus) -> Vec<u8> {
    let reason = HttpResponse::status_text(status);
    format!(
        "<html><head><title>{status} {reason}</title></head>\
         <body><center><h1>{status} {reason}</h1></center>\
         <hr><center>{SERVER_SOFTWARE}</center></body></html>"
    )
    .into_bytes()
}

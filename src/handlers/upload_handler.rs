use crate::prelude::*;

/// POST and PUT both stage the request body into a file write job; they
/// differ only in the success response.
pub fn handle_upload(
    req: &HttpRequest,
) -> std::result::Result<(HttpResponse, Transfer), HttpStatus> {
    let target = &req.target_path;

    if let Ok(meta) = fs::metadata(target) {
        if meta.is_dir() {
            return Err(HTTP_FORBIDDEN);
        }
    }

    let file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(target)
        .map_err(|_| HTTP_FORBIDDEN)?;

    let mut res = match req.method {
        Method::Post => {
            let sc = req.server_config.as_ref().ok_or(HTTP_INTERNAL_SERVER_ERROR)?;
            let mut res = HttpResponse::new(HTTP_CREATED);
            res.headers.set("content-type", &req.content_type());
            res.headers.set(
                "location",
                &format!("{}:{}{}", sc.server_name, sc.port, req.substituted_path),
            );
            res
        }
        _ => HttpResponse::new(HTTP_NO_CONTENT),
    };

    res.file_buffer = req.body.clone();
    Ok((res, Transfer::FileWrite { file }))
}

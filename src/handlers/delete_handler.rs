use crate::prelude::*;

pub fn handle_delete(
    req: &HttpRequest,
) -> std::result::Result<(HttpResponse, Transfer), HttpStatus> {
    let target = &req.target_path;

    let meta = fs::metadata(target).map_err(|_| HTTP_NOT_FOUND)?;
    if meta.is_dir() {
        return Err(HTTP_FORBIDDEN);
    }

    fs::remove_file(target).map_err(|_| HTTP_NOT_FOUND)?;

    Ok((HttpResponse::new(HTTP_OK), Transfer::Idle))
}

use crate::prelude::*;

pub fn handle_get(req: &HttpRequest) -> std::result::Result<(HttpResponse, Transfer), HttpStatus> {
    let target = &req.target_path;
    let meta = fs::metadata(target).map_err(|_| HTTP_NOT_FOUND)?;
    let mut res = HttpResponse::new(HTTP_OK);

    if meta.is_dir() {
        if req.location.autoindex {
            res.set_body(generate_autoindex(target, &req.path)?, "text/html");
            return Ok((res, Transfer::Idle));
        }

        for index in req.location.common.index_files() {
            let candidate = format!("{}/{}", target.trim_end_matches('/'), index);
            if let Ok(file) = File::open(&candidate) {
                res.headers.set("content-type", mime_for(&candidate));
                return Ok((res, Transfer::FileRead { file }));
            }
        }
        return Err(HTTP_NOT_FOUND);
    }

    if meta.is_file() {
        let file = File::open(target).map_err(|_| HTTP_NOT_FOUND)?;
        res.headers.set("content-type", mime_for(target));
        return Ok((res, Transfer::FileRead { file }));
    }

    // Sockets, FIFOs and friends are not served.
    Err(HTTP_FORBIDDEN)
}

fn mime_for(path: &str) -> &'static str {
    crate::http::get_mime_type(Path::new(path).extension().and_then(|s| s.to_str()))
}

/// HTML directory listing; directories get a trailing slash so relative
/// links keep working.
fn generate_autoindex(target: &str, uri: &str) -> std::result::Result<Vec<u8>, HttpStatus> {
    let entries = fs::read_dir(target).map_err(|e| match e.kind() {
        ErrorKind::NotFound => HTTP_NOT_FOUND,
        ErrorKind::PermissionDenied => HTTP_FORBIDDEN,
        _ => HTTP_INTERNAL_SERVER_ERROR,
    })?;

    let mut html = format!(
        "<!DOCTYPE html><html><head>\
         <style>table {{ width: 300px; }} th {{ height: 17px; }}</style>\
         <title>Index of {uri}</title></head>\
         <body><h1>Index of {uri}</h1><table>"
    );

    for entry in entries.flatten() {
        let Ok(name) = entry.file_name().into_string() else {
            continue;
        };
        let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
        if is_dir {
            html.push_str(&format!(
                "<tr><td><a href=\"{name}/\">{name}/</a></td>\
                 <td align=\"right\">directory</td></tr>\n"
            ));
        } else {
            html.push_str(&format!(
                "<tr><td><a href=\"{name}\">{name}</a></td>\
                 <td align=\"right\">file</td></tr>\n"
            ));
        }
    }

    html.push_str("</table></body></html>");
    Ok(html.into_bytes())
}

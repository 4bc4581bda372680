//! The content-type table (`spec.md` §4.7 "MIME table (source of truth)"),
//! grounded on `file_server.cpp::mime_from_name`.

/// Looks up `name`'s extension (the part after the last `.`) in the fixed
/// table, falling back to `application/octet-stream`.
pub fn mime_from_name(name: &str) -> &'static str {
    let ext = match name.rfind('.') {
        Some(dot) => &name[dot + 1..],
        None => return "application/octet-stream",
    };

    match ext.to_ascii_lowercase().as_str() {
        "js" => "text/javascript",
        "css" => "text/css",
        "html" => "text/html",
        "svg" => "image/svg+xml",
        "png" => "image/png",
        "jpeg" | "jpg" => "image/jpeg",
        "gif" => "image/gif",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_extensions_map() {
        assert_eq!(mime_from_name("app.js"), "text/javascript");
        assert_eq!(mime_from_name("photo.JPG"), "image/jpeg");
    }

    #[test]
    fn unknown_extension_falls_back() {
        assert_eq!(mime_from_name("archive.tar.gz"), "application/octet-stream");
        assert_eq!(mime_from_name("no_extension"), "application/octet-stream");
    }
}

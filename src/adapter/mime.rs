/// Extension-based mime type lookup for stored file content.
///
/// The node store keeps a mime type on every resource node; this is the
/// best guess we can stamp at write time without sniffing the bytes.
pub fn guess(path: &str) -> &'static str {
    let name = path.rsplit('/').next().unwrap_or(path);
    let ext = match name.rsplit_once('.') {
        Some((prefix, ext)) if !prefix.is_empty() => ext.to_ascii_lowercase(),
        _ => return FALLBACK,
    };

    match ext.as_str() {
        "txt" | "log" => "text/plain",
        "md" => "text/markdown",
        "html" | "htm" => "text/html",
        "css" => "text/css",
        "csv" => "text/csv",
        "js" => "text/javascript",
        "json" => "application/json",
        "xml" => "application/xml",
        "yml" | "yaml" => "application/yaml",
        "toml" => "application/toml",
        "pdf" => "application/pdf",
        "zip" => "application/zip",
        "gz" => "application/gzip",
        "tar" => "application/x-tar",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "webp" => "image/webp",
        "ico" => "image/x-icon",
        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        _ => FALLBACK,
    }
}

pub const FALLBACK: &str = "application/octet-stream";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_extensions() {
        assert_eq!(guess("a/b/report.pdf"), "application/pdf");
        assert_eq!(guess("photo.JPG"), "image/jpeg");
        assert_eq!(guess("notes.txt"), "text/plain");
    }

    #[test]
    fn test_unknown_and_missing_extensions() {
        assert_eq!(guess("data.unknownext"), FALLBACK);
        assert_eq!(guess("Makefile"), FALLBACK);
        assert_eq!(guess(".hidden"), FALLBACK);
    }
}

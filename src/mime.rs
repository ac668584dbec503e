//! Content types by artifact file extension.

use artery_engine::ArtifactPath;

/// Map an artifact path to the content type served for it.
///
/// Checksums and everything else unrecognized are plain text; a name
/// without an extension is an opaque binary.
pub fn content_type(path: &ArtifactPath) -> &'static str {
    match path.extension() {
        None => "application/octet-stream",
        Some("html") => "text/html; charset=utf-8",
        Some("jar") => "application/java-archive",
        Some("xml") | Some("pom") => "application/xml; charset=utf-8",
        Some(_) => "text/plain; charset=utf-8",
    }
}

//! Minimal `multipart/related` framing for DICOMweb transfers
//!
//! STOW-RS expects uploads wrapped in `multipart/related`, and WADO-RS
//! answers instance retrievals the same way. Only single-part bodies are
//! produced; only the first part of a response is read.

const CRLF: &[u8] = b"\r\n";

/// Wrap `data` as a single-part `multipart/related` body.
///
/// Returns the `Content-Type` header value and the encoded body.
pub fn encode_related(data: &[u8], content_type: &str, boundary: &str) -> (String, Vec<u8>) {
    let header = format!(
        "multipart/related; type=\"{}\"; boundary={}",
        content_type, boundary
    );

    let mut body = Vec::with_capacity(data.len() + boundary.len() * 2 + 64);
    body.extend_from_slice(b"--");
    body.extend_from_slice(boundary.as_bytes());
    body.extend_from_slice(CRLF);
    body.extend_from_slice(format!("Content-Type: {}", content_type).as_bytes());
    body.extend_from_slice(CRLF);
    body.extend_from_slice(CRLF);
    body.extend_from_slice(data);
    body.extend_from_slice(CRLF);
    body.extend_from_slice(b"--");
    body.extend_from_slice(boundary.as_bytes());
    body.extend_from_slice(b"--");
    body.extend_from_slice(CRLF);

    (header, body)
}

/// Extract the `boundary` parameter from a multipart content type.
pub fn boundary(content_type: &str) -> Option<&str> {
    content_type.split(';').skip(1).find_map(|param| {
        let (key, value) = param.trim().split_once('=')?;
        if key.trim().eq_ignore_ascii_case("boundary") {
            Some(value.trim().trim_matches('"'))
        } else {
            None
        }
    })
}

/// Return the body of the first part of a multipart response.
///
/// A non-multipart content type yields the body unchanged.
pub fn first_part(content_type: &str, body: &[u8]) -> Option<Vec<u8>> {
    if !content_type.trim_start().to_ascii_lowercase().starts_with("multipart/") {
        return Some(body.to_vec());
    }
    let boundary = boundary(content_type)?;
    let delimiter = [b"--".as_slice(), boundary.as_bytes()].concat();

    let start = find(body, &delimiter)? + delimiter.len();
    let rest = &body[start..];
    let headers_end = find(rest, b"\r\n\r\n")? + 4;
    let content = &rest[headers_end..];

    let closing = [CRLF, delimiter.as_slice()].concat();
    let end = find(content, &closing)?;
    Some(content[..end].to_vec())
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || needle.len() > haystack.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

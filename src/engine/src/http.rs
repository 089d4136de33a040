//! Minimal HTTP/1.1 over the engine's unix stream socket.
//!
//! The engine API is plain HTTP/1.1 on a local socket. Each request opens a
//! fresh connection (`Connection: close`) and the response body is always
//! read to its framing boundary, so no connection is ever left half
//! consumed. Both `Content-Length` and `Transfer-Encoding: chunked` framing
//! are decoded.

use std::path::PathBuf;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use watchz_core::{Result, WatchError};

/// Parsed HTTP response.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Body as lossy UTF-8.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// One-connection-per-request HTTP client for a unix socket.
#[derive(Debug, Clone)]
pub struct UnixHttpClient {
    socket: PathBuf,
}

impl UnixHttpClient {
    pub fn new(socket: PathBuf) -> Self {
        Self { socket }
    }

    pub fn socket_path(&self) -> &std::path::Path {
        &self.socket
    }

    /// Send one request and read the complete response.
    pub async fn request(
        &self,
        method: &str,
        path: &str,
        extra_headers: &[(&str, &str)],
        body: Option<&[u8]>,
    ) -> Result<HttpResponse> {
        let mut stream = UnixStream::connect(&self.socket).await.map_err(|e| {
            WatchError::EngineUnavailable(format!(
                "cannot connect to {}: {e}",
                self.socket.display()
            ))
        })?;

        let mut request = format!(
            "{method} {path} HTTP/1.1\r\n\
             Host: localhost\r\n\
             User-Agent: watchz/{}\r\n\
             Connection: close\r\n",
            watchz_core::VERSION
        );
        for (name, value) in extra_headers {
            request.push_str(name);
            request.push_str(": ");
            request.push_str(value);
            request.push_str("\r\n");
        }
        if let Some(body) = body {
            request.push_str("Content-Type: application/json\r\n");
            request.push_str(&format!("Content-Length: {}\r\n", body.len()));
        }
        request.push_str("\r\n");

        stream.write_all(request.as_bytes()).await?;
        if let Some(body) = body {
            stream.write_all(body).await?;
        }
        stream.flush().await?;

        let mut reader = BufReader::new(stream);
        read_response(&mut reader).await
    }
}

/// Read a full HTTP/1.1 response from `reader`.
pub(crate) async fn read_response<R: AsyncBufRead + Unpin>(reader: &mut R) -> Result<HttpResponse> {
    let status_line = read_header_line(reader).await?;
    let status = parse_status_line(&status_line)?;

    let mut headers = Vec::new();
    loop {
        let line = read_header_line(reader).await?;
        if line.is_empty() {
            break;
        }
        if let Some((name, value)) = line.split_once(':') {
            headers.push((name.trim().to_string(), value.trim().to_string()));
        }
    }

    let chunked = headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case("transfer-encoding"))
        .map(|(_, v)| v.to_ascii_lowercase().contains("chunked"))
        .unwrap_or(false);
    let content_length = headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case("content-length"))
        .and_then(|(_, v)| v.parse::<usize>().ok());

    let body = if chunked {
        read_chunked_body(reader).await?
    } else if let Some(length) = content_length {
        let mut body = vec![0u8; length];
        reader.read_exact(&mut body).await?;
        body
    } else {
        // No framing header: body runs until the peer closes
        let mut body = Vec::new();
        reader.read_to_end(&mut body).await?;
        body
    };

    Ok(HttpResponse {
        status,
        headers,
        body,
    })
}

/// Decode a chunked body: hex length line, CRLF, data, CRLF, repeated until
/// a zero-length chunk, then trailers until an empty line.
async fn read_chunked_body<R: AsyncBufRead + Unpin>(reader: &mut R) -> Result<Vec<u8>> {
    let mut body = Vec::new();
    loop {
        let size_line = read_header_line(reader).await?;
        // Chunk extensions after ';' are ignored
        let size_text = size_line.split(';').next().unwrap_or("").trim();
        let size = usize::from_str_radix(size_text, 16).map_err(|_| chunk_error(&size_line))?;

        if size == 0 {
            // Trailer section ends with an empty line
            loop {
                if read_header_line(reader).await?.is_empty() {
                    break;
                }
            }
            return Ok(body);
        }

        let start = body.len();
        body.resize(start + size, 0);
        reader.read_exact(&mut body[start..]).await?;

        let mut crlf = [0u8; 2];
        reader.read_exact(&mut crlf).await?;
        if &crlf != b"\r\n" {
            return Err(chunk_error("missing chunk terminator"));
        }
    }
}

/// Read one CRLF-terminated line without the terminator.
async fn read_header_line<R: AsyncBufRead + Unpin>(reader: &mut R) -> Result<String> {
    let mut line = String::new();
    let n = reader.read_line(&mut line).await.map_err(|e| {
        WatchError::Io(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            format!("reading response line: {e}"),
        ))
    })?;
    if n == 0 {
        return Err(WatchError::Io(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "connection closed mid-response",
        )));
    }
    while line.ends_with('\n') || line.ends_with('\r') {
        line.pop();
    }
    Ok(line)
}

fn parse_status_line(line: &str) -> Result<u16> {
    let mut parts = line.splitn(3, ' ');
    let version = parts.next().unwrap_or("");
    if !version.starts_with("HTTP/1.") {
        return Err(WatchError::Other(format!("bad status line: '{line}'")));
    }
    parts
        .next()
        .and_then(|s| s.parse::<u16>().ok())
        .ok_or_else(|| WatchError::Other(format!("bad status line: '{line}'")))
}

/// Chunk framing errors read as torn streams so the retry policy treats
/// them as transient.
fn chunk_error(detail: &str) -> WatchError {
    WatchError::Io(std::io::Error::new(
        std::io::ErrorKind::UnexpectedEof,
        format!("chunk decode error: {detail}"),
    ))
}

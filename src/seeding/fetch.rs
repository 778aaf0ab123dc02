/* This file is part of DarkFi (https://dark.fi)
 *
 * Copyright (C) 2020-2025 Dyne.org foundation
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU Affero General Public License as
 * published by the Free Software Foundation, either version 3 of the
 * License, or (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU Affero General Public License for more details.
 *
 * You should have received a copy of the GNU Affero General Public License
 * along with this program.  If not, see <https://www.gnu.org/licenses/>.
 */

//! Retrieval of seed lists and access lists from `file://` and `http://`
//! locations.

use std::{path::Path, time::Duration};

use chrono::{DateTime, Utc};
use log::{debug, trace};
use smol::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
    Timer,
};
use url::Url;

use crate::{Error, Result};

/// Largest document we accept (1M), HTTP headers included
const MAX_DOCUMENT_SIZE: u64 = 1024 * 1024;

/// A fetched document.
#[derive(Debug, Clone)]
pub struct Fetched {
    pub body: Vec<u8>,
    /// Media type without parameters, lowercased
    pub content_type: Option<String>,
    pub last_modified: Option<DateTime<Utc>>,
}

/// Fetch the document at `url`, giving up after `timeout`.
pub async fn fetch(url: &Url, timeout: Duration) -> Result<Fetched> {
    let fut = async {
        match url.scheme() {
            "file" => fetch_file(url).await,
            "http" => fetch_http(url).await,
            scheme => Err(Error::UnsupportedScheme(scheme.to_string())),
        }
    };

    let timeout = async {
        Timer::after(timeout).await;
        Err(Error::ConnectTimeout)
    };

    smol::future::or(fut, timeout).await
}

/// Guess the media type from a file name extension.
pub(super) fn content_type_from_path(path: &str) -> Option<String> {
    let ext = Path::new(path).extension()?.to_str()?.to_lowercase();
    match ext.as_str() {
        "json" => Some("application/json".to_string()),
        "txt" | "text" => Some("text/plain".to_string()),
        _ => None,
    }
}

async fn fetch_file(url: &Url) -> Result<Fetched> {
    let Ok(path) = url.to_file_path() else { return Err(Error::ParseFailed("Invalid file URL")) };
    trace!(target: "seeding::fetch::fetch_file()", "Reading {}", path.display());

    let metadata = smol::fs::metadata(&path).await?;
    if metadata.len() > MAX_DOCUMENT_SIZE {
        return Err(Error::DocumentTooLarge(MAX_DOCUMENT_SIZE))
    }

    let body = smol::fs::read(&path).await?;
    let last_modified = metadata.modified().ok().map(DateTime::<Utc>::from);

    Ok(Fetched { body, content_type: content_type_from_path(url.path()), last_modified })
}

async fn fetch_http(url: &Url) -> Result<Fetched> {
    let Some(host) = url.host_str() else { return Err(Error::ParseFailed("HTTP URL without host")) };
    let port = url.port_or_known_default().unwrap_or(80);

    let mut stream = match TcpStream::connect((host, port)).await {
        Ok(s) => s,
        Err(e) => {
            debug!(target: "seeding::fetch::fetch_http()", "Connecting to {} failed: {}", url, e);
            return Err(Error::ConnectFailed)
        }
    };

    let target = match url.query() {
        Some(q) => format!("{}?{}", url.path(), q),
        None => url.path().to_string(),
    };

    let host_header = match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    };

    // HTTP/1.0 keeps the server from sending a chunked body
    let request = format!(
        "GET {} HTTP/1.0\r\nHost: {}\r\nUser-Agent: darkroute/{}\r\nAccept: */*\r\n\r\n",
        target,
        host_header,
        env!("CARGO_PKG_VERSION"),
    );
    stream.write_all(request.as_bytes()).await?;
    stream.flush().await?;

    // One byte past the limit tells a full read from a cut one
    let mut buf = vec![];
    stream.take(MAX_DOCUMENT_SIZE + 1).read_to_end(&mut buf).await?;
    if buf.len() as u64 > MAX_DOCUMENT_SIZE {
        return Err(Error::DocumentTooLarge(MAX_DOCUMENT_SIZE))
    }

    let mut fetched = parse_response(&buf)?;
    if fetched.content_type.is_none() {
        fetched.content_type = content_type_from_path(url.path());
    }

    trace!(
        target: "seeding::fetch::fetch_http()",
        "Fetched {} bytes from {} ({:?})", fetched.body.len(), url, fetched.content_type,
    );

    Ok(fetched)
}

/// Parse a complete HTTP response into its body and the headers we use.
pub(super) fn parse_response(buf: &[u8]) -> Result<Fetched> {
    let mut headers = [httparse::EMPTY_HEADER; 32];
    let mut resp = httparse::Response::new(&mut headers);

    let body_offset = match resp.parse(buf) {
        Ok(httparse::Status::Complete(offset)) => offset,
        Ok(httparse::Status::Partial) => return Err(Error::HttpParse),
        Err(e) => {
            debug!(target: "seeding::fetch::parse_response()", "Failed parsing HTTP response: {}", e);
            return Err(Error::HttpParse)
        }
    };

    let code = resp.code.unwrap_or(0);
    if code != 200 {
        return Err(Error::HttpStatus(code))
    }

    let mut content_type = None;
    let mut last_modified = None;
    let mut content_length = None;

    for header in resp.headers.iter() {
        let value = String::from_utf8_lossy(header.value);
        match header.name.to_lowercase().as_str() {
            "content-type" => {
                let media = value.split(';').next().unwrap_or_default().trim().to_lowercase();
                if !media.is_empty() {
                    content_type = Some(media);
                }
            }
            "last-modified" => {
                last_modified =
                    DateTime::parse_from_rfc2822(value.trim()).ok().map(|t| t.with_timezone(&Utc));
            }
            "content-length" => {
                let Ok(len) = value.trim().parse::<usize>() else { return Err(Error::HttpParse) };
                content_length = Some(len);
            }
            "transfer-encoding" if value.to_lowercase().contains("chunked") => {
                return Err(Error::HttpParse)
            }
            _ => {}
        }
    }

    let mut body = buf[body_offset..].to_vec();
    if let Some(len) = content_length {
        if body.len() < len {
            return Err(Error::HttpParse)
        }
        body.truncate(len);
    }

    Ok(Fetched { body, content_type, last_modified })
}

#[cfg(test)]
mod tests {
    use std::fs;

    use smol::net::TcpListener;
    use tempdir::TempDir;

    use super::*;

    #[test]
    fn fetch_local_file() {
        let dir = TempDir::new("darkroute").unwrap();
        let path = dir.path().join("seeds.txt");
        fs::write(&path, "tcp://127.0.0.1:26661\n").unwrap();
        let url = Url::from_file_path(&path).unwrap();

        let fetched = smol::block_on(fetch(&url, Duration::from_secs(5))).unwrap();
        assert_eq!(fetched.body, b"tcp://127.0.0.1:26661\n");
        assert_eq!(fetched.content_type.as_deref(), Some("text/plain"));
        assert!(fetched.last_modified.is_some());

        let missing = Url::from_file_path(dir.path().join("nope.json")).unwrap();
        assert!(matches!(
            smol::block_on(fetch(&missing, Duration::from_secs(5))),
            Err(Error::Io(std::io::ErrorKind::NotFound))
        ));
    }

    #[test]
    fn unsupported_scheme() {
        let url = Url::parse("ftp://dark.fi/seeds.txt").unwrap();
        assert!(matches!(
            smol::block_on(fetch(&url, Duration::from_secs(5))),
            Err(Error::UnsupportedScheme(s)) if s == "ftp"
        ));
    }

    #[test]
    fn parse_http_response() {
        let raw = b"HTTP/1.1 200 OK\r\n\
                    Content-Type: application/json; charset=utf-8\r\n\
                    Last-Modified: Tue, 15 Nov 1994 08:12:31 GMT\r\n\
                    Content-Length: 2\r\n\
                    \r\n\
                    {}trailing";

        let fetched = parse_response(raw).unwrap();
        assert_eq!(fetched.body, b"{}");
        assert_eq!(fetched.content_type.as_deref(), Some("application/json"));
        assert_eq!(fetched.last_modified.unwrap().timestamp(), 784887151);

        let raw = b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\n\r\n";
        assert!(matches!(parse_response(raw), Err(Error::HttpStatus(404))));

        let raw = b"HTTP/1.1 200 OK\r\nContent-Length: 10\r\n\r\nshort";
        assert!(matches!(parse_response(raw), Err(Error::HttpParse)));

        assert!(matches!(parse_response(b"HTTP/1.1 200 OK\r\n"), Err(Error::HttpParse)));
    }

    /// Serve one connection with `respond`, given the raw request.
    async fn serve_once(respond: fn(&str) -> Vec<u8>) -> Url {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        smol::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 4096];
            let mut len = 0;
            while !buf[..len].windows(4).any(|w| w == b"\r\n\r\n") {
                let n = stream.read(&mut buf[len..]).await.unwrap();
                if n == 0 {
                    break
                }
                len += n;
            }

            let response = respond(&String::from_utf8_lossy(&buf[..len]));
            // The client hangs up early on oversized bodies
            let _ = stream.write_all(&response).await;
        })
        .detach();

        Url::parse(&format!("http://127.0.0.1:{}/seeds.txt", port)).unwrap()
    }

    #[test]
    fn host_header_carries_port() {
        smol::block_on(async {
            let url = serve_once(|request| {
                let host = request.lines().find_map(|l| l.strip_prefix("Host: ")).unwrap_or("");
                format!("HTTP/1.1 200 OK\r\nContent-Length: {}\r\n\r\n{}", host.len(), host)
                    .into_bytes()
            })
            .await;

            let fetched = fetch(&url, Duration::from_secs(5)).await.unwrap();
            let expected = format!("127.0.0.1:{}", url.port().unwrap());
            assert_eq!(fetched.body, expected.as_bytes());
            assert_eq!(fetched.content_type.as_deref(), Some("text/plain"));
        });
    }

    #[test]
    fn oversized_body_is_rejected() {
        smol::block_on(async {
            let url = serve_once(|_| {
                let mut response = b"HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\n\r\n".to_vec();
                for i in 0.. {
                    if response.len() as u64 > MAX_DOCUMENT_SIZE {
                        break
                    }
                    response.extend_from_slice(format!("tcp://10.0.{}.{}:26661\n", i / 256 % 256, i % 256).as_bytes());
                }
                response
            })
            .await;

            assert!(matches!(
                fetch(&url, Duration::from_secs(5)).await,
                Err(Error::DocumentTooLarge(MAX_DOCUMENT_SIZE))
            ));
        });
    }

    #[test]
    fn content_type_guess() {
        assert_eq!(content_type_from_path("/a/seeds.JSON").as_deref(), Some("application/json"));
        assert_eq!(content_type_from_path("/a/seeds.txt").as_deref(), Some("text/plain"));
        assert_eq!(content_type_from_path("/a/seeds"), None);
    }
}

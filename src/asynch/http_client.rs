//! Request/response HTTP client on top of the modem's HTTP profiles.
//!
//! [`HttpClient`] allows one request in flight at a time. The blocking
//! helpers ([`get`](HttpClient::get), [`post`](HttpClient::post), ...) wait
//! for the module to report completion and then pick the status, headers
//! and body out of the response file. [`send_request`](HttpClient::send_request)
//! and [`receive_response`](HttpClient::receive_response) split the two
//! halves for callers that want to do other work meanwhile.

use atat::asynch::AtatClient;
use embassy_futures::select::{select, Either};
use embassy_time::{Duration, Instant, Timer};
use heapless::String;

use crate::command::http::{
    auto_body_filename,
    types::{HttpCommand, HttpPayload},
};
use crate::error::Error;

use super::http::{FileSystem, Http, HttpCallback, HttpHandle, HTTP_POST_DATA_MAX_LEN};

/// Slack on top of the module's own request timeout.
pub const HTTP_CLIENT_ADDITIONAL_TIMEOUT_SECONDS: u64 = 5;
/// Largest read of the response file in one go.
pub const HTTP_CLIENT_CELL_FILE_CHUNK_LENGTH: usize = 1024;
pub const HTTP_CONTENT_TYPE_MAX_LEN: usize = 64;

const COMPLETION_POLL: Duration = Duration::from_millis(100);
const LINE_BUFFER_LEN: usize = 128;

/// Store of TLS credentials and settings on the module.
pub trait TlsStore {
    type Settings;

    /// Create a security profile from `settings`, returning its id.
    async fn add(&mut self, settings: &Self::Settings) -> Result<u8, Error>;
    async fn remove(&mut self, profile: u8) -> Result<(), Error>;
}

impl<T: TlsStore> TlsStore for &mut T {
    type Settings = T::Settings;

    async fn add(&mut self, settings: &Self::Settings) -> Result<u8, Error> {
        T::add(self, settings).await
    }

    async fn remove(&mut self, profile: u8) -> Result<(), Error> {
        T::remove(self, profile).await
    }
}

/// For plain HTTP only.
pub struct NoTls;

impl TlsStore for NoTls {
    type Settings = ();

    async fn add(&mut self, _settings: &()) -> Result<u8, Error> {
        Err(Error::NotSupported)
    }

    async fn remove(&mut self, _profile: u8) -> Result<(), Error> {
        Ok(())
    }
}

#[derive(Debug, Clone)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct HttpConnection<'a> {
    /// Domain name or IP address, optionally with `:port`.
    pub server: &'a str,
    pub username: Option<&'a str>,
    pub password: Option<&'a str>,
    /// Handed to the module, which gives up on a request after this long.
    pub timeout_seconds: u16,
    /// Fail with [`Error::Busy`] instead of waiting when the previous request
    /// has not completed.
    pub error_on_busy: bool,
}

impl<'a> HttpConnection<'a> {
    pub const fn new(server: &'a str) -> Self {
        Self {
            server,
            username: None,
            password: None,
            timeout_seconds: 30,
            error_on_busy: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum HttpRequest<'a> {
    Head(&'a str),
    Get(&'a str),
    Delete(&'a str),
    Put {
        path: &'a str,
        data: &'a [u8],
        content_type: &'a str,
    },
    Post {
        path: &'a str,
        data: &'a [u8],
        content_type: &'a str,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct HttpResponse {
    pub status: u16,
    /// Bytes copied into the caller's buffer: headers for HEAD, the body
    /// otherwise.
    pub size: usize,
    /// `Content-Type` of the body, truncated to fit.
    pub content_type: Option<String<HTTP_CONTENT_TYPE_MAX_LEN>>,
}

pub struct HttpClient<'d, AT: AtatClient, FS: FileSystem, T: TlsStore> {
    http: Http<'d, AT>,
    handle: HttpHandle,
    fs: FS,
    tls: T,
    security_profile: Option<u8>,
    timeout_seconds: u16,
    error_on_busy: bool,
    /// Command and start time of the request awaiting its response.
    in_flight: Option<(HttpCommand, Instant)>,
}

impl<'d, AT: AtatClient, FS: FileSystem, T: TlsStore> HttpClient<'d, AT, FS, T> {
    /// Open an HTTP instance on the module, with TLS when `tls_settings` are
    /// given.
    pub async fn open(
        http: Http<'d, AT>,
        mut fs: FS,
        mut tls: T,
        connection: &HttpConnection<'_>,
        tls_settings: Option<&T::Settings>,
    ) -> Result<Self, Error> {
        let security_profile = match tls_settings {
            Some(settings) => Some(tls.add(settings).await?),
            None => None,
        };

        let opened = async {
            let handle = http
                .open(
                    connection.server,
                    connection.username,
                    connection.password,
                    connection.timeout_seconds,
                    None,
                )
                .await?;
            let secured = match security_profile {
                Some(profile) => http.set_security(handle, true, Some(profile)).await,
                None => http.set_security(handle, false, None).await,
            };
            if let Err(e) = secured {
                let _ = http.close(handle, &mut fs).await;
                return Err(e);
            }
            Ok(handle)
        }
        .await;

        let handle = match opened {
            Ok(handle) => handle,
            Err(e) => {
                if let Some(profile) = security_profile {
                    let _ = tls.remove(profile).await;
                }
                return Err(e);
            }
        };

        Ok(Self {
            http,
            handle,
            fs,
            tls,
            security_profile,
            timeout_seconds: connection.timeout_seconds,
            error_on_busy: connection.error_on_busy,
            in_flight: None,
        })
    }

    pub fn handle(&self) -> HttpHandle {
        self.handle
    }

    /// Have the runner's HTTP loop call `callback` as soon as the module
    /// reports a request done, whether or not the response is ever read.
    ///
    /// The completion also releases the client for the next request.
    pub fn set_completion_callback(
        &self,
        callback: Option<HttpCallback<'d>>,
    ) -> Result<(), Error> {
        self.http.set_callback(self.handle, callback)
    }

    /// Close the HTTP instance, deleting its files and its TLS profile.
    pub async fn close(mut self) -> Result<(), Error> {
        self.http.close(self.handle, &mut self.fs).await?;
        if let Some(profile) = self.security_profile.take() {
            self.tls.remove(profile).await?;
        }
        Ok(())
    }

    fn guard_time(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds as u64 + HTTP_CLIENT_ADDITIONAL_TIMEOUT_SECONDS)
    }

    /// Make sure no earlier request is still running before starting one.
    async fn gate(&mut self) -> Result<(), Error> {
        let Some((_, started)) = self.in_flight else {
            return Ok(());
        };
        let completion = self.http.completion(self.handle)?;
        if !completion.signaled() {
            if self.error_on_busy {
                return Err(Error::Busy);
            }
            let deadline = started + self.guard_time();
            if let Either::Second(()) = select(completion.wait(), Timer::at(deadline)).await {
                warn!(
                    "Previous HTTP request on profile {} never completed",
                    self.handle.id()
                );
            }
        }
        self.in_flight = None;
        Ok(())
    }

    /// Start `request` without waiting for its response.
    pub async fn send_request(&mut self, request: HttpRequest<'_>) -> Result<(), Error> {
        self.gate().await?;

        let body_file = auto_body_filename(self.handle.id());
        let (command, path) = match request {
            HttpRequest::Head(path) => (HttpCommand::Head, path),
            HttpRequest::Get(path) => (HttpCommand::Get, path),
            HttpRequest::Delete(path) => (HttpCommand::Delete, path),
            HttpRequest::Put { path, .. } => (HttpCommand::Put, path),
            HttpRequest::Post { path, data, .. } => match inline_body(data) {
                Some(_) => (HttpCommand::PostData, path),
                None => (HttpCommand::PostFile, path),
            },
        };

        let payload = match request {
            HttpRequest::Put {
                data, content_type, ..
            }
            | HttpRequest::Post {
                data, content_type, ..
            } => match (command, inline_body(data)) {
                (HttpCommand::PostData, Some(body)) => Some(HttpPayload {
                    data: body,
                    content_type,
                }),
                _ => {
                    self.write_body(&body_file, data).await?;
                    Some(HttpPayload {
                        data: &body_file,
                        content_type,
                    })
                }
            },
            _ => None,
        };

        self.http
            .request(self.handle, command, path, None, payload)
            .await?;
        self.in_flight = Some((command, Instant::now()));
        Ok(())
    }

    async fn write_body(&mut self, name: &str, data: &[u8]) -> Result<(), Error> {
        match self.fs.delete(name).await {
            Ok(()) | Err(Error::NotFound) => {}
            Err(e) => return Err(e),
        }
        if self.fs.write(name, data).await? != data.len() {
            return Err(Error::Platform);
        }
        Ok(())
    }

    /// Wait for the response to the request started with
    /// [`send_request`](Self::send_request), copying headers (HEAD) or body
    /// into `buf`.
    ///
    /// Gives up when `keep_going` returns `false`, or once the request has
    /// been running for its timeout plus a guard time.
    pub async fn receive_response(
        &mut self,
        buf: &mut [u8],
        mut keep_going: Option<&mut dyn FnMut() -> bool>,
    ) -> Result<HttpResponse, Error> {
        let (command, started) = self.in_flight.ok_or(Error::InvalidParameter)?;
        let completion = self.http.completion(self.handle)?;
        let deadline = started + self.guard_time();

        let event = loop {
            if let Some(event) = completion.try_take() {
                break event;
            }
            let cancelled = keep_going.as_mut().is_some_and(|f| !f());
            if cancelled || Instant::now() >= deadline {
                return Err(Error::Timeout);
            }
            if let Either::First(event) = select(completion.wait(), Timer::after(COMPLETION_POLL)).await {
                break event;
            }
        };
        self.in_flight = None;

        if !event.success {
            warn!("HTTP request on profile {} failed", self.handle.id());
            return Err(Error::DeviceError);
        }
        self.read_response(command, &event.response_filename, buf)
            .await
    }

    pub async fn head(
        &mut self,
        path: &str,
        headers: &mut [u8],
        keep_going: Option<&mut dyn FnMut() -> bool>,
    ) -> Result<HttpResponse, Error> {
        self.send_request(HttpRequest::Head(path)).await?;
        self.receive_response(headers, keep_going).await
    }

    pub async fn get(
        &mut self,
        path: &str,
        body: &mut [u8],
        keep_going: Option<&mut dyn FnMut() -> bool>,
    ) -> Result<HttpResponse, Error> {
        self.send_request(HttpRequest::Get(path)).await?;
        self.receive_response(body, keep_going).await
    }

    pub async fn delete(
        &mut self,
        path: &str,
        keep_going: Option<&mut dyn FnMut() -> bool>,
    ) -> Result<HttpResponse, Error> {
        self.send_request(HttpRequest::Delete(path)).await?;
        self.receive_response(&mut [], keep_going).await
    }

    pub async fn put(
        &mut self,
        path: &str,
        data: &[u8],
        content_type: &str,
        keep_going: Option<&mut dyn FnMut() -> bool>,
    ) -> Result<HttpResponse, Error> {
        self.send_request(HttpRequest::Put {
            path,
            data,
            content_type,
        })
        .await?;
        self.receive_response(&mut [], keep_going).await
    }

    pub async fn post(
        &mut self,
        path: &str,
        data: &[u8],
        content_type: &str,
        response: &mut [u8],
        keep_going: Option<&mut dyn FnMut() -> bool>,
    ) -> Result<HttpResponse, Error> {
        self.send_request(HttpRequest::Post {
            path,
            data,
            content_type,
        })
        .await?;
        self.receive_response(response, keep_going).await
    }

    /// Offset just past the next `\r\n` at or after `offset`.
    async fn skip_line(
        &mut self,
        filename: &str,
        mut offset: usize,
        line: &mut [u8],
    ) -> Result<usize, Error> {
        loop {
            let n = self.fs.read_block(filename, offset, line).await?;
            if n < 2 {
                return Err(Error::NotFound);
            }
            if let Some(end) = find(&line[..n], b"\r\n") {
                return Ok(offset + end + 2);
            }
            offset += n - 1;
        }
    }

    /// Pick the status line, the headers and the body out of a response file.
    async fn read_response(
        &mut self,
        command: HttpCommand,
        filename: &str,
        buf: &mut [u8],
    ) -> Result<HttpResponse, Error> {
        let mut line = [0u8; LINE_BUFFER_LEN];

        let n = self.fs.read_block(filename, 0, &mut line).await?;
        let (status_len, line_end) = match find(&line[..n], b"\r\n") {
            Some(end) => (end, Some(end + 2)),
            None if n == line.len() => (n, None),
            None => return Err(Error::NotFound),
        };
        let status = parse_status_line(&line[..status_len]).ok_or(Error::NotFound)?;
        let mut offset = match line_end {
            Some(end) => end,
            // Long reason phrase, skip to the end of the status line
            None => self.skip_line(filename, n - 1, &mut line).await?,
        };

        let mut size = 0;
        let mut content_type = None;
        let mut at_line_start = true;
        loop {
            let n = self.fs.read_block(filename, offset, &mut line).await?;
            if n == 0 {
                break;
            }
            let (len, complete) = match find(&line[..n], b"\r\n") {
                Some(end) => (end, true),
                // Keep a trailing '\r' for the next read, it may start "\r\n"
                None if n == line.len() => (n - 1, false),
                None => (n, false),
            };
            let segment = &line[..len];

            if at_line_start && complete && segment.is_empty() {
                offset += 2;
                break;
            }
            if command == HttpCommand::Head {
                size += copy_into(&mut buf[size..], segment);
                if complete {
                    size += copy_into(&mut buf[size..], b"\r\n");
                }
            } else if at_line_start && content_type.is_none() {
                content_type = parse_content_type(segment);
            }

            offset += len + if complete { 2 } else { 0 };
            at_line_start = complete;
        }

        if command != HttpCommand::Head {
            while size < buf.len() {
                let want = (buf.len() - size).min(HTTP_CLIENT_CELL_FILE_CHUNK_LENGTH);
                let n = self
                    .fs
                    .read_block(filename, offset, &mut buf[size..size + want])
                    .await?;
                if n == 0 {
                    break;
                }
                size += n;
                offset += n;
            }
        }

        debug!("HTTP status {}, {} bytes", status, size);
        Ok(HttpResponse {
            status,
            size,
            content_type,
        })
    }
}

/// `data` as it would be sent inline with a POST, if it can be.
fn inline_body(data: &[u8]) -> Option<&str> {
    if data.len() > HTTP_POST_DATA_MAX_LEN {
        return None;
    }
    let body = core::str::from_utf8(data).ok()?;
    body.bytes()
        .all(|b| (0x20..0x7f).contains(&b) && b != b'"')
        .then_some(body)
}

/// Status code of `HTTP/x.y <status> <reason>`.
fn parse_status_line(line: &[u8]) -> Option<u16> {
    let line = core::str::from_utf8(line).ok()?;
    if !line.starts_with("HTTP/") {
        return None;
    }
    line.split(' ').nth(1)?.parse().ok()
}

fn parse_content_type(line: &[u8]) -> Option<String<HTTP_CONTENT_TYPE_MAX_LEN>> {
    const NAME: &[u8] = b"content-type:";
    if line.len() < NAME.len() || !line[..NAME.len()].eq_ignore_ascii_case(NAME) {
        return None;
    }
    let value = core::str::from_utf8(&line[NAME.len()..]).ok()?.trim();
    let mut content_type = String::new();
    for c in value.chars() {
        if content_type.push(c).is_err() {
            break;
        }
    }
    Some(content_type)
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn copy_into(dst: &mut [u8], src: &[u8]) -> usize {
    let len = dst.len().min(src.len());
    dst[..len].copy_from_slice(&src[..len]);
    len
}

//! Modem hosted HTTP client.
//!
//! Each open HTTP instance owns one of the module's `+UHTTP` profiles, and
//! its profile id doubles as the handle. Requests are fire-and-forget on the
//! AT side: the module writes the whole response into a file and reports
//! completion with `+UUHTTPCR`, which ends up as an [`HttpEvent`] on the
//! runner's HTTP loop.

use core::cell::RefCell;
use core::fmt::Write as _;

use atat::asynch::AtatClient;
use embassy_sync::blocking_mutex::{raw::NoopRawMutex, Mutex};
use embassy_sync::channel::Channel;
use embassy_sync::signal::Signal;
use heapless::{String, Vec};
use no_std_net::IpAddr;

use crate::command::http::{
    auto_response_filename,
    types::{HttpCommand, HttpOpCode, HttpParamValue, HttpPayload, HTTP_FILE_NAME_PREFIX},
    urc::HttpResponse,
    GetHttpError, GetHttpSecurity, SendHttpRequest, SetHttpProfileParameter, SetHttpSecurity,
};
use crate::error::Error;

use super::State;

pub const HTTP_PROFILE_MAX_NUM: usize = 4;
pub const HTTP_SERVER_NAME_MAX_LEN_BYTES: usize = 1024;
/// Longest body `+UHTTPC` accepts inline for a POST.
pub const HTTP_POST_DATA_MAX_LEN: usize = 128;
pub const HTTP_FILE_NAME_MAX_LEN: usize = 64;

const HTTP_EVENT_QUEUE_SIZE: usize = 4;
const HTTP_DEFAULT_PORT: u16 = 80;
/// Files removed per `close`, more than a profile ever creates.
const MAX_FILES_PER_PROFILE: usize = 8;

/// File system of the module, where HTTP responses land.
pub trait FileSystem {
    /// Append `data` to the file `name`, creating it if needed.
    async fn write(&mut self, name: &str, data: &[u8]) -> Result<usize, Error>;
    async fn read_block(
        &mut self,
        name: &str,
        offset: usize,
        buf: &mut [u8],
    ) -> Result<usize, Error>;
    async fn delete(&mut self, name: &str) -> Result<(), Error>;
    async fn list(&mut self, f: &mut dyn FnMut(&str)) -> Result<(), Error>;
}

impl<T: FileSystem> FileSystem for &mut T {
    async fn write(&mut self, name: &str, data: &[u8]) -> Result<usize, Error> {
        T::write(self, name, data).await
    }

    async fn read_block(
        &mut self,
        name: &str,
        offset: usize,
        buf: &mut [u8],
    ) -> Result<usize, Error> {
        T::read_block(self, name, offset, buf).await
    }

    async fn delete(&mut self, name: &str) -> Result<(), Error> {
        T::delete(self, name).await
    }

    async fn list(&mut self, f: &mut dyn FnMut(&str)) -> Result<(), Error> {
        T::list(self, f).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct HttpHandle(u8);

impl HttpHandle {
    /// Profile id used on the module.
    pub fn id(&self) -> u8 {
        self.0
    }
}

/// Completion of a request, as reported by `+UUHTTPCR`.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct HttpEvent {
    pub handle: HttpHandle,
    /// `PostData` requests are reported as `PostFile`.
    pub command: HttpCommand,
    pub success: bool,
    pub response_filename: String<HTTP_FILE_NAME_MAX_LEN>,
}

/// Called from the runner's HTTP loop, never from the URC loop.
pub type HttpCallback<'d> = &'d dyn Fn(&HttpEvent);

struct HttpInstance<'d> {
    response_filename: String<HTTP_FILE_NAME_MAX_LEN>,
    callback: Option<HttpCallback<'d>>,
}

pub(crate) struct HttpState<'d> {
    instances: Mutex<NoopRawMutex, RefCell<[Option<HttpInstance<'d>>; HTTP_PROFILE_MAX_NUM]>>,
    pub(crate) events: Channel<NoopRawMutex, HttpEvent, HTTP_EVENT_QUEUE_SIZE>,
    completions: [Signal<NoopRawMutex, HttpEvent>; HTTP_PROFILE_MAX_NUM],
}

impl<'d> HttpState<'d> {
    pub(crate) fn new() -> Self {
        Self {
            instances: Mutex::new(RefCell::new([const { None }; HTTP_PROFILE_MAX_NUM])),
            events: Channel::new(),
            completions: [const { Signal::new() }; HTTP_PROFILE_MAX_NUM],
        }
    }

    fn with_instance<R>(
        &self,
        handle: HttpHandle,
        f: impl FnOnce(&mut HttpInstance<'d>) -> R,
    ) -> Result<R, Error> {
        self.instances.lock(|i| {
            i.borrow_mut()
                .get_mut(handle.0 as usize)
                .and_then(Option::as_mut)
                .map(f)
                .ok_or(Error::InvalidParameter)
        })
    }

    /// Turn a `+UUHTTPCR` into an event for the HTTP loop.
    pub(crate) fn on_urc(&self, urc: &HttpResponse) {
        let command = match urc.command {
            5 => HttpCommand::PostFile,
            c => match HttpCommand::from_u8(c) {
                Some(command) => command,
                None => {
                    warn!("Unknown HTTP command {} reported", c);
                    return;
                }
            },
        };

        let handle = HttpHandle(urc.profile_id);
        let Ok(response_filename) = self.with_instance(handle, |i| i.response_filename.clone())
        else {
            warn!("HTTP result for profile {} which is not open", urc.profile_id);
            return;
        };

        let event = HttpEvent {
            handle,
            command,
            success: urc.result == 1,
            response_filename,
        };
        if self.events.try_send(event).is_err() {
            warn!("HTTP event queue full, dropping result of profile {}", urc.profile_id);
        }
    }

    /// Hand an event to the user callback and to whoever waits on the profile.
    pub(crate) fn dispatch(&self, event: HttpEvent) {
        let Ok(callback) = self.with_instance(event.handle, |i| i.callback) else {
            debug!("Dropping HTTP event of closed profile {}", event.handle.0);
            return;
        };
        if let Some(callback) = callback {
            callback(&event);
        }
        if let Some(done) = self.completions.get(event.handle.0 as usize) {
            done.signal(event);
        }
    }
}

/// Handle on the module's HTTP client, obtained from
/// [`Control::http`](super::control::Control::http).
pub struct Http<'d, AT: AtatClient> {
    state: &'d State<'d, AT>,
}

impl<'d, AT: AtatClient> Clone for Http<'d, AT> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<'d, AT: AtatClient> Copy for Http<'d, AT> {}

impl<'d, AT: AtatClient> Http<'d, AT> {
    pub(crate) fn new(state: &'d State<'d, AT>) -> Self {
        Self { state }
    }

    /// Claim the lowest free profile and point it at `server`.
    ///
    /// `server` is a domain name or an IP address, optionally followed by
    /// `:port`. IPv6 addresses with a port are written `[addr]:port`.
    pub async fn open(
        &self,
        server: &str,
        username: Option<&str>,
        password: Option<&str>,
        timeout_seconds: u16,
        callback: Option<HttpCallback<'d>>,
    ) -> Result<HttpHandle, Error> {
        if server.is_empty() || server.len() > HTTP_SERVER_NAME_MAX_LEN_BYTES {
            return Err(Error::InvalidParameter);
        }
        let (host, port) = split_server(server)?;

        let handle = self.state.http.instances.lock(|i| {
            let mut instances = i.borrow_mut();
            let (id, slot) = instances
                .iter_mut()
                .enumerate()
                .find(|(_, slot)| slot.is_none())
                .ok_or(Error::NoMemory)?;
            *slot = Some(HttpInstance {
                response_filename: String::new(),
                callback,
            });
            Ok::<_, Error>(HttpHandle(id as u8))
        })?;

        if let Err(e) = self
            .configure(handle, host, port, username, password, timeout_seconds)
            .await
        {
            self.release(handle);
            return Err(e);
        }

        debug!("HTTP profile {} open", handle.0);
        Ok(handle)
    }

    async fn configure(
        &self,
        handle: HttpHandle,
        host: &str,
        port: Option<u16>,
        username: Option<&str>,
        password: Option<&str>,
        timeout_seconds: u16,
    ) -> Result<(), Error> {
        match host.parse::<IpAddr>() {
            Ok(ip) => {
                let mut canonical: String<46> = String::new();
                write!(canonical, "{}", ip).map_err(|_| Error::InvalidParameter)?;
                self.set(handle, HttpOpCode::ServerIp, HttpParamValue::Str(&canonical))
                    .await?;
            }
            Err(_) => {
                self.set(handle, HttpOpCode::ServerName, HttpParamValue::Str(host))
                    .await?;
            }
        }
        let port = port.unwrap_or(HTTP_DEFAULT_PORT);
        self.set(handle, HttpOpCode::ServerPort, HttpParamValue::Int(port as u32))
            .await?;

        if let Some(username) = username {
            self.set(handle, HttpOpCode::Username, HttpParamValue::Str(username))
                .await?;
        }
        if let Some(password) = password {
            self.set(handle, HttpOpCode::Password, HttpParamValue::Str(password))
                .await?;
        }
        let authentication = username.is_some() as u32;
        self.set(
            handle,
            HttpOpCode::Authentication,
            HttpParamValue::Int(authentication),
        )
        .await?;

        self.set(
            handle,
            HttpOpCode::Timeout,
            HttpParamValue::Int(timeout_seconds as u32),
        )
        .await
    }

    async fn set(
        &self,
        handle: HttpHandle,
        op_code: HttpOpCode,
        value: HttpParamValue<'_>,
    ) -> Result<(), Error> {
        self.state
            .at()
            .send(&SetHttpProfileParameter {
                profile_id: handle.0,
                op_code,
                value,
            })
            .await?;
        Ok(())
    }

    fn release(&self, handle: HttpHandle) {
        self.state.http.instances.lock(|i| {
            if let Some(slot) = i.borrow_mut().get_mut(handle.0 as usize) {
                *slot = None;
            }
        });
        if let Some(done) = self.state.http.completions.get(handle.0 as usize) {
            done.reset();
        }
    }

    /// Replace the callback run when the module reports a request done.
    pub fn set_callback(
        &self,
        handle: HttpHandle,
        callback: Option<HttpCallback<'d>>,
    ) -> Result<(), Error> {
        self.state
            .http
            .with_instance(handle, |i| i.callback = callback)
    }

    /// Switch HTTPS on or off, optionally with a USECMNG security profile.
    pub async fn set_security(
        &self,
        handle: HttpHandle,
        enabled: bool,
        security_profile: Option<u8>,
    ) -> Result<(), Error> {
        self.state.http.with_instance(handle, |_| ())?;
        self.state
            .at()
            .send(&SetHttpSecurity {
                profile_id: handle.0,
                enabled,
                security_profile,
            })
            .await?;
        Ok(())
    }

    /// Whether HTTPS is on, and with which security profile.
    pub async fn is_secured(&self, handle: HttpHandle) -> Result<(bool, Option<u8>), Error> {
        self.state.http.with_instance(handle, |_| ())?;
        let security = self
            .state
            .at()
            .send(&GetHttpSecurity {
                profile_id: handle.0,
            })
            .await?;
        Ok((security.enabled, security.security_profile))
    }

    /// Start a request. Completion is reported through the callback given to
    /// [`open`](Self::open) and [`wait_completion`](Self::wait_completion).
    ///
    /// For [`HttpCommand::PostData`] the payload is sent inline and must be
    /// printable ASCII without `"`. For `Put` and `PostFile` its `data` names
    /// a file on the module holding the body.
    pub async fn request(
        &self,
        handle: HttpHandle,
        command: HttpCommand,
        path: &str,
        response_filename: Option<&str>,
        payload: Option<HttpPayload<'_>>,
    ) -> Result<(), Error> {
        if path.is_empty() {
            return Err(Error::InvalidParameter);
        }
        let payload = match command {
            HttpCommand::Head | HttpCommand::Get | HttpCommand::Delete => None,
            HttpCommand::PostData => {
                let payload = payload.ok_or(Error::InvalidParameter)?;
                if payload.data.len() > HTTP_POST_DATA_MAX_LEN
                    || !is_inline_safe(payload.data)
                    || payload.content_type.is_empty()
                    || !is_inline_safe(payload.content_type)
                {
                    return Err(Error::InvalidParameter);
                }
                Some(payload)
            }
            HttpCommand::Put | HttpCommand::PostFile => {
                let payload = payload.ok_or(Error::InvalidParameter)?;
                if payload.data.is_empty() || payload.content_type.is_empty() {
                    return Err(Error::InvalidParameter);
                }
                Some(payload)
            }
        };

        let filename: String<HTTP_FILE_NAME_MAX_LEN> = match response_filename {
            Some(name) if !name.is_empty() => {
                String::try_from(name).map_err(|_| Error::InvalidParameter)?
            }
            _ => {
                let mut name = String::new();
                name.push_str(&auto_response_filename(handle.0))
                    .map_err(|_| Error::NoMemory)?;
                name
            }
        };

        self.state
            .http
            .with_instance(handle, |i| i.response_filename = filename.clone())?;
        if let Some(done) = self.state.http.completions.get(handle.0 as usize) {
            done.reset();
        }

        let result = self
            .state
            .at()
            .send(&SendHttpRequest {
                profile_id: handle.0,
                command,
                path,
                response_filename: &filename,
                payload,
            })
            .await;

        if let Err(e) = result {
            match self.state.at().send(&GetHttpError { profile_id: handle.0 }).await {
                Ok(err) => error!(
                    "HTTP request on profile {} failed, error {} {}",
                    handle.0, err.error_class, err.error_code
                ),
                Err(_) => error!("HTTP request on profile {} failed", handle.0),
            }
            return Err(e.into());
        }
        Ok(())
    }

    /// The module's own error code for the last request on this profile.
    pub async fn last_error_code(&self, handle: HttpHandle) -> Result<i32, Error> {
        self.state.http.with_instance(handle, |_| ())?;
        let err = self
            .state
            .at()
            .send(&GetHttpError {
                profile_id: handle.0,
            })
            .await?;
        Ok(err.error_code)
    }

    /// Free the profile and delete the files the driver created for it.
    pub async fn close<FS: FileSystem>(&self, handle: HttpHandle, fs: &mut FS) -> Result<(), Error> {
        self.state.http.with_instance(handle, |_| ())?;
        {
            // Nothing may be in the middle of an AT exchange for the profile
            let _at = self.state.at().lock().await;
            self.release(handle);
        }

        let mut prefix: String<24> = String::new();
        write!(prefix, "{}{}", HTTP_FILE_NAME_PREFIX, handle.0).map_err(|_| Error::NoMemory)?;

        let mut doomed: Vec<String<HTTP_FILE_NAME_MAX_LEN>, MAX_FILES_PER_PROFILE> = Vec::new();
        fs.list(&mut |name| {
            if name.starts_with(prefix.as_str()) {
                if let Ok(name) = String::try_from(name) {
                    if doomed.push(name).is_err() {
                        warn!("Too many HTTP files to delete");
                    }
                }
            }
        })
        .await?;

        for name in doomed.iter() {
            fs.delete(name).await?;
        }
        debug!("HTTP profile {} closed", handle.0);
        Ok(())
    }

    /// Wait for the outcome of the request last started on `handle`.
    pub async fn wait_completion(&self, handle: HttpHandle) -> Result<HttpEvent, Error> {
        Ok(self.completion(handle)?.wait().await)
    }

    pub(crate) fn completion(
        &self,
        handle: HttpHandle,
    ) -> Result<&'d Signal<NoopRawMutex, HttpEvent>, Error> {
        let state: &'d State<'d, AT> = self.state;
        state.http.with_instance(handle, |_| ())?;
        state
            .http
            .completions
            .get(handle.0 as usize)
            .ok_or(Error::InvalidParameter)
    }
}

/// Split `host[:port]`, accepting `[v6]:port` and bare IPv6 addresses.
fn split_server(server: &str) -> Result<(&str, Option<u16>), Error> {
    let parse_port = |p: &str| p.parse::<u16>().map_err(|_| Error::InvalidParameter);

    if let Some(rest) = server.strip_prefix('[') {
        let (host, tail) = rest.split_once(']').ok_or(Error::InvalidParameter)?;
        return match tail.strip_prefix(':') {
            Some(port) => Ok((host, Some(parse_port(port)?))),
            None if tail.is_empty() => Ok((host, None)),
            None => Err(Error::InvalidParameter),
        };
    }

    match server.split_once(':') {
        Some((host, port)) if !port.contains(':') => Ok((host, Some(parse_port(port)?))),
        _ => Ok((server, None)),
    }
}

fn is_inline_safe(s: &str) -> bool {
    s.bytes().all(|b| (0x20..0x7f).contains(&b) && b != b'"')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asynch::test_helpers::{
        assert_sent_in_order, leak_state, MockAtClient, MockFileSystem,
    };
    use crate::modules::{sara_r5::SaraR5, Module};
    use embassy_futures::block_on;

    #[test]
    fn server_splitting() {
        assert_eq!(split_server("example.com"), Ok(("example.com", None)));
        assert_eq!(split_server("example.com:8080"), Ok(("example.com", Some(8080))));
        assert_eq!(split_server("[2001:db8::1]:443"), Ok(("2001:db8::1", Some(443))));
        assert_eq!(split_server("2001:db8::1"), Ok(("2001:db8::1", None)));
        assert_eq!(split_server("host:port"), Err(Error::InvalidParameter));
    }

    #[test]
    fn open_configures_lowest_free_profile() {
        let client = MockAtClient::new();
        let log = client.log();
        let state = leak_state(client, Module::SaraR5(SaraR5));
        let http = Http::new(state);

        let first =
            block_on(http.open("example.com:8080", Some("u"), Some("p"), 30, None)).unwrap();
        let second = block_on(http.open("192.168.1.1", None, None, 60, None)).unwrap();
        assert_eq!((first.id(), second.id()), (0, 1));

        assert_sent_in_order(
            &log.borrow(),
            &[
                "AT+UHTTP=0,1,\"example.com\"",
                "AT+UHTTP=0,5,8080",
                "AT+UHTTP=0,2,\"u\"",
                "AT+UHTTP=0,3,\"p\"",
                "AT+UHTTP=0,4,1",
                "AT+UHTTP=0,7,30",
                "AT+UHTTP=1,0,\"192.168.1.1\"",
                "AT+UHTTP=1,5,80",
                "AT+UHTTP=1,4,0",
                "AT+UHTTP=1,7,60",
            ],
        );
    }

    #[test]
    fn failed_open_frees_the_profile() {
        let client = MockAtClient::new().error_once("AT+UHTTP=0,1");
        let state = leak_state(client, Module::SaraR5(SaraR5));
        let http = Http::new(state);

        assert!(block_on(http.open("example.com", None, None, 30, None)).is_err());
        let handle = block_on(http.open("example.com", None, None, 30, None)).unwrap();
        assert_eq!(handle.id(), 0);
    }

    #[test]
    fn all_profiles_taken() {
        let state = leak_state(MockAtClient::new(), Module::SaraR5(SaraR5));
        let http = Http::new(state);
        for _ in 0..HTTP_PROFILE_MAX_NUM {
            block_on(http.open("example.com", None, None, 30, None)).unwrap();
        }
        assert_eq!(
            block_on(http.open("example.com", None, None, 30, None)),
            Err(Error::NoMemory)
        );
    }

    #[test]
    fn inline_post_body_is_validated() {
        let state = leak_state(MockAtClient::new(), Module::SaraR5(SaraR5));
        let http = Http::new(state);
        let handle = block_on(http.open("example.com", None, None, 30, None)).unwrap();

        let quoted = HttpPayload {
            data: "say \"hi\"",
            content_type: "text/plain",
        };
        assert_eq!(
            block_on(http.request(handle, HttpCommand::PostData, "/", None, Some(quoted))),
            Err(Error::InvalidParameter)
        );
        assert_eq!(
            block_on(http.request(handle, HttpCommand::PostData, "/", None, None)),
            Err(Error::InvalidParameter)
        );
        assert_eq!(
            block_on(http.request(handle, HttpCommand::Get, "", None, None)),
            Err(Error::InvalidParameter)
        );
    }

    #[test]
    fn failed_request_reads_the_module_error() {
        let client = MockAtClient::new()
            .error_once("AT+UHTTPC=")
            .always("AT+UHTTPER=0", "+UHTTPER: 0,3,11");
        let log = client.log();
        let state = leak_state(client, Module::SaraR5(SaraR5));
        let http = Http::new(state);
        let handle = block_on(http.open("example.com", None, None, 30, None)).unwrap();

        assert!(block_on(http.request(handle, HttpCommand::Get, "/", None, None)).is_err());
        assert_sent_in_order(
            &log.borrow(),
            &["AT+UHTTPC=0,1,\"/\",\"ubxlibhttp_0\"", "AT+UHTTPER=0"],
        );
        assert_eq!(block_on(http.last_error_code(handle)), Ok(11));
    }

    #[test]
    fn completion_reaches_callback_and_waiter() {
        use core::sync::atomic::{AtomicU8, Ordering};

        static CALLS: AtomicU8 = AtomicU8::new(0);
        fn on_event(event: &HttpEvent) {
            assert_eq!(event.command, HttpCommand::PostFile);
            CALLS.fetch_add(1, Ordering::Relaxed);
        }

        let state = leak_state(MockAtClient::new(), Module::SaraR5(SaraR5));
        let http = Http::new(state);
        let handle = block_on(http.open("example.com", None, None, 30, Some(&on_event))).unwrap();
        let payload = HttpPayload {
            data: "a=1",
            content_type: "text/plain",
        };
        block_on(http.request(handle, HttpCommand::PostData, "/post", Some("reply"), Some(payload)))
            .unwrap();

        state.http.on_urc(&HttpResponse {
            profile_id: 0,
            command: 5,
            result: 1,
        });
        let event = state.http.events.try_receive().unwrap();
        state.http.dispatch(event);

        assert_eq!(CALLS.load(Ordering::Relaxed), 1);
        let done = block_on(http.wait_completion(handle)).unwrap();
        assert!(done.success);
        assert_eq!(done.response_filename, "reply");
    }

    #[test]
    fn result_for_unknown_profile_is_dropped() {
        let state = leak_state(MockAtClient::new(), Module::SaraR5(SaraR5));
        state.http.on_urc(&HttpResponse {
            profile_id: 2,
            command: 1,
            result: 1,
        });
        assert!(state.http.events.try_receive().is_err());
    }

    #[test]
    fn close_deletes_profile_files() {
        let state = leak_state(MockAtClient::new(), Module::SaraR5(SaraR5));
        let http = Http::new(state);
        let handle = block_on(http.open("example.com", None, None, 30, None)).unwrap();
        let mut fs = MockFileSystem::default()
            .with_file("ubxlibhttp_0", b"HTTP/1.1 200 OK\r\n\r\n")
            .with_file("ubxlibhttp_0_putpost", b"body")
            .with_file("ubxlibhttp_1", b"other profile")
            .with_file("notes.txt", b"user file");

        block_on(http.close(handle, &mut fs)).unwrap();

        let mut deleted = fs.deleted.clone();
        deleted.sort();
        assert_eq!(deleted, ["ubxlibhttp_0", "ubxlibhttp_0_putpost"]);
        assert!(fs.files.contains_key("ubxlibhttp_1"));
        assert_eq!(
            block_on(http.request(handle, HttpCommand::Get, "/", None, None)),
            Err(Error::InvalidParameter)
        );
    }
}

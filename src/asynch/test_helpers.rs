//! Scripted stand-ins for the collaborators of the driver.

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;
use std::string::String;
use std::vec::Vec;

use atat::AtatCmd;
use embedded_io_async::{ErrorKind, ErrorType, Read, Write};

use super::http::FileSystem;
use super::http_client::TlsStore;
use super::ppp::Multiplexer;
use crate::config::{CellularConfig, NoPin};
use crate::error::Error;

enum Reply {
    Ok(Vec<u8>),
    DeviceError,
    Timeout,
}

struct Rule {
    prefix: String,
    reply: Reply,
    sticky: bool,
    used: bool,
}

/// AT client answering from a script of `(command prefix, reply)` rules.
///
/// One-shot rules are used in the order they were added, before any sticky
/// rule with a matching prefix. A command no rule matches gets an empty
/// `OK`.
#[derive(Default)]
pub(crate) struct MockAtClient {
    rules: Vec<Rule>,
    pub sent: Rc<RefCell<Vec<String>>>,
}

impl MockAtClient {
    pub fn new() -> Self {
        Self::default()
    }

    fn rule(mut self, prefix: &str, reply: Reply, sticky: bool) -> Self {
        self.rules.push(Rule {
            prefix: prefix.into(),
            reply,
            sticky,
            used: false,
        });
        self
    }

    /// Answer every matching command with `response`.
    pub fn always(self, prefix: &str, response: &str) -> Self {
        self.rule(prefix, Reply::Ok(response.as_bytes().to_vec()), true)
    }

    /// Answer the next matching command with `response`.
    pub fn once(self, prefix: &str, response: &str) -> Self {
        self.rule(prefix, Reply::Ok(response.as_bytes().to_vec()), false)
    }

    pub fn error_once(self, prefix: &str) -> Self {
        self.rule(prefix, Reply::DeviceError, false)
    }

    pub fn always_error(self, prefix: &str) -> Self {
        self.rule(prefix, Reply::DeviceError, true)
    }

    pub fn always_timeout(self, prefix: &str) -> Self {
        self.rule(prefix, Reply::Timeout, true)
    }

    /// Shared log of everything sent, without the line terminator.
    pub fn log(&self) -> Rc<RefCell<Vec<String>>> {
        self.sent.clone()
    }

    fn answer(&mut self, line: &str) -> Option<&Reply> {
        let index = self
            .rules
            .iter()
            .position(|r| !r.sticky && !r.used && line.starts_with(&r.prefix))
            .or_else(|| {
                self.rules
                    .iter()
                    .position(|r| r.sticky && line.starts_with(&r.prefix))
            })?;
        let rule = &mut self.rules[index];
        rule.used = true;
        Some(&rule.reply)
    }
}

impl atat::asynch::AtatClient for MockAtClient {
    async fn send<Cmd: AtatCmd>(&mut self, cmd: &Cmd) -> Result<Cmd::Response, atat::Error> {
        let mut buf = std::vec![0u8; 4096];
        let len = cmd.write(&mut buf);
        let line = String::from_utf8_lossy(&buf[..len])
            .trim_end_matches("\r\n")
            .to_string();
        self.sent.borrow_mut().push(line.clone());

        match self.answer(&line) {
            Some(Reply::Ok(bytes)) => {
                let bytes = bytes.clone();
                cmd.parse(Ok(&bytes))
            }
            Some(Reply::DeviceError) => Err(atat::Error::Error),
            Some(Reply::Timeout) => Err(atat::Error::Timeout),
            None => cmd.parse(Ok(&[])),
        }
    }
}

/// Position of `needle` in the command log at or after `from`.
pub(crate) fn find_sent(log: &[String], needle: &str, from: usize) -> Option<usize> {
    log.iter()
        .skip(from)
        .position(|l| l == needle)
        .map(|i| i + from)
}

/// Assert that `expected` appears in `log` in order, other commands may be
/// interleaved.
pub(crate) fn assert_sent_in_order(log: &[String], expected: &[&str]) {
    let mut from = 0;
    for cmd in expected {
        match find_sent(log, cmd, from) {
            Some(i) => from = i + 1,
            None => panic!("{:?} not sent in order, log: {:#?}", cmd, log),
        }
    }
}

#[derive(Default)]
pub(crate) struct MockFileSystem {
    pub files: HashMap<String, Vec<u8>>,
    pub deleted: Vec<String>,
}

impl MockFileSystem {
    pub fn with_file(mut self, name: &str, content: &[u8]) -> Self {
        self.files.insert(name.into(), content.to_vec());
        self
    }
}

impl FileSystem for MockFileSystem {
    async fn write(&mut self, name: &str, data: &[u8]) -> Result<usize, Error> {
        self.files
            .entry(name.into())
            .or_default()
            .extend_from_slice(data);
        Ok(data.len())
    }

    async fn read_block(
        &mut self,
        name: &str,
        offset: usize,
        buf: &mut [u8],
    ) -> Result<usize, Error> {
        let file = self.files.get(name).ok_or(Error::NotFound)?;
        if offset >= file.len() {
            return Ok(0);
        }
        let len = buf.len().min(file.len() - offset);
        buf[..len].copy_from_slice(&file[offset..offset + len]);
        Ok(len)
    }

    async fn delete(&mut self, name: &str) -> Result<(), Error> {
        self.files.remove(name).ok_or(Error::NotFound)?;
        self.deleted.push(name.into());
        Ok(())
    }

    async fn list(&mut self, f: &mut dyn FnMut(&str)) -> Result<(), Error> {
        let mut names: Vec<&String> = self.files.keys().collect();
        names.sort();
        for name in names {
            f(name);
        }
        Ok(())
    }
}

/// What the mock multiplexer has been asked to do.
#[derive(Debug, Default, Clone)]
pub(crate) struct MuxLog {
    pub enabled: bool,
    pub enable_calls: usize,
    pub disable_calls: usize,
    pub added: Vec<u8>,
    pub closed: Vec<u8>,
    pub written: Vec<u8>,
}

pub(crate) struct MockMux {
    pub log: Rc<RefCell<MuxLog>>,
    /// Chunks the next channel hands out on `read`, one per call.
    pub script: Vec<Vec<u8>>,
}

impl MockMux {
    pub fn new(already_enabled: bool, script: &[&[u8]]) -> Self {
        let log = MuxLog {
            enabled: already_enabled,
            ..Default::default()
        };
        Self {
            log: Rc::new(RefCell::new(log)),
            script: script.iter().map(|c| c.to_vec()).collect(),
        }
    }
}

pub(crate) struct MockChannel {
    id: u8,
    log: Rc<RefCell<MuxLog>>,
    reads: VecDeque<Vec<u8>>,
}

impl ErrorType for MockChannel {
    type Error = ErrorKind;
}

impl Read for MockChannel {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        let Some(chunk) = self.reads.front_mut() else {
            // Nothing more scripted, behave like a silent modem.
            return core::future::pending().await;
        };
        let len = buf.len().min(chunk.len());
        buf[..len].copy_from_slice(&chunk[..len]);
        chunk.drain(..len);
        if chunk.is_empty() {
            self.reads.pop_front();
        }
        Ok(len)
    }
}

impl Write for MockChannel {
    async fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        self.log.borrow_mut().written.extend_from_slice(buf);
        Ok(buf.len())
    }
}

impl Multiplexer for MockMux {
    type Channel = MockChannel;

    fn is_enabled(&self) -> bool {
        self.log.borrow().enabled
    }

    async fn enable(&mut self) -> Result<(), Error> {
        let mut log = self.log.borrow_mut();
        log.enabled = true;
        log.enable_calls += 1;
        Ok(())
    }

    async fn disable(&mut self) -> Result<(), Error> {
        let mut log = self.log.borrow_mut();
        log.enabled = false;
        log.disable_calls += 1;
        Ok(())
    }

    async fn add_channel(&mut self, id: u8) -> Result<Self::Channel, Error> {
        self.log.borrow_mut().added.push(id);
        Ok(MockChannel {
            id,
            log: self.log.clone(),
            reads: core::mem::take(&mut self.script).into(),
        })
    }

    async fn close_channel(&mut self, channel: Self::Channel) -> Result<(), Error> {
        self.log.borrow_mut().closed.push(channel.id);
        Ok(())
    }
}

#[derive(Default)]
pub(crate) struct MockTls {
    pub added: Vec<u8>,
    pub removed: Vec<u8>,
}

impl TlsStore for MockTls {
    type Settings = u8;

    async fn add(&mut self, settings: &Self::Settings) -> Result<u8, Error> {
        self.added.push(*settings);
        Ok(*settings)
    }

    async fn remove(&mut self, profile: u8) -> Result<(), Error> {
        self.removed.push(profile);
        Ok(())
    }
}

pub(crate) struct TestConfig;

impl CellularConfig<'static> for TestConfig {
    type ResetPin = NoPin;
    type PowerPin = NoPin;
    type VintPin = NoPin;

    const CFUN_FLIP_DELAY_SECONDS: u64 = 0;
    const PPP_DIAL_TIMEOUT_SECONDS: u64 = 1;
    const PPP_HANG_UP_TIMEOUT_SECONDS: u64 = 1;
    const CONNECT_TIMEOUT_SECONDS: u64 = 20;

    #[cfg(feature = "ppp")]
    const PPP_CONFIG: embassy_net_ppp::Config<'static> = embassy_net_ppp::Config {
        username: b"",
        password: b"",
    };

    fn reset_pin(&mut self) -> Option<&mut Self::ResetPin> {
        None
    }

    fn power_pin(&mut self) -> Option<&mut Self::PowerPin> {
        None
    }

    fn vint_pin(&mut self) -> Option<&mut Self::VintPin> {
        None
    }
}

/// Driver state living for the rest of the test binary.
pub(crate) fn leak_state(
    client: MockAtClient,
    module: crate::modules::Module,
) -> &'static super::State<'static, MockAtClient> {
    let state: &'static super::State<'static, MockAtClient> =
        Box::leak(Box::new(super::State::new(client)));
    state.runner().set_module(module);
    state
}

//! PPP over a 27.010 multiplexer channel.
//!
//! The driver does not own the multiplexer, it is handed one implementing
//! [`Multiplexer`]. Opening dials `ATD*99***<cid>#` on a dedicated channel
//! and, once `CONNECT` is seen, the channel carries raw PPP frames.

use core::fmt::Write as _;
use core::marker::PhantomData;

use atat::asynch::AtatClient;
use embassy_futures::select::{select, Either};
use embassy_time::{with_timeout, Duration, Timer};
use embedded_io_async::{Read, Write};
use heapless::String;

use crate::command::system_features::{
    responses::PowerSavingControl, GetPowerSavingControl, SetPowerSavingControl,
};
use crate::config::CellularConfig;
use crate::error::Error;
use crate::modules::ModuleParams;

use super::network::KeepGoing;
use super::state::{self, LinkState, OperationState};
use super::{AtHandle, State};

/// Multiplexer channel the PPP session runs on.
pub const PPP_CHANNEL_ID: u8 = 2;

/// LCP Terminate-Request, id 2, data "User request", FCS included.
const LCP_TERMINATE_REQUEST: [u8; 29] = [
    0x7e, 0xff, 0x7d, 0x23, 0xc0, 0x21, 0x7d, 0x25, 0x7d, 0x22, 0x7d, 0x20, 0x7d, 0x30, 0x55,
    0x73, 0x65, 0x72, 0x20, 0x72, 0x65, 0x71, 0x75, 0x65, 0x73, 0x74, 0x53, 0x33, 0x7e,
];
/// Start of the matching LCP Terminate-Ack.
const LCP_TERMINATE_ACK: [u8; 8] = [0x7e, 0xff, 0x7d, 0x23, 0xc0, 0x21, 0x7d, 0x26];

const CONNECT: &[u8] = b"\r\nCONNECT";
const ERROR: &[u8] = b"\r\nERROR\r\n";

/// Time for the new channel to settle before dialling.
const DIAL_SETTLE: Duration = Duration::from_millis(100);
const WATCH_WINDOW: usize = 64;

/// 27.010 multiplexer owned by the application.
pub trait Multiplexer {
    type Channel: Read + Write;

    fn is_enabled(&self) -> bool;
    async fn enable(&mut self) -> Result<(), Error>;
    async fn disable(&mut self) -> Result<(), Error>;
    async fn add_channel(&mut self, id: u8) -> Result<Self::Channel, Error>;
    async fn close_channel(&mut self, channel: Self::Channel) -> Result<(), Error>;
}

/// Requests from the network engine to whoever drives the PPP session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PppRequest {
    /// The data context is about to go, terminate the PPP link.
    Disconnect,
    /// The data context was re-established, bring the PPP link back.
    Reconnect,
}

pub struct PppChannel<'d, AT: AtatClient, M: Multiplexer, C> {
    state: &'d State<'d, AT>,
    ch: state::Runner<'d>,
    at: AtHandle<'d, AT>,
    mux: M,
    channel: Option<M::Channel>,
    mux_was_enabled: bool,
    /// `+UPSV` setting to put back once the channel is closed.
    uart_sleep: Option<PowerSavingControl>,
    _config: PhantomData<fn() -> C>,
}

impl<'d, AT: AtatClient, M: Multiplexer, C: CellularConfig<'d>> PppChannel<'d, AT, M, C> {
    pub fn new(state: &'d State<'d, AT>, mux: M) -> Self {
        let ch = state.runner();
        ch.set_ppp_attached(true);
        Self {
            state,
            ch,
            at: state.at(),
            mux,
            channel: None,
            mux_was_enabled: false,
            uart_sleep: None,
            _config: PhantomData,
        }
    }

    pub fn is_open(&self) -> bool {
        self.channel.is_some()
    }

    /// Dial into the connected data context.
    ///
    /// The dial is abandoned when `keep_going` returns `false` or after
    /// `PPP_DIAL_TIMEOUT_SECONDS` without one.
    pub async fn open(
        &mut self,
        keep_going: Option<&mut dyn FnMut() -> bool>,
    ) -> Result<(), Error> {
        if self.channel.is_some() {
            return Ok(());
        }
        if !self.ch.is_registered(None) {
            return Err(Error::NotRegistered);
        }
        if self.ch.operation_state(None) < OperationState::Connected {
            return Err(Error::NotConnected);
        }
        let module = self.ch.module().ok_or(Error::NotInitialised)?;
        if !module.ppp_supported() {
            return Err(Error::NotSupported);
        }
        let cid = module.ppp_context_id().unwrap_or(C::CONTEXT_ID);

        self.mux_was_enabled = self.mux.is_enabled();
        self.uart_sleep = match self.at.send(&GetPowerSavingControl).await {
            Ok(upsv) if upsv.mode != 0 => {
                self.at
                    .send(&SetPowerSavingControl {
                        mode: 0,
                        timeout: None,
                    })
                    .await?;
                Some(upsv)
            }
            _ => None,
        };

        let timeout = Duration::from_secs(C::PPP_DIAL_TIMEOUT_SECONDS);
        let mut keep_going = KeepGoing::new(keep_going, timeout);
        match self.dial(cid.0, timeout, &mut keep_going).await {
            Ok(()) => {
                info!("PPP channel open on context {}", cid.0);
                self.ch.set_operation_state(OperationState::DataEstablished);
                Ok(())
            }
            Err(e) => {
                warn!("PPP dial failed: {:?}", e);
                self.release().await;
                Err(e)
            }
        }
    }

    async fn dial(
        &mut self,
        cid: u8,
        timeout: Duration,
        keep_going: &mut KeepGoing<'_>,
    ) -> Result<(), Error> {
        if !self.mux_was_enabled {
            self.mux.enable().await?;
        }
        let channel = self.channel.insert(self.mux.add_channel(PPP_CHANNEL_ID).await?);
        Timer::after(DIAL_SETTLE).await;

        let mut dial: String<16> = String::new();
        write!(dial, "ATD*99***{}#\r", cid).map_err(|_| Error::NoMemory)?;
        channel
            .write_all(dial.as_bytes())
            .await
            .map_err(|_| Error::Platform)?;

        let watchdog = async {
            loop {
                Timer::after(Duration::from_millis(500)).await;
                if !keep_going.check() {
                    break;
                }
            }
        };

        match select(
            with_timeout(timeout, read_until(channel, &[ERROR, CONNECT])),
            watchdog,
        )
        .await
        {
            Either::First(Ok(Ok(0))) => Err(Error::DeviceError),
            Either::First(Ok(Ok(_))) => Ok(()),
            Either::First(Ok(Err(e))) => Err(e),
            Either::First(Err(_)) | Either::Second(()) => Err(Error::Timeout),
        }
    }

    /// Close the PPP channel.
    ///
    /// With `terminate` an LCP Terminate-Request is sent first. A module that
    /// does not acknowledge it cannot be dialled again before a reboot.
    pub async fn close(&mut self, terminate: bool) -> Result<(), Error> {
        let Some(channel) = self.channel.as_mut() else {
            return Ok(());
        };

        if terminate {
            let hang_up = Duration::from_secs(C::PPP_HANG_UP_TIMEOUT_SECONDS);
            let acked = match channel.write_all(&LCP_TERMINATE_REQUEST).await {
                Ok(()) => matches!(
                    with_timeout(hang_up, read_until(channel, &[&LCP_TERMINATE_ACK])).await,
                    Ok(Ok(_))
                ),
                Err(_) => false,
            };
            if !acked {
                warn!("No LCP terminate ack, the module needs a reboot before PPP works again");
                self.ch.set_reboot_required();
            }
        }

        self.release().await;
        self.ch.set_link_state(LinkState::Down);
        if self.ch.operation_state(None) == OperationState::DataEstablished {
            self.ch.set_operation_state(OperationState::Connected);
        }
        info!("PPP channel closed");
        Ok(())
    }

    /// Hand back the channel and the multiplexer, and restore the UART sleep
    /// setting. Failures are only logged, there is nothing left to undo.
    async fn release(&mut self) {
        if let Some(channel) = self.channel.take() {
            if let Err(e) = self.mux.close_channel(channel).await {
                warn!("Closing the PPP channel: {:?}", e);
            }
        }
        if !self.mux_was_enabled && self.mux.is_enabled() {
            if let Err(e) = self.mux.disable().await {
                warn!("Disabling the multiplexer: {:?}", e);
            }
        }
        if let Some(rest) = self.ch.module().and_then(|m| m.ppp_close_rest()) {
            Timer::after(rest).await;
        }
        if let Some(upsv) = self.uart_sleep.take() {
            let restore = SetPowerSavingControl {
                mode: upsv.mode,
                timeout: upsv.timeout,
            };
            if let Err(e) = self.at.send(&restore).await {
                warn!("Restoring UART power saving: {:?}", e);
            }
        }
    }

    /// Write PPP frames to the module.
    pub async fn transmit(&mut self, data: &[u8]) -> Result<usize, Error> {
        let channel = self.channel.as_mut().ok_or(Error::NotConnected)?;
        channel.write(data).await.map_err(|_| Error::Platform)
    }

    /// Wait for PPP frames from the module.
    pub async fn receive(&mut self, buf: &mut [u8]) -> Result<usize, Error> {
        let channel = self.channel.as_mut().ok_or(Error::NotConnected)?;
        channel.read(buf).await.map_err(|_| Error::Platform)
    }

    /// Keep an `embassy-net` PPP interface running over the data context.
    ///
    /// The session is dialled whenever the network engine reports a data
    /// connection, torn down on [`PppRequest::Disconnect`] and redialled on
    /// [`PppRequest::Reconnect`].
    #[cfg(feature = "ppp")]
    pub async fn run_ppp(
        &mut self,
        runner: &mut embassy_net_ppp::Runner<'_>,
        mut on_ipv4_up: impl FnMut(embassy_net_ppp::Ipv4Status),
    ) -> ! {
        let state = self.state;
        loop {
            self.ch
                .wait_for_operation_state(OperationState::Connected)
                .await;
            state.ppp_requests.reset();

            if let Err(e) = self.open(None).await {
                warn!("PPP open failed: {:?}", e);
                Timer::after(Duration::from_secs(5)).await;
                continue;
            }

            let ch = self.ch.clone();
            let outcome = match self.channel.as_mut() {
                Some(channel) => {
                    let link = runner.run(BufferedChannel::new(channel), C::PPP_CONFIG, |status| {
                        ch.set_link_state(LinkState::Up);
                        on_ipv4_up(status)
                    });
                    select(link, state.ppp_requests.wait()).await
                }
                None => continue,
            };

            match outcome {
                Either::First(_) => {
                    warn!("PPP link ended");
                    let _ = self.close(false).await;
                }
                Either::Second(PppRequest::Disconnect) => {
                    let _ = self.close(true).await;
                    while state.ppp_requests.wait().await != PppRequest::Reconnect {}
                }
                Either::Second(PppRequest::Reconnect) => {
                    let _ = self.close(true).await;
                }
            }
        }
    }
}

/// Read until one of `markers` shows up and return its index. Earlier
/// markers win when several are in view.
async fn read_until<R: Read>(channel: &mut R, markers: &[&[u8]]) -> Result<usize, Error> {
    let longest = markers.iter().map(|m| m.len()).max().unwrap_or(0);
    let mut window = [0u8; WATCH_WINDOW];
    let mut len = 0;

    loop {
        if len == window.len() {
            // Keep enough of the tail for a marker split across reads
            let keep = longest.saturating_sub(1);
            window.copy_within(len - keep..len, 0);
            len = keep;
        }

        let n = channel
            .read(&mut window[len..])
            .await
            .map_err(|_| Error::Platform)?;
        if n == 0 {
            return Err(Error::NotConnected);
        }
        len += n;

        if let Some(found) = markers.iter().position(|m| contains(&window[..len], m)) {
            return Ok(found);
        }
    }
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

/// `BufRead` on top of a multiplexer channel, as `embassy-net-ppp` wants.
#[cfg(feature = "ppp")]
pub struct BufferedChannel<'c, T> {
    inner: &'c mut T,
    buf: [u8; 256],
    start: usize,
    end: usize,
}

#[cfg(feature = "ppp")]
impl<'c, T: Read + Write> BufferedChannel<'c, T> {
    pub fn new(inner: &'c mut T) -> Self {
        Self {
            inner,
            buf: [0; 256],
            start: 0,
            end: 0,
        }
    }
}

#[cfg(feature = "ppp")]
impl<T: embedded_io_async::ErrorType> embedded_io_async::ErrorType for BufferedChannel<'_, T> {
    type Error = T::Error;
}

#[cfg(feature = "ppp")]
impl<T: Read + Write> Read for BufferedChannel<'_, T> {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        if self.start == self.end {
            return self.inner.read(buf).await;
        }
        let len = buf.len().min(self.end - self.start);
        buf[..len].copy_from_slice(&self.buf[self.start..self.start + len]);
        self.start += len;
        Ok(len)
    }
}

#[cfg(feature = "ppp")]
impl<T: Read + Write> embedded_io_async::BufRead for BufferedChannel<'_, T> {
    async fn fill_buf(&mut self) -> Result<&[u8], Self::Error> {
        if self.start == self.end {
            self.end = self.inner.read(&mut self.buf).await?;
            self.start = 0;
        }
        Ok(&self.buf[self.start..self.end])
    }

    fn consume(&mut self, amt: usize) {
        self.start = (self.start + amt).min(self.end);
    }
}

#[cfg(feature = "ppp")]
impl<T: Read + Write> Write for BufferedChannel<'_, T> {
    async fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        self.inner.write(buf).await
    }

    async fn flush(&mut self) -> Result<(), Self::Error> {
        self.inner.flush().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asynch::test_helpers::{
        assert_sent_in_order, leak_state, MockAtClient, MockMux, TestConfig,
    };
    use crate::modules::{toby_r2::TobyR2, Module};
    use crate::registration::{RegType, Status};
    use embassy_futures::block_on;

    type Ppp = PppChannel<'static, MockAtClient, MockMux, TestConfig>;

    fn registered(client: MockAtClient) -> &'static State<'static, MockAtClient> {
        let state = leak_state(client, Module::TobyR2(TobyR2));
        state
            .runner()
            .update_registration_with(|s| s.force(RegType::Cereg, Status::RegisteredHome));
        state.runner().set_operation_state(OperationState::Connected);
        state
    }

    #[test]
    fn refuses_to_dial_unregistered() {
        let state = leak_state(MockAtClient::new(), Module::TobyR2(TobyR2));
        let mux = MockMux::new(false, &[]);
        let log = mux.log.clone();
        let mut ppp = Ppp::new(state, mux);

        assert_eq!(block_on(ppp.open(None)), Err(Error::NotRegistered));
        assert_eq!(log.borrow().enable_calls, 0);
    }

    #[test]
    fn refuses_to_dial_without_data_context() {
        let state = leak_state(MockAtClient::new(), Module::TobyR2(TobyR2));
        state
            .runner()
            .update_registration_with(|s| s.force(RegType::Cereg, Status::RegisteredHome));
        let mux = MockMux::new(false, &[b"\r\nCONNECT\r\n"]);
        let log = mux.log.clone();
        let mut ppp = Ppp::new(state, mux);

        assert_eq!(block_on(ppp.open(None)), Err(Error::NotConnected));
        assert!(!ppp.is_open());
        let log = log.borrow();
        assert_eq!(log.enable_calls, 0);
        assert!(log.added.is_empty());
        assert!(log.written.is_empty());
    }

    #[test]
    fn dial_then_terminate_without_ack() {
        let state = registered(MockAtClient::new().always("AT+UPSV?", "+UPSV: 0"));
        let mux = MockMux::new(false, &[b"\r\nCONNECT 150000000\r\n"]);
        let log = mux.log.clone();
        let mut ppp = Ppp::new(state, mux);

        block_on(ppp.open(None)).unwrap();
        assert!(ppp.is_open());
        assert_eq!(
            state.runner().operation_state(None),
            OperationState::DataEstablished
        );
        {
            let log = log.borrow();
            assert!(log.enabled);
            assert_eq!(log.added, [PPP_CHANNEL_ID]);
            assert_eq!(log.written, b"ATD*99***1#\r");
        }

        block_on(ppp.close(true)).unwrap();
        assert!(!ppp.is_open());
        assert!(state.runner().reboot_required());
        assert_eq!(state.runner().link_state(None), LinkState::Down);
        assert_eq!(
            state.runner().operation_state(None),
            OperationState::Connected
        );
        let log = log.borrow();
        assert_eq!(log.closed, [PPP_CHANNEL_ID]);
        assert_eq!(log.disable_calls, 1);
        assert!(log.written.ends_with(&LCP_TERMINATE_REQUEST));
    }

    #[test]
    fn acknowledged_terminate_leaves_foreign_mux_enabled() {
        let state = registered(MockAtClient::new().always("AT+UPSV?", "+UPSV: 0"));
        let mut ack = LCP_TERMINATE_ACK.to_vec();
        ack.extend_from_slice(&[0x7d, 0x22, 0x7d, 0x20, 0x7d, 0x24, 0x12, 0x34, 0x7e]);
        let mux = MockMux::new(true, &[b"ATD*99***1#\r\r\nCONNECT\r\n", &ack]);
        let log = mux.log.clone();
        let mut ppp = Ppp::new(state, mux);

        block_on(ppp.open(None)).unwrap();
        block_on(ppp.close(true)).unwrap();

        assert!(!state.runner().reboot_required());
        let log = log.borrow();
        assert_eq!(log.enable_calls, 0);
        assert_eq!(log.disable_calls, 0);
        assert!(log.enabled);
    }

    #[test]
    fn dial_error_releases_everything() {
        let client = MockAtClient::new().always("AT+UPSV?", "+UPSV: 1,2000");
        let sent = client.log();
        let state = registered(client);
        let mux = MockMux::new(false, &[b"ATD*99***1#\r", b"\r\nERROR\r\n"]);
        let log = mux.log.clone();
        let mut ppp = Ppp::new(state, mux);

        assert_eq!(block_on(ppp.open(None)), Err(Error::DeviceError));
        assert!(!ppp.is_open());

        let log = log.borrow();
        assert_eq!(log.closed, [PPP_CHANNEL_ID]);
        assert_eq!(log.disable_calls, 1);
        assert!(!log.enabled);
        assert_sent_in_order(
            &sent.borrow(),
            &["AT+UPSV?", "AT+UPSV=0", "AT+UPSV=1,2000"],
        );
    }

    #[test]
    fn marker_split_across_reads_is_found() {
        let filler = [b'x'; 60];
        let mut mux = MockMux::new(true, &[&filler, b"\r\nCON", b"NECT\r\n"]);
        let mut channel = block_on(mux.add_channel(PPP_CHANNEL_ID)).unwrap();

        assert_eq!(block_on(read_until(&mut channel, &[ERROR, CONNECT])), Ok(1));
    }
}

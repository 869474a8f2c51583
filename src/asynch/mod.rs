pub mod control;
pub mod http;
pub mod http_client;
pub(crate) mod network;
pub mod ppp;
pub mod runner;
pub mod state;
pub(crate) mod urc_handler;

#[cfg(test)]
pub(crate) mod test_helpers;

use core::cell::RefCell;

use crate::{
    command::Urc,
    config::CellularConfig,
    error::Error,
    registration::{Domain, PowerSaveParameters, Status},
    scan::{ScanResult, MAX_SCAN_RESULTS},
};
use atat::{asynch::AtatClient, UrcChannel};
use embassy_sync::{
    blocking_mutex::{self, raw::NoopRawMutex},
    channel::Channel,
    mutex::{Mutex, MutexGuard},
    signal::Signal,
};
use heapless::Deque;

use self::{control::Control, http::HttpState, ppp::PppRequest, runner::Runner};

pub const URC_SUBSCRIBERS: usize = 2;

pub(crate) const JOB_QUEUE_SIZE: usize = 8;

/// Work deferred from the URC handler to the runner, so that user callbacks
/// and follow-up AT traffic never run on the URC path.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub(crate) enum Job {
    Reactivate,
    Registration { domain: Domain, status: Status },
    BaseStationConnection(bool),
    PowerSave(PowerSaveParameters),
}

pub(crate) type JobQueue = Channel<NoopRawMutex, Job, JOB_QUEUE_SIZE>;

pub(crate) type ScanList = blocking_mutex::Mutex<NoopRawMutex, RefCell<Deque<ScanResult, MAX_SCAN_RESULTS>>>;

pub struct AtHandle<'d, AT: AtatClient>(&'d Mutex<NoopRawMutex, AT>);

impl<AT: AtatClient> Clone for AtHandle<'_, AT> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<AT: AtatClient> Copy for AtHandle<'_, AT> {}

impl<'d, AT: AtatClient> AtHandle<'d, AT> {
    async fn send<Cmd: atat::AtatCmd>(&self, cmd: &Cmd) -> Result<Cmd::Response, atat::Error> {
        self.0.lock().await.send_retry::<Cmd>(cmd).await
    }

    /// Hold the AT client for a sequence of commands.
    async fn lock(&self) -> MutexGuard<'d, NoopRawMutex, AT> {
        self.0.lock().await
    }
}

pub struct State<'d, AT: AtatClient> {
    ch: state::State<'d>,
    at_handle: Mutex<NoopRawMutex, AT>,
    /// Serializes the public network API.
    api: Mutex<NoopRawMutex, ()>,
    jobs: JobQueue,
    http: HttpState<'d>,
    scan: ScanList,
    ppp_requests: Signal<NoopRawMutex, PppRequest>,
}

impl<'d, AT: AtatClient> State<'d, AT> {
    pub fn new(at_handle: AT) -> Self {
        Self {
            ch: state::State::new(),
            at_handle: Mutex::new(at_handle),
            api: Mutex::new(()),
            jobs: Channel::new(),
            http: HttpState::new(),
            scan: blocking_mutex::Mutex::new(RefCell::new(Deque::new())),
            ppp_requests: Signal::new(),
        }
    }

    pub(crate) fn at(&'d self) -> AtHandle<'d, AT> {
        AtHandle(&self.at_handle)
    }

    pub(crate) fn runner(&'d self) -> state::Runner<'d> {
        state::Runner::new(&self.ch)
    }
}

pub fn new<'d, AT: AtatClient, C: CellularConfig<'d>, const URC_CAPACITY: usize>(
    state: &'d State<'d, AT>,
    urc_channel: &'d UrcChannel<Urc, URC_CAPACITY, URC_SUBSCRIBERS>,
    config: C,
) -> Result<(Control<'d, AT, C>, Runner<'d, AT, C, URC_CAPACITY>), Error> {
    let subscription = urc_channel.subscribe().map_err(|_| Error::NoMemory)?;

    let runner = Runner::new(state, config, subscription);
    let control = Control::new(state);

    Ok((control, runner))
}

use core::marker::PhantomData;

use atat::{asynch::AtatClient, AtatCmd};
use embassy_time::{with_timeout, Duration};
use heapless::String;
use no_std_net::IpAddr;

use crate::command::network_service::SetSignallingConnectionStatusReporting;
use crate::config::{Apn, CellularConfig};
use crate::error::Error;
use crate::modules::ModuleParams;
use crate::registration::{Domain, PowerSaveParameters, Rat, RegType, Status};
use crate::scan::{CellInfo, ScanResult};

use super::http::Http;
use super::network::Network;
use super::ppp::PppRequest;
use super::state::{
    self, ConnectionCallback, LinkState, OperationState, PowerSaveCallback, RegistrationCallback,
};
use super::State;

/// Byte counts of the data context, as kept by the module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DataCounters {
    /// Sent during the current session
    pub sent: u64,
    /// Received during the current session
    pub received: u64,
    pub total_sent: u64,
    pub total_received: u64,
}

/// Handle to the driver, used to connect, query the network and reach the
/// HTTP client. Calls that talk to the network are serialized.
pub struct Control<'d, AT: AtatClient, C> {
    state: &'d State<'d, AT>,
    ch: state::Runner<'d>,
    _config: PhantomData<fn() -> C>,
}

impl<AT: AtatClient, C> Clone for Control<'_, AT, C> {
    fn clone(&self) -> Self {
        Self {
            state: self.state,
            ch: self.ch.clone(),
            _config: PhantomData,
        }
    }
}

impl<'d, AT: AtatClient, C: CellularConfig<'d>> Control<'d, AT, C> {
    pub(crate) fn new(state: &'d State<'d, AT>) -> Self {
        Self {
            state,
            ch: state.runner(),
            _config: PhantomData,
        }
    }

    fn network(&self) -> Network<'d, AT, C> {
        Network::new(self.state)
    }

    pub fn link_state(&self) -> LinkState {
        self.ch.link_state(None)
    }

    pub fn operation_state(&self) -> OperationState {
        self.ch.operation_state(None)
    }

    pub async fn wait_for_operation_state(&self, ps: OperationState) {
        self.ch.wait_for_operation_state(ps).await
    }

    pub fn is_registered(&self) -> bool {
        self.ch.is_registered(None)
    }

    pub fn registration_status(&self, domain: Domain) -> Status {
        self.ch.with_registration(|s| s.status(domain))
    }

    pub fn rat(&self, domain: Domain) -> Option<Rat> {
        self.ch.with_registration(|s| s.rat(domain))
    }

    /// Logical cell id of the serving cell, from the last registration
    /// report.
    pub fn cell_id(&self) -> Option<u32> {
        self.ch.with_registration(|s| s.cell_id)
    }

    /// A PPP link could not be hung up cleanly, the module should be
    /// rebooted before it is used again.
    pub fn reboot_is_required(&self) -> bool {
        self.ch.reboot_required()
    }

    /// Register and activate a data context, picking the network
    /// automatically and the APN from the configuration or the database.
    ///
    /// `keep_going` is polled while the procedure runs, returning `false`
    /// aborts it. Without one the configured connect timeout applies.
    pub async fn connect(&self, keep_going: Option<&mut dyn FnMut() -> bool>) -> Result<(), Error> {
        self.connect_with(None, &C::APN, keep_going).await
    }

    /// Like [`Control::connect`], on the network `mcc_mnc` (manual
    /// selection) if given, with the given APN.
    pub async fn connect_with(
        &self,
        mcc_mnc: Option<&str>,
        apn: &Apn<'_>,
        keep_going: Option<&mut dyn FnMut() -> bool>,
    ) -> Result<(), Error> {
        self.hang_up_ppp().await;
        let _api = self.state.api.lock().await;
        let network = self.network();
        let mut keep_going = network.keep_going(keep_going);
        network.connect(mcc_mnc, apn, &mut keep_going).await
    }

    pub async fn disconnect(
        &self,
        keep_going: Option<&mut dyn FnMut() -> bool>,
    ) -> Result<(), Error> {
        self.hang_up_ppp().await;
        let _api = self.state.api.lock().await;
        let network = self.network();
        let mut keep_going = network.keep_going(keep_going);
        network.disconnect_network(&mut keep_going).await
    }

    /// Ask the PPP task to take its link down, and wait for it.
    async fn hang_up_ppp(&self) {
        if self.ch.link_state(None) != LinkState::Up {
            return;
        }
        self.state.ppp_requests.signal(PppRequest::Disconnect);
        let timeout = Duration::from_secs(C::PPP_HANG_UP_TIMEOUT_SECONDS + 5);
        if with_timeout(timeout, self.ch.wait_for_link_state(LinkState::Down))
            .await
            .is_err()
        {
            warn!("PPP link still up");
        }
    }

    /// Start a network scan, returning the number of networks found and the
    /// first of them.
    pub async fn scan_first(
        &self,
        keep_going: Option<&mut dyn FnMut() -> bool>,
    ) -> Result<(usize, Option<ScanResult>), Error> {
        let _api = self.state.api.lock().await;
        let network = self.network();
        let mut keep_going = network.keep_going(keep_going);
        network.scan_first(&mut keep_going).await
    }

    pub fn scan_next(&self) -> Option<ScanResult> {
        self.network().scan_next()
    }

    /// Drop what is left of the last scan.
    pub fn scan_last(&self) {
        self.network().scan_last()
    }

    /// Extended cell search, on modules that have it. `callback` gets every
    /// cell found and `None` while waiting; returning `false` stops the
    /// search.
    pub async fn deep_scan(
        &self,
        callback: &mut dyn FnMut(Option<&CellInfo>) -> bool,
    ) -> Result<usize, Error> {
        let _api = self.state.api.lock().await;
        self.network().deep_scan(callback).await
    }

    pub async fn get_ip_address(&self) -> Result<IpAddr, Error> {
        let _api = self.state.api.lock().await;
        self.network().ip_address().await
    }

    /// Primary and secondary DNS servers.
    pub async fn get_dns(&self, ipv6: bool) -> Result<(Option<IpAddr>, Option<IpAddr>), Error> {
        let _api = self.state.api.lock().await;
        self.network().dns_servers(ipv6).await
    }

    pub async fn get_operator_string(&self) -> Result<String<24>, Error> {
        let _api = self.state.api.lock().await;
        self.network().operator_name().await
    }

    pub async fn get_mcc_mnc(&self) -> Result<(u16, u16), Error> {
        let _api = self.state.api.lock().await;
        self.network().mcc_mnc().await
    }

    pub async fn get_data_counters(&self) -> Result<DataCounters, Error> {
        let _api = self.state.api.lock().await;
        self.network().data_counters().await
    }

    pub async fn reset_data_counters(&self) -> Result<(), Error> {
        let _api = self.state.api.lock().await;
        self.network().reset_data_counters().await
    }

    pub fn set_registration_callback(&self, callback: Option<RegistrationCallback<'d>>) {
        self.ch.set_registration_callback(callback);
    }

    /// Get told when an RRC connection to the base station comes and goes.
    /// Reporting (`+CSCON`) is switched on only while a callback is set.
    pub async fn set_base_station_connection_callback(
        &self,
        callback: Option<ConnectionCallback<'d>>,
    ) -> Result<(), Error> {
        let _api = self.state.api.lock().await;
        self.state
            .at()
            .send(&SetSignallingConnectionStatusReporting {
                enable: callback.is_some() as u8,
            })
            .await?;
        self.ch.set_connection_callback(callback);
        Ok(())
    }

    pub fn set_power_save_callback(&self, callback: Option<PowerSaveCallback<'d>>) {
        self.ch.set_power_save_callback(callback);
    }

    /// The 3GPP power saving timers agreed with the network, read back from
    /// `AT+CEREG?`. `None` while the network has not given any.
    pub async fn power_save_parameters(&self) -> Result<Option<PowerSaveParameters>, Error> {
        let module = self.ch.module().ok_or(Error::NotInitialised)?;
        if C::CEREG_TYPE < 4 || !RegType::supported_by(&module).any(|t| t == RegType::Cereg) {
            return Err(Error::NotSupported);
        }

        let _api = self.state.api.lock().await;
        self.network().refresh_registration(RegType::Cereg).await?;
        Ok(self.ch.with_registration(|s| s.power_save))
    }

    /// The modem hosted HTTP client.
    pub fn http(&self) -> Http<'d, AT> {
        Http::new(self.state)
    }

    /// Send a raw AT command to the module.
    pub async fn send<Cmd: AtatCmd>(&self, cmd: &Cmd) -> Result<Cmd::Response, Error> {
        Ok(self.state.at().send(cmd).await?)
    }

    /// Whether the module can carry a PPP link at all.
    pub fn ppp_supported(&self) -> bool {
        self.ch.module().is_some_and(|m| m.ppp_supported())
    }
}

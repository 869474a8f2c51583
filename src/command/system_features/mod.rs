//! ### 19 - System features Commands
pub mod responses;

use atat::atat_derive::AtatCmd;
use responses::*;

use super::NoResponse;

/// 19.8 Power saving control (Power SaVing) +UPSV
///
/// Sets the UART power saving configuration. Mode 0 keeps the UART always
/// awake, mode 1 lets the module sleep after `timeout` GSM frames of
/// inactivity and wake on data.
#[derive(Clone, AtatCmd)]
#[at_cmd("+UPSV", NoResponse)]
pub struct SetPowerSavingControl {
    #[at_arg(position = 0)]
    pub mode: u8,
    #[at_arg(position = 1)]
    pub timeout: Option<u32>,
}

/// 19.8 Read power saving control +UPSV?
#[derive(Clone, AtatCmd)]
#[at_cmd("+UPSV?", PowerSavingControl)]
pub struct GetPowerSavingControl;

#[cfg(test)]
mod tests {
    use super::*;
    use atat::AtatCmd;

    #[test]
    fn power_saving_control() {
        let mut buf = [0u8; 32];
        let len = SetPowerSavingControl {
            mode: 0,
            timeout: None,
        }
        .write(&mut buf);
        assert_eq!(&buf[..len], b"AT+UPSV=0\r\n");

        let resp = GetPowerSavingControl
            .parse(Ok(&b"+UPSV: 1,2000"[..]))
            .unwrap();
        assert_eq!(resp.mode, 1);
        assert_eq!(resp.timeout, Some(2000));
    }
}

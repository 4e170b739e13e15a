//! CiA 402 power-drive-system state machine: status-word decoding and
//! control-word command selection.

use std::time::{Duration, Instant};

use crate::error::{Error, Result};

/// The eight CiA 402 states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServoState {
    NotReady,
    Disabled,
    ReadyToSwitchOn,
    SwitchedOn,
    Enabled,
    QuickStopActive,
    FaultReactionActive,
    Fault,
}

const CONTROL_SHUTDOWN: u16 = 0x06;
const CONTROL_SWITCH_ON: u16 = 0x07;
const CONTROL_ENABLE_OPERATION: u16 = 0x0F;
const CONTROL_FAULT_RESET_BIT: u16 = 0x80;

/// How many consecutive fault-reset attempts `enable` tolerates before
/// giving up with `StateError`.
pub const FAULT_RESET_RETRIES: u32 = 20;

/// Decode a CiA 402 status word into its state, applying the masked
/// comparisons against the table in declaration order (first match wins).
pub fn status_word_decode(sw: u16) -> ServoState {
    const TABLE: &[(u16, u16, ServoState)] = &[
        (0x4F, 0x00, ServoState::NotReady),
        (0x4F, 0x40, ServoState::Disabled),
        (0x6F, 0x21, ServoState::ReadyToSwitchOn),
        (0x6F, 0x23, ServoState::SwitchedOn),
        (0x6F, 0x27, ServoState::Enabled),
        (0x6F, 0x07, ServoState::QuickStopActive),
        (0x4F, 0x0F, ServoState::FaultReactionActive),
        (0x4F, 0x08, ServoState::Fault),
    ];

    for &(mask, expected, state) in TABLE {
        if sw & mask == expected {
            return state;
        }
    }
    // No row matched (malformed status word): treat as not-ready, the
    // safest unrecognized state.
    ServoState::NotReady
}

/// Compute the next control-word command to issue, given the current
/// state, to drive the machine towards `Enabled`. `fault_reset_edge` is
/// `true` on the call that should raise control-word bit 7 to clear a
/// fault.
fn enable_step(state: ServoState, fault_reset_edge: bool) -> Option<u16> {
    match state {
        ServoState::Disabled => Some(CONTROL_SHUTDOWN),
        ServoState::ReadyToSwitchOn => Some(CONTROL_SWITCH_ON),
        ServoState::SwitchedOn => Some(CONTROL_ENABLE_OPERATION),
        ServoState::Fault | ServoState::FaultReactionActive => {
            if fault_reset_edge {
                Some(CONTROL_FAULT_RESET_BIT)
            } else {
                Some(0)
            }
        }
        ServoState::Enabled => None,
        ServoState::NotReady | ServoState::QuickStopActive => Some(CONTROL_SHUTDOWN),
    }
}

/// Drives the state machine towards `Enabled`, polling `read_status`
/// and writing via `write_control` until the target state is reached or
/// `timeout` expires.
pub fn enable(
    mut read_status: impl FnMut() -> Result<u16>,
    mut write_control: impl FnMut(u16) -> Result<()>,
    timeout: Duration,
) -> Result<()> {
    let deadline = Instant::now() + timeout;
    let mut fault_retries = 0u32;
    let mut last_sw = read_status()?;
    let mut last_state = status_word_decode(last_sw);
    let mut fault_edge_sent = false;

    while last_state != ServoState::Enabled {
        if Instant::now() >= deadline {
            return Err(Error::Timeout);
        }

        if matches!(last_state, ServoState::Fault | ServoState::FaultReactionActive) {
            fault_retries += 1;
            if fault_retries > FAULT_RESET_RETRIES {
                return Err(Error::State(format!(
                    "stuck in {last_state:?} after {FAULT_RESET_RETRIES} fault-reset attempts"
                )));
            }
        }

        let cmd = enable_step(last_state, !fault_edge_sent).unwrap_or(0);
        if matches!(last_state, ServoState::Fault | ServoState::FaultReactionActive) {
            fault_edge_sent = !fault_edge_sent;
        } else {
            fault_edge_sent = false;
        }
        write_control(cmd)?;

        let new_sw = wait_status_changed(&mut read_status, last_sw, deadline)?;
        last_sw = new_sw;
        last_state = status_word_decode(last_sw);
    }

    Ok(())
}

/// Drives the state machine towards `Disabled`.
pub fn disable(
    mut read_status: impl FnMut() -> Result<u16>,
    mut write_control: impl FnMut(u16) -> Result<()>,
    timeout: Duration,
) -> Result<()> {
    let deadline = Instant::now() + timeout;
    let mut last_sw = read_status()?;

    while status_word_decode(last_sw) != ServoState::Disabled {
        if Instant::now() >= deadline {
            return Err(Error::Timeout);
        }
        write_control(0)?;
        last_sw = wait_status_changed(&mut read_status, last_sw, deadline)?;
    }

    Ok(())
}

/// Apply the control-word bit-7 rising edge to clear a fault, then wait
/// for the state to leave `Fault`/`FaultReactionActive`.
pub fn fault_reset(
    mut read_status: impl FnMut() -> Result<u16>,
    mut write_control: impl FnMut(u16) -> Result<()>,
    timeout: Duration,
) -> Result<()> {
    let deadline = Instant::now() + timeout;
    write_control(0)?;
    write_control(CONTROL_FAULT_RESET_BIT)?;

    let mut last_sw = read_status()?;
    while matches!(status_word_decode(last_sw), ServoState::Fault | ServoState::FaultReactionActive) {
        if Instant::now() >= deadline {
            return Err(Error::Timeout);
        }
        last_sw = wait_status_changed(&mut read_status, last_sw, deadline)?;
    }
    Ok(())
}

/// Poll `read_status` until it returns a value different from `previous`
/// or `deadline` passes.
fn wait_status_changed(read_status: &mut impl FnMut() -> Result<u16>, previous: u16, deadline: Instant) -> Result<u16> {
    loop {
        if Instant::now() >= deadline {
            return Err(Error::Timeout);
        }
        let sw = read_status()?;
        if sw != previous {
            return Ok(sw);
        }
        std::thread::sleep(Duration::from_millis(10));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_word_decode_table_matches_cia402_bits() {
        assert_eq!(status_word_decode(0x00), ServoState::NotReady);
        assert_eq!(status_word_decode(0x40), ServoState::Disabled);
        assert_eq!(status_word_decode(0x21), ServoState::ReadyToSwitchOn);
        assert_eq!(status_word_decode(0x23), ServoState::SwitchedOn);
        assert_eq!(status_word_decode(0x27), ServoState::Enabled);
        assert_eq!(status_word_decode(0x07), ServoState::QuickStopActive);
        assert_eq!(status_word_decode(0x0F), ServoState::FaultReactionActive);
        assert_eq!(status_word_decode(0x08), ServoState::Fault);
    }

    #[test]
    fn decode_is_a_pure_total_function() {
        for sw in 0u16..=0xFFFF {
            // Must not panic and must return exactly one state; calling
            // twice with the same input gives the same result.
            assert_eq!(status_word_decode(sw), status_word_decode(sw));
        }
    }

    #[test]
    fn enable_reaches_target_against_a_scripted_drive() {
        use std::cell::RefCell;
        let sw = RefCell::new(0x40u16); // Disabled
        let read = || -> Result<u16> { Ok(*sw.borrow()) };
        let mut read = read;
        let write = |cw: u16| -> Result<()> {
            let mut s = sw.borrow_mut();
            *s = match (*s, cw) {
                (0x40, 0x06) => 0x21,
                (0x21, 0x07) => 0x23,
                (0x23, 0x0F) => 0x27,
                (cur, _) => cur,
            };
            Ok(())
        };
        let mut write = write;
        enable(&mut read, &mut write, Duration::from_secs(2)).unwrap();
        assert_eq!(status_word_decode(*sw.borrow()), ServoState::Enabled);
    }

    #[test]
    fn enable_times_out_when_drive_never_responds() {
        let mut read = || -> Result<u16> { Ok(0x40) };
        let mut write = |_: u16| -> Result<()> { Ok(()) };
        let err = enable(&mut read, &mut write, Duration::from_millis(50)).unwrap_err();
        assert!(matches!(err, Error::Timeout));
    }
}

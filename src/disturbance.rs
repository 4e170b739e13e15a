//! Disturbance: host-supplied signal played back by the drive onto
//! mapped registers. Mirrors monitoring's channel packing but in the
//! host-to-drive direction.

use crate::error::{Error, Result};
use crate::monitoring::ChannelMap;
use crate::register::Dtype;
use crate::servo::Servo;
use crate::transport::Transport;
use crate::value::RegisterValue;

/// Maximum bytes per MCB WRITE/CoE chunk when streaming the disturbance
/// buffer to the drive.
pub const MAX_CHUNK_SIZE: usize = 512;

const ENABLE_UID: &str = "DIST_ENABLE";
const DATA_UID: &str = "DIST_DATA_VALUE";
const MAP_REGS_UID: &str = "DIST_CFG_MAP_REGS";
const SAMPLES_UID: &str = "DIST_CFG_SAMPLES";

/// Writes `value` to `uid` coerced to whatever numeric dtype the register
/// declares; mirrors `monitoring::write_numeric` since the two config
/// registers are addressed the same string-UID way.
fn write_numeric<T: Transport>(servo: &Servo<T>, uid: &str, subnode: u8, value: u64) -> Result<()> {
    let dtype = servo.dictionary().register(uid, subnode)?.dtype;
    let wrapped = match dtype {
        Dtype::U8 => RegisterValue::U8(value as u8),
        Dtype::S8 => RegisterValue::S8(value as i8),
        Dtype::U16 => RegisterValue::U16(value as u16),
        Dtype::S16 => RegisterValue::S16(value as i16),
        Dtype::U32 => RegisterValue::U32(value as u32),
        Dtype::S32 => RegisterValue::S32(value as i32),
        Dtype::U64 => RegisterValue::U64(value),
        Dtype::S64 => RegisterValue::S64(value as i64),
        other => return Err(Error::Value(format!("{uid} has non-numeric dtype {other:?}"))),
    };
    servo.write(uid, wrapped, subnode, false)
}

/// A configured disturbance run.
pub struct DisturbanceConfig {
    pub channels: Vec<ChannelMap>,
    pub num_samples: u32,
}

impl DisturbanceConfig {
    pub fn bytes_per_block(&self) -> usize {
        self.channels.iter().map(|c| c.size_bytes as usize).sum()
    }

    /// Pack `samples[slot][channel]` into one contiguous byte stream:
    /// `num_samples` blocks of `bytes_per_block` bytes each, channels in
    /// map order.
    pub fn encode(&self, samples: &[Vec<RegisterValue>]) -> Result<Vec<u8>> {
        if samples.len() != self.num_samples as usize {
            return Err(Error::Value(format!(
                "expected {} sample slots, got {}",
                self.num_samples,
                samples.len()
            )));
        }
        let mut out = Vec::with_capacity(self.bytes_per_block() * samples.len());
        for (slot_idx, slot) in samples.iter().enumerate() {
            if slot.len() != self.channels.len() {
                return Err(Error::Value(format!(
                    "sample slot {slot_idx} has {} values, expected {}",
                    slot.len(),
                    self.channels.len()
                )));
            }
            for (value, ch) in slot.iter().zip(&self.channels) {
                out.extend_from_slice(&value.to_bytes(ch.size_bytes as usize));
            }
        }
        Ok(out)
    }

    /// Split an encoded stream into ≤[`MAX_CHUNK_SIZE`]-byte pieces for
    /// sequential writes to `DIST_DATA_VALUE`.
    pub fn chunk(stream: &[u8]) -> Vec<&[u8]> {
        stream.chunks(MAX_CHUNK_SIZE).collect()
    }

    /// Write the channel map and sample count to the drive. Must run
    /// before `enable`/`write_samples`.
    pub fn configure<T: Transport>(&self, servo: &Servo<T>, subnode: u8) -> Result<()> {
        for (c, channel) in self.channels.iter().enumerate() {
            write_numeric(servo, &format!("DIST_CFG_REG{c}_MAP"), subnode, channel.descriptor() as u64)?;
        }
        write_numeric(servo, MAP_REGS_UID, subnode, self.channels.len() as u64)?;
        write_numeric(servo, SAMPLES_UID, subnode, self.num_samples as u64)
    }

    /// Arm disturbance mode. `configure` must have already run.
    pub fn enable<T: Transport>(&self, servo: &Servo<T>, subnode: u8) -> Result<()> {
        servo.write(ENABLE_UID, RegisterValue::U16(1), subnode, false)
    }

    /// Encode `samples` and upload it to `DIST_DATA_VALUE` in sequential
    /// ≤[`MAX_CHUNK_SIZE`]-byte writes.
    pub fn write_samples<T: Transport>(&self, servo: &Servo<T>, subnode: u8, samples: &[Vec<RegisterValue>]) -> Result<()> {
        let stream = self.encode(samples)?;
        for chunk in Self::chunk(&stream) {
            servo.write(DATA_UID, RegisterValue::ByteArray512(chunk.to_vec()), subnode, false)?;
        }
        Ok(())
    }
}

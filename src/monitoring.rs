//! Monitoring: drive-side cyclic sampling of mapped registers into an
//! upload ring that the host reads back as a byte stream.

use crate::error::{Error, Result};
use crate::register::Dtype;
use crate::servo::Servo;
use crate::transport::Transport;
use crate::value::RegisterValue;

const ENABLE_UID: &str = "MON_DIST_ENABLE";
const TRIGGER_UID: &str = "MON_CMD_FORCE_TRIGGER";
const BYTES_REMAINING_UID: &str = "MON_CFG_BYTES_VALUE";
const DATA_UID: &str = "MON_DATA_VALUE";
const TOTAL_MAP_UID: &str = "MON_CFG_TOTAL_MAP";
const FREQ_DIV_UID: &str = "MON_DIST_FREQ_DIV";
const WINDOW_SAMP_UID: &str = "MON_CFG_WINDOW_SAMP";
const SOC_TYPE_UID: &str = "MON_CFG_SOC_TYPE";

/// Writes `value` to `uid` coerced to whatever numeric dtype the register
/// actually declares, since channel-map/window/trigger registers vary by
/// drive and aren't fixed to one width the way the always-present
/// enable/data registers are.
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

/// Software/hardware trigger mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerType {
    Auto = 0,
    Forced = 1,
    RisingOrFalling = 2,
}

/// One mapped monitoring channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelMap {
    pub subnode: u8,
    pub address: u16,
    pub dtype: Dtype,
    pub size_bytes: u8,
}

impl ChannelMap {
    /// Pack into the 32-bit channel-descriptor word.
    pub fn descriptor(&self) -> u32 {
        let high = ((self.subnode as u32 & 0xF) << 28) | ((self.address as u32 & 0x0FFF) << 16);
        let dtype_index = dtype_wire_index(self.dtype);
        let low = ((dtype_index as u32) << 8) | self.size_bytes as u32;
        high | low
    }
}

fn dtype_wire_index(dtype: Dtype) -> u8 {
    match dtype {
        Dtype::U8 => 0,
        Dtype::S8 => 1,
        Dtype::U16 => 2,
        Dtype::S16 => 3,
        Dtype::U32 => 4,
        Dtype::S32 => 5,
        Dtype::U64 => 6,
        Dtype::S64 => 7,
        Dtype::Float => 8,
        Dtype::Str => 9,
        Dtype::ByteArray512 => 10,
        Dtype::Bool => 11,
    }
}

/// A configured monitoring run: channel map, sampling divider, window
/// size and trigger mode.
pub struct MonitoringConfig {
    pub channels: Vec<ChannelMap>,
    pub divider: u32,
    pub window_samples: u32,
    pub trigger: TriggerType,
}

impl MonitoringConfig {
    pub fn bytes_per_block(&self) -> usize {
        self.channels.iter().map(|c| c.size_bytes as usize).sum()
    }

    /// Split a concatenated byte stream into per-channel samples,
    /// decoding each by its declared dtype. Reads are expected to have
    /// drained the drive completely; this function doesn't enforce that,
    /// only the caller can.
    pub fn decode_blocks(&self, raw: &[u8]) -> Result<Vec<Vec<RegisterValue>>> {
        let block_size = self.bytes_per_block();
        if block_size == 0 {
            return Err(Error::Value("monitoring channel map is empty".into()));
        }
        if raw.len() % block_size != 0 {
            return Err(Error::Value(format!(
                "monitoring byte stream length {} is not a multiple of block size {block_size}",
                raw.len()
            )));
        }

        let mut blocks = Vec::with_capacity(raw.len() / block_size);
        for block in raw.chunks(block_size) {
            let mut offset = 0usize;
            let mut samples = Vec::with_capacity(self.channels.len());
            for ch in &self.channels {
                let end = offset + ch.size_bytes as usize;
                samples.push(RegisterValue::from_bytes(ch.dtype, &block[offset..end])?);
                offset = end;
            }
            blocks.push(samples);
        }
        Ok(blocks)
    }

    /// Write the channel map, total-channel count, sample divider, window
    /// size and trigger mode to the drive. Must run before `enable`.
    pub fn configure<T: Transport>(&self, servo: &Servo<T>, subnode: u8) -> Result<()> {
        for (c, channel) in self.channels.iter().enumerate() {
            write_numeric(servo, &format!("MON_CFG_REG{c}_MAP"), subnode, channel.descriptor() as u64)?;
        }
        write_numeric(servo, TOTAL_MAP_UID, subnode, self.channels.len() as u64)?;
        write_numeric(servo, FREQ_DIV_UID, subnode, self.divider as u64)?;
        write_numeric(servo, WINDOW_SAMP_UID, subnode, self.window_samples as u64)?;
        write_numeric(servo, SOC_TYPE_UID, subnode, self.trigger as u64)
    }

    /// Arm the monitoring run. `configure` must have already run.
    pub fn enable<T: Transport>(&self, servo: &Servo<T>, subnode: u8) -> Result<()> {
        servo.write(ENABLE_UID, RegisterValue::U16(1), subnode, false)
    }

    /// Force an immediate software trigger, equivalent to
    /// `TriggerType::Forced` firing on demand.
    pub fn trigger<T: Transport>(&self, servo: &Servo<T>, subnode: u8) -> Result<()> {
        write_numeric(servo, TRIGGER_UID, subnode, 1)
    }

    /// Drain the upload ring: poll the remaining-byte counter and read
    /// ≤512-byte chunks from the data register until it reaches zero, then
    /// split the concatenated buffer into per-channel samples.
    pub fn read_all<T: Transport>(&self, servo: &Servo<T>, subnode: u8) -> Result<Vec<Vec<RegisterValue>>> {
        let mut reader = MonitoringReader::default();
        loop {
            let remaining = servo
                .read(BYTES_REMAINING_UID, subnode)?
                .as_i64()
                .ok_or_else(|| Error::Value(format!("{BYTES_REMAINING_UID} is not an integer register")))?;
            if remaining <= 0 {
                break;
            }
            let chunk = match servo.read(DATA_UID, subnode)? {
                RegisterValue::ByteArray512(bytes) => bytes,
                other => return Err(Error::Value(format!("{DATA_UID} decoded as {other:?}, expected a byte buffer"))),
            };
            if chunk.is_empty() {
                break;
            }
            reader.push_chunk(&chunk);
        }
        self.decode_blocks(&reader.take())
    }
}

/// Collects readback chunks (≤512 bytes per MCB/CoE transaction) into one
/// contiguous buffer, ready to split with [`MonitoringConfig::decode_blocks`].
#[derive(Default)]
pub struct MonitoringReader {
    buffer: Vec<u8>,
}

impl MonitoringReader {
    pub const CHUNK_SIZE: usize = 512;

    pub fn push_chunk(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    pub fn take(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.buffer)
    }
}

//! Servo façade (L3): typed read/write by UID, the CiA 402 state machine,
//! and the observer lists layered on top of a transport.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::dictionary::Dictionary;
use crate::emcy::{EmergencyCallback, EmergencyMessage};
use crate::error::{Error, Result};
use crate::pdo::PdoEngine;
use crate::register::Register;
use crate::state::{self, ServoState};
use crate::transport::Transport;
use crate::value::RegisterValue;

/// Magic passwords for store/restore and their COCO registers.
pub const STORE_ALL_PASSWORD: u32 = 0x6576_6173; // "save"
pub const RESTORE_ALL_PASSWORD: u32 = 0x6461_6F6C; // "load"

const STATUS_WORD_UID: &str = "DRV_STATE_STATUS";
const CONTROL_WORD_UID: &str = "DRV_STATE_CONTROL";
const STORE_ALL_UID: &str = "DRV_STORE_COCO_ALL";
const RESTORE_ALL_UID: &str = "DRV_RESTORE_COCO_ALL";
const MOCO_STORE_UID: &str = "DRV_STORE_MOCO_ALL";
const MOCO_RESTORE_UID: &str = "DRV_RESTORE_MOCO_ALL";

/// Callback invoked after a successful write.
pub type RegisterUpdateCallback<T> = Box<dyn Fn(&Servo<T>, &Register, &RegisterValue) + Send + Sync>;
/// Callback invoked when the decoded servo state changes.
pub type StateChangeCallback = Box<dyn Fn(ServoState) + Send + Sync>;

/// Handle returned by a `*_subscribe` call, good for exactly one matching
/// `*_unsubscribe` call on the same topic.
pub type SubscriptionToken = u64;

/// One servo: bound to exactly one peer address on one transport, with
/// one dictionary. The transport handle is `Arc`-shared so a `Network`
/// can hand the same lock to its `PdoEngine` — one thread, one mutex,
/// never two independent serializations of the same wire.
pub struct Servo<T: Transport> {
    transport: Arc<Mutex<T>>,
    dictionary: Arc<Dictionary>,
    register_update_subscribers: Mutex<Vec<(SubscriptionToken, RegisterUpdateCallback<T>)>>,
    state_subscribers: Mutex<Vec<(SubscriptionToken, StateChangeCallback)>>,
    emcy_subscribers: Mutex<Vec<(SubscriptionToken, EmergencyCallback)>>,
    pdo: Mutex<Option<PdoEngine>>,
    next_token: AtomicU64,
}

impl<T: Transport> Servo<T> {
    pub fn new(transport: T, dictionary: Arc<Dictionary>) -> Self {
        Self::from_shared(Arc::new(Mutex::new(transport)), dictionary)
    }

    /// Build a servo over a transport handle already shared with a
    /// `Network` (and, through it, a `PdoEngine`).
    pub(crate) fn from_shared(transport: Arc<Mutex<T>>, dictionary: Arc<Dictionary>) -> Self {
        Self {
            transport,
            dictionary,
            register_update_subscribers: Mutex::new(Vec::new()),
            state_subscribers: Mutex::new(Vec::new()),
            emcy_subscribers: Mutex::new(Vec::new()),
            pdo: Mutex::new(None),
            next_token: AtomicU64::new(1),
        }
    }

    fn next_token(&self) -> SubscriptionToken {
        self.next_token.fetch_add(1, Ordering::Relaxed)
    }

    pub fn dictionary(&self) -> &Dictionary {
        &self.dictionary
    }

    fn lock_transport(&self) -> Result<std::sync::MutexGuard<'_, T>> {
        self.transport.lock().map_err(|_| Error::Internal("servo transport lock poisoned".into()))
    }

    /// Read a register by UID and decode it to a typed value.
    pub fn read(&self, uid: &str, subnode: u8) -> Result<RegisterValue> {
        let register = self.dictionary.register(uid, subnode)?;
        register.check_read_access()?;
        let mut guard = self.lock_transport()?;
        let bytes = guard.read_raw(register).map_err(|e| tag_register(e, uid))?;
        RegisterValue::from_bytes(register.dtype, &bytes)
    }

    /// Write `value` to register `uid`. `complete_access` only has effect
    /// for CONFIG registers on EtherCAT: sub-0 and sub-1 of a mapping
    /// register are then sent as one CoE transaction.
    pub fn write(&self, uid: &str, value: RegisterValue, subnode: u8, complete_access: bool) -> Result<()> {
        let register = self.dictionary.register(uid, subnode)?;
        register.check_write_access()?;
        if value.dtype() != register.dtype {
            return Err(Error::Value(format!(
                "register {uid} expects {:?}, got {:?}",
                register.dtype,
                value.dtype()
            )));
        }
        if let Some(range) = register.range {
            if let Some(v) = value.as_i64() {
                if !range.contains(v) {
                    return Err(Error::Value(format!("value {v} out of range [{}, {}] for {uid}", range.min, range.max)));
                }
            }
        }

        let bytes = value.to_bytes(register.field_size());
        let mut guard = self.lock_transport()?;
        // `complete_access` only changes anything for a CONFIG register on
        // EtherCAT, where `write_complete_access` (see pdo.rs's mapping
        // writer for the canonical caller) bundles sub-0/sub-1 into one
        // CoE transfer; a standalone single-register write always
        // degenerates to `write_raw`.
        let _ = complete_access;
        guard.write_raw(register, &bytes).map_err(|e| tag_register(e, uid))?;
        drop(guard);

        for (_, cb) in self.register_update_subscribers.lock().unwrap().iter() {
            cb(self, register, &value);
        }
        Ok(())
    }

    /// Read-modify-write of one bitfield within an integer register.
    pub fn write_bitfield(&self, uid: &str, subnode: u8, name: &str, value: u64) -> Result<()> {
        let register = self.dictionary.register(uid, subnode)?;
        let bf = register.bitfield(name)?;
        if value > bf.max_value() {
            return Err(Error::Value(format!("value {value} does not fit bitfield {name} of {uid}")));
        }

        let current = self.read(uid, subnode)?;
        let current_int = current.as_i64().ok_or_else(|| Error::Value(format!("{uid} is not an integer register")))? as u64;
        let cleared = current_int & !bf.mask();
        let merged = cleared | ((value << bf.start_bit) & bf.mask());
        let new_value = rebuild_like(&current, merged);
        self.write(uid, new_value, subnode, false)
    }

    pub fn read_bitfield(&self, uid: &str, subnode: u8, name: &str) -> Result<u64> {
        let register = self.dictionary.register(uid, subnode)?;
        let bf = register.bitfield(name)?;
        let current = self.read(uid, subnode)?;
        let current_int = current.as_i64().ok_or_else(|| Error::Value(format!("{uid} is not an integer register")))? as u64;
        Ok((current_int & bf.mask()) >> bf.start_bit)
    }

    pub fn register_update_subscribe(&self, cb: RegisterUpdateCallback<T>) -> SubscriptionToken {
        let token = self.next_token();
        self.register_update_subscribers.lock().unwrap().push((token, cb));
        token
    }

    /// Remove a single subscriber by the token its `register_update_subscribe`
    /// call returned. A token already removed (or from another servo) is
    /// silently ignored.
    pub fn register_update_unsubscribe(&self, token: SubscriptionToken) {
        self.register_update_subscribers.lock().unwrap().retain(|(t, _)| *t != token);
    }

    pub fn register_update_unsubscribe_all(&self) {
        self.register_update_subscribers.lock().unwrap().clear();
    }

    pub fn state_subscribe(&self, cb: StateChangeCallback) -> SubscriptionToken {
        let token = self.next_token();
        self.state_subscribers.lock().unwrap().push((token, cb));
        token
    }

    pub fn state_unsubscribe(&self, token: SubscriptionToken) {
        self.state_subscribers.lock().unwrap().retain(|(t, _)| *t != token);
    }

    pub fn emergency_subscribe(&self, cb: EmergencyCallback) -> SubscriptionToken {
        let token = self.next_token();
        self.emcy_subscribers.lock().unwrap().push((token, cb));
        token
    }

    pub fn emergency_unsubscribe(&self, token: SubscriptionToken) {
        self.emcy_subscribers.lock().unwrap().retain(|(t, _)| *t != token);
    }

    pub fn dispatch_emergency(&self, msg: &EmergencyMessage) {
        for (_, cb) in self.emcy_subscribers.lock().unwrap().iter() {
            cb(msg);
        }
    }

    pub fn get_status_word(&self, subnode: u8) -> Result<u16> {
        let value = self.read(STATUS_WORD_UID, subnode)?;
        value.as_i64().map(|v| v as u16).ok_or_else(|| Error::Value("status word register is not an integer".into()))
    }

    pub fn get_state(&self, subnode: u8) -> Result<ServoState> {
        Ok(state::status_word_decode(self.get_status_word(subnode)?))
    }

    fn control_word_io(&self, subnode: u8) -> (impl FnMut() -> Result<u16> + '_, impl FnMut(u16) -> Result<()> + '_) {
        let read = move || self.get_status_word(subnode);
        let write = move |cw: u16| self.write(CONTROL_WORD_UID, RegisterValue::U16(cw), subnode, false);
        (read, write)
    }

    pub fn enable(&self, timeout: Duration, subnode: u8) -> Result<()> {
        let (mut read, mut write) = self.control_word_io(subnode);
        let result = state::enable(&mut read, &mut write, timeout);
        self.notify_state(subnode);
        result
    }

    pub fn disable(&self, subnode: u8, timeout: Duration) -> Result<()> {
        let (mut read, mut write) = self.control_word_io(subnode);
        let result = state::disable(&mut read, &mut write, timeout);
        self.notify_state(subnode);
        result
    }

    pub fn fault_reset(&self, subnode: u8, timeout: Duration) -> Result<()> {
        let (mut read, mut write) = self.control_word_io(subnode);
        let result = state::fault_reset(&mut read, &mut write, timeout);
        self.notify_state(subnode);
        result
    }

    fn notify_state(&self, subnode: u8) {
        if let Ok(state) = self.get_state(subnode) {
            for (_, cb) in self.state_subscribers.lock().unwrap().iter() {
                cb(state);
            }
        }
    }

    /// Write the COCO store-all password; on failure, fall back to the
    /// per-axis MOCO store register. Fire-and-forget: failures are
    /// logged, not raised, since the drive may still be completing.
    pub fn store_parameters(&self, subnode: u8) {
        let primary = self.write(STORE_ALL_UID, RegisterValue::U32(STORE_ALL_PASSWORD), 0, false);
        if primary.is_err() {
            if let Err(e) = self.write(MOCO_STORE_UID, RegisterValue::U32(STORE_ALL_PASSWORD), subnode, false) {
                warn!("store_parameters failed on both COCO and MOCO paths: {e}");
            }
        }
    }

    /// Write the COCO restore-all password; swallow all failures and
    /// only log them, rather than raising.
    pub fn restore_parameters(&self, subnode: u8) {
        let primary = self.write(RESTORE_ALL_UID, RegisterValue::U32(RESTORE_ALL_PASSWORD), 0, false);
        if let Err(e) = primary {
            warn!("restore_parameters COCO path failed: {e}, trying MOCO");
            if let Err(e) = self.write(MOCO_RESTORE_UID, RegisterValue::U32(RESTORE_ALL_PASSWORD), subnode, false) {
                warn!("restore_parameters failed on both COCO and MOCO paths: {e}");
            }
        }
    }

    pub(crate) fn pdo_slot(&self) -> &Mutex<Option<PdoEngine>> {
        &self.pdo
    }

    /// A type-erased clone of this servo's transport lock, for handing to
    /// a `PdoEngine` run by the owning `Network`.
    pub(crate) fn transport_handle(&self) -> Arc<Mutex<dyn Transport>>
    where
        T: 'static,
    {
        Arc::clone(&self.transport) as Arc<Mutex<dyn Transport>>
    }
}

fn rebuild_like(template: &RegisterValue, merged: u64) -> RegisterValue {
    match template {
        RegisterValue::U8(_) => RegisterValue::U8(merged as u8),
        RegisterValue::S8(_) => RegisterValue::S8(merged as i8),
        RegisterValue::U16(_) => RegisterValue::U16(merged as u16),
        RegisterValue::S16(_) => RegisterValue::S16(merged as i16),
        RegisterValue::U32(_) => RegisterValue::U32(merged as u32),
        RegisterValue::S32(_) => RegisterValue::S32(merged as i32),
        RegisterValue::U64(_) => RegisterValue::U64(merged),
        RegisterValue::S64(_) => RegisterValue::S64(merged as i64),
        RegisterValue::Bool(_) => RegisterValue::Bool(merged != 0),
        other => other.clone(),
    }
}

fn tag_register(e: Error, uid: &str) -> Error {
    match e {
        Error::Io { message, uid: None } => Error::Io { message, uid: Some(uid.to_string()) },
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::register::Register;
    use std::sync::atomic::AtomicUsize;

    struct NullTransport;

    impl Transport for NullTransport {
        fn read_raw(&mut self, _register: &Register) -> Result<Vec<u8>> {
            Ok(vec![0, 0])
        }

        fn write_raw(&mut self, _register: &Register, _data: &[u8]) -> Result<()> {
            Ok(())
        }
    }

    fn servo() -> Servo<NullTransport> {
        let xml = r#"
        <IngeniaDictionary>
          <Header><Version>2.1</Version></Header>
          <Body>
            <Device Interface="ETH" firmwareVersion="1.0" ProductCode="0x1" RevisionNumber="0x1" PartNumber="X">
              <Registers>
                <Register id="DRV_BUS_VOLT" dtype="u16" access="rw" subnode="1" cyclic="CYCLIC_TX" address_type="IP" address="0x630"/>
              </Registers>
            </Device>
          </Body>
        </IngeniaDictionary>
        "#;
        Servo::new(NullTransport, Arc::new(Dictionary::parse(xml).unwrap()))
    }

    #[test]
    fn register_update_unsubscribe_removes_only_that_token() {
        let servo = servo();
        let hits_a = Arc::new(AtomicUsize::new(0));
        let hits_b = Arc::new(AtomicUsize::new(0));
        let token_a = {
            let hits_a = Arc::clone(&hits_a);
            servo.register_update_subscribe(Box::new(move |_, _, _| {
                hits_a.fetch_add(1, Ordering::SeqCst);
            }))
        };
        {
            let hits_b = Arc::clone(&hits_b);
            servo.register_update_subscribe(Box::new(move |_, _, _| {
                hits_b.fetch_add(1, Ordering::SeqCst);
            }));
        }

        servo.write("DRV_BUS_VOLT", RegisterValue::U16(1), 1, false).unwrap();
        servo.register_update_unsubscribe(token_a);
        servo.write("DRV_BUS_VOLT", RegisterValue::U16(2), 1, false).unwrap();

        assert_eq!(hits_a.load(Ordering::SeqCst), 1);
        assert_eq!(hits_b.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn state_and_emergency_unsubscribe_stop_delivery() {
        let servo = servo();
        let state_hits = Arc::new(AtomicUsize::new(0));
        let emcy_hits = Arc::new(AtomicUsize::new(0));

        let state_token = {
            let state_hits = Arc::clone(&state_hits);
            servo.state_subscribe(Box::new(move |_| {
                state_hits.fetch_add(1, Ordering::SeqCst);
            }))
        };
        let emcy_token = {
            let emcy_hits = Arc::clone(&emcy_hits);
            servo.emergency_subscribe(Box::new(move |_| {
                emcy_hits.fetch_add(1, Ordering::SeqCst);
            }))
        };

        let msg = EmergencyMessage { error_code: 0, error_register: 0, vendor_specific: [0; 5] };
        servo.notify_state(1);
        servo.dispatch_emergency(&msg);
        servo.state_unsubscribe(state_token);
        servo.emergency_unsubscribe(emcy_token);
        servo.notify_state(1);
        servo.dispatch_emergency(&msg);

        assert_eq!(state_hits.load(Ordering::SeqCst), 1);
        assert_eq!(emcy_hits.load(Ordering::SeqCst), 1);
    }
}

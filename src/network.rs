//! `Network`: owns the transport handle and the servos bound to it, and
//! is the sole place allowed to start or stop the PDO cyclic thread.

use std::sync::{Arc, Mutex};

use crate::dictionary::Dictionary;
use crate::error::{Error, Result};
use crate::pdo::{ExceptionObserver, PdoEngineConfig, PdoMap, ReceiveObserver, SendObserver};
use crate::servo::Servo;
use crate::transport::Transport;

/// One physical link and every servo addressed on it.
///
/// A `Network` is built around one `Transport` instance; every `Servo`
/// obtained from it shares that transport's lock, so register access and
/// the PDO cycle never race each other at the wire — they serialize
/// through the same `Mutex`.
pub struct Network<T: Transport + 'static> {
    transport: Arc<Mutex<T>>,
    servos: Vec<Arc<Servo<T>>>,
}

impl<T: Transport + 'static> Network<T> {
    pub fn new(transport: T) -> Self {
        Self { transport: Arc::new(Mutex::new(transport)), servos: Vec::new() }
    }

    /// Bind a servo on this network's transport with the given
    /// dictionary. The returned handle shares this network's lock.
    pub fn connect_servo(&mut self, dictionary: Arc<Dictionary>) -> Arc<Servo<T>> {
        let servo = Arc::new(Servo::from_shared(Arc::clone(&self.transport), dictionary));
        self.servos.push(Arc::clone(&servo));
        servo
    }

    pub fn servos(&self) -> &[Arc<Servo<T>>] {
        &self.servos
    }

    /// Drop a previously connected servo, stopping its contribution to
    /// future PDO cycles. Does not touch the underlying transport, which
    /// may still be shared by other servos.
    pub fn disconnect_servo(&mut self, servo: &Arc<Servo<T>>) {
        self.servos.retain(|s| !Arc::ptr_eq(s, servo));
    }

    /// Start the single PDO engine for this network, multiplexing
    /// `rpdo_maps`/`tpdo_maps` across every connected servo's transport
    /// lock. Only one engine may run per network at a time; starting a
    /// second one while the first is running is rejected by
    /// `PdoEngine::start`.
    #[allow(clippy::too_many_arguments)]
    pub fn start_pdo(
        &self,
        owner: &Arc<Servo<T>>,
        subnode: u8,
        rpdo_maps: Vec<Arc<PdoMap>>,
        tpdo_maps: Vec<Arc<PdoMap>>,
        send_observers: Vec<SendObserver>,
        receive_observers: Vec<ReceiveObserver>,
        config: PdoEngineConfig,
        is_safe: bool,
        on_exception: ExceptionObserver,
    ) -> Result<()> {
        if !self.servos.iter().any(|s| Arc::ptr_eq(s, owner)) {
            return Err(Error::Internal("servo is not connected to this network".into()));
        }
        let handle = owner.transport_handle();
        let mut guard = owner
            .pdo_slot()
            .lock()
            .map_err(|_| Error::Internal("PDO slot lock poisoned".into()))?;
        let engine = guard.get_or_insert_with(Default::default);
        engine.start(
            handle,
            owner.dictionary(),
            subnode,
            rpdo_maps,
            tpdo_maps,
            send_observers,
            receive_observers,
            config,
            is_safe,
            on_exception,
        )
    }

    pub fn stop_pdo(&self, owner: &Arc<Servo<T>>) -> Result<()> {
        let mut guard = owner
            .pdo_slot()
            .lock()
            .map_err(|_| Error::Internal("PDO slot lock poisoned".into()))?;
        if let Some(engine) = guard.as_mut() {
            engine.stop();
        }
        Ok(())
    }

    pub fn is_pdo_running(&self, owner: &Arc<Servo<T>>) -> bool {
        owner.pdo_slot().lock().map(|g| g.as_ref().map(|e| e.is_running()).unwrap_or(false)).unwrap_or(false)
    }

    /// Disconnect every servo and release the transport. Equivalent to
    /// dropping the `Network`, named for parity with its explicit
    /// connect/disconnect surface.
    pub fn close(mut self) {
        self.servos.clear();
    }
}

/// A discovered peer on a network not yet bound to a dictionary.
///
/// IP/CAN/EtherCAT discovery (adapter enumeration, CAN bitrate scanning,
/// EtherCAT slave detection) is out of scope; this type only carries what
/// a caller already knows from its own discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredPeer {
    pub description: String,
    pub node_id: Option<u8>,
}

impl DiscoveredPeer {
    pub fn new(description: impl Into<String>, node_id: Option<u8>) -> Self {
        Self { description: description.into(), node_id }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::register::Register;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct LoopbackTransport {
        reads: Arc<AtomicUsize>,
    }

    impl Transport for LoopbackTransport {
        fn read_raw(&mut self, register: &Register) -> Result<Vec<u8>> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            Ok(vec![0u8; register.field_size().min(8)])
        }

        fn write_raw(&mut self, _register: &Register, _data: &[u8]) -> Result<()> {
            Ok(())
        }
    }

    fn v2_dictionary() -> Arc<Dictionary> {
        let xml = r#"
        <IngeniaDictionary>
          <Header><Version>2.1</Version></Header>
          <Body>
            <Device Interface="ETH" firmwareVersion="1.0" ProductCode="0x1" RevisionNumber="0x1" PartNumber="X">
              <Registers>
                <Register id="DRV_BUS_VOLT" dtype="float" access="ro" subnode="1" cyclic="CYCLIC_TX" address_type="IP" address="0x630"/>
              </Registers>
            </Device>
          </Body>
        </IngeniaDictionary>
        "#;
        Arc::new(Dictionary::parse(xml).unwrap())
    }

    #[test]
    fn connect_and_disconnect_servo() {
        let reads = Arc::new(AtomicUsize::new(0));
        let mut network = Network::new(LoopbackTransport { reads: Arc::clone(&reads) });
        let servo = network.connect_servo(v2_dictionary());
        assert_eq!(network.servos().len(), 1);

        servo.read("DRV_BUS_VOLT", 1).unwrap();
        assert_eq!(reads.load(Ordering::SeqCst), 1);

        network.disconnect_servo(&servo);
        assert!(network.servos().is_empty());
    }

    #[test]
    fn two_servos_share_one_transport_lock() {
        let reads = Arc::new(AtomicUsize::new(0));
        let mut network = Network::new(LoopbackTransport { reads: Arc::clone(&reads) });
        let dict = v2_dictionary();
        let a = network.connect_servo(Arc::clone(&dict));
        let b = network.connect_servo(dict);

        a.read("DRV_BUS_VOLT", 1).unwrap();
        b.read("DRV_BUS_VOLT", 1).unwrap();
        assert_eq!(reads.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn start_pdo_rejects_servo_from_another_network() {
        let reads = Arc::new(AtomicUsize::new(0));
        let network_a = Network::new(LoopbackTransport { reads: Arc::clone(&reads) });
        let mut network_b = Network::new(LoopbackTransport { reads });
        let foreign = network_b.connect_servo(v2_dictionary());
        network_b.disconnect_servo(&foreign);

        let result = network_a.start_pdo(
            &foreign,
            1,
            Vec::new(),
            Vec::new(),
            Vec::new(),
            Vec::new(),
            PdoEngineConfig::default(),
            false,
            Box::new(|_| {}),
        );
        assert!(result.is_err());
    }
}

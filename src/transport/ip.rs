//! MCB over IP (UDP or TCP). One MCB frame per datagram/request; a single
//! socket per servo, serialized by the servo's own lock.

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream, UdpSocket};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::mcb::{self, Cmd};
use crate::register::{Address, Register};
use crate::transport::Transport;

/// Maximum buffer size for a single IP receive call.
pub const DEFAULT_RECV_BUFFER: usize = 1024;

enum Socket {
    Udp { socket: UdpSocket, peer: SocketAddr },
    Tcp(TcpStream),
}

/// MCB-over-IP transport (one per servo).
pub struct IpTransport {
    socket: Socket,
    timeout: Duration,
}

impl IpTransport {
    pub fn udp(local: SocketAddr, peer: SocketAddr, timeout: Duration) -> Result<Self> {
        let socket = UdpSocket::bind(local)?;
        socket.set_read_timeout(Some(timeout))?;
        socket.set_write_timeout(Some(timeout))?;
        Ok(Self { socket: Socket::Udp { socket, peer }, timeout })
    }

    pub fn tcp(peer: SocketAddr, timeout: Duration) -> Result<Self> {
        let stream = TcpStream::connect_timeout(&peer, timeout)?;
        stream.set_read_timeout(Some(timeout))?;
        stream.set_write_timeout(Some(timeout))?;
        Ok(Self { socket: Socket::Tcp(stream), timeout })
    }

    fn exchange(&mut self, frame: &[u8]) -> Result<Vec<u8>> {
        match &mut self.socket {
            Socket::Udp { socket, peer } => {
                socket.send_to(frame, *peer)?;
                let mut buf = vec![0u8; DEFAULT_RECV_BUFFER];
                let (n, _from) = socket.recv_from(&mut buf)?;
                buf.truncate(n);
                Ok(buf)
            }
            Socket::Tcp(stream) => {
                stream.write_all(frame)?;
                let mut buf = vec![0u8; DEFAULT_RECV_BUFFER];
                let n = stream.read(&mut buf)?;
                if n == 0 {
                    return Err(Error::Io { message: "peer closed connection".into(), uid: None });
                }
                buf.truncate(n);
                Ok(buf)
            }
        }
    }

    fn ip_address(register: &Register) -> Result<u16> {
        match register.address {
            Address::IpFlat(a) => Ok(a),
            Address::CanOpen { .. } => {
                Err(Error::Creation(format!("register {} has no flat IP address", register.identifier)))
            }
        }
    }
}

impl Transport for IpTransport {
    fn read_raw(&mut self, register: &Register) -> Result<Vec<u8>> {
        let address = Self::ip_address(register)?;
        let frame = mcb::build_mcb(Cmd::Read, register.subnode, address, None);
        let reply = self.exchange(&frame)?;
        mcb::read_mcb_data(address, &reply)
    }

    fn write_raw(&mut self, register: &Register, data: &[u8]) -> Result<()> {
        let address = Self::ip_address(register)?;
        let frame = mcb::build_mcb(Cmd::Write, register.subnode, address, Some(data));
        let reply = self.exchange(&frame)?;
        mcb::read_mcb_data(address, &reply)?;
        let _ = self.timeout;
        Ok(())
    }
}

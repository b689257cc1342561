//! Three-timestamp clock-synchronization handshake over UDP.
//!
//! Wire layout, 25 bytes big-endian: `(kind: u8, t1: i64, t2: i64, t3: i64)`.
//! The client fills `t1` at send time; the server fills `t2` at receive and
//! `t3` at response emission; the client observes `t4` at RESP arrival. Offset
//! and RTT follow the standard NTP-style two-way exchange formulas.

use std::io;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::{Buf, BufMut, BytesMut};
use tracing::{info, warn};

use crate::clock;

pub const CLOCK_SYNC_DEFAULT_PORT: u16 = 4434;
pub const CLOCK_SYNC_PACKET_SIZE: usize = 25;
pub const DEFAULT_ROUNDS: u32 = 5;
pub const ROUND_TIMEOUT_MS: u64 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SyncKind {
    SyncReq = 1,
    SyncResp = 2,
    /// Reserved — the current protocol completes at RESP, no client ACK.
    SyncAck = 3,
}

impl SyncKind {
    fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(SyncKind::SyncReq),
            2 => Some(SyncKind::SyncResp),
            3 => Some(SyncKind::SyncAck),
            _ => None,
        }
    }
}

/// A parsed clock-sync wire packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncPacket {
    pub kind: SyncKind,
    pub t1: i64,
    pub t2: i64,
    pub t3: i64,
}

impl SyncPacket {
    pub fn pack(&self) -> [u8; CLOCK_SYNC_PACKET_SIZE] {
        let mut buf = BytesMut::with_capacity(CLOCK_SYNC_PACKET_SIZE);
        buf.put_u8(self.kind as u8);
        buf.put_i64(self.t1);
        buf.put_i64(self.t2);
        buf.put_i64(self.t3);
        let mut out = [0u8; CLOCK_SYNC_PACKET_SIZE];
        out.copy_from_slice(&buf);
        out
    }

    pub fn unpack(buf: &[u8]) -> Option<Self> {
        if buf.len() < CLOCK_SYNC_PACKET_SIZE {
            return None;
        }
        let mut cursor = &buf[..CLOCK_SYNC_PACKET_SIZE];
        let kind = SyncKind::from_byte(cursor.get_u8())?;
        let t1 = cursor.get_i64();
        let t2 = cursor.get_i64();
        let t3 = cursor.get_i64();
        Some(SyncPacket { kind, t1, t2, t3 })
    }
}

/// Result of a completed client sync.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SyncResult {
    pub offset_ms: i64,
    pub rtt_ms: i64,
    pub accuracy_ms: i64,
    pub samples: u32,
}

struct RoundSample {
    offset_ms: i64,
    rtt_ms: i64,
}

/// Runs `rounds` request/response exchanges against `server_addr` and returns
/// the median-offset result, or `None` if fewer than one round succeeded.
/// Does not itself write the process-wide offset register — call
/// [`clock::set_global_clock_offset_ms`] with the result if desired.
pub fn run_client_sync(
    socket: &UdpSocket,
    server_addr: impl ToSocketAddrs,
    rounds: u32,
) -> io::Result<Option<SyncResult>> {
    let server_addr = server_addr
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "no address resolved"))?;

    socket.set_read_timeout(Some(Duration::from_millis(ROUND_TIMEOUT_MS)))?;

    let mut samples = Vec::with_capacity(rounds as usize);
    for _ in 0..rounds {
        if let Some(sample) = run_one_round(socket, server_addr)? {
            samples.push(sample);
        }
    }

    if samples.is_empty() {
        warn!(%server_addr, rounds, "clock sync completed with no successful rounds");
        return Ok(None);
    }

    samples.sort_by_key(|s| s.offset_ms);
    let median_offset = samples[samples.len() / 2].offset_ms;
    samples.sort_by_key(|s| s.rtt_ms);
    let median_rtt = samples[samples.len() / 2].rtt_ms;

    info!(
        %server_addr,
        offset_ms = median_offset,
        rtt_ms = median_rtt,
        samples = samples.len(),
        "clock sync round completed"
    );

    Ok(Some(SyncResult {
        offset_ms: median_offset,
        rtt_ms: median_rtt,
        accuracy_ms: median_rtt / 2,
        samples: samples.len() as u32,
    }))
}

fn run_one_round(socket: &UdpSocket, server_addr: SocketAddr) -> io::Result<Option<RoundSample>> {
    let t1 = clock::now_ms();
    let req = SyncPacket {
        kind: SyncKind::SyncReq,
        t1,
        t2: 0,
        t3: 0,
    };
    socket.send_to(&req.pack(), server_addr)?;

    let mut buf = [0u8; CLOCK_SYNC_PACKET_SIZE];
    let recv = socket.recv_from(&mut buf);
    let t4 = clock::now_ms();

    let (n, _from) = match recv {
        Ok(v) => v,
        Err(e)
            if matches!(
                e.kind(),
                io::ErrorKind::WouldBlock
                    | io::ErrorKind::TimedOut
                    | io::ErrorKind::ConnectionRefused
            ) =>
        {
            return Ok(None); // SyncRoundTimeout — round abandoned (or ICMP unreachable)
        }
        Err(e) => return Err(e),
    };

    let Some(resp) = SyncPacket::unpack(&buf[..n]) else {
        return Ok(None);
    };
    if resp.kind != SyncKind::SyncResp || resp.t1 != t1 {
        return Ok(None); // echoed t1 mismatch — discard
    }

    let offset_ms = ((resp.t2 - resp.t1) + (resp.t3 - t4)) / 2;
    let rtt_ms = (t4 - resp.t1) - (resp.t3 - resp.t2);
    Ok(Some(RoundSample { offset_ms, rtt_ms }))
}

/// Minimal clock-sync server: answers every `SYNC_REQ` with a `SYNC_RESP`
/// carrying the three timestamps. Runs on the calling thread; `stop()` is
/// cooperative and observed on the next receive-timeout poll.
pub struct ClockSyncServer {
    socket: UdpSocket,
    running: Arc<AtomicBool>,
    requests_handled: Arc<AtomicU64>,
}

impl ClockSyncServer {
    pub fn bind(addr: impl ToSocketAddrs) -> io::Result<Self> {
        let socket = UdpSocket::bind(addr)?;
        socket.set_read_timeout(Some(Duration::from_millis(100)))?;
        Ok(ClockSyncServer {
            socket,
            running: Arc::new(AtomicBool::new(true)),
            requests_handled: Arc::new(AtomicU64::new(0)),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn requests_handled(&self) -> u64 {
        self.requests_handled.load(Ordering::Relaxed)
    }

    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        self.running.clone()
    }

    /// Serve until `stop()` is called (via the shared handle) or an I/O error
    /// occurs. Intended to run on a dedicated thread.
    pub fn serve(&self) -> io::Result<()> {
        let mut buf = [0u8; CLOCK_SYNC_PACKET_SIZE];
        while self.running.load(Ordering::Relaxed) {
            match self.socket.recv_from(&mut buf) {
                Ok((n, from)) => {
                    let t2 = clock::now_ms();
                    let Some(req) = SyncPacket::unpack(&buf[..n]) else {
                        continue;
                    };
                    if req.kind != SyncKind::SyncReq {
                        continue;
                    }
                    let t3 = clock::now_ms();
                    let resp = SyncPacket {
                        kind: SyncKind::SyncResp,
                        t1: req.t1,
                        t2,
                        t3,
                    };
                    let _ = self.socket.send_to(&resp.pack(), from);
                    self.requests_handled.fetch_add(1, Ordering::Relaxed);
                }
                Err(e)
                    if e.kind() == io::ErrorKind::WouldBlock
                        || e.kind() == io::ErrorKind::TimedOut =>
                {
                    continue;
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

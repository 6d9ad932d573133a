//! Streaming receive path: UDP socket -> [`PacketMerger`] -> [`decode_data`] -> callback.
//!
//! The loop never touches the control channel. Bad datagrams and frames are logged and
//! dropped; only stopping the receiver ends the loop.

use crate::data::Data;
use crate::datagram::PacketMerger;
use crate::frame::decode_data;
use crate::settings::{CommSettings, Features};
use parking_lot::RwLock;
use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Upper bound on how long `stop()` waits for the loop to notice the running flag.
pub const RECV_TIMEOUT: Duration = Duration::from_millis(100);

const RECV_BUFFER_LEN: usize = 65536;

/// Datagram-to-frame pipeline without any I/O.
#[derive(Debug, Default)]
pub struct FrameAssembler {
    merger: PacketMerger,
    frames: u64,
    dropped: u64,
}

impl FrameAssembler {
    pub fn new() -> Self {
        FrameAssembler::default()
    }

    /// Feed one datagram; returns a decoded frame when this datagram completed one.
    pub fn push_datagram(&mut self, datagram: &[u8], features: &Features) -> Option<Data> {
        let payload = match self.merger.add_datagram(datagram) {
            Ok(Some(payload)) => payload,
            Ok(None) => return None,
            Err(e) => {
                self.dropped += 1;
                log::debug!("dropping datagram: {}", e);
                return None;
            }
        };
        match decode_data(&payload, features) {
            Ok(data) => {
                self.frames += 1;
                Some(data)
            }
            Err(e) => {
                self.dropped += 1;
                log::warn!("dropping frame: {}", e);
                None
            }
        }
    }

    pub fn frames_decoded(&self) -> u64 {
        self.frames
    }

    /// Datagrams and frames that failed to parse.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Incomplete frames superseded by newer ones.
    pub fn discarded_frames(&self) -> u64 {
        self.merger.discarded_frames()
    }
}

/// Handle to the background receive thread.
pub struct ScanReceiver {
    local_addr: SocketAddr,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl ScanReceiver {
    /// Bind `addr` and start delivering frames to `on_frame` on a dedicated thread.
    ///
    /// The feature set is re-read from `settings` for every datagram, so a settings change
    /// applies from the next frame on.
    pub fn spawn<F>(addr: SocketAddr, settings: Arc<RwLock<CommSettings>>, on_frame: F) -> io::Result<Self>
    where
        F: FnMut(Data) + Send + 'static,
    {
        let socket = UdpSocket::bind(addr)?;
        socket.set_read_timeout(Some(RECV_TIMEOUT))?;
        let local_addr = socket.local_addr()?;
        let running = Arc::new(AtomicBool::new(true));
        let flag = running.clone();
        let handle = thread::Builder::new()
            .name("microscan3-udp".to_string())
            .spawn(move || receive_loop(socket, settings, flag, on_frame))?;
        log::info!("scan receiver listening on {}", local_addr);
        Ok(ScanReceiver {
            local_addr,
            running,
            handle: Some(handle),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Stop the loop and wait for the thread; returns within about one receive timeout.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("scan receiver thread panicked");
            }
            log::info!("scan receiver on {} stopped", self.local_addr);
        }
    }
}

impl Drop for ScanReceiver {
    fn drop(&mut self) {
        self.stop();
    }
}

fn receive_loop<F>(socket: UdpSocket, settings: Arc<RwLock<CommSettings>>, running: Arc<AtomicBool>, mut on_frame: F)
where
    F: FnMut(Data),
{
    let mut buf = vec![0u8; RECV_BUFFER_LEN];
    let mut assembler = FrameAssembler::new();
    while running.load(Ordering::Relaxed) {
        let n = match socket.recv(&mut buf) {
            Ok(n) => n,
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => continue,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                log::error!("scan receiver socket error: {}", e);
                thread::sleep(RECV_TIMEOUT);
                continue;
            }
        };
        let features = settings.read().features;
        if let Some(data) = assembler.push_datagram(&buf[..n], &features) {
            on_frame(data);
        }
    }
    log::debug!(
        "receive loop exiting: {} frames decoded, {} dropped, {} incomplete discarded",
        assembler.frames_decoded(),
        assembler.dropped(),
        assembler.discarded_frames()
    );
}

//! UDP datagram header and multi-datagram frame reassembly.
//!
//! Every datagram starts with a 24-byte header naming the frame it belongs to
//! (`identification`), the frame's total payload length and the fragment's offset in it.
//! [`PacketMerger`] collects fragments of the newest frame only: when a datagram of a newer
//! frame arrives, an unfinished older frame is discarded rather than waited for.

use crate::codec::{ByteReader, ByteWriter};
use crate::error::{DecodeError, InSection, Section};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

/// "MS3 "
pub const DATAGRAM_MARKER: u32 = 0x4D53_3320;
/// "MD"
pub const DATAGRAM_PROTOCOL: u16 = 0x4D44;
pub const DATAGRAM_HEADER_LEN: usize = 24;
pub const MAX_FRAME_LEN: usize = 1024 * 1024;
/// Fragment payload size used when splitting frames for sending.
pub const DEFAULT_FRAGMENT_LEN: usize = 1460 - DATAGRAM_HEADER_LEN;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DatagramHeader {
    pub major_version: u8,
    pub minor_version: u8,
    pub total_length: u32,
    pub identification: u32,
    pub fragment_offset: u32,
}

impl DatagramHeader {
    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        let mut w = ByteWriter::new(buf);
        w.write_u32(DATAGRAM_MARKER);
        w.write_u16(DATAGRAM_PROTOCOL);
        w.write_u8(self.major_version);
        w.write_u8(self.minor_version);
        w.write_u32(self.total_length);
        w.write_u32(self.identification);
        w.write_u32(self.fragment_offset);
        w.write_zeros(4);
    }
}

/// Split a datagram into its header and fragment bytes.
pub fn parse_datagram(bytes: &[u8]) -> Result<(DatagramHeader, &[u8]), DecodeError> {
    const S: Section = Section::Datagram;
    let mut r = ByteReader::new(bytes);
    let marker = r.read_u32().in_section(S)?;
    if marker != DATAGRAM_MARKER {
        return Err(DecodeError::invalid(S, format!("bad datagram marker {:#010x}", marker)));
    }
    let protocol = r.read_u16().in_section(S)?;
    if protocol != DATAGRAM_PROTOCOL {
        return Err(DecodeError::invalid(S, format!("unknown protocol {:#06x}", protocol)));
    }
    let major_version = r.read_u8().in_section(S)?;
    let minor_version = r.read_u8().in_section(S)?;
    let total_length = r.read_u32().in_section(S)?;
    let identification = r.read_u32().in_section(S)?;
    let fragment_offset = r.read_u32().in_section(S)?;
    r.skip(4).in_section(S)?;
    let header = DatagramHeader {
        major_version,
        minor_version,
        total_length,
        identification,
        fragment_offset,
    };
    Ok((header, &bytes[DATAGRAM_HEADER_LEN..]))
}

/// Split a frame payload into datagrams of at most `max_fragment` payload bytes each.
pub fn fragment(identification: u32, payload: &[u8], max_fragment: usize) -> Vec<Vec<u8>> {
    let max_fragment = max_fragment.max(1);
    let chunks: Vec<&[u8]> = if payload.is_empty() {
        vec![payload]
    } else {
        payload.chunks(max_fragment).collect()
    };
    let mut offset = 0usize;
    chunks
        .into_iter()
        .map(|chunk| {
            let header = DatagramHeader {
                major_version: 1,
                minor_version: 0,
                total_length: payload.len() as u32,
                identification,
                fragment_offset: offset as u32,
            };
            offset += chunk.len();
            let mut out = Vec::with_capacity(DATAGRAM_HEADER_LEN + chunk.len());
            header.encode_into(&mut out);
            out.extend_from_slice(chunk);
            out
        })
        .collect()
}

/// How far back (in frame ids) a datagram still counts as a late arrival. Anything further
/// behind is taken as a restarted sequence.
const REORDER_WINDOW: u32 = 64;

/// Distinct late frame ids in a row after which the sender is taken to have restarted its
/// sequence. Stragglers come from one or two frames; a restart yields a steady run.
const RESTART_LATE_IDS: u32 = 3;

/// A gap in the stream this long forgets the frame history.
pub const RESTART_IDLE: Duration = Duration::from_secs(1);

/// `id` lies shortly before `reference` in wrapping order.
fn is_stale(id: u32, reference: u32) -> bool {
    let back = reference.wrapping_sub(id);
    back != 0 && back <= REORDER_WINDOW
}

#[derive(Debug)]
struct PartialFrame {
    identification: u32,
    total_length: usize,
    received: usize,
    fragments: BTreeMap<usize, Vec<u8>>,
}

/// Reassembles frames from datagrams, favouring the newest frame.
#[derive(Debug, Default)]
pub struct PacketMerger {
    current: Option<PartialFrame>,
    last_completed: Option<u32>,
    last_activity: Option<Instant>,
    late_run: u32,
    last_late: Option<u32>,
    discarded: u64,
}

impl PacketMerger {
    pub fn new() -> Self {
        PacketMerger::default()
    }

    /// Number of incomplete frames dropped in favour of newer ones.
    pub fn discarded_frames(&self) -> u64 {
        self.discarded
    }

    /// Identification of the frame currently being assembled.
    pub fn pending(&self) -> Option<u32> {
        self.current.as_ref().map(|f| f.identification)
    }

    /// Feed one datagram received now. See [`add_datagram_at`](Self::add_datagram_at).
    pub fn add_datagram(&mut self, bytes: &[u8]) -> Result<Option<Vec<u8>>, DecodeError> {
        self.add_datagram_at(bytes, Instant::now())
    }

    /// Feed one datagram received at `now`. Returns the frame payload once all of its bytes
    /// have arrived.
    ///
    /// Datagrams of frames at most 64 ids behind the newest one are late and ignored, unless
    /// several distinct such ids arrive in a row or the stream was idle for
    /// [`RESTART_IDLE`]: then the sender restarted and the history is dropped.
    ///
    /// Errors describe a datagram (or, on a gap at completion, a frame) that was dropped;
    /// the merger stays usable.
    pub fn add_datagram_at(
        &mut self,
        bytes: &[u8],
        now: Instant,
    ) -> Result<Option<Vec<u8>>, DecodeError> {
        const S: Section = Section::Datagram;
        let (header, fragment) = parse_datagram(bytes)?;
        let id = header.identification;
        let total_length = header.total_length as usize;
        if total_length > MAX_FRAME_LEN {
            return Err(DecodeError::invalid(
                S,
                format!("frame {} announces {} bytes, above the {} byte limit", id, total_length, MAX_FRAME_LEN),
            ));
        }

        if let Some(last) = self.last_activity {
            let idle = now.saturating_duration_since(last);
            if idle >= RESTART_IDLE && (self.current.is_some() || self.last_completed.is_some()) {
                log::debug!("stream idle for {:?}, forgetting frame history", idle);
                self.forget_history();
            }
        }
        self.last_activity = Some(now);

        if self.is_late(id) {
            if self.last_late != Some(id) {
                self.late_run += 1;
                self.last_late = Some(id);
            }
            if self.late_run < RESTART_LATE_IDS {
                log::trace!("ignoring late datagram for frame {}", id);
                return Ok(None);
            }
            log::info!("frame ids restarted at {}", id);
            self.forget_history();
        } else {
            self.late_run = 0;
            self.last_late = None;
        }

        let pending = self
            .current
            .as_ref()
            .map(|f| (f.identification, f.received, f.total_length));
        match pending {
            Some((cur, _, _)) if cur == id => {}
            Some((cur, received, total)) => {
                log::debug!(
                    "discarding incomplete frame {} ({}/{} bytes) for frame {}",
                    cur,
                    received,
                    total,
                    id
                );
                self.discarded += 1;
                self.start_frame(id, total_length);
            }
            None => self.start_frame(id, total_length),
        }

        let frame = match self.current.as_mut() {
            Some(frame) => frame,
            None => return Ok(None),
        };
        if frame.total_length != total_length {
            return Err(DecodeError::invalid(
                S,
                format!(
                    "frame {} total length changed from {} to {}",
                    id, frame.total_length, total_length
                ),
            ));
        }
        let offset = header.fragment_offset as usize;
        if offset + fragment.len() > total_length {
            return Err(DecodeError::invalid(
                S,
                format!(
                    "fragment {}..{} overruns frame {} of {} bytes",
                    offset,
                    offset + fragment.len(),
                    id,
                    total_length
                ),
            ));
        }
        if frame.fragments.contains_key(&offset) {
            log::trace!("duplicate fragment at offset {} of frame {}", offset, id);
            return Ok(None);
        }
        frame.received += fragment.len();
        frame.fragments.insert(offset, fragment.to_vec());

        if frame.received < frame.total_length {
            return Ok(None);
        }

        let frame = match self.current.take() {
            Some(frame) => frame,
            None => return Ok(None),
        };
        self.last_completed = Some(id);
        let mut payload = Vec::with_capacity(frame.total_length);
        for (offset, bytes) in frame.fragments {
            if offset != payload.len() {
                return Err(DecodeError::invalid(
                    S,
                    format!("frame {} has overlapping or missing bytes at offset {}", id, payload.len()),
                ));
            }
            payload.extend_from_slice(&bytes);
        }
        if payload.len() != frame.total_length {
            return Err(DecodeError::invalid(
                S,
                format!("frame {} assembled {} of {} bytes", id, payload.len(), frame.total_length),
            ));
        }
        Ok(Some(payload))
    }

    /// Already completed, or shortly behind the frame being assembled.
    fn is_late(&self, id: u32) -> bool {
        let behind_completed = self
            .last_completed
            .map_or(false, |done| id == done || is_stale(id, done));
        let behind_current = self
            .current
            .as_ref()
            .map_or(false, |f| f.identification != id && is_stale(id, f.identification));
        behind_completed || behind_current
    }

    fn forget_history(&mut self) {
        if self.current.take().is_some() {
            self.discarded += 1;
        }
        self.last_completed = None;
        self.late_run = 0;
        self.last_late = None;
    }

    fn start_frame(&mut self, identification: u32, total_length: usize) {
        self.current = Some(PartialFrame {
            identification,
            total_length,
            received: 0,
            fragments: BTreeMap::new(),
        });
    }
}

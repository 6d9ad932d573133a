use microscan3::dump::{dump_data, frame_summary_line};
use microscan3::{Features, FrameAssembler};
use pcap_parser::pcapng::Block as PcapNgBlock;
use pcap_parser::traits::{PcapNGPacketBlock, PcapReaderIterator};
use pcap_parser::{Linktype, PcapBlockOwned, PcapError};
use std::fs::File;
use std::io::{Read, Write};
use std::path::PathBuf;

const USAGE: &str = "usage: decode_pcap [-v] [--dump[=FILE]] [--port=N] [--features=MASK] <capture.pcap|pcapng>";

struct Options {
    verbose: bool,
    port: Option<u16>,
    features: Features,
}

#[derive(Default)]
struct Stats {
    packets: u64,
    udp_payloads: u64,
    frames: u64,
    invalid_sections: u64,
}

struct Replay {
    options: Options,
    assembler: FrameAssembler,
    dump: Option<Box<dyn Write>>,
    stats: Stats,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let mut raw_args: Vec<String> = std::env::args().skip(1).collect();
    let verbose = if let Some(pos) = raw_args.iter().position(|a| a == "--verbose" || a == "-v") {
        raw_args.remove(pos);
        true
    } else {
        false
    };
    let dump_path: Option<PathBuf> = raw_args
        .iter()
        .position(|a| a.starts_with("--dump"))
        .and_then(|pos| {
            let arg = raw_args.remove(pos);
            if arg == "--dump" {
                Some(PathBuf::from("-"))
            } else {
                arg.strip_prefix("--dump=").map(PathBuf::from)
            }
        });
    let port: Option<u16> = match raw_args.iter().position(|a| a.starts_with("--port=")) {
        Some(pos) => {
            let arg = raw_args.remove(pos);
            Some(arg["--port=".len()..].parse::<u16>().map_err(|e| anyhow::anyhow!("bad --port: {}", e))?)
        }
        None => None,
    };
    let features = match raw_args.iter().position(|a| a.starts_with("--features=")) {
        Some(pos) => {
            let arg = raw_args.remove(pos);
            let s = &arg["--features=".len()..];
            let mask = match s.strip_prefix("0x") {
                Some(hex) => u16::from_str_radix(hex, 16),
                None => s.parse(),
            }
            .map_err(|e| anyhow::anyhow!("bad --features: {}", e))?;
            Features::from_mask(mask)
        }
        None => Features::all(),
    };
    let pcap_path: PathBuf = raw_args
        .into_iter()
        .next()
        .map(PathBuf::from)
        .ok_or_else(|| anyhow::anyhow!(USAGE))?;

    let dump: Option<Box<dyn Write>> = match dump_path {
        Some(p) if p.as_os_str() == "-" => Some(Box::new(std::io::stdout())),
        Some(p) => Some(Box::new(
            File::create(&p).map_err(|e| anyhow::anyhow!("create {}: {}", p.display(), e))?,
        )),
        None => None,
    };

    let mut replay = Replay {
        options: Options {
            verbose,
            port,
            features,
        },
        assembler: FrameAssembler::new(),
        dump,
        stats: Stats::default(),
    };

    // pcap vs pcapng, by the magic at the start of the file.
    let mut probe = [0u8; 4];
    {
        let mut f = File::open(&pcap_path)?;
        f.read_exact(&mut probe)?;
    }
    let file = File::open(&pcap_path)?;
    if probe == [0x0a, 0x0d, 0x0d, 0x0a] {
        run_pcapng(file, &mut replay)?;
    } else {
        run_legacy_pcap(file, &mut replay)?;
    }

    let s = &replay.stats;
    eprintln!("capture: {}", pcap_path.display());
    eprintln!("packets: {}", s.packets);
    eprintln!("scan datagrams: {}", s.udp_payloads);
    eprintln!("frames decoded: {}", s.frames);
    eprintln!("invalid sections: {}", s.invalid_sections);
    eprintln!("dropped datagrams/frames: {}", replay.assembler.dropped());
    eprintln!("incomplete frames discarded: {}", replay.assembler.discarded_frames());
    Ok(())
}

impl Replay {
    fn packet(&mut self, linktype: Linktype, frame: &[u8]) -> anyhow::Result<()> {
        self.stats.packets += 1;
        let (dst_port, payload) = match udp_payload_from_linktype(linktype, frame) {
            Some(p) => p,
            None => return Ok(()),
        };
        if self.options.port.map_or(false, |p| p != dst_port) {
            return Ok(());
        }
        self.stats.udp_payloads += 1;
        let data = match self.assembler.push_datagram(payload, &self.options.features) {
            Some(data) => data,
            None => return Ok(()),
        };
        self.stats.frames += 1;
        self.stats.invalid_sections += data.invalid_sections.len() as u64;
        if self.options.verbose {
            eprintln!("packet {}: {}", self.stats.packets, frame_summary_line(&data));
        }
        if let Some(w) = self.dump.as_mut() {
            writeln!(w, "=== packet {} {}", self.stats.packets, frame_summary_line(&data))?;
            write!(w, "{}", dump_data(&data))?;
        }
        Ok(())
    }
}

fn run_legacy_pcap<R: Read>(file: R, replay: &mut Replay) -> anyhow::Result<()> {
    let mut reader = pcap_parser::pcap::LegacyPcapReader::new(1 << 20, file)?;
    let mut linktype: Option<Linktype> = None;
    loop {
        match reader.next() {
            Ok((offset, block)) => {
                match block {
                    PcapBlockOwned::LegacyHeader(h) => linktype = Some(h.network),
                    PcapBlockOwned::Legacy(b) => {
                        replay.packet(linktype.unwrap_or(Linktype(1)), b.data)?;
                    }
                    PcapBlockOwned::NG(_) => {}
                }
                reader.consume(offset);
            }
            Err(PcapError::Eof) => break,
            Err(PcapError::Incomplete(_)) => {
                reader
                    .refill()
                    .map_err(|e| anyhow::anyhow!("pcap refill error: {:?}", e))?;
            }
            Err(e) => return Err(anyhow::anyhow!("pcap read error: {:?}", e)),
        }
    }
    Ok(())
}

fn run_pcapng<R: Read>(file: R, replay: &mut Replay) -> anyhow::Result<()> {
    let mut reader = pcap_parser::pcapng::PcapNGReader::new(1 << 20, file)?;
    let mut if_linktypes: Vec<Linktype> = Vec::new();
    loop {
        match reader.next() {
            Ok((offset, block)) => {
                if let PcapBlockOwned::NG(b) = block {
                    match &b {
                        PcapNgBlock::InterfaceDescription(idb) => if_linktypes.push(idb.linktype),
                        PcapNgBlock::EnhancedPacket(epb) => {
                            let lt = if_linktypes.get(epb.if_id as usize).copied().unwrap_or(Linktype(1));
                            replay.packet(lt, epb.packet_data())?;
                        }
                        PcapNgBlock::SimplePacket(spb) => {
                            let lt = if_linktypes.first().copied().unwrap_or(Linktype(1));
                            replay.packet(lt, spb.packet_data())?;
                        }
                        _ => {}
                    }
                }
                reader.consume(offset);
            }
            Err(PcapError::Eof) => break,
            Err(PcapError::Incomplete(_)) => {
                reader
                    .refill()
                    .map_err(|e| anyhow::anyhow!("pcapng refill error: {:?}", e))?;
            }
            Err(e) => return Err(anyhow::anyhow!("pcapng read error: {:?}", e)),
        }
    }
    Ok(())
}

/// Destination port and UDP payload of a captured frame, bounded by the IPv4/UDP length
/// fields so Ethernet padding is not included.
fn udp_payload_from_linktype(linktype: Linktype, frame: &[u8]) -> Option<(u16, &[u8])> {
    let l3 = match linktype.0 {
        1 => ethernet_l3(frame)?,    // DLT_EN10MB
        101 => frame,                // DLT_RAW
        113 => linux_sll_l3(frame)?, // DLT_LINUX_SLL
        _ => return None,
    };
    ipv4_udp_payload(l3)
}

fn ethernet_l3(frame: &[u8]) -> Option<&[u8]> {
    if frame.len() < 14 {
        return None;
    }
    let mut off = 12usize;
    let mut ethertype = u16::from_be_bytes([frame[off], frame[off + 1]]);
    off += 2;
    while ethertype == 0x8100 || ethertype == 0x88a8 {
        if frame.len() < off + 4 + 2 {
            return None;
        }
        off += 4;
        ethertype = u16::from_be_bytes([frame[off], frame[off + 1]]);
        off += 2;
    }
    match ethertype {
        0x0800 => Some(&frame[off..]),
        _ => None,
    }
}

fn linux_sll_l3(frame: &[u8]) -> Option<&[u8]> {
    if frame.len() < 16 {
        return None;
    }
    let proto = u16::from_be_bytes([frame[14], frame[15]]);
    match proto {
        0x0800 => Some(&frame[16..]),
        _ => None,
    }
}

fn ipv4_udp_payload(l3: &[u8]) -> Option<(u16, &[u8])> {
    if l3.len() < 20 || l3[0] >> 4 != 4 {
        return None;
    }
    let ihl = (l3[0] & 0x0f) as usize * 4;
    if ihl < 20 || l3.len() < ihl {
        return None;
    }
    let total_len = u16::from_be_bytes([l3[2], l3[3]]) as usize;
    if total_len < ihl {
        return None;
    }
    let l3 = if total_len <= l3.len() { &l3[..total_len] } else { l3 };
    if l3.len() < ihl + 8 || l3[9] != 17 {
        return None;
    }
    let udp = &l3[ihl..];
    let dst_port = u16::from_be_bytes([udp[2], udp[3]]);
    let udp_len = u16::from_be_bytes([udp[4], udp[5]]) as usize;
    if udp_len < 8 || udp.len() < udp_len {
        return None;
    }
    Some((dst_port, &udp[8..udp_len]))
}

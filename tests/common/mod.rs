//! Shared test fixtures: a fake COLA2 sensor on loopback TCP and sample scan frames.

#![allow(dead_code)]

use microscan3::data::*;
use microscan3::telegram::{Telegram, TelegramBuffer};
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

pub const SESSION_ID: u32 = 0x5EC0_0001;
pub const TYPE_CODE: &str = "MICS3-ABAZ55IZ1P01";

/// What the fake sensor sends back for one request.
pub enum Reply {
    Answer(Vec<u8>),
    Error(u16),
    Silent,
    /// Raw telegrams, e.g. a stale answer followed by the real one.
    Telegrams(Vec<Telegram>),
    Bytes(Vec<u8>),
}

pub type Handler = dyn Fn(&Telegram) -> Reply + Send + Sync;

pub fn string_payload(s: &str) -> Vec<u8> {
    let mut buf = Vec::new();
    microscan3::ByteWriter::new(&mut buf).write_string(s);
    buf
}

/// Answers login, logout, type code and device name; everything else gets an empty answer.
pub fn default_reply(req: &Telegram) -> Reply {
    match req.name.as_str() {
        "Session" if req.command_type == microscan3::telegram::CommandType::OpenSession => {
            Reply::Answer(SESSION_ID.to_be_bytes().to_vec())
        }
        "TypeCode" => Reply::Answer(string_payload(TYPE_CODE)),
        "DeviceName" => Reply::Answer(string_payload("microScan3 Core")),
        "SerialNumber" => Reply::Answer(string_payload("21470001")),
        "FirmwareVersion" => Reply::Answer(vec![b'V', 1, 3, 0]),
        _ => Reply::Answer(Vec::new()),
    }
}

pub struct FakeSensor {
    addr: SocketAddr,
    running: Arc<AtomicBool>,
    requests: Arc<Mutex<Vec<Telegram>>>,
    overlapped: Arc<AtomicBool>,
    accept: Option<JoinHandle<()>>,
}

impl FakeSensor {
    pub fn start<H>(handler: H) -> Self
    where
        H: Fn(&Telegram) -> Reply + Send + Sync + 'static,
    {
        Self::with_delay(handler, Duration::ZERO)
    }

    /// Every reply is held back by `delay`; a request arriving meanwhile marks an overlap.
    pub fn with_delay<H>(handler: H, delay: Duration) -> Self
    where
        H: Fn(&Telegram) -> Reply + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind fake sensor");
        listener.set_nonblocking(true).expect("nonblocking listener");
        let addr = listener.local_addr().expect("local addr");
        let running = Arc::new(AtomicBool::new(true));
        let requests = Arc::new(Mutex::new(Vec::new()));
        let overlapped = Arc::new(AtomicBool::new(false));
        let handler: Arc<Handler> = Arc::new(handler);

        let accept = {
            let running = running.clone();
            let requests = requests.clone();
            let overlapped = overlapped.clone();
            thread::spawn(move || {
                while running.load(Ordering::Relaxed) {
                    match listener.accept() {
                        Ok((stream, _)) => {
                            let conn = Connection {
                                handler: handler.clone(),
                                running: running.clone(),
                                requests: requests.clone(),
                                overlapped: overlapped.clone(),
                                delay,
                            };
                            thread::spawn(move || conn.serve(stream));
                        }
                        Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                            thread::sleep(Duration::from_millis(5));
                        }
                        Err(_) => break,
                    }
                }
            })
        };

        FakeSensor {
            addr,
            running,
            requests,
            overlapped,
            accept: Some(accept),
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn requests(&self) -> Vec<Telegram> {
        self.requests.lock().expect("requests lock").clone()
    }

    pub fn request_names(&self) -> Vec<String> {
        self.requests().into_iter().map(|t| t.name).collect()
    }

    /// A request arrived while a previous one was still unanswered.
    pub fn saw_overlap(&self) -> bool {
        self.overlapped.load(Ordering::SeqCst)
    }
}

impl Drop for FakeSensor {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        if let Some(handle) = self.accept.take() {
            let _ = handle.join();
        }
    }
}

struct Connection {
    handler: Arc<Handler>,
    running: Arc<AtomicBool>,
    requests: Arc<Mutex<Vec<Telegram>>>,
    overlapped: Arc<AtomicBool>,
    delay: Duration,
}

impl Connection {
    fn serve(self, mut stream: TcpStream) {
        stream.set_nonblocking(false).expect("blocking stream");
        stream
            .set_read_timeout(Some(Duration::from_millis(20)))
            .expect("read timeout");
        let mut rx = TelegramBuffer::new();
        let mut chunk = [0u8; 4096];
        while self.running.load(Ordering::Relaxed) {
            match stream.read(&mut chunk) {
                Ok(0) => return,
                Ok(n) => rx.push(&chunk[..n]),
                Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => continue,
                Err(_) => return,
            }
            while let Ok(Some(request)) = rx.next_telegram() {
                self.requests.lock().expect("requests lock").push(request.clone());
                let reply = (self.handler)(&request);
                if !self.delay.is_zero() {
                    thread::sleep(self.delay);
                    if rx.buffered() > 0 || pending_input(&stream) {
                        self.overlapped.store(true, Ordering::SeqCst);
                    }
                }
                let bytes = match reply {
                    Reply::Answer(payload) => Telegram::answer_to(&request, payload)
                        .encode()
                        .expect("encode answer"),
                    Reply::Error(code) => Telegram::error_for(&request, code).encode().expect("encode error"),
                    Reply::Silent => continue,
                    Reply::Telegrams(telegrams) => telegrams
                        .iter()
                        .flat_map(|t| t.encode().expect("encode telegram"))
                        .collect(),
                    Reply::Bytes(bytes) => bytes,
                };
                if stream.write_all(&bytes).is_err() {
                    return;
                }
            }
        }
    }
}

fn pending_input(stream: &TcpStream) -> bool {
    if stream.set_nonblocking(true).is_err() {
        return false;
    }
    let mut probe = [0u8; 1];
    let pending = matches!(stream.peek(&mut probe), Ok(n) if n > 0);
    let _ = stream.set_nonblocking(false);
    pending
}

/// A frame with every section present and internally consistent, so that decoding its
/// encoding yields it back unchanged.
pub fn sample_data(scan_number: u32, beams: usize) -> Data {
    let derived = DerivedValues {
        multiplication_factor: 2,
        number_of_beams: beams as u16,
        scan_time: 40,
        start_angle: -47.5,
        angular_beam_resolution: 0.5,
        interbeam_period: 37,
    };
    let scan_points = (0..beams)
        .map(|i| ScanPoint {
            distance: 1000 + i as u16,
            reflectivity: (i % 256) as u8,
            angle: derived.start_angle + i as f32 * derived.angular_beam_resolution,
            valid: i % 2 == 0,
            infinite: i % 7 == 0,
            glare: false,
            reflector: i % 5 == 0,
            contamination_warning: false,
            contamination: false,
        })
        .collect();
    let alternating = |n: usize| (0..n).map(|i| i % 3 == 0).collect::<Vec<bool>>();
    let velocity = LinearVelocity {
        velocity_0: 120,
        velocity_1: -80,
        velocity_0_valid: true,
        velocity_1_valid: true,
        velocity_0_transmitted_safely: true,
        velocity_1_transmitted_safely: false,
    };
    Data {
        header: DataHeader {
            version_indicator: b'V',
            version_major: 1,
            version_minor: 0,
            version_release: 2,
            serial_number_of_device: 21470001,
            serial_number_of_system_plug: 21470002,
            channel_number: 0,
            sequence_number: scan_number * 2,
            scan_number,
            timestamp_date: 18000,
            timestamp_time: 45_296_789,
        },
        general_system_state: Some(GeneralSystemState {
            run_mode_active: true,
            standby_mode_active: false,
            contamination_warning: true,
            contamination_error: false,
            reference_contour_status: false,
            manipulation_status: false,
            safe_cut_off_path: alternating(SAFE_CUT_OFF_PATHS),
            non_safe_cut_off_path: vec![false; SAFE_CUT_OFF_PATHS],
            reset_required_cut_off_path: vec![true; SAFE_CUT_OFF_PATHS],
            current_monitoring_case_no: [1, 2, 3, 4],
            application_error: false,
            device_error: true,
        }),
        derived_values: Some(derived),
        measurement_data: Some(MeasurementData { scan_points }),
        intrusion_data: Some(IntrusionData {
            data: vec![
                IntrusionDatum {
                    size: 2,
                    flags: alternating(16),
                },
                IntrusionDatum {
                    size: 1,
                    flags: vec![true; 8],
                },
            ],
        }),
        application_data: Some(ApplicationData {
            inputs: ApplicationInputs {
                unsafe_inputs_input_sources: alternating(UNSAFE_INPUTS),
                unsafe_inputs_flags: vec![true; UNSAFE_INPUTS],
                monitoring_case_numbers: (0..MONITORING_CASES as u16).collect(),
                monitoring_case_flags: alternating(MONITORING_CASES),
                linear_velocity: velocity,
                sleep_mode_input: 3,
            },
            outputs: ApplicationOutputs {
                eval_out: alternating(EVALUATION_PATHS),
                eval_out_is_safe: vec![true; EVALUATION_PATHS],
                eval_out_is_valid: vec![false; EVALUATION_PATHS],
                monitoring_case_numbers: (100..100 + MONITORING_CASES as u16).collect(),
                monitoring_case_flags: vec![true; MONITORING_CASES],
                sleep_mode_output: 1,
                sleep_mode_output_valid: true,
                host_error_flags_valid: true,
                host_error_flags: HostErrorFlags {
                    glare: true,
                    ..HostErrorFlags::default()
                },
                linear_velocity: velocity,
                resulting_velocities: (0..RESULTING_VELOCITIES as i16).map(|v| v * 10 - 50).collect(),
                resulting_velocity_flags: alternating(RESULTING_VELOCITIES),
            },
        }),
        invalid_sections: Vec::new(),
    }
}

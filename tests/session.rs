//! Control session against a fake sensor on loopback.

mod common;

use common::{default_reply, FakeSensor, Reply, SESSION_ID, TYPE_CODE};
use microscan3::command::{MeasurementMethod, ReadFieldGeometry, ReadString, ReadTypeCode, WriteCommSettings};
use microscan3::settings::{CommSettings, FieldData};
use microscan3::telegram::{CommandType, Telegram};
use microscan3::{Cola2Session, Error, SessionConfig, SessionState};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

fn config(timeout_ms: u64) -> SessionConfig {
    SessionConfig {
        timeout: Duration::from_millis(timeout_ms),
        ..SessionConfig::default()
    }
}

fn connected(sensor: &FakeSensor, timeout_ms: u64) -> Cola2Session {
    let session = Cola2Session::new(config(timeout_ms));
    session.connect(sensor.addr()).expect("connect");
    assert_eq!(session.state(), SessionState::Connected);
    session
}

fn field_for(index: u8) -> FieldData {
    FieldData {
        is_valid: true,
        field_type: index,
        multiplication_factor: 1,
        start_angle: -47.5,
        angular_resolution: 0.5,
        beam_distances: vec![index as u16 * 10; 4],
    }
}

#[test]
fn type_code_works_before_login() {
    let sensor = FakeSensor::start(default_reply);
    let session = connected(&sensor, 1000);
    let tc = session.execute(&ReadTypeCode).expect("type code");
    assert_eq!(tc.type_code, TYPE_CODE);
    assert_eq!(session.session_id(), None);
    let reqs = sensor.requests();
    assert_eq!(reqs.len(), 1);
    assert_eq!(reqs[0].session_id, 0);
}

#[test]
fn session_command_before_login_is_not_sent() {
    let sensor = FakeSensor::start(default_reply);
    let session = connected(&sensor, 1000);
    assert!(matches!(
        session.execute(&ReadString::device_name()),
        Err(Error::NoSession)
    ));
    thread::sleep(Duration::from_millis(50));
    assert!(sensor.requests().is_empty());
}

#[test]
fn login_then_commands_carry_session_id() {
    let sensor = FakeSensor::start(default_reply);
    let session = connected(&sensor, 1000);
    assert_eq!(session.login().expect("login"), SESSION_ID);
    assert_eq!(session.state(), SessionState::LoggedIn);
    assert_eq!(
        session.execute(&ReadString::device_name()).expect("device name"),
        "microScan3 Core"
    );
    session.execute(&MeasurementMethod::Start).expect("start measurement");
    session
        .execute(&WriteCommSettings {
            settings: CommSettings::default(),
        })
        .expect("write settings");

    let reqs = sensor.requests();
    assert_eq!(reqs[0].command_type, CommandType::OpenSession);
    assert_eq!(reqs[0].payload, vec![5, 0, 0, 0, 0]);
    assert!(reqs[1..].iter().all(|t| t.session_id == SESSION_ID));
    assert_eq!(reqs[3].name, "CommunicationSettings");
    assert_eq!(reqs[3].payload.len(), 32);
    let ids: Vec<u16> = reqs.iter().map(|t| t.request_id).collect();
    assert!(ids.windows(2).all(|w| w[1] == w[0].wrapping_add(1)));
}

#[test]
fn concurrent_commands_are_serialized() {
    let sensor = FakeSensor::with_delay(
        |req: &Telegram| match req.name.strip_prefix("FieldGeometry[") {
            Some(rest) => {
                let index: u8 = rest.trim_end_matches(']').parse().expect("index");
                let mut payload = Vec::new();
                field_for(index).encode_into(&mut payload).expect("encode field");
                Reply::Answer(payload)
            }
            None => default_reply(req),
        },
        Duration::from_millis(15),
    );
    let session = Arc::new(connected(&sensor, 2000));
    session.login().expect("login");

    let handles: Vec<_> = (0..8u8)
        .map(|index| {
            let session = session.clone();
            thread::spawn(move || {
                let field = session.execute(&ReadFieldGeometry { index }).expect("field");
                assert_eq!(field, field_for(index));
            })
        })
        .collect();
    for h in handles {
        h.join().expect("worker");
    }

    assert!(!sensor.saw_overlap());
    let reqs = sensor.requests();
    assert_eq!(reqs.len(), 9);
    let ids: Vec<u16> = reqs.iter().map(|t| t.request_id).collect();
    assert!(ids.windows(2).all(|w| w[1] > w[0]));
}

#[test]
fn three_timeouts_force_relogin() {
    let sensor = FakeSensor::start(|req: &Telegram| {
        if req.name.starts_with("FieldGeometry") {
            Reply::Silent
        } else {
            default_reply(req)
        }
    });
    let session = connected(&sensor, 100);
    session.login().expect("login");

    for i in 0..3 {
        assert_eq!(session.state(), SessionState::LoggedIn, "before timeout {}", i);
        let err = session.execute(&ReadFieldGeometry { index: 1 }).expect_err("timeout");
        assert!(err.is_timeout());
    }
    assert_eq!(session.state(), SessionState::Connected);
    assert_eq!(session.session_id(), None);
    assert!(matches!(
        session.execute(&ReadString::device_name()),
        Err(Error::NoSession)
    ));

    session.login().expect("re-login");
    assert_eq!(
        session.execute(&ReadString::device_name()).expect("device name"),
        "microScan3 Core"
    );
}

#[test]
fn successful_reply_resets_timeout_count() {
    let sensor = FakeSensor::start(|req: &Telegram| {
        if req.name.starts_with("FieldGeometry") {
            Reply::Silent
        } else {
            default_reply(req)
        }
    });
    let session = connected(&sensor, 100);
    session.login().expect("login");
    for _ in 0..2 {
        assert!(session.execute(&ReadFieldGeometry { index: 0 }).is_err());
    }
    session.execute(&ReadString::device_name()).expect("device name");
    for _ in 0..2 {
        assert!(session.execute(&ReadFieldGeometry { index: 0 }).is_err());
    }
    assert_eq!(session.state(), SessionState::LoggedIn);
}

#[test]
fn rejected_login_stays_connected() {
    let sensor = FakeSensor::start(|req: &Telegram| match req.command_type {
        CommandType::OpenSession => Reply::Error(0x0007),
        _ => default_reply(req),
    });
    let session = connected(&sensor, 500);
    assert!(matches!(session.login(), Err(Error::LoginFailed(_))));
    assert_eq!(session.state(), SessionState::Connected);
    session.execute(&ReadTypeCode).expect("session-less command still works");
}

#[test]
fn login_timeout_is_login_failed() {
    let sensor = FakeSensor::start(|req: &Telegram| match req.command_type {
        CommandType::OpenSession => Reply::Silent,
        _ => default_reply(req),
    });
    let session = connected(&sensor, 100);
    assert!(matches!(session.login(), Err(Error::LoginFailed(_))));
    assert_eq!(session.state(), SessionState::Connected);
}

#[test]
fn error_reply_maps_to_sensor_rejected() {
    let sensor = FakeSensor::start(|req: &Telegram| {
        if req.name == "ProjectName" {
            Reply::Error(0x0A01)
        } else {
            default_reply(req)
        }
    });
    let session = connected(&sensor, 500);
    session.login().expect("login");
    assert!(matches!(
        session.execute(&ReadString::project_name()),
        Err(Error::SensorRejected { code: 0x0A01 })
    ));
    assert_eq!(session.state(), SessionState::LoggedIn);
}

#[test]
fn corrupt_reply_is_malformed() {
    let sensor = FakeSensor::start(|req: &Telegram| {
        if req.name == "DeviceName" {
            let mut bytes = Telegram::answer_to(req, common::string_payload("x"))
                .encode()
                .expect("encode");
            let last = bytes.len() - 1;
            bytes[last] ^= 0x01;
            Reply::Bytes(bytes)
        } else {
            default_reply(req)
        }
    });
    let session = connected(&sensor, 500);
    session.login().expect("login");
    assert!(matches!(
        session.execute(&ReadString::device_name()),
        Err(Error::MalformedReply(_))
    ));
    assert_eq!(session.state(), SessionState::LoggedIn);
}

#[test]
fn mismatched_reply_name_is_malformed() {
    let sensor = FakeSensor::start(|req: &Telegram| {
        if req.name == "SerialNumber" {
            let mut wrong = Telegram::answer_to(req, common::string_payload("1"));
            wrong.name = "DeviceName".to_string();
            Reply::Telegrams(vec![wrong])
        } else {
            default_reply(req)
        }
    });
    let session = connected(&sensor, 500);
    session.login().expect("login");
    assert!(matches!(
        session.execute(&ReadString::serial_number()),
        Err(Error::MalformedReply(_))
    ));
}

#[test]
fn stale_replies_are_skipped() {
    let sensor = FakeSensor::start(|req: &Telegram| {
        if req.name == "DeviceName" {
            let mut stale = Telegram::answer_to(req, common::string_payload("old"));
            stale.request_id = req.request_id.wrapping_sub(1);
            let fresh = Telegram::answer_to(req, common::string_payload("new"));
            Reply::Telegrams(vec![stale, fresh])
        } else {
            default_reply(req)
        }
    });
    let session = connected(&sensor, 500);
    session.login().expect("login");
    assert_eq!(session.execute(&ReadString::device_name()).expect("name"), "new");
}

#[test]
fn logout_releases_session() {
    let sensor = FakeSensor::start(default_reply);
    let session = connected(&sensor, 500);
    session.login().expect("login");
    session.logout().expect("logout");
    assert_eq!(session.state(), SessionState::Disconnected);
    assert_eq!(session.session_id(), None);
    assert!(matches!(session.execute(&ReadTypeCode), Err(Error::NotConnected)));
    assert!(sensor
        .requests()
        .iter()
        .any(|t| t.command_type == CommandType::CloseSession));
}

#[test]
fn close_unblocks_pending_command() {
    let sensor = FakeSensor::start(|req: &Telegram| {
        if req.name.starts_with("FieldGeometry") {
            Reply::Silent
        } else {
            default_reply(req)
        }
    });
    let session = Arc::new(connected(&sensor, 10_000));
    session.login().expect("login");

    let waiter = {
        let session = session.clone();
        thread::spawn(move || {
            let started = Instant::now();
            let result = session.execute(&ReadFieldGeometry { index: 2 });
            (result.map(|_| ()), started.elapsed())
        })
    };
    thread::sleep(Duration::from_millis(100));
    session.close();
    let (result, elapsed) = waiter.join().expect("waiter");
    assert!(matches!(result, Err(Error::Connection(_))));
    assert!(elapsed < Duration::from_secs(5));
    assert_eq!(session.state(), SessionState::Disconnected);
}

#[test]
fn status_queries_do_not_wait_for_pending_reply() {
    let sensor = FakeSensor::start(|req: &Telegram| {
        if req.name.starts_with("FieldGeometry") {
            Reply::Silent
        } else {
            default_reply(req)
        }
    });
    let session = Arc::new(connected(&sensor, 2000));
    session.login().expect("login");

    let waiter = {
        let session = session.clone();
        thread::spawn(move || session.execute(&ReadFieldGeometry { index: 5 }).map(|_| ()))
    };
    thread::sleep(Duration::from_millis(100));
    let started = Instant::now();
    assert_eq!(session.state(), SessionState::LoggedIn);
    assert_eq!(session.session_id(), Some(SESSION_ID));
    assert!(started.elapsed() < Duration::from_millis(500));

    let result = waiter.join().expect("waiter");
    assert!(matches!(result, Err(Error::CommandTimeout(_))));
    assert_eq!(session.state(), SessionState::LoggedIn);
}

#[test]
fn connect_failure_stays_disconnected() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);
    let session = Cola2Session::new(config(200));
    assert!(matches!(session.connect(addr), Err(Error::Connection(_))));
    assert_eq!(session.state(), SessionState::Disconnected);
}

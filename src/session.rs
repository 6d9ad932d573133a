//! COLA2 control session over TCP.
//!
//! ```text
//! Disconnected --connect--> Connected --login--> LoggedIn --logout--> LoggedOut --> Disconnected
//!                               ^                    |
//!                               +-- N timeouts ------+
//! ```
//!
//! One request may be outstanding at a time: every round trip runs under the session
//! mutex, so concurrent callers queue up instead of interleaving on the wire. `close()`
//! shuts the socket down through a handle kept outside that mutex, which releases a caller
//! blocked waiting for a reply. State and session id are mirrored outside it as well, so
//! status queries never wait for a round trip.

use crate::codec::ByteReader;
use crate::command::{CloseSession, Command, OpenSession};
use crate::error::{Error, Result};
use crate::telegram::{CommandMode, CommandType, Telegram, TelegramBuffer};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::Arc;
use std::time::{Duration, Instant};

const READ_CHUNK: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Disconnected,
    Connected,
    LoggedIn,
    LoggedOut,
}

/// Timing and identity parameters of the control session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Reply timeout per command, also used for connecting.
    #[serde(rename = "timeout_ms", with = "duration_ms")]
    pub timeout: Duration,
    /// Consecutive command timeouts after which the session id is dropped.
    pub max_consecutive_timeouts: u32,
    /// Inactivity timeout requested from the sensor at login, in seconds.
    pub session_timeout_secs: u8,
    pub client_id: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            timeout: Duration::from_millis(5000),
            max_consecutive_timeouts: 3,
            session_timeout_secs: 5,
            client_id: 0,
        }
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

#[derive(Debug, Clone, Copy)]
struct Status {
    state: SessionState,
    session_id: Option<u32>,
}

struct Inner {
    stream: Option<TcpStream>,
    state: SessionState,
    session_id: Option<u32>,
    next_request_id: u16,
    consecutive_timeouts: u32,
    rx: TelegramBuffer,
    /// Copy of `state` and `session_id` readable without the session mutex.
    status: Arc<RwLock<Status>>,
}

impl Inner {
    fn set_state(&mut self, state: SessionState) {
        if self.state != state {
            log::debug!("session state {:?} -> {:?}", self.state, state);
            self.state = state;
            self.status.write().state = state;
        }
    }

    fn set_session_id(&mut self, session_id: Option<u32>) {
        self.session_id = session_id;
        self.status.write().session_id = session_id;
    }

    fn drop_connection(&mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown(Shutdown::Both);
        }
        self.set_session_id(None);
        self.consecutive_timeouts = 0;
        self.rx.clear();
        self.set_state(SessionState::Disconnected);
    }
}

pub struct Cola2Session {
    config: SessionConfig,
    inner: Mutex<Inner>,
    status: Arc<RwLock<Status>>,
    /// Clone of the control socket used to interrupt a blocked reply wait.
    shutdown: Mutex<Option<TcpStream>>,
}

impl Cola2Session {
    pub fn new(config: SessionConfig) -> Self {
        let status = Arc::new(RwLock::new(Status {
            state: SessionState::Disconnected,
            session_id: None,
        }));
        Cola2Session {
            config,
            inner: Mutex::new(Inner {
                stream: None,
                state: SessionState::Disconnected,
                session_id: None,
                next_request_id: 1,
                consecutive_timeouts: 0,
                rx: TelegramBuffer::new(),
                status: status.clone(),
            }),
            status,
            shutdown: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Current state; does not wait for a command in flight.
    pub fn state(&self) -> SessionState {
        self.status.read().state
    }

    pub fn session_id(&self) -> Option<u32> {
        self.status.read().session_id
    }

    /// Open the control connection. An existing connection is closed first.
    pub fn connect(&self, addr: SocketAddr) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.stream.is_some() {
            inner.drop_connection();
        }
        let stream = TcpStream::connect_timeout(&addr, self.config.timeout).map_err(Error::Connection)?;
        stream.set_nodelay(true).map_err(Error::Connection)?;
        let handle = stream.try_clone().map_err(Error::Connection)?;
        *self.shutdown.lock() = Some(handle);
        inner.stream = Some(stream);
        inner.set_session_id(None);
        inner.consecutive_timeouts = 0;
        inner.rx.clear();
        inner.set_state(SessionState::Connected);
        log::info!("connected to sensor at {}", addr);
        Ok(())
    }

    /// Obtain a session id. Logging in again while logged in replaces the id.
    ///
    /// A timeout or rejection leaves the session `Connected` and reports `LoginFailed`;
    /// a broken connection is reported as such.
    pub fn login(&self) -> Result<u32> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        match inner.state {
            SessionState::Connected | SessionState::LoggedIn => {}
            SessionState::Disconnected | SessionState::LoggedOut => return Err(Error::NotConnected),
        }
        let cmd = OpenSession {
            timeout_secs: self.config.session_timeout_secs,
            client_id: self.config.client_id,
        };
        inner.set_session_id(None);
        match self.round_trip(inner, &cmd, 0) {
            Ok(id) => {
                inner.set_session_id(Some(id));
                inner.consecutive_timeouts = 0;
                inner.set_state(SessionState::LoggedIn);
                log::info!("logged in, session id {:#010x}", id);
                Ok(id)
            }
            Err(e @ Error::Connection(_)) => {
                inner.drop_connection();
                *self.shutdown.lock() = None;
                Err(e)
            }
            Err(e) => {
                inner.set_state(SessionState::Connected);
                log::warn!("login failed: {}", e);
                Err(Error::LoginFailed(e.to_string()))
            }
        }
    }

    /// Send `cmd` and wait for its reply.
    pub fn execute<C: Command>(&self, cmd: &C) -> Result<C::Output> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        let session_id = match inner.state {
            SessionState::Disconnected | SessionState::LoggedOut => return Err(Error::NotConnected),
            SessionState::Connected if !cmd.can_execute_without_session() => return Err(Error::NoSession),
            SessionState::Connected => 0,
            SessionState::LoggedIn => inner.session_id.unwrap_or(0),
        };
        let result = self.round_trip(inner, cmd, session_id);
        match &result {
            Err(Error::CommandTimeout(_)) => {
                inner.consecutive_timeouts += 1;
                log::warn!(
                    "{} timed out ({} consecutive)",
                    cmd.name(),
                    inner.consecutive_timeouts
                );
                if inner.state == SessionState::LoggedIn
                    && inner.consecutive_timeouts >= self.config.max_consecutive_timeouts
                {
                    log::warn!(
                        "dropping session {:?} after {} consecutive timeouts",
                        inner.session_id,
                        inner.consecutive_timeouts
                    );
                    inner.set_session_id(None);
                    inner.consecutive_timeouts = 0;
                    inner.set_state(SessionState::Connected);
                }
            }
            Err(Error::Connection(_)) => {
                inner.drop_connection();
                *self.shutdown.lock() = None;
            }
            _ => inner.consecutive_timeouts = 0,
        }
        result
    }

    /// Best-effort logout followed by closing the connection.
    pub fn logout(&self) -> Result<()> {
        {
            let mut guard = self.inner.lock();
            let inner = &mut *guard;
            if inner.state == SessionState::LoggedIn {
                let session_id = inner.session_id.unwrap_or(0);
                if let Err(e) = self.round_trip(inner, &CloseSession, session_id) {
                    log::warn!("logout reply failed: {}", e);
                }
                log::info!("logged out of session {:#010x}", session_id);
                inner.set_session_id(None);
                inner.set_state(SessionState::LoggedOut);
            }
        }
        self.close();
        Ok(())
    }

    /// Drop the connection without logging out. Unblocks a pending reply wait.
    pub fn close(&self) {
        if let Some(handle) = self.shutdown.lock().take() {
            let _ = handle.shutdown(Shutdown::Both);
        }
        let mut inner = self.inner.lock();
        if inner.stream.is_some() || inner.state != SessionState::Disconnected {
            inner.drop_connection();
        }
    }

    fn round_trip<C: Command>(&self, inner: &mut Inner, cmd: &C, session_id: u32) -> Result<C::Output> {
        let request_id = inner.next_request_id;
        inner.next_request_id = inner.next_request_id.wrapping_add(1);
        let request = cmd.to_telegram(session_id, request_id)?;
        let bytes = request.encode()?;
        let stream = inner.stream.as_mut().ok_or(Error::NotConnected)?;
        log::trace!("-> {} #{} ({} bytes)", request.name, request_id, bytes.len());
        stream.write_all(&bytes).map_err(Error::Connection)?;

        let reply = wait_reply(stream, &mut inner.rx, &request, self.config.timeout)?;
        if reply.command_type == CommandType::Error {
            let mut r = ByteReader::new(&reply.payload);
            let code = r
                .read_u16()
                .map_err(|e| Error::MalformedReply(format!("error reply: {}", e)))?;
            return Err(Error::SensorRejected { code });
        }
        if reply.command_type != request.command_type || reply.name != request.name {
            return Err(Error::MalformedReply(format!(
                "reply {:?} {:?} does not match request {:?} {:?}",
                reply.command_type, reply.name, request.command_type, request.name
            )));
        }
        cmd.process_reply(&reply.payload)
    }
}

impl Drop for Cola2Session {
    fn drop(&mut self) {
        self.close();
    }
}

/// Read until the answer to `request` arrives or `timeout` elapses. Answers carrying
/// another request id are leftovers of timed-out commands and are skipped.
fn wait_reply(
    stream: &mut TcpStream,
    rx: &mut TelegramBuffer,
    request: &Telegram,
    timeout: Duration,
) -> Result<Telegram> {
    let deadline = Instant::now() + timeout;
    let mut chunk = [0u8; READ_CHUNK];
    loop {
        while let Some(reply) = rx.next_telegram().map_err(|e| Error::MalformedReply(e.to_string()))? {
            if reply.request_id == request.request_id && reply.command_mode == CommandMode::Answer {
                log::trace!("<- {} #{}", reply.name, reply.request_id);
                return Ok(reply);
            }
            log::warn!(
                "discarding stale reply {} #{} while waiting for #{}",
                reply.name,
                reply.request_id,
                request.request_id
            );
        }

        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(Error::CommandTimeout(timeout));
        }
        stream.set_read_timeout(Some(remaining)).map_err(Error::Connection)?;
        match stream.read(&mut chunk) {
            Ok(0) => {
                return Err(Error::Connection(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "sensor closed the control connection",
                )))
            }
            Ok(n) => rx.push(&chunk[..n]),
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {}
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(Error::Connection(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands_need_a_connection() {
        let session = Cola2Session::new(SessionConfig::default());
        assert_eq!(session.state(), SessionState::Disconnected);
        assert!(matches!(
            session.execute(&crate::command::ReadTypeCode),
            Err(Error::NotConnected)
        ));
        assert!(matches!(session.login(), Err(Error::NotConnected)));
        assert!(session.logout().is_ok());
    }

    #[test]
    fn session_config_from_toml() {
        let config: SessionConfig = toml::from_str("timeout_ms = 250\nclient_id = 7").expect("toml");
        assert_eq!(config.timeout, Duration::from_millis(250));
        assert_eq!(config.client_id, 7);
        assert_eq!(config.max_consecutive_timeouts, 3);
    }
}

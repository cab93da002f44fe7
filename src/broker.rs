//! The broker/chat server (§4.7): accepts up to `max_clients` connections on
//! one `Poll` and fans bytes or lines out to every other connected client.

use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::time::{Duration, Instant};

use relaycat::net::{TcpListener, TcpStream};
use relaycat::{Events, Interest, Poll, Token};

use crate::config::Config;
use crate::error::{RelayError, RelayResult};

const LISTENER_TOKEN: Token = Token(usize::MAX);
const READ_BUFFER_SIZE: usize = 4096;
const MAX_LINES_PER_TICK: usize = 16;
const CHAT_MAX_NICKNAME_LEN: usize = 32;
const CHAT_MAX_MESSAGE_LEN: usize = 1024;

/// Broker relays whole reads verbatim; chat parses line-delimited messages
/// against a nickname registry (§4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Broker,
    Chat,
}

struct Client {
    socket: TcpStream,
    read_buf: Box<[u8; READ_BUFFER_SIZE]>,
    read_len: usize,
    last_activity: Instant,
    nickname: Option<String>,
    bytes_sent: u64,
    bytes_received: u64,
}

impl Client {
    fn new(socket: TcpStream) -> Self {
        Client {
            socket,
            read_buf: Box::new([0u8; READ_BUFFER_SIZE]),
            read_len: 0,
            last_activity: Instant::now(),
            nickname: None,
            bytes_sent: 0,
            bytes_received: 0,
        }
    }
}

pub struct BrokerServer {
    mode: Mode,
    listener: TcpListener,
    clients: HashMap<Token, Client>,
    nickname_index: HashMap<String, Token>,
    next_token: usize,
    max_clients: usize,
    idle_timeout: Option<Duration>,
}

impl BrokerServer {
    pub fn new(mode: Mode, listener: TcpListener, cfg: &Config) -> Self {
        BrokerServer {
            mode,
            listener,
            clients: HashMap::new(),
            nickname_index: HashMap::new(),
            next_token: 0,
            max_clients: cfg.max_clients,
            idle_timeout: (cfg.idle_timeout > 0).then(|| Duration::from_millis(cfg.idle_timeout)),
        }
    }

    /// Drives the server until a fatal error occurs; normal shutdown is by
    /// signal/process exit, not a return from this loop.
    pub fn run(&mut self) -> RelayResult<()> {
        let mut poll = Poll::new().map_err(RelayError::from_io)?;
        let mut events = Events::with_capacity(128);

        poll.registry()
            .register(&mut self.listener, LISTENER_TOKEN, Interest::READABLE)
            .map_err(RelayError::from_io)?;

        loop {
            let poll_timeout = self.idle_timeout.map(|_| Duration::from_secs(1));
            poll.poll(&mut events, poll_timeout).map_err(RelayError::from_io)?;

            let mut readable_tokens = Vec::new();
            for event in events.iter() {
                if event.token() == LISTENER_TOKEN {
                    self.accept_pending(&mut poll)?;
                } else if event.is_readable() || event.is_read_closed() || event.is_error() {
                    readable_tokens.push(event.token());
                }
            }

            let mut to_disconnect = Vec::new();
            for token in readable_tokens {
                if let Err(err) = self.service_client(token) {
                    log::debug!("client {token:?} disconnected: {err}");
                    to_disconnect.push(token);
                }
            }

            if let Some(idle_timeout) = self.idle_timeout {
                let now = Instant::now();
                for (&token, client) in self.clients.iter() {
                    if now.duration_since(client.last_activity) >= idle_timeout {
                        to_disconnect.push(token);
                    }
                }
            }

            to_disconnect.sort_unstable();
            to_disconnect.dedup();
            for token in to_disconnect {
                self.disconnect(&mut poll, token);
            }
        }
    }

    fn accept_pending(&mut self, poll: &mut Poll) -> RelayResult<()> {
        loop {
            match self.listener.accept() {
                Ok((mut socket, _addr)) => {
                    if self.clients.len() >= self.max_clients {
                        let _ = socket.write_all(b"ERROR: server full\n");
                        continue;
                    }
                    let token = Token(self.next_token);
                    self.next_token += 1;
                    if let Err(err) = poll.registry().register(&mut socket, token, Interest::READABLE) {
                        log::warn!("failed to register accepted client: {err}");
                        continue;
                    }
                    self.clients.insert(token, Client::new(socket));
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(err) => return Err(RelayError::from_io(err)),
            }
        }
    }

    fn disconnect(&mut self, poll: &mut Poll, token: Token) {
        if let Some(mut client) = self.clients.remove(&token) {
            let _ = poll.registry().deregister(&mut client.socket);
            if let Some(nick) = client.nickname.take() {
                self.nickname_index.remove(&nick);
                self.broadcast_except(token, format!("*** {nick} left the chat\n").as_bytes());
            }
        }
    }

    fn service_client(&mut self, token: Token) -> RelayResult<()> {
        self.fill_read_buffer(token)?;

        for _ in 0..MAX_LINES_PER_TICK {
            match self.mode {
                Mode::Broker => {
                    if !self.relay_whole_buffer(token) {
                        break;
                    }
                }
                Mode::Chat => {
                    if !self.process_one_line(token)? {
                        break;
                    }
                }
            }
        }
        Ok(())
    }

    /// Reads as much as is available into the client's buffer (§4.7 step 2).
    fn fill_read_buffer(&mut self, token: Token) -> RelayResult<()> {
        let client = self.clients.get_mut(&token).ok_or(RelayError::ConnectionClosed)?;
        loop {
            if client.read_len >= client.read_buf.len() {
                let _ = client.socket.write_all(b"ERROR: Line too long\n");
                return Err(RelayError::MessageTooLong);
            }
            match client.socket.read(&mut client.read_buf[client.read_len..]) {
                Ok(0) => return Err(RelayError::ConnectionClosed),
                Ok(n) => {
                    client.read_len += n;
                    client.bytes_received += n as u64;
                    client.last_activity = Instant::now();
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(err) if err.kind() == io::ErrorKind::ConnectionReset => {
                    return Err(RelayError::ConnectionResetByPeer)
                }
                Err(err) => return Err(RelayError::from_io(err)),
            }
        }
    }

    /// Broker mode: relays the whole buffer then clears it. Returns `false`
    /// once the buffer is empty (nothing left to process this tick).
    fn relay_whole_buffer(&mut self, token: Token) -> bool {
        let data = {
            let client = match self.clients.get_mut(&token) {
                Some(c) => c,
                None => return false,
            };
            if client.read_len == 0 {
                return false;
            }
            let data = client.read_buf[..client.read_len].to_vec();
            client.read_len = 0;
            data
        };
        self.broadcast_except(token, &data);
        false
    }

    /// Chat mode: extracts and processes at most one `\n`-terminated line.
    /// Returns `false` when no complete line is currently buffered.
    fn process_one_line(&mut self, token: Token) -> RelayResult<bool> {
        let line = {
            let client = self.clients.get_mut(&token).ok_or(RelayError::ConnectionClosed)?;
            let newline_pos = client.read_buf[..client.read_len].iter().position(|&b| b == b'\n');
            let Some(pos) = newline_pos else { return Ok(false) };

            let mut end = pos;
            if end > 0 && client.read_buf[end - 1] == b'\r' {
                end -= 1;
            }
            let line = String::from_utf8_lossy(&client.read_buf[..end]).into_owned();

            let remaining = client.read_len - (pos + 1);
            client.read_buf.copy_within(pos + 1..client.read_len, 0);
            client.read_len = remaining;
            line
        };

        match self.clients.get(&token).and_then(|c| c.nickname.clone()) {
            None => self.handle_nickname_line(token, line),
            Some(nick) => self.handle_chat_line(token, &nick, line),
        }
        Ok(true)
    }

    fn handle_nickname_line(&mut self, token: Token, line: String) {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            self.send_to(token, b"*** Please choose a nickname\n");
            return;
        }
        if trimmed.len() > CHAT_MAX_NICKNAME_LEN {
            self.send_to(token, b"*** Nickname too long\n");
            return;
        }
        if self.nickname_index.contains_key(trimmed) {
            self.send_to(token, b"*** Nickname already taken, please choose another\n");
            return;
        }

        let nick = trimmed.to_string();
        self.nickname_index.insert(nick.clone(), token);
        if let Some(client) = self.clients.get_mut(&token) {
            client.nickname = Some(nick.clone());
        }
        self.send_to(token, format!("*** You are now known as {nick}\n").as_bytes());
        self.broadcast_except(token, format!("*** {nick} joined the chat\n").as_bytes());
    }

    fn handle_chat_line(&mut self, token: Token, nick: &str, line: String) {
        if line.is_empty() {
            return;
        }
        if line.len() > CHAT_MAX_MESSAGE_LEN {
            self.send_to(token, b"*** Message too long\n");
            return;
        }
        self.broadcast_except(token, format!("[{nick}] {line}\n").as_bytes());
    }

    fn send_to(&mut self, token: Token, data: &[u8]) {
        if let Some(client) = self.clients.get_mut(&token) {
            if client.socket.write_all(data).is_ok() {
                client.bytes_sent += data.len() as u64;
            }
        }
    }

    /// Broadcasts `data` to every client but `except`. An individual failed
    /// write is logged; broadcasting continues (§4.7 "broker mode").
    fn broadcast_except(&mut self, except: Token, data: &[u8]) {
        for (&token, client) in self.clients.iter_mut() {
            if token == except {
                continue;
            }
            match client.socket.write_all(data) {
                Ok(()) => client.bytes_sent += data.len() as u64,
                Err(err) => log::debug!("relay to client {token:?} failed: {err}"),
            }
        }
    }
}

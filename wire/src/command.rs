//! Outbound control-port commands and their wire encoding.

use bytes::{BufMut, BytesMut};

/// How to authenticate with the control port.
#[derive(Clone)]
pub enum AuthMethod {
    Null,
    /// Hex-encoded on the wire. The plaintext password is never logged.
    HashedPassword(Vec<u8>),
    /// Hex-encoded cookie file content.
    Cookie(Vec<u8>),
}

/// A tor signal name, see `SIGNAL` in control-spec.txt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalKind {
    Dump,
    Debug,
    NewNym,
    ClearDnsCache,
    Heartbeat,
    Active,
    Dormant,
    Reload,
    Shutdown,
    Halt,
}

impl SignalKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Dump => "DUMP",
            Self::Debug => "DEBUG",
            Self::NewNym => "NEWNYM",
            Self::ClearDnsCache => "CLEARDNSCACHE",
            Self::Heartbeat => "HEARTBEAT",
            Self::Active => "ACTIVE",
            Self::Dormant => "DORMANT",
            Self::Reload => "RELOAD",
            Self::Shutdown => "SHUTDOWN",
            Self::Halt => "HALT",
        }
    }

    /// `SHUTDOWN`/`HALT` preempt the execute queue: see the command queue's interrupt stack.
    pub const fn is_preempting(self) -> bool {
        matches!(self, Self::Shutdown | Self::Halt)
    }
}

/// The key material argument of `ADD_ONION`.
#[derive(Clone)]
pub enum OnionKey {
    /// `NEW:<algorithm>`, asking tor to generate a fresh key.
    New { algorithm: &'static str },
    /// `<algorithm>:<base64 key>`, an already-generated key.
    Existing { algorithm: String, key_b64: String },
}

/// `ADD_ONION` flags, see control-spec.txt `ADD_ONION`.
#[derive(Debug, Clone, Copy, Default)]
pub struct OnionAddFlags {
    pub discard_pk: bool,
    pub detach: bool,
    pub basic_auth: bool,
    pub non_anonymous: bool,
    pub max_streams_close_circuit: bool,
}

impl OnionAddFlags {
    fn csv(self) -> Option<String> {
        let mut flags = Vec::new();
        if self.discard_pk {
            flags.push("DiscardPK");
        }
        if self.detach {
            flags.push("Detach");
        }
        if self.basic_auth {
            flags.push("BasicAuth");
        }
        if self.non_anonymous {
            flags.push("NonAnonymous");
        }
        if self.max_streams_close_circuit {
            flags.push("MaxStreamsCloseCircuit");
        }
        if flags.is_empty() {
            None
        } else {
            Some(flags.join(","))
        }
    }
}

/// Every request this crate knows how to put on the wire.
#[derive(Clone)]
pub enum Command {
    Authenticate(AuthMethod),
    ConfigGet(Vec<String>),
    ConfigLoad(String),
    ConfigReset(Vec<String>),
    ConfigSave,
    ConfigSet(Vec<(String, String)>),
    DropGuards,
    HsFetch {
        address: String,
        servers: Vec<String>,
    },
    AddOnion {
        key: OnionKey,
        flags: OnionAddFlags,
        max_streams: Option<u32>,
        ports: Vec<(u16, String)>,
        client_auth_v3: Vec<String>,
        /// If `key` is [`OnionKey::Existing`], zero it once the job that carries this
        /// command reaches a terminal state.
        destroy_key_on_job_completion: bool,
    },
    DelOnion(String),
    GetInfo(Vec<String>),
    MapAddress(Vec<(String, String)>),
    OnionClientAuthAdd {
        service_id: String,
        private_key_x25519_b64: String,
        nickname: Option<String>,
        permanent: bool,
        /// Zero `private_key_x25519_b64` once the job that carries this command
        /// reaches a terminal state.
        destroy_key_on_job_completion: bool,
    },
    OnionClientAuthRemove(String),
    OnionClientAuthView(Option<String>),
    TakeOwnership,
    DropOwnership,
    Resolve {
        hostname: String,
        reverse: bool,
    },
    SetEvents(Vec<String>),
    Signal(SignalKind),
}

impl Command {
    /// The bare keyword, used for job naming and logging.
    pub const fn keyword(&self) -> &'static str {
        match self {
            Self::Authenticate(_) => "AUTHENTICATE",
            Self::ConfigGet(_) => "GETCONF",
            Self::ConfigLoad(_) => "LOADCONF",
            Self::ConfigReset(_) => "RESETCONF",
            Self::ConfigSave => "SAVECONF",
            Self::ConfigSet(_) => "SETCONF",
            Self::DropGuards => "DROPGUARDS",
            Self::HsFetch { .. } => "HSFETCH",
            Self::AddOnion { .. } => "ADD_ONION",
            Self::DelOnion(_) => "DEL_ONION",
            Self::GetInfo(_) => "GETINFO",
            Self::MapAddress(_) => "MAPADDRESS",
            Self::OnionClientAuthAdd { .. } => "ONION_CLIENT_AUTH_ADD",
            Self::OnionClientAuthRemove(_) => "ONION_CLIENT_AUTH_REMOVE",
            Self::OnionClientAuthView(_) => "ONION_CLIENT_AUTH_VIEW",
            Self::TakeOwnership => "TAKEOWNERSHIP",
            Self::DropOwnership => "DROPOWNERSHIP",
            Self::Resolve { .. } => "RESOLVE",
            Self::SetEvents(_) => "SETEVENTS",
            Self::Signal(_) => "SIGNAL",
        }
    }

    /// Commands that only the connection that authenticated (or took ownership) may issue.
    pub const fn is_privileged(&self) -> bool {
        matches!(
            self,
            Self::Authenticate(_)
                | Self::TakeOwnership
                | Self::DropOwnership
                | Self::Signal(SignalKind::Shutdown)
                | Self::Signal(SignalKind::Halt)
        )
    }

    /// Render this command as the bytes to write to the transport.
    ///
    /// Any scratch space used for key material is not retained; callers that need to
    /// zero a buffer after writing should drop the returned `BytesMut` promptly (it
    /// does not implement `Drop`-zeroing itself — see the dispatcher, which owns the
    /// single point the encoded bytes are written from).
    pub fn encode(&self) -> BytesMut {
        let mut dst = BytesMut::new();
        match self {
            Self::Authenticate(method) => {
                dst.put_slice(b"AUTHENTICATE");
                match method {
                    AuthMethod::Null => {}
                    AuthMethod::HashedPassword(secret) | AuthMethod::Cookie(secret) => {
                        dst.put_u8(b' ');
                        dst.put_slice(hex::encode(secret).as_bytes());
                    }
                }
                terminate(&mut dst);
            }
            Self::ConfigGet(keys) => simple(&mut dst, "GETCONF", keys.iter().map(String::as_str)),
            Self::ConfigLoad(text) => multiline(&mut dst, "LOADCONF", text),
            Self::ConfigReset(keys) => {
                simple(&mut dst, "RESETCONF", keys.iter().map(String::as_str));
            }
            Self::ConfigSave => simple(&mut dst, "SAVECONF", std::iter::empty()),
            Self::ConfigSet(pairs) => {
                dst.put_slice(b"SETCONF");
                for (key, value) in pairs {
                    dst.put_u8(b' ');
                    dst.put_slice(key.as_bytes());
                    dst.put_u8(b'=');
                    dst.put_slice(quote(value).as_bytes());
                }
                terminate(&mut dst);
            }
            Self::DropGuards => simple(&mut dst, "DROPGUARDS", std::iter::empty()),
            Self::HsFetch { address, servers } => {
                dst.put_slice(b"HSFETCH ");
                dst.put_slice(address.as_bytes());
                for server in servers {
                    dst.put_slice(b" SERVER=");
                    dst.put_slice(server.as_bytes());
                }
                terminate(&mut dst);
            }
            Self::AddOnion {
                key,
                flags,
                max_streams,
                ports,
                client_auth_v3,
                destroy_key_on_job_completion: _,
            } => {
                dst.put_slice(b"ADD_ONION ");
                match key {
                    OnionKey::New { algorithm } => {
                        dst.put_slice(b"NEW:");
                        dst.put_slice(algorithm.as_bytes());
                    }
                    OnionKey::Existing { algorithm, key_b64 } => {
                        dst.put_slice(algorithm.as_bytes());
                        dst.put_u8(b':');
                        dst.put_slice(key_b64.as_bytes());
                    }
                }
                if let Some(csv) = flags.csv() {
                    dst.put_slice(b" Flags=");
                    dst.put_slice(csv.as_bytes());
                }
                if let Some(max_streams) = max_streams {
                    dst.put_slice(format!(" MaxStreams={max_streams}").as_bytes());
                }
                for (virt_port, target) in ports {
                    dst.put_slice(format!(" Port={virt_port},").as_bytes());
                    dst.put_slice(strip_unix_quotes(target).as_bytes());
                }
                for client_key in client_auth_v3 {
                    dst.put_slice(b" ClientAuthV3=");
                    dst.put_slice(client_key.as_bytes());
                }
                terminate(&mut dst);
            }
            Self::DelOnion(service_id) => simple(&mut dst, "DEL_ONION", std::iter::once(service_id.as_str())),
            Self::GetInfo(keys) => simple(&mut dst, "GETINFO", keys.iter().map(String::as_str)),
            Self::MapAddress(pairs) => {
                dst.put_slice(b"MAPADDRESS");
                for (from, to) in pairs {
                    dst.put_u8(b' ');
                    dst.put_slice(from.as_bytes());
                    dst.put_u8(b'=');
                    dst.put_slice(to.as_bytes());
                }
                terminate(&mut dst);
            }
            Self::OnionClientAuthAdd {
                service_id,
                private_key_x25519_b64,
                nickname,
                permanent,
                destroy_key_on_job_completion: _,
            } => {
                dst.put_slice(b"ONION_CLIENT_AUTH_ADD ");
                dst.put_slice(service_id.as_bytes());
                dst.put_slice(b" x25519:");
                dst.put_slice(private_key_x25519_b64.as_bytes());
                if let Some(nickname) = nickname {
                    dst.put_slice(b" ClientName=");
                    dst.put_slice(nickname.as_bytes());
                }
                if *permanent {
                    dst.put_slice(b" Flags=Permanent");
                }
                terminate(&mut dst);
            }
            Self::OnionClientAuthRemove(service_id) => {
                simple(&mut dst, "ONION_CLIENT_AUTH_REMOVE", std::iter::once(service_id.as_str()));
            }
            Self::OnionClientAuthView(service_id) => {
                simple(&mut dst, "ONION_CLIENT_AUTH_VIEW", service_id.as_deref().into_iter());
            }
            Self::TakeOwnership => simple(&mut dst, "TAKEOWNERSHIP", std::iter::empty()),
            Self::DropOwnership => simple(&mut dst, "DROPOWNERSHIP", std::iter::empty()),
            Self::Resolve { hostname, reverse } => {
                dst.put_slice(b"RESOLVE");
                if *reverse {
                    dst.put_slice(b" mode=reverse");
                }
                dst.put_u8(b' ');
                dst.put_slice(hostname.as_bytes());
                terminate(&mut dst);
            }
            Self::SetEvents(events) => {
                simple(&mut dst, "SETEVENTS", events.iter().map(String::as_str));
            }
            Self::Signal(signal) => simple(&mut dst, "SIGNAL", std::iter::once(signal.as_str())),
        }
        dst
    }

    /// A log-safe rendering: secret/key material is replaced with a fixed placeholder.
    pub fn redacted_debug(&self) -> String {
        match self {
            Self::Authenticate(AuthMethod::Null) => "AUTHENTICATE".to_owned(),
            Self::Authenticate(_) => "AUTHENTICATE <redacted>".to_owned(),
            Self::AddOnion { .. } => "ADD_ONION <redacted key material>".to_owned(),
            Self::OnionClientAuthAdd { service_id, .. } => {
                format!("ONION_CLIENT_AUTH_ADD {service_id} <redacted>")
            }
            other => String::from_utf8_lossy(&other.encode()).trim_end().to_owned(),
        }
    }
}

fn terminate(dst: &mut BytesMut) {
    dst.put_slice(b"\r\n");
}

#[expect(single_use_lifetimes, reason = "anonymous lifetimes in impl Trait are unstable")]
fn simple<'a>(dst: &mut BytesMut, keyword: &str, args: impl Iterator<Item = &'a str>) {
    dst.put_slice(keyword.as_bytes());
    for arg in args {
        dst.put_u8(b' ');
        dst.put_slice(arg.as_bytes());
    }
    terminate(dst);
}

fn multiline(dst: &mut BytesMut, keyword: &str, body: &str) {
    dst.put_u8(b'+');
    dst.put_slice(keyword.as_bytes());
    terminate(dst);
    for line in body.lines() {
        if let Some(rest) = line.strip_prefix('.') {
            dst.put_u8(b'.');
            dst.put_u8(b'.');
            dst.put_slice(rest.as_bytes());
        } else {
            dst.put_slice(line.as_bytes());
        }
        terminate(dst);
    }
    dst.put_u8(b'.');
    terminate(dst);
}

/// Quote a `SETCONF` value, doubling backslashes and escaping embedded quotes.
fn quote(value: &str) -> String {
    if value.chars().any(char::is_whitespace) || value.is_empty() {
        let mut escaped = String::with_capacity(value.len() + 2);
        escaped.push('"');
        for ch in value.chars() {
            if ch == '"' || ch == '\\' {
                escaped.push('\\');
            }
            escaped.push(ch);
        }
        escaped.push('"');
        escaped
    } else {
        value.to_owned()
    }
}

/// tor's `ADD_ONION` parser rejects quoted `unix:` targets; strip surrounding quotes if present.
fn strip_unix_quotes(target: &str) -> &str {
    if let Some(rest) = target.strip_prefix("unix:\"") {
        if let Some(path) = rest.strip_suffix('"') {
            return path;
        }
    }
    target
}

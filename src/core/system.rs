use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::{Mutex, PoisonError};

use chrono::Utc;
use netstat2::{get_sockets_info, AddressFamilyFlags, ProtocolFlags, ProtocolSocketInfo, TcpState};
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, RefreshKind, System, Users};
use tracing::debug;

use super::connection::Connection;
use super::source::ConnectionSource;
use crate::error::SourceError;

#[derive(Debug, Clone, Default)]
struct Owner {
    process: String,
    user: String,
    uid: u32,
}

/// Live socket table joined with process and user metadata.
pub struct SystemSource {
    system: Mutex<System>,
    users: Mutex<Users>,
}

impl SystemSource {
    pub fn new() -> Self {
        let refresh_kind = RefreshKind::nothing().with_processes(ProcessRefreshKind::everything());
        Self {
            system: Mutex::new(System::new_with_specifics(refresh_kind)),
            users: Mutex::new(Users::new_with_refreshed_list()),
        }
    }

    fn owners(&self, pids: impl Iterator<Item = u32>) -> HashMap<u32, Owner> {
        let mut system = self.system.lock().unwrap_or_else(PoisonError::into_inner);
        system.refresh_processes(ProcessesToUpdate::All, true);
        let users = self.users.lock().unwrap_or_else(PoisonError::into_inner);

        let mut owners = HashMap::new();
        for pid in pids {
            if owners.contains_key(&pid) {
                continue;
            }
            let owner = match system.process(Pid::from_u32(pid)) {
                Some(proc) => {
                    let uid = proc.user_id();
                    Owner {
                        process: proc.name().to_string_lossy().to_string(),
                        user: uid
                            .and_then(|uid| users.get_user_by_id(uid))
                            .map(|u| u.name().to_string())
                            .unwrap_or_default(),
                        uid: uid.map(|uid| **uid).unwrap_or_default(),
                    }
                }
                None => Owner::default(),
            };
            owners.insert(pid, owner);
        }
        owners
    }
}

impl Default for SystemSource {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionSource for SystemSource {
    fn fetch(&self) -> Result<Vec<Connection>, SourceError> {
        let af_flags = AddressFamilyFlags::IPV4 | AddressFamilyFlags::IPV6;
        let proto_flags = ProtocolFlags::TCP | ProtocolFlags::UDP;
        let sockets_info = get_sockets_info(af_flags, proto_flags)
            .map_err(|e| SourceError::SocketTable(e.to_string()))?;
        let ts = Utc::now();

        let owners = self.owners(
            sockets_info
                .iter()
                .filter_map(|si| si.associated_pids.first().copied()),
        );

        let connections: Vec<Connection> = sockets_info
            .into_iter()
            .map(|si| {
                let pid = si.associated_pids.first().copied().unwrap_or(0);
                let owner = owners.get(&pid).cloned().unwrap_or_default();
                let mut conn = Connection {
                    pid,
                    process: owner.process,
                    user: owner.user,
                    uid: owner.uid,
                    ts,
                    ..Default::default()
                };
                match si.protocol_socket_info {
                    ProtocolSocketInfo::Tcp(tcp_si) => {
                        conn.proto = proto_name("tcp", &tcp_si.local_addr);
                        conn.ip_version = ip_version(&tcp_si.local_addr);
                        conn.state = tcp_state_name(&tcp_si.state).to_string();
                        conn.laddr = tcp_si.local_addr.to_string();
                        conn.lport = tcp_si.local_port;
                        conn.raddr = tcp_si.remote_addr.to_string();
                        conn.rport = tcp_si.remote_port;
                    }
                    ProtocolSocketInfo::Udp(udp_si) => {
                        conn.proto = proto_name("udp", &udp_si.local_addr);
                        conn.ip_version = ip_version(&udp_si.local_addr);
                        conn.laddr = udp_si.local_addr.to_string();
                        conn.lport = udp_si.local_port;
                        conn.raddr = "*".to_string();
                    }
                }
                conn
            })
            .collect();

        debug!(count = connections.len(), "socket table snapshot");
        Ok(connections)
    }
}

fn proto_name(base: &str, addr: &IpAddr) -> String {
    if addr.is_ipv6() {
        format!("{base}6")
    } else {
        base.to_string()
    }
}

fn ip_version(addr: &IpAddr) -> String {
    if addr.is_ipv6() { "IPv6" } else { "IPv4" }.to_string()
}

/// Canonical state names, matching what the filter normalizes user input to.
pub fn tcp_state_name(state: &TcpState) -> &'static str {
    match state {
        TcpState::Closed => "CLOSE",
        TcpState::Listen => "LISTEN",
        TcpState::SynSent => "SYN_SENT",
        TcpState::SynReceived => "SYN_RECV",
        TcpState::Established => "ESTABLISHED",
        TcpState::FinWait1 => "FIN_WAIT1",
        TcpState::FinWait2 => "FIN_WAIT2",
        TcpState::CloseWait => "CLOSE_WAIT",
        TcpState::Closing => "CLOSING",
        TcpState::LastAck => "LAST_ACK",
        TcpState::TimeWait => "TIME_WAIT",
        _ => "UNKNOWN",
    }
}

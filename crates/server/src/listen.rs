// Copyright (C) 2025 Ryan Daum <ryan.daum@gmail.com> This program is free
// software: you can redistribute it and/or modify it under the terms of the GNU
// General Public License as published by the Free Software Foundation, version
// 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use tokio::net::{TcpListener, TcpSocket};
use tracing::{info, warn};

use crate::model::Event;
use crate::session;

/// Bind the listening socket with address reuse, so a restarted server can
/// take over the port without waiting out TIME_WAIT.
pub fn bind(addr: SocketAddr) -> std::io::Result<TcpListener> {
    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };
    socket.set_reuseaddr(true)?;
    socket.bind(addr)?;
    socket.listen(1024)
}

/// Accept connections until the kill switch flips, spawning a session per
/// connection. Sessions run on their own fibers; a slow client never holds
/// up the accept loop or anyone else's I/O.
pub async fn run(
    listener: TcpListener,
    events: flume::Sender<Event>,
    kill_switch: Arc<AtomicBool>,
) {
    loop {
        if kill_switch.load(std::sync::atomic::Ordering::Relaxed) {
            info!("Kill switch activated, stopping listener");
            return;
        }
        match listener.accept().await {
            Ok((stream, addr)) => {
                info!(?addr, "Accepted connection");
                session::spawn(stream, addr, events.clone());
            }
            Err(e) => {
                warn!(error = ?e, "Accept failed, can't handle connection");
            }
        }
    }
}

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

//! One connected client: the shared session handle plus its two I/O fibers.
//!
//! The reader fiber turns decoded lines into model events; the writer fiber
//! drains the session's outbound queue onto the socket. Neither touches
//! world state. The model is the only producer on the outbound queue and
//! this writer is its only consumer, so frames reach the wire in the order
//! the model decided them.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::codec::{Framed, LinesCodec, LinesCodecError};
use tracing::debug;
use uuid::Uuid;

use crate::model::Event;

/// How long the writer blocks on an empty queue before re-checking whether
/// the session is still live.
const SEND_POLL: Duration = Duration::from_secs(5);

type Reader = SplitStream<Framed<TcpStream, LinesCodec>>;
type Writer = SplitSink<Framed<TcpStream, LinesCodec>, String>;

/// The shared handle for one connection. The model holds one clone in its
/// roster; the reader and writer fibers hold the others. Everything here is
/// either immutable or atomic; player state (id, nick, position) belongs to
/// the model alone.
pub struct Session {
    id: Uuid,
    peer_addr: SocketAddr,
    outbound: mpsc::UnboundedSender<String>,
    running: AtomicBool,
}

impl Session {
    /// Build a session handle and the receiving end of its outbound queue.
    pub fn new(peer_addr: SocketAddr) -> (Arc<Self>, mpsc::UnboundedReceiver<String>) {
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let session = Arc::new(Self {
            id: Uuid::new_v4(),
            peer_addr,
            outbound,
            running: AtomicBool::new(true),
        });
        (session, outbound_rx)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Queue one outbound frame (no trailing newline; the codec adds it).
    /// Frames for a dead session are dropped silently.
    pub fn send(&self, frame: String) {
        if self.is_running() {
            let _ = self.outbound.send(frame);
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::Relaxed);
    }
}

/// Wire up both fibers for an accepted connection. The connect event is
/// enqueued before the reader starts, so the model always sees a session's
/// connect before any of its frames.
pub fn spawn(stream: TcpStream, peer_addr: SocketAddr, events: flume::Sender<Event>) {
    let (session, outbound_rx) = Session::new(peer_addr);
    let framed = Framed::new(stream, LinesCodec::new());
    let (write, read) = framed.split();

    if events.send(Event::Connect(session.clone())).is_err() {
        // Model is gone; nothing to serve.
        return;
    }
    tokio::spawn(read_loop(session.clone(), read, events));
    tokio::spawn(write_loop(session, outbound_rx, write));
}

/// Feed decoded lines to the model until EOF or a socket error, then report
/// the disconnect. Either termination is a normal disconnect from the
/// model's point of view.
async fn read_loop(session: Arc<Session>, mut read: Reader, events: flume::Sender<Event>) {
    while let Some(line) = read.next().await {
        match line {
            Ok(line) => {
                if events.send(Event::Frame(session.id(), line)).is_err() {
                    break;
                }
            }
            Err(e) => {
                debug!(session = %session.id(), error = %e, "read failed");
                break;
            }
        }
    }
    session.stop();
    let _ = events.send(Event::Disconnect(session.id()));
}

/// Drain the outbound queue onto the socket. Waits up to [`SEND_POLL`] for a
/// first frame, then greedily batches whatever else is already queued into a
/// single flush. Batching is a throughput nicety; a write error just kills
/// the session and lets the reader observe the close.
async fn write_loop(
    session: Arc<Session>,
    mut outbound: mpsc::UnboundedReceiver<String>,
    mut write: Writer,
) {
    while session.is_running() {
        let first = match timeout(SEND_POLL, outbound.recv()).await {
            Err(_) => continue,
            Ok(None) => break,
            Ok(Some(frame)) => frame,
        };
        if let Err(e) = send_batch(&mut write, &mut outbound, first).await {
            debug!(session = %session.id(), error = %e, "write failed");
            break;
        }
    }
    session.stop();
    let _ = write.close().await;
}

async fn send_batch(
    write: &mut Writer,
    outbound: &mut mpsc::UnboundedReceiver<String>,
    first: String,
) -> Result<(), LinesCodecError> {
    write.feed(first).await?;
    while let Ok(frame) = outbound.try_recv() {
        write.feed(frame).await?;
    }
    write.flush().await
}

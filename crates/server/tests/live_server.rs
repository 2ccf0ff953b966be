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

//! End-to-end exercise of the full stack over real TCP: listener, session
//! fibers, model loop, store.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_util::codec::{Framed, LinesCodec};

use crust_server::{listen, model::Model};
use crust_store::BlockStore;

struct TestClient {
    framed: Framed<TcpStream, LinesCodec>,
}

impl TestClient {
    async fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.expect("connect");
        Self {
            framed: Framed::new(stream, LinesCodec::new()),
        }
    }

    async fn send(&mut self, line: &str) {
        self.framed.send(line.to_owned()).await.expect("send");
    }

    async fn recv(&mut self) -> String {
        timeout(Duration::from_secs(5), self.framed.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("connection closed")
            .expect("codec error")
    }
}

/// Boot a whole server on an ephemeral port, world state in a throwaway
/// store.
async fn start_server() -> SocketAddr {
    let store = BlockStore::open(None).unwrap();
    let (model, events) = Model::new(store);
    std::thread::Builder::new()
        .name("world-model".to_string())
        .spawn(move || model.run())
        .unwrap();

    let listener = listen::bind("127.0.0.1:0".parse().unwrap()).unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(listen::run(
        listener,
        events,
        Arc::new(AtomicBool::new(false)),
    ));
    addr
}

#[tokio::test(flavor = "multi_thread")]
async fn welcome_edit_fanout_and_catch_up() {
    let addr = start_server().await;

    let mut alice = TestClient::connect(addr).await;
    assert_eq!(alice.recv().await, "U,1,0,0,0,0,0");
    assert_eq!(alice.recv().await, "T,Welcome to Craft!");
    assert_eq!(alice.recv().await, "T,Type \"/help\" for chat commands.");
    assert_eq!(alice.recv().await, "T,player1 has joined the game.");

    let mut bob = TestClient::connect(addr).await;
    assert_eq!(bob.recv().await, "U,2,0,0,0,0,0");
    assert_eq!(bob.recv().await, "T,Welcome to Craft!");
    assert_eq!(bob.recv().await, "T,Type \"/help\" for chat commands.");
    assert_eq!(bob.recv().await, "P,1,0,0,0,0,0");
    assert_eq!(bob.recv().await, "N,1,player1");
    assert_eq!(bob.recv().await, "T,player2 has joined the game.");

    // Alice hears the newcomer arrive.
    assert_eq!(alice.recv().await, "P,2,0,0,0,0,0");
    assert_eq!(alice.recv().await, "N,2,player2");
    assert_eq!(alice.recv().await, "T,player2 has joined the game.");

    // An edit by Alice reaches Bob, not Alice.
    alice.send("B,16,50,16,5").await;
    assert_eq!(bob.recv().await, "B,0,0,16,50,16,5");

    // Catch-up: full fetch hands back the rows and a cursor.
    bob.send("C,0,0,0").await;
    assert_eq!(bob.recv().await, "B,0,0,16,50,16,5");
    let cursor_frame = bob.recv().await;
    let cursor: u64 = cursor_frame
        .strip_prefix("K,0,0,")
        .expect("cursor frame")
        .parse()
        .unwrap();

    // Replaying the cursor yields nothing; the next frame Bob sees is his
    // own chat echo, proving the replay was empty.
    bob.send(&format!("C,0,0,{cursor}")).await;
    bob.send("T,ping").await;
    assert_eq!(bob.recv().await, "T,player2> ping");
    assert_eq!(alice.recv().await, "T,player2> ping");

    // One more edit, then a delta fetch returns exactly it.
    alice.send("B,17,50,16,6").await;
    assert_eq!(bob.recv().await, "B,0,0,17,50,16,6");
    bob.send(&format!("C,0,0,{cursor}")).await;
    assert_eq!(bob.recv().await, "B,0,0,17,50,16,6");
    let next_cursor: u64 = bob
        .recv()
        .await
        .strip_prefix("K,0,0,")
        .expect("advanced cursor frame")
        .parse()
        .unwrap();
    assert!(next_cursor > cursor);
}

#[tokio::test(flavor = "multi_thread")]
async fn disconnect_is_announced() {
    let addr = start_server().await;

    let mut alice = TestClient::connect(addr).await;
    for _ in 0..4 {
        alice.recv().await;
    }
    let bob = TestClient::connect(addr).await;
    for _ in 0..3 {
        alice.recv().await;
    }

    drop(bob);
    assert_eq!(alice.recv().await, "D,2");
    assert_eq!(
        alice.recv().await,
        "T,player2 has disconnected from the server."
    );
}

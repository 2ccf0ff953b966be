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

//! The serialized world actor.
//!
//! A single consumer loop on its own thread drains every event the listener
//! and the session readers enqueue, and is the only code that touches the
//! roster or the block store. Sessions talk to the model only through the
//! event channel; the model talks to sessions only through their outbound
//! queues. Because the loop is serial, every broadcast a client observes
//! reflects a mutation already applied to authoritative state, and edits by
//! one actor reach observers before any of that actor's later edits.

use std::sync::Arc;
use std::time::{Duration, Instant};

use flume::RecvTimeoutError;
use rand::seq::IndexedRandom;
use tracing::{error, info};
use uuid::Uuid;

use crust_store::{BlockStore, chunked};

use crate::proto::{self, ChatCommand, ClientFrame};
use crate::session::Session;

/// Commit the store whenever this much time has passed, even while idle.
const COMMIT_INTERVAL: Duration = Duration::from_secs(5);

/// How long the loop blocks on an empty event queue before taking a commit
/// tick.
const EVENT_POLL: Duration = Duration::from_secs(5);

/// Highest real block kind a client may place.
const MAX_KIND: i32 = 15;

const SPAWN_POINT: Position = Position {
    x: 0.0,
    y: 0.0,
    z: 0.0,
    rx: 0.0,
    ry: 0.0,
};

/// A player position: world coordinates plus look angles.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Position {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub rx: f32,
    pub ry: f32,
}

/// Everything sessions and the listener can ask of the model.
pub enum Event {
    Connect(Arc<Session>),
    Disconnect(Uuid),
    Frame(Uuid, String),
}

struct Player {
    session: Arc<Session>,
    client_id: i64,
    nick: String,
    position: Position,
}

pub struct Model {
    store: BlockStore,
    roster: Vec<Player>,
    events: flume::Receiver<Event>,
    last_commit: Instant,
}

impl Model {
    pub fn new(store: BlockStore) -> (Self, flume::Sender<Event>) {
        let (tx, rx) = flume::unbounded();
        let model = Self {
            store,
            roster: Vec::new(),
            events: rx,
            last_commit: Instant::now(),
        };
        (model, tx)
    }

    /// The event loop. Runs until every event sender is gone. A handler
    /// failure is logged and the loop keeps serving; whatever the handler
    /// did manage to write reaches disk with the next commit.
    pub fn run(mut self) {
        if let Err(e) = self.commit() {
            error!(error = ?e, "initial commit failed");
        }
        loop {
            if self.last_commit.elapsed() >= COMMIT_INTERVAL {
                if let Err(e) = self.commit() {
                    error!(error = ?e, "periodic commit failed");
                }
            }
            match self.events.recv_timeout(EVENT_POLL) {
                Ok(event) => {
                    if let Err(e) = self.handle(event) {
                        error!(error = ?e, "event handler failed");
                    }
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    info!("Event channel closed, model loop exiting");
                    break;
                }
            }
        }
    }

    fn commit(&mut self) -> Result<(), eyre::Error> {
        self.last_commit = Instant::now();
        self.store.commit()?;
        Ok(())
    }

    fn handle(&mut self, event: Event) -> Result<(), eyre::Error> {
        match event {
            Event::Connect(session) => self.on_connect(session),
            Event::Disconnect(id) => self.on_disconnect(id),
            Event::Frame(id, line) => self.on_frame(id, &line),
        }
    }

    fn player_idx(&self, id: Uuid) -> Option<usize> {
        self.roster.iter().position(|p| p.session.id() == id)
    }

    /// The smallest positive integer no connected player holds. Ids are
    /// reclaimed on disconnect.
    fn next_client_id(&self) -> i64 {
        let mut id = 1;
        while self.roster.iter().any(|p| p.client_id == id) {
            id += 1;
        }
        id
    }

    fn on_connect(&mut self, session: Arc<Session>) -> Result<(), eyre::Error> {
        let client_id = self.next_client_id();
        let nick = format!("player{client_id}");
        info!(client_id, peer = %session.peer_addr(), "connected");
        self.roster.push(Player {
            session,
            client_id,
            nick: nick.clone(),
            position: SPAWN_POINT,
        });

        let idx = self.roster.len() - 1;
        let me = &self.roster[idx];
        me.session.send(proto::you(client_id, me.position));
        me.session.send(proto::talk("Welcome to Craft!"));
        me.session.send(proto::talk("Type \"/help\" for chat commands."));
        self.send_position_to_others(idx);
        self.send_peer_positions(idx);
        self.send_nick_to_others(idx);
        self.send_peer_nicks(idx);
        self.send_talk(&format!("{nick} has joined the game."));
        Ok(())
    }

    fn on_disconnect(&mut self, id: Uuid) -> Result<(), eyre::Error> {
        let Some(idx) = self.player_idx(id) else {
            return Ok(());
        };
        let player = self.roster.remove(idx);
        info!(client_id = player.client_id, peer = %player.session.peer_addr(), "disconnected");
        for other in &self.roster {
            other.session.send(proto::disconnect(player.client_id));
        }
        self.send_talk(&format!("{} has disconnected from the server.", player.nick));
        Ok(())
    }

    fn on_frame(&mut self, id: Uuid, line: &str) -> Result<(), eyre::Error> {
        let Some(idx) = self.player_idx(id) else {
            return Ok(());
        };
        match ClientFrame::parse(line) {
            Some(ClientFrame::Chunk { p, q, key }) => self.on_chunk(idx, p, q, key),
            Some(ClientFrame::Block { x, y, z, w }) => self.on_block(idx, x, y, z, w),
            Some(ClientFrame::Position(pos)) => {
                self.on_position(idx, pos);
                Ok(())
            }
            Some(ClientFrame::Talk(text)) => self.on_talk(idx, &text),
            None => Ok(()),
        }
    }

    /// Incremental chunk catch-up: stream every row past the client's rowid
    /// cursor, then hand back the new cursor so the next request is a delta.
    fn on_chunk(&mut self, idx: usize, p: i32, q: i32, key: u64) -> Result<(), eyre::Error> {
        let rows = self.store.scan_chunk(p, q, key)?;
        let player = &self.roster[idx];
        let mut max_rowid = 0;
        for row in rows {
            player.session.send(proto::block(p, q, row.x, row.y, row.z, row.w));
            max_rowid = max_rowid.max(row.rowid);
        }
        if max_rowid > 0 {
            player.session.send(proto::key(p, q, max_rowid));
        }
        Ok(())
    }

    /// Apply one block edit: upsert the primary row, then replicate ghost
    /// rows (negated kind) into every neighbor chunk the block abuts, so a
    /// client rendering only that neighbor still draws the seam face.
    /// Removal is an edit with `w = 0`, which clears the ghosts with it.
    fn on_block(&mut self, idx: usize, x: i32, y: i32, z: i32, w: i32) -> Result<(), eyre::Error> {
        if !(1..=255).contains(&y) || !(0..=MAX_KIND).contains(&w) {
            return Ok(());
        }
        let (p, q) = (chunked(x), chunked(z));
        self.store.upsert(p, q, x, y, z, w)?;
        self.send_block_to_others(idx, p, q, x, y, z, w);
        for dx in -1..=1 {
            for dz in -1..=1 {
                if dx == 0 && dz == 0 {
                    continue;
                }
                if dx != 0 && chunked(x + dx) == p {
                    continue;
                }
                if dz != 0 && chunked(z + dz) == q {
                    continue;
                }
                let (np, nq) = (p + dx, q + dz);
                self.store.upsert(np, nq, x, y, z, -w)?;
                self.send_block_to_others(idx, np, nq, x, y, z, -w);
            }
        }
        Ok(())
    }

    fn on_position(&mut self, idx: usize, pos: Position) {
        self.roster[idx].position = pos;
        self.send_position_to_others(idx);
    }

    fn on_talk(&mut self, idx: usize, text: &str) -> Result<(), eyre::Error> {
        if text.starts_with('/') {
            match ChatCommand::parse(text) {
                Some(command) => self.on_command(idx, command),
                None => {
                    self.roster[idx]
                        .session
                        .send(proto::talk(&format!("Unrecognized command: \"{text}\"")));
                }
            }
        } else {
            let line = format!("{}> {}", self.roster[idx].nick, text);
            self.send_talk(&line);
        }
        Ok(())
    }

    fn on_command(&mut self, idx: usize, command: ChatCommand) {
        match command {
            ChatCommand::Nick(None) => {
                let player = &self.roster[idx];
                player
                    .session
                    .send(proto::talk(&format!("Your nickname is {}", player.nick)));
            }
            ChatCommand::Nick(Some(new_nick)) => {
                let old_nick = self.roster[idx].nick.clone();
                self.send_talk(&format!("{old_nick} is now known as {new_nick}"));
                self.roster[idx].nick = new_nick;
                self.send_nick_to_others(idx);
            }
            ChatCommand::Spawn => {
                self.teleport(idx, SPAWN_POINT);
            }
            ChatCommand::Goto(None) => {
                // Never self: pick from everyone else. Alone, there is
                // nowhere to go.
                let candidates: Vec<usize> = (0..self.roster.len()).filter(|&i| i != idx).collect();
                if let Some(&target) = candidates.choose(&mut rand::rng()) {
                    let pos = self.roster[target].position;
                    self.teleport(idx, pos);
                }
            }
            ChatCommand::Goto(Some(nick)) => {
                if let Some(target) = self.roster.iter().position(|p| p.nick == nick) {
                    let pos = self.roster[target].position;
                    self.teleport(idx, pos);
                }
            }
            ChatCommand::Pq(p, q) => {
                if p.abs() > 1000 || q.abs() > 1000 {
                    return;
                }
                let pos = Position {
                    x: (p * crust_store::CHUNK_SIZE as i64) as f32,
                    y: 0.0,
                    z: (q * crust_store::CHUNK_SIZE as i64) as f32,
                    rx: 0.0,
                    ry: 0.0,
                };
                self.teleport(idx, pos);
            }
            ChatCommand::Help => {
                let player = &self.roster[idx];
                player
                    .session
                    .send(proto::talk("Type \"t\" to chat with other players."));
                player
                    .session
                    .send(proto::talk("Type \"/\" to start typing a command."));
                player.session.send(proto::talk(
                    "Commands: /goto [NAME], /help, /nick [NAME], /players, /spawn",
                ));
            }
            ChatCommand::Players => {
                let names: Vec<&str> = self.roster.iter().map(|p| p.nick.as_str()).collect();
                self.roster[idx]
                    .session
                    .send(proto::talk(&format!("Players: {}", names.join(", "))));
            }
        }
    }

    /// Move a player and tell the world: `U` to the player, `P` to everyone
    /// else.
    fn teleport(&mut self, idx: usize, pos: Position) {
        self.roster[idx].position = pos;
        let player = &self.roster[idx];
        player.session.send(proto::you(player.client_id, pos));
        self.send_position_to_others(idx);
    }

    fn send_position_to_others(&self, idx: usize) {
        let player = &self.roster[idx];
        let frame = proto::position(player.client_id, player.position);
        for (i, other) in self.roster.iter().enumerate() {
            if i != idx {
                other.session.send(frame.clone());
            }
        }
    }

    fn send_peer_positions(&self, idx: usize) {
        let player = &self.roster[idx];
        for (i, other) in self.roster.iter().enumerate() {
            if i != idx {
                player
                    .session
                    .send(proto::position(other.client_id, other.position));
            }
        }
    }

    fn send_nick_to_others(&self, idx: usize) {
        let player = &self.roster[idx];
        let frame = proto::nick(player.client_id, &player.nick);
        for (i, other) in self.roster.iter().enumerate() {
            if i != idx {
                other.session.send(frame.clone());
            }
        }
    }

    fn send_peer_nicks(&self, idx: usize) {
        let player = &self.roster[idx];
        for (i, other) in self.roster.iter().enumerate() {
            if i != idx {
                player.session.send(proto::nick(other.client_id, &other.nick));
            }
        }
    }

    fn send_block_to_others(&self, idx: usize, p: i32, q: i32, x: i32, y: i32, z: i32, w: i32) {
        let frame = proto::block(p, q, x, y, z, w);
        for (i, other) in self.roster.iter().enumerate() {
            if i != idx {
                other.session.send(frame.clone());
            }
        }
    }

    /// Chat goes to everyone, the speaker included.
    fn send_talk(&self, text: &str) {
        info!("{text}");
        let frame = proto::talk(text);
        for player in &self.roster {
            player.session.send(frame.clone());
        }
    }
}

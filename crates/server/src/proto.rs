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

//! The wire protocol: newline-terminated frames of comma-separated fields,
//! the first field a single tag letter.
//!
//! Inbound frames are decoded into [`ClientFrame`]s by a small parser per
//! tag; anything malformed (unknown tag, wrong arity, unparseable number) is
//! dropped without a reply. Chat text beginning with `/` goes through the
//! ordered [`ChatCommand`] table, first match wins.
//!
//! Note the `B` asymmetry: clients send `B,x,y,z,w` and the server derives
//! the chunk, while server-to-client `B` frames carry the full
//! `p,q,x,y,z,w`.

use lazy_static::lazy_static;
use regex::Regex;

use crate::model::Position;

pub const YOU: &str = "U";
pub const BLOCK: &str = "B";
pub const CHUNK: &str = "C";
pub const POSITION: &str = "P";
pub const DISCONNECT: &str = "D";
pub const TALK: &str = "T";
pub const KEY: &str = "K";
pub const NICK: &str = "N";

/// A decoded client-to-server frame.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientFrame {
    /// `C,p,q[,key]`: request the blocks of a chunk past a rowid cursor.
    Chunk { p: i32, q: i32, key: u64 },
    /// `B,x,y,z,w`: set a block.
    Block { x: i32, y: i32, z: i32, w: i32 },
    /// `P,x,y,z,rx,ry`: movement update.
    Position(Position),
    /// `T,text...`: chat (commas in the body are reassembled).
    Talk(String),
}

impl ClientFrame {
    pub fn parse(line: &str) -> Option<ClientFrame> {
        let mut fields = line.split(',');
        let tag = fields.next()?;
        let args: Vec<&str> = fields.collect();
        match tag {
            CHUNK => {
                if args.len() < 2 || args.len() > 3 {
                    return None;
                }
                let p = args[0].parse().ok()?;
                let q = args[1].parse().ok()?;
                // A stale client can replay a nonsense cursor; treat anything
                // negative as "send me everything".
                let key = match args.get(2) {
                    Some(raw) => raw.parse::<i64>().ok()?.max(0) as u64,
                    None => 0,
                };
                Some(ClientFrame::Chunk { p, q, key })
            }
            BLOCK => {
                if args.len() != 4 {
                    return None;
                }
                Some(ClientFrame::Block {
                    x: args[0].parse().ok()?,
                    y: args[1].parse().ok()?,
                    z: args[2].parse().ok()?,
                    w: args[3].parse().ok()?,
                })
            }
            POSITION => {
                if args.len() != 5 {
                    return None;
                }
                Some(ClientFrame::Position(Position {
                    x: args[0].parse().ok()?,
                    y: args[1].parse().ok()?,
                    z: args[2].parse().ok()?,
                    rx: args[3].parse().ok()?,
                    ry: args[4].parse().ok()?,
                }))
            }
            TALK => Some(ClientFrame::Talk(args.join(","))),
            _ => None,
        }
    }
}

/// A parsed `/`-command from chat text.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatCommand {
    Nick(Option<String>),
    Spawn,
    Goto(Option<String>),
    Pq(i64, i64),
    Help,
    Players,
}

lazy_static! {
    static ref NICK_PATTERN: Regex = Regex::new(r"^/nick(?:\s+([^,\s]+))?$").unwrap();
    static ref SPAWN_PATTERN: Regex = Regex::new(r"^/spawn$").unwrap();
    static ref GOTO_PATTERN: Regex = Regex::new(r"^/goto(?:\s+(\S+))?$").unwrap();
    static ref PQ_PATTERN: Regex = Regex::new(r"^/pq\s+(-?[0-9]+)\s*,?\s*(-?[0-9]+)$").unwrap();
    static ref HELP_PATTERN: Regex = Regex::new(r"^/help$").unwrap();
    static ref PLAYERS_PATTERN: Regex = Regex::new(r"^/players$").unwrap();
}

impl ChatCommand {
    /// Try the text against the command table in order; the first match wins.
    pub fn parse(text: &str) -> Option<ChatCommand> {
        if let Some(caps) = NICK_PATTERN.captures(text) {
            return Some(ChatCommand::Nick(caps.get(1).map(|m| m.as_str().to_owned())));
        }
        if SPAWN_PATTERN.is_match(text) {
            return Some(ChatCommand::Spawn);
        }
        if let Some(caps) = GOTO_PATTERN.captures(text) {
            return Some(ChatCommand::Goto(caps.get(1).map(|m| m.as_str().to_owned())));
        }
        if let Some(caps) = PQ_PATTERN.captures(text) {
            // Saturate oversized literals; the range check upstream drops
            // them just like any other out-of-bounds request.
            let p = caps[1].parse().unwrap_or(i64::MAX);
            let q = caps[2].parse().unwrap_or(i64::MAX);
            return Some(ChatCommand::Pq(p, q));
        }
        if HELP_PATTERN.is_match(text) {
            return Some(ChatCommand::Help);
        }
        if PLAYERS_PATTERN.is_match(text) {
            return Some(ChatCommand::Players);
        }
        None
    }
}

// Server-to-client frame constructors. The writer's codec appends the
// newline.

pub fn you(client_id: i64, pos: Position) -> String {
    format!(
        "{YOU},{client_id},{},{},{},{},{}",
        pos.x, pos.y, pos.z, pos.rx, pos.ry
    )
}

pub fn block(p: i32, q: i32, x: i32, y: i32, z: i32, w: i32) -> String {
    format!("{BLOCK},{p},{q},{x},{y},{z},{w}")
}

pub fn key(p: i32, q: i32, max_rowid: u64) -> String {
    format!("{KEY},{p},{q},{max_rowid}")
}

pub fn position(client_id: i64, pos: Position) -> String {
    format!(
        "{POSITION},{client_id},{},{},{},{},{}",
        pos.x, pos.y, pos.z, pos.rx, pos.ry
    )
}

pub fn disconnect(client_id: i64) -> String {
    format!("{DISCONNECT},{client_id}")
}

pub fn nick(client_id: i64, nick: &str) -> String {
    format!("{NICK},{client_id},{nick}")
}

pub fn talk(text: &str) -> String {
    format!("{TALK},{text}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_each_tag() {
        assert_eq!(
            ClientFrame::parse("C,3,-2"),
            Some(ClientFrame::Chunk { p: 3, q: -2, key: 0 })
        );
        assert_eq!(
            ClientFrame::parse("C,3,-2,41"),
            Some(ClientFrame::Chunk { p: 3, q: -2, key: 41 })
        );
        assert_eq!(
            ClientFrame::parse("B,16,50,0,5"),
            Some(ClientFrame::Block { x: 16, y: 50, z: 0, w: 5 })
        );
        assert_eq!(
            ClientFrame::parse("P,1.5,20,-3,0,90"),
            Some(ClientFrame::Position(Position {
                x: 1.5,
                y: 20.0,
                z: -3.0,
                rx: 0.0,
                ry: 90.0
            }))
        );
        assert_eq!(
            ClientFrame::parse("T,hello,world"),
            Some(ClientFrame::Talk("hello,world".into()))
        );
    }

    #[test]
    fn malformed_frames_are_dropped() {
        assert_eq!(ClientFrame::parse("Q,1,2"), None);
        assert_eq!(ClientFrame::parse("B,1,2,3"), None);
        assert_eq!(ClientFrame::parse("B,1,2,3,4,5"), None);
        assert_eq!(ClientFrame::parse("B,one,2,3,4"), None);
        assert_eq!(ClientFrame::parse("P,1,2,3,4"), None);
        assert_eq!(ClientFrame::parse("C,1"), None);
        assert_eq!(ClientFrame::parse(""), None);
    }

    #[test]
    fn negative_chunk_cursor_degrades_to_full_fetch() {
        assert_eq!(
            ClientFrame::parse("C,0,0,-7"),
            Some(ClientFrame::Chunk { p: 0, q: 0, key: 0 })
        );
    }

    #[test]
    fn chat_command_table_matches_in_order() {
        assert_eq!(ChatCommand::parse("/nick"), Some(ChatCommand::Nick(None)));
        assert_eq!(
            ChatCommand::parse("/nick steve"),
            Some(ChatCommand::Nick(Some("steve".into())))
        );
        // Nicknames cannot carry commas; the frame splitter owns those.
        assert_eq!(ChatCommand::parse("/nick st,eve"), None);
        assert_eq!(ChatCommand::parse("/spawn"), Some(ChatCommand::Spawn));
        assert_eq!(ChatCommand::parse("/goto"), Some(ChatCommand::Goto(None)));
        assert_eq!(
            ChatCommand::parse("/goto steve"),
            Some(ChatCommand::Goto(Some("steve".into())))
        );
        assert_eq!(ChatCommand::parse("/pq 5,5"), Some(ChatCommand::Pq(5, 5)));
        assert_eq!(ChatCommand::parse("/pq -3 7"), Some(ChatCommand::Pq(-3, 7)));
        assert_eq!(ChatCommand::parse("/help"), Some(ChatCommand::Help));
        assert_eq!(ChatCommand::parse("/players"), Some(ChatCommand::Players));
        assert_eq!(ChatCommand::parse("/warp 1 2"), None);
        assert_eq!(ChatCommand::parse("/pq five,5"), None);
    }
}

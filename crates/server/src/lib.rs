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

//! The authoritative server for a shared voxel world.
//!
//! Clients speak a newline-delimited, comma-separated text protocol over
//! TCP. All world state is owned by a single serialized model loop; each
//! connection gets a reader fiber and a writer fiber that only ever touch
//! their own session. Block edits are durable, chunk-addressed, and
//! replayable incrementally through a rowid cursor.

pub mod listen;
pub mod model;
pub mod proto;
pub mod session;

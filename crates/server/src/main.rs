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

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use clap::Parser;
use clap::builder::ValueHint;
use clap_derive::Parser;
use eyre::eyre;
use tokio::net::lookup_host;
use tokio::select;
use tokio::signal::unix::{SignalKind, signal};
use tracing::info;

use crust_server::{listen, model::Model};
use crust_store::BlockStore;

#[derive(Parser, Debug)]
struct Args {
    #[arg(
        value_name = "host",
        help = "Listen address for client connections",
        default_value = "0.0.0.0"
    )]
    host: String,

    #[arg(
        value_name = "port",
        help = "Listen port for client connections",
        default_value = "4080"
    )]
    port: u16,

    #[arg(
        long,
        value_name = "db-path",
        help = "Path to the block database to use or create",
        value_hint = ValueHint::FilePath,
        default_value = "crust.db"
    )]
    db_path: PathBuf,

    #[arg(long, help = "Enable debug logging", default_value = "false")]
    debug: bool,
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<(), eyre::Error> {
    color_eyre::install()?;
    let args: Args = Args::parse();

    let main_subscriber = tracing_subscriber::fmt()
        .compact()
        .with_ansi(true)
        .with_thread_names(true)
        .with_max_level(if args.debug {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        })
        .finish();
    tracing::subscriber::set_global_default(main_subscriber)
        .expect("Unable to configure logging");

    let mut hup_signal = signal(SignalKind::hangup()).expect("Unable to register HUP handler");
    let mut stop_signal = signal(SignalKind::interrupt()).expect("Unable to register STOP handler");

    let listen_addr = lookup_host(format!("{}:{}", args.host, args.port))
        .await?
        .next()
        .ok_or_else(|| eyre!("Unable to resolve listen address {}:{}", args.host, args.port))?;

    let store = BlockStore::open(Some(&args.db_path))?;
    let (model, events) = Model::new(store);
    std::thread::Builder::new()
        .name("world-model".to_string())
        .spawn(move || model.run())?;

    let kill_switch = Arc::new(AtomicBool::new(false));
    let listener = listen::bind(listen_addr)?;
    info!(addr = %listen_addr, "Serving");

    let listen_loop = tokio::spawn(listen::run(listener, events, kill_switch.clone()));
    select! {
        _ = listen_loop => {
            info!("Listener exited.");
        }
        _ = hup_signal.recv() => {
            info!("HUP received, stopping...");
            kill_switch.store(true, std::sync::atomic::Ordering::SeqCst);
        }
        _ = stop_signal.recv() => {
            info!("STOP received, stopping...");
            kill_switch.store(true, std::sync::atomic::Ordering::SeqCst);
        }
    }
    info!("Done.");

    Ok(())
}

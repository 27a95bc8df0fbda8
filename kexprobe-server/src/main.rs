/*
* Kexprobe, a post-quantum key exchange probe for TLS and QUIC endpoints.
* Copyright (C) 2024 Kaede Akino
*
* This program is free software: you can redistribute it and/or modify
* it under the terms of the GNU General Public License as published by
* the Free Software Foundation, either version 3 of the License, or
* (at your option) any later version.
*
* This program is distributed in the hope that it will be useful,
* but WITHOUT ANY WARRANTY; without even the implied warranty of
* MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
* GNU General Public License for more details.
*
* You should have received a copy of the GNU General Public License
* along with this program. If not, see <http://www.gnu.org/licenses/>.
*/

use std::{path::PathBuf, process};

use clap::Parser;
use env_logger::Builder as LoggerBuilder;

use crate::{config::Config, server::Server};

mod config;
mod connection;
mod error;
mod report;
mod server;
mod utils;

#[derive(Parser)]
#[command(about, author, version)]
struct Arguments {
    #[clap(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    let args = Arguments::parse();

    // Without a config file every option takes its default.
    let config_path = args.config.or_else(utils::find_config);

    let cfg = match Config::build(config_path) {
        Ok(cfg) => cfg,
        Err(err) => {
            eprintln!("{err}");
            process::exit(1);
        }
    };

    LoggerBuilder::new()
        .filter_level(cfg.log_level)
        .format_module_path(false)
        .format_target(false)
        .init();

    match Server::init(cfg).await {
        Ok(server) => server.start().await,
        Err(err) => {
            eprintln!("{err}");
            process::exit(1);
        }
    }
}

// Copyright (C) 2026 Brian Johnson
//
// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; either version 2 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along
// with this program; if not, write to the Free Software Foundation, Inc.,
// 51 Franklin Street, Fifth Floor, Boston, MA 02110-1301 USA.

// XMODEM protocol implementation
mod channel;
mod integrity;
mod packet;
mod protocol;
mod receiver;
mod sender;
mod session;
mod source;

use clap::{Parser, Subcommand};
use log::{info, LevelFilter};
use serialport::{DataBits, Parity, StopBits};
use std::path::PathBuf;

use channel::SerialChannel;
use protocol::trim_padding;
use session::Session;
use source::{FileSource, PayloadSource};

#[derive(Parser)]
#[command(name = "xlink")]
#[command(about = "XMODEM, XMODEM-CRC and XMODEM-1K file transfer over serial lines", long_about = None)]
#[command(disable_help_subcommand = true)]
struct Cli {
    /// Serial port to use (e.g., /dev/ttyUSB0 or COM1)
    #[arg(short, long)]
    port: String,

    /// Baud rate
    #[arg(short, long, default_value = "9600")]
    baud: u32,

    /// Data bits (5, 6, 7, or 8)
    #[arg(long, default_value = "8", value_name = "BITS")]
    data_bits: u8,

    /// Parity (none, odd, or even)
    #[arg(long, default_value = "none")]
    parity: String,

    /// Stop bits (1 or 2)
    #[arg(long, default_value = "1", value_name = "BITS")]
    stop_bits: u8,

    /// Increase log verbosity (repeat for more)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send a file to the remote receiver
    Send {
        /// File to send
        file: PathBuf,
    },
    /// Receive a file from the remote sender
    Receive {
        /// Where to write the received payload
        file: PathBuf,

        /// Keep the trailing SUB padding instead of trimming it
        #[arg(long)]
        raw: bool,
    },
}

fn parse_data_bits(bits: u8) -> Result<DataBits, String> {
    match bits {
        5 => Ok(DataBits::Five),
        6 => Ok(DataBits::Six),
        7 => Ok(DataBits::Seven),
        8 => Ok(DataBits::Eight),
        _ => Err(format!("Invalid data bits: {}. Must be 5, 6, 7, or 8", bits)),
    }
}

fn parse_parity(parity: &str) -> Result<Parity, String> {
    match parity.to_lowercase().as_str() {
        "none" => Ok(Parity::None),
        "odd" => Ok(Parity::Odd),
        "even" => Ok(Parity::Even),
        _ => Err(format!("Invalid parity: {}. Must be 'none', 'odd', or 'even'", parity)),
    }
}

fn parse_stop_bits(bits: u8) -> Result<StopBits, String> {
    match bits {
        1 => Ok(StopBits::One),
        2 => Ok(StopBits::Two),
        _ => Err(format!("Invalid stop bits: {}. Must be 1 or 2", bits)),
    }
}

fn main() {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    env_logger::Builder::new().filter_level(level).init();

    let data_bits = match parse_data_bits(cli.data_bits) {
        Ok(db) => db,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    let parity = match parse_parity(&cli.parity) {
        Ok(p) => p,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    let stop_bits = match parse_stop_bits(cli.stop_bits) {
        Ok(sb) => sb,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    info!(
        "opening {} ({} baud, {:?}, {:?}, {:?})",
        cli.port, cli.baud, data_bits, parity, stop_bits
    );

    let chan = match SerialChannel::open(&cli.port, cli.baud, data_bits, parity, stop_bits) {
        Ok(chan) => chan,
        Err(e) => {
            eprintln!("Failed to open serial port: {}", e);
            std::process::exit(1);
        }
    };

    let session = Session::new(Box::new(chan));

    match cli.command {
        Commands::Send { file } => {
            let source = match FileSource::open(&file) {
                Ok(source) => source,
                Err(e) => {
                    eprintln!("Cannot read {}: {}", file.display(), e);
                    std::process::exit(1);
                }
            };

            info!("sending {} ({} bytes)", file.display(), source.remaining());
            if let Err(e) = session.send(Box::new(source)) {
                eprintln!("Send failed: {}", e);
                std::process::exit(1);
            }
            println!("File sent successfully!");
        }
        Commands::Receive { file, raw } => {
            let data = match session.receive() {
                Ok(data) => data,
                Err(e) => {
                    eprintln!("Receive failed: {}", e);
                    std::process::exit(1);
                }
            };

            // Trailing SUB bytes are padding by convention for file
            // payloads; --raw keeps the blocks exactly as they arrived.
            let payload = if raw { &data[..] } else { trim_padding(&data) };

            if let Err(e) = std::fs::write(&file, payload) {
                eprintln!("Cannot write {}: {}", file.display(), e);
                std::process::exit(1);
            }
            println!("Received {} bytes into {}", payload.len(), file.display());
        }
    }
}

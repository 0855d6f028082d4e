//! budctl — command-line controller for wireless earbuds over RFCOMM.
//!
//! Speaks the manufacturer's binary protocol directly over a serial
//! Bluetooth link, bypassing the vendor application: pairing handshake,
//! game-mode and spatial-audio toggles, tap-function remapping, and EQ
//! presets. The device must already be paired at the OS level.

use log::info;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};

mod bluetooth;
mod buds;
mod cli;
mod config;
mod error;

use crate::{
   bluetooth::rfcomm::RfcommTransport,
   buds::{
      protocol::Command,
      session::{Session, Transport},
   },
   cli::CliCommand,
   error::{BudsError, Result},
};

#[tokio::main]
async fn main() -> Result<()> {
   env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

   let config = config::Config::load()?;
   let mut lines = BufReader::new(tokio::io::stdin()).lines();

   let address = match config.device_address.clone() {
      Some(address) => address,
      None => read_line(&mut lines, "Enter MAC Address (XX:XX:XX:XX:XX:XX)>> ").await?,
   };
   let address = address
      .trim()
      .parse()
      .map_err(|_| BudsError::InvalidArgument(format!("invalid MAC address `{address}`")))?;

   let transport = RfcommTransport::connect(address, config.channel).await?;
   info!("Connected to {address} on channel {}", config.channel);

   let mut session = Session::new(transport, config.response_timeout());
   repl(&mut session, &mut lines).await
}

async fn repl<T: Transport>(
   session: &mut Session<T>,
   lines: &mut Lines<BufReader<Stdin>>,
) -> Result<()> {
   loop {
      prompt(">> ")?;
      let Some(line) = lines.next_line().await? else {
         break;
      };
      match cli::parse_line(&line) {
         Ok(CliCommand::Empty) => {},
         Ok(CliCommand::Exit) => break,
         Ok(CliCommand::Device(command)) => match run_command(session, command).await {
            Ok(()) => {},
            Err(
               e @ (BudsError::Transport(_) | BudsError::ConnectionLost | BudsError::Bluetooth(_)),
            ) => {
               // The link is gone; nothing left to drive.
               println!("[ERR] {e}");
               return Err(e);
            },
            Err(e) => println!("[ERR] {e}"),
         },
         Err(e) => println!("[ERR] {e}"),
      }
   }

   match session.close().await {
      Ok(()) | Err(BudsError::SessionClosed) => {},
      Err(e) => return Err(e),
   }
   println!("Connection closed");
   Ok(())
}

async fn run_command<T: Transport>(session: &mut Session<T>, command: Command) -> Result<()> {
   match command {
      Command::Pair => {
         println!("[INF] Pairing with device...");
         let metadata = session.pair().await?;
         println!("[INF] Paired with {} successfully!", metadata.name);
         println!("{}", cli::render_battery_status(&metadata.battery));
      },
      Command::SetGameMode(state) => session.set_game_mode(state).await?,
      Command::SetSpatial(state) => session.set_spatial_audio(state).await?,
      Command::SetFunction(side, preset) => session.set_function(side, preset).await?,
      Command::SetEqPreset(preset) => session.set_eq_preset(preset).await?,
   }
   Ok(())
}

async fn read_line(lines: &mut Lines<BufReader<Stdin>>, label: &str) -> Result<String> {
   prompt(label)?;
   lines
      .next_line()
      .await?
      .ok_or_else(|| BudsError::InvalidArgument("no input".into()))
}

fn prompt(label: &str) -> Result<()> {
   use std::io::Write;

   let mut stdout = std::io::stdout();
   stdout.write_all(label.as_bytes())?;
   stdout.flush()?;
   Ok(())
}

//! RFCOMM transport for the earbud link.
//!
//! The device exposes its control protocol on an RFCOMM channel (a serial
//! port profile). This module connects the socket and adapts it to the
//! session's `Transport` trait; the OS-level Bluetooth pairing must already
//! exist.

use std::time::Duration;

use bluer::{
   Address,
   rfcomm::{SocketAddr, Stream},
};
use log::debug;
use tokio::{
   io::{AsyncReadExt, AsyncWriteExt},
   time,
};

use crate::{
   buds::session::Transport,
   error::{BudsError, Result},
};

/// Timeout for connection attempts.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// An open RFCOMM stream to the device.
pub struct RfcommTransport {
   stream: Stream,
}

impl RfcommTransport {
   pub async fn connect(address: Address, channel: u8) -> Result<Self> {
      debug!("Connecting to {address} on RFCOMM channel {channel}");
      let addr = SocketAddr::new(address, channel);
      let stream = time::timeout(CONNECT_TIMEOUT, Stream::connect(addr))
         .await
         .map_err(|_| BudsError::ResponseTimeout)??;
      Ok(Self { stream })
   }
}

impl Transport for RfcommTransport {
   async fn send(&mut self, bytes: &[u8]) -> Result<()> {
      self.stream.write_all(bytes).await?;
      Ok(())
   }

   async fn recv(&mut self, buf: &mut [u8]) -> Result<usize> {
      Ok(self.stream.read(buf).await?)
   }

   async fn close(&mut self) -> Result<()> {
      self.stream.shutdown().await?;
      Ok(())
   }
}

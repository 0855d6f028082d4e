//! Session state machine for one open earbud connection.
//!
//! A `Session` exclusively owns its transport, stamps every outgoing frame
//! from its sequence counter, and gates feature commands behind the
//! three-step pairing handshake. The protocol is strictly half-duplex:
//! every send is followed by one bounded-timeout read before the next
//! command may be issued.

use std::time::Duration;

use log::{debug, info};
use tokio::time;

use crate::{
   buds::{
      codec::{DeviceMetadata, FrameDecoder, LogicalEvent, interpret, parse_pair_metadata},
      protocol::{Command, EqPreset, FnPreset, Frame, OP_PAIR, PairStep, SequenceCounter, Side,
         Toggle, encode_frame},
   },
   error::{BudsError, Result},
};

/// Read buffer size for one transport read.
const READ_BUF_SIZE: usize = 255;

/// Byte-stream duplex channel to the device.
///
/// The real implementation is an RFCOMM stream; tests substitute a
/// scripted in-memory fixture.
#[allow(async_fn_in_trait)]
pub trait Transport {
   async fn send(&mut self, bytes: &[u8]) -> Result<()>;
   async fn recv(&mut self, buf: &mut [u8]) -> Result<usize>;
   async fn close(&mut self) -> Result<()>;
}

/// Handshake progress of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairState {
   Unpaired,
   Pairing(PairStep),
   Paired,
}

/// One open connection to the device.
///
/// Created on a freshly opened transport; unusable after `close` or a
/// fatal transport error. Not shared across threads.
pub struct Session<T: Transport> {
   transport: Option<T>,
   sequence: SequenceCounter,
   decoder: FrameDecoder,
   pair_state: PairState,
   metadata: Option<DeviceMetadata>,
   response_timeout: Duration,
}

impl<T: Transport> Session<T> {
   pub fn new(transport: T, response_timeout: Duration) -> Self {
      Self {
         transport: Some(transport),
         sequence: SequenceCounter::new(),
         decoder: FrameDecoder::new(),
         pair_state: PairState::Unpaired,
         metadata: None,
         response_timeout,
      }
   }

   pub fn pair_state(&self) -> PairState {
      self.pair_state
   }

   pub fn metadata(&self) -> Option<&DeviceMetadata> {
      self.metadata.as_ref()
   }

   /// Runs the three-step pairing handshake.
   ///
   /// Any malformed response, timeout, or transport failure aborts back to
   /// `Unpaired`; a later call restarts from the first step with fresh
   /// sequence values.
   pub async fn pair(&mut self) -> Result<DeviceMetadata> {
      self.ensure_open()?;
      if self.pair_state == PairState::Paired {
         return Err(BudsError::AlreadyPaired);
      }

      match self.handshake().await {
         Ok(metadata) => {
            self.pair_state = PairState::Paired;
            self.metadata = Some(metadata.clone());
            info!("Paired with {}", metadata.name);
            Ok(metadata)
         },
         Err(e) => {
            self.pair_state = PairState::Unpaired;
            Err(e)
         },
      }
   }

   async fn handshake(&mut self) -> Result<DeviceMetadata> {
      let mut metadata = None;
      for step in PairStep::ALL {
         self.pair_state = PairState::Pairing(step);
         debug!("Handshake step {}", step.index());
         let ack = self.exchange(OP_PAIR, step.payload()).await?;
         // The metadata-bearing ack position varies by firmware; accept it
         // on whichever step carries it.
         if let Ok(meta) = parse_pair_metadata(&ack.payload) {
            metadata = Some(meta);
         }
      }
      metadata.ok_or(BudsError::Malformed {
         reason: "handshake completed without device metadata",
      })
   }

   pub async fn set_game_mode(&mut self, state: Toggle) -> Result<()> {
      self.run_feature(Command::SetGameMode(state)).await
   }

   pub async fn set_spatial_audio(&mut self, state: Toggle) -> Result<()> {
      self.run_feature(Command::SetSpatial(state)).await
   }

   /// Remaps the tap functions of one earbud; writes all three tap slots.
   pub async fn set_function(&mut self, side: Side, preset: FnPreset) -> Result<()> {
      self.run_feature(Command::SetFunction(side, preset)).await
   }

   pub async fn set_eq_preset(&mut self, preset: EqPreset) -> Result<()> {
      self.run_feature(Command::SetEqPreset(preset)).await
   }

   /// Shuts the transport down. At most one close ever reaches the
   /// transport; any further use of the session fails with `SessionClosed`.
   pub async fn close(&mut self) -> Result<()> {
      let mut transport = self.transport.take().ok_or(BudsError::SessionClosed)?;
      transport.close().await?;
      info!("Session closed");
      Ok(())
   }

   async fn run_feature(&mut self, command: Command) -> Result<()> {
      self.ensure_open()?;
      if self.pair_state != PairState::Paired {
         return Err(BudsError::NotPaired);
      }
      for (opcode, payload) in command.resolve() {
         self.exchange(opcode, &payload).await?;
      }
      Ok(())
   }

   fn ensure_open(&self) -> Result<()> {
      if self.transport.is_none() {
         return Err(BudsError::SessionClosed);
      }
      Ok(())
   }

   /// Sends one frame and awaits the matching response.
   ///
   /// Transport failures are fatal: the transport is dropped and the
   /// session becomes unusable. A timeout leaves session state untouched;
   /// the caller may retry and the retry consumes a fresh sequence value.
   async fn exchange(&mut self, opcode: u8, payload: &[u8]) -> Result<Frame> {
      let sequence = self.sequence.next();
      let bytes = encode_frame(sequence, opcode, payload)?;

      let transport = self.transport.as_mut().ok_or(BudsError::SessionClosed)?;
      let result = Self::exchange_on(
         transport,
         &mut self.decoder,
         self.response_timeout,
         opcode,
         &bytes,
      )
      .await;
      if matches!(
         result,
         Err(BudsError::Transport(_) | BudsError::ConnectionLost)
      ) {
         self.transport = None;
      }
      result
   }

   async fn exchange_on(
      transport: &mut T,
      decoder: &mut FrameDecoder,
      timeout: Duration,
      opcode: u8,
      bytes: &[u8],
   ) -> Result<Frame> {
      debug!("→ {}", hex::encode(bytes));
      transport.send(bytes).await?;

      loop {
         while let Some(frame) = decoder.next_frame()? {
            if frame.opcode == opcode {
               return Ok(frame);
            }
            match interpret(&frame) {
               LogicalEvent::Unrecognized { opcode: other } => {
                  debug!("Ignoring telemetry frame, opcode {other:#04x}");
               },
               _ => debug!("Ignoring out-of-turn frame, opcode {:#04x}", frame.opcode),
            }
         }

         let mut buf = [0u8; READ_BUF_SIZE];
         let n = time::timeout(timeout, transport.recv(&mut buf))
            .await
            .map_err(|_| BudsError::ResponseTimeout)??;
         if n == 0 {
            return Err(BudsError::ConnectionLost);
         }
         debug!("← {}", hex::encode(&buf[..n]));
         decoder.extend(&buf[..n]);
      }
   }

   #[cfg(test)]
   fn transport_ref(&self) -> Option<&T> {
      self.transport.as_ref()
   }
}

#[cfg(test)]
mod tests {
   use std::{
      cell::RefCell,
      collections::VecDeque,
      future,
      io,
      rc::Rc,
   };

   use super::*;
   use crate::buds::{
      codec::BatteryLevels,
      protocol::{OP_EARBUD_FUNCTION, OP_SOUND_PROFILE, OP_SPATIAL_AUDIO, PAIR_0},
   };

   #[derive(Default)]
   struct MockInner {
      sent: Vec<u8>,
      responses: VecDeque<Vec<u8>>,
      closed: u32,
      fail_send: bool,
   }

   /// Scripted transport; clones share state so tests can inspect traffic
   /// after the session takes ownership.
   #[derive(Clone, Default)]
   struct MockTransport(Rc<RefCell<MockInner>>);

   impl MockTransport {
      fn push_response(&self, bytes: impl Into<Vec<u8>>) {
         self.0.borrow_mut().responses.push_back(bytes.into());
      }

      fn sent_frames(&self) -> Vec<Frame> {
         let mut decoder = FrameDecoder::new();
         decoder.extend(&self.0.borrow().sent);
         let mut frames = Vec::new();
         while let Some(frame) = decoder.next_frame().unwrap() {
            frames.push(frame);
         }
         frames
      }
   }

   impl Transport for MockTransport {
      async fn send(&mut self, bytes: &[u8]) -> Result<()> {
         if self.0.borrow().fail_send {
            return Err(io::Error::from(io::ErrorKind::BrokenPipe).into());
         }
         self.0.borrow_mut().sent.extend_from_slice(bytes);
         Ok(())
      }

      async fn recv(&mut self, buf: &mut [u8]) -> Result<usize> {
         let next = self.0.borrow_mut().responses.pop_front();
         match next {
            Some(bytes) => {
               buf[..bytes.len()].copy_from_slice(&bytes);
               Ok(bytes.len())
            },
            // Nothing scripted: behave like a silent device.
            None => future::pending().await,
         }
      }

      async fn close(&mut self) -> Result<()> {
         self.0.borrow_mut().closed += 1;
         Ok(())
      }
   }

   const TIMEOUT: Duration = Duration::from_secs(2);

   /// Pairing ack payload: batteries 90/85/70, name "TestBuds".
   fn metadata_payload() -> Vec<u8> {
      let mut payload = vec![0x00, 0x00, 90, 85, 70, 0, 0, 0, 0, 0, 0, 0];
      payload.push(8);
      payload.extend_from_slice(b"TestBuds");
      payload
   }

   /// Scripts device-side acks for a successful handshake; the second step
   /// carries the metadata, as in the captured trace.
   fn script_handshake(mock: &MockTransport) {
      mock.push_response(encode_frame(0, OP_PAIR, &[]).unwrap().to_vec());
      mock.push_response(encode_frame(1, OP_PAIR, &metadata_payload()).unwrap().to_vec());
      mock.push_response(encode_frame(2, OP_PAIR, &[]).unwrap().to_vec());
   }

   async fn paired_session(mock: &MockTransport) -> Session<MockTransport> {
      let mut session = Session::new(mock.clone(), TIMEOUT);
      script_handshake(mock);
      session.pair().await.expect("handshake failed");
      session
   }

   #[tokio::test]
   async fn test_full_handshake() {
      let mock = MockTransport::default();
      let session = paired_session(&mock).await;

      assert_eq!(session.pair_state(), PairState::Paired);
      let metadata = session.metadata().expect("metadata missing");
      assert_eq!(metadata.name, "TestBuds");
      assert_eq!(
         metadata.battery,
         BatteryLevels {
            left: 90,
            right: 85,
            case: 70
         }
      );

      let sent = mock.sent_frames();
      assert_eq!(sent.len(), 3);
      assert_eq!(&sent[0].payload[..], PAIR_0);
      let sequences: Vec<u8> = sent.iter().map(|f| f.sequence).collect();
      assert_eq!(sequences, [0, 1, 2]);
   }

   #[tokio::test]
   async fn test_feature_guard_before_pairing() {
      let mock = MockTransport::default();
      let mut session = Session::new(mock.clone(), TIMEOUT);

      let err = session.set_game_mode(Toggle::On).await.unwrap_err();
      assert!(matches!(err, BudsError::NotPaired));
      // The guard fires before the transport sees a single byte.
      assert!(mock.0.borrow().sent.is_empty());
   }

   #[tokio::test]
   async fn test_pair_twice_rejected() {
      let mock = MockTransport::default();
      let mut session = paired_session(&mock).await;
      assert!(matches!(
         session.pair().await,
         Err(BudsError::AlreadyPaired)
      ));
   }

   #[tokio::test]
   async fn test_handshake_abort_and_retry() {
      let mock = MockTransport::default();
      let mut session = Session::new(mock.clone(), TIMEOUT);

      // First attempt: valid step-0 ack, then garbage at step 1.
      mock.push_response(encode_frame(0, OP_PAIR, &[]).unwrap().to_vec());
      mock.push_response(vec![0x40, 0xff, 0xff, 0xff, 0xff]);
      let err = session.pair().await.unwrap_err();
      assert!(matches!(err, BudsError::Malformed { .. }));
      assert_eq!(session.pair_state(), PairState::Unpaired);

      // Retry restarts at the first step with fresh sequence values.
      script_handshake(&mock);
      session.pair().await.expect("retry failed");
      assert_eq!(session.pair_state(), PairState::Paired);

      let sent = mock.sent_frames();
      let sequences: Vec<u8> = sent.iter().map(|f| f.sequence).collect();
      assert_eq!(sequences, [0, 1, 2, 3, 4]);
      assert_eq!(&sent[2].payload[..], PAIR_0);
   }

   #[tokio::test(start_paused = true)]
   async fn test_handshake_timeout_resets_state() {
      let mock = MockTransport::default();
      let mut session = Session::new(mock.clone(), TIMEOUT);

      let err = session.pair().await.unwrap_err();
      assert!(matches!(err, BudsError::ResponseTimeout));
      assert_eq!(session.pair_state(), PairState::Unpaired);
   }

   #[tokio::test(start_paused = true)]
   async fn test_feature_timeout_keeps_paired_state() {
      let mock = MockTransport::default();
      let mut session = paired_session(&mock).await;

      let err = session.set_spatial_audio(Toggle::On).await.unwrap_err();
      assert!(matches!(err, BudsError::ResponseTimeout));
      assert_eq!(session.pair_state(), PairState::Paired);

      // The retry consumes a fresh sequence value.
      mock.push_response(encode_frame(5, OP_SPATIAL_AUDIO, &[]).unwrap().to_vec());
      session.set_spatial_audio(Toggle::On).await.unwrap();
      let sent = mock.sent_frames();
      assert_eq!(sent[sent.len() - 2].sequence + 1, sent[sent.len() - 1].sequence);
   }

   #[tokio::test]
   async fn test_telemetry_skipped_before_ack() {
      let mock = MockTransport::default();
      let mut session = paired_session(&mock).await;

      // One read delivering an undocumented telemetry frame followed by
      // the awaited ack.
      let mut chunk = encode_frame(9, 0x99, &[0xde, 0xad]).unwrap().to_vec();
      chunk.extend_from_slice(&encode_frame(3, OP_SOUND_PROFILE, &[]).unwrap());
      mock.push_response(chunk);

      session.set_eq_preset(EqPreset::Rock).await.unwrap();
   }

   #[tokio::test]
   async fn test_fn_remap_sends_three_frames() {
      let mock = MockTransport::default();
      let mut session = paired_session(&mock).await;

      for seq in 3..6 {
         mock.push_response(encode_frame(seq, OP_EARBUD_FUNCTION, &[]).unwrap().to_vec());
      }
      session.set_function(Side::Left, FnPreset::Volume).await.unwrap();

      let sent = mock.sent_frames();
      assert_eq!(sent.len(), 6); // 3 handshake + 3 tap slots
      assert_eq!(sent[3].payload[0], 1);
      assert_eq!(sent[4].payload[0], 3);
      assert_eq!(sent[5].payload[0], 5);
   }

   #[tokio::test]
   async fn test_close_twice() {
      let mock = MockTransport::default();
      let mut session = paired_session(&mock).await;

      session.close().await.unwrap();
      assert!(matches!(session.close().await, Err(BudsError::SessionClosed)));
      assert_eq!(mock.0.borrow().closed, 1);

      assert!(matches!(
         session.set_game_mode(Toggle::Off).await,
         Err(BudsError::SessionClosed)
      ));
   }

   #[tokio::test]
   async fn test_transport_error_is_fatal() {
      let mock = MockTransport::default();
      let mut session = paired_session(&mock).await;

      mock.0.borrow_mut().fail_send = true;
      let err = session.set_game_mode(Toggle::On).await.unwrap_err();
      assert!(matches!(err, BudsError::Transport(_)));
      assert!(session.transport_ref().is_none());

      // The session is gone for good; even a repaired link is not reused.
      mock.0.borrow_mut().fail_send = false;
      assert!(matches!(
         session.set_game_mode(Toggle::On).await,
         Err(BudsError::SessionClosed)
      ));
   }

   #[tokio::test]
   async fn test_eof_is_connection_lost() {
      let mock = MockTransport::default();
      let mut session = paired_session(&mock).await;

      mock.push_response(Vec::new());
      let err = session.set_game_mode(Toggle::On).await.unwrap_err();
      assert!(matches!(err, BudsError::ConnectionLost));
      assert!(session.transport_ref().is_none());
   }
}

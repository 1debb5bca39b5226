//! Connection session for a single light.
//!
//! The session owns the radio and drives the link through discovery,
//! connection, characteristic resolution and notify subscription. Every
//! failure is converted into a state transition plus an error value; the
//! link is always closed and both channel handles cleared before the session
//! reports `Disconnected`.

use std::{sync::Arc, time::Duration};

use log::{debug, error, info, warn};
use serde::Serialize;
use smol_str::{SmolStr, ToSmolStr};
use tokio::{sync::watch, time};

use crate::{
   bluetooth::{NotificationHandler, Packet, Radio},
   config::ConnectPolicy,
   error::{LightError, Result},
   event::{EventSender, LightEvent},
   light::{
      profile::{self, Channels},
      protocol::ColourCommand,
   },
   shutdown::ShutdownListener,
};

/// Upper bound for unsubscribing or closing a link during teardown
const RELEASE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ConnectionState {
   Disconnected,
   Discovering,
   Connecting,
   ResolvingCharacteristics,
   Subscribing,
   Ready,
   /// Transient: always collapses to `Disconnected` before a call returns.
   Failed,
}

/// Snapshot published on every state transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Status {
   pub connected: bool,
   pub state: ConnectionState,
   pub device: Option<SmolStr>,
}

pub struct Session<R: Radio> {
   radio: R,
   policy: ConnectPolicy,
   events: EventSender,
   shutdown: ShutdownListener,

   state: ConnectionState,
   device: Option<SmolStr>,
   link: Option<R::Link>,
   channels: Option<Channels<R::Channel>>,
   /// Device whose GATT profile failed to resolve; not reconnected implicitly.
   quarantined: Option<SmolStr>,
   status_tx: watch::Sender<Status>,
}

impl<R: Radio> Session<R> {
   pub fn new(
      radio: R,
      policy: ConnectPolicy,
      events: EventSender,
      shutdown: ShutdownListener,
   ) -> Self {
      let (status_tx, _) = watch::channel(Status {
         connected: false,
         state: ConnectionState::Disconnected,
         device: None,
      });
      Self {
         radio,
         policy,
         events,
         shutdown,
         state: ConnectionState::Disconnected,
         device: None,
         link: None,
         channels: None,
         quarantined: None,
         status_tx,
      }
   }

   pub const fn state(&self) -> ConnectionState {
      self.state
   }

   pub fn status_receiver(&self) -> watch::Receiver<Status> {
      self.status_tx.subscribe()
   }

   /// Connects to `device`, or confirms an existing live connection to it.
   ///
   /// An explicit connect also lifts a quarantine left by an earlier
   /// characteristic resolution failure.
   pub async fn connect(&mut self, device: &str) -> Result<()> {
      if self.quarantined.as_deref() == Some(device) {
         info!("{device}: retrying after characteristic resolution failure");
         self.quarantined = None;
      }
      self.ensure_connected(device).await
   }

   /// Sends one colour command, connecting first when needed.
   ///
   /// At most one connect cycle and one write are attempted; a failed write
   /// drops the link and the next call reconnects.
   pub async fn write(&mut self, command: &ColourCommand) -> Result<()> {
      let device = command.device.as_str();
      if !self.is_ready_for(device).await {
         if self.quarantined.as_deref() == Some(device) {
            return Err(LightError::CharacteristicResolution(format!(
               "{device} has an incompatible GATT profile, connect explicitly to retry"
            )));
         }
         self.ensure_connected(device).await?;
      }

      let frame = command.colour.encode();
      let (Some(link), Some(channels)) = (self.link.as_ref(), self.channels.as_ref()) else {
         return Err(LightError::DeviceNotConnected);
      };
      let sending = self.radio.write_command(link, &channels.write, &frame);
      match self.shutdown.guard(sending).await {
         Ok(Ok(())) => {
            debug!("{device}: command sent: {}", command.colour);
            Ok(())
         },
         Ok(Err(e)) => {
            let err = LightError::Write(e.to_string());
            warn!("{device}: {err}");
            self.events.emit(device, LightEvent::DeviceError(err.to_smolstr()));
            self.drop_link().await;
            Err(err)
         },
         Err(cancelled) => Err(self.abort(cancelled).await),
      }
   }

   /// Releases the link. Never fails; a no-op when already disconnected.
   pub async fn disconnect(&mut self) {
      if self.state == ConnectionState::Disconnected && self.link.is_none() {
         debug!("Already disconnected");
         return;
      }
      self.release().await;
      info!("Disconnected from {}", self.device_name());
   }

   /// Brings the session back to a consistent state after a call was dropped
   /// midway. Anything short of a complete `Ready` falls back to
   /// `Disconnected`; a link left open is closed by the next call.
   pub fn recover_interrupted(&mut self) {
      let consistent = match self.state {
         ConnectionState::Disconnected => true,
         ConnectionState::Ready => self.link.is_some() && self.channels.is_some(),
         _ => false,
      };
      if consistent {
         return;
      }

      warn!("{}: call abandoned in state {}", self.device_name(), self.state);
      let was_ready = self.state == ConnectionState::Ready;
      self.channels = None;
      self.transition(ConnectionState::Disconnected);
      if was_ready {
         self.events.emit(self.device_name(), LightEvent::DeviceDisconnected);
      }
   }

   fn device_name(&self) -> &str {
      self.device.as_deref().unwrap_or("<none>")
   }

   fn transition(&mut self, next: ConnectionState) {
      if self.state != next {
         debug!("{}: {} -> {next}", self.device_name(), self.state);
      }
      self.state = next;
      self.status_tx.send_replace(Status {
         connected: next == ConnectionState::Ready,
         state: next,
         device: self.device.clone(),
      });
   }

   async fn is_ready_for(&self, device: &str) -> bool {
      if self.state != ConnectionState::Ready || self.device.as_deref() != Some(device) {
         return false;
      }
      match &self.link {
         Some(link) => self.radio.is_alive(link).await,
         None => false,
      }
   }

   async fn ensure_connected(&mut self, device: &str) -> Result<()> {
      if self.is_ready_for(device).await {
         debug!("{device}: already connected");
         return Ok(());
      }
      if self.link.is_some() || self.state != ConnectionState::Disconnected {
         // Different device, or the link died under us
         self.release().await;
      }

      self.device = Some(device.into());
      match self.establish(device).await {
         Ok(channels) => {
            self.channels = Some(channels);
            self.transition(ConnectionState::Ready);
            info!("{device}: ready");
            self.events.emit(device, LightEvent::DeviceConnected);
            Ok(())
         },
         Err(e) => Err(self.abort(e).await),
      }
   }

   async fn establish(&mut self, device: &str) -> Result<Channels<R::Channel>> {
      self.transition(ConnectionState::Discovering);
      let peer = self.discover(device).await?;

      self.transition(ConnectionState::Connecting);
      self.link = Some(self.open_link(&peer).await?);

      self.transition(ConnectionState::ResolvingCharacteristics);
      let channels = self.resolve_channels().await?;
      self.pause(self.policy.settle_delay).await?;

      self.transition(ConnectionState::Subscribing);
      self.subscribe(device, &peer, channels).await
   }

   async fn discover(&mut self, device: &str) -> Result<R::Peer> {
      let attempts = self.policy.max_attempts;
      for attempt in 1..=attempts {
         info!("Scanning for {device} (attempt {attempt}/{attempts})...");
         let scan = self.radio.discover(device, self.policy.scan_timeout);
         match self.shutdown.guard(scan).await? {
            Ok(Some(peer)) => {
               info!("Found {device}: {peer:?}");
               return Ok(peer);
            },
            Ok(None) => {},
            Err(e) => warn!("Scan for {device} failed: {e}"),
         }
         if attempt < attempts {
            self.pause(self.policy.retry_delay).await?;
         }
      }
      Err(LightError::DeviceNotFound(device.into()))
   }

   async fn open_link(&mut self, peer: &R::Peer) -> Result<R::Link> {
      let limit = self.policy.connect_timeout;
      let opening = time::timeout(limit, self.radio.open(peer));
      match self.shutdown.guard(opening).await? {
         Ok(Ok(link)) => Ok(link),
         Ok(Err(e)) => Err(LightError::Connection(e.to_string())),
         Err(_) => Err(LightError::Connection(format!(
            "no connection within {limit:?}"
         ))),
      }
   }

   async fn resolve_channels(&mut self) -> Result<Channels<R::Channel>> {
      let link = self.link.as_mut().ok_or(LightError::ConnectionClosed)?;
      let listing = self.radio.characteristics(link);
      let characteristics = self
         .shutdown
         .guard(listing)
         .await?
         .map_err(|e| LightError::Connection(e.to_string()))?;
      profile::select_channels(&characteristics)
   }

   async fn subscribe(
      &mut self,
      device: &str,
      peer: &R::Peer,
      mut channels: Channels<R::Channel>,
   ) -> Result<Channels<R::Channel>> {
      let attempts = self.policy.max_attempts.saturating_mul(2);
      let handler = self.notification_handler(device);

      for attempt in 1..=attempts {
         let link = self.link.as_mut().ok_or(LightError::ConnectionClosed)?;
         let subscribing = self.radio.subscribe(link, &channels.notify, handler.clone());
         match self.shutdown.guard(subscribing).await? {
            Ok(()) => {
               info!("{device}: notify subscription successful");
               return Ok(channels);
            },
            Err(e) => {
               warn!("{device}: notify failed (attempt {attempt}/{attempts}): {e}");
            },
         }
         if attempt == attempts {
            break;
         }

         // Fresh link and fresh handles for the next attempt
         self.close_link().await;
         self.pause(self.policy.retry_delay).await?;
         self.link = Some(self.open_link(peer).await?);
         channels = self.resolve_channels().await?;
      }

      Err(LightError::Subscription(format!(
         "gave up after {attempts} attempts"
      )))
   }

   fn notification_handler(&self, device: &str) -> NotificationHandler {
      let events = self.events.clone();
      let device = SmolStr::from(device);
      Arc::new(move |data: &[u8]| {
         events.emit(&device, LightEvent::Notification(Packet::from_slice(data)));
      })
   }

   async fn pause(&mut self, delay: Duration) -> Result<()> {
      if delay.is_zero() {
         return Ok(());
      }
      self.shutdown.guard(time::sleep(delay)).await
   }

   async fn close_link(&mut self) {
      let Some(link) = self.link.take() else {
         return;
      };
      match time::timeout(RELEASE_TIMEOUT, self.radio.close(link)).await {
         Ok(Ok(())) => {},
         Ok(Err(e)) => warn!("{}: failed to close link: {e}", self.device_name()),
         Err(_) => warn!("{}: closing link timed out", self.device_name()),
      }
   }

   /// Terminal failure of a connect: clean up, pass through `Failed`, land in
   /// `Disconnected`.
   async fn abort(&mut self, err: LightError) -> LightError {
      self.channels = None;
      self.close_link().await;
      self.transition(ConnectionState::Failed);
      self.transition(ConnectionState::Disconnected);

      let device = self.device_name().to_smolstr();
      if matches!(err, LightError::Cancelled) {
         info!("{device}: interrupted by shutdown");
         return err;
      }
      if err.is_fatal() {
         error!("{device}: {err}; automatic reconnects suspended");
         self.quarantined = Some(device.clone());
      } else {
         warn!("{device}: {err}");
      }
      self.events.emit(&device, LightEvent::DeviceError(err.to_smolstr()));
      err
   }

   /// Write failure: the link is unusable, go straight to `Disconnected`.
   async fn drop_link(&mut self) {
      self.channels = None;
      self.close_link().await;
      self.transition(ConnectionState::Disconnected);
      self.events.emit(self.device_name(), LightEvent::DeviceDisconnected);
   }

   async fn release(&mut self) {
      let was_ready = self.state == ConnectionState::Ready;
      if let (Some(link), Some(channels)) = (self.link.as_mut(), self.channels.as_ref()) {
         let unsubscribing = self.radio.unsubscribe(link, &channels.notify);
         match time::timeout(RELEASE_TIMEOUT, unsubscribing).await {
            Ok(Ok(())) => {},
            Ok(Err(e)) => debug!("Unsubscribe failed, ignoring: {e}"),
            Err(_) => debug!("Unsubscribe timed out, ignoring"),
         }
      }
      self.channels = None;
      self.close_link().await;
      self.transition(ConnectionState::Disconnected);
      if was_ready {
         self.events.emit(self.device_name(), LightEvent::DeviceDisconnected);
      }
   }
}

#[cfg(test)]
impl<R: Radio> Session<R> {
   pub fn channels(&self) -> Option<&Channels<R::Channel>> {
      self.channels.as_ref()
   }
}

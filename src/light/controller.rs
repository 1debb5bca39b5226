//! Serialized access to the light session.
//!
//! Every caller goes through one async mutex, so at most one connect, write
//! or disconnect touches the radio at a time. The lock is held for exactly
//! one session call and released on every exit path, including when the
//! calling future is dropped; in that case the session is first put back
//! into a consistent state. Waiters are served in FIFO order; there is no
//! queue beyond the lock itself and no coalescing of colour commands.

use std::{
   ops::{Deref, DerefMut},
   sync::Arc,
};

use log::{debug, warn};
use smol_str::SmolStr;
use tokio::sync::{Mutex, MutexGuard, watch};

use crate::{
   bluetooth::Radio,
   error::Result,
   light::{
      protocol::{Colour, ColourCommand},
      session::{Session, Status},
   },
};

pub struct LightController<R: Radio> {
   session: Arc<Mutex<Session<R>>>,
   status: watch::Receiver<Status>,
   default_device: SmolStr,
}

impl<R: Radio> Clone for LightController<R> {
   fn clone(&self) -> Self {
      Self {
         session: self.session.clone(),
         status: self.status.clone(),
         default_device: self.default_device.clone(),
      }
   }
}

/// Session lock held for one call. Dropping it repairs whatever state an
/// abandoned call left behind before the next waiter gets the session.
struct Exclusive<'a, R: Radio>(MutexGuard<'a, Session<R>>);

impl<R: Radio> Deref for Exclusive<'_, R> {
   type Target = Session<R>;

   fn deref(&self) -> &Session<R> {
      &self.0
   }
}

impl<R: Radio> DerefMut for Exclusive<'_, R> {
   fn deref_mut(&mut self) -> &mut Session<R> {
      &mut self.0
   }
}

impl<R: Radio> Drop for Exclusive<'_, R> {
   fn drop(&mut self) {
      self.0.recover_interrupted();
   }
}

impl<R: Radio> LightController<R> {
   pub fn new(session: Session<R>, default_device: impl Into<SmolStr>) -> Self {
      let status = session.status_receiver();
      Self {
         session: Arc::new(Mutex::new(session)),
         status,
         default_device: default_device.into(),
      }
   }

   async fn lock(&self) -> Exclusive<'_, R> {
      Exclusive(self.session.lock().await)
   }

   /// Maps an empty device name to the configured default.
   pub fn resolve_device(&self, device: &str) -> SmolStr {
      if device.is_empty() {
         self.default_device.clone()
      } else {
         device.into()
      }
   }

   /// Connects to `device`. Failures are logged and reported as `false`.
   pub async fn connect(&self, device: &str) -> bool {
      let device = self.resolve_device(device);
      let mut session = self.lock().await;
      match session.connect(&device).await {
         Ok(()) => true,
         Err(e) => {
            warn!("Connect to {device} failed: {e}");
            false
         },
      }
   }

   /// Sends a colour, connecting on demand.
   pub async fn submit_colour(&self, r: u8, g: u8, b: u8, a: u8, device: &str) -> Result<()> {
      let command = ColourCommand::new(Colour::new(r, g, b, a), self.resolve_device(device));
      self.submit(&command).await
   }

   pub async fn submit(&self, command: &ColourCommand) -> Result<()> {
      let mut session = self.lock().await;
      debug!("{}: submitting {}", command.device, command.colour);
      session.write(command).await
   }

   pub async fn disconnect(&self) {
      self.lock().await.disconnect().await;
   }

   /// Current connection status. Never waits for the session lock.
   pub fn status(&self) -> Status {
      self.status.borrow().clone()
   }

   pub fn is_connected(&self) -> bool {
      self.status.borrow().connected
   }
}

//! Bluetooth LE transport layer for the light.
//!
//! This module defines the [`Radio`] seam the session drives, the GATT
//! capability model used for characteristic selection, and the BlueZ
//! implementation in [`gatt`].

use std::{fmt, future::Future, sync::Arc, time::Duration};

use smallvec::SmallVec;
use uuid::Uuid;

use crate::error::Result;

#[cfg(test)]
pub mod fake;
pub mod gatt;

pub type Packet = SmallVec<[u8; 32]>;

/// Callback invoked for every notification packet the device pushes.
///
/// Runs on the notification delivery task; it must not block or call back
/// into the command path.
pub type NotificationHandler = Arc<dyn Fn(&[u8]) + Send + Sync>;

/// A single GATT characteristic property.
#[derive(
   Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::EnumIter, strum::IntoStaticStr,
)]
#[repr(u8)]
pub enum Capability {
   #[strum(serialize = "broadcast")]
   Broadcast,
   #[strum(serialize = "read")]
   Read,
   #[strum(serialize = "write-without-response")]
   WriteWithoutResponse,
   #[strum(serialize = "write")]
   Write,
   #[strum(serialize = "notify")]
   Notify,
   #[strum(serialize = "indicate")]
   Indicate,
   #[strum(serialize = "authenticated-signed-writes")]
   SignedWrite,
   #[strum(serialize = "extended-properties")]
   ExtendedProperties,
}

impl Capability {
   const fn mask(self) -> u16 {
      1 << self as u8
   }
}

/// Set of [`Capability`] flags exposed by one characteristic.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct Capabilities(u16);

impl Capabilities {
   pub const fn empty() -> Self {
      Self(0)
   }

   #[must_use]
   pub const fn with(self, cap: Capability) -> Self {
      Self(self.0 | cap.mask())
   }

   pub const fn contains(self, cap: Capability) -> bool {
      self.0 & cap.mask() != 0
   }

   /// True when `cap` is the one and only capability in the set.
   pub const fn is_only(self, cap: Capability) -> bool {
      self.0 == cap.mask()
   }

   pub fn iter(self) -> impl Iterator<Item = Capability> {
      use strum::IntoEnumIterator;
      Capability::iter().filter(move |cap| self.contains(*cap))
   }
}

impl FromIterator<Capability> for Capabilities {
   fn from_iter<I: IntoIterator<Item = Capability>>(iter: I) -> Self {
      iter.into_iter().fold(Self::empty(), Self::with)
   }
}

impl fmt::Display for Capabilities {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      f.write_str("{")?;
      for (i, cap) in self.iter().enumerate() {
         if i > 0 {
            f.write_str(", ")?;
         }
         let name: &'static str = cap.into();
         f.write_str(name)?;
      }
      f.write_str("}")
   }
}

impl fmt::Debug for Capabilities {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      fmt::Display::fmt(self, f)
   }
}

/// One characteristic as enumerated from an open link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharacteristicInfo<C> {
   pub channel: C,
   pub uuid: Uuid,
   pub capabilities: Capabilities,
}

/// Radio operations the session needs from a BLE stack.
///
/// The radio is not safe for concurrent use; callers serialize every
/// operation. Channel handles are only meaningful on the link that produced
/// them.
pub trait Radio: Send + Sync + 'static {
   /// A discovered, not yet connected device.
   type Peer: Clone + fmt::Debug + Send + Sync;
   /// An open connection to a peer.
   type Link: Send + Sync;
   /// Opaque handle to a characteristic on a specific link.
   type Channel: Clone + PartialEq + fmt::Debug + Send + Sync;

   /// Scans for up to `window` for a device advertising `name`.
   ///
   /// Only devices heard advertising during this scan are returned; a device
   /// the stack merely remembers from an earlier session is not a match.
   fn discover(
      &mut self,
      name: &str,
      window: Duration,
   ) -> impl Future<Output = Result<Option<Self::Peer>>> + Send;

   fn open(&mut self, peer: &Self::Peer) -> impl Future<Output = Result<Self::Link>> + Send;

   /// Enumerates every characteristic of every service, in a stable order.
   fn characteristics(
      &mut self,
      link: &mut Self::Link,
   ) -> impl Future<Output = Result<Vec<CharacteristicInfo<Self::Channel>>>> + Send;

   fn subscribe(
      &mut self,
      link: &mut Self::Link,
      channel: &Self::Channel,
      handler: NotificationHandler,
   ) -> impl Future<Output = Result<()>> + Send;

   fn unsubscribe(
      &mut self,
      link: &mut Self::Link,
      channel: &Self::Channel,
   ) -> impl Future<Output = Result<()>> + Send;

   /// Sends `data` without asking the peer for an acknowledgement.
   fn write_command(
      &mut self,
      link: &Self::Link,
      channel: &Self::Channel,
      data: &[u8],
   ) -> impl Future<Output = Result<()>> + Send;

   fn is_alive(&self, link: &Self::Link) -> impl Future<Output = bool> + Send;

   fn close(&mut self, link: Self::Link) -> impl Future<Output = Result<()>> + Send;
}

#[cfg(test)]
mod tests {
   use super::*;

   #[test]
   fn test_capabilities_only() {
      let notify = Capabilities::empty().with(Capability::Notify);
      assert!(notify.is_only(Capability::Notify));
      assert!(!notify.is_only(Capability::Read));

      let notify_read = notify.with(Capability::Read);
      assert!(notify_read.contains(Capability::Notify));
      assert!(!notify_read.is_only(Capability::Notify));
      assert!(!Capabilities::empty().is_only(Capability::Notify));
   }

   #[test]
   fn test_capabilities_display() {
      let caps: Capabilities = [Capability::Notify, Capability::WriteWithoutResponse]
         .into_iter()
         .collect();
      assert_eq!(caps.to_string(), "{write-without-response, notify}");
      assert_eq!(Capabilities::empty().to_string(), "{}");
   }
}

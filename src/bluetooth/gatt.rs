//! BlueZ GATT client implementation of [`Radio`].
//!
//! Discovery runs through the adapter's discovery session and only reports
//! devices heard advertising during it. Links are plain LE connections, and
//! each notify subscription gets its own forwarding task owned by the link.

use std::{collections::HashMap, pin::pin, time::Duration};

use bluer::{
   Adapter, AdapterEvent, Address, Device, Session,
   gatt::{
      CharacteristicFlags, WriteOp,
      remote::{Characteristic, CharacteristicWriteRequest},
   },
};
use futures::StreamExt;
use log::{debug, info, warn};
use tokio::{sync::oneshot, task::JoinSet, time};

use crate::{
   bluetooth::{Capabilities, Capability, CharacteristicInfo, NotificationHandler, Radio},
   error::{LightError, Result},
};

/// Upper bound for BlueZ to finish service discovery after connecting
const SERVICES_RESOLVE_TIMEOUT: Duration = Duration::from_secs(10);
/// Poll interval while waiting for service discovery
const SERVICES_POLL_INTERVAL: Duration = Duration::from_millis(100);
/// Timeout for enabling notifications
const SUBSCRIBE_TIMEOUT: Duration = Duration::from_secs(10);
/// Timeout for write operations
const WRITE_TIMEOUT: Duration = Duration::from_secs(5);
/// How often cached name matches are rechecked for a live advertisement
const RSSI_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Handle to one characteristic on one [`GattLink`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GattChannel {
   generation: u64,
   service: u16,
   characteristic: u16,
}

/// An open LE connection plus the characteristics resolved on it.
pub struct GattLink {
   device: Device,
   generation: u64,
   characteristics: HashMap<GattChannel, Characteristic>,
   notify: JoinSet<()>,
}

impl GattLink {
   fn characteristic(&self, channel: &GattChannel) -> Result<&Characteristic> {
      if channel.generation != self.generation {
         return Err(LightError::StaleChannel);
      }
      self
         .characteristics
         .get(channel)
         .ok_or(LightError::StaleChannel)
   }
}

impl Drop for GattLink {
   fn drop(&mut self) {
      self.notify.abort_all();
   }
}

/// Disconnects a half-opened device if `open` is abandoned midway.
struct ConnectGuard {
   device: Device,
   armed: bool,
}

impl ConnectGuard {
   fn new(device: Device) -> Self {
      Self {
         device,
         armed: true,
      }
   }

   fn disarm(mut self) -> Device {
      self.armed = false;
      self.device.clone()
   }
}

impl Drop for ConnectGuard {
   fn drop(&mut self) {
      if !self.armed {
         return;
      }
      let device = self.device.clone();
      tokio::spawn(async move {
         if let Err(e) = device.disconnect().await {
            debug!("{}: cleanup disconnect failed: {e}", device.address());
         }
      });
   }
}

/// BLE radio backed by a BlueZ adapter.
pub struct BluezRadio {
   _session: Session,
   adapter: Adapter,
   generation: u64,
}

impl BluezRadio {
   /// Opens the named adapter, or the default one, and powers it on.
   pub async fn new(adapter_name: Option<&str>) -> Result<Self> {
      let session = Session::new().await?;
      let adapter = match adapter_name {
         Some(name) => session.adapter(name)?,
         None => session.default_adapter().await?,
      };
      let name = adapter.name().to_string();

      // Ensure adapter is powered on
      if let Ok(powered) = adapter.is_powered().await
         && !powered
      {
         if let Err(e) = adapter.set_powered(true).await {
            warn!("Failed to power on adapter {name}: {e}");
            return Err(LightError::AdapterNotAvailable(name.into()));
         }
         info!("Powered on adapter: {name}");
      }

      info!("Using adapter: {name}");
      Ok(Self {
         _session: session,
         adapter,
         generation: 0,
      })
   }

   async fn sighting(device: &Device, name: &str) -> Sighting {
      let matches = Self::matches_name(device, name).await;
      let rssi = if matches {
         device.rssi().await.ok().flatten()
      } else {
         None
      };
      Sighting::classify(matches, rssi)
   }

   async fn matches_name(device: &Device, name: &str) -> bool {
      if let Ok(Some(advertised)) = device.name().await
         && advertised == name
      {
         return true;
      }
      device.alias().await.is_ok_and(|alias| alias == name)
   }
}

/// What a scan learned about one device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Sighting {
   Other,
   /// Name matches, but BlueZ only knows it from an earlier session.
   Cached,
   /// Name matches and the device is advertising right now.
   Live,
}

impl Sighting {
   /// BlueZ reports an RSSI only for devices heard during the current
   /// discovery session.
   const fn classify(name_matches: bool, rssi: Option<i16>) -> Self {
      match (name_matches, rssi) {
         (false, _) => Self::Other,
         (true, None) => Self::Cached,
         (true, Some(_)) => Self::Live,
      }
   }
}

fn capabilities_from_flags(flags: &CharacteristicFlags) -> Capabilities {
   [
      (flags.broadcast, Capability::Broadcast),
      (flags.read, Capability::Read),
      (flags.write_without_response, Capability::WriteWithoutResponse),
      (flags.write, Capability::Write),
      (flags.notify, Capability::Notify),
      (flags.indicate, Capability::Indicate),
      (flags.authenticated_signed_writes, Capability::SignedWrite),
      (flags.extended_properties, Capability::ExtendedProperties),
   ]
   .into_iter()
   .filter_map(|(set, cap)| set.then_some(cap))
   .collect()
}

impl Radio for BluezRadio {
   type Peer = Device;
   type Link = GattLink;
   type Channel = GattChannel;

   async fn discover(&mut self, name: &str, window: Duration) -> Result<Option<Device>> {
      debug!("Scanning {} for {name}", self.adapter.name());
      let events = self.adapter.discover_devices().await?;
      let mut events = pin!(events);

      let adapter = &self.adapter;
      let scan = async {
         // Cached devices are announced up front; they only count once heard.
         let mut cached: Vec<Device> = Vec::new();
         let mut poll = time::interval(RSSI_POLL_INTERVAL);
         loop {
            tokio::select! {
               event = events.next() => {
                  let Some(event) = event else {
                     return None;
                  };
                  let AdapterEvent::DeviceAdded(addr) = event else {
                     continue;
                  };
                  let Ok(device) = adapter.device(addr) else {
                     continue;
                  };
                  match Self::sighting(&device, name).await {
                     Sighting::Live => return Some(device),
                     Sighting::Cached => {
                        debug!("{addr}: {name} is cached, waiting for an advertisement");
                        cached.push(device);
                     },
                     Sighting::Other => {},
                  }
               },
               _ = poll.tick() => {
                  for device in &cached {
                     if Self::sighting(device, name).await == Sighting::Live {
                        return Some(device.clone());
                     }
                  }
               },
            }
         }
      };

      // Dropping the event stream ends the discovery session.
      Ok(time::timeout(window, scan).await.unwrap_or(None))
   }

   async fn open(&mut self, device: &Device) -> Result<GattLink> {
      let addr = device.address();
      debug!("Connecting to {addr}");

      let guard = ConnectGuard::new(device.clone());
      if !device.is_connected().await? {
         device.connect().await?;
      }

      time::timeout(SERVICES_RESOLVE_TIMEOUT, async {
         while !device.is_services_resolved().await? {
            time::sleep(SERVICES_POLL_INTERVAL).await;
         }
         Ok::<_, LightError>(())
      })
      .await
      .map_err(|_| LightError::RequestTimeout)??;

      self.generation += 1;
      info!("Connected to {addr} (link #{})", self.generation);
      Ok(GattLink {
         device: guard.disarm(),
         generation: self.generation,
         characteristics: HashMap::new(),
         notify: JoinSet::new(),
      })
   }

   async fn characteristics(
      &mut self,
      link: &mut GattLink,
   ) -> Result<Vec<CharacteristicInfo<GattChannel>>> {
      let addr = link.device.address();
      link.characteristics.clear();

      // BlueZ hands services out in object-path order; sort by handle so
      // selection never depends on D-Bus enumeration order.
      let mut services = link.device.services().await?;
      services.sort_by_key(|s| s.id());

      let mut found = Vec::new();
      for service in services {
         let mut characteristics = service.characteristics().await?;
         characteristics.sort_by_key(|c| c.id());
         for characteristic in characteristics {
            let channel = GattChannel {
               generation: link.generation,
               service: service.id(),
               characteristic: characteristic.id(),
            };
            let uuid = characteristic.uuid().await?;
            let capabilities = capabilities_from_flags(&characteristic.flags().await?);
            debug!("{addr}: characteristic {uuid} {capabilities}");

            found.push(CharacteristicInfo {
               channel,
               uuid,
               capabilities,
            });
            link.characteristics.insert(channel, characteristic);
         }
      }
      Ok(found)
   }

   async fn subscribe(
      &mut self,
      link: &mut GattLink,
      channel: &GattChannel,
      handler: NotificationHandler,
   ) -> Result<()> {
      let characteristic = link.characteristic(channel)?.clone();
      let (ready_tx, ready_rx) = oneshot::channel();
      link.notify.spawn(notify_thread(
         link.device.address(),
         characteristic,
         handler,
         ready_tx,
      ));

      time::timeout(SUBSCRIBE_TIMEOUT, ready_rx)
         .await
         .map_err(|_| LightError::RequestTimeout)?
         .map_err(|_| LightError::ConnectionClosed)?
   }

   async fn unsubscribe(&mut self, link: &mut GattLink, channel: &GattChannel) -> Result<()> {
      link.characteristic(channel)?;
      // BlueZ stops notifying once the last stream is dropped.
      link.notify.abort_all();
      while link.notify.join_next().await.is_some() {}
      Ok(())
   }

   async fn write_command(
      &mut self,
      link: &GattLink,
      channel: &GattChannel,
      data: &[u8],
   ) -> Result<()> {
      let characteristic = link.characteristic(channel)?;
      debug!("→ {}: {}", link.device.address(), hex::encode(data));

      let mut request = CharacteristicWriteRequest::default();
      request.op_type = WriteOp::Command;
      time::timeout(WRITE_TIMEOUT, characteristic.write_ext(data, &request))
         .await
         .map_err(|_| LightError::RequestTimeout)??;
      Ok(())
   }

   async fn is_alive(&self, link: &GattLink) -> bool {
      link.device.is_connected().await.unwrap_or(false)
   }

   async fn close(&mut self, mut link: GattLink) -> Result<()> {
      link.notify.abort_all();
      let addr = link.device.address();
      if link.device.is_connected().await.unwrap_or(false) {
         link.device.disconnect().await?;
      }
      debug!("Closed link #{} to {addr}", link.generation);
      Ok(())
   }
}

async fn notify_thread(
   adr: Address,
   characteristic: Characteristic,
   handler: NotificationHandler,
   ready: oneshot::Sender<Result<()>>,
) {
   let stream = match characteristic.notify().await {
      Ok(stream) => {
         let _ = ready.send(Ok(()));
         stream
      },
      Err(e) => {
         let _ = ready.send(Err(e.into()));
         return;
      },
   };

   let mut stream = pin!(stream);
   while let Some(value) = stream.next().await {
      debug!("← {adr}: {}", hex::encode(&value));
      handler(&value);
   }
   debug!("{adr}: notification stream ended");
}

#[cfg(test)]
mod tests {
   use super::*;

   #[test]
   fn test_cached_device_is_not_a_sighting() {
      assert_eq!(Sighting::classify(true, None), Sighting::Cached);
      assert_eq!(Sighting::classify(true, Some(-71)), Sighting::Live);
      assert_eq!(Sighting::classify(false, Some(-40)), Sighting::Other);
      assert_eq!(Sighting::classify(false, None), Sighting::Other);
   }

   #[test]
   fn test_capabilities_from_flags() {
      let mut flags = CharacteristicFlags::default();
      flags.notify = true;
      assert!(capabilities_from_flags(&flags).is_only(Capability::Notify));

      let mut flags = CharacteristicFlags::default();
      flags.write = true;
      flags.write_without_response = true;
      let caps = capabilities_from_flags(&flags);
      assert!(caps.contains(Capability::WriteWithoutResponse));
      assert!(caps.contains(Capability::Write));
      assert!(!caps.contains(Capability::Notify));
   }
}

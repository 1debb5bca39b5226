//! Scripted in-memory [`Radio`] for tests.
//!
//! Every operation is recorded with its start and end instant, every open
//! produces a fresh link id, and channels carry the id of the link they were
//! resolved on.

use std::{
   collections::HashSet,
   io,
   sync::{
      Arc,
      atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
   },
   time::Duration,
};

use parking_lot::Mutex;
use tokio::time::{self, Instant};
use uuid::Uuid;

use crate::{
   bluetooth::{Capabilities, Capability, CharacteristicInfo, NotificationHandler, Radio},
   error::{LightError, Result},
};

pub const WRITE_UUID: Uuid = Uuid::from_u128(0x0000fff3_0000_1000_8000_00805f9b34fb);
pub const NOTIFY_UUID: Uuid = Uuid::from_u128(0x0000fff4_0000_1000_8000_00805f9b34fb);
pub const NAME_UUID: Uuid = Uuid::from_u128(0x00002a00_0000_1000_8000_00805f9b34fb);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
   Discover(String),
   Open(u64),
   Characteristics(u64),
   Subscribe(u64),
   Unsubscribe(u64),
   Write(u64, Vec<u8>),
   Close(u64),
}

#[derive(Debug, Clone)]
pub struct CallRecord {
   pub call: Call,
   pub started: Instant,
   pub finished: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FakeLink {
   pub id: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FakeChannel {
   pub link: u64,
   pub index: usize,
}

/// Behaviour the fake follows, adjustable between operations.
pub struct Script {
   /// 1-based scan on which the device shows up; `None` means never.
   pub found_on_scan: Option<usize>,
   pub open_failures: usize,
   pub subscribe_failures: usize,
   pub write_failures: usize,
   pub unsubscribe_fails: bool,
   pub profile: Vec<(Uuid, Capabilities)>,
   /// Simulated latency of every operation.
   pub latency: Duration,
   scans: usize,
}

impl Default for Script {
   fn default() -> Self {
      Self {
         found_on_scan: Some(1),
         open_failures: 0,
         subscribe_failures: 0,
         write_failures: 0,
         unsubscribe_fails: false,
         profile: light_profile(),
         latency: Duration::ZERO,
         scans: 0,
      }
   }
}

/// Layout of the stock light: a name characteristic, the command
/// characteristic and a notify-only status characteristic.
pub fn light_profile() -> Vec<(Uuid, Capabilities)> {
   vec![
      (NAME_UUID, Capabilities::empty().with(Capability::Read)),
      (
         WRITE_UUID,
         Capabilities::empty()
            .with(Capability::WriteWithoutResponse)
            .with(Capability::Write),
      ),
      (NOTIFY_UUID, Capabilities::empty().with(Capability::Notify)),
   ]
}

#[derive(Default)]
struct Inner {
   script: Mutex<Script>,
   calls: Mutex<Vec<CallRecord>>,
   handler: Mutex<Option<NotificationHandler>>,
   dead_links: Mutex<HashSet<u64>>,
   next_link: AtomicU64,
   busy: AtomicBool,
   overlaps: AtomicUsize,
}

#[derive(Clone, Default)]
pub struct FakeRadio {
   inner: Arc<Inner>,
}

impl FakeRadio {
   pub fn new() -> Self {
      Self::default()
   }

   pub fn script(&self) -> parking_lot::MutexGuard<'_, Script> {
      self.inner.script.lock()
   }

   pub fn calls(&self) -> Vec<Call> {
      self.inner.calls.lock().iter().map(|r| r.call.clone()).collect()
   }

   pub fn records(&self) -> Vec<CallRecord> {
      self.inner.calls.lock().clone()
   }

   pub fn clear_calls(&self) {
      self.inner.calls.lock().clear();
   }

   pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
      self.inner.calls.lock().iter().filter(|r| pred(&r.call)).count()
   }

   /// Number of times an operation started while another was in flight.
   pub fn overlaps(&self) -> usize {
      self.inner.overlaps.load(Ordering::SeqCst)
   }

   /// Simulates the peer dropping the connection.
   pub fn drop_link(&self, id: u64) {
      self.inner.dead_links.lock().insert(id);
   }

   /// Delivers a notification through the registered handler.
   pub fn push_notification(&self, data: &[u8]) -> bool {
      let handler = self.inner.handler.lock().clone();
      handler.map(|h| h(data)).is_some()
   }

   async fn track<T>(&self, call: Call, op: impl FnOnce(&mut Script) -> Result<T>) -> Result<T> {
      let started = Instant::now();
      if self.inner.busy.swap(true, Ordering::SeqCst) {
         self.inner.overlaps.fetch_add(1, Ordering::SeqCst);
      }

      let latency = self.inner.script.lock().latency;
      if !latency.is_zero() {
         time::sleep(latency).await;
      }
      let out = op(&mut self.inner.script.lock());

      self.inner.busy.store(false, Ordering::SeqCst);
      self.inner.calls.lock().push(CallRecord {
         call,
         started,
         finished: Instant::now(),
      });
      out
   }
}

fn consume(counter: &mut usize) -> bool {
   if *counter > 0 {
      *counter -= 1;
      true
   } else {
      false
   }
}

impl Radio for FakeRadio {
   type Peer = String;
   type Link = FakeLink;
   type Channel = FakeChannel;

   async fn discover(&mut self, name: &str, _window: Duration) -> Result<Option<String>> {
      self
         .track(Call::Discover(name.to_string()), |script| {
            script.scans += 1;
            let found = script.found_on_scan.is_some_and(|n| script.scans >= n);
            Ok(found.then(|| name.to_string()))
         })
         .await
   }

   async fn open(&mut self, _peer: &String) -> Result<FakeLink> {
      let id = self.inner.next_link.fetch_add(1, Ordering::SeqCst) + 1;
      self
         .track(Call::Open(id), |script| {
            if consume(&mut script.open_failures) {
               Err(LightError::Io(io::Error::new(
                  io::ErrorKind::ConnectionRefused,
                  "le-connection-abort-by-local",
               )))
            } else {
               Ok(FakeLink { id })
            }
         })
         .await
   }

   async fn characteristics(
      &mut self,
      link: &mut FakeLink,
   ) -> Result<Vec<CharacteristicInfo<FakeChannel>>> {
      let id = link.id;
      self
         .track(Call::Characteristics(id), |script| {
            Ok(script
               .profile
               .iter()
               .enumerate()
               .map(|(index, (uuid, capabilities))| CharacteristicInfo {
                  channel: FakeChannel { link: id, index },
                  uuid: *uuid,
                  capabilities: *capabilities,
               })
               .collect())
         })
         .await
   }

   async fn subscribe(
      &mut self,
      link: &mut FakeLink,
      channel: &FakeChannel,
      handler: NotificationHandler,
   ) -> Result<()> {
      if channel.link != link.id {
         return Err(LightError::StaleChannel);
      }
      let subscribed = self
         .track(Call::Subscribe(link.id), |script| {
            if consume(&mut script.subscribe_failures) {
               Err(LightError::RequestTimeout)
            } else {
               Ok(())
            }
         })
         .await;
      if subscribed.is_ok() {
         *self.inner.handler.lock() = Some(handler);
      }
      subscribed
   }

   async fn unsubscribe(&mut self, link: &mut FakeLink, _channel: &FakeChannel) -> Result<()> {
      self.inner.handler.lock().take();
      self
         .track(Call::Unsubscribe(link.id), |script| {
            if script.unsubscribe_fails {
               Err(LightError::ConnectionClosed)
            } else {
               Ok(())
            }
         })
         .await
   }

   async fn write_command(
      &mut self,
      link: &FakeLink,
      channel: &FakeChannel,
      data: &[u8],
   ) -> Result<()> {
      if channel.link != link.id {
         return Err(LightError::StaleChannel);
      }
      self
         .track(Call::Write(link.id, data.to_vec()), |script| {
            if consume(&mut script.write_failures) {
               Err(LightError::ConnectionClosed)
            } else {
               Ok(())
            }
         })
         .await
   }

   async fn is_alive(&self, link: &FakeLink) -> bool {
      !self.inner.dead_links.lock().contains(&link.id)
   }

   async fn close(&mut self, link: FakeLink) -> Result<()> {
      self.inner.handler.lock().take();
      self.track(Call::Close(link.id), |_| Ok(())).await
   }
}

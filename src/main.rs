//! BLE colour light relay daemon.
//!
//! Keeps a GATT session to an ELK-BLEDDM style LED controller and exposes
//! colour commands, connection control and device notifications on the
//! D-Bus session bus.

use std::{sync::Arc, time::Duration};

use crossbeam::queue::SegQueue;
use log::{info, warn};
use smol_str::SmolStr;
use tokio::{signal, sync::Notify, time};
use zbus::{Connection, connection, object_server::InterfaceRef};

use bluetooth::gatt::BluezRadio;
use dbus::LightService;
use event::{EventBus, LightEvent};
use light::{controller::LightController, session::Session};
use shutdown::Shutdown;

mod bluetooth;
mod config;
mod dbus;
mod error;
mod event;
mod light;
mod shutdown;

use crate::{dbus::LightServiceSignals, error::Result};

const OBJECT_PATH: &str = "/org/ledrelay/light";

#[tokio::main]
async fn main() -> Result<()> {
   env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

   info!("Starting ledrelay D-Bus service...");

   let config = config::Config::load()?;
   info!(
      "Loaded configuration for {} ({} connect tries)",
      config.device_name, config.max_connect_tries
   );

   let event_bus = EventProcessor::new();
   let shutdown = Shutdown::new();

   let radio = BluezRadio::new(config.adapter.as_deref()).await?;
   let session = Session::new(
      radio,
      config.connect_policy(),
      event_bus.clone(),
      shutdown.listener(),
   );
   let controller = LightController::new(session, config.device_name.as_str());

   let connection = connection::Builder::session()?
      .name("org.ledrelay")?
      .serve_at(OBJECT_PATH, LightService::new(controller.clone()))?
      .build()
      .await?;

   info!("ledrelay D-Bus service started at org.ledrelay");

   event_bus.spawn_dispatcher(connection).await?;

   if config.connect_on_startup {
      let controller = controller.clone();
      let listener = shutdown.listener();
      tokio::spawn(async move {
         if !controller.connect("").await && !listener.is_triggered() {
            warn!("Startup connection failed; will connect on the first command");
         }
      });
   }

   signal::ctrl_c().await?;
   info!("Shutting down ledrelay service...");
   shutdown.trigger();
   controller.disconnect().await;

   Ok(())
}

struct EventProcessor {
   queue: SegQueue<(SmolStr, LightEvent)>,
   notifier: Notify,
}

impl EventProcessor {
   fn new() -> Arc<Self> {
      Arc::new(Self {
         queue: SegQueue::new(),
         notifier: Notify::new(),
      })
   }

   async fn recv(self: &Arc<Self>) -> Option<(SmolStr, LightEvent)> {
      loop {
         if let Some(event) = self.queue.pop() {
            return Some(event);
         }
         let notify = self.notifier.notified();
         if let Some(event) = self.queue.pop() {
            return Some(event);
         }
         if Arc::strong_count(self) == 1 {
            return None;
         }
         let _ = time::timeout(Duration::from_secs(1), notify).await;
      }
   }

   async fn dispatch(
      &self,
      iface: &InterfaceRef<LightService>,
      (device, event): (SmolStr, LightEvent),
   ) -> Result<()> {
      match event {
         LightEvent::DeviceConnected => {
            iface.device_connected(&device).await?;
            iface.get().await.connected_changed(iface.signal_emitter()).await?;
         },
         LightEvent::DeviceDisconnected => {
            iface.device_disconnected(&device).await?;
            iface.get().await.connected_changed(iface.signal_emitter()).await?;
         },
         LightEvent::DeviceError(reason) => {
            iface.device_error(&device, &reason).await?;
         },
         LightEvent::Notification(packet) => {
            let payload = hex::encode(&packet);
            info!("{device}: notification {payload}");
            iface.notification(&device, &payload).await?;
         },
      }
      Ok(())
   }

   async fn spawn_dispatcher(self: Arc<Self>, connection: Connection) -> Result<()> {
      let iface = connection
         .object_server()
         .interface::<_, LightService>(OBJECT_PATH)
         .await?;
      tokio::spawn(async move {
         while let Some(event) = self.recv().await {
            if let Err(e) = self.dispatch(&iface, event).await {
               warn!("Error dispatching event: {e}");
            }
         }
      });

      Ok(())
   }
}

impl EventBus for EventProcessor {
   fn emit(&self, device: &str, event: LightEvent) {
      self.queue.push((device.into(), event));
      self.notifier.notify_waiters();
   }
}

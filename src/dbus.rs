use log::info;
use zbus::{interface, object_server::SignalEmitter};

use crate::{bluetooth::gatt::BluezRadio, light::controller::LightController};

pub struct LightService {
   controller: LightController<BluezRadio>,
}

impl LightService {
   pub const fn new(controller: LightController<BluezRadio>) -> Self {
      Self { controller }
   }
}

#[interface(name = "org.ledrelay.Light")]
impl LightService {
   async fn connect(&self, device: String) -> bool {
      self.controller.connect(&device).await
   }

   async fn set_colour(
      &self,
      r: u8,
      g: u8,
      b: u8,
      a: u8,
      device: String,
   ) -> zbus::fdo::Result<bool> {
      self
         .controller
         .submit_colour(r, g, b, a, &device)
         .await
         .map_err(|e| zbus::fdo::Error::Failed(e.to_string()))?;
      Ok(true)
   }

   async fn disconnect(&self) {
      self.controller.disconnect().await;
      info!("Disconnect requested over D-Bus");
   }

   async fn status(&self) -> zbus::fdo::Result<String> {
      serde_json::to_string(&self.controller.status())
         .map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
   }

   // Signals
   #[zbus(signal)]
   pub async fn device_connected(emitter: &SignalEmitter<'_>, device: &str) -> zbus::Result<()>;

   #[zbus(signal)]
   pub async fn device_disconnected(emitter: &SignalEmitter<'_>, device: &str)
   -> zbus::Result<()>;

   #[zbus(signal)]
   pub async fn notification(
      emitter: &SignalEmitter<'_>,
      device: &str,
      payload: &str,
   ) -> zbus::Result<()>;

   #[zbus(signal)]
   pub async fn device_error(
      emitter: &SignalEmitter<'_>,
      device: &str,
      reason: &str,
   ) -> zbus::Result<()>;

   #[zbus(property)]
   async fn connected(&self) -> bool {
      self.controller.is_connected()
   }
}

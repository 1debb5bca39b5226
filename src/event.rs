//! Event handling system for light status updates.
//!
//! This module provides the event infrastructure for notifying about
//! connection changes, device notifications and failed commands.

use std::sync::Arc;

use smol_str::SmolStr;

use crate::bluetooth::Packet;

/// Events that can be emitted by the light relay service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LightEvent {
   DeviceConnected,
   DeviceDisconnected,
   DeviceError(SmolStr),
   Notification(Packet),
}

/// Trait for implementing event emission.
///
/// Implementations must not block: `emit` is called from the notification
/// delivery path and from inside the command lock.
pub trait EventBus: Send + Sync {
   /// Emits an event for the device with the given advertised name.
   fn emit(&self, device: &str, event: LightEvent);
}

/// Type alias for a thread-safe event sender.
pub type EventSender = Arc<dyn EventBus>;

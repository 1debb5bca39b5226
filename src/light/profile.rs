//! Selection of the command and notification characteristics.
//!
//! The light exposes one notify-only characteristic for status packets and
//! one or more characteristics accepting writes without response. When
//! several accept such writes, the first in enumeration order is used.

use log::debug;

use crate::{
   bluetooth::{Capability, CharacteristicInfo},
   error::{LightError, Result},
};

/// The two channels a ready session needs, always held together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Channels<C> {
   pub write: C,
   pub notify: C,
}

pub fn select_channels<C: Clone>(
   characteristics: &[CharacteristicInfo<C>],
) -> Result<Channels<C>> {
   let mut notify_only = characteristics
      .iter()
      .filter(|c| c.capabilities.is_only(Capability::Notify));

   let notify = match (notify_only.next(), notify_only.next()) {
      (Some(notify), None) => notify,
      (None, _) => {
         return Err(LightError::CharacteristicResolution(
            "no notify-only characteristic".into(),
         ));
      },
      (Some(first), Some(second)) => {
         return Err(LightError::CharacteristicResolution(format!(
            "ambiguous notify characteristic: {} and {}",
            first.uuid, second.uuid
         )));
      },
   };

   let write = characteristics
      .iter()
      .find(|c| c.capabilities.contains(Capability::WriteWithoutResponse))
      .ok_or_else(|| {
         LightError::CharacteristicResolution(
            "no characteristic accepts write-without-response".into(),
         )
      })?;

   debug!("Command channel {}, notify channel {}", write.uuid, notify.uuid);
   Ok(Channels {
      write: write.channel.clone(),
      notify: notify.channel.clone(),
   })
}

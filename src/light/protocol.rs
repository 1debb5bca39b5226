//! Light command protocol.
//!
//! The light accepts fixed 9-byte frames on its write-without-response
//! characteristic: `7E 00 05 03 R G B A EF`.

use std::fmt;

use smol_str::SmolStr;

/// Leading sentinel of every command frame.
pub const FRAME_HEADER: u8 = 0x7E;
/// Trailing sentinel of every command frame.
pub const FRAME_TRAILER: u8 = 0xEF;
/// Length prefix covering the mode byte and payload.
pub const FRAME_LENGTH: [u8; 2] = [0x00, 0x05];
/// Mode byte selecting "set colour".
pub const MODE_COLOUR: u8 = 0x03;
pub const FRAME_SIZE: usize = 9;

pub type Frame = [u8; FRAME_SIZE];

/// An RGBA colour as sent to the light.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Colour {
   pub r: u8,
   pub g: u8,
   pub b: u8,
   pub a: u8,
}

impl Colour {
   pub const fn new(r: u8, g: u8, b: u8, a: u8) -> Self {
      Self { r, g, b, a }
   }

   pub const fn encode(self) -> Frame {
      let [len_hi, len_lo] = FRAME_LENGTH;
      [
         FRAME_HEADER,
         len_hi,
         len_lo,
         MODE_COLOUR,
         self.r,
         self.g,
         self.b,
         self.a,
         FRAME_TRAILER,
      ]
   }
}

impl fmt::Display for Colour {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      write!(f, "{},{},{},{}", self.r, self.g, self.b, self.a)
   }
}

/// A colour addressed to a device by its advertised name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColourCommand {
   pub colour: Colour,
   pub device: SmolStr,
}

impl ColourCommand {
   pub fn new(colour: Colour, device: impl Into<SmolStr>) -> Self {
      Self {
         colour,
         device: device.into(),
      }
   }
}

#[cfg(test)]
mod tests {
   use super::*;

   #[test]
   fn test_encode_frame() {
      assert_eq!(
         Colour::new(10, 20, 30, 40).encode(),
         [0x7E, 0x00, 0x05, 0x03, 0x0A, 0x14, 0x1E, 0x28, 0xEF]
      );
   }

   #[test]
   fn test_encode_extremes() {
      assert_eq!(
         Colour::new(255, 255, 255, 255).encode(),
         [0x7E, 0x00, 0x05, 0x03, 0xFF, 0xFF, 0xFF, 0xFF, 0xEF]
      );
      assert_eq!(
         Colour::new(0, 0, 0, 0).encode(),
         [0x7E, 0x00, 0x05, 0x03, 0x00, 0x00, 0x00, 0x00, 0xEF]
      );
   }

   #[test]
   fn test_colour_display() {
      assert_eq!(Colour::new(255, 0, 128, 7).to_string(), "255,0,128,7");
   }
}

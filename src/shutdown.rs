//! Process-wide shutdown signal.
//!
//! Long waits inside the session (scans, link setup, retry sleeps) race
//! against this signal so Ctrl-C never waits out a full retry budget.

use std::future::{self, Future};

use tokio::sync::watch;

use crate::error::{LightError, Result};

/// Owner side of the shutdown signal.
#[derive(Debug)]
pub struct Shutdown {
   tx: watch::Sender<bool>,
}

impl Default for Shutdown {
   fn default() -> Self {
      Self::new()
   }
}

impl Shutdown {
   pub fn new() -> Self {
      let (tx, _) = watch::channel(false);
      Self { tx }
   }

   pub fn listener(&self) -> ShutdownListener {
      ShutdownListener {
         rx: self.tx.subscribe(),
      }
   }

   pub fn trigger(&self) {
      self.tx.send_replace(true);
   }
}

/// Receiving side handed to everything that may wait on the radio.
#[derive(Debug, Clone)]
pub struct ShutdownListener {
   rx: watch::Receiver<bool>,
}

impl ShutdownListener {
   pub fn is_triggered(&self) -> bool {
      *self.rx.borrow()
   }

   /// Resolves once shutdown was requested. Never resolves if the owner was
   /// dropped without triggering.
   pub async fn stopped(&mut self) {
      loop {
         if *self.rx.borrow_and_update() {
            return;
         }
         if self.rx.changed().await.is_err() {
            return future::pending().await;
         }
      }
   }

   /// Runs `fut` unless shutdown is requested first.
   pub async fn guard<F: Future>(&mut self, fut: F) -> Result<F::Output> {
      tokio::select! {
         biased;
         () = self.stopped() => Err(LightError::Cancelled),
         out = fut => Ok(out),
      }
   }
}

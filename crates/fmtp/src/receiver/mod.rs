// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! FMTP receiver: multicast ingress, gap recovery, unicast retransmission.
//!
//! Two threads share the assembler: the multicast ingress loop and the
//! unicast reader. Requests ride the unicast stream from whichever thread
//! detected the condition; completed products reach the application through
//! the notifier.

pub mod assembler;
pub mod bytemap;
pub mod ingress;
pub mod requester;

pub use assembler::{Action, Assembler};
pub use bytemap::IntervalSet;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::config::ReceiverConfig;
use crate::error::{Error, Result};
use crate::notify::ReceiverNotifier;
use crate::security::MacMode;
use crate::stats::ReceiverStats;
use crate::transport::{tcp, McastReceiver};
use requester::Requester;

/// The receiver role: reassemble multicast products, recover gaps over the
/// unicast channel, deliver or report each announced product.
pub struct FmtpReceiver {
    config: ReceiverConfig,
    notifier: Arc<dyn ReceiverNotifier>,
    assembler: Arc<Assembler>,
    stats: Arc<ReceiverStats>,
    stop: Arc<AtomicBool>,
    requester: Option<Arc<Requester>>,
    ingress: Option<JoinHandle<()>>,
    reader: Option<JoinHandle<()>>,
}

impl FmtpReceiver {
    pub fn new(config: ReceiverConfig, notifier: Arc<dyn ReceiverNotifier>) -> FmtpReceiver {
        let stats = Arc::new(ReceiverStats::new());
        FmtpReceiver {
            assembler: Arc::new(Assembler::new(Arc::clone(&stats))),
            stats,
            stop: Arc::new(AtomicBool::new(false)),
            requester: None,
            ingress: None,
            reader: None,
            config,
            notifier,
        }
    }

    /// Connect to the sender, run the key handshake, join the multicast
    /// group, and spawn the ingress and unicast reader threads.
    pub fn start(&mut self) -> Result<()> {
        if self.stop.load(Ordering::Relaxed) {
            return Err(Error::Shutdown);
        }
        if self.ingress.is_some() {
            return Ok(());
        }

        let mut stream = tcp::connect(self.config.sender)?;
        let mac = Arc::new(requester::handshake(
            &mut stream,
            self.config.mac_mode,
            &self.stop,
        )?);
        let mcast = McastReceiver::new(self.config.group, self.config.interface)?;

        let req = Arc::new(Requester::new(stream.try_clone()?, Arc::clone(&self.stats)));
        self.requester = Some(Arc::clone(&req));

        self.reader = Some({
            let (assembler, requester, notifier, stats, stop) = (
                Arc::clone(&self.assembler),
                Arc::clone(&req),
                Arc::clone(&self.notifier),
                Arc::clone(&self.stats),
                Arc::clone(&self.stop),
            );
            thread::Builder::new()
                .name("fmtp-unicast".to_string())
                .spawn(move || {
                    requester::reader_loop(stream, assembler, requester, notifier, stats, stop)
                })?
        });

        self.ingress = Some({
            let (assembler, requester, notifier, stats, stop) = (
                Arc::clone(&self.assembler),
                req,
                Arc::clone(&self.notifier),
                Arc::clone(&self.stats),
                Arc::clone(&self.stop),
            );
            thread::Builder::new()
                .name("fmtp-ingress".to_string())
                .spawn(move || {
                    ingress::ingress_loop(mcast, mac, assembler, requester, notifier, stats, stop)
                })?
        });

        log::info!(
            "[RECV] up: group={} sender={} mac={:?}",
            self.config.group,
            self.config.sender,
            self.config.mac_mode
        );
        Ok(())
    }

    /// Tear both threads down. The multicast loop wakes on its poll
    /// timeout; the unicast reader is unblocked by the socket shutdown.
    /// Idempotent.
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(requester) = self.requester.take() {
            requester.shutdown();
        }
        if let Some(handle) = self.reader.take() {
            let _ = handle.join();
        }
        if let Some(handle) = self.ingress.take() {
            let _ = handle.join();
        }
        log::info!("[RECV] down");
    }

    pub fn stats(&self) -> &ReceiverStats {
        &self.stats
    }

    pub fn mac_mode(&self) -> MacMode {
        self.config.mac_mode
    }
}

impl Drop for FmtpReceiver {
    fn drop(&mut self) {
        self.stop();
    }
}

// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! FMTP sender: multicast egress, product retention, per-receiver
//! retransmission, timeout eviction.
//!
//! Thread model: the caller's thread runs egress (`send_product`), the
//! coordinator accepts retransmission connections, one worker serves each
//! connected receiver, and the timeout thread drives eviction off the delay
//! queue. The first unrecoverable failure from any worker is latched and
//! re-raised from `send_product`/`start`.

pub mod delay_queue;
pub mod egress;
pub mod rate;
pub mod retention;
pub mod service;
pub mod timeout;

pub use retention::{EntryGuard, ProductData, RetentionTable};

use std::net::{SocketAddr, TcpListener};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;

use crate::config::SenderConfig;
use crate::error::{Error, Result};
use crate::notify::SenderNotifier;
use crate::protocol::MAX_BOP_METADATA;
use crate::security::{Mac, MacMode};
use crate::stats::SenderStats;
use crate::transport::{tcp, McastSender};
use delay_queue::DelayQueue;
use rate::RateShaper;
use service::{ConnectionRegistry, RetxService, ServiceContext};

/// First unrecoverable failure from any worker, latched for the API.
pub struct BrokenLatch {
    inner: Mutex<Option<String>>,
}

impl BrokenLatch {
    pub fn new() -> BrokenLatch {
        BrokenLatch {
            inner: Mutex::new(None),
        }
    }

    /// Latch `msg` if nothing was latched yet.
    pub fn latch(&self, msg: String) {
        let mut inner = self.inner.lock();
        if inner.is_none() {
            log::error!("[SEND] fatal: {}", msg);
            *inner = Some(msg);
        }
    }

    /// Re-raise the latched failure, if any.
    pub fn check(&self) -> Result<()> {
        match &*self.inner.lock() {
            Some(msg) => Err(Error::Broken(msg.clone())),
            None => Ok(()),
        }
    }

    pub fn is_broken(&self) -> bool {
        self.inner.lock().is_some()
    }
}

impl Default for BrokenLatch {
    fn default() -> Self {
        Self::new()
    }
}

/// The sender role: push indexed products to the multicast group and keep
/// them repairable until every receiver acknowledges or the timeout fires.
pub struct FmtpSender {
    config: SenderConfig,
    mac: Arc<Mac>,
    mcast: McastSender,
    table: Arc<RetentionTable>,
    queue: Arc<DelayQueue>,
    registry: Arc<ConnectionRegistry>,
    rate: RateShaper,
    next_index: AtomicU32,
    stats: Arc<SenderStats>,
    broken: Arc<BrokenLatch>,
    stop: Arc<AtomicBool>,
    notifier: Arc<dyn SenderNotifier>,
    listen_addr: SocketAddr,
    listener: Option<TcpListener>,
    service: Option<RetxService>,
    timeout_thread: Option<JoinHandle<()>>,
}

impl FmtpSender {
    /// Construct the sender: validates the configuration, generates the MAC
    /// keying material, and binds both sockets. No threads run until
    /// [`start`](Self::start).
    pub fn new(config: SenderConfig, notifier: Arc<dyn SenderNotifier>) -> Result<FmtpSender> {
        config.validate()?;
        let mac = Arc::new(Mac::generate(config.mac_mode)?);
        let mcast = McastSender::new(config.group, config.interface, config.ttl)?;
        let listener = tcp::create_listener(config.listen)?;
        let listen_addr = listener.local_addr()?;
        let rate = RateShaper::new(config.rate_bps);

        Ok(FmtpSender {
            table: Arc::new(RetentionTable::new(Arc::clone(&notifier))),
            queue: Arc::new(DelayQueue::new()),
            registry: Arc::new(ConnectionRegistry::new()),
            rate,
            next_index: AtomicU32::new(0),
            stats: Arc::new(SenderStats::new()),
            broken: Arc::new(BrokenLatch::new()),
            stop: Arc::new(AtomicBool::new(false)),
            notifier,
            listen_addr,
            listener: Some(listener),
            service: None,
            timeout_thread: None,
            config,
            mac,
            mcast,
        })
    }

    /// Spawn the coordinator and timeout threads. Idempotent while running;
    /// fails with [`Error::Broken`] after a latched failure and with
    /// [`Error::Shutdown`] after [`stop`](Self::stop).
    pub fn start(&mut self) -> Result<()> {
        self.broken.check()?;
        if self.stop.load(Ordering::Relaxed) {
            return Err(Error::Shutdown);
        }
        if self.service.is_some() {
            return Ok(());
        }
        let listener = self.listener.take().ok_or(Error::Shutdown)?;

        let ctx = Arc::new(ServiceContext::new(
            Arc::clone(&self.table),
            Arc::clone(&self.registry),
            Arc::clone(&self.mac),
            self.config.mac_mode,
            Arc::clone(&self.notifier),
            Arc::clone(&self.stats),
            Arc::clone(&self.broken),
        ));
        self.service = Some(RetxService::start(listener, ctx, Arc::clone(&self.stop))?);

        let handle = {
            let (queue, table, registry, stats, broken) = (
                Arc::clone(&self.queue),
                Arc::clone(&self.table),
                Arc::clone(&self.registry),
                Arc::clone(&self.stats),
                Arc::clone(&self.broken),
            );
            thread::Builder::new()
                .name("fmtp-timeout".to_string())
                .spawn(move || timeout::timeout_loop(queue, table, registry, stats, broken))?
        };
        self.timeout_thread = Some(handle);
        log::info!(
            "[SEND] up: group={} retx={} mac={:?}",
            self.config.group,
            self.listen_addr,
            self.config.mac_mode
        );
        Ok(())
    }

    /// Push one product: BOP, data chunks, EOP, then register it for
    /// retransmission and timeout eviction. Returns the assigned product
    /// index. Blocks in the rate shaper when a rate is configured.
    pub fn send_product(&self, data: Arc<[u8]>, metadata: Option<&[u8]>) -> Result<u32> {
        // Refuse before registering or transmitting anything: after stop()
        // the timeout thread is gone, so a registered entry could never be
        // evicted again.
        if self.stop.load(Ordering::Relaxed) {
            return Err(Error::Shutdown);
        }
        self.broken.check()?;
        if u32::try_from(data.len()).is_err() {
            return Err(Error::InvalidArgument("product exceeds 2^32 - 1 bytes"));
        }
        let metadata = metadata.unwrap_or(&[]);
        if metadata.len() > MAX_BOP_METADATA {
            return Err(Error::InvalidArgument("metadata exceeds MAX_BOP_METADATA"));
        }

        let prodindex = self.next_index.fetch_add(1, Ordering::Relaxed);
        let start = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        let product = Arc::new(ProductData {
            prodindex,
            prodsize: data.len() as u32,
            metadata: metadata.to_vec(),
            start_sec: start.as_secs(),
            start_nsec: start.subsec_nanos(),
            bytes: data,
        });

        // The entry is visible from the moment the BOP can be on the wire,
        // so a receiver's immediate BOP_REQ/RETX_REQ is serviceable.
        self.table.add(Arc::clone(&product), self.registry.ids());

        let t0 = Instant::now();
        let sent = egress::emit_product(&product, &self.mac, |datagram| {
            self.rate.consume(datagram.len());
            self.mcast.send(datagram)?;
            self.stats.datagrams_sent.fetch_add(1, Ordering::Relaxed);
            self.stats
                .bytes_sent
                .fetch_add(datagram.len() as u64, Ordering::Relaxed);
            Ok(())
        });
        if let Err(e) = sent {
            // The multicast socket is fatal to the sender as a whole.
            self.broken.latch(format!("multicast send failed: {}", e));
            return Err(e);
        }

        let elapsed = t0.elapsed().as_secs_f64();
        let timeout_secs = (self.config.retx_timeout_ratio * elapsed)
            .max(self.config.min_retx_timeout.as_secs_f64());
        self.queue.push(prodindex, timeout_secs)?;
        self.stats.products_sent.fetch_add(1, Ordering::Relaxed);
        Ok(prodindex)
    }

    /// Reconfigure the egress rate shaper (bits/second, 0 = unshaped).
    pub fn set_rate(&self, bps: u64) {
        self.rate.set_rate(bps);
        log::debug!("[SEND] rate set to {} bps", bps);
    }

    /// The MAC key receivers need: empty (off), shared secret (hmac), or
    /// public key (dsa). Distributed automatically over each handshake.
    pub fn get_key(&self) -> &[u8] {
        self.mac.get_key()
    }

    pub fn mac_mode(&self) -> MacMode {
        self.config.mac_mode
    }

    /// Actual bound address of the retransmission listener.
    pub fn retx_addr(&self) -> SocketAddr {
        self.listen_addr
    }

    pub fn stats(&self) -> &SenderStats {
        &self.stats
    }

    /// Currently connected (Active) receivers.
    pub fn receiver_count(&self) -> usize {
        self.registry.len()
    }

    /// Shut down: disable the delay queue (the timeout thread exits), stop
    /// the coordinator, and close every worker's socket so blocked reads
    /// return. Idempotent.
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        self.queue.disable();
        if let Some(mut service) = self.service.take() {
            service.stop();
        }
        if let Some(handle) = self.timeout_thread.take() {
            let _ = handle.join();
        }
        log::info!("[SEND] down");
    }
}

impl Drop for FmtpSender {
    fn drop(&mut self) {
        self.stop();
    }
}

// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Per-receiver retransmission service.
//!
//! The coordinator thread accepts unicast connections, runs the key
//! handshake (`Handshaking -> Verified`), and hands each accepted receiver
//! (`Active`) to a dedicated worker thread that services its requests until
//! EOF, I/O error, or shutdown (`Closed`). A worker failure is local: the
//! connection is dropped from every unfinished set and the products it was
//! the last holdout for are completed.

use std::collections::{HashMap, HashSet};
use std::io;
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;

use super::retention::{ProductData, RetentionTable};
use super::BrokenLatch;
use crate::notify::SenderNotifier;
use crate::protocol::{FmtpHeader, MsgKind, RetxReqMsg, MAX_FMTP_PAYLOAD};
use crate::security::{key_exchange, wrap_key, Mac, MacMode};
use crate::stats::SenderStats;
use crate::transport::tcp;
use crate::ConnId;

/// Accept-poll interval for the non-blocking coordinator loop.
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// One active receiver connection. Reads are owned by the worker thread;
/// writes (worker replies and timeout-thread RETX_EOPs) serialize through
/// the mutex.
pub struct RetxConnection {
    id: ConnId,
    peer: SocketAddr,
    writer: Mutex<TcpStream>,
}

impl RetxConnection {
    pub fn id(&self) -> ConnId {
        self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Write one `Header || Payload` frame to this receiver.
    pub fn send_frame(&self, hdr: &FmtpHeader, payload: &[u8]) -> io::Result<()> {
        let mut stream = self.writer.lock();
        tcp::write_frame(&mut stream, hdr, payload)
    }

    fn shutdown(&self) {
        let _ = self.writer.lock().shutdown(Shutdown::Both);
    }
}

/// The set of connected receivers, serialized by one mutex.
pub struct ConnectionRegistry {
    inner: Mutex<HashMap<ConnId, Arc<RetxConnection>>>,
}

impl ConnectionRegistry {
    pub fn new() -> ConnectionRegistry {
        ConnectionRegistry {
            inner: Mutex::new(HashMap::new()),
        }
    }

    pub fn insert(&self, conn: Arc<RetxConnection>) {
        self.inner.lock().insert(conn.id, conn);
    }

    pub fn remove(&self, id: ConnId) {
        self.inner.lock().remove(&id);
    }

    pub fn get(&self, id: ConnId) -> Option<Arc<RetxConnection>> {
        self.inner.lock().get(&id).cloned()
    }

    /// Snapshot of the active connection identifiers; seeds each new
    /// product's unfinished set.
    pub fn ids(&self) -> HashSet<ConnId> {
        self.inner.lock().keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Shut every socket down so blocked worker reads return promptly.
    pub fn shutdown_all(&self) {
        for conn in self.inner.lock().values() {
            conn.shutdown();
        }
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// A peer that went away, as opposed to a socket in real trouble.
pub fn is_dead_peer(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected
            | io::ErrorKind::UnexpectedEof
    )
}

/// Shared state every service thread needs.
pub struct ServiceContext {
    pub table: Arc<RetentionTable>,
    pub registry: Arc<ConnectionRegistry>,
    pub mac: Arc<Mac>,
    pub mac_mode: MacMode,
    pub notifier: Arc<dyn SenderNotifier>,
    pub stats: Arc<SenderStats>,
    pub broken: Arc<BrokenLatch>,
    next_conn_id: AtomicU64,
}

impl ServiceContext {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        table: Arc<RetentionTable>,
        registry: Arc<ConnectionRegistry>,
        mac: Arc<Mac>,
        mac_mode: MacMode,
        notifier: Arc<dyn SenderNotifier>,
        stats: Arc<SenderStats>,
        broken: Arc<BrokenLatch>,
    ) -> ServiceContext {
        ServiceContext {
            table,
            registry,
            mac,
            mac_mode,
            notifier,
            stats,
            broken,
            next_conn_id: AtomicU64::new(1),
        }
    }
}

/// Owns the coordinator thread and the per-connection workers.
pub struct RetxService {
    stop: Arc<AtomicBool>,
    registry: Arc<ConnectionRegistry>,
    coordinator: Option<JoinHandle<()>>,
    workers: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl RetxService {
    /// Spawn the coordinator on `listener` (which must be non-blocking).
    pub fn start(
        listener: TcpListener,
        ctx: Arc<ServiceContext>,
        stop: Arc<AtomicBool>,
    ) -> io::Result<RetxService> {
        let registry = Arc::clone(&ctx.registry);
        let workers: Arc<Mutex<Vec<JoinHandle<()>>>> = Arc::new(Mutex::new(Vec::new()));

        let coordinator = {
            let stop = Arc::clone(&stop);
            let workers = Arc::clone(&workers);
            thread::Builder::new()
                .name("fmtp-coord".to_string())
                .spawn(move || coordinator_loop(listener, ctx, stop, workers))?
        };

        Ok(RetxService {
            stop,
            registry,
            coordinator: Some(coordinator),
            workers,
        })
    }

    /// Tear the service down: close every socket so blocked reads return,
    /// then join the coordinator and all workers. The caller has already
    /// raised the shared stop flag.
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        self.registry.shutdown_all();
        if let Some(handle) = self.coordinator.take() {
            let _ = handle.join();
        }
        let handles: Vec<JoinHandle<()>> = self.workers.lock().drain(..).collect();
        for handle in handles {
            let _ = handle.join();
        }
    }
}

impl Drop for RetxService {
    fn drop(&mut self) {
        self.stop();
    }
}

fn coordinator_loop(
    listener: TcpListener,
    ctx: Arc<ServiceContext>,
    stop: Arc<AtomicBool>,
    workers: Arc<Mutex<Vec<JoinHandle<()>>>>,
) {
    log::debug!("[RETX] coordinator up");
    while !stop.load(Ordering::Relaxed) {
        match listener.accept() {
            Ok((stream, peer)) => {
                if let Err(e) = admit_connection(stream, peer, &ctx, &stop, &workers) {
                    log::debug!("[RETX] connection from {} failed setup: {}", peer, e);
                }
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                thread::sleep(ACCEPT_POLL_INTERVAL);
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => {
                log::warn!("[RETX] accept failed: {}", e);
                thread::sleep(ACCEPT_POLL_INTERVAL);
            }
        }
    }
    log::debug!("[RETX] coordinator down");
}

/// Handshake a fresh connection and, if it verifies and the application
/// does not veto, register it and spawn its worker.
fn admit_connection(
    mut stream: TcpStream,
    peer: SocketAddr,
    ctx: &Arc<ServiceContext>,
    stop: &Arc<AtomicBool>,
    workers: &Arc<Mutex<Vec<JoinHandle<()>>>>,
) -> io::Result<()> {
    tcp::configure_stream(&stream)?;

    // Handshaking: read the receiver's ephemeral public key.
    let Some(pubkey) = tcp::read_blob(&mut stream, stop)? else {
        return Ok(()); // closed before handshake, or shutting down
    };
    if let Err(e) = key_exchange::validate_public_key(&pubkey) {
        log::debug!("[RETX] {} sent a bad public key: {}", peer, e);
        return Ok(());
    }

    // Verified; the application may still veto.
    if !ctx.notifier.accept_receiver(peer) {
        log::info!("[RETX] application vetoed receiver {}", peer);
        return Ok(());
    }

    let blob = match wrap_key(&pubkey, ctx.mac_mode, ctx.mac.get_key()) {
        Ok(blob) => blob,
        Err(e) => {
            log::warn!("[RETX] key wrap for {} failed: {}", peer, e);
            return Ok(());
        }
    };
    tcp::write_blob(&mut stream, &blob)?;

    // Active: register and spawn the worker.
    let id = ctx.next_conn_id.fetch_add(1, Ordering::Relaxed);
    let conn = Arc::new(RetxConnection {
        id,
        peer,
        writer: Mutex::new(stream.try_clone()?),
    });
    ctx.registry.insert(Arc::clone(&conn));
    ctx.stats.receivers_accepted.fetch_add(1, Ordering::Relaxed);
    log::info!("[RETX] receiver {} connected as conn {}", peer, id);

    let handle = {
        let ctx = Arc::clone(ctx);
        let stop = Arc::clone(stop);
        thread::Builder::new()
            .name(format!("fmtp-retx-{}", id))
            .spawn(move || worker_loop(conn, stream, ctx, stop))?
    };
    workers.lock().push(handle);
    Ok(())
}

/// Service one receiver's requests until EOF, error, or shutdown.
fn worker_loop(
    conn: Arc<RetxConnection>,
    mut reader: TcpStream,
    ctx: Arc<ServiceContext>,
    stop: Arc<AtomicBool>,
) {
    let id = conn.id();
    loop {
        if stop.load(Ordering::Relaxed) {
            break;
        }
        match tcp::read_frame(&mut reader, &stop) {
            Ok(None) => break, // clean EOF or shutdown
            Ok(Some((hdr, payload))) => {
                if let Err(e) = dispatch(&conn, hdr, &payload, &ctx) {
                    log::debug!("[RETX] conn {} reply failed: {}", id, e);
                    break;
                }
            }
            Err(e) => {
                log::debug!("[RETX] conn {} read failed: {}", id, e);
                break;
            }
        }
    }

    // Local teardown: this connection leaves every unfinished set; products
    // it was the last holdout for complete now.
    ctx.registry.remove(id);
    ctx.table.drop_receiver(id);
    ctx.stats
        .receivers_disconnected
        .fetch_add(1, Ordering::Relaxed);
    log::info!("[RETX] conn {} ({}) closed", id, conn.peer());
}

/// Handle one request under exclusive access to the product's entry.
fn dispatch(
    conn: &Arc<RetxConnection>,
    hdr: FmtpHeader,
    payload: &[u8],
    ctx: &Arc<ServiceContext>,
) -> io::Result<()> {
    match hdr.kind {
        MsgKind::RetxReq => {
            let Some(req) = RetxReqMsg::decode(payload) else {
                log::debug!("[RETX] conn {} sent malformed RETX_REQ", conn.id());
                return Ok(());
            };
            match ctx.table.get(hdr.prodindex) {
                Some(guard) => {
                    ctx.stats.retx_served.fetch_add(1, Ordering::Relaxed);
                    serve_range(conn, &guard, req)
                }
                None => reject(conn, ctx, hdr.prodindex),
            }
        }
        MsgKind::BopReq => match ctx.table.get(hdr.prodindex) {
            Some(guard) => {
                ctx.stats.retx_served.fetch_add(1, Ordering::Relaxed);
                let bop = guard.bop().encode();
                let reply = FmtpHeader {
                    prodindex: hdr.prodindex,
                    seqnum: 0,
                    payloadlen: bop.len() as u16,
                    kind: MsgKind::RetxBop,
                };
                conn.send_frame(&reply, &bop)
            }
            None => reject(conn, ctx, hdr.prodindex),
        },
        MsgKind::EopReq => match ctx.table.get(hdr.prodindex) {
            Some(_guard) => {
                ctx.stats.retx_served.fetch_add(1, Ordering::Relaxed);
                conn.send_frame(&FmtpHeader::control(hdr.prodindex, MsgKind::RetxEop), &[])
            }
            None => reject(conn, ctx, hdr.prodindex),
        },
        MsgKind::RetxEnd => {
            // Exclusive access while the ack mutates the entry; the guard's
            // drop performs the eviction the ack may have latched.
            let _guard = ctx.table.get(hdr.prodindex);
            if ctx.table.ack_receiver(hdr.prodindex, conn.id()) {
                log::debug!(
                    "[RETX] product {} fully acknowledged (last: conn {})",
                    hdr.prodindex,
                    conn.id()
                );
            }
            Ok(())
        }
        other => {
            log::debug!(
                "[RETX] conn {} sent unexpected {:?} - dropped",
                conn.id(),
                other
            );
            Ok(())
        }
    }
}

fn reject(conn: &Arc<RetxConnection>, ctx: &Arc<ServiceContext>, prodindex: u32) -> io::Result<()> {
    ctx.stats.retx_rejected.fetch_add(1, Ordering::Relaxed);
    log::debug!(
        "[RETX] product {} no longer retained - RETX_REJ to conn {}",
        prodindex,
        conn.id()
    );
    conn.send_frame(&FmtpHeader::control(prodindex, MsgKind::RetxRej), &[])
}

/// Stream the requested byte range as RETX_DATA chunks aligned to the
/// canonical payload size. Bytes past the product end are truncated.
fn serve_range(
    conn: &Arc<RetxConnection>,
    data: &ProductData,
    req: RetxReqMsg,
) -> io::Result<()> {
    let prodsize = u64::from(data.prodsize);
    let req_start = u64::from(req.startpos);
    let req_end = (req_start + u64::from(req.length)).min(prodsize);
    if req_start >= req_end {
        log::debug!(
            "[RETX] request [{}, +{}) entirely past product {} end - nothing to send",
            req.startpos,
            req.length,
            data.prodindex
        );
        return Ok(());
    }

    let payload = MAX_FMTP_PAYLOAD as u64;
    let mut offset = req_start - (req_start % payload);
    while offset < req_end {
        let chunk_end = (offset + payload).min(prodsize);
        let chunk = &data.bytes[offset as usize..chunk_end as usize];
        let hdr = FmtpHeader {
            prodindex: data.prodindex,
            seqnum: offset as u32,
            payloadlen: chunk.len() as u16,
            kind: MsgKind::RetxData,
        };
        conn.send_frame(&hdr, chunk)?;
        offset = chunk_end;
    }
    Ok(())
}

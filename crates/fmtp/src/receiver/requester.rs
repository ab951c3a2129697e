// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Unicast retransmission channel, receiver side.
//!
//! One TCP connection to the sender carries the key handshake, then every
//! recovery request (RETX_REQ / BOP_REQ / EOP_REQ / RETX_END) upstream and
//! every reply (RETX_DATA / RETX_BOP / RETX_EOP / RETX_REJ) downstream.
//! Requests are written by whichever thread detected the condition (the
//! stream is behind a mutex); the dedicated unicast thread is the reader
//! loop feeding replies back into the assembler.

use std::io;
use std::net::{Shutdown, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use super::assembler::{Action, Assembler};
use crate::error::{Error, Result};
use crate::notify::ReceiverNotifier;
use crate::protocol::{BopMsg, FmtpHeader, MsgKind, RetxReqMsg};
use crate::security::{KeyExchange, Mac, MacMode};
use crate::stats::ReceiverStats;
use crate::transport::tcp;

/// Run the receiver half of the key handshake on a fresh connection:
/// send our ephemeral public key, unwrap the MAC key from the reply.
pub fn handshake(stream: &mut TcpStream, mode: MacMode, stop: &AtomicBool) -> Result<Mac> {
    let exchange = KeyExchange::generate()?;
    tcp::write_blob(stream, exchange.public_key())?;
    let Some(blob) = tcp::read_blob(stream, stop)? else {
        return Err(Error::Io(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "sender closed during handshake",
        )));
    };
    let key = exchange.unwrap_key(&blob, mode)?;
    let mac = Mac::from_key(mode, &key)?;
    log::info!("[RECV] handshake complete, MAC mode {:?}", mode);
    Ok(mac)
}

/// Write half of the retransmission connection, shared by the ingress and
/// reader threads.
pub struct Requester {
    stream: Mutex<TcpStream>,
    stats: Arc<ReceiverStats>,
}

impl Requester {
    pub fn new(stream: TcpStream, stats: Arc<ReceiverStats>) -> Requester {
        Requester {
            stream: Mutex::new(stream),
            stats,
        }
    }

    /// Carry out the assembler's verdicts in order: requests go upstream,
    /// deliveries and misses go to the application. An I/O error here means
    /// the recovery channel is gone, which is fatal to the receiver.
    pub fn execute(
        &self,
        actions: Vec<Action>,
        notifier: &Arc<dyn ReceiverNotifier>,
    ) -> io::Result<()> {
        for action in actions {
            match action {
                Action::SendBopReq(prodindex) => {
                    self.stats.bop_requests_sent.fetch_add(1, Ordering::Relaxed);
                    self.send(&FmtpHeader::control(prodindex, MsgKind::BopReq), &[])?;
                }
                Action::SendEopReq(prodindex) => {
                    self.stats.eop_requests_sent.fetch_add(1, Ordering::Relaxed);
                    self.send(&FmtpHeader::control(prodindex, MsgKind::EopReq), &[])?;
                }
                Action::SendRetxReq {
                    prodindex,
                    startpos,
                    length,
                } => {
                    self.stats
                        .retx_requests_sent
                        .fetch_add(1, Ordering::Relaxed);
                    let req = RetxReqMsg { startpos, length };
                    let hdr = FmtpHeader {
                        prodindex,
                        seqnum: startpos,
                        payloadlen: req.encode().len() as u16,
                        kind: MsgKind::RetxReq,
                    };
                    self.send(&hdr, &req.encode())?;
                }
                Action::SendRetxEnd(prodindex) => {
                    self.send(&FmtpHeader::control(prodindex, MsgKind::RetxEnd), &[])?;
                }
                Action::Deliver(delivery) => notifier.product_arrived(delivery),
                Action::Missed(prodindex) => notifier.product_missed(prodindex),
            }
        }
        Ok(())
    }

    /// Close both directions; unblocks the reader loop promptly.
    pub fn shutdown(&self) {
        let _ = self.stream.lock().shutdown(Shutdown::Both);
    }

    fn send(&self, hdr: &FmtpHeader, payload: &[u8]) -> io::Result<()> {
        let mut stream = self.stream.lock();
        tcp::write_frame(&mut stream, hdr, payload)
    }
}

/// Reader loop for the unicast connection: feed every reply into the
/// assembler and carry out whatever follows.
pub fn reader_loop(
    mut stream: TcpStream,
    assembler: Arc<Assembler>,
    requester: Arc<Requester>,
    notifier: Arc<dyn ReceiverNotifier>,
    stats: Arc<ReceiverStats>,
    stop: Arc<AtomicBool>,
) {
    log::debug!("[RECV] unicast reader up");
    loop {
        if stop.load(Ordering::Relaxed) {
            break;
        }
        match tcp::read_frame(&mut stream, &stop) {
            Ok(None) => break,
            Ok(Some((hdr, payload))) => {
                let actions = match hdr.kind {
                    MsgKind::RetxData => {
                        assembler.handle_data(hdr.prodindex, hdr.seqnum, &payload, true)
                    }
                    MsgKind::RetxBop => match BopMsg::decode(&payload) {
                        Some(bop) => assembler.handle_bop(hdr.prodindex, bop),
                        None => {
                            stats.malformed.fetch_add(1, Ordering::Relaxed);
                            Vec::new()
                        }
                    },
                    MsgKind::RetxEop => assembler.handle_eop(hdr.prodindex),
                    MsgKind::RetxRej => assembler.handle_retx_rej(hdr.prodindex),
                    other => {
                        log::debug!("[RECV] unexpected {:?} on unicast stream - dropped", other);
                        Vec::new()
                    }
                };
                if let Err(e) = requester.execute(actions, &notifier) {
                    log::error!("[RECV] unicast send failed: {}", e);
                    break;
                }
            }
            Err(e) => {
                log::debug!("[RECV] unicast read failed: {}", e);
                break;
            }
        }
    }
    log::debug!("[RECV] unicast reader down");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::{ReceiverEvent, ReceiverEvents};
    use std::net::TcpListener;

    fn loopback_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).unwrap();
        let (server, _) = listener.accept().unwrap();
        tcp::configure_stream(&client).unwrap();
        tcp::configure_stream(&server).unwrap();
        (client, server)
    }

    #[test]
    fn test_execute_writes_request_frames() {
        let (client, mut server) = loopback_pair();
        let stats = Arc::new(ReceiverStats::new());
        let requester = Requester::new(client, Arc::clone(&stats));
        let (notifier, _rx) = ReceiverEvents::channel();
        let notifier: Arc<dyn ReceiverNotifier> = notifier;

        requester
            .execute(
                vec![
                    Action::SendBopReq(3),
                    Action::SendRetxReq {
                        prodindex: 3,
                        startpos: 1448,
                        length: 1448,
                    },
                    Action::SendRetxEnd(3),
                ],
                &notifier,
            )
            .unwrap();

        let stop = AtomicBool::new(false);
        let (hdr, _) = tcp::read_frame(&mut server, &stop).unwrap().unwrap();
        assert_eq!(hdr.kind, MsgKind::BopReq);
        let (hdr, payload) = tcp::read_frame(&mut server, &stop).unwrap().unwrap();
        assert_eq!(hdr.kind, MsgKind::RetxReq);
        let req = RetxReqMsg::decode(&payload).unwrap();
        assert_eq!(req.startpos, 1448);
        assert_eq!(req.length, 1448);
        let (hdr, _) = tcp::read_frame(&mut server, &stop).unwrap().unwrap();
        assert_eq!(hdr.kind, MsgKind::RetxEnd);

        let snap = stats.snapshot();
        assert_eq!(snap.bop_requests_sent, 1);
        assert_eq!(snap.retx_requests_sent, 1);
    }

    #[test]
    fn test_execute_routes_deliveries_to_notifier() {
        let (client, _server) = loopback_pair();
        let stats = Arc::new(ReceiverStats::new());
        let requester = Requester::new(client, stats);
        let (events, rx) = ReceiverEvents::channel();
        let notifier: Arc<dyn ReceiverNotifier> = events;

        requester
            .execute(
                vec![
                    Action::Deliver(crate::notify::ProductDelivery {
                        prodindex: 1,
                        metadata: b"m".to_vec(),
                        data: b"d".to_vec(),
                    }),
                    Action::Missed(2),
                ],
                &notifier,
            )
            .unwrap();

        assert!(matches!(rx.try_recv().unwrap(), ReceiverEvent::Arrived(d) if d.prodindex == 1));
        assert_eq!(rx.try_recv().unwrap(), ReceiverEvent::Missed(2));
    }

    #[test]
    fn test_handshake_against_sender_side_wrap() {
        let (mut client, mut server) = loopback_pair();
        let stop = AtomicBool::new(false);

        // Sender side of the handshake, inlined.
        let sender_mac = Mac::generate(MacMode::Hmac).unwrap();
        let sender_key = sender_mac.get_key().to_vec();
        let server_thread = std::thread::spawn(move || {
            let stop = AtomicBool::new(false);
            let pubkey = tcp::read_blob(&mut server, &stop).unwrap().unwrap();
            let blob =
                crate::security::wrap_key(&pubkey, MacMode::Hmac, &sender_key).unwrap();
            tcp::write_blob(&mut server, &blob).unwrap();
            sender_key
        });

        let mac = handshake(&mut client, MacMode::Hmac, &stop).unwrap();
        let sender_key = server_thread.join().unwrap();
        assert_eq!(mac.get_key(), &sender_key[..]);

        // The delivered key actually verifies the sender's tags.
        let tag = sender_mac.sign(b"datagram");
        assert!(mac.verify(b"datagram", &tag));
    }

    #[test]
    fn test_reader_loop_drives_assembler() {
        let (client, mut server) = loopback_pair();
        let stats = Arc::new(ReceiverStats::new());
        let assembler = Arc::new(Assembler::new(Arc::clone(&stats)));
        let requester = Arc::new(Requester::new(client.try_clone().unwrap(), Arc::clone(&stats)));
        let (events, rx) = ReceiverEvents::channel();
        let notifier: Arc<dyn ReceiverNotifier> = events;
        let stop = Arc::new(AtomicBool::new(false));

        let reader = {
            let (assembler, requester, notifier, stats, stop) = (
                Arc::clone(&assembler),
                Arc::clone(&requester),
                Arc::clone(&notifier),
                Arc::clone(&stats),
                Arc::clone(&stop),
            );
            std::thread::spawn(move || {
                reader_loop(client, assembler, requester, notifier, stats, stop)
            })
        };

        // Sender pushes a recovered BOP, the data, and the EOP confirmation.
        let bop = BopMsg {
            start_sec: 0,
            start_nsec: 0,
            prodsize: 5,
            metadata: Vec::new(),
        };
        let bop_bytes = bop.encode();
        let hdr = FmtpHeader {
            prodindex: 1,
            seqnum: 0,
            payloadlen: bop_bytes.len() as u16,
            kind: MsgKind::RetxBop,
        };
        tcp::write_frame(&mut server, &hdr, &bop_bytes).unwrap();
        let hdr = FmtpHeader {
            prodindex: 1,
            seqnum: 0,
            payloadlen: 5,
            kind: MsgKind::RetxData,
        };
        tcp::write_frame(&mut server, &hdr, b"hello").unwrap();

        // Completion surfaces as a delivery...
        let event = rx.recv_timeout(std::time::Duration::from_secs(2)).unwrap();
        assert!(matches!(event, ReceiverEvent::Arrived(d) if d.data == b"hello"));
        // ...and a RETX_END flows back to the sender.
        let stop_flag = AtomicBool::new(false);
        let (hdr, _) = tcp::read_frame(&mut server, &stop_flag).unwrap().unwrap();
        assert_eq!(hdr.kind, MsgKind::RetxEnd);

        stop.store(true, Ordering::Relaxed);
        requester.shutdown();
        reader.join().unwrap();
    }
}

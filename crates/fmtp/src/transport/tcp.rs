// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Unicast TCP plumbing for the retransmission channel.
//!
//! Each direction of the stream carries a sequence of
//! `Header(12 BE) || Payload(payloadlen)` frames with no MAC suffix, plus
//! the length-prefixed handshake blobs exchanged at connection setup.
//! Keep-alive is enabled on both ends so a silently dead peer is eventually
//! detected by the kernel.

use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, TcpKeepalive, Type};

use crate::protocol::{FmtpHeader, FMTP_HEADER_LEN, MAX_FMTP_PAYLOAD};

/// Read timeout on retransmission streams: a blocked read wakes this often
/// so stop flags are observed between iterations.
pub const STREAM_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Keep-alive probe time on retransmission streams.
const KEEPALIVE_TIME: Duration = Duration::from_secs(30);

/// Largest handshake blob either side will accept.
const MAX_HANDSHAKE_BLOB: usize = 4096;

/// Outcome of an interruptible exact read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// Buffer filled.
    Full,
    /// Peer closed the stream cleanly before the first byte.
    Eof,
    /// Stop flag observed while no bytes of this frame had arrived.
    Stopped,
}

/// Build the retransmission listener, non-blocking so the coordinator can
/// poll its stop flag between `accept` attempts.
pub fn create_listener(addr: SocketAddr) -> io::Result<TcpListener> {
    let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.bind(&addr.into())?;
    socket.listen(64)?;
    let listener: TcpListener = socket.into();
    listener.set_nonblocking(true)?;
    log::debug!("[TCP] retransmission listener bound on {}", addr);
    Ok(listener)
}

/// Configure an accepted or connected retransmission stream: keep-alive on,
/// Nagle off (request/reply traffic), poll-interval read timeout.
pub fn configure_stream(stream: &TcpStream) -> io::Result<()> {
    let sock = socket2::SockRef::from(stream);
    sock.set_tcp_keepalive(&TcpKeepalive::new().with_time(KEEPALIVE_TIME))?;
    stream.set_nodelay(true)?;
    stream.set_read_timeout(Some(STREAM_POLL_INTERVAL))?;
    Ok(())
}

/// Connect to the sender's retransmission service (receiver side).
pub fn connect(addr: SocketAddr) -> io::Result<TcpStream> {
    let stream = TcpStream::connect(addr)?;
    configure_stream(&stream)?;
    log::debug!("[TCP] connected to retransmission service at {}", addr);
    Ok(stream)
}

/// Write one `Header || Payload` frame as a single buffer.
pub fn write_frame(stream: &mut TcpStream, hdr: &FmtpHeader, payload: &[u8]) -> io::Result<()> {
    debug_assert_eq!(hdr.payloadlen as usize, payload.len());
    let mut buf = Vec::with_capacity(FMTP_HEADER_LEN + payload.len());
    buf.extend_from_slice(&hdr.encode());
    buf.extend_from_slice(payload);
    stream.write_all(&buf)
}

/// Read one `Header || Payload` frame.
///
/// Returns `Ok(None)` on clean EOF or when the stop flag fires between
/// frames. A malformed header (unknown flags word) or an oversized
/// `payloadlen` is an `InvalidData` error: a byte stream out of sync cannot
/// be resynchronized, so the connection is surrendered.
pub fn read_frame(
    stream: &mut TcpStream,
    stop: &AtomicBool,
) -> io::Result<Option<(FmtpHeader, Vec<u8>)>> {
    let mut hdr_buf = [0u8; FMTP_HEADER_LEN];
    match read_exact_interruptible(stream, &mut hdr_buf, stop)? {
        ReadOutcome::Full => {}
        ReadOutcome::Eof | ReadOutcome::Stopped => return Ok(None),
    }

    let hdr = FmtpHeader::decode(&hdr_buf).ok_or_else(|| {
        io::Error::new(io::ErrorKind::InvalidData, "malformed FMTP header on stream")
    })?;
    if hdr.payloadlen as usize > MAX_FMTP_PAYLOAD {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "stream payload exceeds protocol maximum",
        ));
    }

    let mut payload = vec![0u8; hdr.payloadlen as usize];
    if !payload.is_empty() {
        match read_exact_interruptible(stream, &mut payload, stop)? {
            ReadOutcome::Full => {}
            // EOF or stop mid-frame: the stream is truncated, not idle.
            ReadOutcome::Eof | ReadOutcome::Stopped => {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "stream closed mid-frame",
                ));
            }
        }
    }
    Ok(Some((hdr, payload)))
}

/// Write a length-prefixed handshake blob (u16 BE length).
pub fn write_blob(stream: &mut TcpStream, blob: &[u8]) -> io::Result<()> {
    debug_assert!(blob.len() <= MAX_HANDSHAKE_BLOB);
    let mut buf = Vec::with_capacity(2 + blob.len());
    buf.extend_from_slice(&(blob.len() as u16).to_be_bytes());
    buf.extend_from_slice(blob);
    stream.write_all(&buf)
}

/// Read a length-prefixed handshake blob.
pub fn read_blob(stream: &mut TcpStream, stop: &AtomicBool) -> io::Result<Option<Vec<u8>>> {
    let mut len_buf = [0u8; 2];
    match read_exact_interruptible(stream, &mut len_buf, stop)? {
        ReadOutcome::Full => {}
        ReadOutcome::Eof | ReadOutcome::Stopped => return Ok(None),
    }
    let len = u16::from_be_bytes(len_buf) as usize;
    if len > MAX_HANDSHAKE_BLOB {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "handshake blob too large",
        ));
    }
    let mut blob = vec![0u8; len];
    if !blob.is_empty() {
        match read_exact_interruptible(stream, &mut blob, stop)? {
            ReadOutcome::Full => {}
            ReadOutcome::Eof | ReadOutcome::Stopped => {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "stream closed mid-handshake",
                ));
            }
        }
    }
    Ok(Some(blob))
}

/// Fill `buf` from the stream, waking on the read timeout to poll `stop`.
///
/// The stop flag only aborts the read while the buffer is still empty;
/// once bytes of a frame have arrived the read runs to completion (workers
/// respond to cancellation between iterations, not mid-message).
pub fn read_exact_interruptible(
    stream: &mut TcpStream,
    buf: &mut [u8],
    stop: &AtomicBool,
) -> io::Result<ReadOutcome> {
    let mut filled = 0usize;
    while filled < buf.len() {
        match stream.read(&mut buf[filled..]) {
            Ok(0) => {
                if filled == 0 {
                    return Ok(ReadOutcome::Eof);
                }
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "stream closed mid-read",
                ));
            }
            Ok(n) => filled += n,
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                if filled == 0 && stop.load(Ordering::Relaxed) {
                    return Ok(ReadOutcome::Stopped);
                }
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(ReadOutcome::Full)
}

//! TCP server and connection handling
//!
//! Length-prefixed message framing plus the per-connection task shared by
//! inbound and outbound peers.

use crate::net::message::{Hello, Message, MAGIC};
use crate::net::peer::{PeerError, PeerHandle, PeerManager};
use bytes::{Buf, BufMut, BytesMut};
use futures::sink::SinkExt;
use futures::stream::StreamExt;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::codec::{Decoder, Encoder, Framed};

/// Message codec for magic + length-prefixed framing
pub struct MessageCodec;

impl Encoder<Message> for MessageCodec {
    type Error = std::io::Error;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let data = item
            .to_bytes()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))?;

        // Magic (4) + Length (4) + Data
        dst.reserve(8 + data.len());
        dst.put_slice(&MAGIC);
        dst.put_u32(data.len() as u32);
        dst.put_slice(&data);

        Ok(())
    }
}

impl Decoder for MessageCodec {
    type Item = Message;
    type Error = std::io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            // Need at least header
            if src.len() < 8 {
                return Ok(None);
            }

            // A bad magic means the stream framing is lost for good
            if src[..4] != MAGIC {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    "Invalid magic bytes",
                ));
            }

            let len = u32::from_be_bytes([src[4], src[5], src[6], src[7]]) as usize;
            if src.len() < 8 + len {
                return Ok(None);
            }

            src.advance(8);
            let data = src.split_to(len);

            // A well-framed but undecodable message is dropped, not fatal:
            // one bad peer message must not take the connection down.
            match Message::from_bytes(&data) {
                Ok(msg) => return Ok(Some(msg)),
                Err(e) => {
                    log::warn!("Dropping undecodable message: {}", e);
                    continue;
                }
            }
        }
    }
}

/// TCP server for accepting peer connections
pub struct Server {
    listener: TcpListener,
    port: u16,
}

impl Server {
    /// Bind to a port and create the server
    pub async fn bind(port: u16) -> Result<Self, std::io::Error> {
        let addr = format!("0.0.0.0:{}", port);
        let listener = TcpListener::bind(&addr).await?;
        log::info!("Server listening on {}", addr);

        Ok(Self { listener, port })
    }

    /// Get the listening port
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Accept incoming connections
    pub async fn accept(&self) -> Result<(TcpStream, SocketAddr), std::io::Error> {
        self.listener.accept().await
    }
}

/// Connect to a peer
pub async fn connect_to_peer(addr: &str) -> Result<(TcpStream, SocketAddr), PeerError> {
    let stream = TcpStream::connect(addr)
        .await
        .map_err(|e| PeerError::ConnectionFailed(e.to_string()))?;

    let peer_addr = stream
        .peer_addr()
        .map_err(|e| PeerError::ConnectionFailed(e.to_string()))?;

    Ok((stream, peer_addr))
}

/// Drive a peer connection (both inbound and outbound): register the peer,
/// send our `Hello`, then shuttle messages until either side goes away.
/// Removing the peer from the manager closes the outbound channel, which
/// this loop treats as an instruction to drop the socket.
pub async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    peer_manager: Arc<PeerManager>,
    our_hello: Hello,
    message_tx: mpsc::Sender<(SocketAddr, Message)>,
) -> Result<(), PeerError> {
    let framed = Framed::new(stream, MessageCodec);
    let (mut writer, mut reader) = framed.split();

    let (tx, mut rx) = mpsc::channel::<Message>(100);
    peer_manager.add_peer(addr, PeerHandle { addr, tx }).await?;

    writer
        .send(Message::Hello(our_hello))
        .await
        .map_err(PeerError::IoError)?;
    log::debug!("Sent hello to {}", addr);

    loop {
        tokio::select! {
            outgoing = rx.recv() => match outgoing {
                Some(msg) => {
                    if writer.send(msg).await.is_err() {
                        break;
                    }
                }
                // Manager dropped us; close the connection
                None => {
                    log::info!("Closing connection to {}", addr);
                    break;
                }
            },
            incoming = reader.next() => match incoming {
                Some(Ok(msg)) => {
                    if message_tx.send((addr, msg)).await.is_err() {
                        break;
                    }
                }
                Some(Err(e)) => {
                    log::warn!("Error reading from {}: {}", addr, e);
                    break;
                }
                None => {
                    log::info!("Peer {} disconnected", addr);
                    break;
                }
            },
        }
    }

    peer_manager.remove_peer(&addr).await;
    Ok(())
}

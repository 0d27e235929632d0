//! TCP channel adapter.
//!
//! Frames each [`WireMessage`] as a 4-byte big-endian length followed by the
//! JSON body. Outbound messages go through an unbounded queue drained by a
//! writer task, so [`MessageSink::send`](crate::MessageSink::send) never
//! blocks; inbound frames are decoded lazily as the peer polls the stream.

use crate::channel::Channel;
use crate::error::WireError;
use crate::message::{decode_length, decode_message, encode_message, WireMessage};

use futures::stream;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Connect to a remote portal and wrap the stream as a [`Channel`].
pub async fn connect(addr: impl ToSocketAddrs, max_message_size: u32) -> Result<Channel, WireError> {
    let stream = TcpStream::connect(addr).await?;
    if let Ok(peer_addr) = stream.peer_addr() {
        info!("portal: connected to {}", peer_addr);
    }
    Ok(from_stream(stream, max_message_size))
}

/// Wrap an established TCP stream as a [`Channel`].
///
/// Spawns the writer task, so this must run inside a tokio runtime.
pub fn from_stream(stream: TcpStream, max_message_size: u32) -> Channel {
    let _ = stream.set_nodelay(true);
    let (reader, writer) = stream.into_split();
    from_io(reader, writer, max_message_size)
}

/// Build a framed channel over any split byte stream.
pub fn from_io<R, W>(reader: R, mut writer: W, max_message_size: u32) -> Channel
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, mut rx) = mpsc::unbounded_channel::<WireMessage>();

    tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if let Err(e) = write_message(&mut writer, &msg).await {
                warn!("portal: write failed, dropping outbound queue: {}", e);
                break;
            }
        }
        let _ = writer.shutdown().await;
    });

    let inbound = stream::unfold(Some(reader), move |state| async move {
        let mut reader = state?;
        loop {
            match read_message(&mut reader, max_message_size).await {
                Ok(msg) => return Some((msg, Some(reader))),
                // The whole frame was consumed, so the stream is still aligned.
                Err(WireError::Json(e)) => {
                    warn!("portal: skipping undecodable frame: {}", e);
                }
                Err(WireError::ConnectionClosed) => {
                    debug!("portal: connection closed by remote");
                    return None;
                }
                Err(e) => {
                    warn!("portal: read failed: {}", e);
                    return None;
                }
            }
        }
    });

    Channel::new(tx, inbound)
}

/// Write a framed message (4-byte length + JSON).
pub async fn write_message<W>(writer: &mut W, msg: &WireMessage) -> Result<(), WireError>
where
    W: AsyncWrite + Unpin,
{
    let bytes = encode_message(msg)?;
    writer.write_all(&bytes).await?;
    writer.flush().await?;
    Ok(())
}

/// Read a framed message (4-byte length + JSON).
pub async fn read_message<R>(reader: &mut R, max_message_size: u32) -> Result<WireMessage, WireError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; 4];
    match reader.read_exact(&mut header).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(WireError::ConnectionClosed);
        }
        Err(e) => return Err(WireError::Io(e)),
    }

    let len = decode_length(&header);
    if len > max_message_size {
        return Err(WireError::MessageTooLarge {
            size: len,
            max: max_message_size,
        });
    }

    let mut body = vec![0u8; len as usize];
    reader.read_exact(&mut body).await?;

    let msg = decode_message(&body)?;
    Ok(msg)
}

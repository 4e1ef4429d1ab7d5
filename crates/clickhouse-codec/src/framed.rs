//! Framed packet stream for async I/O.

use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures_core::Stream;
use futures_util::{Sink, SinkExt, StreamExt};
use pin_project_lite::pin_project;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::Framed;

use crate::error::CodecError;
use crate::packet_codec::{Packet, PacketCodec};

pin_project! {
    /// A framed packet stream over an async I/O transport.
    ///
    /// Wraps a tokio-util `Framed` so sessions read and write whole packets
    /// instead of bytes.
    pub struct PacketStream<T> {
        #[pin]
        inner: Framed<T, PacketCodec>,
    }
}

impl<T> PacketStream<T>
where
    T: AsyncRead + AsyncWrite,
{
    /// Create a new packet stream over the given transport.
    pub fn new(transport: T) -> Self {
        Self::with_codec(transport, PacketCodec::new())
    }

    /// Create a new packet stream with a custom codec.
    pub fn with_codec(transport: T, codec: PacketCodec) -> Self {
        Self {
            inner: Framed::new(transport, codec),
        }
    }

    /// Get a reference to the underlying transport.
    pub fn get_ref(&self) -> &T {
        self.inner.get_ref()
    }

    /// Get a mutable reference to the underlying transport.
    pub fn get_mut(&mut self) -> &mut T {
        self.inner.get_mut()
    }

    /// Consume the stream and return the underlying transport.
    pub fn into_inner(self) -> T {
        self.inner.into_inner()
    }

    /// Whether undecoded bytes are buffered.
    pub fn has_buffered_input(&self) -> bool {
        !self.inner.read_buffer().is_empty()
    }
}

impl<T> PacketStream<T>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    /// Write one packet and flush it.
    pub async fn send_packet(&mut self, kind: u8, payload: Bytes) -> Result<(), CodecError> {
        self.inner.send(Packet::new(kind, payload)).await
    }

    /// Queue a packet without flushing.
    pub async fn feed_packet(&mut self, kind: u8, payload: Bytes) -> Result<(), CodecError> {
        self.inner.feed(Packet::new(kind, payload)).await
    }

    /// Flush queued packets.
    pub async fn flush(&mut self) -> Result<(), CodecError> {
        SinkExt::<Packet>::flush(&mut self.inner).await
    }

    /// Read the next packet; end of stream is [`CodecError::ConnectionClosed`].
    pub async fn next_packet(&mut self) -> Result<Packet, CodecError> {
        match self.inner.next().await {
            Some(packet) => packet,
            None => Err(CodecError::ConnectionClosed),
        }
    }
}

impl<T> Stream for PacketStream<T>
where
    T: AsyncRead + Unpin,
{
    type Item = Result<Packet, CodecError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.project().inner.poll_next(cx)
    }
}

impl<T> Sink<Packet> for PacketStream<T>
where
    T: AsyncWrite + Unpin,
{
    type Error = CodecError;

    fn poll_ready(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.project().inner.poll_ready(cx)
    }

    fn start_send(self: Pin<&mut Self>, item: Packet) -> Result<(), Self::Error> {
        self.project().inner.start_send(item)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.project().inner.poll_flush(cx)
    }

    fn poll_close(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.project().inner.poll_close(cx)
    }
}

impl<T> std::fmt::Debug for PacketStream<T>
where
    T: std::fmt::Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PacketStream")
            .field("transport", self.inner.get_ref())
            .finish()
    }
}

//! A scripted far end for a [`Connection`] under test.
//!
//! The peer speaks raw frames over the other half of an in-memory duplex
//! using the crate's own codec, so tests can play either endpoint byte for
//! byte while the connection under test runs its real reader and writer.

use std::{io, time::Duration};

use futures::{SinkExt, StreamExt};
use muxwire::{
    Connection,
    ConnectionBuilder,
    Frame,
    FrameDecoder,
    FrameEncoder,
    FrameError,
    Role,
    Settings,
    frame::CONNECTION_PREFACE,
};
use tokio::{
    io::{AsyncWriteExt, DuplexStream, ReadHalf, WriteHalf},
    time::timeout,
};
use tokio_util::codec::{FramedRead, FramedWrite};

/// Buffer size of the in-memory transport.
pub const DUPLEX_CAPACITY: usize = 1 << 20;

/// How long [`ScriptedPeer::next_frame`] waits by default.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);

/// The far end of a connection under test.
pub struct ScriptedPeer {
    role: Role,
    frames: FramedRead<ReadHalf<DuplexStream>, FrameDecoder>,
    sink: FramedWrite<WriteHalf<DuplexStream>, FrameEncoder>,
    timeout: Duration,
}

impl ScriptedPeer {
    /// Build a connection from `builder` over a fresh duplex and return it
    /// with a peer playing the opposite role. The connection is not opened.
    pub fn pair(builder: ConnectionBuilder) -> (Connection, Self) {
        let (near, far) = tokio::io::duplex(DUPLEX_CAPACITY);
        let connection = builder.build(near);
        let role = match connection.role() {
            Role::Client => Role::Server,
            Role::Server => Role::Client,
        };
        let (read, write) = tokio::io::split(far);
        let peer = Self {
            role,
            frames: FramedRead::new(read, FrameDecoder::new(role == Role::Server)),
            sink: FramedWrite::new(write, FrameEncoder::new()),
            timeout: DEFAULT_TIMEOUT,
        };
        (connection, peer)
    }

    /// Role the peer plays.
    pub fn role(&self) -> Role { self.role }

    /// Change how long reads wait before failing with `TimedOut`.
    pub fn set_timeout(&mut self, timeout: Duration) { self.timeout = timeout; }

    /// Send one frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame cannot be encoded or written.
    pub async fn send(&mut self, frame: Frame) -> Result<(), FrameError> { self.sink.send(frame).await }

    /// Send the client connection preface. Only meaningful for a client peer.
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes cannot be written.
    pub async fn send_preface(&mut self) -> io::Result<()> {
        let io = self.sink.get_mut();
        io.write_all(CONNECTION_PREFACE).await?;
        io.flush().await
    }

    /// Send raw bytes, bypassing the encoder.
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes cannot be written.
    pub async fn send_raw(&mut self, bytes: &[u8]) -> io::Result<()> {
        let io = self.sink.get_mut();
        io.write_all(bytes).await?;
        io.flush().await
    }

    /// Read the next frame. `Ok(None)` means the connection released the
    /// transport.
    ///
    /// # Errors
    ///
    /// Returns `TimedOut` if no frame arrives in time, or the decode failure.
    pub async fn next_frame(&mut self) -> io::Result<Option<Frame>> {
        match timeout(self.timeout, self.frames.next()).await {
            Err(_) => Err(io::Error::new(io::ErrorKind::TimedOut, "no frame from connection")),
            Ok(None) => Ok(None),
            Ok(Some(frame)) => frame.map(Some).map_err(io::Error::other),
        }
    }

    /// Read frames until one satisfies `wanted`, discarding the rest.
    ///
    /// # Errors
    ///
    /// As for [`ScriptedPeer::next_frame`], plus `UnexpectedEof` if the
    /// transport ends first.
    pub async fn next_matching(&mut self, wanted: impl Fn(&Frame) -> bool) -> io::Result<Frame> {
        loop {
            match self.next_frame().await? {
                Some(frame) if wanted(&frame) => return Ok(frame),
                Some(_) => {}
                None => return Err(io::ErrorKind::UnexpectedEof.into()),
            }
        }
    }

    /// Read frames until the transport closes, returning what was seen.
    ///
    /// # Errors
    ///
    /// As for [`ScriptedPeer::next_frame`].
    pub async fn drain(&mut self) -> io::Result<Vec<Frame>> {
        let mut frames = Vec::new();
        while let Some(frame) = self.next_frame().await? {
            frames.push(frame);
        }
        Ok(frames)
    }

    /// Complete the opening exchange with an opened connection: send the
    /// preface when playing the client, send `settings`, then read up to and
    /// including the connection's own SETTINGS, which is returned.
    ///
    /// # Errors
    ///
    /// Returns an error if a write fails or the connection's SETTINGS does
    /// not arrive.
    pub async fn handshake(&mut self, settings: Settings) -> io::Result<Settings> {
        if self.role == Role::Client {
            self.send_preface().await?;
        }
        self.send(Frame::Settings { ack: false, settings })
            .await
            .map_err(io::Error::other)?;
        match self
            .next_matching(|frame| matches!(frame, Frame::Settings { ack: false, .. }))
            .await?
        {
            Frame::Settings { settings, .. } => Ok(settings),
            _ => unreachable!("matched SETTINGS"),
        }
    }
}

//! Serialized access to the outbound half of the transport.
//!
//! Every physical write goes through one [`Writer`]. Callers that must keep a
//! state change and its frame in order (stream creation, shutdown) hold the
//! sink lock across both; everyone else uses [`Writer::send`].

use std::{
    pin::Pin,
    sync::atomic::{AtomicU32, Ordering},
};

use futures::SinkExt;
use tokio::{
    io::AsyncWrite,
    sync::{Mutex, MutexGuard},
};
use tokio_util::codec::FramedWrite;
use tracing::trace;

use crate::{
    error::{ConnectionError, Result},
    frame::{Frame, FrameEncoder, Preface},
    metrics::{self, Direction},
    settings::{self, Settings},
};

pub(crate) type BoxedWrite = Pin<Box<dyn AsyncWrite + Send>>;

/// Exclusive handle to the framed write half.
pub(crate) struct FrameSink {
    framed: FramedWrite<BoxedWrite, FrameEncoder>,
    closed: bool,
}

impl FrameSink {
    /// Encode and flush one frame.
    pub(crate) async fn send(&mut self, frame: Frame) -> Result<()> {
        if self.closed {
            return Err(ConnectionError::Shutdown);
        }
        trace!(kind = ?frame.kind(), stream_id = frame.stream_id(), "frame sent");
        self.framed.send(frame).await?;
        metrics::inc_frames(Direction::Outbound);
        Ok(())
    }

    pub(crate) async fn preface(&mut self) -> Result<()> {
        self.framed.send(Preface).await?;
        Ok(())
    }

    pub(crate) async fn flush(&mut self) -> Result<()> {
        if self.closed {
            return Err(ConnectionError::Shutdown);
        }
        <_ as SinkExt<Frame>>::flush(&mut self.framed).await?;
        Ok(())
    }
}

pub(crate) struct Writer {
    sink: Mutex<FrameSink>,
    max_frame_size: AtomicU32,
}

impl Writer {
    pub(crate) fn new(io: BoxedWrite) -> Self {
        Self {
            sink: Mutex::new(FrameSink {
                framed: FramedWrite::new(io, FrameEncoder::new()),
                closed: false,
            }),
            max_frame_size: AtomicU32::new(settings::DEFAULT_MAX_FRAME_SIZE),
        }
    }

    pub(crate) async fn lock(&self) -> MutexGuard<'_, FrameSink> { self.sink.lock().await }

    pub(crate) async fn send(&self, frame: Frame) -> Result<()> { self.lock().await.send(frame).await }

    /// Largest DATA payload the peer accepts in one frame.
    pub(crate) fn max_frame_size(&self) -> usize {
        self.max_frame_size.load(Ordering::Acquire) as usize
    }

    /// Apply the peer's frame size limit and acknowledge its SETTINGS.
    pub(crate) async fn acknowledge_settings(&self, peer: &Settings) -> Result<()> {
        let mut sink = self.lock().await;
        if let Some(size) = peer.get(settings::MAX_FRAME_SIZE) {
            sink.framed.encoder_mut().set_max_frame_size(size as usize);
            self.max_frame_size.store(size, Ordering::Release);
        }
        sink.send(Frame::Settings {
            ack: true,
            settings: Settings::new(),
        })
        .await
    }

    /// Flush and shut down the write half. Later writes fail with
    /// [`ConnectionError::Shutdown`].
    pub(crate) async fn close(&self) {
        let mut sink = self.lock().await;
        if std::mem::replace(&mut sink.closed, true) {
            return;
        }
        if let Err(e) = <_ as SinkExt<Frame>>::close(&mut sink.framed).await {
            trace!(error = %e, "closing the write half failed");
        }
    }
}

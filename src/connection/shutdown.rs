//! Graceful shutdown and close.

use bytes::Bytes;
use log::info;

use super::Shared;
use crate::{
    error::{ErrorCode, Result},
    frame::Frame,
};

impl Shared {
    /// Stop accepting new streams and send GOAWAY with the last peer stream
    /// id processed. Later calls do nothing.
    pub(crate) async fn shutdown(&self, code: ErrorCode) -> Result<()> {
        let mut sink = self.writer.lock().await;
        let last_stream_id = {
            let mut state = self.lock_state();
            if std::mem::replace(&mut state.shutdown, true) {
                return Ok(());
            }
            state.streams.last_good_stream_id()
        };
        sink.send(Frame::GoAway {
            last_stream_id,
            code,
            debug_data: Bytes::new(),
        })
        .await
    }

    /// Shut down, reset every remaining stream with `stream_code`, cancel
    /// every pending ping and release the transport. Later calls do nothing.
    ///
    /// Every step runs even if an earlier write fails; the first failure is
    /// returned.
    pub(crate) async fn close(&self, connection_code: ErrorCode, stream_code: ErrorCode) -> Result<()> {
        if std::mem::replace(&mut self.lock_state().closing, true) {
            return Ok(());
        }
        let mut first_error = self.shutdown(connection_code).await.err();

        let (streams, pings, gauge) = {
            let mut state = self.lock_state();
            let pings: Vec<_> = state.pings.drain().map(|(_, ping)| ping).collect();
            (state.streams.drain(), pings, state.gauge.take())
        };
        self.changed.notify_waiters();

        for stream in &streams {
            if stream.mark_reset(stream_code)
                && let Err(e) = self.send_reset(stream.id(), stream_code).await
            {
                first_error.get_or_insert(e);
            }
        }
        for ping in &pings {
            ping.cancel();
        }

        self.writer.close().await;
        self.closed.cancel();
        drop(gauge);
        info!(
            "connection closed: role={}, code={connection_code}, reset_streams={}, canceled_pings={}",
            self.role,
            streams.len(),
            pings.len()
        );
        first_error.map_or(Ok(()), Err)
    }
}

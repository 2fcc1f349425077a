//! Assertion macros shared by test helpers and integration tests.

/// Await a send future and panic with contextual diagnostics on failure.
#[macro_export]
macro_rules! send_expect {
    ($fut:expr) => {{
        $fut.await
            .expect(concat!("send failed at ", file!(), ":", line!()))
    }};
    ($fut:expr, $msg:expr) => {{
        let m = ::std::format!("{msg} at {}:{}", file!(), line!(), msg = $msg);
        $fut.await.expect(&m)
    }};
}

/// Await the peer's next frame, panicking on a read failure or end of stream.
#[macro_export]
macro_rules! recv_expect {
    ($peer:expr) => {{
        $peer
            .next_frame()
            .await
            .expect(concat!("recv failed at ", file!(), ":", line!()))
            .expect(concat!("peer saw end of stream at ", file!(), ":", line!()))
    }};
    ($peer:expr, $msg:expr) => {{
        let m = ::std::format!("{msg} at {}:{}", file!(), line!(), msg = $msg);
        $peer.next_frame().await.expect(&m).expect(&m)
    }};
}

pub use crate::{recv_expect, send_expect};

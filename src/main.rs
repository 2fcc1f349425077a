//! `muxwire` inspection tool.
//!
//! Decodes a captured byte stream and prints the frames it contains.

mod cli;

use std::{error::Error, path::Path};

use bytes::Bytes;
use clap::Parser;
use cli::{Cli, CliRole, Command};
use futures::StreamExt;
use muxwire::{
    Frame,
    FrameDecoder,
    Role,
    ws::{FrameCallback, Message, WebSocketError, WebSocketReader},
};
use tokio_util::codec::FramedRead;
use tracing::warn;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn Error>> {
    // Applications embedding the library should install their own subscriber.
    tracing_subscriber::fmt::init();

    let Command::Inspect { file, websocket, role } = Cli::parse().command;
    let role = match role {
        CliRole::Client => Role::Client,
        CliRole::Server => Role::Server,
    };
    if websocket {
        inspect_websocket(&file, role).await
    } else {
        inspect_frames(&file, role).await
    }
}

async fn inspect_frames(path: &Path, role: Role) -> Result<(), Box<dyn Error>> {
    let capture = std::fs::read(path)?;
    let mut frames = FramedRead::new(&capture[..], FrameDecoder::new(role == Role::Server));
    while let Some(frame) = frames.next().await {
        println!("{}", describe(&frame?));
    }
    Ok(())
}

fn describe(frame: &Frame) -> String {
    let prefix = format!("{:?} stream={}", frame.kind(), frame.stream_id());
    match frame {
        Frame::Data { end_stream, payload, .. } => {
            format!("{prefix} len={} end_stream={end_stream}", payload.len())
        }
        Frame::Headers { end_stream, headers, .. } => {
            format!("{prefix} headers={} end_stream={end_stream}", headers.len())
        }
        Frame::PushPromise { promised_id, .. } => format!("{prefix} promised={promised_id}"),
        Frame::Settings { ack, settings } => format!("{prefix} ack={ack} entries={}", settings.len()),
        Frame::Ping { ack, payload1, payload2 } => {
            format!("{prefix} ack={ack} payload={payload1:#010x}:{payload2:#010x}")
        }
        Frame::GoAway { last_stream_id, code, .. } => format!("{prefix} last={last_stream_id} code={code}"),
        Frame::RstStream { code, .. } => format!("{prefix} code={code}"),
        Frame::WindowUpdate { increment, .. } => format!("{prefix} increment={increment}"),
        Frame::Priority { .. } => prefix,
    }
}

struct Print;

impl FrameCallback for Print {
    fn on_message(&mut self, message: Message) {
        match message {
            Message::Text(text) => println!("TEXT len={} {text:?}", text.len()),
            Message::Binary(data) => println!("BINARY len={}", data.len()),
        }
    }

    fn on_ping(&mut self, payload: Bytes) { println!("PING len={}", payload.len()); }

    fn on_pong(&mut self, payload: Bytes) { println!("PONG len={}", payload.len()); }

    fn on_close(&mut self, code: u16, reason: String) { println!("CLOSE code={code} reason={reason:?}"); }
}

async fn inspect_websocket(path: &Path, role: Role) -> Result<(), Box<dyn Error>> {
    let capture = std::fs::read(path)?;
    let mut reader = WebSocketReader::new(role, &capture[..], Print);
    while !reader.is_closed() {
        match reader.process_next_frame().await {
            Ok(()) => {}
            Err(WebSocketError::UnexpectedEof) => {
                warn!("capture ended");
                break;
            }
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

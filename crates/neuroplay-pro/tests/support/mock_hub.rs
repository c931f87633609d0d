#![allow(dead_code)]

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;

pub const STEP_TIMEOUT: Duration = Duration::from_secs(3);

enum ConnectionCommand {
    SendText(String),
    ForceClose,
}

/// One text frame sent by the client.
#[derive(Debug, Clone)]
pub struct Frame {
    pub raw: String,
}

impl Frame {
    /// Command name: the whole frame for bare commands, the `command`
    /// field for JSON objects.
    pub fn command(&self) -> String {
        match serde_json::from_str::<Value>(&self.raw) {
            Ok(Value::Object(map)) => map
                .get("command")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            _ => self.raw.clone(),
        }
    }

    pub fn json(&self) -> Value {
        serde_json::from_str(&self.raw).expect("frame is not JSON")
    }
}

pub struct MockConnection {
    frame_rx: mpsc::UnboundedReceiver<Frame>,
    command_tx: mpsc::Sender<ConnectionCommand>,
}

impl MockConnection {
    pub async fn recv_frame(&mut self) -> Frame {
        timeout(STEP_TIMEOUT, self.frame_rx.recv())
            .await
            .expect("timed out waiting for a frame")
            .expect("mock connection frame channel closed")
    }

    /// Next frame, which must carry `expected`.
    pub async fn expect_command(&mut self, expected: &str) -> Frame {
        let frame = self.recv_frame().await;
        assert_eq!(frame.command(), expected, "unexpected frame {}", frame.raw);
        frame
    }

    /// Next frame carrying `expected`, skipping frames whose command is in
    /// `skip` (periodic polls).
    pub async fn expect_command_skipping(&mut self, expected: &str, skip: &[&str]) -> Frame {
        loop {
            let frame = self.recv_frame().await;
            let command = frame.command();
            if command == expected {
                return frame;
            }
            assert!(
                skip.contains(&command.as_str()),
                "unexpected frame {} while waiting for {expected}",
                frame.raw
            );
        }
    }

    /// Whether a frame carrying `command` arrives within `wait`.
    pub async fn sees_command_within(&mut self, command: &str, wait: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            match tokio::time::timeout_at(deadline, self.frame_rx.recv()).await {
                Ok(Some(frame)) if frame.command() == command => return true,
                Ok(Some(_)) => {}
                _ => return false,
            }
        }
    }

    pub async fn send_json(&self, value: Value) {
        self.send_text(value.to_string()).await;
    }

    pub async fn send_text(&self, text: impl Into<String>) {
        self.command_tx
            .send(ConnectionCommand::SendText(text.into()))
            .await
            .expect("failed to send command to mock connection");
    }

    pub async fn force_close(&self) {
        let _ = self.command_tx.send(ConnectionCommand::ForceClose).await;
    }
}

pub struct MockHubServer {
    addr: SocketAddr,
    connection_rx: mpsc::Receiver<MockConnection>,
    server_task: JoinHandle<()>,
}

impl MockHubServer {
    pub async fn start() -> std::io::Result<Self> {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await?;
        let addr = listener.local_addr()?;
        let (connection_tx, connection_rx) = mpsc::channel(16);

        let server_task = tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                let connection_tx = connection_tx.clone();

                tokio::spawn(async move {
                    let Ok(ws_stream) = accept_async(stream).await else {
                        return;
                    };

                    let (mut ws_sink, mut ws_source) = ws_stream.split();
                    let (frame_tx, frame_rx) = mpsc::unbounded_channel();
                    let (command_tx, mut command_rx) = mpsc::channel(64);

                    let connection = MockConnection {
                        frame_rx,
                        command_tx,
                    };
                    if connection_tx.send(connection).await.is_err() {
                        return;
                    }

                    loop {
                        tokio::select! {
                            maybe_command = command_rx.recv() => {
                                match maybe_command {
                                    Some(ConnectionCommand::SendText(text)) => {
                                        if ws_sink.send(Message::Text(text.into())).await.is_err() {
                                            break;
                                        }
                                    }
                                    Some(ConnectionCommand::ForceClose) | None => break,
                                }
                            }
                            maybe_message = ws_source.next() => {
                                match maybe_message {
                                    Some(Ok(Message::Text(text))) => {
                                        let _ = frame_tx.send(Frame { raw: text.as_str().to_string() });
                                    }
                                    Some(Ok(Message::Close(_)) | Err(_)) | None => break,
                                    Some(Ok(_)) => {}
                                }
                            }
                        }
                    }
                });
            }
        });

        Ok(Self {
            addr,
            connection_rx,
            server_task,
        })
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    pub async fn accept_connection(&mut self) -> MockConnection {
        timeout(STEP_TIMEOUT, self.connection_rx.recv())
            .await
            .expect("timed out waiting for client connection")
            .expect("mock server connection channel closed")
    }
}

impl Drop for MockHubServer {
    fn drop(&mut self) {
        self.server_task.abort();
    }
}

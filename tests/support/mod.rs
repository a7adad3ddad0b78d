//! Scripted SMTP server for integration tests.
//!
//! Listens on an ephemeral loopback port and speaks just enough ESMTP for
//! lettre's client: greeting, EHLO, MAIL, RCPT, DATA, NOOP, RSET and QUIT.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

/// How the server behaves on every connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Script {
    /// Accept and queue every message.
    Accept,
    /// Accept the TCP connection but never send a greeting.
    Silent,
    /// Answer greeting and EHLO, then stop responding.
    StallAfterEhlo,
    /// Reject every recipient with 550.
    RejectRecipient,
}

#[derive(Default)]
struct State {
    connections: AtomicUsize,
    quits: AtomicUsize,
    noops: AtomicUsize,
    messages: Mutex<Vec<String>>,
}

pub struct FakeSmtpServer {
    pub port: u16,
    state: Arc<State>,
}

impl FakeSmtpServer {
    pub async fn start(script: Script) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let state = Arc::new(State::default());

        let accept_state = state.clone();
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                accept_state.connections.fetch_add(1, Ordering::SeqCst);
                let state = accept_state.clone();
                tokio::spawn(async move {
                    let _ = serve(socket, script, state).await;
                });
            }
        });

        Self { port, state }
    }

    pub fn connections(&self) -> usize {
        self.state.connections.load(Ordering::SeqCst)
    }

    pub fn quits(&self) -> usize {
        self.state.quits.load(Ordering::SeqCst)
    }

    pub fn noops(&self) -> usize {
        self.state.noops.load(Ordering::SeqCst)
    }

    /// Raw DATA payloads received so far.
    pub fn messages(&self) -> Vec<String> {
        self.state.messages.lock().unwrap().clone()
    }
}

async fn serve(socket: TcpStream, script: Script, state: Arc<State>) -> std::io::Result<()> {
    let (reader, mut writer) = socket.into_split();

    if script == Script::Silent {
        return drain(reader).await;
    }

    let mut lines = BufReader::new(reader);
    writer.write_all(b"220 fake.smtp ESMTP ready\r\n").await?;

    let mut greeted = false;
    let mut line = String::new();
    loop {
        line.clear();
        if lines.read_line(&mut line).await? == 0 {
            return Ok(());
        }
        if greeted && script == Script::StallAfterEhlo {
            return drain(lines).await;
        }

        let verb = line
            .split_whitespace()
            .next()
            .unwrap_or_default()
            .to_ascii_uppercase();

        let reply: &[u8] = match verb.as_str() {
            "EHLO" | "HELO" => {
                greeted = true;
                b"250-fake.smtp\r\n250 SIZE 10485760\r\n"
            }
            "MAIL" => b"250 2.1.0 OK\r\n",
            "RCPT" if script == Script::RejectRecipient => b"550 5.1.1 No such user\r\n",
            "RCPT" => b"250 2.1.5 OK\r\n",
            "DATA" => {
                writer
                    .write_all(b"354 End data with <CR><LF>.<CR><LF>\r\n")
                    .await?;
                let body = read_data(&mut lines).await?;
                state.messages.lock().unwrap().push(body);
                b"250 2.0.0 Queued\r\n"
            }
            "NOOP" => {
                state.noops.fetch_add(1, Ordering::SeqCst);
                b"250 2.0.0 OK\r\n"
            }
            "RSET" => b"250 2.0.0 OK\r\n",
            "QUIT" => {
                state.quits.fetch_add(1, Ordering::SeqCst);
                writer.write_all(b"221 2.0.0 Bye\r\n").await?;
                return Ok(());
            }
            _ => b"502 5.5.2 Command not recognized\r\n",
        };
        writer.write_all(reply).await?;
    }
}

async fn read_data<R: AsyncBufReadExt + Unpin>(lines: &mut R) -> std::io::Result<String> {
    let mut body = String::new();
    let mut line = String::new();
    loop {
        line.clear();
        if lines.read_line(&mut line).await? == 0 || line == ".\r\n" {
            return Ok(body);
        }
        body.push_str(&line);
    }
}

/// Read until the peer hangs up without answering.
async fn drain<R: AsyncRead + Unpin>(mut reader: R) -> std::io::Result<()> {
    let mut buf = [0u8; 1024];
    while reader.read(&mut buf).await? > 0 {}
    Ok(())
}

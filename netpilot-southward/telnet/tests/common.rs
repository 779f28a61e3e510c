#![allow(dead_code)]

use np_driver_telnet::codec::{IAC, OPT_ECHO, WILL};
use std::{
    net::SocketAddr,
    sync::{Arc, Mutex, Once},
    time::Duration,
};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
    task::JoinHandle,
};
use tracing::Level;

static INIT_TRACING: Once = Once::new();

pub fn init_tracing() {
    INIT_TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_max_level(Level::DEBUG)
            .with_target(false)
            .without_time()
            .try_init();
    });
}

pub const RUNNING_CONFIG: &str = "hostname r1\r\n!\r\ninterface Gi0/1\r\n description uplink\r\n!\r\nend";

#[derive(Debug, Clone, Copy)]
pub struct DeviceOptions {
    pub password: &'static str,
    /// Start unprivileged and require `enable` with this secret
    pub enable_secret: Option<&'static str>,
    /// Accept the connection but never say anything
    pub silent: bool,
}

impl Default for DeviceOptions {
    fn default() -> Self {
        Self {
            password: "good",
            enable_secret: None,
            silent: false,
        }
    }
}

/// A scripted IOS-like CLI listening on loopback.
pub struct FakeDevice {
    pub addr: SocketAddr,
    received: Arc<Mutex<Vec<String>>>,
    task: JoinHandle<()>,
}

impl FakeDevice {
    pub async fn start(opts: DeviceOptions) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let received = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&received);
        let task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let log = Arc::clone(&log);
                tokio::spawn(async move {
                    let _ = serve(stream, opts, log).await;
                });
            }
        });
        Self {
            addr,
            received,
            task,
        }
    }

    pub fn address(&self) -> String {
        self.addr.to_string()
    }

    /// Every line the device received, passwords included.
    pub fn received(&self) -> Vec<String> {
        self.received.lock().unwrap().clone()
    }
}

impl Drop for FakeDevice {
    fn drop(&mut self) {
        self.task.abort();
    }
}

enum State {
    Username,
    Password,
    User,
    Enable,
    Exec,
    Config { interface: bool },
    Paging,
}

enum Reply {
    Send(String),
    /// Written one by one with a pause, so the peer reads them separately
    Split(Vec<Vec<u8>>),
    Close,
}

async fn serve(
    mut stream: TcpStream,
    opts: DeviceOptions,
    received: Arc<Mutex<Vec<String>>>,
) -> std::io::Result<()> {
    let mut buf = [0u8; 1024];
    if opts.silent {
        while stream.read(&mut buf).await? > 0 {}
        return Ok(());
    }

    stream.write_all(&[IAC, WILL, OPT_ECHO]).await?;
    stream
        .write_all(b"\r\n\r\nUser Access Verification\r\n\r\nUsername: ")
        .await?;

    let mut state = State::Username;
    let mut pending: Vec<u8> = Vec::new();
    let mut line: Vec<u8> = Vec::new();
    loop {
        let n = stream.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }
        pending.extend_from_slice(&buf[..n]);

        let mut i = 0;
        while i < pending.len() {
            let b = pending[i];
            if b == IAC {
                if i + 3 > pending.len() {
                    break;
                }
                i += 3;
                continue;
            }
            i += 1;
            if let State::Paging = state {
                if b == b' ' {
                    stream.write_all(b"\r\nline 3\r\nr1#").await?;
                    state = State::Exec;
                }
                continue;
            }
            match b {
                b'\r' => {}
                b'\n' => {
                    let text = String::from_utf8_lossy(&line).into_owned();
                    line.clear();
                    received.lock().unwrap().push(text.clone());
                    match respond(&mut state, &text, &opts) {
                        Reply::Send(out) => stream.write_all(out.as_bytes()).await?,
                        Reply::Split(chunks) => {
                            for chunk in chunks {
                                stream.write_all(&chunk).await?;
                                stream.flush().await?;
                                tokio::time::sleep(Duration::from_millis(50)).await;
                            }
                        }
                        Reply::Close => return Ok(()),
                    }
                }
                other => line.push(other),
            }
        }
        pending.drain(..i);
    }
}

fn invalid(text: &str, prompt: &str) -> String {
    format!("{text}\r\n          ^\r\n% Invalid input detected at '^' marker.\r\n\r\n{prompt}")
}

fn respond(state: &mut State, text: &str, opts: &DeviceOptions) -> Reply {
    let reply = match state {
        State::Username => {
            *state = State::Password;
            format!("{text}\r\nPassword: ")
        }
        State::Password if text == opts.password => {
            if opts.enable_secret.is_some() {
                *state = State::User;
                "\r\nr1>".to_string()
            } else {
                *state = State::Exec;
                "\r\nr1#".to_string()
            }
        }
        State::Password => {
            *state = State::Username;
            "\r\n% Login invalid\r\n\r\nUsername: ".to_string()
        }
        State::User => match text {
            "enable" => {
                *state = State::Enable;
                "enable\r\nPassword: ".to_string()
            }
            "exit" => return Reply::Close,
            _ => format!("{text}\r\nr1>"),
        },
        State::Enable if Some(text) == opts.enable_secret => {
            *state = State::Exec;
            "\r\nr1#".to_string()
        }
        State::Enable => {
            *state = State::User;
            "\r\n% Access denied\r\n\r\nr1>".to_string()
        }
        State::Exec => match text {
            "exit" => return Reply::Close,
            "terminal length 0" | "terminal width 511" => format!("{text}\r\nr1#"),
            "show running-config" => {
                format!("{text}\r\nBuilding configuration...\r\n\r\n{RUNNING_CONFIG}\r\nr1#")
            }
            "show clock" => format!("{text}\r\n*10:00:01.123 UTC Wed Oct 14 2026\r\nr1#"),
            "show interfaces description" => {
                // Cut inside the two-byte "é" and the three-byte "上"
                let body = format!("{text}\r\nGi0/1  up  café\r\nGi0/2  up  上联\r\nr1#");
                let bytes = body.into_bytes();
                let first = text.len() + "\r\nGi0/1  up  caf".len() + 1;
                let second = first + 1 + "\r\nGi0/2  up  ".len() + 1;
                return Reply::Split(vec![
                    bytes[..first].to_vec(),
                    bytes[first..second].to_vec(),
                    bytes[second..].to_vec(),
                ]);
            }
            "show pager" => {
                *state = State::Paging;
                format!("{text}\r\nline 1\r\nline 2\r\n --More-- ")
            }
            "configure terminal" => {
                *state = State::Config { interface: false };
                format!(
                    "{text}\r\nEnter configuration commands, one per line.  End with CNTL/Z.\r\nr1(config)#"
                )
            }
            _ => invalid(text, "r1#"),
        },
        State::Config { interface } => {
            let prompt = if *interface { "r1(config-if)#" } else { "r1(config)#" };
            if text == "end" {
                *state = State::Exec;
                format!("{text}\r\nr1#")
            } else if text.starts_with("interface ") {
                *state = State::Config { interface: true };
                format!("{text}\r\nr1(config-if)#")
            } else if text == "bogus" {
                invalid(text, prompt)
            } else {
                format!("{text}\r\n{prompt}")
            }
        }
        State::Paging => String::new(),
    };
    Reply::Send(reply)
}

use crate::{
    codec::{negotiation_reply, TelnetCodec, TelnetFrame, TelnetOutput},
    types::{PlatformProfile, TelnetConfig},
};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use netpilot_sdk::{LoginCredential, Session, SessionError, SessionResult};
use std::time::Duration;
use tokio::{
    io::{AsyncRead, AsyncWrite},
    time::{timeout, Instant},
};
use tokio_util::codec::Framed;
use tracing::{debug, instrument, warn};

/// Interactive CLI session over a Telnet byte stream.
///
/// Generic over the transport so tests can drive it over an in-memory duplex.
pub struct TelnetSession<T> {
    framed: Framed<T, TelnetCodec>,
    profile: PlatformProfile,
    config: TelnetConfig,
    /// Host part of the prompt, learned at login
    hostname: Option<String>,
    usable: bool,
}

impl<T> TelnetSession<T>
where
    T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    pub fn new(transport: T, profile: PlatformProfile, config: TelnetConfig) -> Self {
        Self {
            framed: Framed::new(transport, TelnetCodec),
            profile,
            config,
            hostname: None,
            usable: true,
        }
    }

    #[inline]
    pub fn hostname(&self) -> Option<&str> {
        self.hostname.as_deref()
    }

    #[inline]
    fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.config.connection.read_timeout_ms)
    }

    async fn send(&mut self, output: TelnetOutput) -> SessionResult<()> {
        let bound = Duration::from_millis(self.config.connection.write_timeout_ms);
        match timeout(bound, self.framed.send(output)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                self.usable = false;
                Err(e.into())
            }
            Err(_) => {
                self.usable = false;
                Err(SessionError::Timeout(bound))
            }
        }
    }

    #[inline]
    async fn send_line(&mut self, line: &str) -> SessionResult<()> {
        self.send(TelnetOutput::Line(line.to_string())).await
    }

    /// Accumulate device text until `done` accepts it.
    ///
    /// Negotiation requests are answered and pager prompts are stepped over
    /// along the way. The read timeout applies to the whole wait.
    async fn read_until<F>(&mut self, mut done: F) -> SessionResult<String>
    where
        F: FnMut(&PlatformProfile, &str) -> bool,
    {
        let bound = self.read_timeout();
        let deadline = Instant::now() + bound;
        let mut text = String::new();
        // Tail of a multi-byte character cut by the transport
        let mut partial: Vec<u8> = Vec::new();

        loop {
            let frame = match tokio::time::timeout_at(deadline, self.framed.next()).await {
                Ok(Some(Ok(frame))) => frame,
                Ok(Some(Err(e))) => {
                    self.usable = false;
                    return Err(e.into());
                }
                Ok(None) => {
                    self.usable = false;
                    return Err(SessionError::Transport("connection closed by peer".into()));
                }
                Err(_) => return Err(SessionError::Timeout(bound)),
            };

            match frame {
                TelnetFrame::Negotiate { command, option } => {
                    if let Some(reply) = negotiation_reply(command, option) {
                        self.send(reply).await?;
                    }
                }
                TelnetFrame::Data(bytes) => {
                    partial.extend_from_slice(&bytes);
                    decode_utf8(&mut partial, &mut text);
                    if text.len() > self.config.max_output_bytes {
                        return Err(SessionError::Protocol(format!(
                            "output exceeded {} bytes",
                            self.config.max_output_bytes
                        )));
                    }
                    if self.profile.is_pager(&text) {
                        strip_pager(&mut text, &self.profile);
                        self.send(TelnetOutput::Keys(" ".into())).await?;
                        continue;
                    }
                    if done(&self.profile, &text) {
                        return Ok(text);
                    }
                }
            }
        }
    }

    async fn read_prompt(&mut self) -> SessionResult<String> {
        let hostname = self.hostname.clone();
        self.read_until(move |profile, text| {
            profile.trailing_prompt(text, hostname.as_deref()).is_some()
        })
        .await
    }

    /// Run the login dialogue, raise privilege if needed and disable paging.
    #[instrument(name = "telnet-login", skip_all, fields(platform = self.profile.name))]
    pub async fn login(&mut self, credential: &LoginCredential) -> SessionResult<()> {
        let banner = self
            .read_until(|p, t| {
                p.wants_username(t) || p.wants_password(t) || p.trailing_prompt(t, None).is_some()
            })
            .await?;

        let mut after = banner;
        if self.profile.wants_username(&after) {
            self.send_line(&credential.username).await?;
            after = self
                .read_until(|p, t| p.wants_password(t) || p.trailing_prompt(t, None).is_some())
                .await?;
        }
        if self.profile.wants_password(&after) {
            self.send_line(credential.password()).await?;
            after = self
                .read_until(|p, t| {
                    p.is_login_failure(t)
                        || p.wants_username(t)
                        || p.wants_password(t)
                        || p.trailing_prompt(t, None).is_some()
                })
                .await?;
        }

        let Some(prompt) = self.profile.trailing_prompt(&after, None).map(str::to_string) else {
            self.usable = false;
            return Err(SessionError::Auth(format!(
                "login refused for user {}",
                credential.username
            )));
        };
        self.hostname = Some(self.profile.hostname_of(&prompt));
        debug!(prompt = %prompt, "Logged in");

        if let (Some(user), Some(enable), Some(secret)) = (
            self.profile.user_terminator,
            self.profile.enable,
            credential.enable_secret(),
        ) {
            if prompt.ends_with(user) {
                self.elevate(enable, secret).await?;
            }
        }

        let paging = self.profile.disable_paging;
        for command in paging {
            self.send_line(command).await?;
            self.read_prompt().await?;
        }
        Ok(())
    }

    async fn elevate(&mut self, enable: &str, secret: &str) -> SessionResult<()> {
        self.send_line(enable).await?;
        let reply = self
            .read_until(|p, t| p.wants_password(t) || p.trailing_prompt(t, None).is_some())
            .await?;
        if self.profile.wants_password(&reply) {
            self.send_line(secret).await?;
        }
        let reply = self.read_prompt().await?;
        let privileged = self
            .profile
            .trailing_prompt(&reply, None)
            .is_some_and(|p| p.chars().last() != self.profile.user_terminator);
        if privileged {
            Ok(())
        } else {
            Err(SessionError::Auth("enable secret rejected".into()))
        }
    }

    /// Send one line and return the device output between echo and prompt.
    async fn exchange(&mut self, command: &str) -> SessionResult<String> {
        self.send_line(command).await?;
        let raw = self.read_prompt().await?;
        let output = clean_output(&raw, command);
        if let Some(line) = self.profile.find_error(&output) {
            return Err(SessionError::Command {
                command: command.to_string(),
                output: line.to_string(),
            });
        }
        Ok(output)
    }
}

#[async_trait]
impl<T> Session for TelnetSession<T>
where
    T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    fn is_usable(&self) -> bool {
        self.usable
    }

    async fn execute(&mut self, command: &str) -> SessionResult<String> {
        if !self.usable {
            return Err(SessionError::Closed);
        }
        self.exchange(command).await
    }

    async fn send_config(&mut self, commands: &[String]) -> SessionResult<String> {
        if !self.usable {
            return Err(SessionError::Closed);
        }
        let enter = self.profile.config_enter;
        let exit = self.profile.config_exit;
        self.exchange(enter).await?;

        let mut echo = String::new();
        for command in commands {
            match self.exchange(command).await {
                Ok(output) => {
                    echo.push_str(command);
                    echo.push('\n');
                    if !output.is_empty() {
                        echo.push_str(&output);
                        echo.push('\n');
                    }
                }
                Err(e @ SessionError::Command { .. }) => {
                    // Leave config mode so the session can be reused
                    if let Err(exit_err) = self.exchange(exit).await {
                        warn!(error = %exit_err, "Failed to leave configuration mode");
                        self.usable = false;
                    }
                    return Err(e);
                }
                Err(e) => return Err(e),
            }
        }

        self.exchange(exit).await?;
        Ok(echo)
    }

    async fn close(&mut self) {
        if !self.usable {
            return;
        }
        self.usable = false;
        let logout = self.profile.logout;
        if let Err(e) = self.send_line(logout).await {
            debug!(error = %e, "Logout not delivered");
        }
        let _ = SinkExt::<TelnetOutput>::close(&mut self.framed).await;
    }
}

/// Move the decodable prefix of `pending` into `text`.
///
/// An incomplete sequence at the end stays in `pending` until more bytes
/// arrive. Invalid bytes become U+FFFD.
fn decode_utf8(pending: &mut Vec<u8>, text: &mut String) {
    let mut start = 0;
    loop {
        match std::str::from_utf8(&pending[start..]) {
            Ok(valid) => {
                text.push_str(valid);
                pending.clear();
                return;
            }
            Err(e) => {
                let valid_end = start + e.valid_up_to();
                text.push_str(&String::from_utf8_lossy(&pending[start..valid_end]));
                match e.error_len() {
                    Some(len) => {
                        text.push(char::REPLACEMENT_CHARACTER);
                        start = valid_end + len;
                    }
                    None => {
                        pending.drain(..valid_end);
                        return;
                    }
                }
            }
        }
    }
}

/// Drop the command echo and the trailing prompt from raw device text.
fn clean_output(raw: &str, command: &str) -> String {
    let normalized = raw.replace("\r\n", "\n").replace('\r', "");
    let mut lines: Vec<&str> = normalized.split('\n').collect();

    // Trailing prompt line
    lines.pop();
    if lines
        .first()
        .is_some_and(|first| first.trim_end().ends_with(command.trim()))
    {
        lines.remove(0);
    }
    lines.join("\n").trim_end_matches('\n').to_string()
}

fn strip_pager(text: &mut String, profile: &PlatformProfile) {
    let lower = text.to_ascii_lowercase();
    if let Some(pos) = profile
        .pager_prompts
        .iter()
        .filter_map(|p| lower.rfind(p))
        .max()
    {
        text.truncate(pos);
    }
}

//! Test doubles for the notification layer: an in-process fake SMTP server
//! and a channel that records what it was asked to deliver.

use crate::core::{Alarm, Application, ChannelKind};
use crate::notification::error::ChannelError;
use crate::notification::AlarmChannel;
use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_native_tls::TlsAcceptor;

const CERT_PEM: &[u8] = include_bytes!("../../tests/fixtures/smtp/cert.pem");
const KEY_PEM: &[u8] = include_bytes!("../../tests/fixtures/smtp/key.pem");

trait ServerStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T> ServerStream for T where T: AsyncRead + AsyncWrite + Unpin + Send {}

type Connection = BufReader<Box<dyn ServerStream>>;

/// Behaviour switches for [`FakeSmtpServer`].
#[derive(Debug, Clone)]
pub struct FakeSmtpOptions {
    /// Advertise `AUTH PLAIN` in the EHLO reply.
    pub advertise_auth: bool,
    /// Answer `RCPT TO` for this address with 550.
    pub reject_recipient: Option<String>,
    /// Answer `AUTH` with 535.
    pub reject_auth: bool,
    /// Run TLS from the first byte, with a self-signed certificate.
    pub implicit_tls: bool,
    /// Advertise `STARTTLS` on the plain connection and honour it.
    pub starttls: bool,
}

impl Default for FakeSmtpOptions {
    fn default() -> Self {
        Self {
            advertise_auth: true,
            reject_recipient: None,
            reject_auth: false,
            implicit_tls: false,
            starttls: false,
        }
    }
}

/// Everything the fake server saw during one connection.
#[derive(Debug, Default, Clone)]
pub struct Transcript {
    /// Command lines, without CRLF.
    pub commands: Vec<String>,
    /// Message bodies received after `DATA`, with dot-stuffing undone.
    pub messages: Vec<String>,
    /// Whether the connection was encrypted when it ended.
    pub encrypted: bool,
}

/// Accepts a single connection and plays the server side of a submission.
pub struct FakeSmtpServer {
    pub addr: SocketAddr,
    handle: JoinHandle<Transcript>,
}

fn tls_acceptor() -> TlsAcceptor {
    let identity = native_tls::Identity::from_pkcs8(CERT_PEM, KEY_PEM).unwrap();
    TlsAcceptor::from(native_tls::TlsAcceptor::new(identity).unwrap())
}

impl FakeSmtpServer {
    pub async fn start(options: FakeSmtpOptions) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let mut transcript = Transcript::default();
            let Ok((socket, _)) = listener.accept().await else {
                return transcript;
            };
            let acceptor = tls_acceptor();
            let mut conn: Connection = if options.implicit_tls {
                match acceptor.accept(socket).await {
                    Ok(tls) => {
                        transcript.encrypted = true;
                        BufReader::new(Box::new(tls) as Box<dyn ServerStream>)
                    }
                    Err(_) => return transcript,
                }
            } else {
                BufReader::new(Box::new(socket) as Box<dyn ServerStream>)
            };
            if conn.write_all(b"220 fake.smtp ESMTP ready\r\n").await.is_err()
                || conn.flush().await.is_err()
            {
                return transcript;
            }

            loop {
                let mut line = String::new();
                match conn.read_line(&mut line).await {
                    Ok(0) | Err(_) => break,
                    Ok(_) => {}
                }
                let command = line.trim_end().to_string();
                transcript.commands.push(command.clone());
                let verb = command
                    .split(|c: char| c == ' ' || c == ':')
                    .next()
                    .unwrap_or("")
                    .to_ascii_uppercase();

                let reply = match verb.as_str() {
                    "EHLO" => {
                        let mut reply = String::from("250-fake.smtp\r\n");
                        if options.starttls && !transcript.encrypted {
                            reply.push_str("250-STARTTLS\r\n");
                        }
                        if options.advertise_auth {
                            reply.push_str("250-AUTH PLAIN LOGIN\r\n");
                        }
                        reply.push_str("250 8BITMIME\r\n");
                        reply
                    }
                    "STARTTLS" if options.starttls && !transcript.encrypted => {
                        if conn.write_all(b"220 2.0.0 ready to start TLS\r\n").await.is_err() {
                            break;
                        }
                        let _ = conn.flush().await;
                        match acceptor.accept(conn.into_inner()).await {
                            Ok(tls) => {
                                transcript.encrypted = true;
                                conn = BufReader::new(Box::new(tls) as Box<dyn ServerStream>);
                                continue;
                            }
                            Err(_) => return transcript,
                        }
                    }
                    "AUTH" if options.reject_auth => "535 5.7.8 bad credentials\r\n".to_string(),
                    "AUTH" => "235 2.7.0 accepted\r\n".to_string(),
                    "MAIL" => "250 2.1.0 ok\r\n".to_string(),
                    "RCPT" => match &options.reject_recipient {
                        Some(rejected) if command.contains(rejected.as_str()) => {
                            "550 5.1.1 mailbox unavailable\r\n".to_string()
                        }
                        _ => "250 2.1.5 ok\r\n".to_string(),
                    },
                    "DATA" => {
                        if conn.write_all(b"354 end with <CRLF>.<CRLF>\r\n").await.is_err() {
                            break;
                        }
                        let _ = conn.flush().await;
                        let mut message = String::new();
                        loop {
                            let mut data_line = String::new();
                            match conn.read_line(&mut data_line).await {
                                Ok(0) | Err(_) => break,
                                Ok(_) => {}
                            }
                            if data_line == ".\r\n" {
                                break;
                            }
                            let unstuffed = data_line.strip_prefix('.').unwrap_or(&data_line);
                            message.push_str(unstuffed);
                        }
                        transcript.messages.push(message);
                        "250 2.0.0 queued\r\n".to_string()
                    }
                    "QUIT" => {
                        let _ = conn.write_all(b"221 2.0.0 bye\r\n").await;
                        let _ = conn.flush().await;
                        break;
                    }
                    _ => "502 5.5.2 command not recognized\r\n".to_string(),
                };
                if conn.write_all(reply.as_bytes()).await.is_err() || conn.flush().await.is_err() {
                    break;
                }
            }
            transcript
        });
        Self { addr, handle }
    }

    /// Waits for the connection to end and returns what was received.
    pub async fn finish(self) -> Transcript {
        self.handle.await.unwrap_or_default()
    }
}

/// A channel that records every alarm it is handed instead of delivering it.
#[derive(Clone)]
pub struct RecordingChannel {
    kind: ChannelKind,
    fail: bool,
    calls: Arc<Mutex<Vec<(String, Alarm)>>>,
}

impl RecordingChannel {
    pub fn new(kind: ChannelKind) -> Self {
        Self {
            kind,
            fail: false,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Makes every push fail with `TransmitFailed` after recording the call.
    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    /// The application ids and alarms pushed so far.
    pub fn calls(&self) -> Vec<(String, Alarm)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl AlarmChannel for RecordingChannel {
    fn kind(&self) -> ChannelKind {
        self.kind
    }

    fn is_enabled(&self, app: &Application) -> bool {
        match self.kind {
            ChannelKind::Mail => app.email_alarm_conf.enable,
            ChannelKind::ChatBot => app.ding_alarm_conf.enable,
            ChannelKind::Webhook => app.http_alarm_conf.enable,
        }
    }

    async fn push(&self, app: &Application, alarm: &Alarm) -> Result<(), ChannelError> {
        self.calls
            .lock()
            .unwrap()
            .push((app.id.clone(), alarm.clone()));
        if self.fail {
            Err(ChannelError::TransmitFailed(format!(
                "{} channel forced to fail",
                self.kind
            )))
        } else {
            Ok(())
        }
    }
}

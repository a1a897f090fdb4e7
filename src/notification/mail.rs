//! Delivers alarm digests by mail.

use crate::config::ChannelsConfig;
use crate::core::{Alarm, Application, ChannelKind, MailChannelConfig};
use crate::formatting::AlarmRenderer;
use crate::notification::error::ChannelError;
use crate::notification::AlarmChannel;
use async_trait::async_trait;
use lettre::transport::smtp::authentication::{Credentials, Mechanism};
use lettre::transport::smtp::client::{AsyncSmtpConnection, TlsParameters};
use lettre::transport::smtp::commands::{Data, Mail, Rcpt};
use lettre::transport::smtp::extension::{ClientId, Extension};
use lettre::transport::smtp::Error as SmtpError;
use lettre::Address;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, error, info, instrument, warn};

const FALLBACK_SENDER_NAME: &str = "OpenRASP";

/// Connection settings shared by every mail delivery.
#[derive(Debug, Clone)]
pub struct MailSettings {
    pub dial_timeout: Duration,
    pub session_timeout: Duration,
    pub accept_invalid_certs: bool,
    pub hello_name: String,
}

impl From<&ChannelsConfig> for MailSettings {
    fn from(config: &ChannelsConfig) -> Self {
        Self {
            dial_timeout: config.mail_dial_timeout(),
            session_timeout: config.mail_session_timeout(),
            accept_invalid_certs: config.mail_accept_invalid_certs,
            hello_name: config.hello_name.clone(),
        }
    }
}

/// Where the mail server lives and who the message goes to, checked before
/// any connection is made.
struct Submission<'a> {
    host: &'a str,
    port: u16,
    from: Option<Address>,
    recipients: Vec<(&'a str, Address)>,
}

impl<'a> Submission<'a> {
    fn parse(conf: &'a MailChannelConfig) -> Result<Self, ChannelError> {
        let (host, port) = split_host(&conf.server_addr).ok_or_else(|| {
            ChannelError::ConfigInvalid(format!(
                "the email server address '{}' must be in host:port form",
                conf.server_addr
            ))
        })?;
        let from = if conf.username.is_empty() {
            None
        } else {
            Some(parse_address(&conf.username, "sender")?)
        };
        let recipients = conf
            .recv_addr
            .iter()
            .map(|raw| Ok((raw.as_str(), parse_address(raw, "recipient")?)))
            .collect::<Result<Vec<_>, ChannelError>>()?;
        Ok(Self {
            host,
            port,
            from,
            recipients,
        })
    }
}

/// An open SMTP session and whether it runs over TLS.
struct Session {
    conn: AsyncSmtpConnection,
    encrypted: bool,
}

/// The mail alarm channel.
pub struct MailChannel {
    renderer: Arc<AlarmRenderer>,
    settings: MailSettings,
    sender_name: String,
}

impl MailChannel {
    pub fn new(renderer: Arc<AlarmRenderer>, settings: MailSettings) -> Self {
        let sender_name =
            sysinfo::System::host_name().unwrap_or_else(|| FALLBACK_SENDER_NAME.to_string());
        Self {
            renderer,
            settings,
            sender_name,
        }
    }

    /// Overrides the display name used in the `From` header.
    pub fn with_sender_name(mut self, name: impl Into<String>) -> Self {
        self.sender_name = name.into();
        self
    }

    async fn deliver(
        &self,
        conf: &MailChannelConfig,
        submission: &Submission<'_>,
        data: &str,
    ) -> Result<(), ChannelError> {
        let mut session = self.open_session(conf, submission).await?;
        let result = match timeout(
            self.settings.session_timeout,
            Self::transact(&mut session, conf, submission, data),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(ChannelError::TransmitFailed(format!(
                "mail session with {} timed out after {:?}",
                conf.server_addr, self.settings.session_timeout
            ))),
        };
        if result.is_err() {
            // Sends QUIT when the server still listens, then drops the stream.
            if timeout(self.settings.dial_timeout, session.conn.abort())
                .await
                .is_err()
            {
                debug!(server = %conf.server_addr, "Mail server did not answer while closing");
            }
        }
        result
    }

    /// Connects and greets the server. Uses TLS from the first byte when the
    /// channel asks for it, otherwise upgrades with STARTTLS if offered.
    async fn open_session(
        &self,
        conf: &MailChannelConfig,
        submission: &Submission<'_>,
    ) -> Result<Session, ChannelError> {
        let dial_failed = |reason: String| ChannelError::DialFailed {
            addr: conf.server_addr.clone(),
            reason,
        };
        let hello = ClientId::Domain(self.settings.hello_name.clone());
        let server = (submission.host, submission.port);

        let connect = async {
            if conf.tls_enable {
                let tls = self
                    .tls_parameters(submission.host)
                    .map_err(|e| dial_failed(e.to_string()))?;
                let conn = AsyncSmtpConnection::connect_tokio1(
                    server,
                    Some(self.settings.dial_timeout),
                    &hello,
                    Some(tls),
                    None,
                )
                .await
                .map_err(|e| dial_failed(e.to_string()))?;
                return Ok(Session {
                    conn,
                    encrypted: true,
                });
            }

            let mut conn = AsyncSmtpConnection::connect_tokio1(
                server,
                Some(self.settings.dial_timeout),
                &hello,
                None,
                None,
            )
            .await
            .map_err(|e| dial_failed(e.to_string()))?;
            if !conn.server_info().supports_feature(Extension::StartTls) {
                return Ok(Session {
                    conn,
                    encrypted: false,
                });
            }
            debug!(server = %conf.server_addr, "Upgrading mail session with STARTTLS");
            let tls = self
                .tls_parameters(submission.host)
                .map_err(|e| dial_failed(e.to_string()))?;
            conn.starttls(tls, &hello)
                .await
                .map_err(|e| dial_failed(format!("starttls failed: {}", e)))?;
            Ok::<_, ChannelError>(Session {
                conn,
                encrypted: true,
            })
        };

        match timeout(self.settings.dial_timeout, connect).await {
            Ok(result) => result,
            Err(_) => Err(dial_failed(format!(
                "timed out after {:?}",
                self.settings.dial_timeout
            ))),
        }
    }

    /// Authenticates when needed and runs MAIL, RCPT, DATA and QUIT.
    async fn transact(
        session: &mut Session,
        conf: &MailChannelConfig,
        submission: &Submission<'_>,
        data: &str,
    ) -> Result<(), ChannelError> {
        if !conf.password.is_empty() {
            let offers_plain = session
                .conn
                .server_info()
                .supports_auth_mechanism(Mechanism::Plain);
            if conf.tls_enable && !offers_plain {
                debug!(server = %conf.server_addr, "Mail server offers no PLAIN auth, sending unauthenticated");
            } else {
                if !session.encrypted && !is_local_host(submission.host) {
                    return Err(ChannelError::AuthFailed(
                        "refusing to send credentials over an unencrypted connection".to_string(),
                    ));
                }
                if !offers_plain {
                    return Err(ChannelError::AuthFailed(
                        "server doesn't support PLAIN auth".to_string(),
                    ));
                }
                let credentials = Credentials::new(conf.username.clone(), conf.password.clone());
                session
                    .conn
                    .auth(&[Mechanism::Plain], &credentials)
                    .await
                    .map_err(|e| ChannelError::AuthFailed(e.to_string()))?;
            }
        }

        session
            .conn
            .command(Mail::new(submission.from.clone(), vec![]))
            .await
            .map_err(|e| transmit_failed("MAIL FROM", e))?;

        for (raw, address) in &submission.recipients {
            session
                .conn
                .command(Rcpt::new(address.clone(), vec![]))
                .await
                .map_err(|e| ChannelError::RecipientRejected {
                    address: raw.to_string(),
                    reason: e.to_string(),
                })?;
        }

        session
            .conn
            .command(Data)
            .await
            .map_err(|e| transmit_failed("DATA", e))?;
        // The terminating CRLF.CRLF is appended by the connection.
        let body = data.strip_suffix("\r\n").unwrap_or(data);
        session
            .conn
            .message(body.as_bytes())
            .await
            .map_err(|e| transmit_failed("DATA", e))?;

        if let Err(e) = session.conn.quit().await {
            debug!(error = %e, "Mail server did not acknowledge QUIT");
        }
        Ok(())
    }

    fn tls_parameters(&self, host: &str) -> Result<TlsParameters, SmtpError> {
        TlsParameters::builder(host.to_string())
            .dangerous_accept_invalid_certs(self.settings.accept_invalid_certs)
            .build_native()
    }
}

#[async_trait]
impl AlarmChannel for MailChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Mail
    }

    fn is_enabled(&self, app: &Application) -> bool {
        app.email_alarm_conf.enable
    }

    #[instrument(skip_all, fields(app_id = %app.id, channel = "mail"))]
    async fn push(&self, app: &Application, alarm: &Alarm) -> Result<(), ChannelError> {
        let conf = &app.email_alarm_conf;
        if !conf.is_usable() {
            error!(
                app_name = %app.name,
                "Failed to send email alarm: the receiving address and server address can not be empty"
            );
            return Err(ChannelError::ConfigInvalid(
                "the email receiving address and email server address can not be empty".to_string(),
            ));
        }
        let submission = Submission::parse(conf)?;

        let message = self
            .renderer
            .render_mail(app, conf, alarm, &self.sender_name)?;

        match self.deliver(conf, &submission, &message.data).await {
            Ok(()) => {
                info!(
                    app_name = %app.name,
                    recipients = message.recipients.len(),
                    tls = conf.tls_enable,
                    "Succeeded in pushing email alarm"
                );
                Ok(())
            }
            Err(e) => {
                if let ChannelError::RecipientRejected { address, .. } = &e {
                    warn!(app_name = %app.name, %address, "Mail server rejected recipient");
                }
                error!(app_name = %app.name, server = %conf.server_addr, error = %e, "Failed to push email alarm");
                Err(e)
            }
        }
    }
}

fn transmit_failed(stage: &str, e: SmtpError) -> ChannelError {
    ChannelError::TransmitFailed(format!("{} failed: {}", stage, e))
}

fn parse_address(raw: &str, role: &str) -> Result<Address, ChannelError> {
    raw.trim()
        .parse::<Address>()
        .map_err(|e| ChannelError::ConfigInvalid(format!("invalid {} address '{}': {}", role, raw, e)))
}

/// Splits a `host:port` address, accepting `[v6]:port`.
fn split_host(addr: &str) -> Option<(&str, u16)> {
    let (host, port) = addr.rsplit_once(':')?;
    let port = port.parse::<u16>().ok()?;
    let host = host
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host);
    if host.is_empty() {
        None
    } else {
        Some((host, port))
    }
}

/// Credentials may go over plain text only to the local host.
fn is_local_host(host: &str) -> bool {
    matches!(host, "localhost" | "127.0.0.1" | "::1")
}

use anyhow::{Context, Result};
use async_trait::async_trait;
use lettre::{
    message::{Mailbox, MultiPart},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};

use crate::config::AppConfig;

/// Outbound notifications. Callers decide whether a send failure is fatal:
/// account-creation flows degrade to returning the credentials in the
/// response, the password-reset flow treats failure as an error.
#[async_trait]
pub trait Mailer: Send + Sync + 'static {
    async fn send_welcome(
        &self,
        to: &str,
        full_name: &str,
        username: &str,
        temp_password: &str,
    ) -> Result<()>;

    async fn send_temporary_password(
        &self,
        to: &str,
        full_name: &str,
        temp_password: &str,
    ) -> Result<()>;

    async fn send_password_reset(&self, to: &str, full_name: &str, reset_link: &str)
        -> Result<()>;
}

pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpMailer {
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.smtp_host)
            .context("failed to configure SMTP relay")?
            .port(config.smtp_port);
        if let (Some(user), Some(pass)) = (&config.smtp_user, &config.smtp_pass) {
            builder = builder.credentials(Credentials::new(user.clone(), pass.clone()));
        }
        let from = config
            .smtp_from
            .parse()
            .context("SMTP_FROM must be a valid mailbox")?;
        Ok(Self {
            transport: builder.build(),
            from,
        })
    }

    async fn send(&self, to: &str, subject: &str, plain: String, html: String) -> Result<()> {
        let message = Message::builder()
            .from(self.from.clone())
            .to(to.parse().context("invalid recipient address")?)
            .subject(subject)
            .multipart(MultiPart::alternative_plain_html(plain, html))
            .context("failed to build email")?;
        self.transport
            .send(message)
            .await
            .context("failed to send email over SMTP")?;
        Ok(())
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send_welcome(
        &self,
        to: &str,
        full_name: &str,
        username: &str,
        temp_password: &str,
    ) -> Result<()> {
        let subject = "Bienvenido al Sistema de Gestión Documental - UNICESMAG";
        let plain = format!(
            "Hola {full_name},\n\n\
             Tu cuenta ha sido creada.\n\
             Usuario: {username}\n\
             Contraseña temporal: {temp_password}\n\n\
             Deberás cambiar la contraseña en tu primer inicio de sesión."
        );
        let html = format!(
            "<p>Hola <strong>{}</strong>,</p>\
             <p>Tu cuenta en el Sistema de Gestión Documental ha sido creada.</p>\
             <p>Usuario: <strong>{}</strong><br>\
             Contraseña temporal: <strong>{}</strong></p>\
             <p>Deberás cambiar la contraseña en tu primer inicio de sesión.</p>",
            escape_html(full_name),
            escape_html(username),
            escape_html(temp_password),
        );
        self.send(to, subject, plain, html).await
    }

    async fn send_temporary_password(
        &self,
        to: &str,
        full_name: &str,
        temp_password: &str,
    ) -> Result<()> {
        let subject = "Restablecimiento de contraseña - Sistema de Gestión Documental";
        let plain = format!(
            "Hola {full_name},\n\n\
             Un administrador restableció tu contraseña.\n\
             Contraseña temporal: {temp_password}\n\n\
             Deberás cambiarla en tu próximo inicio de sesión."
        );
        let html = format!(
            "<p>Hola <strong>{}</strong>,</p>\
             <p>Un administrador restableció tu contraseña.</p>\
             <p>Contraseña temporal: <strong>{}</strong></p>\
             <p>Deberás cambiarla en tu próximo inicio de sesión.</p>",
            escape_html(full_name),
            escape_html(temp_password),
        );
        self.send(to, subject, plain, html).await
    }

    async fn send_password_reset(
        &self,
        to: &str,
        full_name: &str,
        reset_link: &str,
    ) -> Result<()> {
        let subject = "Recuperación de contraseña - Sistema de Gestión Documental";
        let plain = format!(
            "Hola {full_name},\n\n\
             Recibimos una solicitud para restablecer tu contraseña.\n\
             Abre este enlace (válido por una hora):\n{reset_link}\n\n\
             Si no fuiste tú, ignora este mensaje."
        );
        let html = format!(
            "<p>Hola <strong>{}</strong>,</p>\
             <p>Recibimos una solicitud para restablecer tu contraseña.</p>\
             <p><a href=\"{}\">Restablecer contraseña</a> (enlace válido por una hora)</p>\
             <p>Si no fuiste tú, ignora este mensaje.</p>",
            escape_html(full_name),
            escape_html(reset_link),
        );
        self.send(to, subject, plain, html).await
    }
}

fn escape_html(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(ch),
        }
    }
    escaped
}

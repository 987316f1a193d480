use chrono::{Duration, Utc};
use lettre::{
    message::{header::ContentType, Message},
    transport::smtp::authentication::Credentials,
    SmtpTransport, Transport,
};
use log::info;

use crate::config::EmailConfig;

fn send(config: &EmailConfig, subject: &str, body: String) -> Result<(), String> {
    let to = config
        .support_address
        .as_deref()
        .ok_or("support email address not configured")?;

    let email = Message::builder()
        .from(config
            .from
            .parse()
            .map_err(|e| format!("Invalid from address: {e}"))?)
        .to(to.parse().map_err(|e| format!("Invalid to address: {e}"))?)
        .subject(subject)
        .header(ContentType::TEXT_PLAIN)
        .body(body)
        .map_err(|e| format!("Failed to build email: {e}"))?;

    let mailer = if !config.username.is_empty() && !config.password.is_empty() {
        let creds = Credentials::new(config.username.clone(), config.password.clone());
        SmtpTransport::relay(&config.smtp_server)
            .map_err(|e| format!("SMTP relay error: {e}"))?
            .port(config.smtp_port)
            .credentials(creds)
            .build()
    } else {
        SmtpTransport::builder_dangerous(&config.smtp_server)
            .port(config.smtp_port)
            .build()
    };

    mailer
        .send(&email)
        .map_err(|e| format!("Failed to send email: {e}"))?;
    info!("Email sent to {}: {}", to, subject);
    Ok(())
}

pub fn send_new_ticket_email(
    config: &EmailConfig,
    ticket_id: i32,
    user_name: &str,
    contact_email: Option<&str>,
    excerpt: &str,
) -> Result<(), String> {
    let subject = format!("New support ticket #{ticket_id} from {user_name}");
    let body = format!(
        "New support ticket\n\n\
         Ticket: #{ticket_id}\n\
         From: {user_name}\n\
         Contact email: {}\n\
         Received: {}\n\n\
         Message:\n{excerpt}\n\n\
         ---\nAutomated notification from the event support bot.",
        contact_email.unwrap_or("not provided"),
        Utc::now().format("%Y-%m-%d %H:%M:%S UTC"),
    );
    send(config, &subject, body)
}

pub fn send_escalation_email(
    config: &EmailConfig,
    ticket_id: i32,
    user_name: &str,
    waiting: Duration,
) -> Result<(), String> {
    let subject = format!("URGENT: ticket #{ticket_id} unanswered");
    let body = format!(
        "Ticket #{ticket_id} from {user_name} has been waiting {}h {:02}m for a staff reply.\n\n\
         ---\nAutomated notification from the event support bot.",
        waiting.num_hours(),
        waiting.num_minutes() % 60,
    );
    send(config, &subject, body)
}

use melib::email::attachment_types::ContentType;
use melib::email::attachments::Attachment;
use melib::email::Envelope;
use melib::Mail;

use crate::error::{Error, Result};

/// Render entry HTML to plain text for the text/plain alternative.
pub fn html_to_text(html: &str) -> String {
    html_safe_md::render_email_plain(None, Some(html))
}

/// Look up a header of a raw RFC 5322 message.
///
/// `Subject` comes back decoded; other headers come back as stored.
pub fn header_value(raw: &[u8], name: &str) -> Option<String> {
    let envelope = Envelope::from_bytes(raw, None).ok()?;
    if name.eq_ignore_ascii_case("Subject") {
        return Some(envelope.subject().to_string());
    }
    envelope
        .other_headers()
        .get(name)
        .map(|v| v.trim().to_string())
}

/// Extract the subscription list carried by an OPML command message.
///
/// Multipart messages contribute the first part whose content type names
/// OPML or XML. Anything else is taken whole.
pub fn opml_payload(raw: &[u8]) -> Result<Vec<u8>> {
    let mail = Mail::new(raw.to_vec(), None)
        .map_err(|e| Error::Command(format!("Failed to parse OPML message: {e}")))?;
    let body = mail.body();

    if matches!(body.content_type, ContentType::Multipart { .. }) {
        return find_opml_part(&body).ok_or_else(|| {
            Error::Command("multipart OPML message has no OPML/XML part".into())
        });
    }
    Ok(body.decode(Default::default()))
}

fn find_opml_part(att: &Attachment) -> Option<Vec<u8>> {
    match &att.content_type {
        ContentType::Multipart { parts, .. } => parts.iter().find_map(find_opml_part),
        other => {
            let mime = other.to_string().to_ascii_lowercase();
            (mime.contains("opml") || mime.contains("xml")).then(|| att.decode(Default::default()))
        }
    }
}

use anyhow::Result;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use mailparse::{parse_mail, MailHeaderMap, ParsedMail};
use serde::Serialize;
use log::debug;

/// A stored message parsed back into its readable parts.
#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedMessage {
    pub from: Option<String>,
    pub to: Option<String>,
    pub cc: Option<String>,
    pub reply_to: Option<String>,
    pub subject: Option<String>,
    pub date: Option<String>,
    pub message_id: Option<String>,
    pub text: Option<String>,
    pub html: Option<String>,
    pub headers: Vec<Header>,
    pub attachments: Vec<Attachment>,
}

#[derive(Debug, Serialize)]
pub struct Header {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub filename: String,
    pub mime_type: String,
    pub size: usize,
    /// Base64 of the decoded attachment bytes.
    pub content: String,
}

/// Stored raw messages are base64; older records hold the literal text.
pub fn decode_stored(raw_email: &str) -> Vec<u8> {
    match BASE64.decode(raw_email.trim()) {
        Ok(bytes) => bytes,
        Err(e) => {
            debug!("Raw message is not base64 ({}), using it verbatim", e);
            raw_email.as_bytes().to_vec()
        }
    }
}

fn extract_attachments(parsed_mail: &ParsedMail) -> Result<Vec<Attachment>> {
    let mut attachments = Vec::new();

    fn process_part(part: &ParsedMail, attachments: &mut Vec<Attachment>) -> Result<()> {
        let disposition = part.get_content_disposition();

        if disposition.disposition == mailparse::DispositionType::Attachment {
            let filename = disposition
                .params
                .get("filename")
                .or_else(|| part.ctype.params.get("name"))
                .cloned()
                .unwrap_or_else(|| "unnamed_attachment".to_string());

            let content = part.get_body_raw()?;

            attachments.push(Attachment {
                filename,
                mime_type: part.ctype.mimetype.clone(),
                size: content.len(),
                content: BASE64.encode(&content),
            });
        }

        // Recursively process subparts
        for subpart in &part.subparts {
            process_part(subpart, attachments)?;
        }

        Ok(())
    }

    process_part(parsed_mail, &mut attachments)?;
    Ok(attachments)
}

/// First non-attachment part with the given mimetype, depth first.
fn find_body(part: &ParsedMail, mimetype: &str) -> Result<Option<String>> {
    let is_attachment =
        part.get_content_disposition().disposition == mailparse::DispositionType::Attachment;

    if !is_attachment && part.ctype.mimetype.eq_ignore_ascii_case(mimetype) {
        return Ok(Some(part.get_body()?));
    }

    for subpart in &part.subparts {
        if let Some(body) = find_body(subpart, mimetype)? {
            return Ok(Some(body));
        }
    }

    Ok(None)
}

pub fn parse_raw(raw: &[u8]) -> Result<ParsedMessage> {
    let parsed_mail = parse_mail(raw)?;
    let headers = &parsed_mail.headers;

    Ok(ParsedMessage {
        from: headers.get_first_value("From"),
        to: headers.get_first_value("To"),
        cc: headers.get_first_value("Cc"),
        reply_to: headers.get_first_value("Reply-To"),
        subject: headers.get_first_value("Subject"),
        date: headers.get_first_value("Date"),
        message_id: headers.get_first_value("Message-ID"),
        text: find_body(&parsed_mail, "text/plain")?,
        html: find_body(&parsed_mail, "text/html")?,
        headers: headers
            .iter()
            .map(|h| Header { key: h.get_key().to_lowercase(), value: h.get_value() })
            .collect(),
        attachments: extract_attachments(&parsed_mail)?,
    })
}

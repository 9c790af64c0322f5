//! Personalised invitation links: one RSVP URL with the guest's name
//! prefilled, wrapped in a WhatsApp share link.

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};

/// Everything `encodeURIComponent` escapes.
const URI_COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum LinksError {
    #[error("base URL must start with http:// or https://, got {0:?}")]
    InvalidBaseUrl(String),
    #[error("line {line}: expected `name,phone`, got {content:?}")]
    MalformedLine { line: usize, content: String },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Guest {
    pub name: String,
    pub phone: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GuestLink {
    pub name: String,
    pub phone: String,
    pub rsvp_url: String,
    pub whatsapp_url: String,
}

fn encode_component(s: &str) -> String {
    utf8_percent_encode(s, URI_COMPONENT).to_string()
}

fn invitation_message(name: &str, rsvp_url: &str) -> String {
    format!(
        "שלום {name}! 🌟\n\n\
         אנחנו שמחים להזמין אותך לאירוע שלנו!\n\n\
         לאשר הגעה, לחץ על הקישור הבא:\n\
         {rsvp_url}\n\n\
         נשמח לראותך! 💕\n\n\
         *אם הקישור לא עובד, העתק והדבק אותו בדפדפן*"
    )
}

/// Reads `name,phone` lines. Blank lines, `#` comments and a `name,phone`
/// header are skipped. The phone is everything after the last comma, so
/// names may contain commas.
pub fn parse_guests(contents: &str) -> Result<Vec<Guest>, LinksError> {
    let mut guests = Vec::new();

    for (index, raw) in contents.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let malformed = || LinksError::MalformedLine {
            line: index + 1,
            content: line.to_string(),
        };
        let (name, phone) = line.rsplit_once(',').ok_or_else(malformed)?;
        let (name, phone) = (name.trim(), phone.trim());

        if index == 0 && name.eq_ignore_ascii_case("name") {
            continue;
        }
        if name.is_empty() || !phone.chars().any(|c| c.is_ascii_digit()) {
            return Err(malformed());
        }

        guests.push(Guest {
            name: name.to_string(),
            phone: phone.to_string(),
        });
    }

    Ok(guests)
}

pub fn generate_link(base_url: &str, guest: &Guest) -> Result<GuestLink, LinksError> {
    if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
        return Err(LinksError::InvalidBaseUrl(base_url.to_string()));
    }

    let rsvp_url = format!(
        "{}/?name={}",
        base_url.trim_end_matches('/'),
        encode_component(&guest.name)
    );
    let digits: String = guest.phone.chars().filter(char::is_ascii_digit).collect();
    let message = invitation_message(&guest.name, &rsvp_url);
    let whatsapp_url = format!("https://wa.me/{digits}?text={}", encode_component(&message));

    Ok(GuestLink {
        name: guest.name.clone(),
        phone: guest.phone.clone(),
        rsvp_url,
        whatsapp_url,
    })
}

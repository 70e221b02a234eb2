//! Extracts family member candidates from pasted WhatsApp text: chat exports
//! and shared contact cards.

use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashMap;

use crate::models::import::ParsedContact;

lazy_static! {
    // [12/03/2024, 18:42:07] Name: message
    static ref BRACKETED_LINE: Regex = Regex::new(
        r"^\[(\d{1,2}/\d{1,2}/\d{2,4}),?\s+\d{1,2}:\d{2}(?::\d{2})?(?:\s?[AaPp][Mm])?\]\s*([^:]+?):\s?(.*)$"
    )
    .unwrap();
    // 12/03/2024 18:42 - Name: message
    static ref DASHED_LINE: Regex = Regex::new(
        r"^(\d{1,2}/\d{1,2}/\d{2,4}),?\s+\d{1,2}:\d{2}(?::\d{2})?(?:\s?[AaPp][Mm])?\s+-\s+([^:]+?):\s?(.*)$"
    )
    .unwrap();
    // Any line that starts like a chat entry, with or without a sender.
    static ref ENTRY_START: Regex =
        Regex::new(r"^\[?\d{1,2}/\d{1,2}/\d{2,4},?\s+\d{1,2}:\d{2}").unwrap();
    static ref PHONE: Regex = Regex::new(r"\+?\d[\d\s().-]{6,}\d").unwrap();
    static ref VCARD_NAME: Regex = Regex::new(r"^FN(?:;[^:]*)?:(.+)$").unwrap();
    static ref VCARD_TEL: Regex = Regex::new(r"^TEL(?:;[^:]*)?:(.+)$").unwrap();
}

/// Direction marks and non-breaking spaces WhatsApp sprinkles into exports.
const INVISIBLE: [char; 5] = ['\u{200e}', '\u{200f}', '\u{202a}', '\u{202c}', '\u{feff}'];

#[derive(Default)]
struct Contacts {
    list: Vec<ParsedContact>,
    index: HashMap<String, usize>,
}

impl Contacts {
    /// Adds `name` if unseen and returns its position.
    fn upsert(&mut self, name: &str) -> usize {
        if let Some(&position) = self.index.get(name) {
            return position;
        }
        let phone = if looks_like_phone(name) {
            normalize_phone(name)
        } else {
            None
        };
        self.list.push(ParsedContact {
            name: name.to_string(),
            phone,
        });
        self.index.insert(name.to_string(), self.list.len() - 1);
        self.list.len() - 1
    }

    fn attach_phone(&mut self, position: usize, phone: Option<String>) {
        if let Some(contact) = self.list.get_mut(position) {
            if contact.phone.is_none() {
                contact.phone = phone;
            }
        }
    }
}

pub fn parse_whatsapp_text(text: &str) -> Vec<ParsedContact> {
    let mut contacts = Contacts::default();
    // Sender of the last chat entry, for multi-line messages.
    let mut current: Option<usize> = None;
    let mut card: Option<(Option<String>, Option<String>)> = None;

    for raw in text.lines() {
        let line = clean_line(raw);
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if line.eq_ignore_ascii_case("BEGIN:VCARD") {
            card = Some((None, None));
            current = None;
            continue;
        }
        if let Some((name, phone)) = card.as_mut() {
            if line.eq_ignore_ascii_case("END:VCARD") {
                if let Some(name) = name.take() {
                    let position = contacts.upsert(&name);
                    contacts.attach_phone(position, phone.take());
                }
                card = None;
            } else if let Some(caps) = VCARD_NAME.captures(line) {
                *name = Some(caps[1].trim().to_string()).filter(|n| !n.is_empty());
            } else if let Some(caps) = VCARD_TEL.captures(line) {
                if phone.is_none() {
                    *phone = normalize_phone(&caps[1]);
                }
            }
            continue;
        }

        let entry = BRACKETED_LINE
            .captures(line)
            .or_else(|| DASHED_LINE.captures(line));
        if let Some(caps) = entry {
            let sender = caps[2].trim().trim_start_matches('~').trim();
            if sender.is_empty() {
                current = None;
                continue;
            }
            let position = contacts.upsert(sender);
            contacts.attach_phone(position, first_phone(&caps[3]));
            current = Some(position);
        } else if ENTRY_START.is_match(line) {
            // system notice ("Messages are end-to-end encrypted", joins, ...)
            current = None;
        } else if let Some(position) = current {
            contacts.attach_phone(position, first_phone(line));
        }
    }

    contacts.list
}

fn clean_line(line: &str) -> String {
    line.chars()
        .filter(|c| !INVISIBLE.contains(c))
        .map(|c| if c == '\u{a0}' || c == '\u{202f}' { ' ' } else { c })
        .collect()
}

fn first_phone(text: &str) -> Option<String> {
    PHONE
        .find_iter(text)
        .find_map(|m| normalize_phone(m.as_str()))
}

fn looks_like_phone(text: &str) -> bool {
    text.chars()
        .all(|c| c.is_ascii_digit() || matches!(c, '+' | ' ' | '-' | '(' | ')' | '.'))
}

/// Keeps a leading `+` and the digits; rejects anything outside 8-15 digits.
fn normalize_phone(raw: &str) -> Option<String> {
    let raw = raw.trim();
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    if !(8..=15).contains(&digits.len()) {
        return None;
    }
    if raw.starts_with('+') {
        Some(format!("+{}", digits))
    } else {
        Some(digits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contact(name: &str, phone: Option<&str>) -> ParsedContact {
        ParsedContact {
            name: name.to_string(),
            phone: phone.map(str::to_string),
        }
    }

    #[test]
    fn parses_bracketed_ios_export() {
        let text = "\
[12/03/2024, 18:42:07] Mamie Jeanne: Bonjour à tous !
[12/03/2024, 18:43:10] Paul Martin: Salut Mamie
[12/03/2024, 18:45:00] Mamie Jeanne: Mon nouveau numéro : +33 6 12 34 56 78";

        assert_eq!(
            parse_whatsapp_text(text),
            vec![
                contact("Mamie Jeanne", Some("+33612345678")),
                contact("Paul Martin", None),
            ]
        );
    }

    #[test]
    fn parses_dashed_android_export_and_skips_system_lines() {
        let text = "\
12/03/2024 18:40 - Les messages sont chiffrés de bout en bout.
12/03/2024 18:42 - Awa Diallo: On se voit dimanche ?
12/03/2024, 18:43 - Awa Diallo a ajouté Koffi
12/03/2024, 18:44 - Koffi: Merci !
appelez-moi au 07 11 22 33 44";

        assert_eq!(
            parse_whatsapp_text(text),
            vec![
                contact("Awa Diallo", None),
                contact("Koffi", Some("0711223344")),
            ]
        );
    }

    #[test]
    fn unsaved_senders_keep_their_number() {
        let text = "[01/01/2024, 09:00:00] \u{200e}+33 7 98 76 54 32: Bonne année";
        assert_eq!(
            parse_whatsapp_text(text),
            vec![contact("+33 7 98 76 54 32", Some("+33798765432"))]
        );
    }

    #[test]
    fn parses_shared_vcards() {
        let text = "\
BEGIN:VCARD
VERSION:3.0
N:Traoré;Fatou;;;
FN:Fatou Traoré
TEL;type=CELL;waid=22376000000:+223 76 00 00 00
END:VCARD
BEGIN:VCARD
FN:Sans Numéro
END:VCARD
BEGIN:VCARD
TEL:+33 1 00 00 00 00
END:VCARD";

        assert_eq!(
            parse_whatsapp_text(text),
            vec![
                contact("Fatou Traoré", Some("+22376000000")),
                contact("Sans Numéro", None),
            ]
        );
    }

    #[test]
    fn short_numbers_are_not_phones() {
        assert_eq!(normalize_phone("1234"), None);
        assert_eq!(normalize_phone("+33 (0)6-12.34.56.78"), Some("+330612345678".into()));
        assert!(parse_whatsapp_text("no chat lines here").is_empty());
    }
}

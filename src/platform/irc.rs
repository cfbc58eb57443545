//! Twitch IRC line parsing and normalisation.
//!
//! Chat arrives as IRCv3 lines with message tags:
//!
//! ```text
//! @badge-info=;bits=100;display-name=Ana :ana!ana@ana.tmi.twitch.tv PRIVMSG #chan :Cheer100 hi
//! ```
//!
//! [`parse_line`] splits a line into an [`IrcMessage`]; [`normalize`] maps the
//! commands the reactor cares about onto [`NormalizedPlatformEvent`]s.

use std::collections::HashMap;

use super::NormalizedPlatformEvent;

/// One parsed IRC line.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct IrcMessage {
    pub tags: HashMap<String, String>,
    /// Prefix without the leading `:`.
    pub prefix: Option<String>,
    pub command: String,
    /// Middle parameters (e.g. the channel).
    pub params: Vec<String>,
    /// Trailing parameter without the leading `:`.
    pub trailing: Option<String>,
}

impl IrcMessage {
    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    /// Nick portion of the prefix, lower-cased.
    pub fn nick(&self) -> Option<String> {
        let prefix = self.prefix.as_deref()?;
        let nick = prefix.split('!').next()?.trim();
        if nick.is_empty() {
            None
        } else {
            Some(nick.to_ascii_lowercase())
        }
    }

    /// Display name, falling back to the login tag and then the nick.
    pub fn user(&self) -> String {
        self.tag("display-name")
            .or_else(|| self.tag("login"))
            .map(ToOwned::to_owned)
            .or_else(|| self.nick())
            .unwrap_or_default()
    }

    fn tag_u32(&self, key: &str) -> Option<u32> {
        self.tag(key).and_then(|v| v.parse().ok())
    }
}

/// Parse one IRC line.  Returns `None` for blank or command-less input.
pub fn parse_line(line: &str) -> Option<IrcMessage> {
    let mut rest = line.trim_end_matches(['\r', '\n']);
    if rest.trim().is_empty() {
        return None;
    }

    let mut tags = HashMap::new();
    if let Some(stripped) = rest.strip_prefix('@') {
        let (tag_part, after) = stripped.split_once(' ')?;
        for pair in tag_part.split(';') {
            match pair.split_once('=') {
                Some((k, v)) => tags.insert(k.to_owned(), unescape_tag_value(v)),
                None => tags.insert(pair.to_owned(), String::new()),
            };
        }
        rest = after;
    }

    let mut prefix = None;
    if let Some(stripped) = rest.strip_prefix(':') {
        let (p, after) = stripped.split_once(' ')?;
        prefix = Some(p.to_owned());
        rest = after;
    }

    let (head, trailing) = match rest.split_once(" :") {
        Some((head, trailing)) => (head, Some(trailing.to_owned())),
        None => (rest, None),
    };

    let mut words = head.split_whitespace();
    let command = words.next()?.to_owned();
    let params = words.map(ToOwned::to_owned).collect();

    Some(IrcMessage {
        tags,
        prefix,
        command,
        params,
        trailing,
    })
}

/// Decode IRCv3 tag escapes (`\s`, `\:`, `\\`, `\r`, `\n`).
pub fn unescape_tag_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('s') => out.push(' '),
            Some(':') => out.push(';'),
            Some('r') => out.push('\r'),
            Some('n') => out.push('\n'),
            Some('\\') => out.push('\\'),
            Some(other) => out.push(other),
            None => {}
        }
    }
    out
}

/// Map a parsed message onto a platform event.
///
/// Chat messages carrying a `bits` tag are cheers, not chat.
pub fn normalize(msg: &IrcMessage) -> Option<NormalizedPlatformEvent> {
    match msg.command.as_str() {
        "PRIVMSG" => {
            let text = msg.trailing.as_deref()?.trim();
            let user = msg.user();
            if let Some(amount) = msg.tag_u32("bits") {
                return Some(NormalizedPlatformEvent::Bits { user, amount });
            }
            if text.is_empty() {
                return None;
            }
            Some(NormalizedPlatformEvent::ChatMessage {
                user,
                message: text.to_owned(),
            })
        }
        "USERNOTICE" => normalize_usernotice(msg),
        _ => None,
    }
}

fn normalize_usernotice(msg: &IrcMessage) -> Option<NormalizedPlatformEvent> {
    let user = msg.user();
    match msg.tag("msg-id")? {
        "sub" | "resub" => Some(NormalizedPlatformEvent::Subscription { user }),
        "subgift" | "anonsubgift" => Some(NormalizedPlatformEvent::Gift { user, count: 1 }),
        "submysterygift" | "anonsubmysterygift" => Some(NormalizedPlatformEvent::Gift {
            user,
            count: msg.tag_u32("msg-param-mass-gift-count").unwrap_or(1),
        }),
        "raid" => Some(NormalizedPlatformEvent::Raid {
            user: msg
                .tag("msg-param-displayName")
                .map(ToOwned::to_owned)
                .unwrap_or(user),
            viewers: msg.tag_u32("msg-param-viewerCount").unwrap_or(0),
        }),
        _ => None,
    }
}

/// Returns `true` for the NOTICE Twitch sends when the OAuth token is
/// rejected at login.
pub fn is_login_failure(msg: &IrcMessage) -> bool {
    msg.command == "NOTICE"
        && msg
            .trailing
            .as_deref()
            .is_some_and(|t| t.contains("Login authentication failed") || t.contains("Improperly formatted auth"))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_tags_prefix_and_trailing() {
        let line = "@display-name=Ana;color=#1E90FF :ana!ana@ana.tmi.twitch.tv PRIVMSG #chan :hello world\r\n";
        let msg = parse_line(line).expect("parse");
        assert_eq!(msg.command, "PRIVMSG");
        assert_eq!(msg.params, vec!["#chan".to_string()]);
        assert_eq!(msg.trailing.as_deref(), Some("hello world"));
        assert_eq!(msg.tag("display-name"), Some("Ana"));
        assert_eq!(msg.nick().as_deref(), Some("ana"));
    }

    #[test]
    fn parses_ping_without_prefix() {
        let msg = parse_line("PING :tmi.twitch.tv").expect("parse");
        assert_eq!(msg.command, "PING");
        assert_eq!(msg.trailing.as_deref(), Some("tmi.twitch.tv"));
        assert!(msg.prefix.is_none());
    }

    #[test]
    fn blank_line_is_ignored() {
        assert!(parse_line("\r\n").is_none());
    }

    #[test]
    fn unescapes_tag_values() {
        assert_eq!(unescape_tag_value(r"hi\sthere\:\\"), r"hi there;\");
    }

    #[test]
    fn privmsg_becomes_chat_message() {
        let msg = parse_line(":bob!bob@bob.tmi.twitch.tv PRIVMSG #chan :hey !payaso now").unwrap();
        assert_eq!(
            normalize(&msg),
            Some(NormalizedPlatformEvent::ChatMessage {
                user: "bob".into(),
                message: "hey !payaso now".into(),
            })
        );
    }

    #[test]
    fn privmsg_with_bits_tag_becomes_bits() {
        let msg = parse_line(
            "@bits=100;display-name=Ana :ana!ana@ana.tmi.twitch.tv PRIVMSG #chan :Cheer100 hi",
        )
        .unwrap();
        assert_eq!(
            normalize(&msg),
            Some(NormalizedPlatformEvent::Bits {
                user: "Ana".into(),
                amount: 100,
            })
        );
    }

    #[test]
    fn usernotice_sub_and_resub_become_subscription() {
        for id in ["sub", "resub"] {
            let line = format!(
                "@msg-id={id};login=carl;display-name=Carl :tmi.twitch.tv USERNOTICE #chan :yay"
            );
            let msg = parse_line(&line).unwrap();
            assert_eq!(
                normalize(&msg),
                Some(NormalizedPlatformEvent::Subscription { user: "Carl".into() })
            );
        }
    }

    #[test]
    fn mystery_gift_carries_count() {
        let msg = parse_line(
            "@msg-id=submysterygift;login=dee;msg-param-mass-gift-count=5 :tmi.twitch.tv USERNOTICE #chan",
        )
        .unwrap();
        assert_eq!(
            normalize(&msg),
            Some(NormalizedPlatformEvent::Gift {
                user: "dee".into(),
                count: 5,
            })
        );
    }

    #[test]
    fn raid_carries_viewer_count() {
        let msg = parse_line(
            "@msg-id=raid;login=eve;msg-param-displayName=Eve;msg-param-viewerCount=42 :tmi.twitch.tv USERNOTICE #chan",
        )
        .unwrap();
        assert_eq!(
            normalize(&msg),
            Some(NormalizedPlatformEvent::Raid {
                user: "Eve".into(),
                viewers: 42,
            })
        );
    }

    #[test]
    fn unknown_usernotice_is_ignored() {
        let msg = parse_line("@msg-id=ritual;login=x :tmi.twitch.tv USERNOTICE #chan").unwrap();
        assert_eq!(normalize(&msg), None);
    }

    #[test]
    fn detects_login_failure_notice() {
        let msg = parse_line(":tmi.twitch.tv NOTICE * :Login authentication failed").unwrap();
        assert!(is_login_failure(&msg));
    }
}

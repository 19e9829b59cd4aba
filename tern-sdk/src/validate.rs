//! Target validation used by `connect()` and the command builders.

/// Characters allowed anywhere in a nickname besides ASCII letters.
const NICK_SPECIAL: &[u8] = b"[]\\`_^{|}";
/// Channel prefixes accepted as a channel name's first byte.
const CHANNEL_PREFIXES: &[u8] = b"#&+!";
const MAX_CHANNEL_LENGTH: usize = 50;

/// A nickname starts with a letter or one of `[]\`_^{|}` and continues with
/// letters, digits, those specials or `-`.
pub fn is_valid_nick(nick: &str) -> bool {
    let bytes = nick.as_bytes();
    let Some((first, rest)) = bytes.split_first() else {
        return false;
    };
    if !first.is_ascii_alphabetic() && !NICK_SPECIAL.contains(first) {
        return false;
    }
    rest.iter()
        .all(|b| b.is_ascii_alphanumeric() || NICK_SPECIAL.contains(b) || *b == b'-')
}

/// A channel name has a known prefix, is at most 50 bytes, and contains no
/// space, comma, colon or BEL.
pub fn is_valid_channel(channel: &str) -> bool {
    let bytes = channel.as_bytes();
    if bytes.len() < 2 || bytes.len() > MAX_CHANNEL_LENGTH {
        return false;
    }
    if !CHANNEL_PREFIXES.contains(&bytes[0]) {
        return false;
    }
    !bytes[1..]
        .iter()
        .any(|b| matches!(b, b' ' | b',' | b':' | 0x07 | b'\r' | b'\n' | 0))
}

/// An ident/username, optionally prefixed with `~` (no identd response),
/// starting with an alphanumeric and continuing with printable ASCII
/// letters, digits, `-` or `.`.
pub fn is_valid_user(user: &str) -> bool {
    let user = user.strip_prefix('~').unwrap_or(user);
    let bytes = user.as_bytes();
    let Some((first, rest)) = bytes.split_first() else {
        return false;
    };
    if !first.is_ascii_alphanumeric() {
        return false;
    }
    rest.iter().all(|b| {
        b.is_ascii_alphanumeric() || NICK_SPECIAL.contains(b) || matches!(b, b'-' | b'.')
    })
}

/// Accepts anything a PRIVMSG/NOTICE may be addressed to.
pub fn is_valid_target(target: &str) -> bool {
    is_valid_nick(target) || is_valid_channel(target)
}

/// A value sent as a middle parameter: non-empty, no spaces, not starting
/// with `:` and free of line breaks or NUL.
pub fn is_valid_param(param: &str) -> bool {
    !param.is_empty()
        && !param.starts_with(':')
        && !param.contains([' ', '\r', '\n', '\0'])
}

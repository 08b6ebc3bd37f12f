//! `otpauth://` export following the Key Uri Format:
//! <https://github.com/google/google-authenticator/wiki/Key-Uri-Format>
//!
//! Format: `otpauth://TYPE/ISSUER:LABEL?secret=BASE32&digits=N&issuer=ISSUER...`

use std::sync::LazyLock;

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use regex::Regex;
use url::form_urlencoded;

use crate::authenticator::{
    DEFAULT_ALGORITHM, DEFAULT_PERIOD, OtpEngine, Variant, encode_base32,
};
use crate::error::{AuthError, Result};
use crate::record::Record;

/// Path characters left as-is; everything else (`:`, `@`, space...) is escaped.
const PATH_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// `Issuer (account)rest` folded into a display name.
static FOLDED_ISSUER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([^(]+)\s+\((.*?)\)(.*)").unwrap());

/// What follows a known issuer at the start of a label: ` (account)rest`.
static ISSUER_SUFFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s+\((.*?)\)(.*)").unwrap());

/// Builds the URI for `record`'s authenticator.
///
/// With `compat` set, parameters other authenticator apps reject (Steam
/// device id and session data) are left out.
pub fn to_uri(record: &Record, compat: bool) -> Result<String> {
    let auth = record.authenticator().ok_or(AuthError::NotAttached)?;
    let secret = auth.secret_key().ok_or(AuthError::EncryptedSecret)?;

    let (issuer, label) = split_issuer(auth.issuer(), record.name());

    let mut otp_type = "totp";
    let mut extra = String::new();

    if let Some(issuer) = &issuer {
        extra.push_str("&issuer=");
        extra.push_str(&query_encode(issuer));
    }

    if auth.hash_algorithm() != DEFAULT_ALGORITHM {
        extra.push_str("&algorithm=");
        extra.push_str(auth.hash_algorithm().name());
    }

    match auth.variant() {
        Variant::BattleNet { serial } => {
            extra.push_str("&serial=");
            extra.push_str(&query_encode(&serial.replace('-', "")));
        }
        Variant::Steam {
            device_id,
            steam_data,
        } => {
            if !compat {
                extra.push_str("&deviceid=");
                extra.push_str(&query_encode(device_id));
                extra.push_str("&data=");
                extra.push_str(&query_encode(steam_data));
            }
        }
        Variant::Hotp { counter } => {
            otp_type = "hotp";
            extra.push_str(&format!("&counter={counter}"));
        }
        Variant::Totp => {}
    }

    let secret = query_encode(&encode_base32(secret));

    if auth.period() != DEFAULT_PERIOD {
        extra.push_str(&format!("&period={}", auth.period()));
    }

    let path = match &issuer {
        Some(issuer) => format!("{}:{}", path_encode(issuer), path_encode(&label)),
        None => path_encode(&label),
    };

    Ok(format!(
        "otpauth://{otp_type}/{path}?secret={secret}&digits={}{extra}",
        auth.code_digits()
    ))
}

/// Resolves the issuer and label written to the URI.
///
/// Without an explicit issuer, a name shaped like `Issuer (account)rest`
/// supplies both. With an issuer, a redundant `Issuer (account)` prefix is
/// dropped from the label.
pub fn split_issuer(issuer: &str, name: &str) -> (Option<String>, String) {
    let mut issuer = issuer.to_string();
    let mut label = name.to_string();

    if issuer.is_empty() {
        if let Some(caps) = FOLDED_ISSUER.captures(&label) {
            issuer = caps[1].to_string();
            label = format!("{}{}", &caps[2], &caps[3]);
        }
    }

    if !issuer.is_empty() {
        let stripped = label
            .strip_prefix(issuer.as_str())
            .and_then(|rest| ISSUER_SUFFIX.captures(rest))
            .map(|caps| format!("{}{}", &caps[1], &caps[2]));
        if let Some(stripped) = stripped {
            label = stripped;
        }
    }

    let issuer = if issuer.is_empty() { None } else { Some(issuer) };
    (issuer, label)
}

fn query_encode(s: &str) -> String {
    form_urlencoded::byte_serialize(s.as_bytes()).collect()
}

fn path_encode(s: &str) -> String {
    utf8_percent_encode(s, PATH_SEGMENT).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issuer_folded_into_name_is_recovered() {
        assert_eq!(
            split_issuer("", "Example (alice@example.com)"),
            (Some("Example".to_string()), "alice@example.com".to_string())
        );
        assert_eq!(
            split_issuer("", "My Bank (joint) savings"),
            (Some("My Bank".to_string()), "joint savings".to_string())
        );
    }

    #[test]
    fn redundant_issuer_prefix_is_stripped() {
        assert_eq!(
            split_issuer("GitHub", "GitHub (octocat)"),
            (Some("GitHub".to_string()), "octocat".to_string())
        );
        // only an exact prefix match strips
        assert_eq!(
            split_issuer("GitHub", "GitLab (octocat)"),
            (Some("GitHub".to_string()), "GitLab (octocat)".to_string())
        );
    }

    #[test]
    fn issuer_with_regex_metacharacters_is_literal() {
        assert_eq!(
            split_issuer("a.b+", "a.b+ (me)"),
            (Some("a.b+".to_string()), "me".to_string())
        );
        assert_eq!(
            split_issuer("a.b+", "axbb (me)"),
            (Some("a.b+".to_string()), "axbb (me)".to_string())
        );
    }

    #[test]
    fn issuer_prefix_needs_a_separating_space() {
        assert_eq!(
            split_issuer("GitHub", "GitHub(octocat)"),
            (Some("GitHub".to_string()), "GitHub(octocat)".to_string())
        );
        assert_eq!(
            split_issuer("GitHub", "GitHub  (octocat) work"),
            (Some("GitHub".to_string()), "octocat work".to_string())
        );
    }

    #[test]
    fn plain_names_are_untouched() {
        assert_eq!(split_issuer("", "alice"), (None, "alice".to_string()));
        assert_eq!(split_issuer("", "(no issuer)"), (None, "(no issuer)".to_string()));
    }

    #[test]
    fn encoders() {
        assert_eq!(path_encode("alice@example.com"), "alice%40example.com");
        assert_eq!(path_encode("My Bank:x"), "My%20Bank%3Ax");
        assert_eq!(query_encode("My Bank & Co"), "My+Bank+%26+Co");
    }
}

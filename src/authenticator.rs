//! Authenticator variants and the secret block they persist.
//!
//! An [`Authenticator`] is the credential itself: shared secret, hash
//! algorithm, digit count, period and the fields specific to its
//! [`Variant`]. Codes are produced through `totp-rs`.

use std::fmt;

use time::OffsetDateTime;
use totp_rs::{Algorithm, Secret, TOTP};
use tracing::debug;
use zeroize::Zeroizing;

use crate::crypto::{PasswordCodec, SecretCodec};
use crate::document::Node;
use crate::error::{AuthError, Result};

pub const DEFAULT_ALGORITHM: HashAlgorithm = HashAlgorithm::Sha1;
pub const DEFAULT_PERIOD: u64 = 30;
pub const DEFAULT_DIGITS: u32 = 6;
/// Longest code the HOTP truncation can produce from a 31-bit value.
pub const MAX_DIGITS: u32 = 9;

/// Element holding the serialized authenticator inside a record.
pub const BLOCK_ELEMENT: &str = "authenticatordata";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum HashAlgorithm {
    #[default]
    Sha1,
    Sha256,
    Sha512,
}

impl HashAlgorithm {
    pub fn name(&self) -> &'static str {
        match self {
            HashAlgorithm::Sha1 => "SHA1",
            HashAlgorithm::Sha256 => "SHA256",
            HashAlgorithm::Sha512 => "SHA512",
        }
    }

    /// Parses a stored algorithm name. The flag is true when the spelling
    /// was a legacy one (`HMACSHA1`, `HMAC-SHA256`, `sha-512`, ...).
    pub fn parse(s: &str) -> Option<(Self, bool)> {
        let upper = s.trim().to_uppercase();
        let canonical = match upper.as_str() {
            "SHA1" => return Some((HashAlgorithm::Sha1, false)),
            "SHA256" => return Some((HashAlgorithm::Sha256, false)),
            "SHA512" => return Some((HashAlgorithm::Sha512, false)),
            other => other
                .trim_start_matches("HMAC")
                .trim_start_matches('-')
                .replace('-', ""),
        };
        match canonical.as_str() {
            "SHA1" => Some((HashAlgorithm::Sha1, true)),
            "SHA256" => Some((HashAlgorithm::Sha256, true)),
            "SHA512" => Some((HashAlgorithm::Sha512, true)),
            _ => None,
        }
    }

    fn engine(&self) -> Algorithm {
        match self {
            HashAlgorithm::Sha1 => Algorithm::SHA1,
            HashAlgorithm::Sha256 => Algorithm::SHA256,
            HashAlgorithm::Sha512 => Algorithm::SHA512,
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VariantKind {
    Totp,
    Hotp,
    BattleNet,
    Steam,
}

impl VariantKind {
    pub fn tag(&self) -> &'static str {
        match self {
            VariantKind::Totp => "otpkeep.totp",
            VariantKind::Hotp => "otpkeep.hotp",
            VariantKind::BattleNet => "otpkeep.battlenet",
            VariantKind::Steam => "otpkeep.steam",
        }
    }
}

/// Registry of constructible variants, keyed by the tag written to documents.
const REGISTRY: &[(VariantKind, fn() -> Variant)] = &[
    (VariantKind::Totp, empty_totp),
    (VariantKind::Hotp, empty_hotp),
    (VariantKind::BattleNet, empty_battlenet),
    (VariantKind::Steam, empty_steam),
];

fn empty_totp() -> Variant {
    Variant::Totp
}

fn empty_hotp() -> Variant {
    Variant::Hotp { counter: 0 }
}

fn empty_battlenet() -> Variant {
    Variant::BattleNet {
        serial: String::new(),
    }
}

fn empty_steam() -> Variant {
    Variant::Steam {
        device_id: String::new(),
        steam_data: String::new(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Variant {
    Totp,
    Hotp { counter: u64 },
    BattleNet { serial: String },
    Steam { device_id: String, steam_data: String },
}

impl Variant {
    pub fn kind(&self) -> VariantKind {
        match self {
            Variant::Totp => VariantKind::Totp,
            Variant::Hotp { .. } => VariantKind::Hotp,
            Variant::BattleNet { .. } => VariantKind::BattleNet,
            Variant::Steam { .. } => VariantKind::Steam,
        }
    }

    /// Case-insensitive lookup of a document tag.
    pub fn from_tag(tag: &str) -> Option<Variant> {
        REGISTRY
            .iter()
            .find(|(kind, _)| kind.tag().eq_ignore_ascii_case(tag.trim()))
            .map(|(_, make)| make())
    }

    fn default_digits(&self) -> u32 {
        match self {
            Variant::BattleNet { .. } => 8,
            Variant::Steam { .. } => 5,
            _ => DEFAULT_DIGITS,
        }
    }
}

/// Secret key material, possibly still sealed with a password.
#[derive(Clone)]
pub enum SecretKey {
    Unlocked(Zeroizing<Vec<u8>>),
    Locked { scheme: String, sealed: String },
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SecretKey::Unlocked(key) => write!(f, "Unlocked({} bytes)", key.len()),
            SecretKey::Locked { scheme, .. } => write!(f, "Locked({scheme})"),
        }
    }
}

impl PartialEq for SecretKey {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (SecretKey::Unlocked(a), SecretKey::Unlocked(b)) => a.as_slice() == b.as_slice(),
            (
                SecretKey::Locked { scheme: s1, sealed: b1 },
                SecretKey::Locked { scheme: s2, sealed: b2 },
            ) => s1 == s2 && b1 == b2,
            _ => false,
        }
    }
}

/// Reference time provider used by [`OtpEngine::sync`].
pub trait ServerClock {
    /// Server time in milliseconds since the Unix epoch.
    fn server_time_ms(&self, kind: VariantKind) -> Result<i64>;
}

/// Capability every authenticator variant provides to a record.
pub trait OtpEngine {
    fn kind(&self) -> VariantKind;

    /// Computes the code for now. Advances the counter of a HOTP variant.
    fn current_code(&mut self) -> Result<String>;

    /// Reconciles local clock drift against `clock`.
    fn sync(&mut self, clock: &dyn ServerClock) -> Result<()>;

    /// Reads an `authenticatordata` block. Returns true if legacy data was
    /// normalized while reading.
    fn decode(&mut self, block: &Node, password: Option<&str>) -> Result<bool>;

    /// Appends an `authenticatordata` block to `parent`.
    fn encode(&self, parent: &mut Node) -> Result<()>;

    fn issuer(&self) -> &str;
    fn hash_algorithm(&self) -> HashAlgorithm;
    fn code_digits(&self) -> u32;
    fn period(&self) -> u64;
    /// `None` while the secret is sealed.
    fn secret_key(&self) -> Option<&[u8]>;
    fn serial(&self) -> Option<&str>;
    fn device_id(&self) -> Option<&str>;
    fn session_data(&self) -> Option<&str>;
    fn counter(&self) -> Option<u64>;
}

#[derive(Clone)]
pub struct Authenticator {
    variant: Variant,
    issuer: String,
    algorithm: HashAlgorithm,
    digits: u32,
    period: u64,
    secret: SecretKey,
    server_time_diff: i64,
    last_server_time: i64,
    password: Option<Zeroizing<String>>,
}

impl fmt::Debug for Authenticator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Authenticator")
            .field("variant", &self.variant)
            .field("issuer", &self.issuer)
            .field("algorithm", &self.algorithm)
            .field("digits", &self.digits)
            .field("period", &self.period)
            .field("secret", &self.secret)
            .field("server_time_diff", &self.server_time_diff)
            .field("protected", &self.password.is_some())
            .finish()
    }
}

impl PartialEq for Authenticator {
    fn eq(&self, other: &Self) -> bool {
        self.variant == other.variant
            && self.issuer == other.issuer
            && self.algorithm == other.algorithm
            && self.digits == other.digits
            && self.period == other.period
            && self.secret == other.secret
            && self.server_time_diff == other.server_time_diff
            && self.last_server_time == other.last_server_time
    }
}

impl Authenticator {
    pub fn new(variant: Variant, secret: Vec<u8>) -> Self {
        Authenticator {
            digits: variant.default_digits(),
            variant,
            issuer: String::new(),
            algorithm: DEFAULT_ALGORITHM,
            period: DEFAULT_PERIOD,
            secret: SecretKey::Unlocked(Zeroizing::new(secret)),
            server_time_diff: 0,
            last_server_time: 0,
            password: None,
        }
    }

    /// Empty instance of the variant registered under `tag`.
    pub fn from_tag(tag: &str) -> Result<Self> {
        Variant::from_tag(tag)
            .map(|v| Authenticator::new(v, Vec::new()))
            .ok_or_else(|| AuthError::UnknownVariant(tag.to_string()))
    }

    /// Builds an authenticator from a base32 secret.
    pub fn from_base32(variant: Variant, secret: &str) -> Result<Self> {
        Ok(Authenticator::new(variant, decode_base32(secret)?))
    }

    pub fn with_issuer(mut self, issuer: impl Into<String>) -> Self {
        self.issuer = issuer.into();
        self
    }

    pub fn with_algorithm(mut self, algorithm: HashAlgorithm) -> Self {
        self.algorithm = algorithm;
        self
    }

    pub fn with_digits(mut self, digits: u32) -> Self {
        self.digits = digits;
        self
    }

    pub fn with_period(mut self, period: u64) -> Self {
        self.period = period;
        self
    }

    pub fn tag(&self) -> &'static str {
        self.variant.kind().tag()
    }

    pub fn variant(&self) -> &Variant {
        &self.variant
    }

    pub fn variant_mut(&mut self) -> &mut Variant {
        &mut self.variant
    }

    pub fn set_issuer(&mut self, issuer: impl Into<String>) {
        self.issuer = issuer.into();
    }

    pub fn set_algorithm(&mut self, algorithm: HashAlgorithm) {
        self.algorithm = algorithm;
    }

    pub fn set_digits(&mut self, digits: u32) {
        self.digits = digits;
    }

    pub fn set_period(&mut self, period: u64) {
        self.period = period;
    }

    pub fn set_secret(&mut self, secret: Vec<u8>) {
        self.secret = SecretKey::Unlocked(Zeroizing::new(secret));
    }

    pub fn secret(&self) -> &SecretKey {
        &self.secret
    }

    pub fn is_locked(&self) -> bool {
        matches!(self.secret, SecretKey::Locked { .. })
    }

    pub fn is_protected(&self) -> bool {
        self.password.is_some() || self.is_locked()
    }

    pub fn server_time_diff(&self) -> i64 {
        self.server_time_diff
    }

    pub fn set_server_time_diff(&mut self, diff: i64) {
        self.server_time_diff = diff;
    }

    pub fn last_server_time(&self) -> i64 {
        self.last_server_time
    }

    /// True until a sync has succeeded, or after a sync was deferred.
    pub fn needs_sync(&self) -> bool {
        self.last_server_time == 0 && self.variant.kind() != VariantKind::Hotp
    }

    /// Seals the secret with `password` on the next encode. `None` stores it in clear.
    pub fn protect(&mut self, password: Option<&str>) -> Result<()> {
        if self.is_locked() {
            return Err(AuthError::EncryptedSecret);
        }
        self.password = password.map(|p| Zeroizing::new(p.to_string()));
        Ok(())
    }

    /// Opens a sealed secret. Returns true if the opened payload was in a legacy form.
    pub fn unlock(&mut self, password: &str) -> Result<bool> {
        let (scheme, sealed) = match &self.secret {
            SecretKey::Unlocked(_) => return Ok(false),
            SecretKey::Locked { scheme, sealed } => (scheme.clone(), sealed.clone()),
        };

        let codec = PasswordCodec::default();
        if !scheme.eq_ignore_ascii_case(codec.scheme()) {
            return Err(AuthError::InvalidSecret(format!(
                "unsupported encryption '{scheme}'"
            )));
        }

        let plaintext = codec.open(&sealed, password)?;
        let payload = std::str::from_utf8(&plaintext)
            .map_err(|_| AuthError::InvalidSecret("decrypted secret is not text".into()))?;
        let migrated = self.apply_payload(payload)?;
        self.password = Some(Zeroizing::new(password.to_string()));
        Ok(migrated)
    }

    /// Code at `unix_secs` (server-corrected by the caller). For HOTP this is
    /// the code of the current counter and does not advance it.
    pub fn code_at(&self, unix_secs: u64) -> Result<String> {
        let key = self.unlocked_key()?;
        match &self.variant {
            Variant::Hotp { counter } => {
                generate(self.algorithm.engine(), self.digits, 1, key, *counter)
            }
            Variant::Steam { .. } => generate(Algorithm::Steam, 5, self.period, key, unix_secs),
            _ => generate(self.algorithm.engine(), self.digits, self.period, key, unix_secs),
        }
    }

    /// Local time corrected by the last sync, in seconds.
    pub fn server_time(&self) -> u64 {
        let ms = now_millis() + self.server_time_diff;
        (ms.max(0) / 1000) as u64
    }

    fn unlocked_key(&self) -> Result<&[u8]> {
        match &self.secret {
            SecretKey::Unlocked(key) => Ok(key.as_slice()),
            SecretKey::Locked { .. } => Err(AuthError::EncryptedSecret),
        }
    }

    /// Stores a clear-text secret payload: `BASE32` or the legacy
    /// `BASE32|extra...` form carrying variant fields.
    fn apply_payload(&mut self, payload: &str) -> Result<bool> {
        let mut parts = payload.trim().split('|');
        let key = decode_base32(parts.next().unwrap_or_default())?;
        let extras: Vec<&str> = parts.collect();

        match (&mut self.variant, extras.as_slice()) {
            (Variant::BattleNet { serial }, [s, ..]) if serial.is_empty() => {
                *serial = s.to_string();
            }
            (
                Variant::Steam {
                    device_id,
                    steam_data,
                },
                [d, rest @ ..],
            ) => {
                if device_id.is_empty() {
                    *device_id = d.to_string();
                }
                if steam_data.is_empty() {
                    *steam_data = rest.join("|");
                }
            }
            _ => {}
        }

        self.secret = SecretKey::Unlocked(Zeroizing::new(key));
        Ok(!extras.is_empty())
    }
}

impl OtpEngine for Authenticator {
    fn kind(&self) -> VariantKind {
        self.variant.kind()
    }

    fn current_code(&mut self) -> Result<String> {
        let key = self.unlocked_key()?;
        let Variant::Hotp { counter } = &self.variant else {
            return self.code_at(self.server_time());
        };

        // the counter moves only once a code exists for it
        let next = counter
            .checked_add(1)
            .ok_or_else(|| AuthError::Code("HOTP counter exhausted".into()))?;
        let code = generate(self.algorithm.engine(), self.digits, 1, key, next)?;
        self.variant = Variant::Hotp { counter: next };
        Ok(code)
    }

    fn sync(&mut self, clock: &dyn ServerClock) -> Result<()> {
        if self.variant.kind() == VariantKind::Hotp {
            return Ok(());
        }
        if self.is_locked() {
            self.last_server_time = 0;
            return Err(AuthError::EncryptedSecret);
        }

        let local = now_millis();
        let server = clock.server_time_ms(self.variant.kind())?;
        self.server_time_diff = server - local;
        self.last_server_time = local;
        debug!(diff_ms = self.server_time_diff, "synced {}", self.tag());
        Ok(())
    }

    fn decode(&mut self, block: &Node, password: Option<&str>) -> Result<bool> {
        let mut changed = false;
        let mut payload: Option<String> = None;
        let mut sealed: Option<(String, String)> = None;

        for child in block.elements() {
            match child.name() {
                "issuer" => self.issuer = child.read_string(),
                "hmactype" => {
                    let (algorithm, legacy) =
                        HashAlgorithm::parse(child.text()).ok_or_else(|| {
                            AuthError::InvalidValue {
                                element: "hmactype".into(),
                                value: child.read_string(),
                            }
                        })?;
                    self.algorithm = algorithm;
                    changed |= legacy;
                }
                "codedigits" => self.digits = read_digits(child)?,
                "period" => self.period = child.read_u64()?,
                "servertimediff" => self.server_time_diff = child.read_i64()?,
                "lastservertime" => self.last_server_time = child.read_i64()?,
                "secretdata" => match child.attribute("encrypted").filter(|s| !s.is_empty()) {
                    Some(scheme) => sealed = Some((scheme.to_string(), child.read_string())),
                    None => payload = Some(child.read_string()),
                },
                "counter" => {
                    if let Variant::Hotp { counter } = &mut self.variant {
                        *counter = child.read_u64()?;
                    }
                }
                "serial" => {
                    if let Variant::BattleNet { serial } = &mut self.variant {
                        *serial = child.read_string();
                    }
                }
                "deviceid" => {
                    if let Variant::Steam { device_id, .. } = &mut self.variant {
                        *device_id = child.read_string();
                    }
                }
                "steamdata" => {
                    if let Variant::Steam { steam_data, .. } = &mut self.variant {
                        *steam_data = child.read_string();
                    }
                }
                other => debug!("skipping unknown authenticator element <{other}>"),
            }
        }

        if let Some(payload) = payload {
            changed |= self.apply_payload(&payload)?;
            self.password = None;
        }

        if let Some((scheme, sealed)) = sealed {
            self.secret = SecretKey::Locked { scheme, sealed };
            self.password = None;
            match password {
                Some(password) => changed |= self.unlock(password)?,
                None => return Err(AuthError::EncryptedSecret),
            }
        }

        Ok(changed)
    }

    fn encode(&self, parent: &mut Node) -> Result<()> {
        let mut block = Node::new(BLOCK_ELEMENT);
        block.push_value("issuer", &self.issuer);
        block.push_value("hmactype", self.algorithm);
        block.push_value("codedigits", self.digits);
        block.push_value("period", self.period);
        block.push_value("servertimediff", self.server_time_diff);
        block.push_value("lastservertime", self.last_server_time);

        let mut secret = Node::new("secretdata");
        match (&self.secret, &self.password) {
            (SecretKey::Locked { scheme, sealed }, _) => {
                secret.set_attribute("encrypted", scheme.as_str());
                secret.set_text(sealed.as_str());
            }
            (SecretKey::Unlocked(key), Some(password)) => {
                let codec = PasswordCodec::default();
                let sealed = codec.seal(encode_base32(key).as_bytes(), password)?;
                secret.set_attribute("encrypted", codec.scheme());
                secret.set_text(sealed);
            }
            (SecretKey::Unlocked(key), None) => secret.set_text(encode_base32(key)),
        }
        block.push(secret);

        match &self.variant {
            Variant::Totp => {}
            Variant::Hotp { counter } => block.push_value("counter", counter),
            Variant::BattleNet { serial } => block.push_value("serial", serial),
            Variant::Steam {
                device_id,
                steam_data,
            } => {
                block.push_value("deviceid", device_id);
                block.push_value("steamdata", steam_data);
            }
        }

        parent.push(block);
        Ok(())
    }

    fn issuer(&self) -> &str {
        &self.issuer
    }

    fn hash_algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    fn code_digits(&self) -> u32 {
        self.digits
    }

    fn period(&self) -> u64 {
        self.period
    }

    fn secret_key(&self) -> Option<&[u8]> {
        self.unlocked_key().ok()
    }

    fn serial(&self) -> Option<&str> {
        match &self.variant {
            Variant::BattleNet { serial } => Some(serial),
            _ => None,
        }
    }

    fn device_id(&self) -> Option<&str> {
        match &self.variant {
            Variant::Steam { device_id, .. } => Some(device_id),
            _ => None,
        }
    }

    fn session_data(&self) -> Option<&str> {
        match &self.variant {
            Variant::Steam { steam_data, .. } => Some(steam_data),
            _ => None,
        }
    }

    fn counter(&self) -> Option<u64> {
        match &self.variant {
            Variant::Hotp { counter } => Some(*counter),
            _ => None,
        }
    }
}

pub fn decode_base32(s: &str) -> Result<Vec<u8>> {
    let normalized: String = s
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '=' && *c != '-')
        .map(|c| c.to_ascii_uppercase())
        .collect();
    if normalized.is_empty() {
        return Ok(Vec::new());
    }
    Secret::Encoded(normalized)
        .to_bytes()
        .map_err(|e| AuthError::InvalidSecret(format!("not base32: {e:?}")))
}

pub fn encode_base32(bytes: &[u8]) -> String {
    match Secret::Raw(bytes.to_vec()).to_encoded() {
        Secret::Encoded(s) => s,
        Secret::Raw(_) => String::new(),
    }
}

fn generate(algorithm: Algorithm, digits: u32, step: u64, key: &[u8], t: u64) -> Result<String> {
    if key.is_empty() {
        return Err(AuthError::Code("secret is empty".into()));
    }
    if step == 0 {
        return Err(AuthError::Code("period must be positive".into()));
    }
    if !(1..=MAX_DIGITS).contains(&digits) {
        return Err(AuthError::Code(format!(
            "{digits} digits is outside 1..={MAX_DIGITS}"
        )));
    }
    let totp = TOTP::new_unchecked(algorithm, digits as usize, 1, step, key.to_vec());
    Ok(totp.generate(t))
}

fn read_digits(node: &Node) -> Result<u32> {
    let value = node.read_u64()?;
    u32::try_from(value)
        .ok()
        .filter(|d| (1..=MAX_DIGITS).contains(d))
        .ok_or_else(|| AuthError::InvalidValue {
            element: node.name().to_string(),
            value: node.read_string(),
        })
}

pub(crate) fn now_millis() -> i64 {
    (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}

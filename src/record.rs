//! One OTP credential as the user sees it: display name, creation time,
//! behaviour flags and the attached [`Authenticator`].

use std::fmt;

use time::{OffsetDateTime, UtcOffset};
use tracing::debug;
use uuid::Uuid;

use crate::authenticator::{Authenticator, OtpEngine, ServerClock, VariantKind};
use crate::document::Node;
use crate::error::{AuthError, Result};

/// Root element name used by [`Record::to_node`].
pub const RECORD_ELEMENT: &str = "record";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Property {
    Name,
    AutoRefresh,
    AllowCopy,
    CopyOnCode,
    HideSerial,
    /// A HOTP code was read and the counter consumed.
    Counter,
}

impl fmt::Display for Property {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Property::Name => "Name",
            Property::AutoRefresh => "AutoRefresh",
            Property::AllowCopy => "AllowCopy",
            Property::CopyOnCode => "CopyOnCode",
            Property::HideSerial => "HideSerial",
            Property::Counter => "HOTP",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RecordChange<'a> {
    /// `None` for a general "something changed" notification.
    pub property: Option<Property>,
    pub authenticator: Option<&'a Authenticator>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Listener = Box<dyn Fn(&Record, &RecordChange<'_>)>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    Synced,
    /// Secret is sealed; the sync runs after the next unlock.
    Deferred,
    NotAttached,
}

pub struct Record {
    id: Uuid,
    index: i32,
    name: String,
    created: OffsetDateTime,
    authenticator: Option<Authenticator>,
    auto_refresh: bool,
    allow_copy: bool,
    copy_on_code: bool,
    hide_serial: bool,
    listeners: Vec<(ListenerId, Listener)>,
    next_listener: u64,
}

impl fmt::Debug for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Record")
            .field("id", &self.id)
            .field("index", &self.index)
            .field("name", &self.name)
            .field("created", &self.created)
            .field("authenticator", &self.authenticator)
            .field("auto_refresh", &self.auto_refresh())
            .field("allow_copy", &self.allow_copy)
            .field("copy_on_code", &self.copy_on_code)
            .field("hide_serial", &self.hide_serial)
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

impl Default for Record {
    fn default() -> Self {
        Record::new()
    }
}

/// A copy with a fresh id, its own authenticator and no listeners.
impl Clone for Record {
    fn clone(&self) -> Self {
        Record {
            id: Uuid::new_v4(),
            index: self.index,
            name: self.name.clone(),
            created: self.created,
            authenticator: self.authenticator.clone(),
            auto_refresh: self.auto_refresh,
            allow_copy: self.allow_copy,
            copy_on_code: self.copy_on_code,
            hide_serial: self.hide_serial,
            listeners: Vec::new(),
            next_listener: 0,
        }
    }
}

impl Record {
    pub fn new() -> Self {
        Record {
            id: Uuid::new_v4(),
            index: 0,
            name: String::new(),
            created: now_local(),
            authenticator: None,
            auto_refresh: true,
            allow_copy: false,
            copy_on_code: false,
            hide_serial: false,
            listeners: Vec::new(),
            next_listener: 0,
        }
    }

    pub fn with_authenticator(name: impl Into<String>, authenticator: Authenticator) -> Self {
        let mut record = Record::new();
        record.name = name.into();
        record.authenticator = Some(authenticator);
        record
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn index(&self) -> i32 {
        self.index
    }

    pub fn set_index(&mut self, index: i32) {
        self.index = index;
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn created(&self) -> OffsetDateTime {
        self.created
    }

    pub fn created_millis(&self) -> i64 {
        (self.created.unix_timestamp_nanos() / 1_000_000) as i64
    }

    pub fn authenticator(&self) -> Option<&Authenticator> {
        self.authenticator.as_ref()
    }

    pub fn authenticator_mut(&mut self) -> Option<&mut Authenticator> {
        self.authenticator.as_mut()
    }

    pub fn set_authenticator(&mut self, authenticator: Option<Authenticator>) {
        self.authenticator = authenticator;
    }

    fn is_hotp(&self) -> bool {
        self.authenticator
            .as_ref()
            .is_some_and(|a| a.kind() == VariantKind::Hotp)
    }

    /// Effective flag: always false for a counter-based authenticator.
    pub fn auto_refresh(&self) -> bool {
        self.auto_refresh && !self.is_hotp()
    }

    pub fn allow_copy(&self) -> bool {
        self.allow_copy
    }

    pub fn copy_on_code(&self) -> bool {
        self.copy_on_code
    }

    pub fn hide_serial(&self) -> bool {
        self.hide_serial
    }

    pub fn set_name(&mut self, value: impl Into<String>) {
        self.name = value.into();
        self.notify(Some(Property::Name), false);
    }

    pub fn set_auto_refresh(&mut self, value: bool) {
        self.auto_refresh = value;
        self.notify(Some(Property::AutoRefresh), false);
    }

    pub fn set_allow_copy(&mut self, value: bool) {
        self.allow_copy = value;
        self.notify(Some(Property::AllowCopy), false);
    }

    pub fn set_copy_on_code(&mut self, value: bool) {
        self.copy_on_code = value;
        self.notify(Some(Property::CopyOnCode), false);
    }

    pub fn set_hide_serial(&mut self, value: bool) {
        self.hide_serial = value;
        self.notify(Some(Property::HideSerial), false);
    }

    /// Raises a change event that names no particular property.
    pub fn mark_changed(&self) {
        self.notify(None, false);
    }

    /// Registers `listener`; it is called synchronously after every change,
    /// in registration order.
    pub fn subscribe<F>(&mut self, listener: F) -> ListenerId
    where
        F: Fn(&Record, &RecordChange<'_>) + 'static,
    {
        let id = ListenerId(self.next_listener);
        self.next_listener += 1;
        self.listeners.push((id, Box::new(listener)));
        id
    }

    pub fn unsubscribe(&mut self, id: ListenerId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(l, _)| *l != id);
        self.listeners.len() != before
    }

    fn notify(&self, property: Option<Property>, with_authenticator: bool) {
        if self.listeners.is_empty() {
            return;
        }
        let change = RecordChange {
            property,
            authenticator: if with_authenticator {
                self.authenticator.as_ref()
            } else {
                None
            },
        };
        for (_, listener) in &self.listeners {
            listener(self, &change);
        }
    }

    /// Current code, or `None` when no authenticator is attached.
    ///
    /// Reading a HOTP code consumes the counter and raises
    /// [`Property::Counter`]. A sealed secret yields
    /// [`AuthError::EncryptedSecret`].
    pub fn current_code(&mut self) -> Result<Option<String>> {
        let Some(authenticator) = self.authenticator.as_mut() else {
            return Ok(None);
        };
        let code = authenticator.current_code()?;
        if authenticator.kind() == VariantKind::Hotp {
            self.notify(Some(Property::Counter), true);
        }
        Ok(Some(code))
    }

    pub fn sync(&mut self, clock: &dyn ServerClock) -> Result<SyncOutcome> {
        let Some(authenticator) = self.authenticator.as_mut() else {
            return Ok(SyncOutcome::NotAttached);
        };
        match authenticator.sync(clock) {
            Ok(()) => Ok(SyncOutcome::Synced),
            Err(AuthError::EncryptedSecret) => {
                debug!(id = %self.id, "secret is locked, deferring time sync");
                Ok(SyncOutcome::Deferred)
            }
            Err(e) => Err(e),
        }
    }

    /// Opens a sealed secret. Returns true if the stored data was in a legacy form.
    pub fn unlock(&mut self, password: &str) -> Result<bool> {
        match self.authenticator.as_mut() {
            Some(authenticator) => authenticator.unlock(password),
            None => Err(AuthError::NotAttached),
        }
    }

    /// Decodes a record element into `self`.
    ///
    /// Returns true when the authenticator normalized legacy data, meaning the
    /// record should be written back. A secret that stays sealed (no password
    /// or a wrong one) does not fail the decode.
    pub fn read_from(&mut self, node: &Node, password: Option<&str>) -> Result<bool> {
        let mut changed = false;

        match node.attribute("id").map(|s| Uuid::parse_str(s.trim())) {
            Some(Ok(id)) => self.id = id,
            Some(Err(_)) => debug!("ignoring malformed record id"),
            None => {}
        }

        if let Some(tag) = node.attribute("type").filter(|t| !t.is_empty()) {
            self.authenticator = Some(Authenticator::from_tag(tag)?);
        }

        if !node.has_content() {
            return Ok(changed);
        }

        let mut server_time_diff: Option<i64> = None;

        for child in node.elements() {
            match child.name() {
                "name" => self.name = child.read_string(),
                "created" => {
                    self.created = from_millis(child.read_i64()?).ok_or_else(|| {
                        AuthError::InvalidValue {
                            element: "created".into(),
                            value: child.read_string(),
                        }
                    })?;
                }
                "autorefresh" => self.auto_refresh = child.read_bool()?,
                "allowcopy" => self.allow_copy = child.read_bool()?,
                "copyoncode" => self.copy_on_code = child.read_bool()?,
                "hideserial" => self.hide_serial = child.read_bool()?,
                "authenticatordata" => {
                    let authenticator = self
                        .authenticator
                        .as_mut()
                        .ok_or_else(|| AuthError::UnknownVariant(String::new()))?;
                    changed |= decode_tolerant(authenticator, child, password)?;
                }
                // legacy layout: self-contained block carrying its own type
                "authenticator" => {
                    let tag = child.attribute("type").unwrap_or_default();
                    let mut authenticator = Authenticator::from_tag(tag)?;
                    changed |= decode_tolerant(&mut authenticator, child, password)?;
                    self.authenticator = Some(authenticator);
                }
                "servertimediff" => server_time_diff = Some(child.read_i64()?),
                other => debug!("skipping unknown record element <{other}>"),
            }
        }

        if let Some(diff) = server_time_diff {
            match self.authenticator.as_mut() {
                Some(authenticator) => authenticator.set_server_time_diff(diff),
                None => debug!("servertimediff without an authenticator, skipped"),
            }
        }

        Ok(changed)
    }

    /// Writes id, type and the child elements into `node`.
    pub fn write_to(&self, node: &mut Node) -> Result<()> {
        node.set_attribute("id", self.id.to_string());
        if let Some(authenticator) = &self.authenticator {
            node.set_attribute("type", authenticator.tag());
        }

        node.push_value("name", &self.name);
        node.push_value("created", self.created_millis());
        node.push_value("autorefresh", self.auto_refresh());
        node.push_value("allowcopy", self.allow_copy);
        node.push_value("copyoncode", self.copy_on_code);
        node.push_value("hideserial", self.hide_serial);

        if let Some(authenticator) = &self.authenticator {
            authenticator.encode(node)?;
        }
        Ok(())
    }

    pub fn to_node(&self) -> Result<Node> {
        let mut node = Node::new(RECORD_ELEMENT);
        self.write_to(&mut node)?;
        Ok(node)
    }

    pub fn from_node(node: &Node, password: Option<&str>) -> Result<Record> {
        let mut record = Record::new();
        record.read_from(node, password)?;
        Ok(record)
    }
}

fn decode_tolerant(
    authenticator: &mut Authenticator,
    block: &Node,
    password: Option<&str>,
) -> Result<bool> {
    match authenticator.decode(block, password) {
        Ok(changed) => Ok(changed),
        Err(e) if e.is_locked() => {
            debug!("authenticator secret left locked: {e}");
            Ok(false)
        }
        Err(e) => Err(e),
    }
}

fn local_offset() -> UtcOffset {
    UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC)
}

fn now_local() -> OffsetDateTime {
    from_millis(crate::authenticator::now_millis())
        .unwrap_or_else(|| OffsetDateTime::now_utc().to_offset(local_offset()))
}

/// Local time for epoch milliseconds; `None` outside the representable years.
fn from_millis(ms: i64) -> Option<OffsetDateTime> {
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(ms) * 1_000_000)
        .ok()
        .and_then(|utc| utc.checked_to_offset(local_offset()))
}

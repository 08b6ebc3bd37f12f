use thiserror::Error;

pub type Result<T, E = AuthError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("record has no authenticator attached")]
    NotAttached,
    #[error("unknown authenticator type '{0}'")]
    UnknownVariant(String),
    #[error("secret is encrypted and no password was supplied")]
    EncryptedSecret,
    #[error("invalid password for encrypted secret")]
    BadPassword,
    #[error("invalid secret: {0}")]
    InvalidSecret(String),
    #[error("invalid value '{value}' in <{element}>")]
    InvalidValue { element: String, value: String },
    #[error("document error: {0}")]
    Xml(String),
    #[error("failed to generate code: {0}")]
    Code(String),
    #[error("time sync failed: {0}")]
    Sync(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl AuthError {
    /// True for the two conditions that leave a secret sealed but the record usable.
    pub fn is_locked(&self) -> bool {
        matches!(self, AuthError::EncryptedSecret | AuthError::BadPassword)
    }
}

impl From<quick_xml::Error> for AuthError {
    fn from(e: quick_xml::Error) -> Self {
        AuthError::Xml(e.to_string())
    }
}

impl From<quick_xml::events::attributes::AttrError> for AuthError {
    fn from(e: quick_xml::events::attributes::AttrError) -> Self {
        AuthError::Xml(e.to_string())
    }
}

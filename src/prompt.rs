use anyhow::{Result, bail};

pub fn prompt_password_hidden(prompt: &str) -> Result<String> {
    let pw = rpassword::prompt_password(prompt)?;
    Ok(pw)
}

/// Asks twice for a new secret password.
pub fn prompt_new_password() -> Result<String> {
    let password = prompt_password_hidden("New password: ")?;
    if password.is_empty() {
        bail!("Password cannot be empty");
    }
    let confirm = prompt_password_hidden("Confirm password: ")?;
    if password != confirm {
        bail!("Passwords do not match");
    }
    Ok(password)
}

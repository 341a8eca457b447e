//! Form field checks for the auth screens
//!
//! Every check returns the normalised value or a [`FormError`] naming the field,
//! so a screen can put the message next to the right input.

/// Minimum length for a new password (Cognito default policy)
pub const MIN_PASSWORD_LENGTH: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormField {
    FirstName,
    LastName,
    Email,
    Password,
    ConfirmPassword,
    Code,
}

/// Inline, re-enterable form error
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormError {
    /// `None` for errors that belong to the whole form
    pub field: Option<FormField>,
    pub message: String,
}

impl FormError {
    #[must_use]
    pub fn field(field: FormField, message: impl Into<String>) -> Self {
        Self {
            field: Some(field),
            message: message.into(),
        }
    }

    #[must_use]
    pub fn form(message: impl Into<String>) -> Self {
        Self {
            field: None,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for FormError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for FormError {}

/// Trimmed, lower-cased email with a plausible `local@domain.tld` shape
///
/// # Errors
///
/// Returns a `FormField::Email` error if the address is empty or malformed
pub fn validate_email(email: &str) -> Result<String, FormError> {
    let email = email.trim();
    if email.is_empty() {
        return Err(FormError::field(FormField::Email, "Email is required"));
    }

    let valid = match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.contains('@')
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
                && !email.chars().any(char::is_whitespace)
        }
        None => false,
    };
    if !valid {
        return Err(FormError::field(FormField::Email, "Enter a valid email address"));
    }
    Ok(email.to_lowercase())
}

/// Sign-in password: only presence is checked
///
/// # Errors
///
/// Returns a `FormField::Password` error if the password is empty
pub fn validate_password(password: &str) -> Result<(), FormError> {
    if password.is_empty() {
        return Err(FormError::field(FormField::Password, "Password is required"));
    }
    Ok(())
}

/// New password plus confirmation
///
/// # Errors
///
/// Returns an error if the password is too short or the confirmation differs
pub fn validate_new_password(password: &str, confirmation: &str) -> Result<(), FormError> {
    validate_password(password)?;
    if password.chars().count() < MIN_PASSWORD_LENGTH {
        return Err(FormError::field(
            FormField::Password,
            format!("Password must be at least {MIN_PASSWORD_LENGTH} characters"),
        ));
    }
    if password != confirmation {
        return Err(FormError::field(FormField::ConfirmPassword, "Passwords do not match"));
    }
    Ok(())
}

/// Trimmed non-empty name
///
/// # Errors
///
/// Returns an error naming `field` if the value is blank
pub fn validate_name(value: &str, field: FormField) -> Result<String, FormError> {
    let value = value.trim();
    if value.is_empty() {
        let label = match field {
            FormField::LastName => "Last name",
            _ => "First name",
        };
        return Err(FormError::field(field, format!("{label} is required")));
    }
    Ok(value.to_string())
}

/// Trimmed numeric one-time code
///
/// # Errors
///
/// Returns a `FormField::Code` error if the code is empty or not all digits
pub fn validate_code(code: &str) -> Result<String, FormError> {
    let code = code.trim();
    if code.is_empty() {
        return Err(FormError::field(FormField::Code, "Enter the verification code"));
    }
    if !code.chars().all(|c| c.is_ascii_digit()) {
        return Err(FormError::field(FormField::Code, "The code should contain digits only"));
    }
    Ok(code.to_string())
}

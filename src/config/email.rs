//! Resend settings for customer notifications

use serde::Deserialize;
use std::time::Duration;

use super::error::ValidationError;

/// Outbound email for dunning notices.
#[derive(Debug, Clone, Deserialize)]
pub struct EmailConfig {
    /// Resend API key (`re_...`)
    pub resend_api_key: String,

    #[serde(default = "default_from_email")]
    pub from_email: String,

    #[serde(default = "default_from_name")]
    pub from_name: String,

    /// Replies to dunning notices go here instead of the no-reply sender
    #[serde(default)]
    pub reply_to: Option<String>,

    /// Deadline for one background send
    #[serde(default = "default_send_timeout")]
    pub send_timeout_secs: u64,
}

impl EmailConfig {
    /// `Name <address>` for the Resend `from` field.
    pub fn from_header(&self) -> String {
        format!("{} <{}>", self.from_name, self.from_email)
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_secs(self.send_timeout_secs)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.resend_api_key.is_empty() {
            return Err(ValidationError::Missing("DUNNING__EMAIL__RESEND_API_KEY"));
        }
        if !self.resend_api_key.starts_with("re_") {
            return Err(ValidationError::invalid(
                "DUNNING__EMAIL__RESEND_API_KEY",
                "expected an re_ key",
            ));
        }
        if !looks_like_address(&self.from_email) {
            return Err(ValidationError::invalid(
                "DUNNING__EMAIL__FROM_EMAIL",
                self.from_email.clone(),
            ));
        }
        if let Some(reply_to) = &self.reply_to {
            if !looks_like_address(reply_to) {
                return Err(ValidationError::invalid(
                    "DUNNING__EMAIL__REPLY_TO",
                    reply_to.clone(),
                ));
            }
        }
        if !(1..=60).contains(&self.send_timeout_secs) {
            return Err(ValidationError::out_of_range(
                "DUNNING__EMAIL__SEND_TIMEOUT_SECS",
                "between 1 and 60",
            ));
        }
        Ok(())
    }
}

fn looks_like_address(value: &str) -> bool {
    matches!(value.split_once('@'), Some((local, domain)) if !local.is_empty() && domain.contains('.'))
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            resend_api_key: String::new(),
            from_email: default_from_email(),
            from_name: default_from_name(),
            reply_to: None,
            send_timeout_secs: default_send_timeout(),
        }
    }
}

fn default_from_email() -> String {
    "billing@example.com".to_string()
}

fn default_from_name() -> String {
    "Billing".to_string()
}

fn default_send_timeout() -> u64 {
    10
}

#[cfg(test)]
mod tests {
    use super::*;

    fn configured() -> EmailConfig {
        EmailConfig {
            resend_api_key: "re_abcd1234".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_billing_sender_defaults() {
        let config = configured();
        assert!(config.validate().is_ok());
        assert_eq!(config.from_header(), "Billing <billing@example.com>");
        assert_eq!(config.send_timeout(), Duration::from_secs(10));
        assert!(config.reply_to.is_none());
    }

    #[test]
    fn test_missing_key_names_the_variable() {
        assert_eq!(
            EmailConfig::default().validate(),
            Err(ValidationError::Missing("DUNNING__EMAIL__RESEND_API_KEY"))
        );
    }

    #[test]
    fn test_stripe_key_in_resend_slot_is_rejected() {
        let config = EmailConfig {
            resend_api_key: "sk_test_xxx".to_string(),
            ..Default::default()
        };
        assert_eq!(
            config.validate().unwrap_err().field(),
            "DUNNING__EMAIL__RESEND_API_KEY"
        );
    }

    #[test]
    fn test_addresses_are_checked() {
        let config = EmailConfig {
            from_email: "billing".to_string(),
            ..configured()
        };
        assert_eq!(config.validate().unwrap_err().field(), "DUNNING__EMAIL__FROM_EMAIL");

        let config = EmailConfig {
            reply_to: Some("support@".to_string()),
            ..configured()
        };
        assert_eq!(config.validate().unwrap_err().field(), "DUNNING__EMAIL__REPLY_TO");

        let config = EmailConfig {
            reply_to: Some("support@example.com".to_string()),
            ..configured()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_send_timeout_bounds() {
        let config = EmailConfig {
            send_timeout_secs: 0,
            ..configured()
        };
        assert!(config.validate().is_err());
    }
}

//! Outgoing drafts and flag updates.

use serde::{Deserialize, Serialize};

use super::EmailId;

/// An email composed by the user, not yet sent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Draft {
    /// Recipient addresses.
    pub to: Vec<String>,
    /// CC addresses.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cc: Vec<String>,
    /// BCC addresses.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub bcc: Vec<String>,
    /// Subject line.
    pub subject: String,
    /// HTML body.
    pub body: String,
    /// Thread being replied to, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
}

impl Draft {
    /// Creates a draft from a compose form's recipient field.
    ///
    /// `to` may hold several addresses separated by commas or semicolons.
    #[must_use]
    pub fn new(to: &str, subject: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            to: parse_recipients(to),
            subject: subject.into(),
            body: body.into(),
            ..Self::default()
        }
    }

    /// Adds CC recipients from a separated list.
    #[must_use]
    pub fn cc(mut self, recipients: &str) -> Self {
        self.cc.extend(parse_recipients(recipients));
        self
    }

    /// Adds BCC recipients from a separated list.
    #[must_use]
    pub fn bcc(mut self, recipients: &str) -> Self {
        self.bcc.extend(parse_recipients(recipients));
        self
    }

    /// Marks the draft as a reply within a thread.
    #[must_use]
    pub fn in_thread(mut self, thread_id: impl Into<String>) -> Self {
        self.thread_id = Some(thread_id.into());
        self
    }

    /// Returns true if at least one non-blank `to` recipient is present.
    ///
    /// CC and BCC alone do not count.
    #[must_use]
    pub fn has_recipient(&self) -> bool {
        self.to.iter().any(|r| !r.trim().is_empty())
    }
}

/// Splits a recipient field into trimmed, non-empty addresses.
#[must_use]
pub fn parse_recipients(field: &str) -> Vec<String> {
    field
        .split([',', ';'])
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .map(str::to_string)
        .collect()
}

/// Provider acknowledgement of a sent message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SentReceipt {
    /// Server-assigned ID of the sent email.
    pub server_id: EmailId,
}

/// Flags to change on a remote email. `None` leaves a flag untouched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlagUpdate {
    /// New read state.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_read: Option<bool>,
    /// New starred state.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_starred: Option<bool>,
}

impl FlagUpdate {
    /// Update that only changes the read flag.
    #[must_use]
    pub const fn read(is_read: bool) -> Self {
        Self {
            is_read: Some(is_read),
            is_starred: None,
        }
    }

    /// Update that only changes the starred flag.
    #[must_use]
    pub const fn starred(is_starred: bool) -> Self {
        Self {
            is_read: None,
            is_starred: Some(is_starred),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_recipients() {
        assert_eq!(
            parse_recipients(" a@b.com, c@d.com ;; e@f.com "),
            vec!["a@b.com", "c@d.com", "e@f.com"]
        );
        assert!(parse_recipients("  , ").is_empty());
    }

    #[test]
    fn test_has_recipient() {
        assert!(!Draft::new("", "hi", "hi").has_recipient());
        assert!(Draft::new("a@b.com", "", "").has_recipient());
        assert!(!Draft::new("", "", "").bcc("x@y.com").has_recipient());
    }
}

//! Gate reply protocol
//!
//! Replies are free-form text. Anything that does not parse into a
//! [`GateReply`] is treated as no input and the gate keeps waiting.

use std::fmt;

use brdflow_utils::types::GateKind;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateReply {
    /// Gate A: pick a discovered organization by name or id.
    SelectOrganization(String),
    /// Gate A: create a new organization and select it.
    CreateOrganization(String),
    /// Gate B
    Approve,
    /// Gate B: discard the tree and parse again.
    Reject,
    /// Gate B: `<field>:<value>` or `<trace_id>.<field>:<value>`.
    Edit(String),
}

impl GateReply {
    /// Parse a reply; `None` means unrecognized.
    ///
    /// Keywords are case-insensitive and may be separated from their argument
    /// by whitespace. Arguments keep their case.
    #[must_use]
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        let (word, rest) = match text.split_once(char::is_whitespace) {
            Some((word, rest)) => (word, rest.trim()),
            None => (text, ""),
        };
        let word = word.to_ascii_lowercase();

        match (word.as_str(), rest.is_empty()) {
            ("approve" | "approved" | "yes", true) => Some(Self::Approve),
            ("reject" | "rejected" | "no", true) => Some(Self::Reject),
            ("select_organization" | "select", false) => {
                Some(Self::SelectOrganization(unquote(rest).to_string()))
            }
            ("create_organization", false) => Some(Self::CreateOrganization(unquote(rest).to_string())),
            ("edit", false) => Some(Self::Edit(rest.to_string())),
            _ => None,
        }
    }

    /// The gate this reply answers.
    #[must_use]
    pub const fn gate(&self) -> GateKind {
        match self {
            Self::SelectOrganization(_) | Self::CreateOrganization(_) => GateKind::A,
            Self::Approve | Self::Reject | Self::Edit(_) => GateKind::B,
        }
    }

    #[must_use]
    pub const fn action(&self) -> &'static str {
        match self {
            Self::SelectOrganization(_) => "select_organization",
            Self::CreateOrganization(_) => "create_organization",
            Self::Approve => "approve",
            Self::Reject => "reject",
            Self::Edit(_) => "edit",
        }
    }
}

fn unquote(s: &str) -> &str {
    s.strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .unwrap_or(s)
}

impl fmt::Display for GateReply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SelectOrganization(org) | Self::CreateOrganization(org) => {
                write!(f, "{} {org}", self.action())
            }
            Self::Edit(instruction) => write!(f, "edit {instruction}"),
            Self::Approve | Self::Reject => f.write_str(self.action()),
        }
    }
}

/// Replies accepted at `gate`, for prompts.
#[must_use]
pub fn usage(gate: GateKind) -> &'static str {
    match gate {
        GateKind::A => "reply 'select_organization <name|id>' or 'create_organization <name>'",
        GateKind::B => {
            "reply 'approve', 'reject' or 'edit [<trace_id>.]<title|description|parent>:<value>'"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gate_a_replies() {
        assert_eq!(
            GateReply::parse("select_organization Contoso Ltd"),
            Some(GateReply::SelectOrganization("Contoso Ltd".into()))
        );
        assert_eq!(
            GateReply::parse("  SELECT_ORGANIZATION   org-2 "),
            Some(GateReply::SelectOrganization("org-2".into()))
        );
        assert_eq!(
            GateReply::parse("create_organization \"New Org\""),
            Some(GateReply::CreateOrganization("New Org".into()))
        );
    }

    #[test]
    fn test_gate_b_replies() {
        assert_eq!(GateReply::parse("approve"), Some(GateReply::Approve));
        assert_eq!(GateReply::parse("Reject\n"), Some(GateReply::Reject));
        assert_eq!(
            GateReply::parse("edit r-0003.title:Sign in"),
            Some(GateReply::Edit("r-0003.title:Sign in".into()))
        );
        assert_eq!(GateReply::Approve.gate(), GateKind::B);
    }

    #[test]
    fn test_unrecognized_is_none() {
        assert_eq!(GateReply::parse(""), None);
        assert_eq!(GateReply::parse("looks good to me"), None);
        assert_eq!(GateReply::parse("approve it all"), None);
        assert_eq!(GateReply::parse("select_organization"), None);
        assert_eq!(GateReply::parse("edit"), None);
    }

    #[test]
    fn test_display_roundtrips() {
        for text in ["approve", "reject", "edit title:X", "select_organization org-1"] {
            assert_eq!(GateReply::parse(text).unwrap().to_string(), text);
        }
    }
}

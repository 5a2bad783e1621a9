//! The SIP message model: a request or a response plus the small, fixed
//! set of headers this gateway understands.

use std::fmt;

use crate::types::{Addr, CSeq, Contact, Method, Via};

/// The start line of a SIP message: either a request line or a status line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartLine {
    Request { method: Method, request_uri: String },
    Response { status: u16, reason: String },
}

/// A fully parsed SIP message restricted to the headers this gateway uses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub start: StartLine,
    pub via: Via,
    pub from: Addr,
    pub to: Addr,
    pub call_id: String,
    pub cseq: CSeq,
    pub contact: Option<Contact>,
    pub expires: Option<u32>,
    pub max_forwards: Option<u32>,
    pub content_type: Option<String>,
    pub subject: Option<String>,
    pub user_agent: Option<String>,
    pub body: String,
}

impl Message {
    pub fn is_request(&self) -> bool {
        matches!(self.start, StartLine::Request { .. })
    }

    pub fn method(&self) -> Option<Method> {
        match &self.start {
            StartLine::Request { method, .. } => Some(*method),
            StartLine::Response { .. } => None,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match &self.start {
            StartLine::Response { status, .. } => Some(*status),
            StartLine::Request { .. } => None,
        }
    }

    pub fn is_register(&self) -> bool {
        self.method() == Some(Method::Register)
    }

    pub fn is_invite(&self) -> bool {
        self.method() == Some(Method::Invite)
    }

    pub fn is_message(&self) -> bool {
        self.method() == Some(Method::Message)
    }

    pub fn is_ack(&self) -> bool {
        self.method() == Some(Method::Ack)
    }

    pub fn is_bye(&self) -> bool {
        self.method() == Some(Method::Bye)
    }

    /// 100 Trying in reply to an INVITE.
    pub fn is_trying(&self) -> bool {
        self.status() == Some(100) && self.cseq.method == Method::Invite
    }

    /// 200 OK in reply to an INVITE.
    pub fn is_invite_ok(&self) -> bool {
        self.status() == Some(200) && self.cseq.method == Method::Invite
    }

    /// 200 OK in reply to a BYE.
    pub fn is_bye_ok(&self) -> bool {
        self.status() == Some(200) && self.cseq.method == Method::Bye
    }

    /// The device-id: the user part of the From address.
    pub fn device_id(&self) -> &str {
        &self.from.user
    }

    /// The user part of the request-URI, e.g. the platform id a REGISTER
    /// is addressed to (`sip:<user>@<host>`). `None` for responses or a
    /// request-URI without a `user@` part.
    pub fn request_uri_user(&self) -> Option<&str> {
        match &self.start {
            StartLine::Request { request_uri, .. } => {
                let rest = request_uri.strip_prefix("sip:").unwrap_or(request_uri);
                let (user, _host) = rest.split_once('@')?;
                (!user.is_empty()).then_some(user)
            }
            StartLine::Response { .. } => None,
        }
    }
}

impl fmt::Display for StartLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StartLine::Request { method, request_uri } => write!(f, "{method} {request_uri} SIP/2.0"),
            StartLine::Response { status, reason } => write!(f, "SIP/2.0 {status} {reason}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(request_uri: &str) -> Message {
        Message {
            start: StartLine::Request { method: Method::Register, request_uri: request_uri.to_string() },
            via: Via::new(crate::types::Transport::Tcp, "3402000000", Some(5060), "z9hG4bK1"),
            from: Addr::new("34020000001320000001", "3402000000").with_tag("1"),
            to: Addr::new("34020000001320000001", "3402000000"),
            call_id: "1".to_string(),
            cseq: CSeq { number: 1, method: Method::Register },
            contact: None,
            expires: None,
            max_forwards: None,
            content_type: None,
            subject: None,
            user_agent: None,
            body: String::new(),
        }
    }

    #[test]
    fn request_uri_user_differs_from_from_header_user() {
        let msg = request("sip:34020000002000000001@3402000000");
        assert_eq!(msg.request_uri_user(), Some("34020000002000000001"));
        assert_eq!(msg.device_id(), "34020000001320000001");
    }

    #[test]
    fn request_uri_without_user_part_has_no_user() {
        let msg = request("sip:3402000000");
        assert_eq!(msg.request_uri_user(), None);
    }

    #[test]
    fn response_has_no_request_uri_user() {
        let mut msg = request("sip:34020000002000000001@3402000000");
        msg.start = StartLine::Response { status: 200, reason: "OK".to_string() };
        assert_eq!(msg.request_uri_user(), None);
    }
}

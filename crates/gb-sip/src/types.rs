//! Structured representations of the small subset of SIP headers this
//! gateway understands, narrowed to exactly the GB28181 device profile.
//! Modeled on `sip-core/src/types/via.rs`'s struct-plus-`FromStr`
//! typed-header shape.

use std::fmt;

use crate::error::{Error, Result};

/// Transport token carried in a Via header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Tcp,
    Udp,
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Transport::Tcp => "TCP",
            Transport::Udp => "UDP",
        })
    }
}

impl Transport {
    fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "TCP" => Some(Transport::Tcp),
            "UDP" => Some(Transport::Udp),
            _ => None,
        }
    }
}

/// The magic prefix RFC 3261 requires on every Via branch parameter.
pub const BRANCH_MAGIC: &str = "z9hG4bK";

/// A single Via header: `SIP/2.0/<transport> <host>[:<port>];branch=<id>`.
///
/// The gateway never generates or expects a Via header with more than one
/// hop, so this models exactly one hop rather than a hop list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Via {
    pub transport: Transport,
    pub host: String,
    pub port: Option<u16>,
    pub branch: String,
}

impl Via {
    pub fn new(transport: Transport, host: impl Into<String>, port: Option<u16>, branch: impl Into<String>) -> Self {
        Self { transport, host: host.into(), port, branch: branch.into() }
    }

    pub fn sent_by(&self) -> String {
        match self.port {
            Some(p) => format!("{}:{}", self.host, p),
            None => self.host.clone(),
        }
    }

    /// Parse the value following `Via:`, e.g. `SIP/2.0/TCP 1.2.3.4:5060;branch=z9hG4bK-abc`.
    pub fn parse(value: &str) -> Result<Self> {
        let mut parts = value.trim().splitn(2, ';');
        let head = parts.next().unwrap_or("").trim();
        let params_str = parts.next().unwrap_or("");

        let mut head_parts = head.split_whitespace();
        let proto = head_parts.next().ok_or_else(|| Error::BadVia(value.to_string()))?;
        let sent_by = head_parts.next().ok_or_else(|| Error::BadVia("Via lacks a sent-by token".to_string()))?;

        let mut proto_parts = proto.rsplitn(2, '/');
        let transport_tok = proto_parts.next().ok_or_else(|| Error::BadVia(value.to_string()))?;
        let transport = Transport::parse(transport_tok)
            .ok_or_else(|| Error::BadVia(format!("Via lacks transport TCP/UDP: {value}")))?;

        let (host, port) = match sent_by.rsplit_once(':') {
            Some((h, p)) => (h.to_string(), Some(p.parse::<u16>().map_err(|_| Error::BadVia(value.to_string()))?)),
            None => (sent_by.to_string(), None),
        };

        let mut branch = None;
        for param in params_str.split(';') {
            let param = param.trim();
            if param.is_empty() {
                continue;
            }
            if let Some(v) = param.strip_prefix("branch=") {
                branch = Some(v.to_string());
            }
        }
        let branch = branch.ok_or_else(|| Error::BadVia("Via branch parameter missing".to_string()))?;
        if !branch.starts_with(BRANCH_MAGIC) {
            return Err(Error::BadVia(format!("Via branch not prefixed with {BRANCH_MAGIC}: {branch}")));
        }

        Ok(Via { transport, host, port, branch })
    }
}

impl fmt::Display for Via {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SIP/2.0/{} {};branch={}", self.transport, self.sent_by(), self.branch)
    }
}

/// A SIP address-of-record: `["display"] <sip:user@host[:port]>[;tag=...]`.
///
/// Used for both From and To headers; the distinction (tag is mandatory on
/// From, optional on To) is enforced by the parser, not by this type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Addr {
    pub display_name: Option<String>,
    pub user: String,
    pub host: String,
    pub port: Option<u16>,
    pub tag: Option<String>,
}

impl Addr {
    pub fn new(user: impl Into<String>, host: impl Into<String>) -> Self {
        Self { display_name: None, user: user.into(), host: host.into(), port: None, tag: None }
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    pub fn uri(&self) -> String {
        match self.port {
            Some(p) => format!("sip:{}@{}:{}", self.user, self.host, p),
            None => format!("sip:{}@{}", self.user, self.host),
        }
    }

    /// Parse a full header value, e.g. `<sip:34020000001320000001@3402000000>;tag=307202390`.
    pub fn parse(value: &str) -> Result<Self> {
        let value = value.trim();
        let mut display_name = None;
        let (uri_part, rest) = if let Some(lt) = value.find('<') {
            let gt = value[lt..].find('>').map(|i| i + lt).ok_or_else(|| Error::BadAddress(value.to_string()))?;
            let dn = value[..lt].trim().trim_matches('"').trim();
            if !dn.is_empty() {
                display_name = Some(dn.to_string());
            }
            (&value[lt + 1..gt], &value[gt + 1..])
        } else {
            match value.find(';') {
                Some(i) => (&value[..i], &value[i..]),
                None => (value, ""),
            }
        };

        let uri_part = uri_part.trim().strip_prefix("sip:").unwrap_or(uri_part.trim());
        let (userhost, _params) = match uri_part.find(';') {
            Some(i) => (&uri_part[..i], &uri_part[i..]),
            None => (uri_part, ""),
        };
        let (user, hostport) = userhost.split_once('@').ok_or_else(|| Error::BadAddress(value.to_string()))?;
        let (host, port) = match hostport.rsplit_once(':') {
            Some((h, p)) => (h.to_string(), p.parse::<u16>().ok()),
            None => (hostport.to_string(), None),
        };

        let mut tag = None;
        for param in rest.split(';') {
            let param = param.trim();
            if let Some(v) = param.strip_prefix("tag=") {
                tag = Some(v.to_string());
            }
        }

        Ok(Addr { display_name, user: user.to_string(), host, port, tag })
    }
}

impl fmt::Display for Addr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(dn) = &self.display_name {
            write!(f, "\"{dn}\" ")?;
        }
        write!(f, "<{}>", self.uri())?;
        if let Some(tag) = &self.tag {
            write!(f, ";tag={tag}")?;
        }
        Ok(())
    }
}

/// The five request methods this gateway parses or emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Register,
    Message,
    Invite,
    Ack,
    Bye,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Register => "REGISTER",
            Method::Message => "MESSAGE",
            Method::Invite => "INVITE",
            Method::Ack => "ACK",
            Method::Bye => "BYE",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "REGISTER" => Some(Method::Register),
            "MESSAGE" => Some(Method::Message),
            "INVITE" => Some(Method::Invite),
            "ACK" => Some(Method::Ack),
            "BYE" => Some(Method::Bye),
            _ => None,
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `CSeq: <number> <method>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CSeq {
    pub number: u32,
    pub method: Method,
}

impl CSeq {
    pub fn parse(value: &str) -> Result<Self> {
        let value = value.trim();
        let (num, method) = value.split_once(' ').ok_or_else(|| Error::BadCSeq(value.to_string()))?;
        let number: u32 = num.trim().parse().map_err(|_| Error::BadCSeq(value.to_string()))?;
        let method = Method::parse(method.trim()).ok_or_else(|| Error::BadCSeq(value.to_string()))?;
        Ok(CSeq { number, method })
    }
}

impl fmt::Display for CSeq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.number, self.method)
    }
}

/// `Contact: <sip:user@host[:port]>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Contact {
    pub user: String,
    pub host: String,
    pub port: Option<u16>,
}

impl Contact {
    pub fn parse(value: &str) -> Result<Self> {
        let addr = Addr::parse(value)?;
        Ok(Contact { user: addr.user, host: addr.host, port: addr.port })
    }
}

impl fmt::Display for Contact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.port {
            Some(p) => write!(f, "<sip:{}@{}:{}>", self.user, self.host, p),
            None => write!(f, "<sip:{}@{}>", self.user, self.host),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn via_round_trips() {
        let v = Via::parse("SIP/2.0/TCP 192.168.1.1:5060;branch=z9hG4bK776asdhds").unwrap();
        assert_eq!(v.transport, Transport::Tcp);
        assert_eq!(v.host, "192.168.1.1");
        assert_eq!(v.port, Some(5060));
        assert_eq!(v.branch, "z9hG4bK776asdhds");
        assert_eq!(v.to_string(), "SIP/2.0/TCP 192.168.1.1:5060;branch=z9hG4bK776asdhds");
    }

    #[test]
    fn via_rejects_missing_branch_magic() {
        let err = Via::parse("SIP/2.0/TCP 1.2.3.4:5060;branch=abc").unwrap_err();
        assert!(matches!(err, Error::BadVia(_)));
    }

    #[test]
    fn via_rejects_unknown_transport() {
        let err = Via::parse("SIP/2.0/SCTP 1.2.3.4:5060;branch=z9hG4bKabc").unwrap_err();
        assert!(matches!(err, Error::BadVia(_)));
    }

    #[test]
    fn addr_parses_device_register_from() {
        let a = Addr::parse("<sip:34020000001320000001@3402000000>;tag=307202390").unwrap();
        assert_eq!(a.user, "34020000001320000001");
        assert_eq!(a.host, "3402000000");
        assert_eq!(a.tag.as_deref(), Some("307202390"));
    }

    #[test]
    fn cseq_round_trips() {
        let c = CSeq::parse("1 REGISTER").unwrap();
        assert_eq!(c.number, 1);
        assert_eq!(c.method, Method::Register);
        assert_eq!(c.to_string(), "1 REGISTER");
    }
}

/// A structured service message, carried in the message of remote errors
/// with code `-32022` as `|KIND|svc|MSG=value`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SvcMessage {
    pub kind: String,
    pub svc: Option<String>,
    pub message: Option<String>,
    pub value: Option<String>,
}

impl SvcMessage {
    /// Parse a service message. Returns `None` for plain messages.
    pub fn parse(msg: &str) -> Option<Self> {
        let rest = msg.strip_prefix('|')?;
        let mut parts = rest.split('|');
        let kind = parts.next().filter(|k| !k.is_empty())?;
        let svc = parts.next().map(str::to_owned);
        let (message, value) = match parts.next().filter(|m| !m.is_empty()) {
            Some(body) => match body.split_once('=') {
                Some((m, v)) => (Some(m.to_owned()), Some(v.to_owned())),
                None => (Some(body.to_owned()), None),
            },
            None => (None, None),
        };
        Some(Self {
            kind: kind.to_owned(),
            svc,
            message,
            value,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn otp_request() {
        let m = SvcMessage::parse("|OTP|totp|REQ").unwrap();
        assert_eq!(m.kind, "OTP");
        assert_eq!(m.svc.as_deref(), Some("totp"));
        assert_eq!(m.message.as_deref(), Some("REQ"));
        assert!(m.value.is_none());
    }

    #[test]
    fn otp_setup_carries_value() {
        let m = SvcMessage::parse("|OTP|totp|SETUP=JBSWY3DPEHPK3PXP").unwrap();
        assert_eq!(m.message.as_deref(), Some("SETUP"));
        assert_eq!(m.value.as_deref(), Some("JBSWY3DPEHPK3PXP"));
    }

    #[test]
    fn plain_messages_are_not_service_messages() {
        assert!(SvcMessage::parse("access denied").is_none());
        assert!(SvcMessage::parse("||x").is_none());
        let bare = SvcMessage::parse("|OTP").unwrap();
        assert!(bare.svc.is_none() && bare.message.is_none());
    }
}

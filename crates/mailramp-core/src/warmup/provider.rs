//! Mailbox provider classification by recipient domain

use mailramp_storage::models::MailboxProvider;

/// Classify an address by the first label of its domain
pub fn classify(email: &str) -> MailboxProvider {
    let domain = match email.rsplit_once('@') {
        Some((_, domain)) => domain.to_ascii_lowercase(),
        None => return MailboxProvider::Other,
    };

    let label = domain.split('.').next().unwrap_or_default();
    match label {
        "gmail" | "googlemail" => MailboxProvider::Gmail,
        "outlook" | "hotmail" | "live" | "msn" => MailboxProvider::Outlook,
        "yahoo" | "ymail" | "rocketmail" => MailboxProvider::Yahoo,
        _ => MailboxProvider::Other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify() {
        assert_eq!(classify("a@gmail.com"), MailboxProvider::Gmail);
        assert_eq!(classify("a@GoogleMail.com"), MailboxProvider::Gmail);
        assert_eq!(classify("a@hotmail.co.uk"), MailboxProvider::Outlook);
        assert_eq!(classify("a@live.com"), MailboxProvider::Outlook);
        assert_eq!(classify("a@msn.com"), MailboxProvider::Outlook);
        assert_eq!(classify("a@yahoo.co.jp"), MailboxProvider::Yahoo);
        assert_eq!(classify("a@rocketmail.com"), MailboxProvider::Yahoo);
        assert_eq!(classify("a@example.org"), MailboxProvider::Other);
        assert_eq!(classify("not-an-address"), MailboxProvider::Other);
    }
}

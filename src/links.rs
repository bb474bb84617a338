//! Outbound link generation for mailers.

use std::collections::HashMap;

use crate::error::OptOutResult;
use crate::token::TokenCodec;

pub const LIST_UNSUBSCRIBE: &str = "List-Unsubscribe";
pub const LIST_UNSUBSCRIBE_POST: &str = "List-Unsubscribe-Post";
pub const ONE_CLICK: &str = "List-Unsubscribe=One-Click";

/// Builds absolute opt-out URLs for embedding in outgoing mail.
#[derive(Debug, Clone)]
pub struct LinkBuilder {
    codec: TokenCodec,
    base_url: String,
    mount_path: String,
    headers_enabled: bool,
}

impl LinkBuilder {
    pub fn new(
        codec: TokenCodec,
        base_url: impl Into<String>,
        mount_path: impl Into<String>,
        headers_enabled: bool,
    ) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        let mount_path = mount_path.into().trim_end_matches('/').to_string();
        Self {
            codec,
            base_url,
            mount_path,
            headers_enabled,
        }
    }

    fn token_url(&self, email: &str, company_id: i64, list: &str) -> OptOutResult<String> {
        let token = self.codec.generate(email, company_id, list)?;
        Ok(format!("{}{}/opt_outs/{}", self.base_url, self.mount_path, token))
    }

    /// Status page URL.
    pub fn opt_out_url(&self, email: &str, company_id: i64, list: &str) -> OptOutResult<String> {
        self.token_url(email, company_id, list)
    }

    pub fn unsubscribe_url(&self, email: &str, company_id: i64, list: &str) -> OptOutResult<String> {
        Ok(format!("{}/unsubscribe", self.token_url(email, company_id, list)?))
    }

    pub fn subscribe_url(&self, email: &str, company_id: i64, list: &str) -> OptOutResult<String> {
        Ok(format!("{}/subscribe", self.token_url(email, company_id, list)?))
    }

    /// Unsubscribe URL that also sets the RFC 8058 headers on the message.
    ///
    /// Headers are only written when injection is enabled and the caller has not
    /// set `List-Unsubscribe` already.
    pub fn unsubscribe_url_with_headers(
        &self,
        headers: &mut HashMap<String, String>,
        email: &str,
        company_id: i64,
        list: &str,
    ) -> OptOutResult<String> {
        let url = self.unsubscribe_url(email, company_id, list)?;

        if self.headers_enabled && !has_header(headers, LIST_UNSUBSCRIBE) {
            if !has_header(headers, LIST_UNSUBSCRIBE_POST) {
                headers.insert(LIST_UNSUBSCRIBE_POST.to_string(), ONE_CLICK.to_string());
            }
            headers.insert(LIST_UNSUBSCRIBE.to_string(), format!("<{url}>"));
        }

        Ok(url)
    }
}

fn has_header(headers: &HashMap<String, String>, name: &str) -> bool {
    headers.keys().any(|key| key.eq_ignore_ascii_case(name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::SigningKey;

    fn builder(headers_enabled: bool) -> LinkBuilder {
        LinkBuilder::new(
            TokenCodec::new(SigningKey::random()),
            "https://mail.example.com/",
            "/mailkick",
            headers_enabled,
        )
    }

    #[test]
    fn builds_urls_under_the_mount_path() {
        let links = builder(false);

        let status = links.opt_out_url("test@example.org", 1, "marketing").unwrap();
        assert!(status.starts_with("https://mail.example.com/mailkick/opt_outs/v1."));

        let unsubscribe = links.unsubscribe_url("test@example.org", 1, "marketing").unwrap();
        assert_eq!(unsubscribe, format!("{status}/unsubscribe"));

        let subscribe = links.subscribe_url("test@example.org", 1, "marketing").unwrap();
        assert_eq!(subscribe, format!("{status}/subscribe"));
    }

    #[test]
    fn injects_one_click_headers_when_enabled() {
        let links = builder(true);
        let mut headers = HashMap::new();

        let url = links
            .unsubscribe_url_with_headers(&mut headers, "test@example.org", 1, "marketing")
            .unwrap();

        assert_eq!(headers.get(LIST_UNSUBSCRIBE), Some(&format!("<{url}>")));
        assert_eq!(
            headers.get(LIST_UNSUBSCRIBE_POST).map(String::as_str),
            Some(ONE_CLICK)
        );
    }

    #[test]
    fn leaves_caller_headers_alone() {
        let links = builder(true);
        let mut headers = HashMap::from([(
            "list-unsubscribe".to_string(),
            "<mailto:unsub@example.com>".to_string(),
        )]);

        links
            .unsubscribe_url_with_headers(&mut headers, "test@example.org", 1, "marketing")
            .unwrap();

        assert_eq!(headers.len(), 1);
        assert_eq!(headers["list-unsubscribe"], "<mailto:unsub@example.com>");
    }

    #[test]
    fn skips_headers_when_disabled() {
        let links = builder(false);
        let mut headers = HashMap::new();

        links
            .unsubscribe_url_with_headers(&mut headers, "test@example.org", 1, "marketing")
            .unwrap();

        assert!(headers.is_empty());
    }
}

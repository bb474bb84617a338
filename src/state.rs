use std::sync::Arc;

use crate::bounce::BounceRegistry;
use crate::config::MailkickConfig;
use crate::error::OptOutResult;
use crate::links::LinkBuilder;
use crate::service::SubscriptionService;
use crate::store::OptOutStore;
use crate::token::{TokenClaims, TokenCodec};

/// Everything request handlers need, built once at startup and managed by Rocket.
#[derive(Clone)]
pub struct MailkickState {
    pub codec: TokenCodec,
    pub service: SubscriptionService,
    pub links: LinkBuilder,
    pub bounces: BounceRegistry,
    pub admin_token: Option<String>,
}

impl MailkickState {
    pub fn new(
        config: &MailkickConfig,
        store: Arc<dyn OptOutStore>,
        bounces: BounceRegistry,
    ) -> Self {
        let codec = TokenCodec::new(config.signing_key.clone());
        let links = LinkBuilder::new(
            codec.clone(),
            config.base_url.clone(),
            config.mount_path.clone(),
            config.headers,
        );

        Self {
            codec,
            service: SubscriptionService::new(store),
            links,
            bounces,
            admin_token: config.admin_token.clone(),
        }
    }

    pub fn verify(&self, token: &str) -> OptOutResult<TokenClaims> {
        Ok(self.codec.verify(token)?)
    }
}

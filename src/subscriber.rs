//! Convenience wrapper giving host models opt-out methods.
//!
//! ```ignore
//! struct User { email: Option<String> }
//!
//! impl HasEmail for User {
//!     fn email(&self) -> Option<&str> { self.email.as_deref() }
//! }
//!
//! let user = User { email: Some("test@example.org".into()) };
//! Subscriber::new(&service, &user).opt_out_of(123, "marketing").await?;
//! ```

use crate::error::{OptOutError, OptOutResult};
use crate::models::OptOutRecord;
use crate::service::SubscriptionService;

/// Anything that carries an email address.
pub trait HasEmail {
    fn email(&self) -> Option<&str>;
}

impl HasEmail for String {
    fn email(&self) -> Option<&str> {
        Some(self.as_str())
    }
}

impl HasEmail for &str {
    fn email(&self) -> Option<&str> {
        Some(self)
    }
}

/// Binds a model's email address to the subscription service.
pub struct Subscriber<'a, M: HasEmail + ?Sized> {
    service: &'a SubscriptionService,
    model: &'a M,
}

impl<'a, M: HasEmail + ?Sized> Subscriber<'a, M> {
    pub fn new(service: &'a SubscriptionService, model: &'a M) -> Self {
        Self { service, model }
    }

    fn present_email(&self) -> Option<&'a str> {
        self.model.email().filter(|email| !email.trim().is_empty())
    }

    fn required_email(&self) -> OptOutResult<&'a str> {
        self.present_email()
            .ok_or_else(|| OptOutError::InvalidArgument("Email is blank".into()))
    }

    /// `false` when the model has no email.
    pub async fn opted_out_of(&self, company_id: i64, list: &str) -> OptOutResult<bool> {
        match self.present_email() {
            Some(email) => self.service.opted_out(email, company_id, list).await,
            None => Ok(false),
        }
    }

    pub async fn opt_out_of(&self, company_id: i64, list: &str) -> OptOutResult<OptOutRecord> {
        let email = self.required_email()?;
        self.service.opt_out(email, company_id, list).await
    }

    pub async fn opt_in_to(&self, company_id: i64, list: &str) -> OptOutResult<u64> {
        let email = self.required_email()?;
        self.service.opt_in(email, company_id, list).await
    }

    /// Empty when the model has no email.
    pub async fn opt_outs_for_company(
        &self,
        company_id: i64,
        list: Option<&str>,
    ) -> OptOutResult<Vec<OptOutRecord>> {
        match self.present_email() {
            Some(email) => {
                self.service
                    .opt_outs_for_subscriber(email, company_id, list)
                    .await
            }
            None => Ok(Vec::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryOptOutStore;
    use std::sync::Arc;

    struct User {
        email: Option<String>,
    }

    impl HasEmail for User {
        fn email(&self) -> Option<&str> {
            self.email.as_deref()
        }
    }

    fn service() -> SubscriptionService {
        SubscriptionService::new(Arc::new(MemoryOptOutStore::new()))
    }

    #[tokio::test]
    async fn convenience_methods_delegate_to_service() {
        let service = service();
        let user = User {
            email: Some("test@example.org".into()),
        };
        let subscriber = Subscriber::new(&service, &user);

        assert!(!subscriber.opted_out_of(1, "marketing").await.unwrap());

        subscriber.opt_out_of(1, "marketing").await.unwrap();
        assert!(subscriber.opted_out_of(1, "marketing").await.unwrap());
        assert!(service.opted_out("test@example.org", 1, "marketing").await.unwrap());

        subscriber.opt_out_of(1, "transactional").await.unwrap();
        subscriber.opt_out_of(2, "marketing").await.unwrap();
        assert_eq!(subscriber.opt_outs_for_company(1, None).await.unwrap().len(), 2);
        assert_eq!(
            subscriber
                .opt_outs_for_company(1, Some("transactional"))
                .await
                .unwrap()
                .len(),
            1
        );

        assert_eq!(subscriber.opt_in_to(1, "marketing").await.unwrap(), 1);
        assert!(!subscriber.opted_out_of(1, "marketing").await.unwrap());
    }

    #[tokio::test]
    async fn blank_email_models() {
        let service = service();
        let user = User { email: None };
        let subscriber = Subscriber::new(&service, &user);

        assert!(!subscriber.opted_out_of(1, "marketing").await.unwrap());
        assert!(subscriber.opt_outs_for_company(1, None).await.unwrap().is_empty());

        match subscriber.opt_out_of(1, "marketing").await {
            Err(OptOutError::InvalidArgument(message)) => assert_eq!(message, "Email is blank"),
            other => panic!("expected InvalidArgument, got {other:?}"),
        }
        assert!(matches!(
            subscriber.opt_in_to(1, "marketing").await,
            Err(OptOutError::InvalidArgument(_))
        ));
    }
}

//! Public endpoints behind the links embedded in outgoing mail.
//!
//! Every request carries a signed token in the path. A token that fails to
//! verify is answered with `400` before anything else happens, so the only way
//! to reach the store is with a link this deployment issued. Verified requests
//! either render the status page, record an opt-out or remove one.
//!
//! `POST .../unsubscribe` follows RFC 8058: when the form body carries
//! `List-Unsubscribe=One-Click` the mail client gets a plain `200` instead of a
//! redirect it would never follow.

use rocket::form::{Form, FromForm};
use rocket::http::Status;
use rocket::response::content::RawHtml;
use rocket::response::{self, Redirect, Responder};
use rocket::{Request, Route, State, get, post};

use crate::error::OptOutError;
use crate::state::MailkickState;
use crate::token::TokenClaims;

pub const INVALID_LINK: &str = "Invalid or expired link";
pub const UNSUBSCRIBE_SUCCESSFUL: &str = "Unsubscribe successful";
const ONE_CLICK_VALUE: &str = "One-Click";

/// Failure modes of the token endpoints, rendered as plain text.
#[derive(Debug)]
pub enum LinkError {
    InvalidLink,
    Internal(String),
}

impl From<OptOutError> for LinkError {
    fn from(err: OptOutError) -> Self {
        match err {
            OptOutError::InvalidSignature | OptOutError::InvalidArgument(_) => {
                LinkError::InvalidLink
            }
            other => LinkError::Internal(other.to_string()),
        }
    }
}

impl<'r> Responder<'r, 'static> for LinkError {
    fn respond_to(self, request: &'r Request<'_>) -> response::Result<'static> {
        match self {
            LinkError::InvalidLink => (Status::BadRequest, INVALID_LINK).respond_to(request),
            LinkError::Internal(message) => {
                log::error!("opt-out request failed: {}", message);
                (Status::InternalServerError, "Something went wrong").respond_to(request)
            }
        }
    }
}

/// Outcome of an unsubscribe: either the one-click acknowledgement or a
/// redirect to the status page.
#[derive(rocket::Responder)]
pub enum UnsubscribeResponse {
    OneClick(&'static str),
    Redirect(Redirect),
}

/// Form body a mail client posts for one-click unsubscribe.
#[derive(Debug, FromForm)]
pub struct OneClickForm {
    #[field(name = "List-Unsubscribe")]
    list_unsubscribe: Option<String>,
}

impl OneClickForm {
    fn is_one_click(&self) -> bool {
        self.list_unsubscribe.as_deref() == Some(ONE_CLICK_VALUE)
    }
}

/// Status page showing whether the address is currently opted out.
#[get("/opt_outs/<token>")]
pub async fn show(
    token: &str,
    route: &Route,
    state: &State<MailkickState>,
) -> Result<RawHtml<String>, LinkError> {
    let claims = state.verify(token)?;
    let opted_out = state
        .service
        .opted_out(&claims.email, claims.company_id, &claims.list)
        .await?;

    Ok(RawHtml(render_status_page(
        &claims,
        opted_out,
        &status_path(route, token),
    )))
}

#[get("/opt_outs/<token>/unsubscribe")]
pub async fn unsubscribe(
    token: &str,
    route: &Route,
    state: &State<MailkickState>,
) -> Result<UnsubscribeResponse, LinkError> {
    apply_unsubscribe(token, route, state, false).await
}

#[post("/opt_outs/<token>/unsubscribe", data = "<form>")]
pub async fn unsubscribe_post(
    token: &str,
    route: &Route,
    state: &State<MailkickState>,
    form: Option<Form<OneClickForm>>,
) -> Result<UnsubscribeResponse, LinkError> {
    let one_click = form.is_some_and(|form| form.is_one_click());
    apply_unsubscribe(token, route, state, one_click).await
}

#[get("/opt_outs/<token>/subscribe")]
pub async fn subscribe(
    token: &str,
    route: &Route,
    state: &State<MailkickState>,
) -> Result<Redirect, LinkError> {
    let claims = state.verify(token)?;
    state
        .service
        .opt_in(&claims.email, claims.company_id, &claims.list)
        .await?;

    Ok(Redirect::found(status_path(route, token)))
}

async fn apply_unsubscribe(
    token: &str,
    route: &Route,
    state: &MailkickState,
    one_click: bool,
) -> Result<UnsubscribeResponse, LinkError> {
    let claims = state.verify(token)?;
    state
        .service
        .opt_out(&claims.email, claims.company_id, &claims.list)
        .await?;

    if one_click {
        log::debug!("one-click unsubscribe for company {}", claims.company_id);
        Ok(UnsubscribeResponse::OneClick(UNSUBSCRIBE_SUCCESSFUL))
    } else {
        Ok(UnsubscribeResponse::Redirect(Redirect::found(status_path(
            route, token,
        ))))
    }
}

/// All token routes, mounted under the configured prefix.
pub fn routes() -> Vec<Route> {
    routes![show, unsubscribe, unsubscribe_post, subscribe]
}

/// Path of the status page for `token`, relative to wherever these routes are mounted.
fn status_path(route: &Route, token: &str) -> String {
    let base = route.uri.base().trim_end_matches('/').to_string();
    format!("{base}/opt_outs/{token}")
}

fn render_status_page(claims: &TokenClaims, opted_out: bool, status_path: &str) -> String {
    let email = escape_html(&claims.email);
    let list = escape_html(&claims.list);
    let (message, action, label) = if opted_out {
        (
            format!("{email} is unsubscribed from {list} emails."),
            "subscribe",
            "Resubscribe",
        )
    } else {
        (
            format!("{email} is subscribed to {list} emails."),
            "unsubscribe",
            "Unsubscribe",
        )
    };

    format!(
        "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n<title>Email subscriptions</title>\n</head>\n<body>\n<p>{message}</p>\n<p><a href=\"{status_path}/{action}\">{label}</a></p>\n</body>\n</html>\n"
    )
}

fn escape_html(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(ch),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claims(email: &str) -> TokenClaims {
        TokenClaims {
            email: email.to_string(),
            company_id: 1,
            list: "marketing".to_string(),
        }
    }

    #[test]
    fn status_page_offers_the_opposite_action() {
        let subscribed = render_status_page(&claims("a@example.com"), false, "/mailkick/opt_outs/t");
        assert!(subscribed.contains("a@example.com is subscribed to marketing emails."));
        assert!(subscribed.contains("href=\"/mailkick/opt_outs/t/unsubscribe\""));

        let unsubscribed = render_status_page(&claims("a@example.com"), true, "/mailkick/opt_outs/t");
        assert!(unsubscribed.contains("unsubscribed from marketing emails."));
        assert!(unsubscribed.contains("href=\"/mailkick/opt_outs/t/subscribe\""));
    }

    #[test]
    fn status_page_escapes_addresses() {
        let page = render_status_page(&claims("<b>x</b>@example.com"), false, "/opt_outs/t");
        assert!(page.contains("&lt;b&gt;x&lt;/b&gt;@example.com"));
        assert!(!page.contains("<b>x</b>"));
    }

    #[test]
    fn one_click_requires_the_exact_marker() {
        let form = |value: Option<&str>| OneClickForm {
            list_unsubscribe: value.map(str::to_string),
        };

        assert!(form(Some("One-Click")).is_one_click());
        assert!(!form(Some("one-click")).is_one_click());
        assert!(!form(None).is_one_click());
    }
}

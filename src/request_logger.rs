use rocket::fairing::{Fairing, Info, Kind};
use rocket::{Data, Request, Response};
use std::time::Instant;

/// Fairing to log one line per HTTP request with timing.
///
/// Opt-out tokens encode the recipient's address, so the segment following
/// `opt_outs/` is masked before the path reaches the log.
pub struct RequestLogger;

#[rocket::async_trait]
impl Fairing for RequestLogger {
    fn info(&self) -> Info {
        Info {
            name: "Request Logger",
            kind: Kind::Request | Kind::Response,
        }
    }

    async fn on_request(&self, request: &mut Request<'_>, _: &mut Data<'_>) {
        request.local_cache(Instant::now);
    }

    async fn on_response<'r>(&self, request: &'r Request<'_>, response: &mut Response<'r>) {
        let start_time = request.local_cache(Instant::now);
        let duration = start_time.elapsed();

        log::info!(
            "{} {} -> {} ({:.2}ms)",
            request.method(),
            redact_token(request.uri().path().as_str()),
            response.status().code,
            duration.as_secs_f64() * 1000.0
        );
    }
}

fn redact_token(path: &str) -> String {
    let mut redacted = Vec::new();
    let mut mask_next = false;

    for segment in path.split('/') {
        if mask_next && !segment.is_empty() {
            redacted.push("[token]");
        } else {
            redacted.push(segment);
        }
        mask_next = segment == "opt_outs";
    }

    redacted.join("/")
}

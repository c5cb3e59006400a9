//! HTTP boundary
//!
//! `GET /?url=<target>` renders (or serves from cache) the target page and
//! answers with the raw JPEG bytes. Parameter problems are answered with
//! guidance text and a 200 status, matching what existing clients expect.
//! `DELETE /?url=<target>` drops the cached render for that target.

use crate::router::{ActorNamespace, BROWSER_ACTOR};
use crate::{Error, RenderOutput, Result};
use actix_web::http::Method;
use actix_web::web::{self, Data};
use actix_web::{HttpRequest, HttpResponse};
use log::{debug, error};
use url::Url;

pub const MISSING_URL_TEXT: &str = "Please add an ?url=https://example.com/ parameter";
pub const MISSING_OPTIONS_TEXT: &str = "Please add options to your url";

/// Response header reporting whether the image came from the cache
pub const CACHE_STATUS_HEADER: &str = "x-cache";

/// Register the render handler as the app's default service.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.default_service(web::to(handle_request));
}

async fn handle_request(namespace: Data<ActorNamespace>, req: HttpRequest) -> HttpResponse {
    debug!("handle_request of: {} {}", req.method(), req.uri());

    if req.path().ends_with("favicon.ico") {
        return HttpResponse::Ok().finish();
    }

    let target = match target_url(req.query_string()) {
        Ok(t) => t,
        Err(e) => return error_response(&e),
    };

    let actor = namespace.get(BROWSER_ACTOR);
    let method = req.method();
    if method == Method::GET || method == Method::HEAD {
        match actor.fetch(target).await {
            Ok(output) => image_response(output),
            Err(e) => error_response(&e),
        }
    } else if method == Method::DELETE {
        match actor.invalidate(target).await {
            Ok(true) => HttpResponse::NoContent().finish(),
            Ok(false) => HttpResponse::NotFound()
                .content_type("text/plain")
                .body("No cached render for that url"),
            Err(e) => error_response(&e),
        }
    } else {
        HttpResponse::MethodNotAllowed()
            .insert_header(("allow", "GET, HEAD, DELETE"))
            .finish()
    }
}

/// Extract and parse the `url` query parameter.
pub fn target_url(query: &str) -> Result<Url> {
    let raw = url::form_urlencoded::parse(query.as_bytes())
        .find(|(k, _)| k == "url")
        .map(|(_, v)| v.into_owned())
        .filter(|v| !v.trim().is_empty())
        .ok_or(Error::MissingUrl)?;

    let target = Url::parse(raw.trim()).map_err(|_| Error::MissingUrl)?;
    match target.scheme() {
        "http" | "https" => Ok(target),
        _ => Err(Error::MissingUrl),
    }
}

fn image_response(output: RenderOutput) -> HttpResponse {
    HttpResponse::Ok()
        .content_type("image/jpeg")
        .insert_header((
            CACHE_STATUS_HEADER,
            if output.cache_hit { "HIT" } else { "MISS" },
        ))
        .body(output.bytes)
}

fn error_response(err: &Error) -> HttpResponse {
    match err {
        Error::MissingUrl => text(HttpResponse::Ok(), MISSING_URL_TEXT),
        Error::MissingOptions => text(HttpResponse::Ok(), MISSING_OPTIONS_TEXT),
        Error::BrowserUnavailable => text(
            HttpResponse::ServiceUnavailable(),
            "No browser is available to render this page; try again shortly",
        ),
        Error::Timeout(_) => {
            error!("render timed out: {}", err);
            text(HttpResponse::GatewayTimeout(), &err.to_string())
        }
        other => {
            error!("request failed: {}", other);
            text(HttpResponse::InternalServerError(), &other.to_string())
        }
    }
}

fn text(mut builder: actix_web::HttpResponseBuilder, body: &str) -> HttpResponse {
    builder.content_type("text/plain").body(body.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_param_parsing() {
        let q = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("url", "https://example.com/a?options={}")
            .finish();
        let t = target_url(&q).unwrap();
        assert_eq!(t.host_str(), Some("example.com"));
        assert_eq!(t.query(), Some("options={}"));
    }

    #[test]
    fn url_param_missing_or_invalid() {
        assert!(matches!(target_url(""), Err(Error::MissingUrl)));
        assert!(matches!(target_url("url="), Err(Error::MissingUrl)));
        assert!(matches!(target_url("url=not%20a%20url"), Err(Error::MissingUrl)));
        assert!(matches!(target_url("url=ftp%3A%2F%2Fexample.com%2F"), Err(Error::MissingUrl)));
    }
}

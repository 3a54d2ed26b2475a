use std::sync::Arc;

use poem::http::StatusCode;
use poem::{Endpoint, IntoResponse, Middleware, Request, Response};

use gatehouse_common::RequestInfo;
use gatehouse_core::{AdmissionService, Verdict};

/// Request admission link in the middleware chain: rejected requests
/// get a bare 403 and never reach the inner endpoint; admitted
/// requests are counted and passed through unchanged.
pub struct AdmissionMiddleware {
    service: Arc<AdmissionService>,
}

impl AdmissionMiddleware {
    pub fn new(service: Arc<AdmissionService>) -> Self {
        Self { service }
    }
}

impl<E: Endpoint> Middleware<E> for AdmissionMiddleware {
    type Output = AdmissionMiddlewareEndpoint<E>;

    fn transform(&self, inner: E) -> Self::Output {
        AdmissionMiddlewareEndpoint {
            inner,
            service: self.service.clone(),
        }
    }
}

pub struct AdmissionMiddlewareEndpoint<E: Endpoint> {
    inner: E,
    service: Arc<AdmissionService>,
}

impl<E: Endpoint> Endpoint for AdmissionMiddlewareEndpoint<E> {
    type Output = Response;

    async fn call(&self, req: Request) -> poem::Result<Self::Output> {
        let info = request_info(&req, self.service.trusts_forwarded_headers());

        if self.service.check(&info).await == Verdict::Forbidden {
            // Deliberately blunt: the response must not reveal which
            // rule matched.
            return Ok(Response::builder()
                .status(StatusCode::FORBIDDEN)
                .body("Forbidden"));
        }

        self.service.record_visit(&info).await;
        Ok(self.inner.call(req).await?.into_response())
    }
}

/// Extract client IP, considering reverse proxy headers if trusted
fn request_info(req: &Request, trust_x_forwarded_headers: bool) -> RequestInfo {
    let remote_ip = req
        .remote_addr()
        .as_socket_addr()
        .map(|addr| addr.ip().to_string());

    let ip = if trust_x_forwarded_headers {
        req.header("x-forwarded-for")
            .and_then(|value| value.split(',').next())
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .or(remote_ip)
    } else {
        remote_ip
    }
    .unwrap_or_default();

    let user_agent = req
        .header(poem::http::header::USER_AGENT)
        .unwrap_or_default()
        .to_string();

    RequestInfo {
        ip,
        user_agent,
        path: req.uri().path().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use poem::test::TestClient;
    use poem::{get, handler, EndpointExt, Route};
    use sea_orm::{ConnectOptions, Database};
    use tokio::sync::Mutex;

    use gatehouse_common::AdmissionConfig;
    use gatehouse_core::NewRule;
    use gatehouse_db_migrations::migrate_database;

    use super::*;

    #[handler]
    fn index() -> &'static str {
        "hello"
    }

    async fn open_service(config: AdmissionConfig) -> Arc<AdmissionService> {
        let mut options = ConnectOptions::new("sqlite::memory:".to_string());
        options.max_connections(1);
        let db = Database::connect(options).await.unwrap();
        migrate_database(&db).await.unwrap();
        Arc::new(AdmissionService::new(
            config,
            Arc::new(Mutex::new(db)),
        ))
    }

    fn app(
        service: Arc<AdmissionService>,
    ) -> impl Endpoint<Output = Response> {
        Route::new()
            .at("/", get(index))
            .with(AdmissionMiddleware::new(service))
    }

    #[tokio::test]
    async fn test_blocked_agent_gets_bare_forbidden() {
        let service = open_service(AdmissionConfig::default()).await;
        service
            .add_rule(NewRule::Agent {
                substring: "badbot".to_string(),
                reason: "crawler".to_string(),
            })
            .await
            .unwrap();

        let cli = TestClient::new(app(service));
        let resp = cli
            .get("/")
            .header("user-agent", "Mozilla/5.0 (compatible; BadBot/2.1)")
            .send()
            .await;

        resp.assert_status(StatusCode::FORBIDDEN);
        resp.assert_text("Forbidden").await;
    }

    #[tokio::test]
    async fn test_admitted_response_passes_through() {
        let service = open_service(AdmissionConfig::default()).await;

        let cli = TestClient::new(app(service));
        let resp = cli
            .get("/")
            .header("user-agent", "Mozilla/5.0")
            .send()
            .await;

        resp.assert_status_is_ok();
        resp.assert_text("hello").await;
    }

    #[tokio::test]
    async fn test_forwarded_for_used_when_trusted() {
        let service = open_service(AdmissionConfig::default()).await;
        service
            .add_rule(NewRule::Ip {
                address: "203.0.113.5".parse().unwrap(),
                reason: "abuse".to_string(),
            })
            .await
            .unwrap();

        let cli = TestClient::new(app(service));
        let resp = cli
            .get("/")
            .header("x-forwarded-for", "203.0.113.5, 10.0.0.1")
            .send()
            .await;

        resp.assert_status(StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_forwarded_for_ignored_when_untrusted() {
        let config = AdmissionConfig {
            trust_x_forwarded_headers: false,
            ..Default::default()
        };
        let service = open_service(config).await;
        service
            .add_rule(NewRule::Ip {
                address: "203.0.113.5".parse().unwrap(),
                reason: "abuse".to_string(),
            })
            .await
            .unwrap();

        let cli = TestClient::new(app(service));
        let resp = cli
            .get("/")
            .header("x-forwarded-for", "203.0.113.5")
            .send()
            .await;

        resp.assert_status_is_ok();
    }
}

use actix_web::{body::MessageBody, dev::{ServiceRequest, ServiceResponse}, middleware::Next, Error};
use tracing::debug;

/**
 * Middleware for timing requests.
 */
pub async fn timing_middleware(
    request: ServiceRequest,
    next: Next<impl MessageBody>,
) -> Result<ServiceResponse<impl MessageBody>, Error> {
    let start_time = std::time::Instant::now();
    let path = request.path().to_owned();
    let method = request.method().to_owned();
    let response = next.call(request).await;
    let response_code = match &response {
        Ok(service_response) => service_response.status().as_u16(),
        Err(err) => err.as_response_error().status_code().as_u16(),
    };
    debug!(target: "performance", "Request for {} {} with status {} processed in {}ms", method, path, response_code, start_time.elapsed().as_millis());
    response
}

#[cfg(test)]
mod test {
    use actix_web::{App, HttpResponse, middleware::from_fn, test, web};

    use super::*;

    #[actix_web::test]
    async fn test_timing_middleware_passes_response_through() {
        let app = test::init_service(App::new().wrap(from_fn(timing_middleware)).route("/ping", web::get().to(|| async { HttpResponse::Accepted().finish() }))).await;
        let response = test::call_service(&app, test::TestRequest::get().uri("/ping").to_request()).await;
        assert_eq!(response.status().as_u16(), 202);
    }
}

use crate::error::AdmissionError;
use crate::limiter::{Admission, Limiter};
use crate::telemetry::{NullSink, TelemetrySink};
use futures::future::BoxFuture;
use std::fmt;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower_layer::Layer;
use tower_service::Service;

type Extractor<Req> = Arc<dyn Fn(&Req) -> Option<String> + Send + Sync>;

/// A layer that admits requests through a [`Limiter`].
///
/// `extractor` maps a request to its client key. Requests it maps to `None`
/// bypass the limiter entirely. Each admitted request costs one unit and its
/// permit is released once the inner service responds.
pub struct RateLimitLayer<Req, S = NullSink> {
    limiter: Limiter<S>,
    extractor: Extractor<Req>,
}

impl<Req, S> RateLimitLayer<Req, S> {
    pub fn new<F>(limiter: Limiter<S>, extractor: F) -> Self
    where
        F: Fn(&Req) -> Option<String> + Send + Sync + 'static,
    {
        Self { limiter, extractor: Arc::new(extractor) }
    }
}

impl<Req, S: Clone> Clone for RateLimitLayer<Req, S> {
    fn clone(&self) -> Self {
        Self { limiter: self.limiter.clone(), extractor: self.extractor.clone() }
    }
}

impl<Req, S> fmt::Debug for RateLimitLayer<Req, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimitLayer")
            .field("limiter", &self.limiter)
            .field("extractor", &"<extractor>")
            .finish()
    }
}

impl<Svc, Req, S: Clone> Layer<Svc> for RateLimitLayer<Req, S> {
    type Service = RateLimitService<Svc, Req, S>;

    fn layer(&self, service: Svc) -> Self::Service {
        RateLimitService {
            inner: service,
            limiter: self.limiter.clone(),
            extractor: self.extractor.clone(),
        }
    }
}

/// Middleware service produced by [`RateLimitLayer`].
pub struct RateLimitService<Svc, Req, S = NullSink> {
    inner: Svc,
    limiter: Limiter<S>,
    extractor: Extractor<Req>,
}

impl<Svc: Clone, Req, S: Clone> Clone for RateLimitService<Svc, Req, S> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            limiter: self.limiter.clone(),
            extractor: self.extractor.clone(),
        }
    }
}

impl<Svc: fmt::Debug, Req, S> fmt::Debug for RateLimitService<Svc, Req, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimitService")
            .field("inner", &self.inner)
            .field("limiter", &self.limiter)
            .finish()
    }
}

impl<Svc, Req, S> Service<Req> for RateLimitService<Svc, Req, S>
where
    Svc: Service<Req> + Clone + Send + 'static,
    Svc::Future: Send + 'static,
    Svc::Response: Send + 'static,
    Svc::Error: Send + 'static,
    Req: Send + 'static,
    S: TelemetrySink,
    S::Future: Send + 'static,
{
    type Response = Svc::Response;
    type Error = AdmissionError<Svc::Error>;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx).map_err(AdmissionError::Inner)
    }

    fn call(&mut self, req: Req) -> Self::Future {
        let client = (self.extractor)(&req);
        let limiter = self.limiter.clone();
        let mut inner = self.inner.clone();

        Box::pin(async move {
            let Some(client) = client else {
                return inner.call(req).await.map_err(AdmissionError::Inner);
            };

            match limiter.check(&client, 1, &()).await {
                Ok(Admission::Admitted(permit)) => {
                    let result = inner.call(req).await;
                    permit.release(&()).await;
                    result.map_err(AdmissionError::Inner)
                }
                Ok(Admission::Rejected { rule, retry_after }) => {
                    Err(AdmissionError::Rejected { rule, retry_after })
                }
                Err(error) => Err(AdmissionError::Limiter(error)),
            }
        })
    }
}

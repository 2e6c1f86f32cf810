//! End-to-end behaviour of the rate limited demo router.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

use windowgate::http::{router, HitCounter};
use windowgate::ratelimit::{Clock, HeaderIdentity, Limiter, ManualClock, Quota};
use windowgate::store::{CounterBackend, MemoryStore};

const START: i64 = 1_700_000_000;

struct Expected {
    description: &'static str,
    user: &'static str,
    code: StatusCode,
    body: &'static str,
    remaining: &'static str,
}

fn app(limit: u64, within: u64, clock: &ManualClock) -> (Router, HitCounter) {
    let clock: Arc<dyn Clock> = Arc::new(clock.clone());
    let limiter = Limiter::builder(
        Quota::per_seconds(limit, within).unwrap(),
        CounterBackend::atomic(MemoryStore::with_clock(clock.clone())),
    )
    .identity(HeaderIdentity::new("X-User-Id"))
    .clock(clock)
    .build();

    let hits = HitCounter::default();
    (router(Arc::new(limiter), hits.clone()), hits)
}

fn request(user: Option<&str>) -> Request<Body> {
    let mut builder = Request::get("/");
    if let Some(user) = user {
        builder = builder.header("X-User-Id", user);
    }
    builder.body(Body::empty()).unwrap()
}

async fn body_string(body: Body) -> String {
    let bytes = axum::body::to_bytes(body, usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

#[tokio::test]
async fn test_limiter_scenario() {
    let clock = ManualClock::at_timestamp(START);
    let (app, hits) = app(3, 1, &clock);

    let cases = [
        Expected {
            description: "1st request",
            user: "1",
            code: StatusCode::OK,
            body: "0",
            remaining: "2",
        },
        Expected {
            description: "2nd request",
            user: "1",
            code: StatusCode::OK,
            body: "1",
            remaining: "1",
        },
        Expected {
            description: "3rd request",
            user: "1",
            code: StatusCode::OK,
            body: "2",
            remaining: "0",
        },
        Expected {
            description: "4th request gets 429",
            user: "1",
            code: StatusCode::TOO_MANY_REQUESTS,
            body: "Too Many Requests",
            remaining: "0",
        },
        Expected {
            description: "1st request from user 2",
            user: "2",
            code: StatusCode::OK,
            body: "3",
            remaining: "2",
        },
    ];

    for case in cases {
        let response = app.clone().oneshot(request(Some(case.user))).await.unwrap();
        let (parts, body) = response.into_parts();

        assert_eq!(parts.status, case.code, "{}", case.description);
        assert_eq!(parts.headers["X-Rate-Limit-Limit"], "3", "{}", case.description);
        assert_eq!(
            parts.headers["X-Rate-Limit-Remaining"], case.remaining,
            "{}",
            case.description
        );
        assert_eq!(
            parts.headers["X-Rate-Limit-Reset"],
            (START + 1).to_string().as_str(),
            "{}",
            case.description
        );
        assert_eq!(body_string(body).await, case.body, "{}", case.description);
    }

    assert_eq!(hits.get(), 4);
}

#[tokio::test]
async fn test_next_window_starts_over() {
    let clock = ManualClock::at_timestamp(START);
    let (app, _hits) = app(1, 10, &clock);

    let first = app.clone().oneshot(request(Some("u"))).await.unwrap();
    assert_eq!(first.status(), StatusCode::OK);
    let second = app.clone().oneshot(request(Some("u"))).await.unwrap();
    assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);

    clock.advance(Duration::from_secs(10));

    let third = app.oneshot(request(Some("u"))).await.unwrap();
    assert_eq!(third.status(), StatusCode::OK);
    assert_eq!(third.headers()["X-Rate-Limit-Remaining"], "0");
    assert_eq!(
        third.headers()["X-Rate-Limit-Reset"],
        ((START / 10 + 2) * 10).to_string().as_str()
    );
}

#[tokio::test]
async fn test_anonymous_requests_are_not_limited() {
    let clock = ManualClock::at_timestamp(START);
    let (app, hits) = app(0, 60, &clock);

    for _ in 0..5 {
        let response = app.clone().oneshot(request(None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().get("X-Rate-Limit-Limit").is_none());
        assert!(response.headers().get("X-Rate-Limit-Reset").is_none());
        assert!(response.headers().get("X-Rate-Limit-Remaining").is_none());
    }

    assert_eq!(hits.get(), 5);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_requests_admit_exactly_the_limit() {
    let clock = ManualClock::at_timestamp(START);
    let (app, hits) = app(10, 60, &clock);

    let tasks: Vec<_> = (0..40)
        .map(|_| {
            let app = app.clone();
            tokio::spawn(async move { app.oneshot(request(Some("burst"))).await.unwrap().status() })
        })
        .collect();

    let mut admitted = 0;
    for task in tasks {
        if task.await.unwrap() == StatusCode::OK {
            admitted += 1;
        }
    }

    assert_eq!(admitted, 10);
    assert_eq!(hits.get(), 10);
}

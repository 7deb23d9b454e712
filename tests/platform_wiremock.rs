mod support;

use anyhow::Result;
use efbridge::credentials::SessionTokens;
use efbridge::platform::LevelSelection;
use efbridge::Error;
use serde_json::json;
use support::platform_client;
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const STUDY_PLAN: &str = "/wl/api/study-plan/study-plan";

fn tokens() -> SessionTokens {
    SessionTokens::new("acc-1", "acct-1").unwrap()
}

#[tokio::test]
async fn change_level_puts_selection_and_returns_provider_json() -> Result<()> {
    let server = MockServer::start().await;
    let reply = json!({ "studyPlan": { "levelId": "lvl-3" }, "ok": true });

    Mock::given(method("PUT"))
        .and(path(STUDY_PLAN))
        .and(header("authorization", "Bearer acc-1"))
        .and(header("x-ef-access", "acct-1"))
        .and(body_json(json!({ "courseId": "course-1", "levelId": "lvl-3" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(reply.clone()))
        .expect(1)
        .mount(&server)
        .await;

    let result = platform_client(&server.uri())
        .change_level(&tokens(), &LevelSelection::new("course-1", "lvl-3"))
        .await?;
    assert_eq!(result, reply);

    Ok(())
}

#[tokio::test]
async fn change_level_rejection_propagates_status_and_error_field() {
    let server = MockServer::start().await;

    Mock::given(method("PUT"))
        .and(path(STUDY_PLAN))
        .respond_with(
            ResponseTemplate::new(422).set_body_json(json!({ "error": "Invalid levelId" })),
        )
        .mount(&server)
        .await;

    let err = platform_client(&server.uri())
        .change_level(&tokens(), &LevelSelection::new("course-1", "nope"))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Downstream { status: Some(422), .. }));
    assert_eq!(err.status_code(), 422);
    assert_eq!(err.to_string(), "Invalid levelId");
}

#[tokio::test]
async fn rejection_without_error_field_uses_generic_message() {
    let server = MockServer::start().await;

    Mock::given(method("PUT"))
        .and(path(STUDY_PLAN))
        .respond_with(ResponseTemplate::new(502).set_body_string("<html>bad gateway</html>"))
        .mount(&server)
        .await;

    let err = platform_client(&server.uri())
        .change_level(&tokens(), &LevelSelection::new("c", "l"))
        .await
        .unwrap_err();

    assert_eq!(err.status_code(), 502);
    assert_eq!(err.to_string(), "Request failed with status code 502");
}

#[tokio::test]
async fn fetch_tasks_sends_query_and_returns_children() -> Result<()> {
    let server = MockServer::start().await;
    let children = json!([{ "id": "task-1" }, { "id": "task-2" }]);

    Mock::given(method("GET"))
        .and(path(STUDY_PLAN))
        .and(query_param("locale", "en"))
        .and(query_param("clientTimezone", "America/Sao_Paulo"))
        .and(query_param("courseId", "course-1"))
        .and(query_param("levelId", "42"))
        .and(header("x-ef-correlation-id", "R3Dq5eAUEUoCWiANsW5XL"))
        .and(header("authorization", "Bearer acc-1"))
        .and(header("x-ef-access", "acct-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "plan",
            "children": children.clone()
        })))
        .expect(1)
        .mount(&server)
        .await;

    let tasks = platform_client(&server.uri())
        .fetch_tasks(&tokens(), &LevelSelection::new("course-1", 42))
        .await?;
    assert_eq!(tasks, Some(children));

    Ok(())
}

#[tokio::test]
async fn fetch_tasks_without_children_is_none() -> Result<()> {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(STUDY_PLAN))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "plan" })))
        .mount(&server)
        .await;

    let tasks = platform_client(&server.uri())
        .fetch_tasks(&tokens(), &LevelSelection::new("c", "l"))
        .await?;
    assert_eq!(tasks, None);

    Ok(())
}

#[tokio::test]
async fn unreachable_platform_maps_to_500() {
    // Bind and drop a listener to get a port nothing listens on.
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let err = platform_client(&format!("http://{addr}"))
        .fetch_tasks(&tokens(), &LevelSelection::new("c", "l"))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Downstream { status: None, .. }));
    assert_eq!(err.status_code(), 500);
}

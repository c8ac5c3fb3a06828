//! HTTP API tests against an in-memory controller and a scripted provider.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use actix_http::Request;
use actix_web::{
    dev::{Service, ServiceResponse},
    test, web, App, Error,
};
use async_trait::async_trait;
use futures::stream;
use serde_json::{json, Value};

use branchchat_core::Turn;
use branchchat_engine::{ControllerConfig, ConversationController};
use branchchat_llm::provider::Result as LLMResult;
use branchchat_llm::{LLMChunk, LLMError, LLMProvider, LLMStream};
use branchchat_server::{app_config, AppState};

/// Plays back one scripted reply per call; `Err` replies fail mid-stream.
struct ScriptedProvider {
    replies: Mutex<VecDeque<Result<&'static str, &'static str>>>,
}

#[async_trait]
impl LLMProvider for ScriptedProvider {
    async fn chat_stream(
        &self,
        _turns: &[Turn],
        _max_output_tokens: Option<u32>,
        _model: Option<&str>,
    ) -> LLMResult<LLMStream> {
        let reply = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok("ok"));
        let items: Vec<LLMResult<LLMChunk>> = match reply {
            Ok(text) => text
                .split_inclusive(' ')
                .map(|token| Ok(LLMChunk::Token(token.to_string())))
                .chain(std::iter::once(Ok(LLMChunk::Done)))
                .collect(),
            Err(message) => vec![
                Ok(LLMChunk::Token("partial".to_string())),
                Err(LLMError::Stream(message.to_string())),
            ],
        };
        Ok(Box::pin(stream::iter(items)))
    }
}

fn controller(replies: Vec<Result<&'static str, &'static str>>) -> Arc<ConversationController> {
    let provider = Arc::new(ScriptedProvider {
        replies: Mutex::new(replies.into()),
    });
    Arc::new(ConversationController::new(provider, ControllerConfig::default()))
}

async fn setup_app(
    controller: Arc<ConversationController>,
) -> impl Service<Request, Response = ServiceResponse, Error = Error> {
    let state = web::Data::new(AppState::new(controller));
    test::init_service(App::new().app_data(state).configure(app_config)).await
}

/// Parse an SSE body into its JSON events.
fn sse_events(body: &[u8]) -> Vec<Value> {
    std::str::from_utf8(body)
        .unwrap()
        .split("\n\n")
        .filter_map(|frame| frame.strip_prefix("data: "))
        .map(|data| serde_json::from_str(data).unwrap())
        .collect()
}

async fn post_sse(
    app: &impl Service<Request, Response = ServiceResponse, Error = Error>,
    uri: &str,
    body: Value,
) -> Vec<Value> {
    let req = test::TestRequest::post().uri(uri).set_json(&body).to_request();
    let resp = test::call_service(app, req).await;
    assert_eq!(resp.status(), 200);
    let content_type = resp.headers().get("content-type").unwrap();
    assert!(content_type.to_str().unwrap().contains("text/event-stream"));
    sse_events(&test::read_body(resp).await)
}

fn terminal(events: &[Value]) -> &Value {
    events.last().unwrap()
}

#[actix_web::test]
async fn health_reports_ok() {
    let app = setup_app(controller(vec![])).await;
    let req = test::TestRequest::get().uri("/api/v1/health").to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["status"], "ok");
}

#[actix_web::test]
async fn chat_without_conversation_starts_and_streams_reply() {
    let app = setup_app(controller(vec![Ok("hello there")])).await;

    let events = post_sse(&app, "/api/v1/chat", json!({ "message": "hi" })).await;
    assert_eq!(events[0]["type"], "started");
    let tokens: String = events
        .iter()
        .filter(|event| event["type"] == "token")
        .map(|event| event["content"].as_str().unwrap())
        .collect();
    assert_eq!(tokens, "hello there");
    let complete = terminal(&events);
    assert_eq!(complete["type"], "complete");
    assert_eq!(complete["active_path"].as_array().unwrap().len(), 2);

    let conversation_id = events[0]["conversation_id"].as_str().unwrap();
    let req = test::TestRequest::get()
        .uri(&format!("/api/v1/conversations/{conversation_id}"))
        .to_request();
    let view: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(view["title"], "hi");
    assert_eq!(view["generating"], false);
    let transcript = view["transcript"].as_array().unwrap();
    assert_eq!(transcript.len(), 2);
    assert_eq!(transcript[1]["content"], "hello there");

    let req = test::TestRequest::get().uri("/api/v1/conversations").to_request();
    let list: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(list.as_array().unwrap().len(), 1);
}

#[actix_web::test]
async fn chat_rejects_unknown_conversation_and_empty_message() {
    let app = setup_app(controller(vec![])).await;

    let req = test::TestRequest::post()
        .uri("/api/v1/chat")
        .set_json(json!({ "message": "hi", "conversation_id": "missing" }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 404);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["kind"], "not_found");

    let req = test::TestRequest::post()
        .uri("/api/v1/chat")
        .set_json(json!({ "message": "   " }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 400);

    let req = test::TestRequest::post()
        .uri("/api/v1/chat")
        .set_json(json!({ "message": "hi", "parent_id": "some-node" }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 400);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["kind"], "bad_request");

    let req = test::TestRequest::get().uri("/api/v1/conversations").to_request();
    let list: Value = test::call_and_read_body_json(&app, req).await;
    assert!(list.as_array().unwrap().is_empty());
}

#[actix_web::test]
async fn reroll_creates_sibling_and_branches_can_be_switched() {
    let app = setup_app(controller(vec![Ok("first"), Ok("second")])).await;

    let events = post_sse(&app, "/api/v1/chat", json!({ "message": "hi" })).await;
    let conversation_id = events[0]["conversation_id"].as_str().unwrap().to_string();
    let user_id = events[0]["user_node_id"].as_str().unwrap().to_string();
    let first_reply = terminal(&events)["assistant_node_id"]
        .as_str()
        .unwrap()
        .to_string();

    let events = post_sse(
        &app,
        &format!("/api/v1/conversations/{conversation_id}/reroll"),
        json!({ "node_id": first_reply }),
    )
    .await;
    let complete = terminal(&events);
    assert_eq!(complete["type"], "complete");
    let second_reply = complete["assistant_node_id"].as_str().unwrap().to_string();

    let req = test::TestRequest::get()
        .uri(&format!(
            "/api/v1/conversations/{conversation_id}/branches?node_id={user_id}"
        ))
        .to_request();
    let branches: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(branches["branches"], json!([first_reply, second_reply]));
    assert_eq!(branches["position"], json!({ "index": 1, "count": 2 }));

    let req = test::TestRequest::post()
        .uri(&format!("/api/v1/conversations/{conversation_id}/branches/select"))
        .set_json(json!({ "node_id": user_id, "branch_index": 0 }))
        .to_request();
    let selected: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(selected["active_path"], json!([user_id, first_reply]));

    let req = test::TestRequest::post()
        .uri(&format!("/api/v1/conversations/{conversation_id}/branches/cycle"))
        .set_json(json!({ "node_id": user_id, "direction": "next" }))
        .to_request();
    let cycled: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(cycled["active_path"], json!([user_id, second_reply]));

    let req = test::TestRequest::post()
        .uri(&format!("/api/v1/conversations/{conversation_id}/branches/select"))
        .set_json(json!({ "node_id": user_id, "branch_index": 5 }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 400);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["kind"], "out_of_range");
}

#[actix_web::test]
async fn edit_of_root_creates_root_sibling() {
    let app = setup_app(controller(vec![Ok("one"), Ok("two")])).await;

    let events = post_sse(&app, "/api/v1/chat", json!({ "message": "A" })).await;
    let conversation_id = events[0]["conversation_id"].as_str().unwrap().to_string();
    let root = events[0]["user_node_id"].as_str().unwrap().to_string();
    let reply = terminal(&events)["assistant_node_id"]
        .as_str()
        .unwrap()
        .to_string();

    let req = test::TestRequest::post()
        .uri(&format!("/api/v1/conversations/{conversation_id}/edit"))
        .set_json(json!({ "node_id": reply, "content": "nope" }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 400);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["kind"], "wrong_role");

    let events = post_sse(
        &app,
        &format!("/api/v1/conversations/{conversation_id}/edit"),
        json!({ "node_id": root, "content": "A2" }),
    )
    .await;
    let edited_root = events[0]["user_node_id"].as_str().unwrap().to_string();
    assert_eq!(terminal(&events)["type"], "complete");

    let req = test::TestRequest::get()
        .uri(&format!("/api/v1/conversations/{conversation_id}/branches"))
        .to_request();
    let branches: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(branches["branches"], json!([root, edited_root]));
}

#[actix_web::test]
async fn upstream_failure_streams_error_and_commits_nothing() {
    let ctrl = controller(vec![Ok("hello"), Err("connection reset")]);
    let app = setup_app(ctrl.clone()).await;

    let events = post_sse(&app, "/api/v1/chat", json!({ "message": "hi" })).await;
    let conversation_id = events[0]["conversation_id"].as_str().unwrap().to_string();
    let path_before = terminal(&events)["active_path"].clone();

    let events = post_sse(
        &app,
        "/api/v1/chat",
        json!({ "message": "again", "conversation_id": conversation_id }),
    )
    .await;
    let error = terminal(&events);
    assert_eq!(error["type"], "error");
    assert_eq!(
        error["failure_marker"],
        ControllerConfig::default().failure_marker
    );

    let req = test::TestRequest::get()
        .uri(&format!("/api/v1/conversations/{conversation_id}/messages"))
        .to_request();
    let messages: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(messages.as_array().unwrap().len(), 2);

    let view = ctrl.get_conversation(&conversation_id).await.unwrap();
    assert_eq!(json!(view.conversation.active_path), path_before);
    assert!(!view.generating);
}

#[actix_web::test]
async fn in_flight_turn_conflicts_and_can_be_stopped() {
    let ctrl = controller(vec![]);
    let app = setup_app(ctrl.clone()).await;
    let conversation = ctrl.start("hi").await.unwrap();
    let turn = ctrl.prepare_respond(&conversation.id).await.unwrap();

    let req = test::TestRequest::post()
        .uri("/api/v1/chat")
        .set_json(json!({ "message": "more", "conversation_id": conversation.id }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 409);

    let req = test::TestRequest::post()
        .uri(&format!("/api/v1/conversations/{}/stop", conversation.id))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    assert!(turn.cancel_token().is_cancelled());

    drop(turn);
    let req = test::TestRequest::post()
        .uri(&format!("/api/v1/conversations/{}/stop", conversation.id))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 404);
}

#[actix_web::test]
async fn append_message_and_active_path_validation() {
    let ctrl = controller(vec![]);
    let app = setup_app(ctrl.clone()).await;
    let conversation = ctrl.start("hi").await.unwrap();
    let root = conversation.active_path[0].clone();

    let req = test::TestRequest::post()
        .uri(&format!("/api/v1/conversations/{}/messages", conversation.id))
        .set_json(json!({ "role": "assistant", "content": "hello", "parent_id": root }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 201);
    let node: Value = test::read_body_json(resp).await;
    let reply = node["id"].as_str().unwrap().to_string();

    let view = ctrl.get_conversation(&conversation.id).await.unwrap();
    assert_eq!(view.conversation.active_path, vec![root.clone(), reply.clone()]);

    let req = test::TestRequest::put()
        .uri(&format!("/api/v1/conversations/{}/active-path", conversation.id))
        .set_json(json!({ "active_path": [reply] }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 400);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["kind"], "invalid_path");

    let req = test::TestRequest::put()
        .uri(&format!("/api/v1/conversations/{}/active-path", conversation.id))
        .set_json(json!({ "active_path": [root] }))
        .to_request();
    let updated: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(updated["active_path"], json!([root]));
}

#[actix_web::test]
async fn delete_removes_conversation() {
    let ctrl = controller(vec![]);
    let app = setup_app(ctrl.clone()).await;
    let conversation = ctrl.start("hi").await.unwrap();
    let uri = format!("/api/v1/conversations/{}", conversation.id);

    let resp = test::call_service(&app, test::TestRequest::delete().uri(&uri).to_request()).await;
    assert_eq!(resp.status(), 200);

    let resp = test::call_service(&app, test::TestRequest::get().uri(&uri).to_request()).await;
    assert_eq!(resp.status(), 404);

    let resp = test::call_service(&app, test::TestRequest::delete().uri(&uri).to_request()).await;
    assert_eq!(resp.status(), 404);
}

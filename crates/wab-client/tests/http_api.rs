use axum::extract::Path;
use axum::http::StatusCode;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use wab_client::{ApiClient, ApiError, ClientConfig, ControlApi};
use wab_core::InstanceStatus;

async fn serve(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("serve");
    });
    format!("http://{addr}")
}

fn client(base_url: String) -> ApiClient {
    ApiClient::new(ClientConfig::new(base_url)).expect("client")
}

#[tokio::test]
async fn lists_instances_and_tolerates_unknown_statuses() {
    let app = Router::new().route(
        "/api/instances",
        get(|| async {
            Json(json!({
                "instances": [
                    {
                        "id": "a1",
                        "name": "Bot1",
                        "phone_number": "254750433158",
                        "status": "connected",
                        "connected_user": {"id": "254750433158@s.whatsapp.net", "name": "Ada"},
                        "created_at": "2025-08-25T06:00:00"
                    },
                    {
                        "id": "b2",
                        "name": "Bot2",
                        "phone_number": "254750433159",
                        "status": "hibernating",
                        "pairing_code": null,
                        "connected_user": null
                    }
                ],
                "total": 2
            }))
        }),
    );
    let api = client(serve(app).await);

    let instances = api.list_instances().await.expect("list");
    assert_eq!(instances.len(), 2);
    assert_eq!(instances[0].status, InstanceStatus::Connected);
    assert_eq!(
        instances[0]
            .connected_user
            .as_ref()
            .and_then(|u| u.label()),
        Some("Ada")
    );
    assert_eq!(
        instances[1].status,
        InstanceStatus::Unknown("hibernating".into())
    );
}

#[tokio::test]
async fn create_sends_digits_and_parses_response() {
    let app = Router::new().route(
        "/api/instances",
        post(|Json(body): Json<Value>| async move {
            assert_eq!(body["name"], "Bot1");
            assert_eq!(body["phone_number"], "254750433158");
            Json(json!({
                "id": "c3",
                "name": "Bot1",
                "phone_number": "254750433158",
                "status": "starting",
                "created_at": "2025-08-25T06:00:00"
            }))
        }),
    );
    let api = client(serve(app).await);

    let instance = api
        .create_instance("Bot1", "254750433158")
        .await
        .expect("create");
    assert_eq!(instance.id, "c3");
    assert_eq!(instance.status, InstanceStatus::Starting);
}

#[tokio::test]
async fn backend_rejection_carries_detail() {
    let app = Router::new().route(
        "/api/instances",
        post(|| async {
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"detail": "Failed to start instance: no ports left"})),
            )
        }),
    );
    let api = client(serve(app).await);

    let err = api
        .create_instance("Bot1", "254750433158")
        .await
        .expect_err("should fail");
    match err {
        ApiError::Backend { status, detail } => {
            assert_eq!(status, 500);
            assert_eq!(detail, "Failed to start instance: no ports left");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn missing_instance_maps_to_not_found() {
    let app = Router::new().route(
        "/api/instances/:id/start",
        post(|Path(_id): Path<String>| async {
            (
                StatusCode::NOT_FOUND,
                Json(json!({"detail": "Instance not found"})),
            )
        }),
    );
    let api = client(serve(app).await);

    let err = api.start_instance("nope").await.expect_err("should 404");
    assert!(matches!(err, ApiError::NotFound(_)), "{err:?}");
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn ack_endpoints_succeed_on_message_bodies() {
    let app = Router::new()
        .route(
            "/api/instances/:id/start",
            post(|Path(id): Path<String>| async move {
                Json(json!({"message": "Instance started", "instance_id": id, "port": 4001}))
            }),
        )
        .route(
            "/api/instances/:id/stop",
            post(|Path(id): Path<String>| async move {
                Json(json!({"message": "Instance stopped", "instance_id": id}))
            }),
        )
        .route(
            "/api/instances/:id",
            delete(|Path(id): Path<String>| async move {
                Json(json!({"message": "Instance deleted", "instance_id": id}))
            }),
        );
    let api = client(serve(app).await);

    api.start_instance("a1").await.expect("start");
    api.stop_instance("a1").await.expect("stop");
    api.delete_instance("a1").await.expect("delete");
}

#[tokio::test]
async fn pairing_payload_round_trips() {
    let app = Router::new()
        .route(
            "/api/instances/:id/pairing-code",
            get(|Path(id): Path<String>| async move {
                Json(json!({
                    "instance_id": id,
                    "pairing_code": "ABCD-1234",
                    "pairing_code_valid": true,
                    "pairing_code_remaining_seconds": 125,
                    "pairing_code_expires_at": 1_756_100_000_000_i64,
                    "status": "waiting_for_pairing"
                }))
            }),
        )
        .route(
            "/api/instances/:id/regenerate-code",
            post(|Path(id): Path<String>| async move {
                Json(json!({
                    "instance_id": id,
                    "pairing_code": "WXYZ-9876",
                    "pairing_code_valid": true,
                    "pairing_code_remaining_seconds": 180,
                    "pairing_code_expires_at": 1_756_100_180_000_i64,
                    "status": "waiting_for_pairing"
                }))
            }),
        );
    let api = client(serve(app).await);

    let info = api.pairing_code("a1").await.expect("pairing code");
    assert_eq!(info.pairing_code.as_deref(), Some("ABCD-1234"));
    assert!(info.is_usable());
    assert_eq!(info.status, Some(InstanceStatus::WaitingForPairing));

    let info = api.regenerate_code("a1").await.expect("regenerate");
    assert_eq!(info.pairing_code.as_deref(), Some("WXYZ-9876"));
    assert_eq!(info.pairing_code_remaining_seconds, 180);
}

#[tokio::test]
async fn connection_refused_is_a_retryable_transport_error() {
    // Port 9 on localhost is reliably closed.
    let api = client("http://127.0.0.1:9".to_string());
    let err = api.list_instances().await.expect_err("should fail");
    assert!(matches!(err, ApiError::Transport(_)), "{err:?}");
    assert!(err.is_retryable());
}

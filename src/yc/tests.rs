    use super::*;
    use axum::body::Bytes;
    use axum::extract::State;
    use axum::http::{HeaderMap, Method, StatusCode, Uri};
    use axum::response::{IntoResponse, Response};
    use axum::{Json, Router};
    use serde_json::Value;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    const IAM_TOKEN: &str = "t1.fake-iam-token";

    #[derive(Default)]
    struct FakeApi {
        requests: Mutex<Vec<String>>,
        iam_bodies: Mutex<Vec<Value>>,
        polls: AtomicUsize,
        fail_operation: AtomicBool,
    }

    impl FakeApi {
        fn requests(&self) -> Vec<String> {
            self.requests.lock().unwrap().clone()
        }
    }

    async fn handle(
        State(api): State<Arc<FakeApi>>,
        method: Method,
        uri: Uri,
        headers: HeaderMap,
        body: Bytes,
    ) -> Response {
        let path = uri.path().to_string();
        api.requests.lock().unwrap().push(format!("{method} {path}"));

        if path == "/iam" {
            let body: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);
            api.iam_bodies.lock().unwrap().push(body);
            let expires_at = chrono::Utc::now() + chrono::Duration::hours(12);
            return Json(json!({ "iamToken": IAM_TOKEN, "expiresAt": expires_at })).into_response();
        }

        let authorized = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v == format!("Bearer {IAM_TOKEN}"));
        if !authorized {
            return (StatusCode::UNAUTHORIZED, "missing token").into_response();
        }

        match (method, path.as_str()) {
            (Method::GET, "/compute/instances/vm-running") => {
                Json(json!({ "id": "vm-running", "status": "RUNNING" })).into_response()
            }
            (Method::GET, "/compute/instances/vm-starting") => {
                Json(json!({ "id": "vm-starting", "status": "STARTING" })).into_response()
            }
            (Method::GET, "/mks/clusters/k8s-stopped") => {
                Json(json!({ "id": "k8s-stopped", "status": "STOPPED" })).into_response()
            }
            (Method::POST, p) if p.ends_with(":start") || p.ends_with(":stop") => {
                Json(json!({ "id": "op-1", "done": false })).into_response()
            }
            (Method::GET, "/operations/op-1") => {
                let polls = api.polls.fetch_add(1, Ordering::SeqCst) + 1;
                if polls < 2 {
                    return Json(json!({ "id": "op-1", "done": false })).into_response();
                }
                if api.fail_operation.load(Ordering::SeqCst) {
                    Json(json!({
                        "id": "op-1",
                        "done": true,
                        "error": { "code": 9, "message": "instance is locked" }
                    }))
                    .into_response()
                } else {
                    Json(json!({ "id": "op-1", "done": true, "response": {} })).into_response()
                }
            }
            _ => (StatusCode::NOT_FOUND, Json(json!({ "message": "not found" }))).into_response(),
        }
    }

    async fn spawn_fake(api: Arc<FakeApi>) -> Endpoints {
        let app = Router::new().fallback(handle).with_state(api);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let base = format!("http://{addr}");
        Endpoints {
            compute: format!("{base}/compute"),
            mks: format!("{base}/mks"),
            operation: base.clone(),
            iam: format!("{base}/iam"),
        }
    }

    async fn client(api: Arc<FakeApi>) -> YcClient {
        let endpoints = spawn_fake(api).await;
        YcClient::with_endpoints(Credentials::OAuthToken("y0_oauth".to_string()), endpoints)
            .unwrap()
            .with_poll_interval(Duration::from_millis(10))
    }

    fn vm(id: &str) -> ResourceRef {
        ResourceRef::new(ResourceKind::Vm, id, "b1g-folder")
    }

    #[tokio::test]
    async fn test_get_state_maps_statuses() {
        let api = Arc::new(FakeApi::default());
        let client = client(api.clone()).await;

        assert_eq!(client.get_state(&vm("vm-running")).await.unwrap(), ResourceState::Running);
        assert_eq!(
            client.get_state(&vm("vm-starting")).await.unwrap(),
            ResourceState::Transitional("STARTING".to_string())
        );

        let cluster = ResourceRef::new(ResourceKind::K8sCluster, "k8s-stopped", "b1g-folder");
        assert_eq!(client.get_state(&cluster).await.unwrap(), ResourceState::Stopped);
    }

    #[tokio::test]
    async fn test_iam_token_is_exchanged_once() {
        let api = Arc::new(FakeApi::default());
        let client = client(api.clone()).await;

        client.validate_credentials().await.unwrap();
        client.get_state(&vm("vm-running")).await.unwrap();

        let iam_calls = api.requests().iter().filter(|r| r.as_str() == "POST /iam").count();
        assert_eq!(iam_calls, 1);
        let bodies = api.iam_bodies.lock().unwrap();
        assert_eq!(bodies[0]["yandexPassportOauthToken"], "y0_oauth");
    }

    #[tokio::test]
    async fn test_start_polls_operation_until_done() {
        let api = Arc::new(FakeApi::default());
        let client = client(api.clone()).await;

        client.start(&vm("vm-stopped")).await.unwrap();

        let requests = api.requests();
        assert!(requests.contains(&"POST /compute/instances/vm-stopped:start".to_string()));
        assert_eq!(api.polls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_stop_cluster_uses_mks_endpoint() {
        let api = Arc::new(FakeApi::default());
        let client = client(api.clone()).await;

        let cluster = ResourceRef::new(ResourceKind::K8sCluster, "k8s-running", "b1g-folder");
        client.stop(&cluster).await.unwrap();

        assert!(api
            .requests()
            .contains(&"POST /mks/clusters/k8s-running:stop".to_string()));
    }

    #[tokio::test]
    async fn test_failed_operation_is_an_error() {
        let api = Arc::new(FakeApi::default());
        api.fail_operation.store(true, Ordering::SeqCst);
        let client = client(api.clone()).await;

        let err = client.stop(&vm("vm-running")).await.unwrap_err();
        assert!(matches!(err, Error::Cloud(_)));
        assert!(err.to_string().contains("instance is locked"));
    }

    #[tokio::test]
    async fn test_http_error_is_reported() {
        let api = Arc::new(FakeApi::default());
        let client = client(api.clone()).await;

        let err = client.get_state(&vm("missing")).await.unwrap_err();
        assert!(err.to_string().contains("404"));
    }

    #[tokio::test]
    async fn test_unreachable_iam_fails_validation() {
        let endpoints = Endpoints {
            iam: "http://127.0.0.1:1/iam".to_string(),
            ..Endpoints::default()
        };
        let client =
            YcClient::with_endpoints(Credentials::OAuthToken("y0_oauth".to_string()), endpoints).unwrap();
        assert!(client.validate_credentials().await.is_err());
    }

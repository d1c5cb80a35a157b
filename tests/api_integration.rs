//! Router-level tests against the assembled front door, driven with
//! `tower::ServiceExt::oneshot` over an in-memory catalog. Node RPCs
//! target unroutable endpoints, so paths that depend on a live node
//! exercise the error translation instead.

use std::net::SocketAddr;

use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::{Request, StatusCode};
use axum::Router;
use chrono::Utc;
use serde_json::Value;
use tower::ServiceExt;

use stratus::catalog::{Catalog, ContainerRecord, ContainerStatus, ServiceRecord, ServiceStatus};
use stratus::config::Settings;
use stratus::metrics::Metrics;
use stratus::server::{create_router, AppState};
use stratus::services::ServiceKind;

async fn test_app() -> (Router, Catalog) {
    let catalog = Catalog::connect("sqlite::memory:")
        .await
        .expect("in-memory catalog");
    let state = AppState::new(catalog.clone(), Settings::for_tests(), Metrics::detached());
    (create_router(state), catalog)
}

fn request(method: &str, uri: &str, body: Option<Value>) -> Request<Body> {
    let peer: SocketAddr = "192.168.1.50:40000".parse().unwrap();
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .extension(ConnectInfo(peer));
    match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn seed_container(catalog: &Catalog, container_id: &str, node_id: &str) {
    catalog
        .insert_container(&ContainerRecord {
            container_id: container_id.to_string(),
            user_id: "system".to_string(),
            node_id: node_id.to_string(),
            image: "bucket-service".to_string(),
            name: Some("bucket-service".to_string()),
            status: ContainerStatus::Running,
            created_at: Utc::now(),
        })
        .await
        .unwrap();
}

async fn seed_service(catalog: &Catalog, kind: ServiceKind, service_id: &str, healthy: bool) {
    catalog
        .insert_service(
            kind,
            &ServiceRecord {
                service_id: service_id.to_string(),
                container_id: "c1".to_string(),
                node_id: "n1".to_string(),
                ip_address: "127.0.0.1".to_string(),
                port: 1,
                status: if healthy {
                    ServiceStatus::Running
                } else {
                    ServiceStatus::Unhealthy
                },
                is_healthy: healthy,
                created_at: Utc::now(),
                last_health_check: Utc::now(),
            },
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn test_root_banner() {
    let (app, _) = test_app().await;
    let response = app.oneshot(request("GET", "/", None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "running");
}

#[tokio::test]
async fn test_health_summarises_counts() {
    let (app, catalog) = test_app().await;
    catalog
        .register_node("n1", "http://10.0.0.5:9000")
        .await
        .unwrap();
    seed_container(&catalog, "c1", "n1").await;

    let response = app.oneshot(request("GET", "/health", None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["nodes"]["total"], 1);
    assert_eq!(body["nodes"]["healthy"], 1);
    assert_eq!(body["containers"]["running"], 1);
}

#[tokio::test]
async fn test_metrics_exposition() {
    let (app, _) = test_app().await;
    let response = app.oneshot(request("GET", "/metrics", None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response
        .headers()
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap()
        .to_string();
    assert!(content_type.starts_with("text/plain"));
}

#[tokio::test]
async fn test_register_node_and_list() {
    let (app, _) = test_app().await;

    let response = app
        .clone()
        .oneshot(request(
            "POST",
            "/register_node/n1?url=http://10.0.0.5:9000",
            None,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "success");
    assert_eq!(body["url"], "http://10.0.0.5:9000");

    let response = app.oneshot(request("GET", "/nodes", None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    let nodes = body["nodes"].as_array().unwrap();
    assert_eq!(nodes.len(), 1);
    assert_eq!(nodes[0]["node_id"], "n1");
    assert_eq!(nodes[0]["is_healthy"], true);
}

#[tokio::test]
async fn test_register_node_substitutes_wildcard_host() {
    let (app, catalog) = test_app().await;

    let response = app
        .oneshot(request(
            "POST",
            "/register_node/n1?url=http://0.0.0.0:9000",
            None,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let node = catalog.get_node("n1").await.unwrap().unwrap();
    assert_eq!(node.url, "http://192.168.1.50:9000");
}

#[tokio::test]
async fn test_launch_with_no_healthy_nodes_is_503() {
    let (app, _) = test_app().await;

    let body = serde_json::json!({
        "user_id": "alice",
        "config": {"image": "nginx:alpine", "cpu": 0.2, "memory": "512m"}
    });
    let response = app
        .oneshot(request("POST", "/launch", Some(body)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body = body_json(response).await;
    assert_eq!(body["detail"], "No healthy nodes available");
}

#[tokio::test]
async fn test_launch_bucket_with_no_healthy_nodes_is_503_and_creates_nothing() {
    let (app, catalog) = test_app().await;

    let response = app
        .oneshot(request("POST", "/launchBucket", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body = body_json(response).await;
    assert_eq!(body["detail"], "No healthy nodes available");

    assert_eq!(catalog.count_containers().await.unwrap(), 0);
    assert!(catalog
        .list_services(ServiceKind::Bucket)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_unknown_container_is_404() {
    let (app, _) = test_app().await;
    let response = app
        .oneshot(request("GET", "/containers/missing/status", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = body_json(response).await;
    assert_eq!(body["detail"], "Container not found");
}

#[tokio::test]
async fn test_container_on_unhealthy_node_is_503() {
    let (app, catalog) = test_app().await;
    catalog
        .register_node("n1", "http://10.0.0.5:9000")
        .await
        .unwrap();
    seed_container(&catalog, "c1", "n1").await;
    catalog.set_node_health("n1", false).await.unwrap();

    let response = app
        .oneshot(request("GET", "/containers/c1/status", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body = body_json(response).await;
    assert_eq!(body["detail"], "Container node is not available");
}

#[tokio::test]
async fn test_unknown_service_is_404() {
    let (app, _) = test_app().await;
    let response = app
        .oneshot(request("GET", "/bucket-services/bucket-missing", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = body_json(response).await;
    assert_eq!(body["detail"], "Bucket service not found");
}

#[tokio::test]
async fn test_unhealthy_service_is_not_forwarded() {
    let (app, catalog) = test_app().await;
    catalog
        .register_node("n1", "http://10.0.0.5:9000")
        .await
        .unwrap();
    seed_container(&catalog, "c1", "n1").await;
    seed_service(&catalog, ServiceKind::Queue, "queue-1", false).await;

    let body = serde_json::json!({"message": "hello"});
    let response = app
        .oneshot(request(
            "POST",
            "/queue-services/queue-1/messages",
            Some(body),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body = body_json(response).await;
    assert_eq!(body["detail"], "Queue service is not healthy");
}

#[tokio::test]
async fn test_service_listing_shape() {
    let (app, catalog) = test_app().await;
    catalog
        .register_node("n1", "http://10.0.0.5:9000")
        .await
        .unwrap();
    seed_container(&catalog, "c1", "n1").await;
    seed_service(&catalog, ServiceKind::Bucket, "bucket-1", true).await;

    let response = app
        .oneshot(request("GET", "/bucket-services", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    let services = body["bucket_services"].as_array().unwrap();
    assert_eq!(services.len(), 1);
    assert_eq!(services[0]["service_id"], "bucket-1");
    assert_eq!(services[0]["service_url"], "http://127.0.0.1:1");
}

#[tokio::test]
async fn test_delete_service_survives_dead_node() {
    let (app, catalog) = test_app().await;
    // The node is registered but unreachable and marked unhealthy:
    // removal must still clear both rows.
    catalog
        .register_node("n1", "http://10.0.0.5:9000")
        .await
        .unwrap();
    catalog.set_node_health("n1", false).await.unwrap();
    seed_container(&catalog, "c1", "n1").await;
    seed_service(&catalog, ServiceKind::Bucket, "bucket-1", true).await;

    let response = app
        .oneshot(request("DELETE", "/bucket-services/bucket-1", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    assert!(catalog
        .get_service(ServiceKind::Bucket, "bucket-1")
        .await
        .unwrap()
        .is_none());
    assert!(catalog.get_container("c1").await.unwrap().is_none());

    // A later reappearance of the node does not resurrect the rows.
    catalog.set_node_health("n1", true).await.unwrap();
    assert!(catalog
        .get_service(ServiceKind::Bucket, "bucket-1")
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_db_service_listing_includes_limits() {
    let (app, catalog) = test_app().await;
    catalog
        .register_node("n1", "http://10.0.0.5:9000")
        .await
        .unwrap();
    seed_container(&catalog, "c1", "n1").await;
    catalog
        .insert_sql_service(&stratus::catalog::SqlServiceRecord {
            service_id: "db-1".to_string(),
            container_id: "c1".to_string(),
            node_id: "n1".to_string(),
            ip_address: "10.0.0.5".to_string(),
            port: 32801,
            status: ServiceStatus::Running,
            is_healthy: true,
            created_at: Utc::now(),
            last_health_check: Utc::now(),
            max_cpu_percent: 50,
            max_ram_mb: 1024,
            max_disk_gb: 5,
            database_name: "app".to_string(),
            instance_name: None,
        })
        .await
        .unwrap();

    let response = app
        .oneshot(request("GET", "/db-services", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    let services = body["db_services"].as_array().unwrap();
    assert_eq!(services.len(), 1);
    assert_eq!(services[0]["max_ram_mb"], 1024);
    assert_eq!(services[0]["database_name"], "app");
    assert_eq!(services[0]["service_url"], "http://10.0.0.5:32801");
}

#[tokio::test]
async fn test_templates_fall_back_without_nodes() {
    let (app, _) = test_app().await;
    let response = app
        .oneshot(request("GET", "/templates", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    let templates = body["templates"].as_array().unwrap();
    assert!(templates.iter().any(|t| t["name"] == "nginx"));
}

#[tokio::test]
async fn test_launch_rate_limit_trips_429() {
    let (app, _) = test_app().await;

    // The launch class admits 10 per minute per client; the 503s from
    // the empty cluster still consume tokens.
    let mut last_status = StatusCode::OK;
    for _ in 0..11 {
        let response = app
            .clone()
            .oneshot(request("POST", "/launchQueue", None))
            .await
            .unwrap();
        last_status = response.status();
    }
    assert_eq!(last_status, StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn test_billing_usage_summary() {
    let (app, catalog) = test_app().await;
    catalog
        .record_usage("c1", "compute", 2.0, "hours", 0.20, None)
        .await
        .unwrap();

    let response = app
        .oneshot(request("GET", "/billing/usage", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["usage"].as_array().unwrap().len(), 1);
    assert!((body["total_cost"].as_f64().unwrap() - 0.20).abs() < 1e-9);
}
